//! Random array construction.
//!
//! Used to build test inputs and finite-difference checks.

use rand::Rng;
use rand::distr::StandardUniform;
use rand_distr::StandardNormal;

use crate::array::NdArray;
use crate::backend;
use crate::strides::shape_len;

impl NdArray {
    /// Create an array with uniform random values in [0, 1).
    ///
    /// # Example
    ///
    /// ```
    /// use ndgrad::NdArray;
    ///
    /// let t = NdArray::random_uniform(&[2, 3]);
    /// assert_eq!(t.shape(), &[2, 3]);
    /// assert!(t.data().iter().all(|v| (0.0..1.0).contains(v)));
    /// ```
    pub fn random_uniform(shape: &[usize]) -> Self {
        Self::random_uniform_with_rng(shape, &mut rand::rng())
    }

    /// Create an array with uniform random values using a specific RNG.
    ///
    /// # Example
    ///
    /// ```
    /// use ndgrad::NdArray;
    /// use rand::SeedableRng;
    /// use rand::rngs::StdRng;
    ///
    /// let t1 = NdArray::random_uniform_with_rng(&[2, 3], &mut StdRng::seed_from_u64(42));
    /// let t2 = NdArray::random_uniform_with_rng(&[2, 3], &mut StdRng::seed_from_u64(42));
    /// assert_eq!(t1, t2);
    /// ```
    pub fn random_uniform_with_rng<R: Rng>(shape: &[usize], rng: &mut R) -> Self {
        let data = (0..shape_len(shape))
            .map(|_| rng.sample::<f64, _>(StandardUniform))
            .collect();
        Self::from_parts(data, shape.to_vec(), backend::default_backend())
    }

    /// Create an array with standard normal random values.
    pub fn random_normal(shape: &[usize]) -> Self {
        Self::random_normal_with_rng(shape, &mut rand::rng())
    }

    /// Create an array with standard normal random values using a specific RNG.
    pub fn random_normal_with_rng<R: Rng>(shape: &[usize], rng: &mut R) -> Self {
        let data = (0..shape_len(shape))
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        Self::from_parts(data, shape.to_vec(), backend::default_backend())
    }
}
