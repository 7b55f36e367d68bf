//! Axis permutation and matrix products.

use smallvec::smallvec;

use crate::autodiff::tensor::Tracked;
use crate::error::Result;

impl Tracked {
    /// Permute axes: output axis `i` is input axis `perm[i]`.
    pub fn permute(&self, perm: &[usize]) -> Result<Tracked> {
        let value = self.value().permute(perm)?;
        let mut inverse = vec![0; perm.len()];
        for (i, &p) in perm.iter().enumerate() {
            inverse[p] = i;
        }
        Ok(Tracked::record(value, "permute", &[self], move |_, g| {
            Ok(smallvec![Some(g.permute(&inverse)?)])
        }))
    }

    /// Reverse the axes.
    pub fn transpose(&self) -> Result<Tracked> {
        let perm: Vec<usize> = (0..self.ndim()).rev().collect();
        self.permute(&perm)
    }

    /// Matrix product.
    ///
    /// Rank-1 operands are promoted to a row (left) or column (right) and the
    /// promoted axis is dropped from the result, so vector-vector products
    /// return a rank-0 value.
    ///
    /// # Example
    ///
    /// ```
    /// use ndgrad::{Tracked, array};
    ///
    /// let a = Tracked::new(array([[1.0, 2.0], [3.0, 4.0]]));
    /// let v = Tracked::new(array([1.0, 1.0]));
    /// assert_eq!(a.matmul(&v).unwrap().data(), &[3.0, 7.0]);
    /// assert_eq!(v.matmul(&v).unwrap().item().unwrap(), 2.0);
    /// ```
    pub fn matmul(&self, other: &Tracked) -> Result<Tracked> {
        match (self.shape(), other.shape()) {
            (&[k], &[_, n]) => self.reshape(&[1, k])?.matmul_2d(other)?.reshape(&[n]),
            (&[m, _], &[k]) => self.matmul_2d(&other.reshape(&[k, 1])?)?.reshape(&[m]),
            (&[k], &[l]) => self
                .reshape(&[1, k])?
                .matmul_2d(&other.reshape(&[l, 1])?)?
                .reshape(&[]),
            _ => self.matmul_2d(other),
        }
    }

    fn matmul_2d(&self, other: &Tracked) -> Result<Tracked> {
        let value = self.value().matmul(other.value())?;
        let (a, b) = (self.clone(), other.clone());
        Ok(Tracked::record(value, "matmul", &[self, other], move |_, g| {
            Ok(smallvec![
                Some(g.matmul_2d(&b.transpose()?)?),
                Some(a.transpose()?.matmul_2d(g)?),
            ])
        }))
    }

    /// Sum of the elementwise product.
    pub fn dot(&self, other: &Tracked) -> Result<Tracked> {
        self.try_mul(other)?.sum()
    }
}
