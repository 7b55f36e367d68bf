//! Reductions and shape operations.

use smallvec::smallvec;

use crate::autodiff::tensor::Tracked;
use crate::backend::kernels::reduced_shape;
use crate::backend::{BinaryOp, ReduceOp};
use crate::error::{Result, ShapeError};
use crate::strides::reduced_axes;

impl Tracked {
    /// Sum of all elements as a rank-0 value.
    pub fn sum(&self) -> Result<Tracked> {
        let axes: Vec<usize> = (0..self.ndim()).collect();
        self.sum_axes(&axes, false)
    }

    /// Sum over `axes`.
    ///
    /// The gradient is reshaped to keep-dims form and broadcast back to the
    /// input shape.
    pub fn sum_axes(&self, axes: &[usize], keepdims: bool) -> Result<Tracked> {
        let value = self.value().sum_axes(axes, keepdims)?;
        let in_shape = self.shape().to_vec();
        let kept = reduced_shape(&in_shape, axes, true);
        Ok(Tracked::record(value, "sum", &[self], move |_, g| {
            Ok(smallvec![Some(g.reshape(&kept)?.broadcast_to(&in_shape)?)])
        }))
    }

    /// Mean of all elements as a rank-0 value.
    pub fn mean(&self) -> Result<Tracked> {
        let scale = self.scalar_like(1.0 / self.len() as f64);
        self.sum()?.try_mul(&scale)
    }

    /// Mean over `axes`.
    pub fn mean_axes(&self, axes: &[usize], keepdims: bool) -> Result<Tracked> {
        let total = self.sum_axes(axes, keepdims)?;
        let scale = self.scalar_like(1.0 / self.count_over(axes) as f64);
        total.try_mul(&scale)
    }

    /// Variance over `axes` with `ddof` delta degrees of freedom, i.e.
    /// `sum((x - mean)^2) / (n - ddof)`.
    pub fn var(&self, axes: &[usize], ddof: usize, keepdims: bool) -> Result<Tracked> {
        let centered = self.try_sub(&self.mean_axes(axes, true)?)?;
        let squares = centered.try_mul(&centered)?.sum_axes(axes, keepdims)?;
        let dof = self.count_over(axes) as f64 - ddof as f64;
        squares.try_div(&self.scalar_like(dof))
    }

    /// Standard deviation, the square root of [`var`](Self::var).
    pub fn std(&self, axes: &[usize], ddof: usize, keepdims: bool) -> Result<Tracked> {
        self.var(axes, ddof, keepdims)?.sqrt()
    }

    /// Number of elements each output of a reduction over `axes` covers.
    fn count_over(&self, axes: &[usize]) -> usize {
        self.shape()
            .iter()
            .enumerate()
            .filter(|(i, _)| axes.contains(i))
            .map(|(_, &d)| d)
            .product()
    }

    /// Largest element as a rank-0 value.
    pub fn max(&self) -> Result<Tracked> {
        let axes: Vec<usize> = (0..self.ndim()).collect();
        self.max_axes(&axes, false)
    }

    /// Smallest element as a rank-0 value.
    pub fn min(&self) -> Result<Tracked> {
        let axes: Vec<usize> = (0..self.ndim()).collect();
        self.min_axes(&axes, false)
    }

    /// Maximum over `axes`. Tied elements split the gradient evenly.
    pub fn max_axes(&self, axes: &[usize], keepdims: bool) -> Result<Tracked> {
        self.extremum(ReduceOp::Max, axes, keepdims)
    }

    /// Minimum over `axes`. Tied elements split the gradient evenly.
    pub fn min_axes(&self, axes: &[usize], keepdims: bool) -> Result<Tracked> {
        self.extremum(ReduceOp::Min, axes, keepdims)
    }

    fn extremum(&self, op: ReduceOp, axes: &[usize], keepdims: bool) -> Result<Tracked> {
        let value = self.value().reduce_axes(op, axes, keepdims)?;
        let x = self.value().clone();
        let axes = axes.to_vec();
        Ok(Tracked::record(value, op.name(), &[self], move |out, g| {
            let kept = reduced_shape(x.shape(), &axes, true);
            let hits = x.binary(BinaryOp::Equal, &out.value().reshape(&kept)?)?;
            let ties = hits.sum_axes(&axes, true)?;
            let weights = Tracked::new(hits.binary(BinaryOp::Div, &ties)?);
            Ok(smallvec![Some(g.reshape(&kept)?.try_mul(&weights)?)])
        }))
    }

    /// Product of all elements as a rank-0 value.
    pub fn prod(&self) -> Result<Tracked> {
        let axes: Vec<usize> = (0..self.ndim()).collect();
        self.prod_axes(&axes, false)
    }

    /// Product over `axes`.
    ///
    /// The gradient of an element is the product of the other elements of
    /// its slice. Zeros are handled without dividing by them: a slice with
    /// one zero sends its gradient to that zero only, and a slice with
    /// several zeros has none.
    pub fn prod_axes(&self, axes: &[usize], keepdims: bool) -> Result<Tracked> {
        let value = self.value().reduce_axes(ReduceOp::Prod, axes, keepdims)?;
        let x = self.clone();
        let axes = axes.to_vec();
        Ok(Tracked::record(value, "prod", &[self], move |_, g| {
            let kept = reduced_shape(x.shape(), &axes, true);
            let is_zero = x.value().binary(BinaryOp::Equal, &x.value().scalar_like(0.0))?;
            let zeros = is_zero.sum_axes(&axes, true)?;
            let none_zero = Tracked::new(zeros.binary(BinaryOp::Equal, &zeros.scalar_like(0.0))?);
            let one_zero = Tracked::new(zeros.binary(BinaryOp::Equal, &zeros.scalar_like(1.0))?);
            let is_zero = Tracked::new(is_zero);

            // product over the nonzero elements of each slice
            let safe = is_zero.select(&x.ones_like(), &x)?;
            let rest = safe.prod_axes(&axes, true)?;
            let at_zero = rest.try_mul(&one_zero)?;
            let elsewhere = rest.try_div(&safe)?.try_mul(&none_zero)?;
            let dx = is_zero.select(&at_zero, &elsewhere)?;
            Ok(smallvec![Some(dx.try_mul(&g.reshape(&kept)?)?)])
        }))
    }

    /// Reinterpret with a new shape of the same element count.
    pub fn reshape(&self, shape: &[usize]) -> Result<Tracked> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        let value = self.value().reshape(shape)?;
        let in_shape = self.shape().to_vec();
        Ok(Tracked::record(value, "reshape", &[self], move |_, g| {
            Ok(smallvec![Some(g.reshape(&in_shape)?)])
        }))
    }

    /// Insert a length-1 axis at position `axis`.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidAxis`] if `axis > ndim`.
    pub fn expand_dims(&self, axis: usize) -> Result<Tracked> {
        if axis > self.ndim() {
            return Err(ShapeError::InvalidAxis {
                axis,
                ndim: self.ndim() + 1,
            }
            .into());
        }
        let mut shape = self.shape().to_vec();
        shape.insert(axis, 1);
        self.reshape(&shape)
    }

    /// Drop length-1 axes: the listed ones, or all of them when `axes` is
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidAxis`] for an out-of-range axis and
    /// [`ShapeError::Mismatch`] for a listed axis whose length is not 1.
    pub fn squeeze(&self, axes: &[usize]) -> Result<Tracked> {
        for &axis in axes {
            match self.shape().get(axis) {
                None => {
                    return Err(ShapeError::InvalidAxis {
                        axis,
                        ndim: self.ndim(),
                    }
                    .into());
                }
                Some(&len) if len != 1 => {
                    return Err(ShapeError::Mismatch {
                        op: "squeeze",
                        expected: vec![1],
                        actual: vec![len],
                    }
                    .into());
                }
                Some(_) => {}
            }
        }
        let shape: Vec<usize> = self
            .shape()
            .iter()
            .enumerate()
            .filter(|&(i, &d)| !(d == 1 && (axes.is_empty() || axes.contains(&i))))
            .map(|(_, &d)| d)
            .collect();
        self.reshape(&shape)
    }

    /// Broadcast to `shape` following numpy rules.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Tracked> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        let value = self.value().broadcast_to(shape)?;
        let in_shape = self.shape().to_vec();
        Ok(Tracked::record(value, "broadcast_to", &[self], move |_, g| {
            Ok(smallvec![Some(g.sum_to_shape(&in_shape)?)])
        }))
    }

    /// Sum away the axes that broadcasting added to reach this shape from
    /// `shape`. Inverse of [`broadcast_to`](Self::broadcast_to) for gradients.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Broadcast`] if `shape` does not broadcast to
    /// this value's shape.
    pub fn sum_to_shape(&self, shape: &[usize]) -> Result<Tracked> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        if shape.len() > self.ndim() {
            return Err(ShapeError::Broadcast {
                op: "sum_to_shape",
                lhs: self.shape().to_vec(),
                rhs: shape.to_vec(),
            }
            .into());
        }
        let axes = reduced_axes(self.shape(), shape);
        self.sum_axes(&axes, true)?.reshape(shape)
    }
}

#[cfg(test)]
mod tests {
    use crate::{NdArray, Tracked, array, grad};
    use approx::assert_relative_eq;

    #[test]
    fn test_sum_axes_gradient_broadcasts_back() {
        let x = Tracked::new(array([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
        let weights = Tracked::new(array([1.0, 10.0]));
        // f(x) = sum_i w_i * sum_j x_ij
        let f = move |x: &Tracked| x.sum_axes(&[1], false)?.try_mul(&weights)?.sum();
        let dx = grad(f)(&x).unwrap();
        assert_eq!(dx.shape(), &[2, 3]);
        assert_eq!(dx.data(), &[1.0, 1.0, 1.0, 10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_mean_gradient() {
        let x = Tracked::new(array([1.0, 2.0, 3.0, 4.0]));
        let dx = grad(|x: &Tracked| x.mean())(&x).unwrap();
        for &v in dx.data() {
            assert_relative_eq!(v, 0.25);
        }
    }

    #[test]
    fn test_reshape_gradient_restores_shape() {
        let x = Tracked::new(array([[1.0, 2.0], [3.0, 4.0]]));
        let dx = grad(|x: &Tracked| {
            let flat = x.reshape(&[4])?;
            flat.try_mul(&flat)?.sum()
        })(&x)
        .unwrap();
        assert_eq!(dx.shape(), &[2, 2]);
        assert_eq!(dx.data(), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_sum_to_shape() {
        let g = Tracked::new(NdArray::ones(&[2, 3]));
        assert_eq!(g.sum_to_shape(&[3]).unwrap().data(), &[2.0, 2.0, 2.0]);
        assert_eq!(g.sum_to_shape(&[2, 1]).unwrap().data(), &[3.0, 3.0]);
        assert_eq!(g.sum_to_shape(&[]).unwrap().item().unwrap(), 6.0);
        assert!(g.sum_to_shape(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_broadcast_to_gradient() {
        let x = Tracked::scalar(2.0);
        let dx = grad(|x: &Tracked| x.broadcast_to(&[3, 2])?.sum())(&x).unwrap();
        assert_relative_eq!(dx.item().unwrap(), 6.0);
    }

    #[test]
    fn test_max_gradient_splits_ties() {
        let x = Tracked::new(array([[1.0, 5.0, 5.0], [2.0, 0.0, -1.0]]));
        let dx = grad(|x: &Tracked| x.max_axes(&[1], false)?.sum())(&x).unwrap();
        assert_eq!(dx.data(), &[0.0, 0.5, 0.5, 1.0, 0.0, 0.0]);

        let dx = grad(|x: &Tracked| x.min())(&x).unwrap();
        assert_eq!(dx.data(), &[0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_prod_gradient() {
        let x = Tracked::new(array([2.0, 3.0, 4.0]));
        let dx = grad(|x: &Tracked| x.prod())(&x).unwrap();
        assert_eq!(dx.data(), &[12.0, 8.0, 6.0]);

        let x = Tracked::new(array([[0.0, 3.0, 2.0], [0.0, 0.0, 5.0]]));
        let dx = grad(|x: &Tracked| x.prod_axes(&[1], false)?.sum())(&x).unwrap();
        assert_eq!(dx.data(), &[6.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        // prod([x, x]) = x^2, so the second derivative is 2
        let df = grad(|x: &Tracked| x.broadcast_to(&[2])?.prod());
        let d2f = grad(move |x: &Tracked| df(x));
        assert_relative_eq!(d2f(&Tracked::scalar(3.0)).unwrap().item().unwrap(), 2.0);
    }

    #[test]
    fn test_var_and_std() {
        let x = Tracked::new(array([[1.0, 3.0], [2.0, 6.0]]));
        assert_eq!(x.var(&[1], 0, false).unwrap().data(), &[1.0, 4.0]);
        assert_eq!(x.var(&[1], 1, true).unwrap().shape(), &[2, 1]);
        assert_eq!(x.std(&[1], 0, false).unwrap().data(), &[1.0, 2.0]);

        // d/dx var(x) = 2 (x - mean) / n
        let v = Tracked::new(array([1.0, 2.0, 6.0]));
        let dv = grad(|v: &Tracked| v.var(&[0], 0, false))(&v).unwrap();
        for (got, want) in dv.data().iter().zip([-4.0 / 3.0, -2.0 / 3.0, 2.0]) {
            assert_relative_eq!(*got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_expand_dims_and_squeeze() {
        let x = Tracked::new(array([1.0, 2.0]));
        let col = x.expand_dims(1).unwrap();
        assert_eq!(col.shape(), &[2, 1]);
        assert_eq!(col.expand_dims(0).unwrap().shape(), &[1, 2, 1]);
        assert_eq!(col.squeeze(&[]).unwrap().shape(), &[2]);
        assert!(x.expand_dims(2).is_err());
        assert!(col.squeeze(&[0]).is_err());
        assert!(col.squeeze(&[2]).is_err());

        let dx = grad(|x: &Tracked| x.expand_dims(0)?.squeeze(&[0])?.sum())(&x).unwrap();
        assert_eq!(dx.shape(), &[2]);
    }
}
