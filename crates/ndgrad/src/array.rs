//! Dense n-dimensional `f64` array bound to a backend provider.
//!
//! `NdArray` is the leaf value of every differentiable computation. Buffers
//! are row-major and shared through an `Arc`, so cloning an array (which the
//! tape does for every recorded operand) never copies element data.
//!
//! Every operation validates its operands here, before dispatching to the
//! provider the array lives on:
//!
//! ```text
//! NdArray::binary(op, other)
//!     ├── same backend?        else GradError::DeviceMismatch
//!     ├── broadcastable?       else ShapeError::Broadcast
//!     └── provider(kind).binary(op, a, b)
//! ```

use std::fmt;
use std::sync::Arc;

use crate::backend::{self, Backend, BackendKind, BinaryOp, ReduceOp, UnaryOp};
use crate::error::{GradError, Result, ShapeError};
use crate::strides::{broadcast_shapes, cartesian_to_linear, compute_strides, shape_len};

/// Dense row-major array of `f64`.
#[derive(Clone)]
pub struct NdArray {
    data: Arc<[f64]>,
    shape: Vec<usize>,
    backend: BackendKind,
}

impl NdArray {
    /// Assemble an array from kernel output. Callers guarantee the length.
    pub(crate) fn from_parts(data: Vec<f64>, shape: Vec<usize>, backend: BackendKind) -> Self {
        debug_assert_eq!(data.len(), shape_len(&shape));
        Self {
            data: data.into(),
            shape,
            backend,
        }
    }

    /// Create an array on the default backend.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::ElementCount`] if `data.len()` does not match
    /// `shape`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndgrad::NdArray;
    ///
    /// let a = NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
    /// assert_eq!(a.shape(), &[2, 3]);
    /// assert_eq!(a.get(&[0, 1]), Some(2.0)); // row-major
    /// assert_eq!(a.get(&[1, 0]), Some(4.0));
    /// ```
    pub fn from_vec(data: Vec<f64>, shape: &[usize]) -> Result<Self> {
        Self::from_vec_on(backend::default_backend(), data, shape)
    }

    /// Create an array on a specific backend.
    ///
    /// # Errors
    ///
    /// Returns [`GradError::BackendSelection`] if `backend` is not usable, or
    /// [`ShapeError::ElementCount`] on a length mismatch.
    pub fn from_vec_on(backend: BackendKind, data: Vec<f64>, shape: &[usize]) -> Result<Self> {
        backend::provider(backend)?;
        let expected = shape_len(shape);
        if data.len() != expected {
            return Err(ShapeError::ElementCount {
                shape: shape.to_vec(),
                expected,
                actual: data.len(),
            }
            .into());
        }
        Ok(Self::from_parts(data, shape.to_vec(), backend))
    }

    /// Rank-0 array holding `value`.
    pub fn scalar(value: f64) -> Self {
        Self::full(&[], value)
    }

    /// Array filled with `value` on the default backend.
    pub fn full(shape: &[usize], value: f64) -> Self {
        Self::full_on(backend::default_backend(), shape, value)
    }

    /// Array filled with `value` on `backend`.
    pub fn full_on(backend: BackendKind, shape: &[usize], value: f64) -> Self {
        Self::from_parts(vec![value; shape_len(shape)], shape.to_vec(), backend)
    }

    /// Zero-initialised array on the default backend.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndgrad::NdArray;
    ///
    /// let z = NdArray::zeros(&[2, 3]);
    /// assert_eq!(z.len(), 6);
    /// assert!(z.data().iter().all(|&v| v == 0.0));
    /// ```
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// One-initialised array on the default backend.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Zeros with this array's shape and backend.
    pub fn zeros_like(&self) -> Self {
        Self::full_on(self.backend, &self.shape, 0.0)
    }

    /// Ones with this array's shape and backend.
    pub fn ones_like(&self) -> Self {
        Self::full_on(self.backend, &self.shape, 1.0)
    }

    /// Rank-0 array holding `value` on this array's backend.
    pub fn scalar_like(&self, value: f64) -> Self {
        Self::full_on(self.backend, &[], value)
    }

    /// Underlying row-major buffer.
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Copy the buffer out.
    pub fn to_vec(&self) -> Vec<f64> {
        self.data.to_vec()
    }

    /// Get the shape of the array.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the rank (number of dimensions).
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the array has zero elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Provider this array lives on.
    #[inline]
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Get element by cartesian indices.
    ///
    /// Returns `None` if indices are out of bounds or wrong number of indices.
    pub fn get(&self, indices: &[usize]) -> Option<f64> {
        if indices.len() != self.ndim() {
            return None;
        }
        if indices.iter().zip(&self.shape).any(|(&idx, &dim)| idx >= dim) {
            return None;
        }
        let linear = cartesian_to_linear(indices, &compute_strides(&self.shape));
        self.data.get(linear).copied()
    }

    /// The single element of a one-element array.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::ElementCount`] if the array does not hold
    /// exactly one element.
    pub fn item(&self) -> Result<f64> {
        match *self.data {
            [v] => Ok(v),
            _ => Err(ShapeError::ElementCount {
                shape: self.shape.clone(),
                expected: 1,
                actual: self.len(),
            }
            .into()),
        }
    }

    /// Copy this array onto another provider.
    ///
    /// This is the only operation that moves data between backends.
    ///
    /// # Errors
    ///
    /// Returns [`GradError::BackendSelection`] if `backend` is not usable.
    pub fn to_backend(&self, backend: BackendKind) -> Result<Self> {
        backend::provider(backend)?;
        Ok(Self {
            data: Arc::clone(&self.data),
            shape: self.shape.clone(),
            backend,
        })
    }

    /// Reinterpret the buffer with a new shape of the same element count.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::ElementCount`] if the element counts differ.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let expected = shape_len(shape);
        if expected != self.len() {
            return Err(ShapeError::ElementCount {
                shape: shape.to_vec(),
                expected,
                actual: self.len(),
            }
            .into());
        }
        Ok(Self {
            data: Arc::clone(&self.data),
            shape: shape.to_vec(),
            backend: self.backend,
        })
    }

    fn provider(&self) -> Result<&'static dyn Backend> {
        backend::provider(self.backend)
    }

    fn check_same_backend(&self, op: &'static str, other: &NdArray) -> Result<()> {
        if self.backend != other.backend {
            return Err(GradError::DeviceMismatch {
                op,
                lhs: self.backend,
                rhs: other.backend,
            });
        }
        Ok(())
    }

    /// Elementwise unary operation.
    pub fn unary(&self, op: UnaryOp) -> Result<Self> {
        self.provider()?.unary(op, self)
    }

    /// Elementwise binary operation with numpy broadcasting.
    ///
    /// # Errors
    ///
    /// Returns [`GradError::DeviceMismatch`] if the operands live on
    /// different backends, or [`ShapeError::Broadcast`] if the shapes are
    /// incompatible.
    pub fn binary(&self, op: BinaryOp, other: &NdArray) -> Result<Self> {
        self.check_same_backend(op.name(), other)?;
        broadcast_shapes(op.name(), &self.shape, &other.shape)?;
        self.provider()?.binary(op, self, other)
    }

    /// Sum over `axes`. Duplicate axes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidAxis`] if an axis is out of range.
    pub fn sum_axes(&self, axes: &[usize], keepdims: bool) -> Result<Self> {
        self.reduce_axes(ReduceOp::Sum, axes, keepdims)
    }

    /// Reduce over `axes` with `op`. Duplicate axes are ignored; reducing
    /// an empty axis yields the identity of `op`.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidAxis`] if an axis is out of range.
    pub fn reduce_axes(&self, op: ReduceOp, axes: &[usize], keepdims: bool) -> Result<Self> {
        let mut axes = axes.to_vec();
        axes.sort_unstable();
        axes.dedup();
        if let Some(&axis) = axes.iter().find(|&&a| a >= self.ndim()) {
            return Err(ShapeError::InvalidAxis {
                axis,
                ndim: self.ndim(),
            }
            .into());
        }
        if axes.is_empty() {
            return Ok(self.clone());
        }
        self.provider()?.reduce(op, self, &axes, keepdims)
    }

    /// Elementwise `self != 0 ? on_true : on_false`, broadcasting all three.
    ///
    /// # Errors
    ///
    /// Returns [`GradError::DeviceMismatch`] on mixed residency and
    /// [`ShapeError::Broadcast`] if the shapes are incompatible.
    pub fn select(&self, on_true: &NdArray, on_false: &NdArray) -> Result<Self> {
        self.check_same_backend("select", on_true)?;
        self.check_same_backend("select", on_false)?;
        let branches = broadcast_shapes("select", &on_true.shape, &on_false.shape)?;
        broadcast_shapes("select", &self.shape, &branches)?;
        self.provider()?.select(self, on_true, on_false)
    }

    /// Sum of all elements as a rank-0 array.
    pub fn sum(&self) -> Result<Self> {
        let axes: Vec<usize> = (0..self.ndim()).collect();
        self.sum_axes(&axes, false)
    }

    /// Broadcast to `shape`, materialising the result.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::Broadcast`] if `shape` is not a broadcast
    /// target of this array's shape.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Self> {
        if self.shape == shape {
            return Ok(self.clone());
        }
        let target = broadcast_shapes("broadcast_to", &self.shape, shape)?;
        if target != shape {
            return Err(ShapeError::Broadcast {
                op: "broadcast_to",
                lhs: self.shape.clone(),
                rhs: shape.to_vec(),
            }
            .into());
        }
        self.provider()?.broadcast_to(self, shape)
    }

    /// Permute axes: output axis `i` is input axis `perm[i]`.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError::InvalidPermutation`] if `perm` is not a
    /// permutation of `0..ndim`.
    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        let mut seen = vec![false; self.ndim()];
        let valid = perm.len() == self.ndim()
            && perm
                .iter()
                .all(|&p| p < seen.len() && !std::mem::replace(&mut seen[p], true));
        if !valid {
            return Err(ShapeError::InvalidPermutation {
                perm: perm.to_vec(),
                ndim: self.ndim(),
            }
            .into());
        }
        if perm.iter().enumerate().all(|(i, &p)| i == p) {
            return Ok(self.clone());
        }
        self.provider()?.permute(self, perm)
    }

    /// Reverse the axes.
    pub fn transpose(&self) -> Result<Self> {
        let perm: Vec<usize> = (0..self.ndim()).rev().collect();
        self.permute(&perm)
    }

    /// Matrix product of two rank-2 arrays.
    ///
    /// # Errors
    ///
    /// Returns [`GradError::DeviceMismatch`] on mixed residency and a shape
    /// error if the inner dimensions differ.
    pub fn matmul(&self, other: &NdArray) -> Result<Self> {
        self.check_same_backend("matmul", other)?;
        self.provider()?.matmul(self, other)
    }

    /// Block until pending work on this array's provider has completed.
    pub fn synchronize(&self) -> Result<()> {
        self.provider()?.synchronize();
        Ok(())
    }
}

/// Values and shape are compared; the backend is not.
impl PartialEq for NdArray {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

impl fmt::Debug for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdArray")
            .field("shape", &self.shape)
            .field("backend", &self.backend)
            .field("data", &&*self.data)
            .finish()
    }
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn nested(f: &mut fmt::Formatter<'_>, data: &[f64], shape: &[usize]) -> fmt::Result {
            let Some((&first, rest)) = shape.split_first() else {
                return write!(f, "{}", data[0]);
            };
            let chunk = shape_len(rest);
            f.write_str("[")?;
            for i in 0..first {
                if i > 0 {
                    f.write_str(", ")?;
                }
                nested(f, &data[i * chunk..(i + 1) * chunk], rest)?;
            }
            f.write_str("]")
        }
        nested(f, &self.data, &self.shape)
    }
}

impl From<f64> for NdArray {
    fn from(value: f64) -> Self {
        NdArray::scalar(value)
    }
}

impl From<Vec<f64>> for NdArray {
    fn from(data: Vec<f64>) -> Self {
        let shape = vec![data.len()];
        NdArray::from_parts(data, shape, backend::default_backend())
    }
}

impl<const N: usize> From<[f64; N]> for NdArray {
    fn from(data: [f64; N]) -> Self {
        NdArray::from(data.to_vec())
    }
}

impl<const M: usize, const N: usize> From<[[f64; N]; M]> for NdArray {
    fn from(rows: [[f64; N]; M]) -> Self {
        let data: Vec<f64> = rows.iter().flatten().copied().collect();
        NdArray::from_parts(data, vec![M, N], backend::default_backend())
    }
}

/// Nested rows; ragged input is rejected.
impl TryFrom<Vec<Vec<f64>>> for NdArray {
    type Error = GradError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().find(|r| r.len() != cols) {
            return Err(ShapeError::Mismatch {
                op: "array",
                expected: vec![cols],
                actual: vec![row.len()],
            }
            .into());
        }
        let shape = [rows.len(), cols];
        let data: Vec<f64> = rows.into_iter().flatten().collect();
        NdArray::from_vec(data, &shape)
    }
}

/// Build an array on the default backend from a scalar, vector or nested
/// fixed-size array.
///
/// # Examples
///
/// ```
/// use ndgrad::array;
///
/// assert_eq!(array(3.0).shape(), &[] as &[usize]);
/// assert_eq!(array([1.0, 2.0]).shape(), &[2]);
/// assert_eq!(array([[1.0, 2.0], [3.0, 4.0]]).shape(), &[2, 2]);
/// ```
pub fn array(values: impl Into<NdArray>) -> NdArray {
    values.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(data: Vec<f64>, shape: &[usize]) -> NdArray {
        NdArray::from_vec_on(BackendKind::Generic, data, shape).unwrap()
    }

    #[test]
    fn test_from_vec_length_mismatch() {
        let err = NdArray::from_vec(vec![1.0, 2.0], &[3]).unwrap_err();
        assert!(matches!(
            err,
            GradError::Shape(ShapeError::ElementCount {
                expected: 3,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_scalar_and_item() {
        let s = NdArray::scalar(2.5);
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.len(), 1);
        assert_eq!(s.item().unwrap(), 2.5);
        assert!(NdArray::zeros(&[2]).item().is_err());
    }

    #[test]
    fn test_one_element_item_any_rank() {
        assert_eq!(array([[4.0]]).item().unwrap(), 4.0);
    }

    #[test]
    fn test_device_mismatch() {
        let a = generic(vec![1.0, 2.0], &[2]);
        let b = a.to_backend(BackendKind::Faer);
        #[cfg(feature = "faer")]
        {
            let err = a.binary(BinaryOp::Add, &b.unwrap()).unwrap_err();
            assert!(matches!(err, GradError::DeviceMismatch { op: "add", .. }));
        }
        #[cfg(not(feature = "faer"))]
        assert!(matches!(b, Err(GradError::BackendSelection { .. })));
    }

    #[test]
    fn test_sum_axes_validation() {
        let x = generic(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        assert_eq!(x.sum_axes(&[1, 1], false).unwrap().data(), &[3.0, 7.0]);
        assert!(matches!(
            x.sum_axes(&[2], false),
            Err(GradError::Shape(ShapeError::InvalidAxis { axis: 2, ndim: 2 }))
        ));
        assert_eq!(x.sum().unwrap().item().unwrap(), 10.0);
    }

    #[test]
    fn test_reduce_and_select() {
        let x = generic(vec![3.0, -1.0, 2.0, 5.0], &[2, 2]);
        assert_eq!(x.reduce_axes(ReduceOp::Max, &[1], false).unwrap().data(), &[3.0, 5.0]);
        assert_eq!(x.reduce_axes(ReduceOp::Min, &[], false).unwrap(), x);

        let mask = x.binary(BinaryOp::Greater, &generic(vec![0.0], &[])).unwrap();
        let picked = mask.select(&x, &generic(vec![0.0], &[])).unwrap();
        assert_eq!(picked.data(), &[3.0, 0.0, 2.0, 5.0]);
        assert!(mask.select(&x, &generic(vec![0.0; 3], &[3])).is_err());
    }

    #[test]
    fn test_broadcast_to() {
        let x = generic(vec![1.0, 2.0], &[2]);
        let y = x.broadcast_to(&[3, 2]).unwrap();
        assert_eq!(y.data(), &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        // target must not shrink the source
        assert!(y.broadcast_to(&[2]).is_err());
    }

    #[test]
    fn test_permute_validation() {
        let x = generic(vec![0.0; 6], &[1, 2, 3]);
        assert_eq!(x.permute(&[2, 0, 1]).unwrap().shape(), &[3, 1, 2]);
        assert!(x.permute(&[0, 0, 1]).is_err());
        assert!(x.permute(&[0, 1]).is_err());
    }

    #[test]
    fn test_reshape_shares_buffer() {
        let x = generic(vec![1.0, 2.0, 3.0, 4.0], &[4]);
        let y = x.reshape(&[2, 2]).unwrap();
        assert_eq!(y.data().as_ptr(), x.data().as_ptr());
        assert!(x.reshape(&[3]).is_err());
    }

    #[test]
    fn test_display_nested() {
        let x = generic(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        assert_eq!(x.to_string(), "[[1, 2], [3, 4]]");
        assert_eq!(generic(vec![0.5], &[]).to_string(), "0.5");
    }

    #[test]
    fn test_try_from_rows() {
        let x = NdArray::try_from(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(x.shape(), &[2, 2]);
        assert!(NdArray::try_from(vec![vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn test_equality_ignores_backend() {
        let a = generic(vec![1.0], &[1]);
        let b = NdArray::from_vec(vec![1.0], &[1]).unwrap();
        assert_eq!(a, b);
    }
}
