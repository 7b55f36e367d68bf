//! Generic (naive loop-based) backend implementation.

use super::kernels;
use super::{Backend, BackendKind, BinaryOp, ReduceOp, UnaryOp};
use crate::array::NdArray;
use crate::error::Result;
use crate::strides::broadcast_shapes;

/// Generic backend using naive loop-based implementations.
///
/// This backend is always available and serves as the fallback.
/// It's suitable for small arrays and debugging.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericBackend;

impl Backend for GenericBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Generic
    }

    fn unary(&self, op: UnaryOp, x: &NdArray) -> Result<NdArray> {
        Ok(host_unary(self.kind(), op, x))
    }

    fn binary(&self, op: BinaryOp, a: &NdArray, b: &NdArray) -> Result<NdArray> {
        host_binary(self.kind(), op, a, b)
    }

    fn reduce(
        &self,
        op: ReduceOp,
        x: &NdArray,
        axes: &[usize],
        keepdims: bool,
    ) -> Result<NdArray> {
        Ok(host_reduce(self.kind(), op, x, axes, keepdims))
    }

    fn select(&self, cond: &NdArray, on_true: &NdArray, on_false: &NdArray) -> Result<NdArray> {
        host_select(self.kind(), cond, on_true, on_false)
    }

    fn broadcast_to(&self, x: &NdArray, shape: &[usize]) -> Result<NdArray> {
        let data = kernels::broadcast(x.data(), x.shape(), shape);
        Ok(NdArray::from_parts(data, shape.to_vec(), self.kind()))
    }

    fn permute(&self, x: &NdArray, perm: &[usize]) -> Result<NdArray> {
        let (data, shape) = kernels::permute(x.data(), x.shape(), perm);
        Ok(NdArray::from_parts(data, shape, self.kind()))
    }

    fn matmul(&self, a: &NdArray, b: &NdArray) -> Result<NdArray> {
        let (m, k, n) = kernels::matmul_dims(a.shape(), b.shape(), |op| self.unsupported(op))?;
        let data = kernels::matmul_naive(a.data(), b.data(), m, k, n);
        Ok(NdArray::from_parts(data, vec![m, n], self.kind()))
    }
}

pub(super) fn host_unary(kind: BackendKind, op: UnaryOp, x: &NdArray) -> NdArray {
    let data = kernels::map(x.data(), |v| op.eval(v));
    NdArray::from_parts(data, x.shape().to_vec(), kind)
}

pub(super) fn host_binary(
    kind: BackendKind,
    op: BinaryOp,
    a: &NdArray,
    b: &NdArray,
) -> Result<NdArray> {
    let out_shape = broadcast_shapes(op.name(), a.shape(), b.shape())?;
    let data = kernels::zip_broadcast(
        a.data(),
        a.shape(),
        b.data(),
        b.shape(),
        &out_shape,
        |x, y| op.eval(x, y),
    );
    Ok(NdArray::from_parts(data, out_shape, kind))
}

pub(super) fn host_reduce(
    kind: BackendKind,
    op: ReduceOp,
    x: &NdArray,
    axes: &[usize],
    keepdims: bool,
) -> NdArray {
    let (data, shape) = kernels::reduce_axes(
        x.data(),
        x.shape(),
        axes,
        keepdims,
        op.identity(),
        |acc, v| op.combine(acc, v),
    );
    NdArray::from_parts(data, shape, kind)
}

pub(super) fn host_select(
    kind: BackendKind,
    cond: &NdArray,
    on_true: &NdArray,
    on_false: &NdArray,
) -> Result<NdArray> {
    let branches = broadcast_shapes("select", on_true.shape(), on_false.shape())?;
    let out_shape = broadcast_shapes("select", cond.shape(), &branches)?;
    let data = kernels::select_broadcast(
        (cond.data(), cond.shape()),
        (on_true.data(), on_true.shape()),
        (on_false.data(), on_false.shape()),
        &out_shape,
    );
    Ok(NdArray::from_parts(data, out_shape, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(data: Vec<f64>, shape: &[usize]) -> NdArray {
        NdArray::from_vec_on(BackendKind::Generic, data, shape).unwrap()
    }

    #[test]
    fn test_generic_binary_broadcast() {
        let a = generic(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = generic(vec![10.0], &[]);
        let c = GenericBackend.binary(BinaryOp::Mul, &a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.data(), &[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(c.backend(), BackendKind::Generic);
    }

    #[test]
    fn test_generic_broadcast_error() {
        let a = generic(vec![1.0, 2.0, 3.0], &[3]);
        let b = generic(vec![1.0, 2.0], &[2]);
        assert!(GenericBackend.binary(BinaryOp::Add, &a, &b).is_err());
    }

    #[test]
    fn test_generic_permute_transpose() {
        let src = generic(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let dest = GenericBackend.permute(&src, &[1, 0]).unwrap();

        for i in 0..2 {
            for j in 0..3 {
                assert_eq!(src.get(&[i, j]), dest.get(&[j, i]));
            }
        }
    }

    #[test]
    fn test_generic_matmul() {
        let a = generic(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = generic(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]);
        let c = GenericBackend.matmul(&a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.data(), &[4.0, 5.0, 10.0, 11.0]);
    }

    #[test]
    fn test_generic_reductions() {
        let x = generic(vec![1.0, -2.0, 3.0, 4.0, 0.5, 6.0], &[2, 3]);
        let max = GenericBackend.reduce(ReduceOp::Max, &x, &[1], false).unwrap();
        assert_eq!(max.data(), &[3.0, 6.0]);
        let min = GenericBackend.reduce(ReduceOp::Min, &x, &[0], true).unwrap();
        assert_eq!(min.shape(), &[1, 3]);
        assert_eq!(min.data(), &[1.0, -2.0, 3.0]);
        let prod = GenericBackend.reduce(ReduceOp::Prod, &x, &[0, 1], false).unwrap();
        assert_eq!(prod.item().unwrap(), -72.0);
    }

    #[test]
    fn test_generic_select() {
        let cond = generic(vec![1.0, 0.0, 1.0], &[3]);
        let a = generic(vec![1.0, 2.0, 3.0], &[3]);
        let b = generic(vec![-1.0], &[]);
        let out = GenericBackend.select(&cond, &a, &b).unwrap();
        assert_eq!(out.data(), &[1.0, -1.0, 3.0]);
    }

    #[test]
    fn test_generic_batched_matmul_unsupported() {
        let a = generic(vec![0.0; 8], &[2, 2, 2]);
        let err = GenericBackend.matmul(&a, &a).unwrap_err();
        assert!(err.to_string().contains("batched_matmul"));
    }
}
