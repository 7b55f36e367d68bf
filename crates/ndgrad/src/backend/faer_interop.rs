//! faer-backed provider.
//!
//! Matrix products are delegated to faer's GEMM. faer is column-major while
//! `NdArray` is row-major, so a row-major `m x k` buffer is viewed as the
//! column-major `k x m` transpose and the product is computed as
//! `C^T = B^T A^T`, which needs no copies.
//!
//! Elementwise, reduction and select kernels share the host loops with
//! [`GenericBackend`](super::GenericBackend).

use faer::linalg::matmul::matmul;
use faer::{Accum, MatMut, MatRef, Par};

use super::generic::{host_binary, host_reduce, host_select, host_unary};
use super::kernels;
use super::{Backend, BackendKind, BinaryOp, ReduceOp, UnaryOp};
use crate::array::NdArray;
use crate::error::Result;

/// Accelerated provider built on faer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerBackend;

impl Backend for FaerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Faer
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
        if let [rows, cols] = *x.shape()
            && perm == [1, 0]
        {
            let data = transpose_2d(x.data(), rows, cols);
            return Ok(NdArray::from_parts(data, vec![cols, rows], self.kind()));
        }
        let (data, shape) = kernels::permute(x.data(), x.shape(), perm);
        Ok(NdArray::from_parts(data, shape, self.kind()))
    }

    fn matmul(&self, a: &NdArray, b: &NdArray) -> Result<NdArray> {
        let (m, k, n) = kernels::matmul_dims(a.shape(), b.shape(), |op| self.unsupported(op))?;
        let mut out = vec![0.0; m * n];

        if k == 0 {
            return Ok(NdArray::from_parts(out, vec![m, n], self.kind()));
        }

        {
            let at = row_major_as_transposed(a.data(), m, k);
            let bt = row_major_as_transposed(b.data(), k, n);
            let mut ct = MatMut::from_column_major_slice_mut(&mut out, n, m);

            // C^T = 1 * B^T A^T, overwriting C^T
            matmul(ct.as_mut(), Accum::Replace, bt, at, 1.0, Par::Seq);
        }

        Ok(NdArray::from_parts(out, vec![m, n], self.kind()))
    }
}

/// View a row-major `rows x cols` buffer as its column-major transpose.
fn row_major_as_transposed(data: &[f64], rows: usize, cols: usize) -> MatRef<'_, f64> {
    MatRef::from_column_major_slice(data, cols, rows)
}

fn transpose_2d(data: &[f64], rows: usize, cols: usize) -> Vec<f64> {
    // The column-major view of the transpose, read row by row, is the
    // row-major buffer of the transpose.
    let view = row_major_as_transposed(data, rows, cols);
    let mut out = Vec::with_capacity(rows * cols);
    for j in 0..cols {
        for i in 0..rows {
            out.push(view[(j, i)]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GenericBackend;
    use approx::assert_relative_eq;

    fn faer(data: Vec<f64>, shape: &[usize]) -> NdArray {
        NdArray::from_vec_on(BackendKind::Faer, data, shape).unwrap()
    }

    #[test]
    fn test_faer_matmul_matches_generic() {
        let a_data: Vec<f64> = (0..6).map(|x| x as f64).collect();
        let b_data: Vec<f64> = (0..12).map(|x| (x as f64) * 0.5).collect();

        let fa = faer(a_data.clone(), &[2, 3]);
        let fb = faer(b_data.clone(), &[3, 4]);
        let c = FaerBackend.matmul(&fa, &fb).unwrap();

        let ga = NdArray::from_vec_on(BackendKind::Generic, a_data, &[2, 3]).unwrap();
        let gb = NdArray::from_vec_on(BackendKind::Generic, b_data, &[3, 4]).unwrap();
        let expected = GenericBackend.matmul(&ga, &gb).unwrap();

        assert_eq!(c.shape(), &[2, 4]);
        assert_eq!(c.backend(), BackendKind::Faer);
        for (x, y) in c.data().iter().zip(expected.data()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_faer_transpose() {
        let x = faer(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let t = FaerBackend.permute(&x, &[1, 0]).unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_faer_matmul_inner_dim_mismatch() {
        let a = faer(vec![0.0; 6], &[2, 3]);
        let b = faer(vec![0.0; 4], &[2, 2]);
        assert!(FaerBackend.matmul(&a, &b).is_err());
    }

    #[test]
    fn test_zero_copy_view() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let view = row_major_as_transposed(&data, 2, 3);
        assert_eq!(view.nrows(), 3);
        assert_eq!(view.ncols(), 2);
        assert_eq!(view.as_ptr(), data.as_ptr());
        // row-major (0, 2) of the original is (2, 0) of the transposed view
        assert_relative_eq!(view[(2, 0)], 3.0);
    }
}
