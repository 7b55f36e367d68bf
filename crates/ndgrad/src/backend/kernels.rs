//! Loop kernels shared by the host providers.
//!
//! All kernels read and write row-major buffers; validation of shapes,
//! axes and permutations happens in `NdArray` before dispatch.

use crate::error::{GradError, Result, ShapeError};
use crate::strides::{
    broadcast_strides, cartesian_to_linear, compute_strides, linear_to_cartesian, shape_len,
};

/// Apply `f` to every element.
pub fn map(x: &[f64], f: impl Fn(f64) -> f64) -> Vec<f64> {
    x.iter().map(|&v| f(v)).collect()
}

/// Apply `f` elementwise over `a` and `b` broadcast to `out_shape`.
pub fn zip_broadcast(
    a: &[f64],
    a_shape: &[usize],
    b: &[f64],
    b_shape: &[usize],
    out_shape: &[usize],
    f: impl Fn(f64, f64) -> f64,
) -> Vec<f64> {
    if a_shape == b_shape {
        return a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect();
    }

    let a_strides = broadcast_strides(a_shape, out_shape);
    let b_strides = broadcast_strides(b_shape, out_shape);

    (0..shape_len(out_shape))
        .map(|linear| {
            let idx = linear_to_cartesian(linear, out_shape);
            let x = a[cartesian_to_linear(&idx, &a_strides)];
            let y = b[cartesian_to_linear(&idx, &b_strides)];
            f(x, y)
        })
        .collect()
}

/// Pick from `a` where `cond` is nonzero, else from `b`, all three
/// broadcast to `out_shape`.
pub fn select_broadcast(
    cond: (&[f64], &[usize]),
    a: (&[f64], &[usize]),
    b: (&[f64], &[usize]),
    out_shape: &[usize],
) -> Vec<f64> {
    let c_strides = broadcast_strides(cond.1, out_shape);
    let a_strides = broadcast_strides(a.1, out_shape);
    let b_strides = broadcast_strides(b.1, out_shape);

    (0..shape_len(out_shape))
        .map(|linear| {
            let idx = linear_to_cartesian(linear, out_shape);
            if cond.0[cartesian_to_linear(&idx, &c_strides)] != 0.0 {
                a.0[cartesian_to_linear(&idx, &a_strides)]
            } else {
                b.0[cartesian_to_linear(&idx, &b_strides)]
            }
        })
        .collect()
}

/// Output shape of a reduction over `axes`.
pub fn reduced_shape(shape: &[usize], axes: &[usize], keepdims: bool) -> Vec<usize> {
    shape
        .iter()
        .enumerate()
        .filter_map(|(i, &d)| match (axes.contains(&i), keepdims) {
            (false, _) => Some(d),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect()
}

/// Fold `x` over `axes`, starting every output element at `init`.
/// Returns the data and the output shape.
pub fn reduce_axes(
    x: &[f64],
    shape: &[usize],
    axes: &[usize],
    keepdims: bool,
    init: f64,
    combine: impl Fn(f64, f64) -> f64,
) -> (Vec<f64>, Vec<usize>) {
    let kept = reduced_shape(shape, axes, true);
    let kept_strides = compute_strides(&kept);
    let mut out = vec![init; shape_len(&kept)];

    for (linear, &v) in x.iter().enumerate() {
        let mut idx = linear_to_cartesian(linear, shape);
        for &axis in axes {
            idx[axis] = 0;
        }
        let slot = &mut out[cartesian_to_linear(&idx, &kept_strides)];
        *slot = combine(*slot, v);
    }

    (out, reduced_shape(shape, axes, keepdims))
}

/// Materialise a broadcast of `x` to `out_shape`.
pub fn broadcast(x: &[f64], shape: &[usize], out_shape: &[usize]) -> Vec<f64> {
    let strides = broadcast_strides(shape, out_shape);
    (0..shape_len(out_shape))
        .map(|linear| {
            let idx = linear_to_cartesian(linear, out_shape);
            x[cartesian_to_linear(&idx, &strides)]
        })
        .collect()
}

/// Permute axes: output axis `i` is input axis `perm[i]`.
pub fn permute(x: &[f64], shape: &[usize], perm: &[usize]) -> (Vec<f64>, Vec<usize>) {
    let new_shape: Vec<usize> = perm.iter().map(|&p| shape[p]).collect();
    let new_strides = compute_strides(&new_shape);
    let mut out = vec![0.0; x.len()];

    for (linear_old, &v) in x.iter().enumerate() {
        let old_idx = linear_to_cartesian(linear_old, shape);
        let new_idx: Vec<usize> = perm.iter().map(|&p| old_idx[p]).collect();
        out[cartesian_to_linear(&new_idx, &new_strides)] = v;
    }

    (out, new_shape)
}

/// Validate operands of a rank-2 matrix product; returns `(m, k, n)`.
///
/// Rank > 2 operands are reported through `unsupported`.
pub fn matmul_dims(
    a_shape: &[usize],
    b_shape: &[usize],
    unsupported: impl FnOnce(&'static str) -> GradError,
) -> Result<(usize, usize, usize)> {
    if a_shape.len() > 2 || b_shape.len() > 2 {
        return Err(unsupported("batched_matmul"));
    }
    if a_shape.len() != 2 || b_shape.len() != 2 {
        return Err(GradError::InvalidOperation(format!(
            "matmul kernel expects rank-2 operands, got {a_shape:?} and {b_shape:?}"
        )));
    }
    if a_shape[1] != b_shape[0] {
        return Err(ShapeError::Mismatch {
            op: "matmul",
            expected: vec![a_shape[1], b_shape[1]],
            actual: b_shape.to_vec(),
        }
        .into());
    }
    Ok((a_shape[0], a_shape[1], b_shape[1]))
}

/// Naive `(m x k) @ (k x n)` on row-major buffers.
pub fn matmul_naive(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    let mut out = vec![0.0; m * n];
    for i in 0..m {
        for p in 0..k {
            let aip = a[i * k + p];
            for j in 0..n {
                out[i * n + j] += aip * b[p * n + j];
            }
        }
    }
    out
}
