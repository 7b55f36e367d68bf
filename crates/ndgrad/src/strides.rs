//! Stride and broadcasting utilities.
//!
//! Arrays are stored in row-major (C) order, so the last axis is contiguous.
//! Broadcasting follows the numpy rules: shapes are aligned from the right
//! and an axis of extent 1 stretches to match the other operand.

use crate::error::ShapeError;

/// Compute row-major strides from shape.
///
/// For shape [d0, d1, d2], returns strides [d1*d2, d2, 1].
///
/// # Examples
///
/// ```
/// use ndgrad::strides::compute_strides;
///
/// assert_eq!(compute_strides(&[3, 4, 5]), vec![20, 5, 1]);
/// assert_eq!(compute_strides(&[2, 3]), vec![3, 1]);
/// assert_eq!(compute_strides(&[5]), vec![1]);
/// assert_eq!(compute_strides(&[]), Vec::<usize>::new());
/// ```
pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut stride = 1;

    for (s, &dim) in strides.iter_mut().zip(shape.iter()).rev() {
        *s = stride;
        stride *= dim;
    }

    strides
}

/// Number of elements described by a shape. Rank-0 shapes hold one element.
#[inline]
pub fn shape_len(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Convert cartesian indices to a linear index.
#[inline]
pub fn cartesian_to_linear(indices: &[usize], strides: &[usize]) -> usize {
    indices
        .iter()
        .zip(strides.iter())
        .map(|(&idx, &stride)| idx * stride)
        .sum()
}

/// Convert a linear index to cartesian indices (row-major).
pub fn linear_to_cartesian(mut linear: usize, shape: &[usize]) -> Vec<usize> {
    let mut indices = vec![0; shape.len()];

    for (idx, &dim) in indices.iter_mut().zip(shape.iter()).rev() {
        *idx = linear % dim;
        linear /= dim;
    }

    indices
}

/// Compute the broadcast shape of two operands.
///
/// # Errors
///
/// Returns [`ShapeError::Broadcast`] when an axis pair is neither equal nor 1.
pub fn broadcast_shapes(
    op: &'static str,
    lhs: &[usize],
    rhs: &[usize],
) -> Result<Vec<usize>, ShapeError> {
    let ndim = lhs.len().max(rhs.len());
    let mut out = vec![0; ndim];

    for (i, slot) in out.iter_mut().enumerate() {
        let l = axis_from_right(lhs, ndim, i);
        let r = axis_from_right(rhs, ndim, i);
        *slot = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(ShapeError::Broadcast {
                    op,
                    lhs: lhs.to_vec(),
                    rhs: rhs.to_vec(),
                });
            }
        };
    }

    Ok(out)
}

fn axis_from_right(shape: &[usize], ndim: usize, i: usize) -> usize {
    let offset = ndim - shape.len();
    if i < offset { 1 } else { shape[i - offset] }
}

/// Strides of `src` viewed with shape `out`; broadcast axes get stride 0.
///
/// `out` must be a valid broadcast target of `src`.
pub fn broadcast_strides(src: &[usize], out: &[usize]) -> Vec<usize> {
    let src_strides = compute_strides(src);
    let offset = out.len() - src.len();

    (0..out.len())
        .map(|i| {
            if i < offset || src[i - offset] == 1 {
                0
            } else {
                src_strides[i - offset]
            }
        })
        .collect()
}

/// Axes of `target` (aligned to `grad`'s rank) that were stretched by
/// broadcasting `target` up to `grad`.
///
/// Used to reduce a broadcast gradient back to the shape of its operand.
pub fn reduced_axes(grad: &[usize], target: &[usize]) -> Vec<usize> {
    let offset = grad.len().saturating_sub(target.len());
    (0..grad.len())
        .filter(|&i| i < offset || (target[i - offset] == 1 && grad[i] != 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_strides_3d() {
        assert_eq!(compute_strides(&[3, 4, 5]), vec![20, 5, 1]);
    }

    #[test]
    fn test_compute_strides_empty() {
        assert!(compute_strides(&[]).is_empty());
        assert_eq!(shape_len(&[]), 1);
    }

    #[test]
    fn test_cartesian_to_linear() {
        let strides = compute_strides(&[3, 4, 5]);
        assert_eq!(cartesian_to_linear(&[0, 0, 0], &strides), 0);
        assert_eq!(cartesian_to_linear(&[0, 0, 1], &strides), 1);
        assert_eq!(cartesian_to_linear(&[0, 1, 0], &strides), 5);
        assert_eq!(cartesian_to_linear(&[1, 0, 0], &strides), 20);
    }

    #[test]
    fn test_roundtrip() {
        let shape = [3, 4, 5];
        let strides = compute_strides(&shape);

        for linear in 0..shape_len(&shape) {
            let cartesian = linear_to_cartesian(linear, &shape);
            assert_eq!(cartesian_to_linear(&cartesian, &strides), linear);
        }
    }

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(broadcast_shapes("add", &[2, 3], &[3]).unwrap(), vec![2, 3]);
        assert_eq!(broadcast_shapes("add", &[2, 1], &[1, 4]).unwrap(), vec![2, 4]);
        assert_eq!(broadcast_shapes("add", &[], &[5]).unwrap(), vec![5]);
        assert!(broadcast_shapes("add", &[2, 3], &[4]).is_err());
    }

    #[test]
    fn test_broadcast_strides() {
        assert_eq!(broadcast_strides(&[3], &[2, 3]), vec![0, 1]);
        assert_eq!(broadcast_strides(&[2, 1], &[2, 4]), vec![1, 0]);
        assert_eq!(broadcast_strides(&[], &[2, 2]), vec![0, 0]);
    }

    #[test]
    fn test_reduced_axes() {
        assert_eq!(reduced_axes(&[2, 3], &[3]), vec![0]);
        assert_eq!(reduced_axes(&[2, 4], &[2, 1]), vec![1]);
        assert_eq!(reduced_axes(&[2, 3], &[2, 3]), Vec::<usize>::new());
        assert_eq!(reduced_axes(&[4], &[]), vec![0]);
    }
}
