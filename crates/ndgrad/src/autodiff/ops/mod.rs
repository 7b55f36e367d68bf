//! Differentiable operations on [`Tracked`](super::Tracked) values.
//!
//! Every operation computes its result on the operands' backend, then
//! records a node whose VJP rule is itself written with `Tracked`
//! operations, so rules can be differentiated again by an outer `grad`.
//!
//! | module | operations |
//! |--------|------------|
//! | `elementwise` | arithmetic, pow, maximum, minimum, clip, select, comparisons, unary math |
//! | `reduce` | sum, mean, var, std, max, min, prod, sum_to_shape |
//! | `reduce` (shape) | reshape, expand_dims, squeeze, broadcast_to |
//! | `linalg` | permute, transpose, matmul, dot |
//! | `arith` | std operator impls |

mod arith;
mod elementwise;
mod linalg;
mod reduce;
