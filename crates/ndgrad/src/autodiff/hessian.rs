//! Hessian-vector products.
//!
//! Reverse-over-reverse: `H v = ∇_x <∇f(x), v>`. The inner gradient is
//! recorded on the outer tape because VJP rules are traced operations.

use super::grad::grad;
use super::tensor::Tracked;
use crate::error::{Result, ShapeError, StructureError};
use crate::pytree::{PyTree, flatten};

/// Product of the Hessian of `f` at `x` with the tangent `v`.
///
/// `v` must have the same structure and leaf shapes as `x`; the result
/// does too, with `None` in place of frozen arrays.
///
/// # Example
///
/// ```
/// use ndgrad::{Tracked, array, hvp};
///
/// // f(x) = sum(x^3), H = diag(6x)
/// let f = |x: &Tracked| x.powf(3.0)?.sum();
/// let x = Tracked::new(array([1.0, 2.0]));
/// let v = Tracked::new(array([1.0, 1.0]));
/// assert_eq!(hvp(f, &x, &v).unwrap().data(), &[6.0, 12.0]);
/// ```
pub fn hvp<X, F>(f: F, x: &X, v: &X) -> Result<X>
where
    X: PyTree,
    F: Fn(&X) -> Result<Tracked>,
{
    let (tangents, tangent_def) = flatten(&v.to_tree()?)?;
    let tangents: Vec<Tracked> = tangents.iter().map(Tracked::detach).collect();
    let tangent_def = tangent_def.without_static();

    let df = grad(f);
    let directional = move |x: &X| -> Result<Tracked> {
        let (grads, def) = flatten(&df(x)?.to_tree()?)?;
        if def != tangent_def {
            let (expected, actual) = (def.num_leaves(), tangent_def.num_leaves());
            if expected != actual {
                return Err(ShapeError::LeafCount { expected, actual }.into());
            }
            return Err(StructureError::Expected {
                expected: "tangent with the structure of the primal",
                found: "a differently nested tangent",
            }
            .into());
        }

        let mut total: Option<Tracked> = None;
        for (g, t) in grads.iter().zip(&tangents) {
            if g.shape() != t.shape() {
                return Err(ShapeError::Mismatch {
                    op: "hvp",
                    expected: g.shape().to_vec(),
                    actual: t.shape().to_vec(),
                }
                .into());
            }
            let term = g.dot(t)?;
            total = Some(match total {
                Some(acc) => acc.try_add(&term)?,
                None => term,
            });
        }
        Ok(total.unwrap_or_else(|| Tracked::scalar(0.0)))
    };

    grad(directional)(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GradError, array};
    use approx::assert_relative_eq;

    #[test]
    fn test_hvp_quadratic_form() {
        // f(x) = 0.5 x^T A x with symmetric A, so H = A
        let a = Tracked::new(array([[2.0, 1.0], [1.0, 3.0]]));
        let f = move |x: &Tracked| x.matmul(&a)?.dot(x)?.try_mul(&Tracked::scalar(0.5));
        let x = Tracked::new(array([0.3, -0.7]));
        let v = Tracked::new(array([1.0, 2.0]));

        let hv = hvp(f, &x, &v).unwrap();
        assert_relative_eq!(hv.data()[0], 4.0, epsilon = 1e-12);
        assert_relative_eq!(hv.data()[1], 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hvp_over_tuple() {
        // f(a, b) = a^2 b, H = [[2b, 2a], [2a, 0]]
        let f = |(a, b): &(Tracked, Tracked)| a.try_mul(a)?.try_mul(b);
        let x = (Tracked::scalar(3.0), Tracked::scalar(2.0));
        let v = (Tracked::scalar(1.0), Tracked::scalar(0.0));

        let (ha, hb) = hvp(f, &x, &v).unwrap();
        assert_relative_eq!(ha.item().unwrap(), 4.0);
        assert_relative_eq!(hb.item().unwrap(), 6.0);
    }

    #[test]
    fn test_hvp_rejects_mismatched_tangent() {
        let f = |x: &Tracked| x.try_mul(x)?.sum();
        let x = Tracked::new(array([1.0, 2.0]));
        let v = Tracked::new(array([1.0, 2.0, 3.0]));
        let err = hvp(f, &x, &v).unwrap_err();
        assert!(matches!(
            err,
            GradError::Shape(ShapeError::Mismatch { op: "hvp", .. })
        ));
    }

    #[test]
    fn test_hvp_reports_nesting_difference() {
        use crate::pytree::{Tree, tree_leaves};

        let f = |t: &Tree| -> Result<Tracked> {
            let mut total = Tracked::scalar(0.0);
            for leaf in tree_leaves(t)? {
                total = total.try_add(&leaf.try_mul(&leaf)?)?;
            }
            Ok(total)
        };
        let leaf = |v: f64| Tree::Leaf(Tracked::scalar(v));
        let x = Tree::Tuple(vec![leaf(1.0), Tree::List(vec![leaf(2.0)])]);
        let v = Tree::Tuple(vec![Tree::List(vec![leaf(1.0)]), leaf(0.0)]);

        let err = hvp(f, &x, &v).unwrap_err();
        assert!(matches!(
            err,
            GradError::Structure(StructureError::Expected { .. })
        ));

        let short = Tree::Tuple(vec![leaf(1.0), Tree::List(vec![])]);
        let err = hvp(f, &x, &short).unwrap_err();
        assert!(matches!(
            err,
            GradError::Shape(ShapeError::LeafCount {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_hvp_skips_frozen_arrays() {
        use crate::NdArray;

        // f(x, c) = c * x^3 with c frozen
        let f = |(x, c): &(Tracked, Option<NdArray>)| {
            let c = Tracked::new(c.clone().unwrap_or_else(|| NdArray::scalar(0.0)));
            x.powf(3.0)?.try_mul(&c)
        };
        let x = (Tracked::scalar(2.0), Some(NdArray::scalar(0.5)));
        let v = (Tracked::scalar(1.0), Some(NdArray::scalar(0.5)));

        let (hx, hc) = hvp(f, &x, &v).unwrap();
        assert_relative_eq!(hx.item().unwrap(), 6.0);
        assert!(hc.is_none());
    }
}
