//! The `grad` transform.

use super::backward::backward;
use super::graph::{TapeId, with_tape};
use super::tensor::Tracked;
use crate::error::{Result, ShapeError};
use crate::pytree::{PyTree, flatten, unflatten};

/// Pops its frame on drop, so the tape is restored even when the
/// differentiated function fails or panics.
struct FrameGuard(TapeId);

impl FrameGuard {
    fn enter() -> Self {
        Self(with_tape(|t| t.enter()))
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        with_tape(|t| t.pop(self.0));
    }
}

/// Differentiate `f` with respect to its argument.
///
/// `f` must return a single-element array. The returned closure evaluates
/// the gradient at a point and yields it with the same structure as the
/// argument. Leaves that do not influence the output get zeros; frozen
/// arrays ([`Tree::Static`](crate::Tree::Static)) come back as `None`.
///
/// Gradients are themselves [`Tracked`], so `grad` composes:
///
/// ```
/// use ndgrad::{Tracked, grad};
///
/// let f = |x: &Tracked| x.try_mul(x)?.try_mul(x);
/// let df = grad(f);
/// let d2f = grad(move |x: &Tracked| df(x));
///
/// // d²/dx² x³ = 6x
/// let value = d2f(&Tracked::scalar(2.0)).unwrap();
/// assert_eq!(value.item().unwrap(), 12.0);
/// ```
///
/// Errors from `f` propagate unchanged. A non-scalar output yields
/// [`ShapeError::NonScalarOutput`].
pub fn grad<X, F>(f: F) -> impl Fn(&X) -> Result<X>
where
    X: PyTree,
    F: Fn(&X) -> Result<Tracked>,
{
    move |x: &X| eval(&f, x).map(|(_, g)| g)
}

/// Like [`grad`], but also returns the output of `f`.
///
/// ```
/// use ndgrad::{Tracked, value_and_grad};
///
/// let (value, dx) = value_and_grad(|x: &Tracked| x.exp())(&Tracked::scalar(0.0)).unwrap();
/// assert_eq!(value.item().unwrap(), 1.0);
/// assert_eq!(dx.item().unwrap(), 1.0);
/// ```
pub fn value_and_grad<X, F>(f: F) -> impl Fn(&X) -> Result<(Tracked, X)>
where
    X: PyTree,
    F: Fn(&X) -> Result<Tracked>,
{
    move |x: &X| eval(&f, x)
}

fn eval<X, F>(f: &F, x: &X) -> Result<(Tracked, X)>
where
    X: PyTree,
    F: Fn(&X) -> Result<Tracked>,
{
    let (leaves, def) = flatten(&x.to_tree()?)?;

    let guard = FrameGuard::enter();
    let tape = guard.0;
    let inputs: Vec<Tracked> = leaves.iter().map(|leaf| leaf.attach_input(tape)).collect();
    let traced = X::from_tree(unflatten(&def, inputs.clone())?)?;

    let out = f(&traced)?;
    with_tape(|t| t.exit(tape))?;
    out.value().synchronize()?;

    if out.len() != 1 {
        return Err(ShapeError::NonScalarOutput {
            shape: out.shape().to_vec(),
        }
        .into());
    }

    let grads = backward(tape, &out, &inputs)?;
    drop(guard);

    let grads = X::from_tree(unflatten(&def.without_static(), grads)?)?;
    Ok((out, grads))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::graph::{is_recording, no_grad, tape_len};
    use crate::{GradError, array};

    #[test]
    fn test_grad_of_square() {
        let df = grad(|x: &Tracked| x.try_mul(x));
        assert_eq!(df(&Tracked::scalar(2.0)).unwrap().item().unwrap(), 4.0);
        assert_eq!(tape_len(), 0);
        assert!(!is_recording());
    }

    #[test]
    fn test_non_scalar_output_is_rejected() {
        let df = grad(|x: &Tracked| x.exp());
        let err = df(&Tracked::new(array([1.0, 2.0]))).unwrap_err();
        assert!(matches!(
            err,
            GradError::Shape(ShapeError::NonScalarOutput { .. })
        ));
        assert_eq!(tape_len(), 0);
    }

    #[test]
    fn test_function_error_restores_tape() {
        let df = grad(|_: &Tracked| -> Result<Tracked> {
            Err(GradError::InvalidOperation("boom".into()))
        });
        assert!(df(&Tracked::scalar(1.0)).is_err());
        assert_eq!(tape_len(), 0);
        assert_eq!(with_tape(|t| t.depth()), 0);
    }

    #[test]
    fn test_constant_output_gives_zero_gradient() {
        let df = grad(|_: &Tracked| Ok(Tracked::scalar(7.0)));
        assert_eq!(df(&Tracked::scalar(1.0)).unwrap().item().unwrap(), 0.0);
    }

    #[test]
    fn test_value_and_grad_of_vector() {
        let x = Tracked::new(array([1.0, 2.0, 3.0]));
        let (value, dx) = value_and_grad(|x: &Tracked| x.try_mul(x)?.sum())(&x).unwrap();
        assert_eq!(value.item().unwrap(), 14.0);
        assert_eq!(dx.data(), &[2.0, 4.0, 6.0]);
        assert!(!dx.is_traced());
    }

    #[test]
    fn test_grad_inside_no_grad_records_its_own_frame() {
        let df = grad(|x: &Tracked| x.try_mul(x));
        let x = Tracked::scalar(3.0);
        let outside = df(&x).unwrap();
        let inside = no_grad(|| df(&x)).unwrap();
        assert_eq!(inside, outside);
        assert_eq!(inside.item().unwrap(), 6.0);
        assert!(!is_recording());
    }

    #[test]
    fn test_no_grad_inside_outer_grad_hides_inner_gradient() {
        // d/dx [ x * stop(d/dx x^2) ] = 2x
        let df = grad(|x: &Tracked| x.try_mul(x));
        let outer = grad(|x: &Tracked| {
            let slope = no_grad(|| df(x))?;
            assert!(!slope.is_traced());
            x.try_mul(&slope)
        });
        assert_eq!(outer(&Tracked::scalar(3.0)).unwrap().item().unwrap(), 6.0);
        assert_eq!(tape_len(), 0);
    }
}
