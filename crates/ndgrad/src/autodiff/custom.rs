//! User-defined differentiable primitives.
//!
//! A primitive pairs a forward computation on plain arrays with a VJP rule.
//! The rule is written with [`Tracked`] operations, so derivatives of any
//! order flow through it the same way they flow through built-in
//! operations.

use super::tensor::Tracked;
use crate::array::NdArray;
use crate::error::{GradError, Result};

/// A differentiable operation defined outside the crate.
///
/// # Example
///
/// ```
/// use ndgrad::{CustomOp, NdArray, Result, Tracked, grad};
/// use ndgrad::backend::BinaryOp;
///
/// struct Cube;
///
/// impl CustomOp for Cube {
///     fn name(&self) -> &'static str {
///         "cube"
///     }
///
///     fn forward(&self, inputs: &[&NdArray]) -> Result<NdArray> {
///         let x = inputs[0];
///         x.binary(BinaryOp::Mul, x)?.binary(BinaryOp::Mul, x)
///     }
///
///     fn backward(
///         &self,
///         inputs: &[Tracked],
///         _out: &Tracked,
///         g: &Tracked,
///     ) -> Result<Vec<Option<Tracked>>> {
///         let x = &inputs[0];
///         let slope = x.try_mul(x)?.try_mul(&x.scalar_like(3.0))?;
///         Ok(vec![Some(g.try_mul(&slope)?)])
///     }
/// }
///
/// let df = grad(|x: &Tracked| Cube.apply(&[x]));
/// assert_eq!(df(&Tracked::scalar(2.0)).unwrap().item().unwrap(), 12.0);
/// ```
pub trait CustomOp: 'static {
    /// Name recorded on the tape.
    fn name(&self) -> &'static str;

    /// Compute the output from the operands' values.
    fn forward(&self, inputs: &[&NdArray]) -> Result<NdArray>;

    /// Contribution to each operand, in operand order, given the output and
    /// the upstream gradient `g`. `None` means no contribution.
    fn backward(
        &self,
        inputs: &[Tracked],
        out: &Tracked,
        g: &Tracked,
    ) -> Result<Vec<Option<Tracked>>>;

    /// Run the operation on `inputs`, recording it when any input is
    /// traced.
    fn apply(self, inputs: &[&Tracked]) -> Result<Tracked>
    where
        Self: Sized,
    {
        let values: Vec<&NdArray> = inputs.iter().map(|t| t.value()).collect();
        let value = self.forward(&values)?;
        let saved: Vec<Tracked> = inputs.iter().map(|&t| t.clone()).collect();
        let name = self.name();
        Tracked::custom_op(value, name, inputs, move |out, g| {
            self.backward(&saved, out, g)
        })
    }
}

impl Tracked {
    /// Record `value` as the result of a user-defined operation on
    /// `operands`.
    ///
    /// `vjp(out, g)` returns one entry per operand, each with that operand's
    /// shape. Contributions of the wrong count or shape fail the reverse
    /// pass with an error.
    ///
    /// # Errors
    ///
    /// Returns [`GradError::DeviceMismatch`] if an operand lives on another
    /// backend than `value`.
    pub fn custom_op<F>(
        value: NdArray,
        name: &'static str,
        operands: &[&Tracked],
        vjp: F,
    ) -> Result<Tracked>
    where
        F: Fn(&Tracked, &Tracked) -> Result<Vec<Option<Tracked>>> + 'static,
    {
        if let Some(other) = operands.iter().find(|t| t.backend() != value.backend()) {
            return Err(GradError::DeviceMismatch {
                op: name,
                lhs: value.backend(),
                rhs: other.backend(),
            });
        }
        Ok(Tracked::record(value, name, operands, move |out, g| {
            Ok(vjp(out, g)?.into_iter().collect())
        }))
    }
}
