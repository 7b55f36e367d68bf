//! Reverse pass over one tape frame.

use super::gradients::Gradients;
use super::graph::{NodeId, NodeKind, TapeId, with_tape};
use super::tensor::Tracked;
use crate::array::NdArray;
use crate::error::{GradError, Result, ShapeError};

/// Everything the walk needs from a node, copied out so the tape is not
/// borrowed while VJP rules run (they record on outer frames).
struct Step {
    op: &'static str,
    kind: NodeKind,
    value: NdArray,
}

/// Propagate the gradient of `output` back to `inputs` over the nodes of
/// `tape`.
///
/// Nodes are visited in reverse creation order, which is a reverse
/// topological order because a node can only refer to earlier nodes. Only
/// nodes created before the pass started are visited; nodes appended by
/// VJP rules belong to an outer frame. Contributions to nodes created
/// before `tape` was entered are dropped.
///
/// Returns one gradient per input, zeros when the input did not influence
/// the output.
pub(crate) fn backward(
    tape: TapeId,
    output: &Tracked,
    inputs: &[Tracked],
) -> Result<Vec<Tracked>> {
    let (start, end) = with_tape(|t| (t.frame_start(tape), t.len()));
    let start = start.ok_or_else(|| {
        GradError::InvalidOperation(format!("tape {tape:?} is not on the tape stack"))
    })?;
    let in_frame = |id: NodeId| id.index() >= start && with_tape(|t| t.is_live(id));

    let mut gradients = Gradients::new();
    match output.node_id() {
        Some(id) if in_frame(id) => gradients.accumulate(id, output.ones_like())?,
        _ => log::debug!("output of tape {tape:?} does not depend on its inputs"),
    }

    for index in (start..end).rev() {
        let id = with_tape(|t| t.node_id(index));
        let step = with_tape(|t| {
            t.get_node(id).map(|node| Step {
                op: node.op(),
                kind: node.kind().clone(),
                value: node.value().clone(),
            })
        });
        let Some(step) = step else { continue };

        match step.kind {
            NodeKind::Input { tape: owner, .. } if owner == tape => {}
            NodeKind::Input { parent, .. } => {
                let Some(grad) = gradients.remove(id) else { continue };
                if let Some(parent) = parent.filter(|&p| in_frame(p)) {
                    gradients.accumulate(parent, grad)?;
                }
            }
            NodeKind::Op { parents, vjp } => {
                let Some(grad) = gradients.remove(id) else { continue };
                log::trace!("backward {} #{}", step.op, index);

                let out = Tracked::from_node(step.value, id);
                let contributions = vjp(&out, &grad)?;
                if contributions.len() != parents.len() {
                    return Err(GradError::InvalidOperation(format!(
                        "VJP of `{}` returned {} gradients for {} operands",
                        step.op,
                        contributions.len(),
                        parents.len()
                    )));
                }

                for (parent, contribution) in parents.iter().zip(contributions) {
                    let (Some(parent), Some(contribution)) = (*parent, contribution) else {
                        continue;
                    };
                    if !in_frame(parent) {
                        continue;
                    }
                    check_shape(step.op, parent, &contribution)?;
                    gradients.accumulate(parent, contribution)?;
                }
            }
        }
    }

    Ok(inputs
        .iter()
        .map(|input| {
            input
                .node_id()
                .and_then(|id| gradients.remove(id))
                .unwrap_or_else(|| input.zeros_like())
        })
        .collect())
}

fn check_shape(op: &'static str, parent: NodeId, contribution: &Tracked) -> Result<()> {
    let expected = with_tape(|t| t.get_node(parent).map(|n| n.shape().to_vec()));
    match expected {
        Some(expected) if expected != contribution.shape() => Err(ShapeError::Mismatch {
            op,
            expected,
            actual: contribution.shape().to_vec(),
        }
        .into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    // Runs `f` inside a fresh frame and pops it afterwards.
    fn with_frame<R>(f: impl FnOnce(TapeId) -> R) -> R {
        let tape = with_tape(|t| t.enter());
        let result = f(tape);
        with_tape(|t| t.pop(tape));
        result
    }

    #[test]
    fn test_fan_out_accumulates() {
        let grads = with_frame(|tape| {
            let x = Tracked::scalar(3.0).attach_input(tape);
            let y = x.try_add(&x).unwrap();
            with_tape(|t| t.exit(tape)).unwrap();
            backward(tape, &y, &[x]).unwrap()
        });
        assert_eq!(grads[0].item().unwrap(), 2.0);
    }

    #[test]
    fn test_unused_input_gets_zeros() {
        let grads = with_frame(|tape| {
            let x = Tracked::scalar(3.0).attach_input(tape);
            let unused = Tracked::new(NdArray::ones(&[2])).attach_input(tape);
            let y = x.exp().unwrap();
            with_tape(|t| t.exit(tape)).unwrap();
            backward(tape, &y, &[x, unused]).unwrap()
        });
        assert_eq!(grads[1].data(), &[0.0, 0.0]);
    }

    #[test]
    fn test_wrong_arity_vjp_is_rejected() {
        let err = with_frame(|tape| {
            let x = Tracked::scalar(1.0).attach_input(tape);
            let y = Tracked::record(x.value().clone(), "bad", &[&x], |_, g| {
                Ok(smallvec![Some(g.clone()), Some(g.clone())])
            });
            with_tape(|t| t.exit(tape)).unwrap();
            backward(tape, &y, &[x]).unwrap_err()
        });
        assert!(matches!(err, GradError::InvalidOperation(_)));
    }

    #[test]
    fn test_wrong_shape_vjp_is_rejected() {
        let err = with_frame(|tape| {
            let x = Tracked::scalar(1.0).attach_input(tape);
            let y = Tracked::record(x.value().clone(), "bad", &[&x], |_, _| {
                Ok(smallvec![Some(Tracked::new(NdArray::ones(&[3])))])
            });
            with_tape(|t| t.exit(tape)).unwrap();
            backward(tape, &y, &[x]).unwrap_err()
        });
        assert!(matches!(
            err,
            GradError::Shape(ShapeError::Mismatch { op: "bad", .. })
        ));
    }
}
