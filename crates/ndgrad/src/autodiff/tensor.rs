//! Tracked - array with gradient tracking for automatic differentiation.

use std::fmt;
use std::rc::Rc;

use super::graph::{Cotangents, NodeId, Parents, TapeId, with_tape};
use crate::array::NdArray;
use crate::backend::BackendKind;
use crate::error::Result;

/// An array that participates in reverse-mode differentiation.
///
/// Outside of a [`grad`](crate::grad) call a `Tracked` is a transparent
/// wrapper around its [`NdArray`]. Inside one, operations on values that
/// carry a node are recorded on the innermost recording tape.
///
/// # Example
///
/// ```
/// use ndgrad::{Tracked, array};
///
/// let x = Tracked::new(array([1.0, 2.0]));
/// let y = &x * 3.0;
/// assert_eq!(y.value().data(), &[3.0, 6.0]);
/// assert!(!y.is_traced());
/// ```
#[derive(Clone)]
pub struct Tracked {
    value: NdArray,
    node: Option<NodeId>,
}

impl Tracked {
    /// Wrap an array as a constant.
    pub fn new(value: NdArray) -> Self {
        Self { value, node: None }
    }

    /// Rank-0 constant on the default backend.
    pub fn scalar(value: f64) -> Self {
        Self::new(NdArray::scalar(value))
    }

    pub(crate) fn from_node(value: NdArray, node: NodeId) -> Self {
        Self {
            value,
            node: Some(node),
        }
    }

    /// Compute-side constructor used by every differentiable operation.
    ///
    /// Records a node when a tape is recording and at least one operand is
    /// traced; otherwise the result is a constant.
    pub(crate) fn record<F>(
        value: NdArray,
        op: &'static str,
        operands: &[&Tracked],
        vjp: F,
    ) -> Self
    where
        F: Fn(&Tracked, &Tracked) -> Result<Cotangents> + 'static,
    {
        let parents: Parents = operands.iter().map(|t| t.node).collect();
        let node = with_tape(|tape| {
            tape.should_record(&parents)
                .then(|| tape.record_op(op, parents, &value, Rc::new(vjp)))
        });
        Self { value, node }
    }

    /// Wrap this value as an input of `tape`.
    pub(crate) fn attach_input(&self, tape: TapeId) -> Self {
        let node = with_tape(|t| t.record_input(tape, self.node, &self.value));
        Self::from_node(self.value.clone(), node)
    }

    /// Underlying array.
    pub fn value(&self) -> &NdArray {
        &self.value
    }

    /// Consume and return the underlying array.
    pub fn into_value(self) -> NdArray {
        self.value
    }

    /// Node id if the value was produced by a traced operation.
    pub fn node_id(&self) -> Option<NodeId> {
        self.node
    }

    /// Whether the value carries a node of the current tape arena.
    pub fn is_traced(&self) -> bool {
        self.node.is_some_and(|id| with_tape(|t| t.is_live(id)))
    }

    /// Constant copy sharing the same data.
    pub fn detach(&self) -> Self {
        Self::new(self.value.clone())
    }

    /// Get shape.
    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    /// Get number of dimensions.
    pub fn ndim(&self) -> usize {
        self.value.ndim()
    }

    /// Get total number of elements.
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// Check if the value has zero elements.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Get data slice.
    pub fn data(&self) -> &[f64] {
        self.value.data()
    }

    /// Provider the value lives on.
    pub fn backend(&self) -> BackendKind {
        self.value.backend()
    }

    /// The single element of a one-element value.
    pub fn item(&self) -> Result<f64> {
        self.value.item()
    }

    /// Constant zeros with this value's shape and backend.
    pub fn zeros_like(&self) -> Self {
        Self::new(self.value.zeros_like())
    }

    /// Constant ones with this value's shape and backend.
    pub fn ones_like(&self) -> Self {
        Self::new(self.value.ones_like())
    }

    /// Rank-0 constant on this value's backend.
    pub fn scalar_like(&self, value: f64) -> Self {
        Self::new(self.value.scalar_like(value))
    }
}

impl From<NdArray> for Tracked {
    fn from(value: NdArray) -> Self {
        Tracked::new(value)
    }
}

impl From<f64> for Tracked {
    fn from(value: f64) -> Self {
        Tracked::scalar(value)
    }
}

/// Values are compared; tracing state is not.
impl PartialEq for Tracked {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl fmt::Display for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.value, f)
    }
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("value", &self.value)
            .field("node", &self.node)
            .finish()
    }
}
