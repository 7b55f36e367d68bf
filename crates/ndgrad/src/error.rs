//! Error types for ndgrad.

use crate::backend::BackendKind;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GradError>;

/// Errors that can occur while building, running, or differentiating a
/// computation.
#[derive(Debug, Error)]
pub enum GradError {
    /// The active backend has no implementation for an operation.
    #[error("operation `{op}` is not supported by the {backend} backend")]
    UnsupportedOperation { op: &'static str, backend: BackendKind },

    /// Operands of one operation live on different backends.
    #[error("operation `{op}` mixes arrays resident on {lhs} and {rhs}")]
    DeviceMismatch {
        op: &'static str,
        lhs: BackendKind,
        rhs: BackendKind,
    },

    /// Shape related failure.
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// PyTree structure related failure.
    #[error(transparent)]
    Structure(#[from] StructureError),

    /// No usable backend provider could be selected.
    #[error("no usable backend (tried {tried:?}): {reason}")]
    BackendSelection {
        tried: Vec<BackendKind>,
        reason: String,
    },

    /// Internal contract violation (e.g. a VJP rule with the wrong arity).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Shape errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    /// The function passed to `grad` did not return a single element.
    #[error("grad requires a scalar output, got shape {shape:?}")]
    NonScalarOutput { shape: Vec<usize> },

    /// Two shapes cannot be broadcast together.
    #[error("cannot broadcast shapes {lhs:?} and {rhs:?} in `{op}`")]
    Broadcast {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    /// Shapes were required to match exactly.
    #[error("shape mismatch in `{op}`: expected {expected:?}, got {actual:?}")]
    Mismatch {
        op: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Number of leaves does not match the structure descriptor.
    #[error("leaf count mismatch: structure expects {expected}, got {actual}")]
    LeafCount { expected: usize, actual: usize },

    /// Data length does not match the requested shape.
    #[error("element count mismatch: shape {shape:?} needs {expected} elements, got {actual}")]
    ElementCount {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// Axis out of range for an array of the given rank.
    #[error("axis {axis} out of range for rank {ndim}")]
    InvalidAxis { axis: usize, ndim: usize },

    /// Invalid permutation.
    #[error("invalid permutation {perm:?} for rank {ndim}")]
    InvalidPermutation { perm: Vec<usize>, ndim: usize },
}

/// PyTree structure errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    /// A custom node type was used without being registered.
    #[error("type `{type_name}` is not registered as a pytree node")]
    Unregistered { type_name: &'static str },

    /// A custom node flattens into itself.
    #[error("cyclic structure detected while flattening `{type_name}`")]
    Cycle { type_name: &'static str },

    /// Custom nodes nest deeper than the flattening limit, which happens
    /// when a registered type links to fresh handles of itself.
    #[error("custom nodes nested deeper than {limit} levels at `{type_name}` (cyclic structure?)")]
    DepthExceeded {
        type_name: &'static str,
        limit: usize,
    },

    /// A node of one kind was found where another was required.
    #[error("expected {expected}, found {found}")]
    Expected {
        expected: &'static str,
        found: &'static str,
    },

    /// Mapping lookup failed.
    #[error("missing key `{0}`")]
    MissingKey(String),

    /// Sequence lookup failed.
    #[error("index {index} out of range for {kind} of length {len}")]
    IndexOutOfRange {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    /// A registered unflatten function rejected its input.
    #[error("failed to rebuild `{type_name}`: {reason}")]
    UnflattenFailed {
        type_name: &'static str,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_culprit() {
        let err = GradError::UnsupportedOperation {
            op: "matmul",
            backend: BackendKind::Generic,
        };
        assert_eq!(
            err.to_string(),
            "operation `matmul` is not supported by the generic backend"
        );

        let err: GradError = ShapeError::NonScalarOutput { shape: vec![2, 3] }.into();
        assert!(err.to_string().contains("[2, 3]"));

        let err: GradError = StructureError::Unregistered { type_name: "Foo" }.into();
        assert!(err.to_string().contains("Foo"));
    }
}
