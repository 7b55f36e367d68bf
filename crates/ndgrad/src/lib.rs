//! ndgrad - eager reverse-mode automatic differentiation over n-dimensional
//! arrays.
//!
//! Functions are written with ordinary calls on [`Tracked`] values and run
//! eagerly. [`grad`] turns such a function into one that returns its
//! gradient, for arguments that are arbitrary nested containers
//! ([`pytree`]). Gradients are traced too, so transforms compose.
//!
//! # Architecture
//!
//! ```text
//! Level 1: Transforms (autodiff module)
//!     → grad, value_and_grad, hvp, no_grad
//!
//! Level 2: Traced values and structure
//!     → Tracked (tape nodes + VJP rules), Tree / PyTree
//!
//! Level 3: Arrays (array module)
//!     → NdArray: shape-checked, backend-tagged storage
//!
//! Level 4: Numeric providers (backend module)
//!     → FaerBackend (GEMM via faer), GenericBackend (naive loops)
//! ```
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use ndgrad::{Tracked, grad};
//!
//! let f = |p: &BTreeMap<String, Tracked>| {
//!     let a = &p["a"];
//!     let b = &p["b"];
//!     a.try_mul(a)?.try_mul(b)?.try_add(&b.sin()?)
//! };
//!
//! let params = BTreeMap::from([
//!     ("a".to_string(), Tracked::scalar(3.0)),
//!     ("b".to_string(), Tracked::scalar(2.0)),
//! ]);
//! let g = grad(f)(&params).unwrap();
//! assert_eq!(g["a"].item().unwrap(), 12.0);
//! assert!((g["b"].item().unwrap() - (9.0 + 2.0f64.cos())).abs() < 1e-12);
//! ```

pub mod array;
pub mod autodiff;
pub mod backend;
pub mod error;
pub mod pytree;
pub mod random;
pub mod strides;

pub use array::{NdArray, array};
pub use autodiff::{CustomOp, Tracked, grad, hvp, is_recording, no_grad, value_and_grad};
pub use backend::{
    BackendConfig, BackendKind, available_backends, default_backend, init_backend,
    with_backend,
};
pub use error::{GradError, Result, ShapeError, StructureError};
pub use pytree::{PyTree, Tree, TreeDef};
