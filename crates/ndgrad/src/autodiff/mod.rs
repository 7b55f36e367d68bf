//! Eager reverse-mode automatic differentiation.
//!
//! Operations on [`Tracked`] values compute immediately and, while a
//! [`grad`] call is active on the current thread, append a node to that
//! thread's tape. When the differentiated function returns, the nodes of
//! its frame are walked in reverse to produce the gradient.
//!
//! # Architecture
//!
//! ```text
//! grad(f)(x) ──enter──►  TapeStack (thread_local)
//!      │                    │  frames: [outer, ..., inner]
//!      ▼                    ▼
//!  f(&Tracked) ──record──► Vec<Node>  (value + VJP rule per op)
//!      │                    │
//!      ▼                    ▼
//!  backward(frame) ──► Gradients ──unflatten──► same structure as x
//! ```
//!
//! VJP rules are written with `Tracked` operations. While an outer frame
//! is still recording, running a rule records new nodes on it, which is
//! how `grad(grad(f))` and [`hvp`] work. User primitives plug in through
//! [`CustomOp`] or [`Tracked::custom_op`] and follow the same rules.
//!
//! # Example
//!
//! ```
//! use ndgrad::{Tracked, array, grad};
//!
//! let loss = |w: &Tracked| w.try_mul(w)?.sum();
//! let dw = grad(loss)(&Tracked::new(array([1.0, -2.0]))).unwrap();
//! assert_eq!(dw.data(), &[2.0, -4.0]);
//! ```
//!
//! # Design Notes
//!
//! - One tape stack per thread (`Rc`, no locking)
//! - Nodes of an inner frame are adopted by the enclosing frame when the
//!   inner `grad` returns
//! - The arena is cleared when the outermost frame is popped; node ids
//!   from earlier computations become stale and are treated as constants

mod backward;
mod custom;
mod grad;
mod gradients;
mod graph;
mod hessian;
mod ops;
mod tensor;

pub use custom::CustomOp;
pub use grad::{grad, value_and_grad};
pub use gradients::Gradients;
pub use graph::{NodeId, TapeId, is_recording, no_grad, tape_len};
pub use hessian::hvp;
pub use tensor::Tracked;
