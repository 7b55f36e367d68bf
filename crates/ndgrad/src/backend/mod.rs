//! Backend abstraction for array operations.
//!
//! Every numeric kernel the tracer needs is routed through the [`Backend`]
//! trait. Providers are checked once per process in a fixed preference order
//! and the first available one becomes the default for array construction.
//!
//! # Backends
//!
//! - `FaerBackend`: SIMD-accelerated provider; matrix products run on faer's
//!   GEMM (cargo feature `faer`, enabled by default)
//! - `GenericBackend`: naive loop-based implementation (always available)
//!
//! # Selection
//!
//! ```text
//! BackendConfig { preference: [Faer, Generic] }
//!        │ check in order (is_available)
//!        ▼
//! OnceLock<BackendKind>  ◄── with_backend(kind, ..) thread-local override
//!        │
//!        ▼
//! NdArray::zeros / from_vec / array(..)
//! ```
//!
//! An array remembers which provider it lives on. Operations never move data
//! between providers on their own: mixing residencies is a
//! [`GradError::DeviceMismatch`].

mod config;
#[cfg(feature = "faer")]
mod faer_interop;
mod generic;
pub(crate) mod kernels;

pub use config::{BACKEND_ENV_VAR, BackendConfig};
#[cfg(feature = "faer")]
pub use faer_interop::FaerBackend;
pub use generic::GenericBackend;

use crate::array::NdArray;
use crate::error::{GradError, Result};
use std::cell::Cell;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Identity of a backend provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    /// faer-backed provider (accelerated kernels).
    Faer,
    /// Naive loop-based provider.
    Generic,
}

impl BackendKind {
    /// All known providers in default preference order.
    pub const ALL: [BackendKind; 2] = [BackendKind::Faer, BackendKind::Generic];

    /// Lowercase name, as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Faer => "faer",
            BackendKind::Generic => "generic",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = GradError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "faer" | "accelerated" => Ok(BackendKind::Faer),
            "generic" | "cpu" | "naive" => Ok(BackendKind::Generic),
            other => Err(GradError::BackendSelection {
                tried: Vec::new(),
                reason: format!("unknown backend name `{other}`"),
            }),
        }
    }
}

/// Elementwise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tanh,
    Abs,
    Sign,
}

impl UnaryOp {
    /// Operation name used in errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Abs => "abs",
            UnaryOp::Sign => "sign",
        }
    }

    /// Scalar reference semantics of the operation.
    #[inline]
    pub fn eval(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Abs => x.abs(),
            // f64::signum maps 0.0 to 1.0
            UnaryOp::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Elementwise binary operations with numpy broadcasting.
///
/// Comparisons produce 0/1 masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Maximum,
    Minimum,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Equal,
}

impl BinaryOp {
    /// Operation name used in errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Pow => "pow",
            BinaryOp::Maximum => "maximum",
            BinaryOp::Minimum => "minimum",
            BinaryOp::Greater => "greater",
            BinaryOp::GreaterEqual => "greater_equal",
            BinaryOp::Less => "less",
            BinaryOp::LessEqual => "less_equal",
            BinaryOp::Equal => "equal",
        }
    }

    /// Scalar reference semantics of the operation.
    #[inline]
    pub fn eval(self, a: f64, b: f64) -> f64 {
        let mask = |c: bool| if c { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Maximum => a.max(b),
            BinaryOp::Minimum => a.min(b),
            BinaryOp::Greater => mask(a > b),
            BinaryOp::GreaterEqual => mask(a >= b),
            BinaryOp::Less => mask(a < b),
            BinaryOp::LessEqual => mask(a <= b),
            BinaryOp::Equal => mask(a == b),
        }
    }
}

/// Axis reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Prod,
    Max,
    Min,
}

impl ReduceOp {
    /// Operation name used in errors and logs.
    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Prod => "prod",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
        }
    }

    /// Result of reducing zero elements.
    pub fn identity(self) -> f64 {
        match self {
            ReduceOp::Sum => 0.0,
            ReduceOp::Prod => 1.0,
            ReduceOp::Max => f64::NEG_INFINITY,
            ReduceOp::Min => f64::INFINITY,
        }
    }

    /// Fold one element into an accumulator.
    #[inline]
    pub fn combine(self, acc: f64, x: f64) -> f64 {
        match self {
            ReduceOp::Sum => acc + x,
            ReduceOp::Prod => acc * x,
            ReduceOp::Max => acc.max(x),
            ReduceOp::Min => acc.min(x),
        }
    }
}

/// Numeric array provider.
///
/// Default method bodies report [`GradError::UnsupportedOperation`], so a
/// provider implements only the kernels it actually supports. Callers are
/// guaranteed that every operand already lives on this provider.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Identity of this provider.
    fn kind(&self) -> BackendKind;

    /// Probe whether the provider can run on this machine.
    fn is_available(&self) -> bool {
        true
    }

    /// Block until all queued work has completed.
    ///
    /// Host providers execute eagerly, so the default is a no-op.
    fn synchronize(&self) {}

    /// Elementwise unary operation.
    fn unary(&self, op: UnaryOp, _x: &NdArray) -> Result<NdArray> {
        Err(self.unsupported(op.name()))
    }

    /// Elementwise binary operation with broadcasting.
    fn binary(&self, op: BinaryOp, _a: &NdArray, _b: &NdArray) -> Result<NdArray> {
        Err(self.unsupported(op.name()))
    }

    /// Reduce over `axes` (sorted, deduplicated, in range).
    fn reduce(
        &self,
        op: ReduceOp,
        _x: &NdArray,
        _axes: &[usize],
        _keepdims: bool,
    ) -> Result<NdArray> {
        Err(self.unsupported(op.name()))
    }

    /// Pick `on_true` where `cond` is nonzero and `on_false` elsewhere.
    /// The three shapes broadcast together.
    fn select(
        &self,
        _cond: &NdArray,
        _on_true: &NdArray,
        _on_false: &NdArray,
    ) -> Result<NdArray> {
        Err(self.unsupported("select"))
    }

    /// Materialise a broadcast of `x` to `shape` (a valid broadcast target).
    fn broadcast_to(&self, _x: &NdArray, _shape: &[usize]) -> Result<NdArray> {
        Err(self.unsupported("broadcast_to"))
    }

    /// Permute axes; `perm` is a valid permutation of `0..x.ndim()`.
    fn permute(&self, _x: &NdArray, _perm: &[usize]) -> Result<NdArray> {
        Err(self.unsupported("permute"))
    }

    /// Matrix product of two rank-2 arrays.
    fn matmul(&self, _a: &NdArray, _b: &NdArray) -> Result<NdArray> {
        Err(self.unsupported("matmul"))
    }

    /// Build the error for an operation this provider lacks.
    fn unsupported(&self, op: &'static str) -> GradError {
        GradError::UnsupportedOperation {
            op,
            backend: self.kind(),
        }
    }
}

static GENERIC: GenericBackend = GenericBackend;
#[cfg(feature = "faer")]
static FAER: FaerBackend = FaerBackend;

/// Look up the provider for `kind`.
///
/// # Errors
///
/// Returns [`GradError::BackendSelection`] if the provider was not compiled
/// in or its availability check fails.
pub fn provider(kind: BackendKind) -> Result<&'static dyn Backend> {
    let backend: Option<&'static dyn Backend> = match kind {
        BackendKind::Generic => Some(&GENERIC),
        #[cfg(feature = "faer")]
        BackendKind::Faer => Some(&FAER),
        #[cfg(not(feature = "faer"))]
        BackendKind::Faer => None,
    };

    match backend {
        Some(b) if b.is_available() => Ok(b),
        Some(_) => Err(GradError::BackendSelection {
            tried: vec![kind],
            reason: format!("{kind} backend failed its availability check"),
        }),
        None => Err(GradError::BackendSelection {
            tried: vec![kind],
            reason: format!("{kind} backend was not compiled in"),
        }),
    }
}

/// Probe providers in `config`'s preference order without binding anything.
///
/// # Errors
///
/// Returns [`GradError::BackendSelection`] if no listed provider is usable.
pub fn select(config: &BackendConfig) -> Result<BackendKind> {
    for &kind in config.preference() {
        match provider(kind) {
            Ok(_) => return Ok(kind),
            Err(err) => log::debug!("skipping backend {kind}: {err}"),
        }
    }

    Err(GradError::BackendSelection {
        tried: config.preference().to_vec(),
        reason: "no provider in the preference list is available".to_string(),
    })
}

static SELECTED: OnceLock<BackendKind> = OnceLock::new();

thread_local! {
    static OVERRIDE: Cell<Option<BackendKind>> = const { Cell::new(None) };
}

/// Select a provider with `config` and bind it as the process default.
///
/// Selection happens at most once per process; later calls return the
/// provider that was bound first.
///
/// # Errors
///
/// Returns [`GradError::BackendSelection`] if no provider is usable.
pub fn init_backend(config: &BackendConfig) -> Result<BackendKind> {
    if let Some(&kind) = SELECTED.get() {
        return Ok(kind);
    }
    let chosen = select(config)?;
    let bound = *SELECTED.get_or_init(|| chosen);
    log::debug!("selected {bound} backend (preference {:?})", config.preference());
    Ok(bound)
}

/// The provider new arrays are constructed on.
///
/// Honours a [`with_backend`] override on this thread; otherwise selects
/// lazily from [`BackendConfig::from_env`] on first use.
pub fn default_backend() -> BackendKind {
    if let Some(kind) = OVERRIDE.with(Cell::get) {
        return kind;
    }
    if let Some(&kind) = SELECTED.get() {
        return kind;
    }

    let config = BackendConfig::from_env();
    match init_backend(&config) {
        Ok(kind) => kind,
        Err(err) => {
            log::warn!("{err}; falling back to the default preference order");
            // The default preference ends with the always-available generic provider.
            init_backend(&BackendConfig::default()).unwrap_or(BackendKind::Generic)
        }
    }
}

/// Run `f` with array construction bound to `kind` on this thread.
///
/// # Errors
///
/// Returns [`GradError::BackendSelection`] if `kind` is not usable; `f` is
/// not run in that case.
pub fn with_backend<R>(kind: BackendKind, f: impl FnOnce() -> R) -> Result<R> {
    provider(kind)?;

    struct Restore(Option<BackendKind>);
    impl Drop for Restore {
        fn drop(&mut self) {
            OVERRIDE.with(|o| o.set(self.0));
        }
    }

    let _restore = Restore(OVERRIDE.with(|o| o.replace(Some(kind))));
    Ok(f())
}

/// Providers usable on this machine, in default preference order.
pub fn available_backends() -> Vec<BackendKind> {
    BackendKind::ALL
        .into_iter()
        .filter(|&kind| provider(kind).is_ok())
        .collect()
}
