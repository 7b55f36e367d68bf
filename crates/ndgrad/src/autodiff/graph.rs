//! Tape stack for reverse-mode automatic differentiation.
//!
//! Nodes of every active tape live in one per-thread arena. Each `grad`
//! call pushes a frame that owns the arena range starting at the arena
//! length when it was entered:
//!
//! ```text
//! arena:  [ outer inputs | inner inputs | inner ops | inner VJP ops | ... ]
//!           ^ outer.start  ^ inner.start
//!
//! frames: [ outer (Recording), inner (Consumed) ]
//!                  ▲ records the inner reverse pass
//! ```
//!
//! When an inner frame is popped while an outer frame is still alive its
//! nodes stay in the arena and are adopted by the outer frame. When the
//! outermost frame is popped the arena is cleared and the epoch is bumped,
//! so any [`NodeId`] still held by a value is no longer live.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use super::tensor::Tracked;
use crate::array::NdArray;
use crate::error::{GradError, Result};

/// Identifier of a node in the thread-local tape arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    epoch: u64,
    index: usize,
}

impl NodeId {
    /// Position of the node in the arena.
    pub fn index(&self) -> usize {
        self.index
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(index: usize) -> Self {
        Self { epoch: 0, index }
    }
}

/// Identifier of one `grad` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TapeId(u64);

/// Parent slots of a recorded operation; `None` marks a constant operand.
pub(crate) type Parents = SmallVec<[Option<NodeId>; 2]>;

/// Gradient contributions returned by a VJP, one slot per parent.
pub(crate) type Cotangents = SmallVec<[Option<Tracked>; 2]>;

/// Vector-Jacobian product of a recorded operation, called with the
/// operation's output and the upstream gradient.
///
/// Rules are written with [`Tracked`] operations so that running them while
/// an outer frame records makes them differentiable.
pub(crate) type VjpFn = Rc<dyn Fn(&Tracked, &Tracked) -> Result<Cotangents>>;

#[derive(Clone)]
pub(crate) enum NodeKind {
    /// A leaf wrapped by `grad`. `parent` links it to the value it wraps
    /// when that value was itself traced by an outer frame.
    Input {
        tape: TapeId,
        parent: Option<NodeId>,
    },
    /// Result of a differentiable operation.
    Op { parents: Parents, vjp: VjpFn },
}

/// A recorded node.
pub(crate) struct Node {
    op: &'static str,
    kind: NodeKind,
    value: NdArray,
}

impl Node {
    /// Name of the operation that produced the node.
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Value the node produced.
    pub fn value(&self) -> &NdArray {
        &self.value
    }

    /// Shape of the value the node produced.
    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    pub(crate) fn kind(&self) -> &NodeKind {
        &self.kind
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Node");
        s.field("op", &self.op).field("shape", &self.shape());
        match &self.kind {
            NodeKind::Input { tape, parent } => s.field("tape", tape).field("parent", parent),
            NodeKind::Op { parents, .. } => s.field("parents", parents),
        };
        s.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Recording,
    Consumed,
}

#[derive(Debug)]
struct Frame {
    id: TapeId,
    start: usize,
    state: FrameState,
}

/// Per-thread stack of tapes.
pub(crate) struct TapeStack {
    nodes: Vec<Node>,
    frames: Vec<Frame>,
    epoch: u64,
    next_tape: u64,
    /// Frame depth at each active `no_grad` entry, innermost last.
    suspended: Vec<usize>,
}

impl TapeStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            frames: Vec::new(),
            epoch: 0,
            next_tape: 0,
            suspended: Vec::new(),
        }
    }

    /// Whether `id` refers to a node of the current arena.
    pub fn is_live(&self, id: NodeId) -> bool {
        id.epoch == self.epoch && id.index < self.nodes.len()
    }

    /// Whether new operations are recorded.
    ///
    /// Frames below the innermost `no_grad` watermark are suspended; frames
    /// entered inside the `no_grad` closure record as usual.
    pub fn is_recording(&self) -> bool {
        self.frames
            .iter()
            .skip(self.watermark())
            .any(|frame| frame.state == FrameState::Recording)
    }

    fn watermark(&self) -> usize {
        self.suspended.last().copied().unwrap_or(0)
    }

    /// First arena index a new node may link to. Nodes below it belong to
    /// suspended frames and act as constants.
    fn link_floor(&self) -> usize {
        match self.suspended.last() {
            None => 0,
            Some(&wm) => self.frames.get(wm).map_or(self.nodes.len(), |f| f.start),
        }
    }

    fn is_linkable(&self, id: NodeId) -> bool {
        self.is_live(id) && id.index >= self.link_floor()
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of frames on the stack.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Look up a live node.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.is_live(id).then(|| &self.nodes[id.index])
    }

    pub(crate) fn node_id(&self, index: usize) -> NodeId {
        NodeId {
            epoch: self.epoch,
            index,
        }
    }

    /// Push a recording frame.
    pub(crate) fn enter(&mut self) -> TapeId {
        let id = TapeId(self.next_tape);
        self.next_tape += 1;
        self.frames.push(Frame {
            id,
            start: self.nodes.len(),
            state: FrameState::Recording,
        });
        log::debug!(
            "enter tape {:?} at depth {} (arena {})",
            id,
            self.frames.len(),
            self.nodes.len()
        );
        id
    }

    /// Stop recording on `tape`, which must be the innermost frame.
    pub(crate) fn exit(&mut self, tape: TapeId) -> Result<()> {
        match self.frames.last_mut() {
            Some(frame) if frame.id == tape && frame.state == FrameState::Recording => {
                frame.state = FrameState::Consumed;
                let recorded = self.nodes.len() - frame.start;
                log::debug!("exit tape {:?} with {} nodes", tape, recorded);
                Ok(())
            }
            _ => Err(GradError::InvalidOperation(format!(
                "tape {tape:?} is not the innermost recording tape"
            ))),
        }
    }

    /// Pop `tape`, which must be the innermost frame.
    ///
    /// The arena is cleared once no frame remains.
    pub(crate) fn pop(&mut self, tape: TapeId) {
        match self.frames.last() {
            Some(frame) if frame.id == tape => {
                self.frames.pop();
            }
            _ => {
                log::warn!("pop of tape {tape:?} out of order; discarding newer frames");
                if let Some(pos) = self.frames.iter().position(|f| f.id == tape) {
                    self.frames.truncate(pos);
                }
            }
        }

        if self.frames.is_empty() {
            log::debug!("discard tape arena ({} nodes)", self.nodes.len());
            self.nodes.clear();
            self.epoch += 1;
        } else {
            log::trace!("tape {:?} adopted by outer frame", tape);
        }
    }

    /// First arena index owned by `tape`.
    pub(crate) fn frame_start(&self, tape: TapeId) -> Option<usize> {
        self.frames.iter().find(|f| f.id == tape).map(|f| f.start)
    }

    /// Whether an operation on operands with `parents` should be recorded.
    pub(crate) fn should_record(&self, parents: &[Option<NodeId>]) -> bool {
        self.is_recording() && parents.iter().flatten().any(|&id| self.is_linkable(id))
    }

    /// Record an input node on `tape`.
    pub(crate) fn record_input(
        &mut self,
        tape: TapeId,
        parent: Option<NodeId>,
        value: &NdArray,
    ) -> NodeId {
        let parent = parent.filter(|&p| self.is_linkable(p));
        self.push(Node {
            op: "input",
            kind: NodeKind::Input { tape, parent },
            value: value.clone(),
        })
    }

    /// Record an operation node. Constant, stale or suspended parents
    /// become `None`.
    pub(crate) fn record_op(
        &mut self,
        op: &'static str,
        mut parents: Parents,
        value: &NdArray,
        vjp: VjpFn,
    ) -> NodeId {
        for slot in parents.iter_mut() {
            if slot.is_some_and(|id| !self.is_linkable(id)) {
                *slot = None;
            }
        }
        self.push(Node {
            op,
            kind: NodeKind::Op { parents, vjp },
            value: value.clone(),
        })
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = self.node_id(self.nodes.len());
        log::trace!("record {} #{} {:?}", node.op, id.index, node.shape());
        self.nodes.push(node);
        id
    }
}

impl Default for TapeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TapeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapeStack")
            .field("num_nodes", &self.nodes.len())
            .field("frames", &self.frames)
            .field("epoch", &self.epoch)
            .finish()
    }
}

thread_local! {
    static TAPE: RefCell<TapeStack> = RefCell::new(TapeStack::new());
}

/// Access the thread-local tape stack.
///
/// The stack is borrowed for the duration of `f`; `f` must not run traced
/// operations.
pub(crate) fn with_tape<R>(f: impl FnOnce(&mut TapeStack) -> R) -> R {
    TAPE.with(|t| f(&mut t.borrow_mut()))
}

/// Whether operations on this thread are currently recorded.
pub fn is_recording() -> bool {
    with_tape(|t| t.is_recording())
}

/// Number of nodes held by this thread's tape arena.
///
/// This and [`is_recording`] are the only views of the tape outside the
/// crate; frames cannot be pushed or popped directly:
///
/// ```compile_fail
/// ndgrad::autodiff::with_tape(|tape| tape.enter());
/// ```
pub fn tape_len() -> usize {
    with_tape(|t| t.len())
}

/// Run `f` without recording any operation on the `grad` frames active on
/// this thread.
///
/// Values computed inside are constants with respect to every active
/// `grad` frame. A `grad` call made inside `f` owns a fresh frame and
/// records normally.
///
/// # Example
///
/// ```
/// use ndgrad::{Tracked, grad, no_grad};
///
/// let df = grad(|x: &Tracked| {
///     let frozen = no_grad(|| x * x);
///     Ok(&frozen * x)
/// });
/// // x^2 is treated as a constant 9 when differentiating at x = 3
/// assert_eq!(df(&Tracked::scalar(3.0)).unwrap().item().unwrap(), 9.0);
/// ```
pub fn no_grad<R>(f: impl FnOnce() -> R) -> R {
    struct Resume;
    impl Drop for Resume {
        fn drop(&mut self) {
            with_tape(|t| t.suspended.pop());
        }
    }

    with_tape(|t| {
        let depth = t.frames.len();
        t.suspended.push(depth);
    });
    let _resume = Resume;
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn zeros(shape: &[usize]) -> NdArray {
        NdArray::zeros(shape)
    }

    fn passthrough() -> VjpFn {
        Rc::new(|_out: &Tracked, g: &Tracked| Ok(smallvec![Some(g.clone()), Some(g.clone())]))
    }

    #[test]
    fn test_enter_record_pop() {
        let mut tape = TapeStack::new();
        assert!(!tape.is_recording());

        let id = tape.enter();
        assert!(tape.is_recording());

        let a = tape.record_input(id, None, &zeros(&[2]));
        let b = tape.record_input(id, None, &zeros(&[2]));
        let c = tape.record_op("add", smallvec![Some(a), Some(b)], &zeros(&[2]), passthrough());
        assert_eq!(c.index(), 2);
        assert_eq!(tape.get_node(c).unwrap().op(), "add");
        assert_eq!(tape.len(), 3);

        tape.exit(id).unwrap();
        assert!(!tape.is_recording());

        tape.pop(id);
        assert!(tape.is_empty());
        assert!(!tape.is_live(a));
    }

    #[test]
    fn test_stale_ids_after_epoch_bump() {
        let mut tape = TapeStack::new();
        let first = tape.enter();
        let stale = tape.record_input(first, None, &zeros(&[]));
        tape.exit(first).unwrap();
        tape.pop(first);

        let second = tape.enter();
        let fresh = tape.record_input(second, Some(stale), &zeros(&[]));
        assert_eq!(stale.index(), fresh.index());
        assert!(!tape.is_live(stale));
        assert!(tape.is_live(fresh));
        match tape.get_node(fresh).unwrap().kind() {
            NodeKind::Input { parent, .. } => assert!(parent.is_none()),
            NodeKind::Op { .. } => panic!("expected an input node"),
        }
    }

    #[test]
    fn test_inner_frame_adopted_by_outer() {
        let mut tape = TapeStack::new();
        let outer = tape.enter();
        let x = tape.record_input(outer, None, &zeros(&[]));

        let inner = tape.enter();
        let y = tape.record_input(inner, Some(x), &zeros(&[]));
        tape.exit(inner).unwrap();
        // outer frame still records while the inner one is consumed
        assert!(tape.is_recording());

        tape.pop(inner);
        assert!(tape.is_live(y));
        assert_eq!(tape.frame_start(outer), Some(0));
        assert_eq!(tape.depth(), 1);
    }

    #[test]
    fn test_exit_requires_innermost() {
        let mut tape = TapeStack::new();
        let outer = tape.enter();
        let _inner = tape.enter();
        assert!(tape.exit(outer).is_err());
    }

    #[test]
    fn test_should_record_needs_live_parent() {
        let mut tape = TapeStack::new();
        let id = tape.enter();
        let x = tape.record_input(id, None, &zeros(&[]));
        assert!(tape.should_record(&[Some(x), None]));
        assert!(!tape.should_record(&[None, None]));

        tape.suspended.push(tape.depth());
        assert!(!tape.should_record(&[Some(x)]));
    }

    #[test]
    fn test_no_grad_restores_on_exit() {
        with_tape(|t| assert!(t.suspended.is_empty()));
        no_grad(|| with_tape(|t| assert_eq!(t.suspended, vec![0])));
        with_tape(|t| assert!(t.suspended.is_empty()));
    }

    #[test]
    fn test_frame_entered_under_no_grad_records() {
        let mut tape = TapeStack::new();
        let outer = tape.enter();
        let x = tape.record_input(outer, None, &zeros(&[]));
        tape.suspended.push(tape.depth());
        assert!(!tape.is_recording());

        let inner = tape.enter();
        assert!(tape.is_recording());
        let y = tape.record_input(inner, Some(x), &zeros(&[]));
        assert!(tape.should_record(&[Some(y)]));
        // the suspended outer value stays a constant for the inner frame
        assert!(!tape.should_record(&[Some(x)]));
        match tape.get_node(y).unwrap().kind() {
            NodeKind::Input { parent, .. } => assert!(parent.is_none()),
            NodeKind::Op { .. } => panic!("expected an input node"),
        }

        tape.exit(inner).unwrap();
        tape.pop(inner);
        tape.suspended.pop();
        assert!(tape.is_recording());
    }
}
