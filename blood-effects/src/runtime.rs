//! # Effect Runtime State
//!
//! Thread-local bookkeeping shared by handler frames and yield sites.
//!
//! ## Design
//!
//! The active handler stack is an explicit vector of frame records. A frame
//! instance ([`Handled`](crate::Handled)) pushes its record only while it polls
//! its body, so the vector always describes exactly the frames a yield can
//! reach. Operation functions run with their own frame popped, which is what
//! lets them forward operations to the next enclosing handler.
//!
//! Suspension travels as `Poll::Pending` plus a [`Signal`] parked in a single
//! slot, addressed to the frame that must act on it. Every future between the
//! yield site and that frame simply propagates `Pending`.
//!
//! ## Technical References
//!
//! - [Effect Handlers, Evidently](https://www.microsoft.com/en-us/research/publication/effect-handlers-evidently/)
//! - [libhandler](https://github.com/koka-lang/libhandler)

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::effect::{Effect, OpKind, OpTag};
use crate::exception::Outcome;
use crate::fatal::{fatal, FatalKind};
use crate::handler::{HandlerDef, Operation};
use crate::resume::ResumeCell;
use crate::value::Value;

/// Identity of one frame instance.
pub(crate) type FrameId = u64;

/// Where a resumed computation finds the result of its yield.
pub(crate) type ResultSlot = Rc<Cell<Option<Value>>>;

/// A yield waiting for its frame to dispatch it.
pub(crate) struct PendingYield {
    pub(crate) frame: FrameId,
    pub(crate) tag: OpTag,
    pub(crate) arg: Value,
    pub(crate) slot: ResultSlot,
}

/// Message from a suspended yield site to a frame.
pub(crate) enum Signal {
    /// Dispatch an operation to the frame.
    Yield(PendingYield),
    /// The frame must discard its body and return `outcome`.
    Exit { frame: FrameId, outcome: Outcome },
}

impl Signal {
    fn target(&self) -> FrameId {
        match self {
            Signal::Yield(pending) => pending.frame,
            Signal::Exit { frame, .. } => *frame,
        }
    }
}

struct FrameRecord {
    id: FrameId,
    def: Rc<HandlerDef>,
    local: Value,
}

struct OpExtent {
    kind: OpKind,
    cell: Option<Rc<ResumeCell>>,
}

#[derive(Default)]
struct RuntimeState {
    frames: Vec<FrameRecord>,
    extents: Vec<OpExtent>,
    signal: Option<Signal>,
    next_frame: FrameId,
    suppress_cleanup: u32,
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::default());
}

fn with_state<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> R {
    RUNTIME.with(|state| f(&mut state.borrow_mut()))
}

/// Like [`with_state`], but tolerant of thread teardown and re-entrancy.
fn try_with_state<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> Option<R> {
    RUNTIME
        .try_with(|state| state.try_borrow_mut().ok().map(|mut s| f(&mut s)))
        .ok()
        .flatten()
}

pub(crate) fn next_frame_id() -> FrameId {
    with_state(|s| {
        s.next_frame += 1;
        s.next_frame
    })
}

// ============================================================================
// Frame stack
// ============================================================================

/// Pops a pushed frame record, returning its (possibly updated) local state.
pub(crate) struct FrameGuard {
    id: FrameId,
    armed: bool,
}

impl FrameGuard {
    pub(crate) fn pop(mut self) -> Value {
        self.armed = false;
        let id = self.id;
        let popped = with_state(|s| {
            let on_top = s.frames.last().is_some_and(|top| top.id == id);
            if on_top {
                s.frames.pop()
            } else {
                None
            }
        });
        match popped {
            Some(record) => record.local,
            None => fatal(
                FatalKind::InvalidResumption,
                format!("handler frame {id} is not the innermost frame"),
            ),
        }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.armed {
            let id = self.id;
            try_with_state(|s| s.frames.retain(|f| f.id != id));
        }
    }
}

pub(crate) fn push_frame(id: FrameId, def: Rc<HandlerDef>, local: Value) -> FrameGuard {
    with_state(|s| s.frames.push(FrameRecord { id, def, local }));
    FrameGuard { id, armed: true }
}

/// Number of frame records currently on the stack.
pub fn frame_depth() -> usize {
    try_with_state(|s| s.frames.len()).unwrap_or(0)
}

/// Whether any reachable frame handles `effect`.
pub fn is_handled(effect: Effect) -> bool {
    with_state(|s| s.frames.iter().any(|f| f.def.effect() == effect))
}

/// The frame and operation a yield resolves to.
pub(crate) struct Found {
    pub(crate) frame: FrameId,
    pub(crate) def: Rc<HandlerDef>,
    pub(crate) op: Operation,
    pub(crate) local: Value,
}

/// Resolve `tag` against the frame stack, innermost first.
///
/// The first frame handling the tag's effect must declare the operation;
/// no enclosing frame at all is fatal.
pub(crate) fn find_operation(tag: OpTag) -> Found {
    let found = with_state(|s| {
        s.frames
            .iter()
            .rev()
            .find(|f| f.def.effect() == tag.effect())
            .map(|f| {
                let op = f.def.operation(tag).cloned();
                (f.id, f.def.clone(), op, f.local)
            })
    });
    match found {
        Some((frame, def, Some(op), local)) => Found {
            frame,
            def,
            op,
            local,
        },
        Some((_, _, None, _)) => fatal(
            FatalKind::NoHandler,
            format!("innermost handler for {} does not declare {}", tag.effect(), tag),
        ),
        None => fatal(FatalKind::NoHandler, format!("no handler for operation {tag}")),
    }
}

/// Store a new local state into a live frame record.
pub(crate) fn set_frame_local(frame: FrameId, local: Value) {
    let updated = with_state(|s| match s.frames.iter_mut().rev().find(|f| f.id == frame) {
        Some(record) => {
            record.local = local;
            true
        }
        None => false,
    });
    if !updated {
        fatal(
            FatalKind::InvalidResumption,
            format!("tail resume into frame {frame} which is no longer active"),
        );
    }
}

// ============================================================================
// Signals
// ============================================================================

pub(crate) fn raise_signal(signal: Signal) {
    let clash = with_state(|s| {
        if let Some(existing) = &s.signal {
            return Some(existing.target());
        }
        s.signal = Some(signal);
        None
    });
    if let Some(target) = clash {
        fatal(
            FatalKind::NotSupported,
            format!(
                "second suspension while frame {target} has a pending one; \
                 effectful futures must not be polled concurrently"
            ),
        );
    }
}

/// Take the pending signal if it is addressed to `frame`.
pub(crate) fn take_signal_for(frame: FrameId) -> Option<Signal> {
    with_state(|s| {
        let addressed = s.signal.as_ref().is_some_and(|signal| signal.target() == frame);
        if addressed {
            s.signal.take()
        } else {
            None
        }
    })
}

fn take_any_signal() -> Option<Signal> {
    try_with_state(|s| s.signal.take()).flatten()
}

// ============================================================================
// Operation extents
// ============================================================================

/// Marks that an operation function of `kind` is running.
pub(crate) struct ExtentGuard;

impl Drop for ExtentGuard {
    fn drop(&mut self) {
        try_with_state(|s| s.extents.pop());
    }
}

pub(crate) fn enter_extent(kind: OpKind, cell: Option<Rc<ResumeCell>>) -> ExtentGuard {
    with_state(|s| s.extents.push(OpExtent { kind, cell }));
    ExtentGuard
}

/// Fail if the innermost running operation function may not yield now.
pub(crate) fn check_yield_allowed(tag: OpTag) {
    let top = with_state(|s| s.extents.last().map(|e| (e.kind, e.cell.clone())));
    let Some((kind, Some(cell))) = top else {
        return;
    };
    if cell.tail_requested() {
        fatal(
            FatalKind::NotSupported,
            format!(
                "yield of {tag} after tail-resuming {}; a tail resume must be the last action",
                cell.tag()
            ),
        );
    }
    if kind == OpKind::TailNoop && cell.is_fresh() {
        fatal(
            FatalKind::NotSupported,
            format!("operation {} is declared tail-noop but yielded {tag}", cell.tag()),
        );
    }
}

// ============================================================================
// Cleanup suppression
// ============================================================================

/// Whether handler release functions are currently suppressed.
pub(crate) fn cleanup_suppressed() -> bool {
    try_with_state(|s| s.suppress_cleanup > 0).unwrap_or(false)
}

/// Run `f` with handler release functions suppressed.
pub(crate) fn without_cleanup<R>(f: impl FnOnce() -> R) -> R {
    struct Restore;
    impl Drop for Restore {
        fn drop(&mut self) {
            try_with_state(|s| s.suppress_cleanup -= 1);
        }
    }
    with_state(|s| s.suppress_cleanup += 1);
    let _restore = Restore;
    f()
}

// ============================================================================
// Driving
// ============================================================================

/// Run a handled computation until it completes or suspends to the reactor.
///
/// Every yield inside `future` must be serviced by a frame inside `future`.
/// A computation that returns from here having "suspended" did so through a
/// general operation whose function stored its resumption; `drive` then
/// returns that function's outcome. A yield that escapes, or a foreign
/// future that returns `Pending`, is fatal.
pub fn drive<F>(future: F) -> Outcome
where
    F: Future<Output = Outcome>,
{
    let mut future = pin!(future);
    let mut cx = Context::from_waker(Waker::noop());
    match future.as_mut().poll(&mut cx) {
        Poll::Ready(outcome) => outcome,
        Poll::Pending => match take_any_signal() {
            Some(Signal::Yield(pending)) => fatal(
                FatalKind::NoHandler,
                format!("operation {} escaped the driven computation", pending.tag),
            ),
            Some(Signal::Exit { frame, .. }) => fatal(
                FatalKind::InvalidResumption,
                format!("exit addressed to frame {frame} escaped the driven computation"),
            ),
            None => fatal(
                FatalKind::NotSupported,
                "computation suspended on something other than an effect operation",
            ),
        },
    }
}
