//! # Resumptions
//!
//! First-class handles to a computation suspended at a yield.
//!
//! ## Design
//!
//! When a frame dispatches a resumable operation, the suspended body future
//! moves into a shared [`ResumeCell`]. The [`Resumption`] handed to the
//! operation function is the only public owner of that cell; the frame keeps a
//! second reference so it can trampoline a tail resume once the operation
//! function returns.
//!
//! Resumptions are one-shot. Each cell moves through
//! `Fresh -> (TailRequested | Resumed) -> Released`, and every resume entry
//! point checks the state, the operation kind, and (for scoped and tail
//! resumes) whether the operation function is still running. Any violation is
//! reported through [`fatal`](crate::fatal::fatal) instead of being allowed to
//! corrupt the frame.
//!
//! | Kind | `resume_tail` | `resume` | `call_resume` / `release_resume` |
//! |------|---------------|----------|----------------------------------|
//! | `NoResume`, `NoResumeX` | fatal | fatal | fatal |
//! | `TailNoop`, `Tail` | in extent | fatal | fatal |
//! | `Scoped` | in extent | in extent | fatal |
//! | `General` | in extent | anywhere | anywhere |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::diagnostics;
use crate::effect::{OpKind, OpTag};
use crate::exception::Outcome;
use crate::fatal::{fatal, FatalKind};
use crate::frame::{BodyFuture, Handled};
use crate::handler::HandlerDef;
use crate::handles::Handle;
use crate::runtime::ResultSlot;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeState {
    Fresh,
    TailRequested {
        local: Value,
        value: Value,
        marker: Handle,
    },
    Resumed,
    Released,
}

/// Shared state behind a [`Resumption`].
pub(crate) struct ResumeCell {
    kind: OpKind,
    tag: OpTag,
    def: Rc<HandlerDef>,
    body: RefCell<Option<BodyFuture>>,
    slot: Option<ResultSlot>,
    local: Cell<Option<Value>>,
    state: Cell<ResumeState>,
    in_extent: Cell<bool>,
}

impl ResumeCell {
    fn new(
        kind: OpKind,
        tag: OpTag,
        def: Rc<HandlerDef>,
        body: Option<BodyFuture>,
        slot: Option<ResultSlot>,
        local: Option<Value>,
    ) -> Rc<Self> {
        Rc::new(Self {
            kind,
            tag,
            def,
            body: RefCell::new(body),
            slot,
            local: Cell::new(local),
            state: Cell::new(ResumeState::Fresh),
            in_extent: Cell::new(true),
        })
    }

    /// Cell owning a suspended body and the frame's local state.
    pub(crate) fn capture(
        kind: OpKind,
        tag: OpTag,
        def: Rc<HandlerDef>,
        body: BodyFuture,
        slot: ResultSlot,
        local: Value,
    ) -> Rc<Self> {
        Self::new(kind, tag, def, Some(body), Some(slot), Some(local))
    }

    /// Cell for a tail operation run in place at its yield site.
    pub(crate) fn inline(tag: OpTag, def: Rc<HandlerDef>) -> Rc<Self> {
        Self::new(OpKind::TailNoop, tag, def, None, None, None)
    }

    /// Cell for a never-resume operation; owns nothing.
    pub(crate) fn never(kind: OpKind, tag: OpTag, def: Rc<HandlerDef>) -> Rc<Self> {
        Self::new(kind, tag, def, None, None, None)
    }

    pub(crate) fn tag(&self) -> OpTag {
        self.tag
    }

    pub(crate) fn is_fresh(&self) -> bool {
        self.state.get() == ResumeState::Fresh
    }

    pub(crate) fn tail_requested(&self) -> bool {
        matches!(self.state.get(), ResumeState::TailRequested { .. })
    }

    /// The operation function has returned.
    pub(crate) fn leave_extent(&self) {
        self.in_extent.set(false);
    }

    /// Consume a recorded tail resume, yielding `(local, value)`.
    ///
    /// `outcome` is what the operation function returned. After a tail resume
    /// it must be the marker [`Resumption::resume_tail`] handed out; anything
    /// else means the resume was not the function's final action.
    pub(crate) fn take_tail_request(&self, outcome: &Outcome) -> Option<(Value, Value)> {
        match self.state.get() {
            ResumeState::TailRequested { local, value, marker } => {
                if !matches!(outcome, Ok(Value::Handle(h)) if *h == marker) {
                    fatal(
                        FatalKind::NotSupported,
                        format!(
                            "operation {} returned {} after tail-resuming",
                            self.tag,
                            describe(outcome)
                        ),
                    );
                }
                self.state.set(ResumeState::Resumed);
                Some((local, value))
            }
            _ => None,
        }
    }

    /// Move the suspended body out and deliver `value` to its yield site.
    pub(crate) fn take_body_with(&self, value: Value) -> Option<BodyFuture> {
        let body = self.body.borrow_mut().take()?;
        if let Some(slot) = &self.slot {
            slot.set(Some(value));
        }
        Some(body)
    }
}

/// A captured continuation of a suspended yield.
///
/// Dropping an unresumed resumption discards the suspended computation and
/// releases the local state it captured, exactly like [`Resumption::release`].
pub struct Resumption {
    cell: Rc<ResumeCell>,
}

impl Resumption {
    pub(crate) fn new(cell: Rc<ResumeCell>) -> Self {
        diagnostics::record(|s| s.resumptions_live += 1);
        Self { cell }
    }

    /// Declared kind of the operation that produced this resumption.
    pub fn kind(&self) -> OpKind {
        self.cell.kind
    }

    /// Operation that produced this resumption.
    pub fn op(&self) -> OpTag {
        self.cell.tag
    }

    /// Whether the resumption can still be resumed.
    pub fn is_resumable(&self) -> bool {
        self.cell.kind.can_resume() && self.cell.is_fresh()
    }

    /// Resume as the final action of the operation function.
    ///
    /// The value returned from here is a marker the operation function must
    /// return unchanged; the frame continues the body with `value` and
    /// `local` once the function has returned. Returning anything else, an
    /// exception included, is fatal.
    pub fn resume_tail(self, local: Value, value: Value) -> Outcome {
        self.require_resumable("resume_tail");
        if !self.cell.in_extent.get() {
            fatal(
                FatalKind::InvalidResumption,
                format!("tail resume of {} after its operation function returned", self.cell.tag),
            );
        }
        self.require_fresh();
        self.cell.local.set(None);
        let marker = Handle::next();
        self.cell
            .state
            .set(ResumeState::TailRequested { local, value, marker });
        diagnostics::record(|s| s.resumes += 1);
        Ok(Value::Handle(marker))
    }

    /// Resume now and run the body until it completes or suspends again.
    ///
    /// Permitted for scoped operations while their function runs, and for
    /// general operations anywhere.
    pub fn resume(&self, local: Value, value: Value) -> Handled {
        self.require_resumable("resume");
        let kind = self.cell.kind;
        if kind.is_tail() {
            fatal(
                FatalKind::NotSupported,
                format!("non-tail resume of {kind} operation {}", self.cell.tag),
            );
        }
        if kind == OpKind::Scoped && !self.cell.in_extent.get() {
            fatal(
                FatalKind::InvalidResumption,
                format!("scoped resumption of {} used outside its operation function", self.cell.tag),
            );
        }
        self.start(local, value)
    }

    /// Resume a general resumption through a borrowed handle.
    ///
    /// The resumption is still one-shot: any later resume through it is
    /// fatal. Borrowing only lets the handle keep ownership of `local` for its
    /// later release. If the handler defines `acquire`, the continuation runs
    /// with `acquire(local)` and `local` is released when this resumption is
    /// dropped; otherwise ownership of `local` moves to the continuation.
    pub fn call_resume(&self, local: Value, value: Value) -> Handled {
        self.require_general("call_resume");
        if self.cell.def.has_acquire() {
            let acquired = self.cell.def.acquire_local(local);
            let handled = self.start(acquired, value);
            self.cell.local.set(Some(local));
            handled
        } else {
            self.start(local, value)
        }
    }

    /// Resume a general resumption, consuming it.
    pub fn release_resume(self, local: Value, value: Value) -> Handled {
        self.require_general("release_resume");
        self.start(local, value)
    }

    /// Discard without resuming, running the suspended computation's cleanup
    /// and releasing the captured local state.
    pub fn release(self) {
        drop(self);
    }

    fn start(&self, local: Value, value: Value) -> Handled {
        self.require_fresh();
        let body = match self.cell.take_body_with(value) {
            Some(body) => body,
            None => fatal(
                FatalKind::InvalidResumption,
                format!("resumption of {} has no suspended computation", self.cell.tag),
            ),
        };
        self.cell.local.set(None);
        self.cell.state.set(ResumeState::Resumed);
        diagnostics::record(|s| s.resumes += 1);
        Handled::resumed(self.cell.def.clone(), local, body)
    }

    fn require_resumable(&self, call: &str) {
        if !self.cell.kind.can_resume() {
            fatal(
                FatalKind::NotSupported,
                format!("{call} on {} operation {}", self.cell.kind, self.cell.tag),
            );
        }
    }

    fn require_general(&self, call: &str) {
        self.require_resumable(call);
        if self.cell.kind != OpKind::General {
            fatal(
                FatalKind::NotSupported,
                format!(
                    "{call} requires a general operation, {} is {}",
                    self.cell.tag, self.cell.kind
                ),
            );
        }
    }

    fn require_fresh(&self) {
        match self.cell.state.get() {
            ResumeState::Fresh => {}
            ResumeState::Released => fatal(
                FatalKind::InvalidResumption,
                format!("resumption of {} used after release", self.cell.tag),
            ),
            _ => fatal(
                FatalKind::NotSupported,
                format!("resumption of {} resumed twice", self.cell.tag),
            ),
        }
    }
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Ok(value) => format!("{value:?}"),
        Err(exn) => format!("exception {exn}"),
    }
}

impl Drop for Resumption {
    fn drop(&mut self) {
        let cell = &self.cell;
        let (body, local) = match cell.state.get() {
            ResumeState::Fresh => {
                cell.state.set(ResumeState::Released);
                let body = cell.body.try_borrow_mut().ok().and_then(|mut b| b.take());
                (body, cell.local.take())
            }
            ResumeState::Resumed => {
                cell.state.set(ResumeState::Released);
                (None, cell.local.take())
            }
            ResumeState::TailRequested { .. } | ResumeState::Released => (None, None),
        };
        let discarded = body.is_some() || local.is_some();
        drop(body);
        if let Some(local) = local {
            cell.def.release_local(local);
        }
        diagnostics::record(|s| {
            s.resumptions_live = s.resumptions_live.saturating_sub(1);
            if discarded {
                s.resumptions_released += 1;
            }
        });
    }
}

impl fmt::Debug for Resumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumption")
            .field("op", &self.cell.tag)
            .field("kind", &self.cell.kind)
            .field("state", &self.cell.state.get())
            .finish()
    }
}
