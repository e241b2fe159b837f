//! # Handler Frames
//!
//! [`install`] creates a frame instance, a [`Handled`] future that runs a body
//! under a handler definition and services the operations the body yields.
//!
//! ## Design
//!
//! A frame alternates between two modes:
//!
//! - **body mode**: push the frame record, poll the body, pop the record. A
//!   `Pending` with a signal addressed to this frame is dispatched; anything
//!   else propagates outward.
//! - **operation mode**: poll the running operation function with the frame
//!   popped. When it finishes, either trampoline a recorded tail resume back
//!   into body mode, or complete the frame with the function's outcome.
//!
//! Local state is owned by exactly one party at any time: the frame, a
//! [`Resumption`](crate::Resumption) that captured it, or a frame instance
//! created by resuming. Whoever holds it when the computation is permanently
//! discarded calls the definition's `release`, so release runs once.

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::diagnostics;
use crate::effect::{OpKind, OpTag};
use crate::exception::Outcome;
use crate::fatal::{fatal, FatalKind};
use crate::handler::{HandlerDef, OpFuture};
use crate::resume::{ResumeCell, Resumption};
use crate::runtime::{self, FrameId, PendingYield, Signal};
use crate::value::Value;

/// Boxed body of a frame.
pub type BodyFuture = Pin<Box<dyn Future<Output = Outcome>>>;

/// Run `body(arg)` under a handler for `def` with initial `local` state.
///
/// The returned future completes with `def.result(local, value)` when the
/// body returns `Ok(value)`, with the body's exception when it fails, or with
/// the outcome of an operation function that finished without resuming.
pub fn install<F, Fut>(def: &Rc<HandlerDef>, local: Value, body: F, arg: Value) -> Handled
where
    F: FnOnce(Value) -> Fut,
    Fut: Future<Output = Outcome> + 'static,
{
    diagnostics::record(|s| s.handlers_installed += 1);
    tracing::trace!(effect = %def.effect(), "install handler");
    Handled::new(def.clone(), local, Box::pin(body(arg)))
}

/// Operation function currently running on behalf of a frame.
struct ActiveOp {
    kind: OpKind,
    tag: OpTag,
    future: OpFuture,
    cell: Option<Rc<ResumeCell>>,
    /// Local state still owned by the frame (never-resume operations).
    owed_local: Option<Value>,
}

/// A handler frame instance; see the [module documentation](self).
#[must_use = "a handler frame does nothing unless awaited or driven"]
pub struct Handled {
    id: FrameId,
    def: Rc<HandlerDef>,
    local: Option<Value>,
    body: Option<BodyFuture>,
    active: Option<ActiveOp>,
    done: bool,
}

impl Handled {
    fn new(def: Rc<HandlerDef>, local: Value, body: BodyFuture) -> Self {
        diagnostics::record(|s| {
            s.frames_live += 1;
            s.frames_peak = s.frames_peak.max(s.frames_live);
        });
        Self {
            id: runtime::next_frame_id(),
            def,
            local: Some(local),
            body: Some(body),
            active: None,
            done: false,
        }
    }

    /// Frame instance continuing a resumed body.
    pub(crate) fn resumed(def: Rc<HandlerDef>, local: Value, body: BodyFuture) -> Self {
        Self::new(def, local, body)
    }

    fn finish(&mut self, outcome: Outcome) -> Poll<Outcome> {
        self.done = true;
        diagnostics::record(|s| s.frames_live = s.frames_live.saturating_sub(1));
        Poll::Ready(outcome)
    }

    /// Hand a yielded operation to its function.
    fn dispatch(&mut self, pending: PendingYield) {
        let op = match self.def.operation(pending.tag) {
            Some(op) => op.clone(),
            None => fatal(
                FatalKind::NoHandler,
                format!("frame {} received undeclared operation {}", self.id, pending.tag),
            ),
        };
        let (body, local) = match (self.body.take(), self.local.take()) {
            (Some(body), Some(local)) => (body, local),
            _ => fatal(
                FatalKind::InvalidResumption,
                format!("frame {} dispatched {} without a suspended body", self.id, op.tag),
            ),
        };
        tracing::trace!(op = %op.tag, kind = %op.kind, frame = self.id, "dispatch");
        diagnostics::record(|s| s.dispatches += 1);

        let (cell, owed_local) = match op.kind {
            OpKind::NoResume => {
                drop(body);
                diagnostics::record(|s| s.noresume_unwinds += 1);
                (ResumeCell::never(op.kind, op.tag, self.def.clone()), Some(local))
            }
            OpKind::NoResumeX => {
                runtime::without_cleanup(|| drop(body));
                diagnostics::record(|s| s.noresume_unwinds += 1);
                (ResumeCell::never(op.kind, op.tag, self.def.clone()), Some(local))
            }
            kind => {
                diagnostics::record(|s| match kind {
                    OpKind::Scoped => s.captures_scoped += 1,
                    OpKind::General => s.captures_general += 1,
                    _ => s.captures_tail += 1,
                });
                let cell = ResumeCell::capture(
                    kind,
                    op.tag,
                    self.def.clone(),
                    body,
                    pending.slot,
                    local,
                );
                (cell, None)
            }
        };
        let resumable = owed_local.is_none();
        let resumption = Resumption::new(cell.clone());
        let future = op.fun.invoke(resumption, local, pending.arg);
        self.active = Some(ActiveOp {
            kind: op.kind,
            tag: op.tag,
            future,
            cell: resumable.then_some(cell),
            owed_local,
        });
    }
}

impl Future for Handled {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        let this = self.get_mut();
        if this.done {
            fatal(
                FatalKind::InvalidArgument,
                format!("handler frame {} polled after completion", this.id),
            );
        }
        loop {
            if let Some(mut active) = this.active.take() {
                let polled = {
                    let _extent = runtime::enter_extent(active.kind, active.cell.clone());
                    active.future.as_mut().poll(cx)
                };
                let outcome = match polled {
                    Poll::Pending => {
                        this.active = Some(active);
                        return Poll::Pending;
                    }
                    Poll::Ready(outcome) => outcome,
                };
                let ActiveOp {
                    tag,
                    future,
                    cell,
                    owed_local,
                    ..
                } = active;
                // The function's own locals, including an unconsumed
                // resumption, go before the cell is inspected.
                drop(future);
                if let Some(cell) = cell {
                    cell.leave_extent();
                    if let Some((local, value)) = cell.take_tail_request(&outcome) {
                        let Some(body) = cell.take_body_with(value) else {
                            fatal(
                                FatalKind::InvalidResumption,
                                format!("tail resume of {tag} lost its computation"),
                            )
                        };
                        this.local = Some(local);
                        this.body = Some(body);
                        continue;
                    }
                }
                if let Some(local) = owed_local {
                    this.def.release_local(local);
                }
                return this.finish(outcome);
            }

            let Some(local) = this.local.take() else {
                fatal(
                    FatalKind::InvalidResumption,
                    format!("handler frame {} has no local state", this.id),
                )
            };
            let polled = {
                let Some(body) = this.body.as_mut() else {
                    fatal(
                        FatalKind::InvalidResumption,
                        format!("handler frame {} has no body", this.id),
                    )
                };
                let guard = runtime::push_frame(this.id, this.def.clone(), local);
                let polled = body.as_mut().poll(cx);
                this.local = Some(guard.pop());
                polled
            };

            match polled {
                Poll::Ready(result) => {
                    this.body = None;
                    let local = this.local.take().unwrap_or_default();
                    let outcome = match result {
                        Ok(value) => this.def.apply_result(local, value),
                        Err(exception) => Err(exception),
                    };
                    this.def.release_local(local);
                    return this.finish(outcome);
                }
                Poll::Pending => match runtime::take_signal_for(this.id) {
                    None => return Poll::Pending,
                    Some(Signal::Exit { outcome, .. }) => {
                        drop(this.body.take());
                        if let Some(local) = this.local.take() {
                            this.def.release_local(local);
                        }
                        return this.finish(outcome);
                    }
                    Some(Signal::Yield(pending)) => this.dispatch(pending),
                },
            }
        }
    }
}

impl Drop for Handled {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(active) = self.active.take() {
            drop(active.future);
            if let Some(cell) = &active.cell {
                cell.leave_extent();
            }
            if let Some(local) = active.owed_local {
                self.def.release_local(local);
            }
        }
        drop(self.body.take());
        if let Some(local) = self.local.take() {
            self.def.release_local(local);
        }
        diagnostics::record(|s| s.frames_live = s.frames_live.saturating_sub(1));
    }
}
