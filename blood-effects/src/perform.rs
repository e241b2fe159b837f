//! # Yielding Operations
//!
//! [`perform`] yields an operation to the innermost handler of its effect and
//! completes with the value the computation is resumed with.

use std::cell::Cell;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::diagnostics;
use crate::effect::{OpKind, OpTag};
use crate::fatal::{fatal, FatalKind};
use crate::handler::OpFun;
use crate::handles::{self, Handle};
use crate::resume::{ResumeCell, Resumption};
use crate::runtime::{self, Found, PendingYield, Signal};
use crate::value::Value;

/// Yield `tag` with `arg`.
///
/// Yielding an operation no enclosing handler declares is fatal.
pub fn perform(tag: OpTag, arg: Value) -> Perform {
    Perform {
        tag,
        arg,
        state: PerformState::Start,
    }
}

enum PerformState {
    Start,
    Waiting(Rc<Cell<Option<Value>>>),
    Exiting,
    Done,
}

/// Future returned by [`perform`].
#[must_use = "an operation is only yielded when awaited"]
pub struct Perform {
    tag: OpTag,
    arg: Value,
    state: PerformState,
}

impl Perform {
    /// Run a synchronous tail-noop operation function in place.
    fn run_in_place(&mut self, found: Found) -> Poll<Value> {
        let OpFun::Sync(f) = &found.op.fun else {
            fatal(
                FatalKind::InvalidArgument,
                format!("{} has no synchronous operation function", self.tag),
            )
        };
        diagnostics::record(|s| s.tail_fast_paths += 1);
        let cell = ResumeCell::inline(self.tag, found.def.clone());
        let outcome = {
            let _extent = runtime::enter_extent(OpKind::TailNoop, Some(cell.clone()));
            f(Resumption::new(cell.clone()), found.local, self.arg)
        };
        cell.leave_extent();
        match cell.take_tail_request(&outcome) {
            Some((local, value)) => {
                runtime::set_frame_local(found.frame, local);
                self.state = PerformState::Done;
                Poll::Ready(value)
            }
            None => {
                runtime::raise_signal(Signal::Exit {
                    frame: found.frame,
                    outcome,
                });
                self.state = PerformState::Exiting;
                Poll::Pending
            }
        }
    }
}

impl Future for Perform {
    type Output = Value;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Value> {
        let this = self.get_mut();
        match &this.state {
            PerformState::Start => {
                runtime::check_yield_allowed(this.tag);
                diagnostics::record(|s| s.yields += 1);
                let found = runtime::find_operation(this.tag);
                if found.op.kind == OpKind::TailNoop && matches!(found.op.fun, OpFun::Sync(_)) {
                    return this.run_in_place(found);
                }
                let slot = Rc::new(Cell::new(None));
                runtime::raise_signal(Signal::Yield(PendingYield {
                    frame: found.frame,
                    tag: this.tag,
                    arg: this.arg,
                    slot: slot.clone(),
                }));
                this.state = PerformState::Waiting(slot);
                Poll::Pending
            }
            PerformState::Waiting(slot) => match slot.take() {
                Some(value) => {
                    this.state = PerformState::Done;
                    Poll::Ready(value)
                }
                None => Poll::Pending,
            },
            PerformState::Exiting => Poll::Pending,
            PerformState::Done => fatal(
                FatalKind::InvalidArgument,
                format!("yield of {} polled after completion", this.tag),
            ),
        }
    }
}

// ============================================================================
// Multi-argument yields
// ============================================================================

/// Argument pack of a [`perform_n`] yield.
#[derive(Debug)]
pub struct YieldArgs {
    values: Vec<Value>,
}

impl Deref for YieldArgs {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.values
    }
}

/// Yield `tag` with several arguments.
///
/// The operation function receives a handle that [`yield_args`] resolves; it
/// stays valid until this yield completes.
pub fn perform_n(tag: OpTag, args: &[Value]) -> PerformN {
    let mut values = Vec::new();
    if values.try_reserve_exact(args.len()).is_err() {
        fatal(
            FatalKind::OutOfMemory,
            format!("cannot pack {} arguments for {tag}", args.len()),
        );
    }
    values.extend_from_slice(args);
    let handle = handles::insert(Rc::new(YieldArgs { values }));
    PerformN {
        inner: perform(tag, Value::Handle(handle)),
        handle,
    }
}

/// Future returned by [`perform_n`].
#[must_use = "an operation is only yielded when awaited"]
pub struct PerformN {
    inner: Perform,
    handle: Handle,
}

impl Future for PerformN {
    type Output = Value;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Value> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl Drop for PerformN {
    fn drop(&mut self) {
        handles::remove(self.handle);
    }
}

/// Resolve the argument pack passed to an operation by [`perform_n`].
pub fn yield_args(arg: Value) -> Rc<YieldArgs> {
    handles::expect::<YieldArgs>(arg, "yield arguments")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{Effect, EffectDecl};
    use crate::frame::install;
    use crate::handler::HandlerDef;
    use crate::runtime::drive;

    static MATH: EffectDecl = EffectDecl::new("math", &["sum"]);
    static SUM: OpTag = OpTag::new(&MATH, 0);

    #[test]
    fn test_perform_n_sums_arguments() {
        let def = HandlerDef::builder(Effect::of(&MATH))
            .op_sync(OpKind::TailNoop, SUM, |r, local, arg| {
                let total: i64 = yield_args(arg).iter().map(|v| v.expect_int()).sum();
                r.resume_tail(local, Value::Int(total))
            })
            .build();
        let live_before = handles::live();
        let out = drive(install(
            &def,
            Value::Null,
            |_| async {
                Ok(perform_n(SUM, &[Value::Int(1), Value::Int(2), Value::Int(39)]).await)
            },
            Value::Null,
        ));
        assert_eq!(out, Ok(Value::Int(42)));
        assert_eq!(handles::live(), live_before);
    }

    #[test]
    fn test_tail_noop_without_resume_exits_frame() {
        let def = HandlerDef::builder(Effect::of(&MATH))
            .op_sync(OpKind::TailNoop, SUM, |_, _, _| Ok(Value::Int(-7)))
            .build();
        let reached = Rc::new(Cell::new(false));
        let flag = reached.clone();
        let out = drive(install(
            &def,
            Value::Null,
            move |_| async move {
                perform(SUM, Value::Null).await;
                flag.set(true);
                Ok(Value::Int(0))
            },
            Value::Null,
        ));
        assert_eq!(out, Ok(Value::Int(-7)));
        assert!(!reached.get());
    }
}
