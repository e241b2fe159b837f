//! # Channel-Forwarding Async Handler
//!
//! A second handler for the `async` effect that services `await_request`
//! itself but forwards `get_loop` and `register_request` to the next enclosing
//! `async` handler. A parked request's completion is emitted into a
//! [`Channel`] instead of resuming the computation directly, which lets one
//! consumer drive several computations in completion order ([`interleave`]).
//!
//! ```text
//!   async handler (owns the requests)
//!     └─ interleave consumer ── receive() ──┐
//!          ├─ channel handler ─ action 0     │  completions
//!          └─ channel handler ─ action 1 ◄───┘
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::async_io::{self, ResumeFn, AWAIT_REQUEST, GET_LOOP, REGISTER_REQUEST};
use crate::effect::{Effect, OpKind};
use crate::exception::{check_status, Exception, Outcome};
use crate::frame::{install, Handled};
use crate::handler::HandlerDef;
use crate::handles::{self, Handle};
use crate::perform::perform;
use crate::reactor::{IoOp, LoopHandle, RequestId};
use crate::resume::Resumption;
use crate::value::Value;

/// A completion emitted by the channel handler.
pub struct ChannelElem {
    /// Parked computation, if it suspended before the completion arrived.
    pub resumption: Option<Resumption>,
    /// Local state to resume it with.
    pub local: Value,
    /// Completed request.
    pub request: RequestId,
    /// Completion status.
    pub status: i32,
}

impl ChannelElem {
    /// Continue the parked computation with the completion status.
    ///
    /// Returns `None` if nothing was parked.
    pub fn resume(self) -> Option<Handled> {
        let resumption = self.resumption?;
        Some(resumption.release_resume(self.local, Value::Int(i64::from(self.status))))
    }
}

impl fmt::Debug for ChannelElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelElem")
            .field("request", &self.request)
            .field("status", &self.status)
            .field("parked", &self.resumption.is_some())
            .finish()
    }
}

#[derive(Default)]
struct ChannelInner {
    queue: RefCell<VecDeque<ChannelElem>>,
    /// Receiver suspended on a manual request.
    waiting: RefCell<Option<(LoopHandle, RequestId)>>,
}

impl ChannelInner {
    fn emit(&self, elem: ChannelElem) {
        self.queue.borrow_mut().push_back(elem);
        let waiting = self.waiting.borrow_mut().take();
        if let Some((lp, req)) = waiting {
            if let Err(err) = lp.complete(req, 0) {
                tracing::debug!(request = %req, error = %err, "channel receiver already gone");
            }
        }
    }
}

/// Queue of completions, consumed by a single receiver.
pub struct Channel {
    inner: Rc<ChannelInner>,
    handle: Handle,
}

impl Channel {
    /// Create an empty channel.
    pub fn new() -> Self {
        let inner = Rc::new(ChannelInner::default());
        let handle = handles::insert(inner.clone());
        Self { inner, handle }
    }

    /// Queue an element and wake the receiver.
    pub fn emit(&self, elem: ChannelElem) {
        self.inner.emit(elem);
    }

    /// Number of queued elements.
    pub fn len(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Whether no element is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the next element, suspending on the current `async` handler until
    /// one is emitted.
    pub async fn receive(&self) -> Result<ChannelElem, Exception> {
        loop {
            if let Some(elem) = self.inner.queue.borrow_mut().pop_front() {
                return Ok(elem);
            }
            let lp = async_io::async_loop().await;
            let req = async_io::submit(&lp, IoOp::Manual)?;
            *self.inner.waiting.borrow_mut() = Some((lp.clone(), req));
            check_status(async_io::await_request(&lp, req).await)?;
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        handles::remove(self.handle);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("handle", &self.handle)
            .field("queued", &self.len())
            .finish()
    }
}

fn channel_def() -> Rc<HandlerDef> {
    thread_local! {
        static DEF: Rc<HandlerDef> = HandlerDef::builder(Effect::of(&async_io::ASYNC))
            .op(OpKind::Tail, GET_LOOP, |r: Resumption, local: Value, _| async move {
                let lp = perform(GET_LOOP, Value::Null).await;
                r.resume_tail(local, lp)
            })
            .op(OpKind::Tail, REGISTER_REQUEST, |r: Resumption, local: Value, arg: Value| async move {
                perform(REGISTER_REQUEST, arg).await;
                r.resume_tail(local, Value::Null)
            })
            .op_sync(OpKind::General, AWAIT_REQUEST, |r, local, arg| {
                let inner = handles::expect::<ChannelInner>(local, "channel");
                async_io::park(arg, r, local, move || -> ResumeFn {
                    Rc::new(move |resumption: Option<Resumption>, local: Value, request: RequestId, status: i32| {
                        inner.emit(ChannelElem {
                            resumption,
                            local,
                            request,
                            status,
                        })
                    })
                });
                Ok(Value::Null)
            })
            .build();
    }
    DEF.with(Rc::clone)
}

/// Run `body` under the channel-forwarding handler.
///
/// The returned frame completes when `body` finishes or first parks a
/// request; parked computations come back through `channel`.
pub fn channel_async_handler<F, Fut>(channel: &Channel, body: F) -> Handled
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Outcome> + 'static,
{
    install(&channel_def(), Value::Handle(channel.handle), move |_| body(), Value::Null)
}

// ============================================================================
// Interleaving
// ============================================================================

/// A computation passed to [`interleave`].
pub type Action = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Outcome>>>>;

/// Run `actions` concurrently on the current `async` handler.
///
/// Each action runs until it awaits a request; the actions are then resumed
/// in the order their requests complete. Once all have finished, the first
/// failure (by action order) is returned, otherwise the number of actions.
pub async fn interleave(actions: Vec<Action>) -> Outcome {
    let count = actions.len();
    if count == 0 {
        return Ok(Value::Int(0));
    }
    let results: Rc<RefCell<Vec<Option<Outcome>>>> = Rc::new(RefCell::new(vec![None; count]));
    let channel = Channel::new();

    for (index, action) in actions.into_iter().enumerate() {
        let slot = results.clone();
        channel_async_handler(&channel, move || async move {
            let outcome = action().await;
            slot.borrow_mut()[index] = Some(outcome);
            Ok(Value::Null)
        })
        .await?;
    }

    let finished = |results: &RefCell<Vec<Option<Outcome>>>| results.borrow().iter().all(Option::is_some);
    while !finished(&results) {
        let elem = channel.receive().await?;
        if let Some(resumed) = elem.resume() {
            resumed.await?;
        }
    }

    let outcomes = std::mem::take(&mut *results.borrow_mut());
    for outcome in outcomes.into_iter().flatten() {
        outcome?;
    }
    Ok(Value::Int(count as i64))
}

/// Box an async closure as an [`Action`].
pub fn action<F, Fut>(f: F) -> Action
where
    F: FnOnce() -> Fut + 'static,
    Fut: Future<Output = Outcome> + 'static,
{
    Box::new(move || Box::pin(f()) as Pin<Box<dyn Future<Output = Outcome>>>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_io::async_handler;
    use crate::reactor::{EventLoop, ReactorConfig};
    use crate::runtime::drive;

    #[test]
    fn test_emit_and_len() {
        let channel = Channel::new();
        assert!(channel.is_empty());
        channel.emit(ChannelElem {
            resumption: None,
            local: Value::Null,
            request: RequestId::from_raw(9),
            status: 4,
        });
        assert_eq!(channel.len(), 1);
        let elem = channel.inner.queue.borrow_mut().pop_front().unwrap();
        assert_eq!(elem.status, 4);
        assert!(elem.resume().is_none());
    }

    #[test]
    fn test_forwarded_get_loop_reaches_parent() {
        let lp = EventLoop::new(ReactorConfig::default());
        let channel = Channel::new();
        let expected = lp.to_value();
        let outcome = drive(async_handler(&lp, || {
            let frame = channel_async_handler(&channel, || async {
                Ok(async_io::async_loop().await.to_value())
            });
            async move { frame.await }
        }));
        assert_eq!(outcome, Ok(expected));
        lp.close().unwrap();
    }
}
