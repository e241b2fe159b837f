//! # Asynchronous I/O Adapter
//!
//! Turns the callback-driven [`EventLoop`](crate::EventLoop) into
//! direct-style code through the `async` effect.
//!
//! ## Design
//!
//! The effect has three operations:
//!
//! | Operation | Kind | Handler action |
//! |-----------|------|----------------|
//! | `get_loop` | tail-noop | answer with the handler's loop |
//! | `register_request` | tail-noop | link a request node into the handler's list |
//! | `await_request` | general | park the resumption in the node and return |
//!
//! Returning from `await_request` without resuming completes the handler frame,
//! which hands control back to whatever drives the event loop. The reactor
//! later calls [`deliver_completion`], which detaches the node and runs its
//! resume function; the default one resumes the parked computation with the
//! completion status.
//!
//! Request nodes live in a thread-local table keyed by [`Handle`]. Each handler
//! instance owns a dummy head node; its list holds every request registered
//! through it and not yet completed. The reactor request's user-data slot
//! points at the node, and delivering a completion clears that slot, so a
//! duplicate completion finds nothing and is ignored.
//!
//! Registration is itself a yield, so a nested handler (see
//! [`channel`](crate::channel)) can forward it to the handler that should own
//! the request.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use crate::cancellation::{self, Scope};
use crate::diagnostics;
use crate::effect::{Effect, EffectDecl, OpKind, OpTag};
use crate::exception::{check_status, Exception, Outcome};
use crate::fatal::{fatal, FatalKind};
use crate::frame::{install, Handled};
use crate::handler::HandlerDef;
use crate::handles::{self, Handle};
use crate::perform::perform;
use crate::reactor::{IoOp, LoopHandle, ReactorError, RequestId};
use crate::resume::Resumption;
use crate::runtime::drive;
use crate::value::Value;

/// The `async` effect.
pub static ASYNC: EffectDecl = EffectDecl::new("async", &["get_loop", "register_request", "await_request"]);

/// Return the event loop of the innermost `async` handler.
pub static GET_LOOP: OpTag = OpTag::new(&ASYNC, 0);
/// Link a request node into the owning handler's outstanding list.
pub static REGISTER_REQUEST: OpTag = OpTag::new(&ASYNC, 1);
/// Suspend until a request node is completed.
pub static AWAIT_REQUEST: OpTag = OpTag::new(&ASYNC, 2);

/// Resume function of a request: `(resumption, local, request, status)`.
///
/// The resumption is `None` if the request completed before its computation
/// suspended on it.
pub type ResumeFn = Rc<dyn Fn(Option<Resumption>, Value, RequestId, i32)>;

// ============================================================================
// Request registry
// ============================================================================

struct RequestNode {
    prev: Option<Handle>,
    next: Option<Handle>,
    is_head: bool,
    resumption: Option<Resumption>,
    local: Value,
    scope: Option<Scope>,
    /// Reactor request; `None` once detached.
    native: Option<(LoopHandle, RequestId)>,
    resume_fn: Option<ResumeFn>,
}

impl RequestNode {
    fn head() -> Self {
        Self {
            prev: None,
            next: None,
            is_head: true,
            resumption: None,
            local: Value::Null,
            scope: None,
            native: None,
            resume_fn: None,
        }
    }
}

thread_local! {
    static REQUESTS: RefCell<HashMap<Handle, RequestNode>> = RefCell::new(HashMap::new());
}

fn with_requests<R>(f: impl FnOnce(&mut HashMap<Handle, RequestNode>) -> R) -> R {
    REQUESTS.with(|table| f(&mut table.borrow_mut()))
}

fn try_with_requests<R>(f: impl FnOnce(&mut HashMap<Handle, RequestNode>) -> R) -> Option<R> {
    REQUESTS
        .try_with(|table| table.try_borrow_mut().ok().map(|mut t| f(&mut t)))
        .ok()
        .flatten()
}

fn alloc_node(lp: LoopHandle, req: RequestId, scope: Option<Scope>) -> Handle {
    let node = Handle::next();
    with_requests(|table| {
        table.insert(
            node,
            RequestNode {
                native: Some((lp, req)),
                scope,
                is_head: false,
                ..RequestNode::head()
            },
        )
    });
    node
}

/// Link `node` at the front of the list anchored at `head`.
fn link_front(table: &mut HashMap<Handle, RequestNode>, head: Handle, node: Handle) -> bool {
    let Some(first) = table.get(&head).map(|h| h.next) else {
        return false;
    };
    if let Some(first) = first {
        if let Some(next) = table.get_mut(&first) {
            next.prev = Some(node);
        }
    }
    match table.get_mut(&node) {
        Some(n) => {
            n.prev = Some(head);
            n.next = first;
        }
        None => return false,
    }
    if let Some(h) = table.get_mut(&head) {
        h.next = Some(node);
    }
    true
}

fn unlink(table: &mut HashMap<Handle, RequestNode>, node: Handle) {
    let Some((prev, next)) = table.get_mut(&node).map(|n| (n.prev.take(), n.next.take())) else {
        return;
    };
    if let Some(prev) = prev.and_then(|p| table.get_mut(&p)) {
        prev.next = next;
    }
    if let Some(next) = next.and_then(|n| table.get_mut(&n)) {
        next.prev = prev;
    }
}

fn list_len(table: &HashMap<Handle, RequestNode>, head: Handle) -> usize {
    let mut len = 0;
    let mut current = table.get(&head).and_then(|h| h.next);
    while let Some(node) = current {
        len += 1;
        current = table.get(&node).and_then(|n| n.next);
    }
    len
}

/// Requests registered with any `async` handler on this thread and not yet
/// completed.
pub fn outstanding_requests() -> usize {
    try_with_requests(|table| {
        table
            .values()
            .filter(|n| !n.is_head && n.native.is_some() && n.prev.is_some())
            .count()
    })
    .unwrap_or(0)
}

/// Cancel every outstanding request issued within `scope` (all of them for
/// `None`). The reactor delivers `-ECANCELED` to each.
///
/// Returns the number of requests cancelled.
pub fn cancel_within(scope: Option<&Scope>) -> usize {
    let targets: Vec<(LoopHandle, RequestId)> = with_requests(|table| {
        table
            .values()
            .filter(|n| !n.is_head && cancellation::is_within(n.scope.as_ref(), scope))
            .filter_map(|n| n.native.clone())
            .collect()
    });
    let cancelled = targets.iter().filter(|(lp, req)| lp.cancel(*req)).count();
    tracing::debug!(
        scope = ?scope.map(Scope::id),
        cancelled,
        "cancel requests within scope"
    );
    cancelled
}

/// Store the suspended computation of an `await_request` in its node.
///
/// `default_fn` provides the resume function unless one was set already.
pub(crate) fn park(node: Value, resumption: Resumption, local: Value, default_fn: impl FnOnce() -> ResumeFn) {
    let node = node.expect_handle();
    let parked = with_requests(|table| match table.get_mut(&node) {
        Some(n) if n.native.is_some() && !n.is_head => {
            if n.resume_fn.is_none() {
                n.resume_fn = Some(default_fn());
            }
            n.local = local;
            n.resumption.replace(resumption)
        }
        _ => Some(resumption),
    });
    if parked.is_some() {
        // Either the node is gone or it already held a computation.
        drop(parked);
        fatal(
            FatalKind::InvalidArgument,
            format!("await on request node {node} that cannot accept a computation"),
        );
    }
}

/// Reactor callback for requests awaited through the adapter.
///
/// Idempotent: only the first delivery for a request has any effect.
pub fn deliver_completion(lp: &LoopHandle, req: RequestId, status: i32) {
    let Some(node) = lp.clear_user_data(req) else {
        diagnostics::record(|s| s.duplicate_completions += 1);
        tracing::debug!(request = %req, status, "completion for detached request ignored");
        return;
    };
    let detached = with_requests(|table| {
        let live = table
            .get(&node)
            .is_some_and(|n| n.native.as_ref().is_some_and(|(_, r)| *r == req));
        if !live {
            return None;
        }
        let was_linked = table.get(&node).is_some_and(|n| n.prev.is_some());
        unlink(table, node);
        table.remove(&node).map(|n| (n, was_linked))
    });
    let Some((node, was_linked)) = detached else {
        diagnostics::record(|s| s.duplicate_completions += 1);
        tracing::debug!(request = %req, status, "completion for unknown request node ignored");
        return;
    };
    diagnostics::record(|s| {
        s.requests_completed += 1;
        if was_linked {
            s.requests_outstanding = s.requests_outstanding.saturating_sub(1);
        }
    });
    tracing::debug!(request = %req, status, "request completed");
    let RequestNode {
        resumption,
        local,
        resume_fn,
        ..
    } = node;
    match resume_fn {
        Some(resume_fn) => resume_fn(resumption, local, req, status),
        None => resume_default(resumption, local, req, status),
    }
}

/// Resume the parked computation with the status as its result.
fn resume_default(resumption: Option<Resumption>, local: Value, req: RequestId, status: i32) {
    let Some(resumption) = resumption else {
        return;
    };
    if let Err(exn) = drive(resumption.release_resume(local, Value::Int(i64::from(status)))) {
        tracing::error!(request = %req, code = exn.code, "exception escaped resumed computation: {}", exn.message);
    }
}

fn default_resume_fn() -> ResumeFn {
    thread_local! {
        static DEFAULT: ResumeFn = Rc::new(resume_default) as ResumeFn;
    }
    DEFAULT.with(Rc::clone)
}

// ============================================================================
// Handler
// ============================================================================

/// Local state of an `async` handler instance.
struct AsyncLocal {
    lp: LoopHandle,
    head: Handle,
}

impl fmt::Debug for AsyncLocal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncLocal")
            .field("lp", &self.lp)
            .field("head", &self.head)
            .finish()
    }
}

fn async_local(local: Value) -> Rc<AsyncLocal> {
    handles::expect::<AsyncLocal>(local, "async handler state")
}

fn release_async_local(local: Value) {
    let Some(handle) = local.as_handle() else {
        return;
    };
    let Some(state) = handles::get::<AsyncLocal>(handle) else {
        return;
    };
    let remaining = try_with_requests(|table| list_len(table, state.head)).unwrap_or(0);
    if remaining > 0 && !std::thread::panicking() {
        fatal(
            FatalKind::InvalidArgument,
            format!("async handler released with {remaining} outstanding request(s)"),
        );
    }
    try_with_requests(|table| table.remove(&state.head));
    handles::remove(handle);
}

fn async_def() -> Rc<HandlerDef> {
    thread_local! {
        static DEF: Rc<HandlerDef> = HandlerDef::builder(Effect::of(&ASYNC))
            .op_sync(OpKind::TailNoop, GET_LOOP, |r, local, _| {
                let lp = async_local(local).lp.to_value();
                r.resume_tail(local, lp)
            })
            .op_sync(OpKind::TailNoop, REGISTER_REQUEST, |r, local, arg| {
                let state = async_local(local);
                let node = arg.expect_handle();
                if !with_requests(|table| link_front(table, state.head, node)) {
                    fatal(
                        FatalKind::InvalidArgument,
                        format!("register of unknown request node {node}"),
                    );
                }
                diagnostics::record(|s| {
                    s.requests_registered += 1;
                    s.requests_outstanding += 1;
                });
                r.resume_tail(local, Value::Null)
            })
            .op_sync(OpKind::General, AWAIT_REQUEST, |r, local, arg| {
                park(arg, r, local, default_resume_fn);
                Ok(Value::Null)
            })
            .release(release_async_local)
            .build();
    }
    DEF.with(Rc::clone)
}

/// Run `body` under an `async` handler serving `lp`.
pub fn async_handler<F, Fut>(lp: &LoopHandle, body: F) -> Handled
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Outcome> + 'static,
{
    let head = Handle::next();
    with_requests(|table| table.insert(head, RequestNode::head()));
    let local = handles::insert(Rc::new(AsyncLocal {
        lp: lp.clone(),
        head,
    }));
    install(&async_def(), Value::Handle(local), move |_| body(), Value::Null)
}

// ============================================================================
// Direct-style operations
// ============================================================================

/// The event loop of the innermost `async` handler.
pub async fn async_loop() -> LoopHandle {
    let value = perform(GET_LOOP, Value::Null).await;
    match LoopHandle::from_value(value) {
        Some(lp) => lp,
        None => fatal(
            FatalKind::InvalidArgument,
            format!("async handler returned {value:?} instead of an event loop"),
        ),
    }
}

/// Submit `op` with [`deliver_completion`] as its callback.
pub fn submit(lp: &LoopHandle, op: IoOp) -> Result<RequestId, ReactorError> {
    lp.submit(op, deliver_completion)
}

/// Suspend until `req` completes and return its status.
///
/// `req` must have been submitted with [`deliver_completion`] as its callback
/// (see [`submit`]).
pub async fn await_request(lp: &LoopHandle, req: RequestId) -> i32 {
    let scope = cancellation::current_scope().await;
    let node = alloc_node(lp.clone(), req, scope);
    if let Err(err) = lp.set_user_data(req, node) {
        with_requests(|table| table.remove(&node));
        fatal(FatalKind::InvalidArgument, format!("await of {req}: {err}"));
    }
    perform(REGISTER_REQUEST, Value::Handle(node)).await;
    let status = perform(AWAIT_REQUEST, Value::Handle(node)).await;
    match status.as_int().and_then(|s| i32::try_from(s).ok()) {
        Some(status) => status,
        None => fatal(
            FatalKind::InvalidArgument,
            format!("request {req} resumed with {status:?} instead of a status"),
        ),
    }
}

/// Like [`await_request`], raising an exception for a negative status.
pub async fn async_await(lp: &LoopHandle, req: RequestId) -> Result<i32, Exception> {
    check_status(await_request(lp, req).await)
}

/// Submit `op` to the current loop and wait for it.
///
/// Returns the loop, the request and its non-negative status.
pub async fn async_request(op: IoOp) -> Result<(LoopHandle, RequestId, i32), Exception> {
    let lp = async_loop().await;
    let req = submit(&lp, op)?;
    let status = async_await(&lp, req).await?;
    Ok((lp, req, status))
}

/// Wait for `duration`.
pub async fn async_sleep(duration: Duration) -> Result<(), Exception> {
    async_request(IoOp::Timeout { duration }).await.map(|_| ())
}

/// Read a whole file.
pub async fn async_read_file(path: impl Into<PathBuf>) -> Result<Vec<u8>, Exception> {
    let (lp, req, _) = async_request(IoOp::ReadFile { path: path.into() }).await?;
    Ok(lp.take_output(req).unwrap_or_default())
}

/// Write a whole file, returning the number of bytes written.
pub async fn async_write_file(path: impl Into<PathBuf>, data: Vec<u8>) -> Result<usize, Exception> {
    let (_, _, written) = async_request(IoOp::WriteFile {
        path: path.into(),
        data,
    })
    .await?;
    Ok(written as usize)
}
