//! # Event Loop Reactor
//!
//! A single-threaded, callback-driven event loop: the external collaborator
//! the async adapter bridges into direct-style code.
//!
//! ## Design
//!
//! Every submitted request owns one completion callback, invoked exactly once
//! with `(loop, request, status)`, and a user-data slot the adapter uses to
//! find its registry node. Statuses follow the usual convention: non-negative
//! on success, a negated errno on failure.
//!
//! Work is produced by an [`IoDriver`]. The default [`BlockingDriver`]
//! services timers and file operations on the loop thread; [`IoOp::Manual`]
//! requests complete only through [`LoopHandle::complete`] or
//! [`LoopHandle::cancel`].
//!
//! [`LoopHandle::run`] processes, in order of priority, scheduled one-shot
//! callbacks, posted completions, and driver completions, and returns when
//! none of them can make progress.
//!
//! ## Technical References
//!
//! - [libuv design overview](https://docs.libuv.org/en/v1.x/design.html)

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use nix::libc;
use thiserror::Error;

use crate::exception::Exception;
use crate::handles::{self, Handle};
use crate::value::Value;

/// Unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Rebuild an ID from its raw value.
    pub const fn from_raw(raw: u64) -> Self {
        RequestId(raw)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request({})", self.0)
    }
}

/// Global request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> RequestId {
    RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
}

/// Operation a request performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoOp {
    /// Complete with status `0` after `duration`.
    Timeout {
        /// Delay before completion.
        duration: Duration,
    },
    /// Read a whole file; status is the byte count.
    ReadFile {
        /// File to read.
        path: PathBuf,
    },
    /// Write (create or truncate) a file; status is the byte count.
    WriteFile {
        /// File to write.
        path: PathBuf,
        /// Contents.
        data: Vec<u8>,
    },
    /// Completed only by [`LoopHandle::complete`] or [`LoopHandle::cancel`].
    Manual,
}

impl IoOp {
    fn name(&self) -> &'static str {
        match self {
            IoOp::Timeout { .. } => "timeout",
            IoOp::ReadFile { .. } => "read_file",
            IoOp::WriteFile { .. } => "write_file",
            IoOp::Manual => "manual",
        }
    }
}

/// Result of a driver operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoResult {
    /// Timer expired.
    TimedOut,
    /// File contents.
    Read(Vec<u8>),
    /// Bytes written.
    Written(usize),
    /// Failure with a positive errno.
    Error(i32),
}

impl IoResult {
    /// Completion status delivered to the request callback.
    pub fn status(&self) -> i32 {
        match self {
            IoResult::TimedOut => 0,
            IoResult::Read(data) => i32::try_from(data.len()).unwrap_or(i32::MAX),
            IoResult::Written(n) => i32::try_from(*n).unwrap_or(i32::MAX),
            IoResult::Error(errno) => -errno,
        }
    }
}

/// Completion entry produced by a driver.
#[derive(Debug)]
pub struct IoCompletion {
    /// Request ID.
    pub id: RequestId,
    /// Result of the operation.
    pub result: IoResult,
}

/// Configuration for the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Maximum time a single driver poll may block.
    pub poll_timeout: Duration,
    /// Maximum number of requests in flight.
    pub max_pending: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            max_pending: 1024,
        }
    }
}

/// Event loop error.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// The loop has been closed.
    #[error("event loop is closed")]
    Closed,
    /// Close attempted with requests still in flight.
    #[error("event loop has {pending} request(s) in flight")]
    Busy {
        /// Requests in flight.
        pending: usize,
    },
    /// Submission would exceed `max_pending`.
    #[error("too many pending requests (limit {limit})")]
    TooManyPending {
        /// Configured limit.
        limit: usize,
    },
    /// No such request in flight.
    #[error("unknown request {0}")]
    UnknownRequest(RequestId),
    /// The driver failed.
    #[error("driver error: {0}")]
    Driver(#[from] io::Error),
}

impl ReactorError {
    /// Errno equivalent of this error.
    pub fn errno(&self) -> i32 {
        match self {
            ReactorError::Closed => libc::EBADF,
            ReactorError::Busy { .. } => libc::EBUSY,
            ReactorError::TooManyPending { .. } => libc::EAGAIN,
            ReactorError::UnknownRequest(_) => libc::ENOENT,
            ReactorError::Driver(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<ReactorError> for Exception {
    fn from(err: ReactorError) -> Self {
        Exception::new(-err.errno(), err.to_string())
    }
}

// ============================================================================
// Drivers
// ============================================================================

/// Backend producing completions.
pub trait IoDriver {
    /// Start an operation.
    fn submit(&mut self, id: RequestId, op: IoOp) -> io::Result<()>;

    /// Collect finished operations, blocking at most `timeout`.
    fn poll(&mut self, timeout: Duration) -> io::Result<Vec<IoCompletion>>;

    /// Stop tracking an operation. Returns whether it was pending.
    fn cancel(&mut self, id: RequestId) -> bool;

    /// Whether some operation will complete without outside help.
    fn has_pending(&self) -> bool;
}

/// Driver running everything on the loop thread.
#[derive(Debug, Default)]
pub struct BlockingDriver {
    /// File operations, executed on the next poll.
    queued: VecDeque<(RequestId, IoOp)>,
    /// Timer deadlines; entries whose ID left `timers` are stale.
    deadlines: BinaryHeap<Reverse<(Instant, RequestId)>>,
    timers: HashSet<RequestId>,
    manual: HashSet<RequestId>,
}

impl BlockingDriver {
    /// Create a new blocking driver.
    pub fn new() -> Self {
        Self::default()
    }

    fn execute(op: &IoOp) -> IoResult {
        match op {
            IoOp::ReadFile { path } => match fs::read(path) {
                Ok(data) => IoResult::Read(data),
                Err(e) => IoResult::Error(errno_of(&e)),
            },
            IoOp::WriteFile { path, data } => match fs::write(path, data) {
                Ok(()) => IoResult::Written(data.len()),
                Err(e) => IoResult::Error(errno_of(&e)),
            },
            IoOp::Timeout { .. } => IoResult::TimedOut,
            IoOp::Manual => IoResult::Error(libc::EINVAL),
        }
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if self.timers.contains(&id) {
                return Some(deadline);
            }
            self.deadlines.pop();
        }
        None
    }
}

fn errno_of(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

impl IoDriver for BlockingDriver {
    fn submit(&mut self, id: RequestId, op: IoOp) -> io::Result<()> {
        match op {
            IoOp::Timeout { duration } => {
                self.timers.insert(id);
                self.deadlines.push(Reverse((Instant::now() + duration, id)));
            }
            IoOp::Manual => {
                self.manual.insert(id);
            }
            op => self.queued.push_back((id, op)),
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> io::Result<Vec<IoCompletion>> {
        let mut completions: Vec<IoCompletion> = self
            .queued
            .drain(..)
            .map(|(id, op)| IoCompletion {
                id,
                result: Self::execute(&op),
            })
            .collect();

        if let Some(deadline) = self.next_deadline() {
            let now = Instant::now();
            if completions.is_empty() && deadline > now {
                std::thread::sleep((deadline - now).min(timeout));
            }
        }
        let now = Instant::now();
        while let Some(deadline) = self.next_deadline() {
            if deadline > now {
                break;
            }
            if let Some(Reverse((_, id))) = self.deadlines.pop() {
                self.timers.remove(&id);
                completions.push(IoCompletion {
                    id,
                    result: IoResult::TimedOut,
                });
            }
        }
        Ok(completions)
    }

    fn cancel(&mut self, id: RequestId) -> bool {
        if self.timers.remove(&id) || self.manual.remove(&id) {
            return true;
        }
        let before = self.queued.len();
        self.queued.retain(|(queued, _)| *queued != id);
        self.queued.len() != before
    }

    fn has_pending(&self) -> bool {
        !self.queued.is_empty() || !self.timers.is_empty()
    }
}

// ============================================================================
// Event loop
// ============================================================================

/// Completion callback of a request.
pub type RequestCallback = Box<dyn FnOnce(&LoopHandle, RequestId, i32)>;

type Scheduled = Box<dyn FnOnce(&LoopHandle)>;

struct Request {
    op: &'static str,
    callback: Option<RequestCallback>,
    user_data: Option<Handle>,
    /// A completion is posted or being delivered.
    completing: bool,
}

struct LoopState {
    config: ReactorConfig,
    driver: Box<dyn IoDriver>,
    requests: HashMap<RequestId, Request>,
    posted: VecDeque<(RequestId, i32)>,
    scheduled: VecDeque<Scheduled>,
    outputs: HashMap<RequestId, Vec<u8>>,
    stopped: bool,
    closed: bool,
}

/// Event loop; shared through [`LoopHandle`].
pub struct EventLoop {
    state: RefCell<LoopState>,
}

impl EventLoop {
    /// Create a loop with the [`BlockingDriver`].
    #[allow(clippy::new_ret_no_self)]
    pub fn new(config: ReactorConfig) -> LoopHandle {
        Self::with_driver(config, Box::new(BlockingDriver::new()))
    }

    /// Create a loop with a custom driver.
    ///
    /// The loop is registered in the handle arena until it is closed, so it
    /// can travel as a [`Value`].
    pub fn with_driver(config: ReactorConfig, driver: Box<dyn IoDriver>) -> LoopHandle {
        let lp = Rc::new(EventLoop {
            state: RefCell::new(LoopState {
                config,
                driver,
                requests: HashMap::new(),
                posted: VecDeque::new(),
                scheduled: VecDeque::new(),
                outputs: HashMap::new(),
                stopped: false,
                closed: false,
            }),
        });
        let handle = handles::insert(lp.clone());
        tracing::debug!(handle = %handle, "event loop created");
        LoopHandle { lp, handle }
    }
}

/// Shared reference to an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    lp: Rc<EventLoop>,
    handle: Handle,
}

impl LoopHandle {
    /// Resolve a loop passed as a value.
    pub fn from_value(value: Value) -> Option<LoopHandle> {
        let handle = value.as_handle()?;
        let lp = handles::get::<EventLoop>(handle)?;
        Some(LoopHandle { lp, handle })
    }

    /// This loop as a value.
    pub fn to_value(&self) -> Value {
        Value::Handle(self.handle)
    }

    fn with<R>(&self, f: impl FnOnce(&mut LoopState) -> R) -> R {
        f(&mut self.lp.state.borrow_mut())
    }

    /// Submit `op`; `callback` runs once when it completes.
    pub fn submit(
        &self,
        op: IoOp,
        callback: impl FnOnce(&LoopHandle, RequestId, i32) + 'static,
    ) -> Result<RequestId, ReactorError> {
        let id = next_request_id();
        self.with(|s| {
            if s.closed {
                return Err(ReactorError::Closed);
            }
            if s.requests.len() >= s.config.max_pending {
                return Err(ReactorError::TooManyPending {
                    limit: s.config.max_pending,
                });
            }
            let name = op.name();
            s.driver.submit(id, op)?;
            s.requests.insert(
                id,
                Request {
                    op: name,
                    callback: Some(Box::new(callback)),
                    user_data: None,
                    completing: false,
                },
            );
            tracing::trace!(request = %id, op = name, "submit");
            Ok(id)
        })
    }

    /// Attach user data to an in-flight request.
    pub fn set_user_data(&self, id: RequestId, data: Handle) -> Result<(), ReactorError> {
        self.with(|s| match s.requests.get_mut(&id) {
            Some(request) => {
                request.user_data = Some(data);
                Ok(())
            }
            None => Err(ReactorError::UnknownRequest(id)),
        })
    }

    /// User data of an in-flight request.
    pub fn user_data(&self, id: RequestId) -> Option<Handle> {
        self.with(|s| s.requests.get(&id).and_then(|r| r.user_data))
    }

    /// Detach and return the user data of a request.
    pub fn clear_user_data(&self, id: RequestId) -> Option<Handle> {
        self.with(|s| s.requests.get_mut(&id).and_then(|r| r.user_data.take()))
    }

    /// Take the data produced by a completed read.
    pub fn take_output(&self, id: RequestId) -> Option<Vec<u8>> {
        self.with(|s| s.outputs.remove(&id))
    }

    /// Post a completion for `id`; the callback runs from [`run`](Self::run).
    ///
    /// Completing a request that already has a completion on its way is a
    /// no-op.
    pub fn complete(&self, id: RequestId, status: i32) -> Result<(), ReactorError> {
        self.post(id, status).map(|_| ())
    }

    /// Cancel an in-flight request; its callback receives `-ECANCELED`.
    ///
    /// Returns `false` if the request is unknown or already completing.
    pub fn cancel(&self, id: RequestId) -> bool {
        let cancelled = matches!(self.post(id, -libc::ECANCELED), Ok(true));
        if cancelled {
            tracing::debug!(request = %id, "cancel");
        }
        cancelled
    }

    /// Queue a completion unless one is already on its way.
    fn post(&self, id: RequestId, status: i32) -> Result<bool, ReactorError> {
        self.with(|s| {
            let request = s
                .requests
                .get_mut(&id)
                .ok_or(ReactorError::UnknownRequest(id))?;
            if request.completing {
                return Ok(false);
            }
            request.completing = true;
            s.driver.cancel(id);
            s.posted.push_back((id, status));
            Ok(true)
        })
    }

    /// Run `callback` once from the loop, before any completion.
    pub fn schedule(&self, callback: impl FnOnce(&LoopHandle) + 'static) {
        self.with(|s| s.scheduled.push_back(Box::new(callback)));
    }

    /// Run until no scheduled callback, posted completion or driver work
    /// remains, or until [`stop`](Self::stop) is called.
    pub fn run(&self) -> Result<(), ReactorError> {
        if self.is_closed() {
            return Err(ReactorError::Closed);
        }
        tracing::debug!(pending = self.pending_count(), "event loop run");
        loop {
            let stopped = self.with(|s| std::mem::take(&mut s.stopped));
            if stopped {
                tracing::debug!("event loop stopped");
                return Ok(());
            }
            if let Some(callback) = self.with(|s| s.scheduled.pop_front()) {
                callback(self);
                continue;
            }
            if let Some((id, status)) = self.with(|s| s.posted.pop_front()) {
                self.dispatch(id, status);
                continue;
            }
            let timeout = self.with(|s| s.driver.has_pending().then_some(s.config.poll_timeout));
            let Some(timeout) = timeout else {
                return Ok(());
            };
            let completions = self.with(|s| s.driver.poll(timeout))?;
            self.with(|s| {
                for completion in completions {
                    let status = completion.result.status();
                    let Some(request) = s.requests.get_mut(&completion.id) else {
                        continue;
                    };
                    if request.completing {
                        continue;
                    }
                    request.completing = true;
                    if let IoResult::Read(data) = completion.result {
                        s.outputs.insert(completion.id, data);
                    }
                    s.posted.push_back((completion.id, status));
                }
            });
        }
    }

    fn dispatch(&self, id: RequestId, status: i32) {
        let callback = self.with(|s| s.requests.get_mut(&id).and_then(|r| r.callback.take()));
        let Some(callback) = callback else {
            tracing::trace!(request = %id, "completion for finished request ignored");
            return;
        };
        tracing::trace!(request = %id, status, "complete");
        callback(self, id, status);
        self.with(|s| s.requests.remove(&id));
    }

    /// Make the current [`run`](Self::run) return after the callback in
    /// progress.
    pub fn stop(&self) {
        self.with(|s| s.stopped = true);
    }

    /// Close the loop. Fails while requests are in flight.
    pub fn close(&self) -> Result<(), ReactorError> {
        let newly_closed = self.with(|s| {
            if s.closed {
                return Ok(false);
            }
            if !s.requests.is_empty() {
                return Err(ReactorError::Busy {
                    pending: s.requests.len(),
                });
            }
            s.closed = true;
            s.outputs.clear();
            s.scheduled.clear();
            Ok(true)
        })?;
        if newly_closed {
            handles::remove(self.handle);
            tracing::info!(handle = %self.handle, "event loop closed");
        }
        Ok(())
    }

    /// Whether [`close`](Self::close) succeeded.
    pub fn is_closed(&self) -> bool {
        self.with(|s| s.closed)
    }

    /// Requests submitted and not yet completed.
    pub fn pending_count(&self) -> usize {
        self.with(|s| s.requests.len())
    }

    /// Operation names of the requests in flight, for diagnostics.
    pub fn pending_ops(&self) -> Vec<(RequestId, &'static str)> {
        self.with(|s| {
            let mut ops: Vec<_> = s.requests.iter().map(|(id, r)| (*id, r.op)).collect();
            ops.sort();
            ops
        })
    }
}

impl PartialEq for LoopHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.lp, &other.lp)
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (pending, closed) = match self.lp.state.try_borrow() {
            Ok(s) => (s.requests.len(), s.closed),
            Err(_) => (0, false),
        };
        f.debug_struct("LoopHandle")
            .field("handle", &self.handle)
            .field("pending", &pending)
            .field("closed", &closed)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_request_id() {
        let id1 = next_request_id();
        let id2 = next_request_id();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_timer_completes_with_zero() {
        let lp = EventLoop::new(ReactorConfig::default());
        let seen = Rc::new(Cell::new(None));
        let out = seen.clone();
        lp.submit(
            IoOp::Timeout {
                duration: Duration::from_millis(1),
            },
            move |_, _, status| out.set(Some(status)),
        )
        .unwrap();
        assert_eq!(lp.pending_count(), 1);
        lp.run().unwrap();
        assert_eq!(seen.get(), Some(0));
        assert_eq!(lp.pending_count(), 0);
        lp.close().unwrap();
    }

    #[test]
    fn test_manual_request_completion_order() {
        let lp = EventLoop::new(ReactorConfig::default());
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut ids = Vec::new();
        for _ in 0..3 {
            let order = order.clone();
            ids.push(
                lp.submit(IoOp::Manual, move |_, id, status| {
                    order.borrow_mut().push((id, status))
                })
                .unwrap(),
            );
        }
        for (n, id) in ids.iter().rev().enumerate() {
            lp.complete(*id, n as i32).unwrap();
        }
        lp.run().unwrap();
        let expected: Vec<_> = ids.iter().rev().enumerate().map(|(n, id)| (*id, n as i32)).collect();
        assert_eq!(*order.borrow(), expected);
        lp.close().unwrap();
    }

    #[test]
    fn test_cancel_delivers_ecanceled_once() {
        let lp = EventLoop::new(ReactorConfig::default());
        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = calls.clone();
        let id = lp
            .submit(IoOp::Manual, move |_, _, status| seen.borrow_mut().push(status))
            .unwrap();
        assert!(lp.cancel(id));
        assert!(!lp.cancel(id));
        lp.complete(id, 5).unwrap();
        lp.run().unwrap();
        assert_eq!(*calls.borrow(), vec![-libc::ECANCELED]);
        assert!(!lp.cancel(id));
        lp.close().unwrap();
    }

    #[test]
    fn test_close_busy_and_closed() {
        let lp = EventLoop::new(ReactorConfig::default());
        let id = lp.submit(IoOp::Manual, |_, _, _| {}).unwrap();
        lp.run().unwrap();
        assert!(matches!(lp.close(), Err(ReactorError::Busy { pending: 1 })));
        assert_eq!(lp.pending_ops(), vec![(id, "manual")]);
        lp.cancel(id);
        lp.run().unwrap();
        lp.close().unwrap();
        assert!(lp.is_closed());
        assert!(matches!(
            lp.submit(IoOp::Manual, |_, _, _| {}),
            Err(ReactorError::Closed)
        ));
        assert!(LoopHandle::from_value(lp.to_value()).is_none());
    }

    #[test]
    fn test_max_pending() {
        let config = ReactorConfig {
            max_pending: 1,
            ..ReactorConfig::default()
        };
        let lp = EventLoop::new(config);
        let id = lp.submit(IoOp::Manual, |_, _, _| {}).unwrap();
        assert!(matches!(
            lp.submit(IoOp::Manual, |_, _, _| {}),
            Err(ReactorError::TooManyPending { limit: 1 })
        ));
        lp.cancel(id);
        lp.run().unwrap();
        lp.close().unwrap();
    }

    #[test]
    fn test_schedule_runs_before_completions_and_user_data() {
        let lp = EventLoop::new(ReactorConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let data = Handle::next();
        let seen = log.clone();
        let id = lp
            .submit(IoOp::Manual, move |lp, id, _| {
                seen.borrow_mut().push(format!("complete:{}", lp.user_data(id).is_some()))
            })
            .unwrap();
        lp.set_user_data(id, data).unwrap();
        lp.complete(id, 0).unwrap();
        let first = log.clone();
        lp.schedule(move |_| first.borrow_mut().push("scheduled".to_string()));
        lp.run().unwrap();
        assert_eq!(*log.borrow(), vec!["scheduled", "complete:true"]);
        assert!(lp.user_data(id).is_none());
        lp.close().unwrap();
    }

    #[test]
    fn test_stop_returns_early() {
        let lp = EventLoop::new(ReactorConfig::default());
        let ran = Rc::new(Cell::new(0));
        let count = ran.clone();
        lp.schedule(|lp| lp.stop());
        lp.schedule(move |_| count.set(count.get() + 1));
        lp.run().unwrap();
        assert_eq!(ran.get(), 0);
        lp.run().unwrap();
        assert_eq!(ran.get(), 1);
        lp.close().unwrap();
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        let lp = EventLoop::new(ReactorConfig::default());
        let statuses = Rc::new(RefCell::new(Vec::new()));
        let seen = statuses.clone();
        let read_path = path.clone();
        lp.submit(
            IoOp::WriteFile {
                path: path.clone(),
                data: b"hello".to_vec(),
            },
            move |lp, _, status| {
                seen.borrow_mut().push(status);
                let seen = seen.clone();
                lp.submit(IoOp::ReadFile { path: read_path }, move |lp, id, status| {
                    seen.borrow_mut().push(status);
                    assert_eq!(lp.take_output(id).as_deref(), Some(&b"hello"[..]));
                })
                .unwrap();
            },
        )
        .unwrap();
        lp.run().unwrap();
        assert_eq!(*statuses.borrow(), vec![5, 5]);
        lp.close().unwrap();
    }

    #[test]
    fn test_missing_file_is_negative_errno() {
        let dir = tempfile::tempdir().unwrap();
        let lp = EventLoop::new(ReactorConfig::default());
        let status = Rc::new(Cell::new(0));
        let out = status.clone();
        lp.submit(
            IoOp::ReadFile {
                path: dir.path().join("missing"),
            },
            move |_, _, s| out.set(s),
        )
        .unwrap();
        lp.run().unwrap();
        assert_eq!(status.get(), -libc::ENOENT);
        lp.close().unwrap();
    }

    #[test]
    fn test_reactor_error_to_exception() {
        let exn: Exception = ReactorError::Busy { pending: 2 }.into();
        assert_eq!(exn.code, -libc::EBUSY);
        assert!(exn.message.contains("2 request"));
    }
}
