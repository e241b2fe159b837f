//! # Handle Arena
//!
//! Thread-local registry mapping opaque [`Handle`]s to heap objects.
//!
//! ## Design
//!
//! A [`Value`](crate::Value) can only carry 64 bits, so anything larger than a
//! scalar crosses a handler boundary as a handle into this arena. Objects are
//! stored as `Rc<dyn Any>` and recovered with a typed lookup, so a handle of
//! the wrong type is detected instead of reinterpreted.
//!
//! Handles come from a process-wide counter and are never reused; other
//! registries (the outstanding-request table) draw from the same counter so
//! every handle is unique regardless of which table owns it.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::fatal::{fatal, FatalKind};
use crate::value::Value;

/// Opaque pointer-sized handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

/// Global handle counter.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl Handle {
    /// Allocate a fresh, never before used handle.
    pub fn next() -> Self {
        Handle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuild a handle from its raw representation.
    pub const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    /// Get the raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

thread_local! {
    static ARENA: RefCell<HashMap<Handle, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Store an object and return its handle.
pub fn insert<T: 'static>(object: Rc<T>) -> Handle {
    let handle = Handle::next();
    ARENA.with(|arena| {
        arena.borrow_mut().insert(handle, object as Rc<dyn Any>);
    });
    handle
}

/// Look up an object by handle.
///
/// Returns `None` if the handle is unknown or refers to a different type.
pub fn get<T: 'static>(handle: Handle) -> Option<Rc<T>> {
    let object = ARENA
        .try_with(|arena| arena.borrow().get(&handle).cloned())
        .ok()
        .flatten()?;
    object.downcast::<T>().ok()
}

/// Remove an object from the arena.
///
/// Returns `true` if the handle was live. Safe to call during thread teardown.
pub fn remove(handle: Handle) -> bool {
    let removed = ARENA
        .try_with(|arena| arena.borrow_mut().remove(&handle))
        .ok()
        .flatten();
    // Drop outside the borrow; the object may own other handles.
    removed.is_some()
}

/// Number of live handles on this thread.
pub fn live() -> usize {
    ARENA.try_with(|arena| arena.borrow().len()).unwrap_or(0)
}

/// Resolve a value that must be a handle to a `T`.
///
/// A value of any other shape is a malformed argument and is fatal.
pub fn expect<T: 'static>(value: Value, what: &str) -> Rc<T> {
    let resolved = value.as_handle().and_then(get::<T>);
    match resolved {
        Some(object) => object,
        None => fatal(
            FatalKind::InvalidArgument,
            format!("expected a handle to {what}, got {value:?}"),
        ),
    }
}
