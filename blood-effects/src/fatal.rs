//! # Fatal Runtime Errors
//!
//! Contract violations of the effect runtime are not recoverable locally.
//! They are reported through a single process-wide hook and never surface as
//! an [`Exception`](crate::Exception).
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use blood_effects::fatal::{register_on_fatal, FatalError};
//!
//! // Turn fatal errors into panics, e.g. inside a test harness.
//! register_on_fatal(Some(Arc::new(|err: &FatalError| {
//!     std::panic::panic_any(err.clone())
//! })));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Counter for fatal events.
static FATAL_COUNT: AtomicU64 = AtomicU64::new(0);

/// Callback invoked on fatal errors.
pub type FatalHook = Arc<dyn Fn(&FatalError) + Send + Sync>;

/// Registered fatal hook; `None` selects the default (print and exit).
static ON_FATAL: RwLock<Option<FatalHook>> = parking_lot::const_rwlock(None);

/// Category of a fatal error, mirroring the errno class it corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalKind {
    /// Allocation failed while capturing or packing arguments (`ENOMEM`).
    OutOfMemory,
    /// A resumption was used after it was consumed, outside its permitted
    /// extent, or was not produced by this runtime (`EFAULT`).
    InvalidResumption,
    /// A resume style the operation kind forbids (`ENOTSUP`).
    NotSupported,
    /// No enclosing handler for a yielded operation (`ENOSYS`).
    NoHandler,
    /// Malformed arguments (`EINVAL`).
    InvalidArgument,
}

impl FatalKind {
    /// Errno value associated with this kind.
    pub fn errno(&self) -> i32 {
        use nix::libc;
        match self {
            FatalKind::OutOfMemory => libc::ENOMEM,
            FatalKind::InvalidResumption => libc::EFAULT,
            FatalKind::NotSupported => libc::ENOTSUP,
            FatalKind::NoHandler => libc::ENOSYS,
            FatalKind::InvalidArgument => libc::EINVAL,
        }
    }

    /// Short name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FatalKind::OutOfMemory => "out of memory",
            FatalKind::InvalidResumption => "invalid resumption",
            FatalKind::NotSupported => "not supported",
            FatalKind::NoHandler => "no handler",
            FatalKind::InvalidArgument => "invalid argument",
        }
    }
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal runtime error as delivered to the hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fatal runtime error ({kind}): {message}")]
pub struct FatalError {
    /// Error category.
    pub kind: FatalKind,
    /// Human readable description.
    pub message: String,
}

/// Replace the fatal hook. `None` restores the default.
///
/// Returns the previously registered hook.
pub fn register_on_fatal(hook: Option<FatalHook>) -> Option<FatalHook> {
    std::mem::replace(&mut *ON_FATAL.write(), hook)
}

/// Number of fatal errors reported so far in this process.
pub fn fatal_count() -> u64 {
    FATAL_COUNT.load(Ordering::Relaxed)
}

/// Report a fatal error. Never returns.
///
/// The registered hook may diverge (exit, panic); if it returns, the process
/// aborts.
#[cold]
pub fn fatal(kind: FatalKind, message: impl Into<String>) -> ! {
    let err = FatalError {
        kind,
        message: message.into(),
    };
    FATAL_COUNT.fetch_add(1, Ordering::Relaxed);
    tracing::error!(kind = %err.kind, errno = err.kind.errno(), "{}", err.message);

    let hook = ON_FATAL.read().clone();
    match hook {
        Some(hook) => {
            hook(&err);
            std::process::abort()
        }
        None => {
            eprintln!("{err}");
            std::process::exit(1)
        }
    }
}
