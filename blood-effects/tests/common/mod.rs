//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::panic;
use std::sync::{Arc, Once};

use blood_effects::{register_on_fatal, FatalError, FatalKind};

/// Route fatal errors into a panic carrying the [`FatalError`].
pub fn panic_on_fatal() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        register_on_fatal(Some(Arc::new(|err: &FatalError| panic::panic_any(err.clone()))));
    });
}

/// Run `f` on a fresh thread and return the fatal error it raised.
///
/// The thread is abandoned after the fatal error, so its runtime state never
/// leaks into another test.
pub fn expect_fatal<F>(f: F) -> FatalError
where
    F: FnOnce() + Send + 'static,
{
    panic_on_fatal();
    let payload = match std::thread::spawn(f).join() {
        Ok(()) => panic!("expected a fatal runtime error"),
        Err(payload) => payload,
    };
    match payload.downcast::<FatalError>() {
        Ok(err) => *err,
        Err(_) => panic!("thread panicked without a fatal runtime error"),
    }
}

/// Like [`expect_fatal`], also checking the kind.
pub fn expect_fatal_kind<F>(kind: FatalKind, f: F) -> FatalError
where
    F: FnOnce() + Send + 'static,
{
    let err = expect_fatal(f);
    assert_eq!(err.kind, kind, "unexpected fatal error: {err}");
    err
}

/// Run `f` on a fresh thread, so it starts with empty runtime state.
pub fn isolated<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    match std::thread::spawn(f).join() {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}
