//! # Propagating Failures
//!
//! Application-level errors raised inside handled computations. They flow as
//! the `Err` side of an [`Outcome`] through handler frames, so `?` propagates
//! them and an enclosing boundary may catch them.

use thiserror::Error;

use nix::errno::Errno;

use crate::value::Value;

/// Result of a handled computation.
pub type Outcome = Result<Value, Exception>;

/// Structured exception carrying a code and a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct Exception {
    /// Error code; negative errno values for reactor failures.
    pub code: i32,
    /// Human readable description.
    pub message: String,
}

impl Exception {
    /// Create an exception.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Exception for a negative reactor status.
    pub fn from_status(status: i32) -> Self {
        Self::new(status, status_message(status))
    }

    /// Exception for a negative reactor status with context.
    pub fn from_status_with(status: i32, context: &str) -> Self {
        Self::new(status, format!("{}: {}", context, status_message(status)))
    }
}

/// Describe a reactor status code.
pub fn status_message(status: i32) -> String {
    if status >= 0 {
        return "success".to_string();
    }
    Errno::from_raw(status.saturating_neg()).desc().to_string()
}

/// Raise an exception if `status` is negative, otherwise pass it through.
pub fn check_status(status: i32) -> Result<i32, Exception> {
    if status < 0 {
        Err(Exception::from_status(status))
    } else {
        Ok(status)
    }
}

/// Like [`check_status`], prefixing the message with `context`.
pub fn check_status_msg(status: i32, context: &str) -> Result<i32, Exception> {
    if status < 0 {
        Err(Exception::from_status_with(status, context))
    } else {
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::libc;

    #[test]
    fn test_check_status_passes_non_negative() {
        assert_eq!(check_status(0), Ok(0));
        assert_eq!(check_status(17), Ok(17));
    }

    #[test]
    fn test_check_status_raises() {
        let err = check_status(-libc::ENOENT).unwrap_err();
        assert_eq!(err.code, -libc::ENOENT);
        assert!(err.message.to_lowercase().contains("no such file"));
    }

    #[test]
    fn test_context_prefix() {
        let err = check_status_msg(-libc::ECANCELED, "timer").unwrap_err();
        assert!(err.message.starts_with("timer: "));
        assert_eq!(err.code, -libc::ECANCELED);
    }
}
