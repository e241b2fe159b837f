//! # Generic Values
//!
//! The fixed-size tagged scalar passed across handler boundaries.
//!
//! ## Design
//!
//! Operations, resumptions and results all traffic in [`Value`] so that a
//! handler table can be heterogeneous without generic parameters. A value is
//! `Copy` and never borrows: objects live in the [handle arena](crate::handles)
//! and travel as [`Handle`]s, which keeps every value valid no matter where the
//! suspended computation that produced it is later resumed.

use std::fmt;

use crate::effect::OpTag;
use crate::fatal::{fatal, FatalKind};
use crate::handles::Handle;

/// A tagged scalar exchanged between yield sites and handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Value {
    /// No value.
    #[default]
    Null,
    /// Signed 64-bit integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// Handle to an object in the handle arena.
    Handle(Handle),
    /// Reference to an operation identity.
    Tag(OpTag),
}

impl Value {
    /// Check for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the handle payload, if any.
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            Value::Handle(h) => Some(*h),
            _ => None,
        }
    }

    /// Get the tag payload, if any.
    pub fn as_tag(&self) -> Option<OpTag> {
        match self {
            Value::Tag(t) => Some(*t),
            _ => None,
        }
    }

    /// Get the integer payload; any other shape is a fatal malformed argument.
    pub fn expect_int(self) -> i64 {
        match self {
            Value::Int(i) => i,
            other => fatal(
                FatalKind::InvalidArgument,
                format!("expected an integer value, got {other:?}"),
            ),
        }
    }

    /// Get the boolean payload; any other shape is a fatal malformed argument.
    pub fn expect_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            other => fatal(
                FatalKind::InvalidArgument,
                format!("expected a boolean value, got {other:?}"),
            ),
        }
    }

    /// Get the handle payload; any other shape is a fatal malformed argument.
    pub fn expect_handle(self) -> Handle {
        match self {
            Value::Handle(h) => h,
            other => fatal(
                FatalKind::InvalidArgument,
                format!("expected a handle value, got {other:?}"),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Handle(h) => write!(f, "{h}"),
            Value::Tag(t) => write!(f, "{t}"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Handle(h)
    }
}

impl From<OpTag> for Value {
    fn from(t: OpTag) -> Self {
        Value::Tag(t)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}
