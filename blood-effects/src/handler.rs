//! # Handler Definitions
//!
//! A [`HandlerDef`] is the static part of a handler frame: the effect it
//! handles, its operation table, and the optional local-state hooks.
//!
//! ## Design
//!
//! Operation functions receive `(resumption, local, arg)`. Synchronous
//! functions are plain closures returning an [`Outcome`]; asynchronous ones
//! return a boxed future and may yield to outer handlers before resuming. The
//! table is indexed by operation index, so lookup is a bounds check.
//!
//! ```rust,ignore
//! let def = HandlerDef::builder(Effect::of(&STATE))
//!     .op_sync(OpKind::TailNoop, GET, |r, local, _| r.resume_tail(local, local))
//!     .op_sync(OpKind::TailNoop, PUT, |r, _, arg| r.resume_tail(arg, Value::Null))
//!     .build();
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::effect::{Effect, OpKind, OpTag};
use crate::exception::Outcome;
use crate::fatal::{fatal, FatalKind};
use crate::resume::Resumption;
use crate::runtime;
use crate::value::Value;

/// Boxed future returned by asynchronous operation functions.
pub type OpFuture = Pin<Box<dyn Future<Output = Outcome>>>;

type SyncOpFn = dyn Fn(Resumption, Value, Value) -> Outcome;
type AsyncOpFn = dyn Fn(Resumption, Value, Value) -> OpFuture;

/// Operation function, synchronous or asynchronous.
#[derive(Clone)]
pub(crate) enum OpFun {
    Sync(Rc<SyncOpFn>),
    Async(Rc<AsyncOpFn>),
}

impl OpFun {
    /// Start the operation function as a future.
    pub(crate) fn invoke(&self, resumption: Resumption, local: Value, arg: Value) -> OpFuture {
        match self {
            OpFun::Sync(f) => Box::pin(std::future::ready(f(resumption, local, arg))),
            OpFun::Async(f) => f(resumption, local, arg),
        }
    }
}

/// One entry of the operation table.
#[derive(Clone)]
pub(crate) struct Operation {
    pub(crate) kind: OpKind,
    pub(crate) tag: OpTag,
    pub(crate) fun: OpFun,
}

/// Static description of a handler.
pub struct HandlerDef {
    effect: Effect,
    acquire: Option<Box<dyn Fn(Value) -> Value>>,
    release: Option<Box<dyn Fn(Value)>>,
    result: Option<Box<dyn Fn(Value, Value) -> Outcome>>,
    ops: Vec<Option<Operation>>,
}

impl HandlerDef {
    /// Start building a definition for `effect`.
    pub fn builder(effect: Effect) -> HandlerDefBuilder {
        HandlerDefBuilder {
            effect,
            acquire: None,
            release: None,
            result: None,
            ops: Vec::new(),
        }
    }

    /// Effect handled by this definition.
    pub fn effect(&self) -> Effect {
        self.effect
    }

    /// Whether the table declares `tag`.
    pub fn handles(&self, tag: OpTag) -> bool {
        self.operation(tag).is_some()
    }

    /// Declared kind of `tag`, if handled.
    pub fn kind_of(&self, tag: OpTag) -> Option<OpKind> {
        self.operation(tag).map(|op| op.kind)
    }

    pub(crate) fn operation(&self, tag: OpTag) -> Option<&Operation> {
        if tag.effect() != self.effect {
            return None;
        }
        self.ops.get(tag.index() as usize)?.as_ref()
    }

    pub(crate) fn has_acquire(&self) -> bool {
        self.acquire.is_some()
    }

    /// Duplicate local state for an additional resumption.
    pub(crate) fn acquire_local(&self, local: Value) -> Value {
        match &self.acquire {
            Some(acquire) => acquire(local),
            None => local,
        }
    }

    /// Tear down local state of a permanently discarded frame.
    pub(crate) fn release_local(&self, local: Value) {
        if runtime::cleanup_suppressed() {
            return;
        }
        if let Some(release) = &self.release {
            release(local);
        }
    }

    /// Post-process the body's return value.
    pub(crate) fn apply_result(&self, local: Value, value: Value) -> Outcome {
        match &self.result {
            Some(result) => result(local, value),
            None => Ok(value),
        }
    }
}

impl fmt::Debug for HandlerDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops: Vec<String> = self
            .ops
            .iter()
            .flatten()
            .map(|op| format!("{}:{}", op.tag.op_name(), op.kind))
            .collect();
        f.debug_struct("HandlerDef")
            .field("effect", &self.effect)
            .field("ops", &ops)
            .field("acquire", &self.acquire.is_some())
            .field("release", &self.release.is_some())
            .field("result", &self.result.is_some())
            .finish()
    }
}

/// Builder for [`HandlerDef`].
pub struct HandlerDefBuilder {
    effect: Effect,
    acquire: Option<Box<dyn Fn(Value) -> Value>>,
    release: Option<Box<dyn Fn(Value)>>,
    result: Option<Box<dyn Fn(Value, Value) -> Outcome>>,
    ops: Vec<Operation>,
}

impl HandlerDefBuilder {
    /// Set the local-state duplication function.
    pub fn acquire(mut self, f: impl Fn(Value) -> Value + 'static) -> Self {
        self.acquire = Some(Box::new(f));
        self
    }

    /// Set the local-state teardown function.
    pub fn release(mut self, f: impl Fn(Value) + 'static) -> Self {
        self.release = Some(Box::new(f));
        self
    }

    /// Set the result transform, called with `(local, body_result)`.
    pub fn result(mut self, f: impl Fn(Value, Value) -> Outcome + 'static) -> Self {
        self.result = Some(Box::new(f));
        self
    }

    /// Add a synchronous operation function.
    ///
    /// A synchronous [`OpKind::TailNoop`] function runs directly at the yield
    /// site without suspending the body.
    pub fn op_sync(
        mut self,
        kind: OpKind,
        tag: OpTag,
        f: impl Fn(Resumption, Value, Value) -> Outcome + 'static,
    ) -> Self {
        self.ops.push(Operation {
            kind,
            tag,
            fun: OpFun::Sync(Rc::new(f)),
        });
        self
    }

    /// Add an asynchronous operation function.
    pub fn op<F, Fut>(mut self, kind: OpKind, tag: OpTag, f: F) -> Self
    where
        F: Fn(Resumption, Value, Value) -> Fut + 'static,
        Fut: Future<Output = Outcome> + 'static,
    {
        let fun = move |r: Resumption, local: Value, arg: Value| -> OpFuture {
            Box::pin(f(r, local, arg))
        };
        self.ops.push(Operation {
            kind,
            tag,
            fun: OpFun::Async(Rc::new(fun)),
        });
        self
    }

    /// Validate and finish the definition.
    ///
    /// Naming an operation of another effect, an undeclared index, or the same
    /// operation twice is a malformed definition and is fatal.
    pub fn build(self) -> Rc<HandlerDef> {
        let mut table: Vec<Option<Operation>> = vec![None; self.effect.op_count()];
        for op in self.ops {
            if op.tag.effect() != self.effect || !op.tag.is_declared() {
                fatal(
                    FatalKind::InvalidArgument,
                    format!(
                        "operation {} does not belong to effect {}",
                        op.tag, self.effect
                    ),
                );
            }
            let slot = &mut table[op.tag.index() as usize];
            if slot.is_some() {
                fatal(
                    FatalKind::InvalidArgument,
                    format!("operation {} declared twice", op.tag),
                );
            }
            *slot = Some(op);
        }
        Rc::new(HandlerDef {
            effect: self.effect,
            acquire: self.acquire,
            release: self.release,
            result: self.result,
            ops: table,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectDecl;

    static READER: EffectDecl = EffectDecl::new("reader", &["ask", "local"]);
    static ASK: OpTag = OpTag::new(&READER, 0);
    static LOCAL: OpTag = OpTag::new(&READER, 1);

    #[test]
    fn test_table_lookup() {
        let def = HandlerDef::builder(Effect::of(&READER))
            .op_sync(OpKind::TailNoop, ASK, |r, local, _| r.resume_tail(local, local))
            .build();
        assert!(def.handles(ASK));
        assert!(!def.handles(LOCAL));
        assert_eq!(def.kind_of(ASK), Some(OpKind::TailNoop));
        assert_eq!(def.effect(), Effect::of(&READER));
    }

    #[test]
    fn test_result_and_acquire_defaults() {
        let def = HandlerDef::builder(Effect::of(&READER)).build();
        assert_eq!(def.apply_result(Value::Int(1), Value::Int(2)), Ok(Value::Int(2)));
        assert_eq!(def.acquire_local(Value::Int(3)), Value::Int(3));
        assert!(!def.has_acquire());

        let def = HandlerDef::builder(Effect::of(&READER))
            .result(|local, v| Ok(Value::Int(local.expect_int() + v.expect_int())))
            .acquire(|local| Value::Int(local.expect_int() * 10))
            .build();
        assert_eq!(def.apply_result(Value::Int(1), Value::Int(2)), Ok(Value::Int(3)));
        assert_eq!(def.acquire_local(Value::Int(3)), Value::Int(30));
    }

    #[test]
    fn test_debug_lists_ops() {
        let def = HandlerDef::builder(Effect::of(&READER))
            .op_sync(OpKind::General, LOCAL, |_, _, _| Ok(Value::Null))
            .build();
        let text = format!("{def:?}");
        assert!(text.contains("local:general"));
    }
}
