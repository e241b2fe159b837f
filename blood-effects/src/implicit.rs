//! # Implicit Values
//!
//! Dynamically scoped values implemented as a one-operation effect.
//!
//! An implicit is bound by installing a handler for its effect around a body;
//! reading it yields the effect's `get` operation, which the innermost binding
//! answers with its local state. Leaving the body restores the enclosing
//! binding because the frame is gone, including when the body fails or is
//! discarded.
//!
//! # Example
//!
//! ```rust,ignore
//! use blood_effects::{EffectDecl, Implicit, Value};
//!
//! static DEPTH_DECL: EffectDecl = EffectDecl::new("depth", &["get"]);
//! static DEPTH: Implicit = Implicit::new(&DEPTH_DECL);
//!
//! DEPTH.with(Value::Int(1), || async {
//!     assert_eq!(DEPTH.get().await, Value::Int(1));
//!     Ok(Value::Null)
//! })
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use crate::effect::{Effect, EffectDecl, OpKind, OpTag};
use crate::exception::Outcome;
use crate::frame::{install, Handled};
use crate::handler::HandlerDef;
use crate::handles::{self, Handle};
use crate::perform::perform;
use crate::runtime;
use crate::value::Value;

thread_local! {
    /// Handler definitions per (effect, owning) pair.
    static DEFS: RefCell<HashMap<(Effect, bool), Rc<HandlerDef>>> = RefCell::new(HashMap::new());
}

/// A dynamically scoped value. The effect's operation `0` is the read.
#[derive(Debug, Clone, Copy)]
pub struct Implicit {
    decl: &'static EffectDecl,
}

impl Implicit {
    /// Implicit backed by `decl`.
    pub const fn new(decl: &'static EffectDecl) -> Self {
        Self { decl }
    }

    /// Effect that carries the binding.
    pub fn effect(&self) -> Effect {
        Effect::of(self.decl)
    }

    fn get_op(&self) -> OpTag {
        OpTag::new(self.decl, 0)
    }

    /// Read the innermost binding. Unbound reads are fatal.
    pub async fn get(self) -> Value {
        perform(self.get_op(), Value::Null).await
    }

    /// Read the innermost binding, or `None` when unbound.
    pub async fn try_get(self) -> Option<Value> {
        if !runtime::is_handled(self.effect()) {
            return None;
        }
        Some(self.get().await)
    }

    /// Run `body` with the implicit bound to `value`.
    pub fn with<F, Fut>(self, value: Value, body: F) -> Handled
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + 'static,
    {
        install(&self.def(false), value, move |_| body(), Value::Null)
    }

    /// Run `body` with the implicit bound to an arena object.
    ///
    /// The handle is removed from the arena when the binding frame is
    /// discarded, whether the body returned, failed, or was dropped.
    pub fn with_owned<F, Fut>(self, handle: Handle, body: F) -> Handled
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + 'static,
    {
        install(&self.def(true), Value::Handle(handle), move |_| body(), Value::Null)
    }

    fn def(&self, owned: bool) -> Rc<HandlerDef> {
        let key = (self.effect(), owned);
        if let Some(def) = DEFS.with(|defs| defs.borrow().get(&key).cloned()) {
            return def;
        }
        let mut builder = HandlerDef::builder(self.effect()).op_sync(
            OpKind::TailNoop,
            self.get_op(),
            |r, local, _| r.resume_tail(local, local),
        );
        if owned {
            builder = builder.release(|local| {
                if let Some(handle) = local.as_handle() {
                    handles::remove(handle);
                }
            });
        }
        let def = builder.build();
        DEFS.with(|defs| defs.borrow_mut().insert(key, def.clone()));
        def
    }
}
