//! # Cancellation Scopes
//!
//! Scopes attribute outstanding requests to the dynamic extent that issued
//! them.
//!
//! # Design
//!
//! A scope is an immutable node pointing at its parent. The current scope is
//! an [`Implicit`] binding, so entering a nested scope rebinds it for the
//! extent of a body and leaving (normally, by failure, or by the body being
//! discarded) restores the enclosing binding. The root is represented by
//! `None`.
//!
//! Cancellation is cooperative: nothing here interrupts a computation. A
//! consumer walks the request registry and filters by [`is_within`]; see
//! [`cancel_within`](crate::async_io::cancel_within).
//!
//! # Example
//!
//! ```rust,ignore
//! use blood_effects::cancellation::{current_scope, is_within, with_cancel_scope};
//!
//! with_cancel_scope(|a| async move {
//!     with_cancel_scope(move |b| async move {
//!         assert!(b.is_within(&a));
//!         Ok(Value::Null)
//!     }).await
//! }).await
//! ```

use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::effect::EffectDecl;
use crate::exception::Outcome;
use crate::frame::Handled;
use crate::handles;
use crate::implicit::Implicit;
use crate::value::Value;

/// Counter for generating unique scope IDs.
static SCOPE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

static CANCEL_SCOPE_DECL: EffectDecl = EffectDecl::new("cancel_scope", &["get"]);

/// Binding of the current scope.
static CANCEL_SCOPE: Implicit = Implicit::new(&CANCEL_SCOPE_DECL);

struct ScopeNode {
    id: u64,
    parent: Option<Scope>,
}

/// A cancellation scope.
#[derive(Clone)]
pub struct Scope(Rc<ScopeNode>);

impl Scope {
    fn new(parent: Option<Scope>) -> Self {
        Scope(Rc::new(ScopeNode {
            id: SCOPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            parent,
        }))
    }

    /// Unique scope ID.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Enclosing scope, `None` when this scope sits directly under the root.
    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    /// Number of scopes between this one and the root, counting itself.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self.parent();
        while let Some(scope) = current {
            depth += 1;
            current = scope.parent();
        }
        depth
    }

    /// Whether this scope is `ancestor` or nested inside it.
    pub fn is_within(&self, ancestor: &Scope) -> bool {
        is_within(Some(self), Some(ancestor))
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id())
            .field("parent", &self.parent().map(Scope::id))
            .finish()
    }
}

/// Whether walking up from `scope` reaches `ancestor` before the root.
///
/// Every scope is within the root (`ancestor == None`), and a scope is
/// within itself.
pub fn is_within(scope: Option<&Scope>, ancestor: Option<&Scope>) -> bool {
    let Some(ancestor) = ancestor else {
        return true;
    };
    let mut current = scope;
    while let Some(s) = current {
        if s == ancestor {
            return true;
        }
        current = s.parent();
    }
    false
}

/// The innermost scope, `None` at the root or outside any binding.
pub async fn current_scope() -> Option<Scope> {
    let bound = CANCEL_SCOPE.try_get().await?;
    let handle = bound.as_handle()?;
    handles::get::<ScopeNode>(handle).map(Scope)
}

/// Run `body` inside a new scope nested in the current one.
pub async fn with_cancel_scope<F, Fut>(body: F) -> Outcome
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = Outcome> + 'static,
{
    let scope = Scope::new(current_scope().await);
    tracing::trace!(scope = scope.id(), depth = scope.depth(), "enter cancel scope");
    let handle = handles::insert(scope.0.clone());
    CANCEL_SCOPE.with_owned(handle, move || body(scope)).await
}

/// Run `body` with the current scope rebound to the root.
pub fn with_outer_cancel_scope<F, Fut>(body: F) -> Handled
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Outcome> + 'static,
{
    CANCEL_SCOPE.with(Value::Null, body)
}
