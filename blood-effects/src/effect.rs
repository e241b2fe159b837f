//! # Effects and Operations
//!
//! Process-wide effect identities and the operation tags derived from them.
//!
//! ## Design
//!
//! An effect is declared once as a `static` [`EffectDecl`]; its address is its
//! identity. An operation is `(effect, index)`, so dispatch compares a pointer
//! and an integer and never looks at names. Names exist for diagnostics only.
//!
//! ```rust,ignore
//! static STATE: EffectDecl = EffectDecl::new("state", &["get", "put"]);
//! static GET: OpTag = OpTag::new(&STATE, 0);
//! static PUT: OpTag = OpTag::new(&STATE, 1);
//! ```
//!
//! ## Technical References
//!
//! - [libhandler](https://github.com/koka-lang/libhandler) - effect/optag layout
//! - [Effect Handlers in Scope](https://www.cs.ox.ac.uk/people/nicolas.wu/papers/Scope.pdf)

use std::fmt;
use std::hash::{Hash, Hasher};

/// Static declaration of an effect and its operation names.
#[derive(Debug)]
pub struct EffectDecl {
    name: &'static str,
    ops: &'static [&'static str],
}

impl EffectDecl {
    /// Declare an effect. Intended for `static` items.
    pub const fn new(name: &'static str, ops: &'static [&'static str]) -> Self {
        Self { name, ops }
    }

    /// Effect name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared operation names, in index order.
    pub fn op_names(&self) -> &'static [&'static str] {
        self.ops
    }
}

/// Address-stable effect identity.
#[derive(Clone, Copy)]
pub struct Effect(&'static EffectDecl);

impl Effect {
    /// Identity of a declared effect.
    pub const fn of(decl: &'static EffectDecl) -> Self {
        Effect(decl)
    }

    /// Effect name.
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// Number of declared operations.
    pub fn op_count(&self) -> usize {
        self.0.ops.len()
    }

    /// Operation tag for `index`, if declared.
    pub fn op(&self, index: u32) -> Option<OpTag> {
        ((index as usize) < self.op_count()).then_some(OpTag {
            effect: *self,
            index,
        })
    }

    fn addr(&self) -> usize {
        self.0 as *const EffectDecl as usize
    }
}

impl PartialEq for Effect {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Effect {}

impl Hash for Effect {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Effect({})", self.0.name)
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name)
    }
}

/// Operation identity: an effect plus an operation index.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpTag {
    effect: Effect,
    index: u32,
}

impl OpTag {
    /// Tag for operation `index` of `decl`. Intended for `static` items.
    ///
    /// The index is validated when a handler definition names the tag.
    pub const fn new(decl: &'static EffectDecl, index: u32) -> Self {
        Self {
            effect: Effect(decl),
            index,
        }
    }

    /// Effect this operation belongs to.
    pub fn effect(&self) -> Effect {
        self.effect
    }

    /// Operation index within its effect.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Whether the index names a declared operation.
    pub fn is_declared(&self) -> bool {
        (self.index as usize) < self.effect.op_count()
    }

    /// Operation name, or `"<undeclared>"`.
    pub fn op_name(&self) -> &'static str {
        self.effect
            .0
            .ops
            .get(self.index as usize)
            .copied()
            .unwrap_or("<undeclared>")
    }

    /// Qualified name, `effect/op`.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Debug for OpTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpTag({}/{})", self.effect.name(), self.op_name())
    }
}

impl fmt::Display for OpTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.effect.name(), self.op_name())
    }
}

/// Resumption discipline declared per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Never resumes; the body is discarded without running handler release
    /// functions of the frames it skips.
    NoResumeX,
    /// Never resumes; the body is discarded with full cleanup.
    NoResume,
    /// Resumes at most once as its last action and never yields before that.
    TailNoop,
    /// Resumes at most once as its last action; may yield first.
    Tail,
    /// Resumes at most once, only while the operation function is running.
    Scoped,
    /// Resumes from anywhere, including after the operation function returned.
    General,
}

impl OpKind {
    /// Whether any resume call is permitted.
    pub fn can_resume(&self) -> bool {
        !matches!(self, OpKind::NoResumeX | OpKind::NoResume)
    }

    /// Whether only tail resumption is permitted.
    pub fn is_tail(&self) -> bool {
        matches!(self, OpKind::TailNoop | OpKind::Tail)
    }

    /// Short name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::NoResumeX => "noresumex",
            OpKind::NoResume => "noresume",
            OpKind::TailNoop => "tail-noop",
            OpKind::Tail => "tail",
            OpKind::Scoped => "scoped",
            OpKind::General => "general",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
