//! # Blood Effects
//!
//! Algebraic effect handlers for Rust, and an asynchronous I/O adapter that
//! turns a callback-driven reactor into direct-style code.
//!
//! - **Effect Runtime**: handler frames, yields, and one-shot resumptions with
//!   six declared resumption kinds
//! - **Async Adapter**: the `async` effect, an outstanding-request registry,
//!   and completion delivery from the reactor
//! - **Channel Variant**: a forwarding handler that turns completions into a
//!   queue for interleaved computations
//! - **Cancellation Scopes**: dynamically scoped scope chains used to attribute
//!   requests to the code that issued them
//! - **Bootstrap**: reactor startup, the outermost boundary, and the shutdown
//!   leak check
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         BLOOD EFFECTS                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │  Bootstrap   │  │   Channel    │  │ Cancellation │           │
//! │  │(bootstrap.rs)│  │ (channel.rs) │  │(cancellation)│           │
//! │  └──────────────┘  └──────────────┘  └──────────────┘           │
//! │         │                 │                 │                   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │ Async Adapter│  │   Reactor    │  │   Implicit   │           │
//! │  │ (async_io.rs)│──│ (reactor.rs) │  │ (implicit.rs)│           │
//! │  └──────────────┘  └──────────────┘  └──────────────┘           │
//! │         │                                   │                   │
//! │         └─────────────────┬─────────────────┘                   │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │   Handlers   │  │    Frames    │  │ Resumptions  │           │
//! │  │ (handler.rs) │  │  (frame.rs)  │  │ (resume.rs)  │           │
//! │  └──────────────┘  └──────────────┘  └──────────────┘           │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use blood_effects::{drive, install, perform, Effect, EffectDecl, HandlerDef, OpKind, OpTag, Value};
//!
//! static ECHO: EffectDecl = EffectDecl::new("echo", &["echo"]);
//! static ECHO_OP: OpTag = OpTag::new(&ECHO, 0);
//!
//! let def = HandlerDef::builder(Effect::of(&ECHO))
//!     .op_sync(OpKind::Tail, ECHO_OP, |r, local, arg| {
//!         r.resume_tail(local, Value::Int(arg.expect_int() * 2))
//!     })
//!     .build();
//! let out = drive(install(&def, Value::Null, |arg| async move {
//!     Ok(perform(ECHO_OP, arg).await)
//! }, Value::Int(7)));
//! assert_eq!(out, Ok(Value::Int(14)));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod alloc;
pub mod async_io;
pub mod bootstrap;
pub mod cancellation;
pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod effect;
pub mod exception;
pub mod fatal;
pub mod frame;
pub mod handler;
pub mod handles;
pub mod implicit;
pub mod log;
pub mod perform;
pub mod reactor;
pub mod resume;
pub mod runtime;
pub mod value;

// Re-exports
pub use async_io::{async_await, async_handler, async_loop, await_request, cancel_within, outstanding_requests};
pub use bootstrap::{async_main, async_main_with};
pub use cancellation::{current_scope, is_within, with_cancel_scope, with_outer_cancel_scope, Scope};
pub use channel::{channel_async_handler, interleave, Action, Channel, ChannelElem};
pub use config::{ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use diagnostics::{check_memory, print_stats, stats, LeakReport, Stats};
pub use effect::{Effect, EffectDecl, OpKind, OpTag};
pub use exception::{check_status, check_status_msg, Exception, Outcome};
pub use fatal::{fatal, register_on_fatal, FatalError, FatalHook, FatalKind};
pub use frame::{install, Handled};
pub use handler::{HandlerDef, HandlerDefBuilder};
pub use handles::Handle;
pub use implicit::Implicit;
pub use log::{LogConfig, LogFormat, LogLevel};
pub use perform::{perform, perform_n, yield_args, YieldArgs};
pub use reactor::{EventLoop, IoDriver, IoOp, LoopHandle, ReactorConfig, ReactorError, RequestId};
pub use resume::Resumption;
pub use runtime::{drive, is_handled};
pub use value::Value;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
