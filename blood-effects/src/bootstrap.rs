//! # Bootstrap
//!
//! Process entry for direct-style async programs.
//!
//! [`async_main_with`] starts an event loop and schedules one callback that
//! installs, from the outside in:
//!
//! 1. the `async` handler for the loop,
//! 2. the outermost cancellation scope,
//! 3. a boundary that prints and discards an uncaught exception,
//!
//! and then calls the entry action. The loop runs until no work remains, is
//! closed, and the runtime is checked for leaked frames, resumptions,
//! requests and handles.
//!
//! The `async` handler sits outermost so a request awaited anywhere in the
//! program captures the scope and boundary frames with it.

use std::future::Future;
use std::io;

use crate::async_io::async_handler;
use crate::cancellation::with_outer_cancel_scope;
use crate::config::RuntimeConfig;
use crate::diagnostics::{self, LeakReport};
use crate::exception::{Exception, Outcome};
use crate::log;
use crate::reactor::{EventLoop, ReactorError};
use crate::runtime::drive;
use crate::value::Value;

/// Run `entry` with configuration from the environment.
///
/// See [`async_main_with`].
pub fn async_main<F, Fut>(entry: F) -> Result<LeakReport, ReactorError>
where
    F: FnOnce() -> Fut + 'static,
    Fut: Future<Output = Outcome> + 'static,
{
    async_main_with(&RuntimeConfig::from_env(), entry)
}

/// Run `entry` on a fresh event loop and return the shutdown leak report.
///
/// An exception escaping `entry` is reported on stderr and discarded; it does
/// not stop the loop. The returned report is clean when everything the
/// program created was released.
pub fn async_main_with<F, Fut>(config: &RuntimeConfig, entry: F) -> Result<LeakReport, ReactorError>
where
    F: FnOnce() -> Fut + 'static,
    Fut: Future<Output = Outcome> + 'static,
{
    log::init(&config.log);

    let lp = EventLoop::new(config.reactor.clone());
    lp.schedule(move |lp| {
        let outcome = drive(async_handler(lp, move || {
            with_outer_cancel_scope(move || async move {
                if let Err(exn) = entry().await {
                    report_uncaught(&exn);
                }
                Ok(Value::Null)
            })
        }));
        if let Err(exn) = outcome {
            report_uncaught(&exn);
        }
    });

    tracing::info!(
        max_pending = config.reactor.max_pending,
        poll_timeout_ms = config.reactor.poll_timeout.as_millis() as u64,
        "starting event loop"
    );
    lp.run()?;
    if let Err(err) = lp.close() {
        tracing::warn!(error = %err, pending = ?lp.pending_ops(), "event loop not closed cleanly");
    }

    let report = if config.diagnostics.check_leaks {
        diagnostics::check_memory(&mut io::stderr()).unwrap_or_else(|_| diagnostics::leak_report())
    } else {
        diagnostics::leak_report()
    };
    if config.diagnostics.print_stats {
        if let Err(err) = diagnostics::print_stats(&mut io::stderr()) {
            tracing::warn!(error = %err, "failed to print runtime statistics");
        }
    }
    tracing::info!(clean = report.is_clean(), "event loop finished");
    Ok(report)
}

fn report_uncaught(exn: &Exception) {
    tracing::error!(code = exn.code, "uncaught exception: {}", exn.message);
    eprintln!("uncaught exception: {exn}");
}
