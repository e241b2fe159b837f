//! # Diagnostics
//!
//! Per-thread counters for frames, resumptions and outstanding requests, a
//! stats dump, and the leak check run at shutdown.

use std::cell::RefCell;
use std::io::{self, Write};

use crate::alloc;
use crate::handles;

/// Runtime counters for the current thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Handlers installed with [`install`](crate::install).
    pub handlers_installed: u64,
    /// Frame instances alive (installed or resumed, not yet finished).
    pub frames_live: u64,
    /// Highest value `frames_live` reached.
    pub frames_peak: u64,
    /// Operations yielded.
    pub yields: u64,
    /// Tail-noop operations run in place at the yield site.
    pub tail_fast_paths: u64,
    /// Operations dispatched by a frame.
    pub dispatches: u64,
    /// Bodies discarded by never-resume operations.
    pub noresume_unwinds: u64,
    /// Bodies captured for tail operations.
    pub captures_tail: u64,
    /// Bodies captured for scoped operations.
    pub captures_scoped: u64,
    /// Bodies captured for general operations.
    pub captures_general: u64,
    /// Resumption handles alive.
    pub resumptions_live: u64,
    /// Successful resume calls.
    pub resumes: u64,
    /// Resumptions discarded without resuming.
    pub resumptions_released: u64,
    /// Requests registered with an async handler.
    pub requests_registered: u64,
    /// Completions delivered to a live request.
    pub requests_completed: u64,
    /// Requests registered and not yet completed.
    pub requests_outstanding: u64,
    /// Completions ignored because the request was already detached.
    pub duplicate_completions: u64,
}

thread_local! {
    static STATS: RefCell<Stats> = RefCell::new(Stats::default());
}

/// Update the counters. Silently skipped during thread teardown.
pub(crate) fn record(f: impl FnOnce(&mut Stats)) {
    let _ = STATS.try_with(|stats| {
        if let Ok(mut stats) = stats.try_borrow_mut() {
            f(&mut stats);
        }
    });
}

/// Snapshot of the current thread's counters.
pub fn stats() -> Stats {
    STATS.try_with(|stats| *stats.borrow()).unwrap_or_default()
}

/// Write the counters in a human readable form.
pub fn print_stats(out: &mut dyn Write) -> io::Result<()> {
    let s = stats();
    let a = alloc::alloc_stats();
    writeln!(out, "effect runtime statistics")?;
    writeln!(out, "  handlers installed:    {}", s.handlers_installed)?;
    writeln!(out, "  frames live / peak:    {} / {}", s.frames_live, s.frames_peak)?;
    writeln!(out, "  yields:                {}", s.yields)?;
    writeln!(out, "  tail fast paths:       {}", s.tail_fast_paths)?;
    writeln!(out, "  dispatches:            {}", s.dispatches)?;
    writeln!(out, "  never-resume unwinds:  {}", s.noresume_unwinds)?;
    writeln!(
        out,
        "  captures (tail/scoped/general): {} / {} / {}",
        s.captures_tail, s.captures_scoped, s.captures_general
    )?;
    writeln!(out, "  resumptions live:      {}", s.resumptions_live)?;
    writeln!(out, "  resumes:               {}", s.resumes)?;
    writeln!(out, "  resumptions released:  {}", s.resumptions_released)?;
    writeln!(
        out,
        "  requests registered / completed / outstanding: {} / {} / {}",
        s.requests_registered, s.requests_completed, s.requests_outstanding
    )?;
    writeln!(out, "  duplicate completions: {}", s.duplicate_completions)?;
    writeln!(out, "  live handles:          {}", handles::live())?;
    writeln!(
        out,
        "  allocator (hooked): {} allocations, {} frees, {} bytes live",
        a.allocations, a.deallocations, a.live_bytes
    )?;
    Ok(())
}

/// Resources still held at the time of a leak check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeakReport {
    /// Frame instances not yet finished or dropped.
    pub frames: u64,
    /// Resumption handles not yet consumed or released.
    pub resumptions: u64,
    /// Requests registered but never completed.
    pub requests: u64,
    /// Objects left in the handle arena.
    pub handles: usize,
}

impl LeakReport {
    /// Whether nothing leaked.
    pub fn is_clean(&self) -> bool {
        *self == LeakReport::default()
    }
}

/// Compute the current leak report without printing.
pub fn leak_report() -> LeakReport {
    let s = stats();
    LeakReport {
        frames: s.frames_live,
        resumptions: s.resumptions_live,
        requests: s.requests_outstanding,
        handles: handles::live(),
    }
}

/// Check that all resumptions were released and all requests completed,
/// writing a description of anything that leaked.
pub fn check_memory(out: &mut dyn Write) -> io::Result<LeakReport> {
    let report = leak_report();
    if report.is_clean() {
        tracing::debug!("leak check passed");
        return Ok(report);
    }
    tracing::warn!(
        frames = report.frames,
        resumptions = report.resumptions,
        requests = report.requests,
        handles = report.handles,
        "leak check failed"
    );
    writeln!(out, "leak check failed:")?;
    if report.frames > 0 {
        writeln!(out, "  {} handler frame(s) never finished", report.frames)?;
    }
    if report.resumptions > 0 {
        writeln!(out, "  {} resumption(s) never resumed or released", report.resumptions)?;
    }
    if report.requests > 0 {
        writeln!(out, "  {} request(s) never completed", report.requests)?;
    }
    if report.handles > 0 {
        writeln!(out, "  {} handle(s) still registered", report.handles)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let before = stats();
        record(|s| s.yields += 2);
        assert_eq!(stats().yields, before.yields + 2);
    }

    #[test]
    fn test_print_stats_mentions_counters() {
        let mut out = Vec::new();
        print_stats(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("handlers installed"));
        assert!(text.contains("duplicate completions"));
    }

    #[test]
    fn test_leak_report_clean_on_fresh_thread() {
        std::thread::spawn(|| {
            let mut out = Vec::new();
            let report = check_memory(&mut out).unwrap();
            assert!(report.is_clean());
            assert!(out.is_empty());
        })
        .join()
        .unwrap();
    }
}
