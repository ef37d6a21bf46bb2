//! Cycle-outcome instrumentation.
//!
//! `confd_scheduler::Metrics` is the trait every resource cycle reports
//! through; this module supplies the counting implementation the
//! supervisor wires into `Scheduler::spawn` and exposes through `/metrics`.
//! Emitting these in the real Prometheus text-exposition format (histograms,
//! labels) is out of scope — this is the minimal counter set `/metrics`
//! needs to be non-fake.

use std::sync::atomic::{AtomicU64, Ordering};

pub use confd_scheduler::{Metrics, NullMetrics};

/// In-process counters for cycle outcomes, read by the `/metrics` endpoint.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    committed: AtomicU64,
    unchanged: AtomicU64,
    failed: AtomicU64,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders the current counters in Prometheus's plain text-exposition
    /// format.
    pub fn render(&self) -> String {
        format!(
            "confd_up 1\nconfd_cycles_committed_total {}\nconfd_cycles_unchanged_total {}\nconfd_cycles_failed_total {}\n",
            self.committed.load(Ordering::Relaxed),
            self.unchanged.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

impl Metrics for CountingMetrics {
    fn cycle_committed(&self, _resource: &str) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    fn cycle_unchanged(&self, _resource: &str) {
        self.unchanged.fetch_add(1, Ordering::Relaxed);
    }

    fn cycle_failed(&self, _resource: &str, _error: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_each_outcome_kind() {
        let metrics = CountingMetrics::new();
        metrics.cycle_committed("a");
        metrics.cycle_committed("a");
        metrics.cycle_unchanged("a");
        metrics.cycle_failed("a", "boom");

        let rendered = metrics.render();
        assert!(rendered.contains("confd_cycles_committed_total 2"));
        assert!(rendered.contains("confd_cycles_unchanged_total 1"));
        assert!(rendered.contains("confd_cycles_failed_total 1"));
    }
}
