mod daily;
mod qps;

pub use daily::{DailyStats, StatKey, StatSample, StatsFilter};
pub use qps::SlidingQps;

use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// PnsMetrics — live counters for one shell
// ---------------------------------------------------------------------------

/// Per-PNS message counters: a monotone total and a 1-second sliding-window
/// rate. Updated with atomic increments on the hot path.
#[derive(Debug, Default)]
pub struct PnsMetrics {
    total: AtomicU64,
    qps: SlidingQps,
}

impl PnsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
        self.qps.record(n);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Messages counted in the last full second.
    pub fn qps(&self) -> u64 {
        self.qps.last_second()
    }

    /// Any traffic within the last `seconds`? Used by connectivity checks to
    /// distinguish `active` from `idle`.
    pub fn active_within(&self, seconds: u64) -> bool {
        self.qps.recent(seconds) > 0
    }
}
