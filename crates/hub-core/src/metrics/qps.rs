use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ring of per-second buckets; enough to answer "last full second" and
/// "anything recent" without unbounded growth.
const WINDOW_SECS: usize = 16;

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    epoch_sec: u64,
    count: u64,
}

/// 1-second sliding-window rate counter.
#[derive(Debug, Default)]
pub struct SlidingQps {
    buckets: Mutex<[Bucket; WINDOW_SECS]>,
}

impl SlidingQps {
    fn now_sec() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn record(&self, n: u64) {
        let now = Self::now_sec();
        let mut buckets = self.buckets.lock().expect("lock poisoned");
        let bucket = &mut buckets[(now as usize) % WINDOW_SECS];
        if bucket.epoch_sec != now {
            bucket.epoch_sec = now;
            bucket.count = 0;
        }
        bucket.count += n;
    }

    /// Count observed during the previous full second.
    pub fn last_second(&self) -> u64 {
        let prev = Self::now_sec().saturating_sub(1);
        let buckets = self.buckets.lock().expect("lock poisoned");
        let bucket = buckets[(prev as usize) % WINDOW_SECS];
        if bucket.epoch_sec == prev { bucket.count } else { 0 }
    }

    /// Count observed within the last `seconds` (including the current one).
    pub fn recent(&self, seconds: u64) -> u64 {
        let now = Self::now_sec();
        let cutoff = now.saturating_sub(seconds.min(WINDOW_SECS as u64 - 1));
        let buckets = self.buckets.lock().expect("lock poisoned");
        buckets
            .iter()
            .filter(|b| b.epoch_sec >= cutoff && b.epoch_sec <= now)
            .map(|b| b.count)
            .sum()
    }
}
