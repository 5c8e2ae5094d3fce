use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// Runtime sizing knobs. All fields have defaults so the entire `[limits]`
/// section may be omitted from `hub.toml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Bounded capacity of every producer→consumer edge channel.
    pub channel_capacity: usize,
    /// Worker pool size per ruleset shell; `0` means one worker per CPU.
    pub ruleset_workers: usize,
    /// Drain deadline for graceful component stop.
    pub stop_timeout: HumanDuration,
    /// Send retries (exponential backoff) before an output drops a record.
    pub output_retries: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            ruleset_workers: 0,
            stop_timeout: "10s".parse().expect("static default"),
            output_retries: 3,
        }
    }
}

impl LimitsConfig {
    /// Effective ruleset worker count (resolves the `0 = CPU count` default).
    pub fn effective_workers(&self, cpus: usize) -> usize {
        if self.ruleset_workers == 0 {
            cpus.max(1)
        } else {
            self.ruleset_workers
        }
    }
}
