use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Keys and samples
// ---------------------------------------------------------------------------

/// Hourly bucket key for the daily stats manager.
///
/// `sequence` is a consumer PNS for edge deliveries, or
/// `PLUGIN.<name>.<success|failure>` for plugin invocations (with an empty
/// `project_id`).
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatKey {
    pub date: NaiveDate,
    pub hour: u32,
    pub node_id: String,
    pub project_id: String,
    pub sequence: String,
}

/// Wire form of one bucket, exchanged during cluster aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatSample {
    #[serde(flatten)]
    pub key: StatKey,
    pub count: u64,
}

/// Filter for hourly/daily queries; every field is an optional exact match
/// except `sequence_prefix`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StatsFilter {
    pub date: Option<NaiveDate>,
    pub hour: Option<u32>,
    pub node_id: Option<String>,
    pub project_id: Option<String>,
    pub sequence_prefix: Option<String>,
}

impl StatsFilter {
    fn matches(&self, key: &StatKey) -> bool {
        self.date.is_none_or(|d| d == key.date)
            && self.hour.is_none_or(|h| h == key.hour)
            && self
                .node_id
                .as_deref()
                .is_none_or(|n| n == key.node_id)
            && self
                .project_id
                .as_deref()
                .is_none_or(|p| p == key.project_id)
            && self
                .sequence_prefix
                .as_deref()
                .is_none_or(|s| key.sequence.starts_with(s))
    }
}

// ---------------------------------------------------------------------------
// DailyStats
// ---------------------------------------------------------------------------

/// Hourly-bucketed counters keyed by `(date, hour, node_id, project_id,
/// sequence)`. Aggregation across nodes is additive via [`DailyStats::merge`].
#[derive(Debug)]
pub struct DailyStats {
    node_id: String,
    entries: Mutex<BTreeMap<StatKey, u64>>,
}

impl DailyStats {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Add a delta under the current UTC date/hour for this node.
    pub fn add(&self, project_id: &str, sequence: &str, n: u64) {
        if n == 0 {
            return;
        }
        let now = Utc::now();
        let key = StatKey {
            date: now.date_naive(),
            hour: now.hour(),
            node_id: self.node_id.clone(),
            project_id: project_id.to_string(),
            sequence: sequence.to_string(),
        };
        *self.entries.lock().expect("lock poisoned").entry(key).or_insert(0) += n;
    }

    /// Record one plugin invocation under the
    /// `PLUGIN.<name>.<success|failure>` sequence.
    pub fn record_plugin(&self, plugin: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.add("", &format!("PLUGIN.{plugin}.{status}"), 1);
    }

    /// Merge remote samples (additive); used by the leader when aggregating
    /// follower pushes.
    pub fn merge(&self, samples: &[StatSample]) {
        let mut entries = self.entries.lock().expect("lock poisoned");
        for sample in samples {
            *entries.entry(sample.key.clone()).or_insert(0) += sample.count;
        }
    }

    /// Flatten every bucket for a cluster push.
    pub fn snapshot(&self) -> Vec<StatSample> {
        self.entries
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(key, count)| StatSample {
                key: key.clone(),
                count: *count,
            })
            .collect()
    }

    /// Filtered view, sorted by key.
    pub fn query(&self, filter: &StatsFilter) -> Vec<StatSample> {
        self.entries
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(key, count)| StatSample {
                key: key.clone(),
                count: *count,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
