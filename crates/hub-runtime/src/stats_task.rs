use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use hub_core::metrics::DailyStats;
use hub_core::project::Pns;

use crate::engine::Engine;
use crate::hub::Hub;

/// Daily stats aggregate per minute.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically fold per-edge delivery counters into the daily stats,
/// keyed by `(project, consumer PNS)`.
///
/// Edges come and go with project restarts, resetting their counters; a
/// total smaller than the previous sample is treated as a fresh edge.
pub async fn run_stats_sampler(hub: Arc<Hub>, interval: Duration, cancel: CancellationToken) {
    let mut previous: HashMap<(String, Pns), u64> = HashMap::new();
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                sample_once(&hub.engine, &hub.daily, &mut previous).await;
            }
        }
    }
}

async fn sample_once(
    engine: &Engine,
    daily: &DailyStats,
    previous: &mut HashMap<(String, Pns), u64>,
) {
    let mut current: HashMap<(String, Pns), u64> = HashMap::new();
    for (owners, to_pns, total) in engine.delivery_snapshot().await {
        // A record delivered on a shared edge served every owning project.
        for project in owners {
            *current.entry((project, to_pns.clone())).or_insert(0) += total;
        }
    }

    for ((project, pns), total) in &current {
        let prev = previous.get(&(project.clone(), pns.clone())).copied().unwrap_or(0);
        let delta = if *total >= prev { total - prev } else { *total };
        daily.add(project, pns.as_str(), delta);
    }
    *previous = current;
}
