use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use hub_core::channel::{FanOut, Intake};
use hub_core::metrics::PnsMetrics;
use hub_core::plugin::PluginHost;
use hub_core::project::Pns;
use hub_core::rule::{CompiledRuleset, RulesetStats, evaluate};

// ---------------------------------------------------------------------------
// RulesetShell — one ruleset PNS instance
// ---------------------------------------------------------------------------

/// Active compiled version plus its evaluation counters; swapped as one unit
/// during hot update.
struct ActiveRuleset {
    compiled: Arc<CompiledRuleset>,
    stats: Arc<RulesetStats>,
}

/// Runtime state of one ruleset PNS: the hot-swappable compiled rules, the
/// merged upstream intake, the downstream fan-out, and the in-flight gauge.
pub struct RulesetShell {
    pub id: String,
    pub pns: Pns,
    pub intake: Intake,
    pub downstreams: FanOut,
    pub metrics: Arc<PnsMetrics>,
    active: RwLock<ActiveRuleset>,
    running_tasks: AtomicUsize,
}

impl RulesetShell {
    pub fn new(id: impl Into<String>, pns: Pns, compiled: Arc<CompiledRuleset>) -> Self {
        let stats = Arc::new(RulesetStats::for_ruleset(&compiled));
        Self {
            id: id.into(),
            pns,
            intake: Intake::new(),
            downstreams: FanOut::new(),
            metrics: Arc::new(PnsMetrics::new()),
            active: RwLock::new(ActiveRuleset { compiled, stats }),
            running_tasks: AtomicUsize::new(0),
        }
    }

    /// Snapshot the active version. Workers take one per record, so records
    /// accepted before a swap finish on the version they started with.
    pub fn active(&self) -> (Arc<CompiledRuleset>, Arc<RulesetStats>) {
        let active = self.active.read().expect("lock poisoned");
        (Arc::clone(&active.compiled), Arc::clone(&active.stats))
    }

    /// Hot update swap point: records accepted strictly after this call are
    /// evaluated with `next`.
    pub fn hot_swap(&self, next: Arc<CompiledRuleset>) {
        let stats = Arc::new(RulesetStats::for_ruleset(&next));
        let mut active = self.active.write().expect("lock poisoned");
        active.compiled = next;
        active.stats = stats;
    }

    /// In-flight record evaluations across the worker pool.
    pub fn running_tasks(&self) -> usize {
        self.running_tasks.load(Ordering::Acquire)
    }

    /// Quiescent ⇔ no queued upstream records and no in-flight evaluation.
    pub fn quiescent(&self) -> bool {
        self.running_tasks() == 0 && self.intake.backlog() == 0
    }
}

/// RAII guard for the in-flight gauge.
struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::AcqRel);
        Self(gauge)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

/// One worker of a ruleset shell's pool.
///
/// Workers pull from the shared merge, evaluate a record to completion
/// (never suspending mid-chain), and push results downstream with per-edge
/// backpressure. Distinct records are unordered across workers.
pub async fn run_ruleset_worker(
    shell: Arc<RulesetShell>,
    host: Arc<PluginHost>,
    cancel: CancellationToken,
) {
    while let Some(record) = shell.intake.recv(&cancel).await {
        let _guard = RunningGuard::enter(&shell.running_tasks);
        shell.metrics.record(1);
        let (compiled, stats) = shell.active();
        let outputs = evaluate(&compiled, &host, record, &stats);
        for output in outputs {
            shell.downstreams.send_all(&output).await;
        }
    }
    hub_debug!(pipe, ruleset = %shell.id, pns = %shell.pns, "ruleset worker stopped");
}
