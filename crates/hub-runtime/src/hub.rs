use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orion_error::compat_prelude::*;
use orion_error::prelude::*;
use serde_json::Value;
use tokio::sync::mpsc;

use hub_cluster::{MetricsReport, NodeTable, SeenVersions, SyncBroadcaster, SyncPayload};
use hub_config::{ArtifactStore, ComponentKind, NodeConfig, NodeRole, OidcConfig};
use hub_core::driver::ConnectivityReport;
use hub_core::driver::{InputShell, OutputShell};
use hub_core::metrics::{DailyStats, StatKey, StatSample};
use hub_core::plugin::{BuiltinCompiler, PluginHost, PluginKind};
use hub_core::project::{Pns, ProjectDef, ProjectStatus};
use hub_core::record::Record;
use hub_core::registry::{ApplyOutcome, Registry};
use hub_core::rule::{RulesetStats, compile, evaluate};

use crate::engine::Engine;
use crate::error::{RuntimeReason, RuntimeResult};

/// Replay endpoints wait this long for the DAG to produce output.
pub const TEST_REPLAY_TIMEOUT: Duration = Duration::from_millis(500);

/// Kinds in dependency order for bulk apply: leaf components before the
/// projects that reference them.
const APPLY_ORDER: [ComponentKind; 5] = [
    ComponentKind::Input,
    ComponentKind::Output,
    ComponentKind::Ruleset,
    ComponentKind::Plugin,
    ComponentKind::Project,
];

// ---------------------------------------------------------------------------
// Hub — the top-level orchestrator
// ---------------------------------------------------------------------------

/// Ties the registry, the runtime engine, the plugin host, and cluster
/// coordination together. One per process; the control API holds it in an
/// `Arc`.
pub struct Hub {
    node_id: String,
    node_addr: String,
    role: NodeRole,
    token: String,
    oidc: Option<OidcConfig>,
    pub registry: Registry,
    pub engine: Engine,
    pub plugins: Arc<PluginHost>,
    pub daily: Arc<DailyStats>,
    pub nodes: Arc<NodeTable>,
    broadcaster: Option<Arc<SyncBroadcaster>>,
    seen: SeenVersions,
    /// Last daily snapshot pushed to the leader, for delta computation.
    pushed: Mutex<HashMap<StatKey, u64>>,
    /// Host probe for system-resource samples.
    sys: Mutex<sysinfo::System>,
}

impl Hub {
    /// Load the artifact tree and assemble all subsystems. Fails if any
    /// formal artifact does not parse.
    pub fn bootstrap(config: &NodeConfig) -> RuntimeResult<Arc<Self>> {
        let store = ArtifactStore::open(&config.node.data_dir)
            .map_err(|e| StructError::from(RuntimeReason::Bootstrap).with_detail(e.to_string()))?;
        let registry = Registry::load(store).owe(RuntimeReason::Bootstrap)?;

        let daily = Arc::new(DailyStats::new(&config.node.id));
        let plugins = Arc::new(PluginHost::with_builtins(Arc::clone(&daily)));
        for entry in registry.list(ComponentKind::Plugin) {
            if let Some(source) = registry.plugin_source(&entry.id)
                && let Err(e) = plugins.load_source(&entry.id, &source, &BuiltinCompiler)
            {
                hub_warn!(conf, plugin = %entry.id, error = %e, "plugin source not loadable");
            }
        }

        let unhealthy_after = match &config.cluster {
            Some(c) => c.heartbeat_interval.as_duration() * c.miss_threshold,
            None => Duration::from_secs(15),
        };
        let nodes = Arc::new(NodeTable::new(unhealthy_after));
        let broadcaster = config
            .node
            .role
            .is_leader()
            .then(|| Arc::new(SyncBroadcaster::new(&config.server.token, Arc::clone(&nodes))));

        let engine = Engine::new(config.limits.clone(), Arc::clone(&plugins));

        let hub = Arc::new(Self {
            node_id: config.node.id.clone(),
            node_addr: format!("http://{}", config.server.listen),
            role: config.node.role,
            token: config.server.token.clone(),
            oidc: config.oidc.clone(),
            registry,
            engine,
            plugins,
            daily,
            nodes,
            broadcaster,
            seen: SeenVersions::new(),
            pushed: Mutex::new(HashMap::new()),
            sys: Mutex::new(sysinfo::System::new()),
        });
        hub_info!(
            sys,
            node = %hub.node_id,
            leader = hub.role.is_leader(),
            projects = hub.registry.list(ComponentKind::Project).len(),
            "hub bootstrap complete"
        );
        Ok(hub)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_leader(&self) -> bool {
        self.role.is_leader()
    }

    pub fn role_name(&self) -> &'static str {
        if self.is_leader() { "leader" } else { "follower" }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn oidc(&self) -> Option<&OidcConfig> {
        self.oidc.as_ref()
    }

    // -- project lifecycle --------------------------------------------------

    pub async fn start_project(&self, id: &str) -> RuntimeResult<()> {
        let def = self.registry.project(id).ok_or_else(|| {
            StructError::from(RuntimeReason::Lifecycle)
                .with_detail(format!("project {id:?} does not exist"))
        })?;
        self.engine.start_project(def, &self.registry).await?;
        self.sync_project_state(id).await;
        Ok(())
    }

    pub async fn stop_project(&self, id: &str) -> RuntimeResult<()> {
        self.engine.stop_project(id).await?;
        self.sync_project_state(id).await;
        Ok(())
    }

    /// Project detail for the API: raw (pending-shadowed), run status, and
    /// last error while in Error state.
    pub async fn project_detail(
        &self,
        id: &str,
    ) -> Option<(String, bool, ProjectStatus, Option<String>)> {
        let (raw, is_pending) = self.registry.get_raw(ComponentKind::Project, id)?;
        let status = self
            .engine
            .project_status(id)
            .await
            .unwrap_or(ProjectStatus::Stopped);
        let last_error = self.engine.project_error(id).await;
        Some((raw, is_pending, status, last_error))
    }

    // -- apply / delete -----------------------------------------------------

    /// Promote one pending change and act on it (hot swap, restarts, plugin
    /// reload), then mirror it to followers.
    pub async fn apply_one(&self, kind: ComponentKind, id: &str) -> RuntimeResult<ApplyOutcome> {
        let outcome = self.registry.apply(kind, id).owe(RuntimeReason::HotUpdate)?;
        if outcome.changed {
            self.act_on_apply(&outcome).await?;
            self.sync_upsert(kind, id).await;
        }
        Ok(outcome)
    }

    /// Promote every pending change in dependency order.
    pub async fn apply_all(&self) -> RuntimeResult<Vec<ApplyOutcome>> {
        let pending = self.registry.pending_changes();
        let mut outcomes = Vec::new();
        for kind in APPLY_ORDER {
            for change in pending.iter().filter(|c| c.kind == kind) {
                outcomes.push(self.apply_one(kind, &change.id).await?);
            }
        }
        Ok(outcomes)
    }

    async fn act_on_apply(&self, outcome: &ApplyOutcome) -> RuntimeResult<()> {
        match outcome.kind {
            ComponentKind::Ruleset if outcome.hot_swappable => {
                let compiled = self.registry.ruleset(&outcome.id).ok_or_else(|| {
                    StructError::from(RuntimeReason::HotUpdate)
                        .with_detail(format!("ruleset {:?} vanished after apply", outcome.id))
                })?;
                self.engine.hot_swap_ruleset(&outcome.id, compiled).await;
            }
            ComponentKind::Ruleset | ComponentKind::Input | ComponentKind::Output => {
                self.engine
                    .restart_projects(&outcome.affected_projects, &self.registry)
                    .await?;
            }
            ComponentKind::Plugin => {
                if let Some(source) = self.registry.plugin_source(&outcome.id)
                    && let Err(e) =
                        self.plugins
                            .load_source(&outcome.id, &source, &BuiltinCompiler)
                {
                    hub_warn!(conf, plugin = %outcome.id, error = %e, "plugin reload failed");
                }
            }
            ComponentKind::Project => {
                self.engine
                    .restart_projects(&outcome.affected_projects, &self.registry)
                    .await?;
            }
        }
        Ok(())
    }

    /// Delete a component. Running projects must be stopped first; in-use
    /// components are refused by the registry.
    pub async fn delete(&self, kind: ComponentKind, id: &str) -> RuntimeResult<()> {
        if kind == ComponentKind::Project
            && self.engine.project_status(id).await == Some(ProjectStatus::Running)
        {
            return Err(StructError::from(RuntimeReason::Lifecycle)
                .with_detail(format!("project {id:?} is running; stop it before deleting")));
        }
        self.registry.delete(kind, id).owe(RuntimeReason::HotUpdate)?;
        if let Some(broadcaster) = &self.broadcaster {
            let version = broadcaster.next_version();
            broadcaster.enqueue(SyncPayload::delete(kind, id, version));
        }
        Ok(())
    }

    // -- cluster sync -------------------------------------------------------

    async fn sync_upsert(&self, kind: ComponentKind, id: &str) {
        let Some(broadcaster) = &self.broadcaster else {
            return;
        };
        let Some((raw, _)) = self.registry.get_raw(kind, id) else {
            return;
        };
        let is_running = match kind {
            ComponentKind::Project => Some(
                self.engine.project_status(id).await == Some(ProjectStatus::Running),
            ),
            _ => None,
        };
        let version = broadcaster.next_version();
        broadcaster.enqueue(SyncPayload::upsert(kind, id, &raw, is_running, version));
    }

    /// Mirror a project's run-state to followers after start/stop.
    async fn sync_project_state(&self, id: &str) {
        if self.is_leader() {
            self.sync_upsert(ComponentKind::Project, id).await;
        }
    }

    /// Follower entry point for `POST /component/sync`. Version-gated so
    /// retried deliveries apply at most once.
    pub async fn handle_sync(&self, payload: SyncPayload) -> RuntimeResult<()> {
        if !self.seen.fresh(&payload) {
            hub_debug!(clu, kind = %payload.kind, id = %payload.id, version = payload.version,
                "stale sync payload ignored");
            return Ok(());
        }
        let (kind, deleted) = payload.parse_kind().owe(RuntimeReason::HotUpdate)?;

        if deleted {
            if kind == ComponentKind::Project {
                self.engine.stop_project(&payload.id).await?;
            }
            self.registry
                .delete(kind, &payload.id)
                .owe(RuntimeReason::HotUpdate)?;
            return Ok(());
        }

        let raw = payload.raw.as_deref().ok_or_else(|| {
            StructError::from(RuntimeReason::HotUpdate).with_detail("sync payload without raw")
        })?;

        match kind {
            ComponentKind::Project => {
                // Stop the old incarnation (if any), install, then mirror
                // the leader's run-state.
                self.engine.stop_project(&payload.id).await?;
                self.registry
                    .apply_synced(kind, &payload.id, raw)
                    .owe(RuntimeReason::HotUpdate)?;
                if payload.is_running.unwrap_or(false) {
                    let def = self.registry.project(&payload.id).ok_or_else(|| {
                        StructError::from(RuntimeReason::HotUpdate)
                            .with_detail("project missing after sync install")
                    })?;
                    self.engine.start_project(def, &self.registry).await?;
                }
            }
            // Same semantics as a leader apply: rulesets hot-swap when only
            // rule bodies changed, drivers recreate through refcount-gated
            // restarts, plugins reload into the host.
            _ => {
                let outcome = self
                    .registry
                    .apply_synced(kind, &payload.id, raw)
                    .owe(RuntimeReason::HotUpdate)?;
                self.act_on_apply(&outcome).await?;
            }
        }
        Ok(())
    }

    /// Follower→leader metrics push body: current QPS, host sample, and the
    /// daily buckets accumulated since the previous push.
    pub async fn metrics_report(&self) -> MetricsReport {
        let qps_total = self.engine.input_qps_total().await;
        let snapshot = self.daily.snapshot();
        let daily = {
            let mut pushed = self.pushed.lock().expect("lock poisoned");
            let mut deltas = Vec::new();
            for sample in &snapshot {
                let prev = pushed.get(&sample.key).copied().unwrap_or(0);
                if sample.count > prev {
                    deltas.push(StatSample {
                        key: sample.key.clone(),
                        count: sample.count - prev,
                    });
                }
                pushed.insert(sample.key.clone(), sample.count);
            }
            deltas
        };
        let system = {
            let mut sys = self.sys.lock().expect("lock poisoned");
            hub_cluster::heartbeat::system_sample(&mut sys)
        };
        MetricsReport {
            node_id: self.node_id.clone(),
            node_addr: self.node_addr.clone(),
            qps_total,
            system,
            daily,
        }
    }

    // -- connectivity -------------------------------------------------------

    /// Connectivity probe: a live instance if one runs, otherwise a
    /// throwaway shell from the formal (or provided) configuration.
    pub async fn connect_check(
        &self,
        kind: ComponentKind,
        id: &str,
        raw: Option<&str>,
    ) -> RuntimeResult<(ConnectivityReport, bool)> {
        let (raw, is_temp) = match raw {
            Some(raw) => (raw.to_string(), true),
            None => {
                if let Some(report) = self.engine.live_report(kind, id).await {
                    return Ok((report, false));
                }
                self.registry.get_raw(kind, id).ok_or_else(|| {
                    StructError::from(RuntimeReason::Lifecycle)
                        .with_detail(format!("{kind} {id:?} does not exist"))
                })?
            }
        };
        let report = match kind {
            ComponentKind::Input => {
                let config = hub_config::InputConfig::parse(&raw)
                    .map_err(|e| StructError::from(RuntimeReason::Lifecycle).with_detail(e.to_string()))?;
                InputShell::new(id, Pns::root_str(&format!("INPUT.{id}")), Arc::new(config))
                    .check_connectivity()
            }
            ComponentKind::Output => {
                let config = hub_config::OutputConfig::parse(&raw)
                    .map_err(|e| StructError::from(RuntimeReason::Lifecycle).with_detail(e.to_string()))?;
                OutputShell::new(id, Pns::root_str(&format!("OUTPUT.{id}")), Arc::new(config), 0)
                    .check_connectivity()
            }
            other => {
                return Err(StructError::from(RuntimeReason::Lifecycle)
                    .with_detail(format!("{other} has no connectivity check")));
            }
        };
        Ok((report, is_temp))
    }

    // -- test harness -------------------------------------------------------

    /// Replay one record through a ruleset (pending version when present, or
    /// explicit `content`). Pure: no shells, no live counters beyond plugin
    /// stats.
    pub fn test_ruleset(
        &self,
        id: Option<&str>,
        content: Option<&str>,
        record: Record,
    ) -> RuntimeResult<(Vec<Record>, bool)> {
        let (raw, is_temp, name) = self.resolve_test_source(ComponentKind::Ruleset, id, content)?;
        let compiled = compile(&name, &raw).owe(RuntimeReason::HotUpdate)?;
        let stats = RulesetStats::for_ruleset(&compiled);
        let outputs = evaluate(&compiled, &self.plugins, record, &stats);
        Ok((outputs, is_temp))
    }

    /// Replay one record through a whole project DAG in an isolated engine:
    /// `TEST_`-prefixed PNS shells, intercepted outputs, fresh channels.
    /// Returns records per output PNS, collected until the replay timeout.
    pub async fn test_project(
        &self,
        id: Option<&str>,
        content: Option<&str>,
        input_node: &str,
        record: Record,
    ) -> RuntimeResult<(Vec<(Pns, Vec<Record>)>, bool)> {
        let (raw, is_temp, name) = self.resolve_test_source(ComponentKind::Project, id, content)?;
        let def = Arc::new(
            ProjectDef::parse(&name, &raw, true).owe(RuntimeReason::HotUpdate)?,
        );

        // A throwaway engine keeps test shells, channels, and counters out
        // of the live instance table.
        let test_engine = Engine::new(
            hub_config::LimitsConfig {
                ruleset_workers: 1,
                ..Default::default()
            },
            Arc::clone(&self.plugins),
        );
        test_engine
            .start_project(Arc::clone(&def), &self.registry)
            .await?;

        let outputs = test_engine.output_shells_for(&def.id).await;
        let mut taps: Vec<(Pns, mpsc::Receiver<Record>)> = Vec::new();
        for shell in &outputs {
            let (tx, rx) = mpsc::channel(64);
            shell.set_test_chan(Some(tx));
            taps.push((shell.pns.clone(), rx));
        }

        let input_id = input_node.strip_prefix("INPUT.").unwrap_or(input_node);
        test_engine
            .process_test_data(&def.id, input_id, record)
            .await?;

        let deadline = tokio::time::Instant::now() + TEST_REPLAY_TIMEOUT;
        let mut results = Vec::new();
        for (pns, mut rx) in taps {
            let mut records = Vec::new();
            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) | Err(_) => break,
                }
            }
            results.push((pns, records));
        }

        test_engine.shutdown().await?;
        Ok((results, is_temp))
    }

    /// Execute a plugin in a detached registry (test invocations never touch
    /// live counters or live registrations).
    pub fn test_plugin(
        &self,
        id: Option<&str>,
        content: Option<&str>,
        args: Vec<Value>,
    ) -> RuntimeResult<(Value, bool)> {
        let (source, is_temp, name) = self.resolve_test_source(ComponentKind::Plugin, id, content)?;
        let host = self.plugins.detached();
        host.load_source(&name, &source, &BuiltinCompiler)
            .owe(RuntimeReason::HotUpdate)?;
        let result = match host.kind_of(&name) {
            Some(PluginKind::Predicate) => {
                Value::Bool(host.invoke_predicate(&name, &args).owe(RuntimeReason::HotUpdate)?)
            }
            Some(PluginKind::Transform) => {
                host.invoke_transform(&name, &args).owe(RuntimeReason::HotUpdate)?
            }
            None => {
                return Err(StructError::from(RuntimeReason::HotUpdate)
                    .with_detail(format!("plugin {name:?} failed to register")));
            }
        };
        Ok((result, is_temp))
    }

    /// Resolve `(raw, is_temp, name)` for a test endpoint: explicit content
    /// wins, else the pending-shadowed stored version.
    fn resolve_test_source(
        &self,
        kind: ComponentKind,
        id: Option<&str>,
        content: Option<&str>,
    ) -> RuntimeResult<(String, bool, String)> {
        let name = id.unwrap_or("adhoc_test").to_string();
        if let Some(content) = content {
            return Ok((content.to_string(), true, name));
        }
        let id = id.ok_or_else(|| {
            StructError::from(RuntimeReason::Lifecycle)
                .with_detail("either an id or inline content is required")
        })?;
        let (raw, is_temp) = self.registry.get_raw(kind, id).ok_or_else(|| {
            StructError::from(RuntimeReason::Lifecycle)
                .with_detail(format!("{kind} {id:?} does not exist"))
        })?;
        Ok((raw, is_temp, name))
    }

    // -- shutdown -----------------------------------------------------------

    pub async fn shutdown(&self) -> RuntimeResult<()> {
        self.engine.shutdown().await
    }
}
