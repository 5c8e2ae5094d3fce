use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use orion_error::prelude::*;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hub_config::{ComponentKind, LimitsConfig};
use hub_core::channel::edge;
use hub_core::driver::{ConnectivityReport, InputShell, OutputShell, source_for};
use hub_core::plugin::PluginHost;
use hub_core::project::{Pns, ProjectDef, ProjectStatus};
use hub_core::record::Record;
use hub_core::registry::Registry;
use hub_core::rule::CompiledRuleset;
use hub_lang::{NodeKind, NodeRef};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::shells::{RulesetShell, run_input_source, run_output_consumer, run_ruleset_worker};

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

enum InstanceRuntime {
    Input(Arc<InputShell>),
    Ruleset(Arc<RulesetShell>),
    Output(Arc<OutputShell>),
}

/// One PNS shell plus its task set and the projects currently using it.
struct Instance {
    logical_id: String,
    users: HashSet<String>,
    runtime: InstanceRuntime,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct ProjectRun {
    def: Arc<ProjectDef>,
    status: ProjectStatus,
    last_error: Option<String>,
}

#[derive(Default)]
struct EngineState {
    instances: HashMap<Pns, Instance>,
    projects: HashMap<String, ProjectRun>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Owns every runtime shell and running project.
///
/// Shells are keyed by PNS and shared across projects; a shell stops only
/// when the last project using it releases it. Start wires shells in
/// reverse-topological order, stop releases in forward-topological order,
/// and every (re)start allocates fresh channels.
pub struct Engine {
    limits: LimitsConfig,
    workers_per_ruleset: usize,
    plugins: Arc<PluginHost>,
    state: tokio::sync::Mutex<EngineState>,
}

impl Engine {
    pub fn new(limits: LimitsConfig, plugins: Arc<PluginHost>) -> Self {
        let workers_per_ruleset = limits.effective_workers(num_cpus::get());
        Self {
            limits,
            workers_per_ruleset,
            plugins,
            state: tokio::sync::Mutex::new(EngineState::default()),
        }
    }

    pub fn plugins(&self) -> &Arc<PluginHost> {
        &self.plugins
    }

    // -- project lifecycle --------------------------------------------------

    /// Start a project. Starting an already-running project is a conflict.
    pub async fn start_project(
        &self,
        def: Arc<ProjectDef>,
        registry: &Registry,
    ) -> RuntimeResult<()> {
        let project_id = def.id.clone();
        let mut st = self.state.lock().await;
        if let Some(run) = st.projects.get(&project_id)
            && matches!(run.status, ProjectStatus::Running | ProjectStatus::Starting)
        {
            return Err(StructError::from(RuntimeReason::Lifecycle)
                .with_detail(format!("project {project_id:?} is already running")));
        }
        st.projects.insert(
            project_id.clone(),
            ProjectRun {
                def: Arc::clone(&def),
                status: ProjectStatus::Starting,
                last_error: None,
            },
        );

        match self.wire_project(&mut st, &def, registry) {
            Ok(()) => {
                if let Some(run) = st.projects.get_mut(&project_id) {
                    run.status = ProjectStatus::Running;
                }
                hub_info!(sys, project = %project_id, shells = def.pns_nodes().len(), "project started");
                Ok(())
            }
            Err(e) => {
                // Roll the partial wiring back before surfacing the error.
                let released = release_project(&mut st, &project_id, &def);
                if let Some(run) = st.projects.get_mut(&project_id) {
                    run.status = ProjectStatus::Error;
                    run.last_error = Some(e.to_string());
                }
                drop(st);
                for inst in released {
                    self.stop_instance(inst).await;
                }
                Err(e)
            }
        }
    }

    /// Stop a project. Stopping a stopped (or unknown) project succeeds
    /// idempotently.
    pub async fn stop_project(&self, project_id: &str) -> RuntimeResult<()> {
        let mut st = self.state.lock().await;
        let Some(run) = st.projects.get_mut(project_id) else {
            return Ok(());
        };
        if !matches!(run.status, ProjectStatus::Running | ProjectStatus::Error) {
            return Ok(());
        }
        run.status = ProjectStatus::Stopping;
        let def = Arc::clone(&run.def);

        // Collect under the lock, drain outside it.
        let released = release_project(&mut st, project_id, &def);
        if let Some(run) = st.projects.get_mut(project_id) {
            run.status = ProjectStatus::Stopped;
        }
        drop(st);

        for inst in released {
            self.stop_instance(inst).await;
        }
        hub_info!(sys, project = %project_id, "project stopped");
        Ok(())
    }

    /// Stop then start every named project, refreshing definitions from the
    /// registry. All stops happen before any start so shared shells of
    /// updated components actually reach refcount zero and are recreated
    /// with the new configuration.
    pub async fn restart_projects(
        &self,
        project_ids: &[String],
        registry: &Registry,
    ) -> RuntimeResult<()> {
        let mut to_start = Vec::new();
        for id in project_ids {
            if self.project_status(id).await == Some(ProjectStatus::Running) {
                self.stop_project(id).await?;
                to_start.push(id.clone());
            }
        }
        for id in &to_start {
            let def = registry.project(id).ok_or_else(|| {
                StructError::from(RuntimeReason::ProjectStart)
                    .with_detail(format!("project {id:?} vanished during restart"))
            })?;
            self.start_project(def, registry).await?;
        }
        Ok(())
    }

    /// Swap a new compiled ruleset into every shell instantiated from the
    /// logical id. In-flight evaluations finish on the old version.
    pub async fn hot_swap_ruleset(&self, id: &str, compiled: Arc<CompiledRuleset>) -> usize {
        let st = self.state.lock().await;
        let mut swapped = 0;
        for inst in st.instances.values() {
            if let InstanceRuntime::Ruleset(shell) = &inst.runtime
                && inst.logical_id == id
            {
                shell.hot_swap(Arc::clone(&compiled));
                swapped += 1;
            }
        }
        if swapped > 0 {
            hub_info!(conf, ruleset = %id, shells = swapped, "ruleset hot-swapped");
        }
        swapped
    }

    /// Mark a project failed (driver blew up mid-run). Terminal until a
    /// restart is requested.
    pub async fn mark_error(&self, project_id: &str, error: &str) {
        let mut st = self.state.lock().await;
        if let Some(run) = st.projects.get_mut(project_id) {
            run.status = ProjectStatus::Error;
            run.last_error = Some(error.to_string());
        }
    }

    /// Stop every running project (shutdown path).
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        for id in self.running_projects().await {
            self.stop_project(&id).await?;
        }
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    pub async fn project_status(&self, project_id: &str) -> Option<ProjectStatus> {
        self.state
            .lock()
            .await
            .projects
            .get(project_id)
            .map(|run| run.status)
    }

    pub async fn project_error(&self, project_id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .projects
            .get(project_id)
            .and_then(|run| run.last_error.clone())
    }

    pub async fn running_projects(&self) -> Vec<String> {
        let st = self.state.lock().await;
        let mut out: Vec<String> = st
            .projects
            .iter()
            .filter(|(_, run)| run.status == ProjectStatus::Running)
            .map(|(id, _)| id.clone())
            .collect();
        out.sort();
        out
    }

    /// Number of *running* projects whose graph references `(kind, id)` —
    /// the shared-component usage counter.
    pub async fn usage_count(&self, kind: ComponentKind, id: &str) -> usize {
        let st = self.state.lock().await;
        st.projects
            .values()
            .filter(|run| run.status == ProjectStatus::Running && run.def.references(kind, id))
            .count()
    }

    /// Connectivity report from a live instance of the component, if any.
    pub async fn live_report(&self, kind: ComponentKind, id: &str) -> Option<ConnectivityReport> {
        let st = self.state.lock().await;
        st.instances.values().find_map(|inst| {
            if inst.logical_id != id {
                return None;
            }
            match (&inst.runtime, kind) {
                (InstanceRuntime::Input(shell), ComponentKind::Input) => {
                    Some(shell.check_connectivity())
                }
                (InstanceRuntime::Output(shell), ComponentKind::Output) => {
                    Some(shell.check_connectivity())
                }
                _ => None,
            }
        })
    }

    /// Push one test record through a running project's input shell
    /// (`ProcessTestData`).
    pub async fn process_test_data(
        &self,
        project_id: &str,
        input_id: &str,
        record: Record,
    ) -> RuntimeResult<()> {
        let shell = {
            let st = self.state.lock().await;
            st.instances
                .values()
                .find_map(|inst| match &inst.runtime {
                    InstanceRuntime::Input(shell)
                        if inst.logical_id == input_id && inst.users.contains(project_id) =>
                    {
                        Some(Arc::clone(shell))
                    }
                    _ => None,
                })
                .ok_or_else(|| {
                    StructError::from(RuntimeReason::Lifecycle).with_detail(format!(
                        "no running input {input_id:?} in project {project_id:?}"
                    ))
                })?
        };
        shell.inject(record).await;
        Ok(())
    }

    /// Output shells used by a project (test harness sink interception).
    pub async fn output_shells_for(&self, project_id: &str) -> Vec<Arc<OutputShell>> {
        let st = self.state.lock().await;
        let mut out: Vec<Arc<OutputShell>> = st
            .instances
            .values()
            .filter(|inst| inst.users.contains(project_id))
            .filter_map(|inst| match &inst.runtime {
                InstanceRuntime::Output(shell) => Some(Arc::clone(shell)),
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| a.pns.cmp(&b.pns));
        out
    }

    /// Total input-side QPS across every live input shell.
    pub async fn input_qps_total(&self) -> u64 {
        let st = self.state.lock().await;
        st.instances
            .values()
            .filter_map(|inst| match &inst.runtime {
                InstanceRuntime::Input(shell) => Some(shell.consume_qps()),
                _ => None,
            })
            .sum()
    }

    /// `(owners, to_pns, delivered_total)` across every producer fan-out,
    /// for the per-minute daily-stats sampler.
    pub async fn delivery_snapshot(&self) -> Vec<(Vec<String>, Pns, u64)> {
        let st = self.state.lock().await;
        let mut out = Vec::new();
        for inst in st.instances.values() {
            match &inst.runtime {
                InstanceRuntime::Input(shell) => out.extend(shell.downstreams.delivery_snapshot()),
                InstanceRuntime::Ruleset(shell) => {
                    out.extend(shell.downstreams.delivery_snapshot())
                }
                InstanceRuntime::Output(_) => {}
            }
        }
        out
    }

    // -- wiring -------------------------------------------------------------

    /// Create missing shells (consumers before producers) and wire this
    /// project's edges with fresh channels.
    fn wire_project(
        &self,
        st: &mut EngineState,
        def: &ProjectDef,
        registry: &Registry,
    ) -> RuntimeResult<()> {
        for (node, pns) in def.start_order() {
            if let Some(inst) = st.instances.get_mut(&pns) {
                inst.users.insert(def.id.clone());
            } else {
                let inst = self.build_instance(&node, &pns, &def.id, registry)?;
                st.instances.insert(pns.clone(), inst);
            }
        }

        for fnode in &def.flow_nodes {
            let consumer = st.instances.get(&fnode.to_pns).ok_or_else(|| {
                StructError::from(RuntimeReason::ProjectStart)
                    .with_detail(format!("consumer shell {} missing", fnode.to_pns))
            })?;
            // Attach the receiver side first so the producer never observes
            // an edge with nobody draining it.
            enum IntakeRef<'a> {
                Ruleset(&'a RulesetShell),
                Output(&'a OutputShell),
            }
            let intake = match &consumer.runtime {
                InstanceRuntime::Ruleset(shell) => IntakeRef::Ruleset(shell),
                InstanceRuntime::Output(shell) => IntakeRef::Output(shell),
                InstanceRuntime::Input(_) => {
                    return Err(StructError::from(RuntimeReason::ProjectStart)
                        .with_detail(format!("{} cannot be a consumer", fnode.to_pns)));
                }
            };

            let producer = st.instances.get(&fnode.from_pns).ok_or_else(|| {
                StructError::from(RuntimeReason::ProjectStart)
                    .with_detail(format!("producer shell {} missing", fnode.from_pns))
            })?;
            let fanout = match &producer.runtime {
                InstanceRuntime::Input(shell) => &shell.downstreams,
                InstanceRuntime::Ruleset(shell) => &shell.downstreams,
                InstanceRuntime::Output(_) => {
                    return Err(StructError::from(RuntimeReason::ProjectStart)
                        .with_detail(format!("{} cannot be a producer", fnode.from_pns)));
                }
            };

            if let Some(existing) = fanout.edge_to(&fnode.to_pns) {
                // Another project already wired this exact edge; co-own it.
                existing.add_user(&def.id);
                continue;
            }
            let (tx, rx) = edge(
                def.id.clone(),
                fnode.to_pns.clone(),
                self.limits.channel_capacity,
            );
            match intake {
                IntakeRef::Ruleset(shell) => shell.intake.attach(rx, tx.downgrade()),
                IntakeRef::Output(shell) => shell.intake.attach(rx, tx.downgrade()),
            }
            fanout.attach(tx);
        }
        Ok(())
    }

    fn build_instance(
        &self,
        node: &NodeRef,
        pns: &Pns,
        project_id: &str,
        registry: &Registry,
    ) -> RuntimeResult<Instance> {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        let runtime = match node.kind {
            NodeKind::Input => {
                let config = registry.input(&node.id).ok_or_else(|| missing(node))?;
                let shell = Arc::new(InputShell::new(&node.id, pns.clone(), config));
                let source = source_for(&shell.config);
                tasks.push(tokio::spawn(run_input_source(
                    source,
                    Arc::clone(&shell),
                    cancel.child_token(),
                )));
                InstanceRuntime::Input(shell)
            }
            NodeKind::Ruleset => {
                let compiled = registry.ruleset(&node.id).ok_or_else(|| missing(node))?;
                let shell = Arc::new(RulesetShell::new(&node.id, pns.clone(), compiled));
                for _ in 0..self.workers_per_ruleset {
                    tasks.push(tokio::spawn(run_ruleset_worker(
                        Arc::clone(&shell),
                        Arc::clone(&self.plugins),
                        cancel.child_token(),
                    )));
                }
                InstanceRuntime::Ruleset(shell)
            }
            NodeKind::Output => {
                let config = registry.output(&node.id).ok_or_else(|| missing(node))?;
                let shell = Arc::new(OutputShell::new(
                    &node.id,
                    pns.clone(),
                    config,
                    self.limits.output_retries,
                ));
                tasks.push(tokio::spawn(run_output_consumer(
                    Arc::clone(&shell),
                    cancel.child_token(),
                )));
                InstanceRuntime::Output(shell)
            }
        };
        let mut users = HashSet::new();
        users.insert(project_id.to_string());
        Ok(Instance {
            logical_id: node.id.clone(),
            users,
            runtime,
            cancel,
            tasks,
        })
    }

    // -- instance teardown --------------------------------------------------

    /// Cooperative stop: wait for drain up to `stop_timeout`, then cancel
    /// and join (aborting anything still stuck).
    async fn stop_instance(&self, inst: Instance) {
        let deadline = self.limits.stop_timeout.as_duration();
        match &inst.runtime {
            // Inputs cease accepting immediately; nothing to drain locally.
            InstanceRuntime::Input(_) => {}
            InstanceRuntime::Ruleset(shell) => {
                wait_until(deadline, || shell.quiescent()).await;
            }
            InstanceRuntime::Output(shell) => {
                wait_until(deadline, || shell.intake.backlog() == 0).await;
            }
        }
        inst.cancel.cancel();
        for task in inst.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                hub_warn!(sys, "shell task did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

/// Detach `project_id` from every shell of `def` in forward-topological
/// order; returns the instances whose refcount reached zero (to be drained
/// and stopped by the caller, outside the state lock).
fn release_project(st: &mut EngineState, project_id: &str, def: &ProjectDef) -> Vec<Instance> {
    let mut released = Vec::new();
    for (_, pns) in def.stop_order() {
        let Some(inst) = st.instances.get_mut(&pns) else {
            continue;
        };
        match &inst.runtime {
            InstanceRuntime::Input(shell) => {
                shell.downstreams.detach_project(project_id);
            }
            InstanceRuntime::Ruleset(shell) => {
                shell.downstreams.detach_project(project_id);
            }
            InstanceRuntime::Output(_) => {}
        }
        inst.users.remove(project_id);
        if inst.users.is_empty() {
            released.push(st.instances.remove(&pns).expect("instance present"));
        }
    }
    released
}

fn missing(node: &NodeRef) -> crate::error::RuntimeError {
    StructError::from(RuntimeReason::ProjectStart)
        .with_detail(format!("{node} is not a formal component"))
}

/// Poll `done` every 10ms until it holds or `deadline` elapses.
async fn wait_until(deadline: Duration, done: impl Fn() -> bool) {
    let start = tokio::time::Instant::now();
    while !done() {
        if start.elapsed() >= deadline {
            hub_warn!(sys, "drain deadline exceeded, forcing stop");
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
