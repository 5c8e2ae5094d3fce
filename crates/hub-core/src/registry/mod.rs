#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use orion_error::prelude::*;
use serde::Serialize;

use hub_config::{ArtifactStore, ComponentKind, InputConfig, OutputConfig};

use crate::error::{CoreError, CoreReason, CoreResult};
use crate::project::ProjectDef;
use crate::rule::{CompiledRuleset, compile};

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub id: String,
    #[serde(rename = "hasTemp")]
    pub has_temp: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingChange {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    pub id: String,
    pub pending: String,
    pub formal: Option<String>,
}

/// What an apply changed, for the runtime to act on.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub kind: ComponentKind,
    pub id: String,
    /// Did anything actually change? Applying with no pending version is a
    /// no-op (idempotent re-apply).
    pub changed: bool,
    /// Formal projects whose flow graph references `(kind, id)`.
    pub affected_projects: Vec<String>,
    /// Rule-body-only ruleset change: swap in place, no project restarts.
    pub hot_swappable: bool,
}

// ---------------------------------------------------------------------------
// Parsed artifacts
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Parsed {
    Ruleset(Arc<CompiledRuleset>),
    Input(Arc<InputConfig>),
    Output(Arc<OutputConfig>),
    Project(Arc<ProjectDef>),
    Plugin(Arc<String>),
}

fn parse_artifact(kind: ComponentKind, id: &str, raw: &str) -> CoreResult<Parsed> {
    match kind {
        ComponentKind::Ruleset => Ok(Parsed::Ruleset(Arc::new(compile(id, raw)?))),
        ComponentKind::Input => InputConfig::parse(raw)
            .map(|c| Parsed::Input(Arc::new(c)))
            .map_err(|e| parse_err(kind, id, e)),
        ComponentKind::Output => OutputConfig::parse(raw)
            .map(|c| Parsed::Output(Arc::new(c)))
            .map_err(|e| parse_err(kind, id, e)),
        ComponentKind::Project => Ok(Parsed::Project(Arc::new(ProjectDef::parse(id, raw, false)?))),
        ComponentKind::Plugin => {
            if raw.trim().is_empty() {
                return Err(StructError::from(CoreReason::Registry)
                    .with_detail(format!("plugin {id:?}: empty source")));
            }
            Ok(Parsed::Plugin(Arc::new(raw.to_string())))
        }
    }
}

fn parse_err(kind: ComponentKind, id: &str, e: anyhow::Error) -> CoreError {
    StructError::from(CoreReason::Registry).with_detail(format!("{kind} {id:?}: {e}"))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Formal and pending configurations for every component kind.
///
/// Reads merge the pending (`New`) map over the formal one; writes land in
/// the pending map until applied. The single coarse lock is never held
/// across file I/O: mutations collect under the lock, do I/O, then
/// re-acquire briefly to update the maps.
pub struct Registry {
    store: ArtifactStore,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    rulesets: HashMap<String, Arc<CompiledRuleset>>,
    inputs: HashMap<String, Arc<InputConfig>>,
    outputs: HashMap<String, Arc<OutputConfig>>,
    projects: HashMap<String, Arc<ProjectDef>>,
    plugins: HashMap<String, Arc<String>>,
    /// Verbatim formal text per `(kind, id)`.
    raw: HashMap<(ComponentKind, String), String>,
    /// Pending (unapplied) text per `(kind, id)`; shadows formal for reads.
    pending: HashMap<(ComponentKind, String), String>,
}

impl Inner {
    fn install(&mut self, kind: ComponentKind, id: &str, raw: String, parsed: Parsed) {
        match parsed {
            Parsed::Ruleset(v) => {
                self.rulesets.insert(id.to_string(), v);
            }
            Parsed::Input(v) => {
                self.inputs.insert(id.to_string(), v);
            }
            Parsed::Output(v) => {
                self.outputs.insert(id.to_string(), v);
            }
            Parsed::Project(v) => {
                self.projects.insert(id.to_string(), v);
            }
            Parsed::Plugin(v) => {
                self.plugins.insert(id.to_string(), v);
            }
        }
        self.raw.insert((kind, id.to_string()), raw);
    }

    fn evict(&mut self, kind: ComponentKind, id: &str) {
        match kind {
            ComponentKind::Ruleset => {
                self.rulesets.remove(id);
            }
            ComponentKind::Input => {
                self.inputs.remove(id);
            }
            ComponentKind::Output => {
                self.outputs.remove(id);
            }
            ComponentKind::Project => {
                self.projects.remove(id);
            }
            ComponentKind::Plugin => {
                self.plugins.remove(id);
            }
        }
        self.raw.remove(&(kind, id.to_string()));
        self.pending.remove(&(kind, id.to_string()));
    }

    fn formal_ids(&self, kind: ComponentKind) -> Vec<String> {
        self.raw
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn projects_referencing(&self, kind: ComponentKind, id: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .projects
            .values()
            .filter(|p| p.references(kind, id))
            .map(|p| p.id.clone())
            .collect();
        out.sort();
        out
    }
}

impl Registry {
    /// Load every formal and pending artifact from the store. A formal
    /// artifact that fails to parse aborts the load; the hub never boots
    /// with half a configuration.
    pub fn load(store: ArtifactStore) -> CoreResult<Self> {
        let mut inner = Inner::default();
        for kind in ComponentKind::ALL {
            let formal = store
                .load_formal(kind)
                .map_err(|e| StructError::from(CoreReason::Registry).with_detail(e.to_string()))?;
            for (id, raw) in formal {
                let parsed = parse_artifact(kind, &id, &raw)?;
                inner.install(kind, &id, raw, parsed);
            }
            let pending = store
                .load_pending(kind)
                .map_err(|e| StructError::from(CoreReason::Registry).with_detail(e.to_string()))?;
            for (id, raw) in pending {
                inner.pending.insert((kind, id), raw);
            }
        }
        Ok(Self {
            store,
            inner: RwLock::new(inner),
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    // -- reads --------------------------------------------------------------

    /// All ids of a kind (formal ∪ pending), with the pending marker.
    pub fn list(&self, kind: ComponentKind) -> Vec<ListEntry> {
        let inner = self.inner.read().expect("lock poisoned");
        let mut ids: Vec<String> = inner.formal_ids(kind);
        for (k, id) in inner.pending.keys() {
            if *k == kind && !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.sort();
        ids.into_iter()
            .map(|id| {
                let has_temp = inner.pending.contains_key(&(kind, id.clone()));
                ListEntry { id, has_temp }
            })
            .collect()
    }

    /// Raw text for the editor: pending shadows formal.
    pub fn get_raw(&self, kind: ComponentKind, id: &str) -> Option<(String, bool)> {
        let inner = self.inner.read().expect("lock poisoned");
        let key = (kind, id.to_string());
        if let Some(raw) = inner.pending.get(&key) {
            return Some((raw.clone(), true));
        }
        inner.raw.get(&key).map(|raw| (raw.clone(), false))
    }

    pub fn ruleset(&self, id: &str) -> Option<Arc<CompiledRuleset>> {
        self.inner.read().expect("lock poisoned").rulesets.get(id).cloned()
    }

    pub fn input(&self, id: &str) -> Option<Arc<InputConfig>> {
        self.inner.read().expect("lock poisoned").inputs.get(id).cloned()
    }

    pub fn output(&self, id: &str) -> Option<Arc<OutputConfig>> {
        self.inner.read().expect("lock poisoned").outputs.get(id).cloned()
    }

    pub fn project(&self, id: &str) -> Option<Arc<ProjectDef>> {
        self.inner.read().expect("lock poisoned").projects.get(id).cloned()
    }

    pub fn projects(&self) -> Vec<Arc<ProjectDef>> {
        let mut out: Vec<Arc<ProjectDef>> = self
            .inner
            .read()
            .expect("lock poisoned")
            .projects
            .values()
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn plugin_source(&self, id: &str) -> Option<Arc<String>> {
        self.inner.read().expect("lock poisoned").plugins.get(id).cloned()
    }

    /// Formal projects whose flow graph references `(kind, id)`.
    pub fn projects_referencing(&self, kind: ComponentKind, id: &str) -> Vec<String> {
        self.inner
            .read()
            .expect("lock poisoned")
            .projects_referencing(kind, id)
    }

    /// Every pending diff, for the review endpoint.
    pub fn pending_changes(&self) -> Vec<PendingChange> {
        let inner = self.inner.read().expect("lock poisoned");
        let mut out: Vec<PendingChange> = inner
            .pending
            .iter()
            .map(|((kind, id), pending)| PendingChange {
                kind: *kind,
                id: id.clone(),
                pending: pending.clone(),
                formal: inner.raw.get(&(*kind, id.clone())).cloned(),
            })
            .collect();
        out.sort_by(|a, b| (a.kind.dir(), &a.id).cmp(&(b.kind.dir(), &b.id)));
        out
    }

    /// Dry-parse without side effects.
    pub fn verify(kind: ComponentKind, id: &str, raw: &str) -> CoreResult<()> {
        parse_artifact(kind, id, raw).map(|_| ())
    }

    // -- pending workspace --------------------------------------------------

    /// Stage a new component from a template (or provided raw). Duplicate
    /// ids — formal or pending — are rejected.
    pub fn create(&self, kind: ComponentKind, id: &str, raw: Option<String>) -> CoreResult<()> {
        ArtifactStore::validate_id(id)
            .map_err(|e| StructError::from(CoreReason::Registry).with_detail(e.to_string()))?;
        let key = (kind, id.to_string());
        {
            let inner = self.inner.read().expect("lock poisoned");
            if inner.raw.contains_key(&key) || inner.pending.contains_key(&key) {
                return Err(StructError::from(CoreReason::Registry)
                    .with_detail(format!("{kind} {id:?} already exists")));
            }
        }
        let raw = raw.unwrap_or_else(|| template(kind, id));
        self.store
            .write_pending(kind, id, &raw)
            .map_err(|e| StructError::from(CoreReason::Registry).with_detail(e.to_string()))?;
        self.inner
            .write()
            .expect("lock poisoned")
            .pending
            .insert(key, raw);
        Ok(())
    }

    /// Stage an update. Writing text identical to the formal version clears
    /// the pending copy instead.
    pub fn update(&self, kind: ComponentKind, id: &str, raw: &str) -> CoreResult<()> {
        let key = (kind, id.to_string());
        let equals_formal = {
            let inner = self.inner.read().expect("lock poisoned");
            inner.raw.get(&key).is_some_and(|formal| formal == raw)
        };
        if equals_formal {
            self.store
                .discard_pending(kind, id)
                .map_err(|e| StructError::from(CoreReason::Registry).with_detail(e.to_string()))?;
            self.inner.write().expect("lock poisoned").pending.remove(&key);
            return Ok(());
        }
        self.store
            .write_pending(kind, id, raw)
            .map_err(|e| StructError::from(CoreReason::Registry).with_detail(e.to_string()))?;
        self.inner
            .write()
            .expect("lock poisoned")
            .pending
            .insert(key, raw.to_string());
        Ok(())
    }

    // -- apply / delete -----------------------------------------------------

    /// Promote the pending version to formal. Parse failures leave both the
    /// pending copy and the running configuration untouched.
    pub fn apply(&self, kind: ComponentKind, id: &str) -> CoreResult<ApplyOutcome> {
        let key = (kind, id.to_string());
        let pending = {
            let inner = self.inner.read().expect("lock poisoned");
            inner.pending.get(&key).cloned()
        };
        let Some(raw) = pending else {
            // Nothing staged; re-apply is a no-op.
            return Ok(ApplyOutcome {
                kind,
                id: id.to_string(),
                changed: false,
                affected_projects: Vec::new(),
                hot_swappable: false,
            });
        };

        let parsed = parse_artifact(kind, id, &raw)?;

        self.store
            .promote(kind, id)
            .map_err(|e| StructError::from(CoreReason::Registry).with_detail(e.to_string()))?;

        let mut inner = self.inner.write().expect("lock poisoned");
        let hot_swappable = match (&parsed, kind) {
            (Parsed::Ruleset(next), ComponentKind::Ruleset) => inner
                .rulesets
                .get(id)
                .map(|prev| prev.kind == next.kind)
                .unwrap_or(false),
            _ => false,
        };
        inner.pending.remove(&key);
        inner.install(kind, id, raw, parsed);
        let affected_projects = match kind {
            ComponentKind::Project => vec![id.to_string()],
            _ => inner.projects_referencing(kind, id),
        };
        Ok(ApplyOutcome {
            kind,
            id: id.to_string(),
            changed: true,
            affected_projects,
            hot_swappable,
        })
    }

    /// Remove a component everywhere. Refused while any formal project still
    /// references it.
    pub fn delete(&self, kind: ComponentKind, id: &str) -> CoreResult<()> {
        let key = (kind, id.to_string());
        {
            let inner = self.inner.read().expect("lock poisoned");
            if !inner.raw.contains_key(&key) && !inner.pending.contains_key(&key) {
                return Err(StructError::from(CoreReason::Registry)
                    .with_detail(format!("{kind} {id:?} does not exist")));
            }
            let holders = inner.projects_referencing(kind, id);
            if !holders.is_empty() {
                return Err(StructError::from(CoreReason::ReferenceConflict).with_detail(format!(
                    "{kind} {id:?} is referenced by projects: {}",
                    holders.join(", ")
                )));
            }
        }
        self.store
            .remove(kind, id)
            .map_err(|e| StructError::from(CoreReason::Registry).with_detail(e.to_string()))?;
        self.inner.write().expect("lock poisoned").evict(kind, id);
        Ok(())
    }

    // -- follower sync ------------------------------------------------------

    /// Install a leader-synced formal version directly (followers never
    /// stage pending copies).
    pub fn apply_synced(&self, kind: ComponentKind, id: &str, raw: &str) -> CoreResult<ApplyOutcome> {
        let parsed = parse_artifact(kind, id, raw)?;
        self.store
            .write_formal(kind, id, raw)
            .map_err(|e| StructError::from(CoreReason::Registry).with_detail(e.to_string()))?;
        let mut inner = self.inner.write().expect("lock poisoned");
        let hot_swappable = match (&parsed, kind) {
            (Parsed::Ruleset(next), ComponentKind::Ruleset) => inner
                .rulesets
                .get(id)
                .map(|prev| prev.kind == next.kind)
                .unwrap_or(false),
            _ => false,
        };
        inner.install(kind, id, raw.to_string(), parsed);
        let affected_projects = match kind {
            ComponentKind::Project => vec![id.to_string()],
            _ => inner.projects_referencing(kind, id),
        };
        Ok(ApplyOutcome {
            kind,
            id: id.to_string(),
            changed: true,
            affected_projects,
            hot_swappable,
        })
    }
}

/// Starter content for freshly created components.
fn template(kind: ComponentKind, id: &str) -> String {
    match kind {
        ComponentKind::Input => "type: kafka\nbrokers: []\ntopic: \"\"\n".to_string(),
        ComponentKind::Output => "type: print\n".to_string(),
        ComponentKind::Ruleset => format!("<root type=\"DETECTION\" name=\"{id}\">\n</root>\n"),
        ComponentKind::Project => {
            "content: |\n  INPUT.change_me -> OUTPUT.change_me\n".to_string()
        }
        ComponentKind::Plugin => "#!builtin is_private_ip\n".to_string(),
    }
}
