mod builtin;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use orion_error::prelude::*;
use serde_json::Value;

use crate::error::{CoreReason, CoreResult};
use crate::metrics::DailyStats;
use crate::record::Record;

// ---------------------------------------------------------------------------
// Callables
// ---------------------------------------------------------------------------

pub type PredicateFn = Arc<dyn Fn(&[Value]) -> anyhow::Result<bool> + Send + Sync>;
pub type TransformFn = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// A registered plugin body. Predicates gate checklist nodes; transforms
/// produce field content (or whole objects to merge).
#[derive(Clone)]
pub enum Callable {
    Predicate(PredicateFn),
    Transform(TransformFn),
}

impl Callable {
    pub fn kind(&self) -> PluginKind {
        match self {
            Callable::Predicate(_) => PluginKind::Predicate,
            Callable::Transform(_) => PluginKind::Transform,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Predicate,
    Transform,
}

// ---------------------------------------------------------------------------
// Dynamic plugin compilation seam
// ---------------------------------------------------------------------------

/// Turns persisted plugin source into a callable.
///
/// The host ships with [`BuiltinCompiler`], which only resolves
/// `#!builtin <name>` alias sources; embedders with a scripting runtime
/// provide their own implementation.
pub trait PluginCompiler: Send + Sync {
    fn compile(&self, name: &str, source: &str) -> CoreResult<Callable>;
}

/// Resolves `#!builtin <name>` directives against the built-in table and
/// rejects anything else.
pub struct BuiltinCompiler;

impl PluginCompiler for BuiltinCompiler {
    fn compile(&self, name: &str, source: &str) -> CoreResult<Callable> {
        let first = source.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        if let Some(target) = first.trim().strip_prefix("#!builtin") {
            let target = target.trim();
            return builtin::table()
                .get(target)
                .cloned()
                .ok_or_else(|| {
                    StructError::from(CoreReason::PluginExec)
                        .with_detail(format!("plugin {name:?}: unknown builtin {target:?}"))
                });
        }
        Err(StructError::from(CoreReason::PluginExec).with_detail(format!(
            "plugin {name:?}: no scripting runtime linked; only '#!builtin <name>' sources load"
        )))
    }
}

// ---------------------------------------------------------------------------
// PluginHost
// ---------------------------------------------------------------------------

/// Named plugin registry with panic containment and daily invocation stats.
pub struct PluginHost {
    plugins: RwLock<HashMap<String, Callable>>,
    stats: Arc<DailyStats>,
}

impl PluginHost {
    /// A host pre-loaded with the built-in table.
    pub fn with_builtins(stats: Arc<DailyStats>) -> Self {
        Self {
            plugins: RwLock::new(builtin::table().clone()),
            stats,
        }
    }

    /// A detached registry for test compilation: same built-ins, separate
    /// dynamic entries and separate counters, so test invocations never
    /// touch the live registry.
    pub fn detached(&self) -> Self {
        Self::with_builtins(Arc::new(DailyStats::new(self.stats.node_id())))
    }

    pub fn stats(&self) -> &Arc<DailyStats> {
        &self.stats
    }

    pub fn register(&self, name: &str, callable: Callable) {
        self.plugins
            .write()
            .expect("lock poisoned")
            .insert(name.to_string(), callable);
    }

    pub fn remove(&self, name: &str) {
        self.plugins.write().expect("lock poisoned").remove(name);
    }

    pub fn kind_of(&self, name: &str) -> Option<PluginKind> {
        self.plugins
            .read()
            .expect("lock poisoned")
            .get(name)
            .map(Callable::kind)
    }

    /// Compile persisted source through `compiler` and register it.
    pub fn load_source(
        &self,
        name: &str,
        source: &str,
        compiler: &dyn PluginCompiler,
    ) -> CoreResult<()> {
        let callable = compiler.compile(name, source)?;
        self.register(name, callable);
        Ok(())
    }

    // -- invocation ---------------------------------------------------------

    pub fn invoke_predicate(&self, name: &str, args: &[Value]) -> CoreResult<bool> {
        match self.lookup(name)? {
            Callable::Predicate(f) => self.guarded(name, || f(args)),
            Callable::Transform(_) => Err(self.wrong_kind(name, "predicate")),
        }
    }

    pub fn invoke_transform(&self, name: &str, args: &[Value]) -> CoreResult<Value> {
        match self.lookup(name)? {
            Callable::Transform(f) => self.guarded(name, || f(args)),
            Callable::Predicate(_) => Err(self.wrong_kind(name, "transform")),
        }
    }

    fn lookup(&self, name: &str) -> CoreResult<Callable> {
        self.plugins
            .read()
            .expect("lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| {
                StructError::from(CoreReason::PluginExec)
                    .with_detail(format!("unknown plugin {name:?}"))
            })
    }

    fn wrong_kind(&self, name: &str, expected: &str) -> crate::error::CoreError {
        self.stats.record_plugin(name, false);
        StructError::from(CoreReason::PluginExec)
            .with_detail(format!("plugin {name:?} is not a {expected}"))
    }

    /// Run a plugin body, converting panics into execution errors and
    /// recording the per-invocation daily counter.
    fn guarded<T>(&self, name: &str, f: impl FnOnce() -> anyhow::Result<T>) -> CoreResult<T> {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(f));
        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StructError::from(CoreReason::PluginExec)
                .with_detail(format!("plugin {name:?}: {e}"))),
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                Err(StructError::from(CoreReason::PluginExec)
                    .with_detail(format!("plugin {name:?} panicked: {msg}")))
            }
        };
        self.stats.record_plugin(name, result.is_ok());
        result
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

/// Gather record fields as plugin arguments; missing fields become `null`.
pub fn field_args(record: &Record, fields: &[String]) -> Vec<Value> {
    fields
        .iter()
        .map(|f| record.get(f).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Scalar coercion for plugin bodies: numbers and booleans are formatted,
/// nested values serialized to canonical JSON, `null` is absent.
pub fn arg_str(args: &[Value], idx: usize) -> Option<String> {
    match args.get(idx)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        nested => Some(nested.to_string()),
    }
}
