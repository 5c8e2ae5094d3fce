mod compile;
mod eval;


pub use compile::{
    CompiledAction, CompiledAppend, CompiledCheck, CompiledFilter, CompiledNode, CompiledRule,
    CompiledRuleset, NumSource, ValueSource, compile,
};
pub use eval::{RulesetStats, evaluate};

use std::sync::{Arc, RwLock};

/// Field appended to DETECTION matches, carrying the comma-joined
/// `<ruleset>.<rule>` markers of every matched rule.
pub const RULE_ID_FIELD: &str = "rule_id";

// ---------------------------------------------------------------------------
// RulesetHandle — hot-swappable compiled ruleset
// ---------------------------------------------------------------------------

/// Shared cell holding the current compiled ruleset for a shell.
///
/// Workers clone the inner `Arc` once per record, so a swap takes effect for
/// records accepted strictly after it while in-flight evaluations finish on
/// the version they started with.
#[derive(Debug)]
pub struct RulesetHandle {
    current: RwLock<Arc<CompiledRuleset>>,
}

impl RulesetHandle {
    pub fn new(ruleset: Arc<CompiledRuleset>) -> Self {
        Self {
            current: RwLock::new(ruleset),
        }
    }

    pub fn load(&self) -> Arc<CompiledRuleset> {
        Arc::clone(&self.current.read().expect("lock poisoned"))
    }

    /// Atomically replace the compiled ruleset (hot update swap point).
    pub fn swap(&self, next: Arc<CompiledRuleset>) {
        *self.current.write().expect("lock poisoned") = next;
    }
}
