use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use hub_lang::{InclLogic, RulesetKind};

use crate::plugin::{PluginHost, field_args};
use crate::record::Record;

use super::compile::{
    CompiledAction, CompiledAppend, CompiledCheck, CompiledRule, CompiledRuleset, NumSource,
    ValueSource,
};
use super::RULE_ID_FIELD;

// ---------------------------------------------------------------------------
// Per-ruleset evaluation counters
// ---------------------------------------------------------------------------

/// Match/failure counters per rule id, shared by a shell's worker pool.
#[derive(Debug, Default)]
pub struct RulesetStats {
    rules: HashMap<String, RuleCounters>,
}

#[derive(Debug, Default)]
struct RuleCounters {
    matched: AtomicU64,
    failures: AtomicU64,
}

impl RulesetStats {
    pub fn for_ruleset(ruleset: &CompiledRuleset) -> Self {
        Self {
            rules: ruleset
                .rules
                .iter()
                .map(|r| (r.id.clone(), RuleCounters::default()))
                .collect(),
        }
    }

    pub fn matched(&self, rule_id: &str) -> u64 {
        self.rules
            .get(rule_id)
            .map(|c| c.matched.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn failures(&self, rule_id: &str) -> u64 {
        self.rules
            .get(rule_id)
            .map(|c| c.failures.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn inc_matched(&self, rule_id: &str) {
        if let Some(c) = self.rules.get(rule_id) {
            c.matched.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a failure; the first one per rule is logged at warn, the rest
    /// at debug to keep noisy rules out of the log.
    fn count_failure(&self, ruleset: &str, rule_id: &str, what: &str, err: &dyn std::fmt::Display) {
        let first = self
            .rules
            .get(rule_id)
            .map(|c| c.failures.fetch_add(1, Ordering::Relaxed) == 0)
            .unwrap_or(true);
        if first {
            tracing::warn!(
                domain = "pipe",
                ruleset,
                rule = rule_id,
                error = %err,
                "{what} failed"
            );
        } else {
            tracing::debug!(
                domain = "pipe",
                ruleset,
                rule = rule_id,
                error = %err,
                "{what} failed"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate one record through the full rule chain, in declaration order.
///
/// DETECTION forwards every record, augmenting matches with action effects
/// and the `rule_id` marker. FILTER forwards only matched records (with
/// successful action mutations applied). Mutations accumulate across matched
/// rules on the same working copy.
pub fn evaluate(
    ruleset: &CompiledRuleset,
    host: &PluginHost,
    record: Record,
    stats: &RulesetStats,
) -> Vec<Record> {
    let mut working = record;
    let mut markers: Vec<&str> = Vec::new();

    for rule in &ruleset.rules {
        if !eligible(rule, &working) {
            continue;
        }
        if !checklist_matches(rule, &working, ruleset, host, stats) {
            continue;
        }
        stats.inc_matched(&rule.id);
        markers.push(&rule.marker);
        apply_actions(rule, &mut working, ruleset, host, stats);
    }

    match ruleset.kind {
        RulesetKind::Detection => {
            if !markers.is_empty() {
                working.set(RULE_ID_FIELD, Value::String(markers.join(",")));
            }
            vec![working]
        }
        RulesetKind::Filter => {
            if markers.is_empty() {
                Vec::new()
            } else {
                vec![working]
            }
        }
    }
}

/// Rule eligibility gate; a missing field or unresolvable reference means
/// not eligible, never an error.
fn eligible(rule: &CompiledRule, record: &Record) -> bool {
    let Some(filter) = &rule.filter else {
        return true;
    };
    let Some(actual) = record.get_str(&filter.field) else {
        return false;
    };
    match resolve(&filter.value, record) {
        Some(expected) => actual == expected,
        None => false,
    }
}

fn checklist_matches(
    rule: &CompiledRule,
    record: &Record,
    ruleset: &CompiledRuleset,
    host: &PluginHost,
    stats: &RulesetStats,
) -> bool {
    // A checklist with zero nodes matches nothing.
    if rule.nodes.is_empty() {
        return false;
    }

    let mut truth: HashMap<&str, bool> = HashMap::with_capacity(rule.nodes.len());
    for node in &rule.nodes {
        let hit = match &node.check {
            CompiledCheck::Regex(re) => record
                .get_str(&node.field)
                .map(|v| re.is_match(&v))
                .unwrap_or(false),
            CompiledCheck::Incl { needles, logic } => record
                .get_str(&node.field)
                .map(|v| match logic {
                    InclLogic::Single | InclLogic::Or => {
                        needles.iter().any(|n| v.contains(n.as_str()))
                    }
                    InclLogic::And => needles.iter().all(|n| v.contains(n.as_str())),
                })
                .unwrap_or(false),
            CompiledCheck::Equ(source) => match (record.get_str(&node.field), resolve(source, record)) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => false,
            },
            CompiledCheck::NumCmp { op, rhs } => {
                let lhs = record.get_f64(&node.field);
                let rhs = match rhs {
                    NumSource::Literal(v) => Some(*v),
                    NumSource::FieldRef(field) => record.get_f64(field),
                };
                match (lhs, rhs) {
                    (Some(l), Some(r)) => op.holds(l, r),
                    _ => false,
                }
            }
            CompiledCheck::Plugin { plugin } => {
                let args = field_args(record, std::slice::from_ref(&node.field));
                match host.invoke_predicate(plugin, &args) {
                    Ok(hit) => hit,
                    Err(e) => {
                        stats.count_failure(&ruleset.name, &rule.id, "checklist plugin", &e);
                        false
                    }
                }
            }
        };
        truth.insert(node.id.as_str(), hit);
    }

    match &rule.condition {
        Some(cond) => cond.eval(&|id| truth.get(id).copied().unwrap_or(false)),
        // Missing condition means AND of all nodes.
        None => truth.values().all(|&v| v),
    }
}

/// Run actions in declaration order. A failed action is counted and logged;
/// the remaining actions still run.
fn apply_actions(
    rule: &CompiledRule,
    record: &mut Record,
    ruleset: &CompiledRuleset,
    host: &PluginHost,
    stats: &RulesetStats,
) {
    for action in &rule.actions {
        match action {
            CompiledAction::Append { field, source } => match source {
                CompiledAppend::Value(value) => match resolve(value, record) {
                    Some(v) => record.set(field, Value::String(v)),
                    None => stats.count_failure(
                        &ruleset.name,
                        &rule.id,
                        "append",
                        &format_args!("unresolved reference for field {field:?}"),
                    ),
                },
                CompiledAppend::Plugin { plugin, args } => {
                    let args = field_args(record, args);
                    match host.invoke_transform(plugin, &args) {
                        Ok(value) => record.set(field, value),
                        Err(e) => stats.count_failure(&ruleset.name, &rule.id, "append plugin", &e),
                    }
                }
            },
            CompiledAction::Del { fields } => {
                for field in fields {
                    record.remove(field);
                }
            }
            CompiledAction::Plugin { plugin, args } => {
                let args = field_args(record, args);
                match host.invoke_transform(plugin, &args) {
                    Ok(value @ Value::Object(_)) => record.merge_object(value),
                    Ok(_) => stats.count_failure(
                        &ruleset.name,
                        &rule.id,
                        "plugin action",
                        &format_args!("{plugin:?} did not return an object"),
                    ),
                    Err(e) => stats.count_failure(&ruleset.name, &rule.id, "plugin action", &e),
                }
            }
        }
    }
}

fn resolve(source: &ValueSource, record: &Record) -> Option<String> {
    match source {
        ValueSource::Literal(v) => Some(v.clone()),
        ValueSource::FieldRef(field) => record.get_str(field),
    }
}
