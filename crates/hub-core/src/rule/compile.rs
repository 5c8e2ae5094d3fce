use std::collections::HashMap;

use orion_error::prelude::*;
use regex::Regex;

use hub_lang::{
    ActionDef, AppendSourceDef, CheckKindDef, CmpOp, CondExpr, InclLogic, RulesetKind,
    parse_ruleset,
};

use crate::error::{CoreReason, CoreResult};

// ---------------------------------------------------------------------------
// Compiled forms
// ---------------------------------------------------------------------------

/// An immutable, fully-validated ruleset: regexes compiled, numeric literals
/// parsed, condition references resolved. Shells share it behind an `Arc`.
#[derive(Debug)]
pub struct CompiledRuleset {
    /// Registry id (identity authority, not the XML `name` attribute).
    pub name: String,
    pub kind: RulesetKind,
    pub raw: String,
    pub rules: Vec<CompiledRule>,
}

#[derive(Debug)]
pub struct CompiledRule {
    pub id: String,
    /// `<ruleset>.<rule>` marker appended to DETECTION matches.
    pub marker: String,
    pub filter: Option<CompiledFilter>,
    pub condition: Option<CondExpr>,
    pub nodes: Vec<CompiledNode>,
    pub actions: Vec<CompiledAction>,
}

#[derive(Debug)]
pub struct CompiledFilter {
    pub field: String,
    pub value: ValueSource,
}

#[derive(Debug)]
pub struct CompiledNode {
    pub id: String,
    pub field: String,
    pub check: CompiledCheck,
}

#[derive(Debug)]
pub enum CompiledCheck {
    Regex(Regex),
    Incl {
        needles: Vec<String>,
        logic: InclLogic,
    },
    Equ(ValueSource),
    NumCmp {
        op: CmpOp,
        rhs: NumSource,
    },
    Plugin {
        plugin: String,
    },
}

#[derive(Debug)]
pub enum CompiledAction {
    Append {
        field: String,
        source: CompiledAppend,
    },
    Del {
        fields: Vec<String>,
    },
    Plugin {
        plugin: String,
        args: Vec<String>,
    },
}

#[derive(Debug)]
pub enum CompiledAppend {
    Value(ValueSource),
    Plugin { plugin: String, args: Vec<String> },
}

/// A literal, or a `_$field` dynamic reference resolved against the record
/// at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Literal(String),
    FieldRef(String),
}

impl ValueSource {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("_$") {
            Some(field) if !field.is_empty() => ValueSource::FieldRef(field.to_string()),
            _ => ValueSource::Literal(raw.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum NumSource {
    Literal(f64),
    FieldRef(String),
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Parse and compile ruleset XML. Fails with no side effects on any parse or
/// validation error; hot update relies on that.
pub fn compile(id: &str, raw: &str) -> CoreResult<CompiledRuleset> {
    let def = parse_ruleset(raw)
        .map_err(|e| StructError::from(CoreReason::RulesetParse).with_detail(e.to_string()))?;

    let mut rules = Vec::with_capacity(def.rules.len());
    for rule in def.rules {
        let mut node_ids: HashMap<&str, ()> = HashMap::new();
        for node in &rule.nodes {
            if node_ids.insert(node.id.as_str(), ()).is_some() {
                return Err(parse_err(format!(
                    "rule {:?}: duplicate checklist node id {:?}",
                    rule.id, node.id
                )));
            }
        }

        let mut nodes = Vec::with_capacity(rule.nodes.len());
        for node in &rule.nodes {
            let check = match &node.kind {
                CheckKindDef::Regex => {
                    let re = Regex::new(&node.value).map_err(|e| {
                        parse_err(format!(
                            "rule {:?} node {:?}: bad regex: {e}",
                            rule.id, node.id
                        ))
                    })?;
                    CompiledCheck::Regex(re)
                }
                CheckKindDef::Incl { delimiter, logic } => {
                    let needles = match (delimiter, logic) {
                        (Some(delim), InclLogic::Or | InclLogic::And) => node
                            .value
                            .split(delim.as_str())
                            .map(str::to_string)
                            .filter(|s| !s.is_empty())
                            .collect(),
                        _ => vec![node.value.clone()],
                    };
                    if needles.is_empty() {
                        return Err(parse_err(format!(
                            "rule {:?} node {:?}: INCL has no search terms",
                            rule.id, node.id
                        )));
                    }
                    CompiledCheck::Incl {
                        needles,
                        logic: *logic,
                    }
                }
                CheckKindDef::Equ => CompiledCheck::Equ(ValueSource::parse(&node.value)),
                CheckKindDef::NumCmp { op } => {
                    let rhs = match ValueSource::parse(&node.value) {
                        ValueSource::FieldRef(field) => NumSource::FieldRef(field),
                        ValueSource::Literal(lit) => {
                            let value: f64 = lit.trim().parse().map_err(|_| {
                                parse_err(format!(
                                    "rule {:?} node {:?}: non-numeric threshold {lit:?}",
                                    rule.id, node.id
                                ))
                            })?;
                            NumSource::Literal(value)
                        }
                    };
                    CompiledCheck::NumCmp { op: *op, rhs }
                }
                CheckKindDef::Plugin { plugin } => CompiledCheck::Plugin {
                    plugin: plugin.clone(),
                },
            };
            nodes.push(CompiledNode {
                id: node.id.clone(),
                field: node.field.clone(),
                check,
            });
        }

        let actions = rule
            .actions
            .iter()
            .map(|action| match action {
                ActionDef::Append { field, source } => CompiledAction::Append {
                    field: field.clone(),
                    source: match source {
                        AppendSourceDef::Literal(v) => CompiledAppend::Value(ValueSource::parse(v)),
                        AppendSourceDef::Plugin { plugin, args } => CompiledAppend::Plugin {
                            plugin: plugin.clone(),
                            args: args.clone(),
                        },
                    },
                },
                ActionDef::Del { fields } => CompiledAction::Del {
                    fields: fields.clone(),
                },
                ActionDef::Plugin { plugin, args } => CompiledAction::Plugin {
                    plugin: plugin.clone(),
                    args: args.clone(),
                },
            })
            .collect();

        rules.push(CompiledRule {
            marker: format!("{id}.{}", rule.id),
            id: rule.id,
            filter: rule.filter.map(|f| CompiledFilter {
                field: f.field,
                value: ValueSource::parse(&f.value),
            }),
            condition: rule.condition,
            nodes,
            actions,
        });
    }

    Ok(CompiledRuleset {
        name: id.to_string(),
        kind: def.kind,
        raw: raw.to_string(),
        rules,
    })
}

fn parse_err(detail: String) -> crate::error::CoreError {
    StructError::from(CoreReason::RulesetParse).with_detail(detail)
}
