mod condition;
mod xml;

#[cfg(test)]
mod tests;

pub use condition::parse_condition;
pub use xml::parse_ruleset;

// ---------------------------------------------------------------------------
// Ruleset AST
// ---------------------------------------------------------------------------

/// What a matched rule means for the record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulesetKind {
    /// Forward every record; matches are annotated with action effects and a
    /// rule-id marker.
    Detection,
    /// Forward only records matched by at least one rule.
    Filter,
}

/// A parsed ruleset document.
#[derive(Debug, Clone, PartialEq)]
pub struct RulesetDef {
    /// Optional display name from the root `name` attribute; the registry id
    /// is the identity authority.
    pub name: Option<String>,
    pub kind: RulesetKind,
    pub rules: Vec<RuleDef>,
}

/// One `<rule>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDef {
    pub id: String,
    /// Eligibility gate; a record failing the filter skips this rule.
    pub filter: Option<FilterDef>,
    /// Boolean combination over node ids; `None` means AND of all nodes.
    pub condition: Option<CondExpr>,
    pub nodes: Vec<CheckNodeDef>,
    pub actions: Vec<ActionDef>,
}

/// `<filter field="data_type">login</filter>` — field equality, with `_$ref`
/// dynamic references allowed in the value position.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDef {
    pub field: String,
    pub value: String,
}

/// One named `<node>` predicate inside a checklist.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckNodeDef {
    pub id: String,
    pub kind: CheckKindDef,
    pub field: String,
    /// Node text content (pattern, literal, threshold, or plugin argument).
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckKindDef {
    /// Field matches the regex in `value`.
    Regex,
    /// Field contains a substring; with a delimiter, `value` splits into
    /// alternatives tested per `logic`.
    Incl {
        delimiter: Option<String>,
        logic: InclLogic,
    },
    /// Field equals `value` (literal or `_$ref`).
    Equ,
    /// Numeric comparison of the field against `value`.
    NumCmp { op: CmpOp },
    /// Delegate to a named predicate plugin; the field value is the argument.
    Plugin { plugin: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InclLogic {
    #[default]
    Single,
    Or,
    And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "gt" => Ok(CmpOp::Gt),
            "ge" => Ok(CmpOp::Ge),
            "lt" => Ok(CmpOp::Lt),
            "le" => Ok(CmpOp::Le),
            "eq" => Ok(CmpOp::Eq),
            "ne" => Ok(CmpOp::Ne),
            other => anyhow::bail!("unknown compare op {other:?} (expected gt|ge|lt|le|eq|ne)"),
        }
    }

    pub fn holds(&self, left: f64, right: f64) -> bool {
        match self {
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
        }
    }
}

/// Executed in declaration order when a rule matches.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDef {
    /// `<append field_name="x">literal</append>` or
    /// `<append field_name="x" type="PLUGIN" plugin="p" field="a,b"/>`.
    Append {
        field: String,
        source: AppendSourceDef,
    },
    /// `<del>a,b,c</del>` — remove a field list.
    Del { fields: Vec<String> },
    /// `<plugin name="p" field="a,b"/>` — a transform whose object result is
    /// merged into the record.
    Plugin { plugin: String, args: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppendSourceDef {
    Literal(String),
    Plugin { plugin: String, args: Vec<String> },
}

// ---------------------------------------------------------------------------
// Checklist condition expression
// ---------------------------------------------------------------------------

/// `a and (b or not c)` over checklist node ids.
#[derive(Debug, Clone, PartialEq)]
pub enum CondExpr {
    Node(String),
    Not(Box<CondExpr>),
    And(Box<CondExpr>, Box<CondExpr>),
    Or(Box<CondExpr>, Box<CondExpr>),
}

impl CondExpr {
    /// Evaluate against a per-node truth lookup. Unknown node ids evaluate to
    /// false (callers validate referenced ids at compile time).
    pub fn eval(&self, lookup: &impl Fn(&str) -> bool) -> bool {
        match self {
            CondExpr::Node(id) => lookup(id),
            CondExpr::Not(inner) => !inner.eval(lookup),
            CondExpr::And(a, b) => a.eval(lookup) && b.eval(lookup),
            CondExpr::Or(a, b) => a.eval(lookup) || b.eval(lookup),
        }
    }

    /// Collect every node id referenced by the expression.
    pub fn referenced_nodes(&self) -> Vec<&str> {
        fn walk<'a>(expr: &'a CondExpr, out: &mut Vec<&'a str>) {
            match expr {
                CondExpr::Node(id) => out.push(id),
                CondExpr::Not(inner) => walk(inner, out),
                CondExpr::And(a, b) | CondExpr::Or(a, b) => {
                    walk(a, out);
                    walk(b, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}
