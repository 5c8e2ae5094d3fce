pub mod flow;
pub mod ruleset;

pub use flow::{FlowPath, NodeKind, NodeRef, parse_flow};
pub use ruleset::{
    ActionDef, AppendSourceDef, CheckKindDef, CheckNodeDef, CmpOp, CondExpr, FilterDef, InclLogic,
    RuleDef, RulesetDef, RulesetKind, parse_condition, parse_ruleset,
};
