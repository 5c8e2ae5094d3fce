#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fmt;

use orion_error::prelude::*;
use serde::{Deserialize, Serialize};

use hub_config::ComponentKind;
use hub_lang::{FlowPath, NodeKind, NodeRef, parse_flow};

use crate::error::{CoreReason, CoreResult};

// ---------------------------------------------------------------------------
// PNS — Project Node Sequence
// ---------------------------------------------------------------------------

/// Path-qualified identity of a component instance within a project:
/// `INPUT.a.RULESET.r.OUTPUT.o`. Two distinct PNS values for the same logical
/// id name two independent runtime shells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pns(String);

impl Pns {
    pub fn root(node: &NodeRef) -> Self {
        Self(format!("{}.{}", node.kind.keyword(), node.id))
    }

    /// Root PNS from a preformatted `TYPE.id` string (test helpers).
    pub fn root_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn child(&self, node: &NodeRef) -> Self {
        Self(format!("{}.{}.{}", self.0, node.kind.keyword(), node.id))
    }

    /// Prefix used to keep test replays out of live metrics and instances.
    pub fn test_scoped(&self, project_id: &str) -> Self {
        Self(format!("TEST_{project_id}_{}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Node depth = number of `TYPE.id` segments on the path.
    pub fn depth(&self) -> usize {
        let dots = self.0.matches('.').count();
        dots.div_ceil(2)
    }
}

impl fmt::Display for Pns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Flow nodes and project definitions
// ---------------------------------------------------------------------------

/// One wired edge of the flow graph with both endpoints PNS-qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowNode {
    pub from: NodeRef,
    pub from_pns: Pns,
    pub to: NodeRef,
    pub to_pns: Pns,
}

/// Project lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

#[derive(Debug, Deserialize)]
struct ProjectYaml {
    content: String,
}

/// Parsed project: the raw YAML, its DSL body, per-line paths, and the
/// deduplicated PNS-qualified edge list.
#[derive(Debug, Clone)]
pub struct ProjectDef {
    pub id: String,
    pub raw: String,
    pub content: String,
    pub paths: Vec<FlowPath>,
    pub flow_nodes: Vec<FlowNode>,
}

impl ProjectDef {
    /// Parse project YAML (`content: |` body) and resolve the flow graph.
    /// In test mode every PNS is prefixed `TEST_<id>_` so replay shells and
    /// metrics stay isolated from live ones.
    pub fn parse(id: &str, raw: &str, test_mode: bool) -> CoreResult<Self> {
        let yaml: ProjectYaml = serde_yaml::from_str(raw)
            .map_err(|e| StructError::from(CoreReason::ProjectBuild).with_detail(e.to_string()))?;
        let paths = parse_flow(&yaml.content)
            .map_err(|e| StructError::from(CoreReason::ProjectBuild).with_detail(e.to_string()))?;

        let mut flow_nodes = Vec::new();
        let mut seen: HashSet<(Pns, Pns)> = HashSet::new();
        for path in &paths {
            let mut prev_pns = {
                let root = Pns::root(&path.nodes[0]);
                if test_mode { root.test_scoped(id) } else { root }
            };
            for pair in path.nodes.windows(2) {
                let to_pns = prev_pns.child(&pair[1]);
                // The (from_pns, to_pns) edge set has no duplicates: shared
                // path prefixes collapse onto the same shells and edges.
                if seen.insert((prev_pns.clone(), to_pns.clone())) {
                    flow_nodes.push(FlowNode {
                        from: pair[0].clone(),
                        from_pns: prev_pns.clone(),
                        to: pair[1].clone(),
                        to_pns: to_pns.clone(),
                    });
                }
                prev_pns = to_pns;
            }
        }

        Ok(Self {
            id: id.to_string(),
            raw: raw.to_string(),
            content: yaml.content,
            paths,
            flow_nodes,
        })
    }

    /// Does any flow node reference this `(kind, id)`?
    pub fn references(&self, kind: ComponentKind, id: &str) -> bool {
        let Some(node_kind) = node_kind_for(kind) else {
            return false;
        };
        self.flow_nodes.iter().any(|fnode| {
            (fnode.from.kind == node_kind && fnode.from.id == id)
                || (fnode.to.kind == node_kind && fnode.to.id == id)
        })
    }

    /// Unique `(node, pns)` pairs across the graph.
    pub fn pns_nodes(&self) -> Vec<(NodeRef, Pns)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for fnode in &self.flow_nodes {
            for (node, pns) in [
                (&fnode.from, &fnode.from_pns),
                (&fnode.to, &fnode.to_pns),
            ] {
                if seen.insert(pns.clone()) {
                    out.push((node.clone(), pns.clone()));
                }
            }
        }
        out
    }

    /// Shell start order: reverse-topological (deepest first), so every
    /// consumer is draining before its producer starts. With PNS identity,
    /// depth strictly increases along every edge.
    pub fn start_order(&self) -> Vec<(NodeRef, Pns)> {
        let mut nodes = self.pns_nodes();
        nodes.sort_by(|a, b| b.1.depth().cmp(&a.1.depth()).then(a.1.cmp(&b.1)));
        nodes
    }

    /// Shell stop order: forward-topological (inputs first), so producers
    /// quiesce before their consumers drain out.
    pub fn stop_order(&self) -> Vec<(NodeRef, Pns)> {
        let mut nodes = self.pns_nodes();
        nodes.sort_by(|a, b| a.1.depth().cmp(&b.1.depth()).then(a.1.cmp(&b.1)));
        nodes
    }

    /// Upstream edges of a given consumer PNS.
    pub fn edges_into(&self, pns: &Pns) -> Vec<&FlowNode> {
        self.flow_nodes
            .iter()
            .filter(|fnode| &fnode.to_pns == pns)
            .collect()
    }
}

/// Map registry kinds onto flow node kinds; projects and plugins never appear
/// in a flow graph.
fn node_kind_for(kind: ComponentKind) -> Option<NodeKind> {
    match kind {
        ComponentKind::Input => Some(NodeKind::Input),
        ComponentKind::Output => Some(NodeKind::Output),
        ComponentKind::Ruleset => Some(NodeKind::Ruleset),
        ComponentKind::Project | ComponentKind::Plugin => None,
    }
}
