mod parser;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::fmt;

// ---------------------------------------------------------------------------
// Flow AST
// ---------------------------------------------------------------------------

/// The three node categories a project path may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Input,
    Ruleset,
    Output,
}

impl NodeKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            NodeKind::Input => "INPUT",
            NodeKind::Ruleset => "RULESET",
            NodeKind::Output => "OUTPUT",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One `TYPE.id` reference inside a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub id: String,
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.id)
    }
}

/// One line of the project body: `INPUT.a -> RULESET.r -> OUTPUT.o`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPath {
    pub nodes: Vec<NodeRef>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse a full project body into paths.
///
/// Blank lines and `#` comments are skipped. Each path must start at an
/// `INPUT`, end at an `OUTPUT`, and pass only through `RULESET` nodes in
/// between. Cycles among ruleset nodes (within one path or across paths) are
/// rejected.
pub fn parse_flow(content: &str) -> anyhow::Result<Vec<FlowPath>> {
    let mut paths = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let path = parser::parse_path_line(line)
            .map_err(|e| anyhow::anyhow!("line {}: {e}", line_no + 1))?;
        validate_shape(&path).map_err(|e| anyhow::anyhow!("line {}: {e}", line_no + 1))?;
        paths.push(path);
    }
    if paths.is_empty() {
        anyhow::bail!("project body contains no paths");
    }
    reject_ruleset_cycles(&paths)?;
    Ok(paths)
}

/// A path must be `INPUT -> (RULESET ->)* OUTPUT`.
fn validate_shape(path: &FlowPath) -> anyhow::Result<()> {
    let nodes = &path.nodes;
    if nodes.len() < 2 {
        anyhow::bail!("a path needs at least an input and an output");
    }
    if nodes[0].kind != NodeKind::Input {
        anyhow::bail!("path must start with an INPUT node, got {}", nodes[0]);
    }
    let last = &nodes[nodes.len() - 1];
    if last.kind != NodeKind::Output {
        anyhow::bail!("path must end with an OUTPUT node, got {last}");
    }
    for node in &nodes[1..nodes.len() - 1] {
        if node.kind != NodeKind::Ruleset {
            anyhow::bail!("intermediate nodes must be RULESET, got {node}");
        }
    }
    Ok(())
}

/// Build the directed graph over ruleset ids from consecutive ruleset pairs
/// and reject any cycle via DFS coloring.
fn reject_ruleset_cycles(paths: &[FlowPath]) -> anyhow::Result<()> {
    let mut edges: HashMap<&str, HashSet<&str>> = HashMap::new();
    for path in paths {
        for pair in path.nodes.windows(2) {
            if pair[0].kind == NodeKind::Ruleset && pair[1].kind == NodeKind::Ruleset {
                edges
                    .entry(pair[0].id.as_str())
                    .or_default()
                    .insert(pair[1].id.as_str());
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    fn visit<'a>(
        node: &'a str,
        edges: &HashMap<&'a str, HashSet<&'a str>>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> anyhow::Result<()> {
        match colors.get(node).copied().unwrap_or(Color::White) {
            Color::Grey => anyhow::bail!("ruleset cycle detected through RULESET.{node}"),
            Color::Black => return Ok(()),
            Color::White => {}
        }
        colors.insert(node, Color::Grey);
        if let Some(nexts) = edges.get(node) {
            for next in nexts {
                visit(next, edges, colors)?;
            }
        }
        colors.insert(node, Color::Black);
        Ok(())
    }

    let mut colors = HashMap::new();
    let starts: Vec<&str> = edges.keys().copied().collect();
    for node in starts {
        visit(node, &edges, &mut colors)?;
    }
    Ok(())
}
