use winnow::ascii::multispace0;
use winnow::combinator::{alt, cut_err, opt, repeat};
use winnow::error::{StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{literal, take_while};

use super::{FlowPath, NodeKind, NodeRef};

// ---------------------------------------------------------------------------
// Node references
// ---------------------------------------------------------------------------

fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || c == '_' || c == '-'
    })
    .parse_next(input)
}

fn node_kind(input: &mut &str) -> ModalResult<NodeKind> {
    alt((
        literal("INPUT").value(NodeKind::Input),
        literal("RULESET").value(NodeKind::Ruleset),
        literal("OUTPUT").value(NodeKind::Output),
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "node type (INPUT|RULESET|OUTPUT)",
    )))
    .parse_next(input)
}

fn node_ref(input: &mut &str) -> ModalResult<NodeRef> {
    let kind = node_kind.parse_next(input)?;
    cut_err(literal("."))
        .context(StrContext::Expected(StrContextValue::Description(
            "'.' between node type and id",
        )))
        .parse_next(input)?;
    let id = cut_err(ident)
        .context(StrContext::Expected(StrContextValue::Description(
            "node id",
        )))
        .parse_next(input)?;
    Ok(NodeRef {
        kind,
        id: id.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Path line
// ---------------------------------------------------------------------------

fn arrow(input: &mut &str) -> ModalResult<()> {
    let _ = multispace0.parse_next(input)?;
    literal("->").parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    Ok(())
}

fn path(input: &mut &str) -> ModalResult<FlowPath> {
    let _ = multispace0.parse_next(input)?;
    let first = node_ref.parse_next(input)?;
    let rest: Vec<NodeRef> = repeat(
        0..,
        (arrow, cut_err(node_ref)).map(|(_, node)| node),
    )
    .parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    // Trailing `#` comments are allowed after a path.
    if opt(literal("#")).parse_next(input)?.is_some() {
        let _ = take_while(0.., |_: char| true).parse_next(input)?;
    }
    let mut nodes = vec![first];
    nodes.extend(rest);
    Ok(FlowPath { nodes })
}

/// Parse a single non-empty line into a [`FlowPath`].
pub(super) fn parse_path_line(line: &str) -> anyhow::Result<FlowPath> {
    path.parse(line)
        .map_err(|e| anyhow::anyhow!("invalid path {line:?}: {e}"))
}
