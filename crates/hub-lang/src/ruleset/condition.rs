use winnow::ascii::multispace0;
use winnow::combinator::{alt, cut_err, delimited, preceded, repeat};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{literal, take_while};

use super::CondExpr;

// Grammar (keywords are reserved and may not be node ids):
//
//   expr   := or
//   or     := and ( "or" and )*
//   and    := unary ( "and" unary )*
//   unary  := "not" unary | "(" expr ")" | ident

fn ident(input: &mut &str) -> ModalResult<String> {
    let id = take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)?;
    if matches!(id, "and" | "or" | "not") {
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    Ok(id.to_string())
}

/// Match a reserved word, rejecting identifiers that merely start with it
/// (`android` is an id, not `and` + `roid`).
fn reserved(word: &'static str) -> impl FnMut(&mut &str) -> ModalResult<()> {
    move |input: &mut &str| {
        let checkpoint = input.checkpoint();
        literal(word).parse_next(input)?;
        if input
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            input.reset(&checkpoint);
            return Err(ErrMode::Backtrack(ContextError::new()));
        }
        Ok(())
    }
}

fn unary(input: &mut &str) -> ModalResult<CondExpr> {
    let _ = multispace0.parse_next(input)?;
    let expr = alt((
        preceded(reserved("not"), cut_err(unary)).map(|e| CondExpr::Not(Box::new(e))),
        delimited(
            literal("("),
            cut_err(or_expr),
            cut_err((multispace0, literal(")"))).context(StrContext::Expected(
                StrContextValue::Description("closing parenthesis"),
            )),
        ),
        ident.map(CondExpr::Node),
    ))
    .parse_next(input)?;
    Ok(expr)
}

fn and_expr(input: &mut &str) -> ModalResult<CondExpr> {
    let first = unary.parse_next(input)?;
    let rest: Vec<CondExpr> = repeat(
        0..,
        preceded((multispace0, reserved("and")), cut_err(unary)),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, e| CondExpr::And(Box::new(acc), Box::new(e))))
}

fn or_expr(input: &mut &str) -> ModalResult<CondExpr> {
    let first = and_expr.parse_next(input)?;
    let rest: Vec<CondExpr> = repeat(
        0..,
        preceded((multispace0, reserved("or")), cut_err(and_expr)),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, e| CondExpr::Or(Box::new(acc), Box::new(e))))
}

fn condition(input: &mut &str) -> ModalResult<CondExpr> {
    let expr = or_expr.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    Ok(expr)
}

/// Parse a checklist `condition` attribute into a [`CondExpr`].
pub fn parse_condition(input: &str) -> anyhow::Result<CondExpr> {
    condition
        .parse(input)
        .map_err(|e| anyhow::anyhow!("invalid condition {input:?}: {e}"))
}
