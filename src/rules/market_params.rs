//! Market-params arithmetic substitution (spec §3 "market_params", §4.4
//! "Market-params substitution"). Expressions are restricted to the four
//! arithmetic operators and numeric literals over identifiers already
//! present in the evaluation context — never a general-purpose interpreter
//! (spec §9 "no dynamic code execution ever").

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
}

/// Evaluates a `market_params` arithmetic expression (e.g.
/// `"avg_volume_20 * 1.5"`) against the current context.
pub fn eval_expr(expr: &str, ctx: &HashMap<String, f64>) -> Result<f64, ExprError> {
    let tokens = tokenize(expr);
    let mut pos = 0;
    let value = parse_additive(&tokens, &mut pos, ctx)?;
    Ok(value)
}

fn tokenize(expr: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = expr.chars().peekable();
    let mut buf = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            if !buf.is_empty() {
                out.push(std::mem::take(&mut buf));
            }
            chars.next();
        } else if "+-*/()".contains(c) {
            if !buf.is_empty() {
                out.push(std::mem::take(&mut buf));
            }
            out.push(c.to_string());
            chars.next();
        } else {
            buf.push(c);
            chars.next();
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

fn parse_additive(tokens: &[String], pos: &mut usize, ctx: &HashMap<String, f64>) -> Result<f64, ExprError> {
    let mut value = parse_multiplicative(tokens, pos, ctx)?;
    loop {
        match tokens.get(*pos).map(String::as_str) {
            Some("+") => {
                *pos += 1;
                value += parse_multiplicative(tokens, pos, ctx)?;
            }
            Some("-") => {
                *pos += 1;
                value -= parse_multiplicative(tokens, pos, ctx)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_multiplicative(tokens: &[String], pos: &mut usize, ctx: &HashMap<String, f64>) -> Result<f64, ExprError> {
    let mut value = parse_atom(tokens, pos, ctx)?;
    loop {
        match tokens.get(*pos).map(String::as_str) {
            Some("*") => {
                *pos += 1;
                value *= parse_atom(tokens, pos, ctx)?;
            }
            Some("/") => {
                *pos += 1;
                value /= parse_atom(tokens, pos, ctx)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_atom(tokens: &[String], pos: &mut usize, ctx: &HashMap<String, f64>) -> Result<f64, ExprError> {
    let tok = tokens.get(*pos).ok_or(ExprError::UnexpectedEnd)?;
    if tok == "(" {
        *pos += 1;
        let value = parse_additive(tokens, pos, ctx)?;
        match tokens.get(*pos).map(String::as_str) {
            Some(")") => *pos += 1,
            Some(other) => return Err(ExprError::UnexpectedToken(other.to_string())),
            None => return Err(ExprError::UnexpectedEnd),
        }
        return Ok(value);
    }
    *pos += 1;
    if let Ok(n) = tok.parse::<f64>() {
        Ok(n)
    } else {
        ctx.get(tok).copied().ok_or_else(|| ExprError::UnknownIdentifier(tok.clone()))
    }
}
