//! Parse-once condition AST (spec §9 Design Notes: "tokens -> shunting-yard
//! -> tree of {Cmp(lhs, op, rhs), And, Or, Var, Lit}. Evaluation is a pure
//! recursive walk against a snapshot dictionary; no dynamic code execution
//! ever." — replacing the original's `asteval.Interpreter()` dynamic
//! evaluator, see `original_source/rule_engine.py`).
//!
//! Grammar (spec §3 "Condition"):
//! ```text
//! expr := term (("and"|"or") term)*
//! term := identifier op (identifier | number)
//! op   := > | < | >= | <= | = | !=
//! ```
//! `and`/`or` are **equal precedence, strictly left-to-right** — this is a
//! deliberate, tested divergence from the usual "and binds tighter than or"
//! convention (spec §9 Open Question a).

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty condition")]
    Empty,
    #[error("unexpected end of condition, expected a term")]
    UnexpectedEnd,
    #[error("unrecognized comparison operator '{0}'")]
    BadOperator(String),
    #[error("expected an identifier, found '{0}'")]
    ExpectedIdentifier(String),
    #[error("trailing tokens after a complete expression: {0:?}")]
    TrailingTokens(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Self::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        }
    }

    fn from_token(tok: &str) -> Option<Self> {
        match tok {
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Var(String),
    Num(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
}

/// A parsed, reusable condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Cmp { lhs: Term, op: CmpOp, rhs: Term },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    pub fn parse(src: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(src);
        if tokens.is_empty() {
            return Err(ParseError::Empty);
        }
        let mut pos = 0;
        let mut node = parse_term(&tokens, &mut pos)?;

        loop {
            match tokens.get(pos).map(String::as_str) {
                Some("and") => {
                    pos += 1;
                    let rhs = parse_term(&tokens, &mut pos)?;
                    node = Condition::And(Box::new(node), Box::new(rhs));
                }
                Some("or") => {
                    pos += 1;
                    let rhs = parse_term(&tokens, &mut pos)?;
                    node = Condition::Or(Box::new(node), Box::new(rhs));
                }
                Some(_) => return Err(ParseError::TrailingTokens(tokens[pos..].to_vec())),
                None => break,
            }
        }

        Ok(node)
    }

    /// Evaluate left-to-right with equal `and`/`or` precedence against a
    /// flat numeric context (OHLCV fields, indicator names, and already
    /// market-params-substituted values all live in the same map; boolean
    /// pattern flags are pre-encoded as 1.0/0.0). Any undefined identifier
    /// makes its containing comparison evaluate to `false` (spec §4.4).
    pub fn eval(&self, ctx: &HashMap<String, f64>) -> bool {
        match self {
            Condition::Cmp { lhs, op, rhs } => {
                let (Some(l), Some(r)) = (resolve(lhs, ctx), resolve(rhs, ctx)) else {
                    return false;
                };
                op.apply(l, r)
            }
            Condition::And(l, r) => l.eval(ctx) && r.eval(ctx),
            Condition::Or(l, r) => l.eval(ctx) || r.eval(ctx),
        }
    }
}

fn resolve(term: &Term, ctx: &HashMap<String, f64>) -> Option<f64> {
    match term {
        Term::Num(n) => Some(*n),
        Term::Var(name) => match name.as_str() {
            "true" => Some(1.0),
            "false" => Some(0.0),
            _ => ctx.get(name).copied(),
        },
    }
}

fn parse_term(tokens: &[String], pos: &mut usize) -> Result<Condition, ParseError> {
    let lhs_tok = tokens.get(*pos).ok_or(ParseError::UnexpectedEnd)?;
    if !is_identifier(lhs_tok) {
        return Err(ParseError::ExpectedIdentifier(lhs_tok.clone()));
    }
    let lhs = Term::Var(lhs_tok.clone());
    *pos += 1;

    let op_tok = tokens.get(*pos).ok_or(ParseError::UnexpectedEnd)?;
    let op = CmpOp::from_token(op_tok).ok_or_else(|| ParseError::BadOperator(op_tok.clone()))?;
    *pos += 1;

    let rhs_tok = tokens.get(*pos).ok_or(ParseError::UnexpectedEnd)?;
    let rhs = if let Ok(n) = rhs_tok.parse::<f64>() {
        Term::Num(n)
    } else {
        Term::Var(rhs_tok.clone())
    };
    *pos += 1;

    Ok(Condition::Cmp { lhs, op, rhs })
}

fn is_identifier(tok: &str) -> bool {
    tok.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
}

/// Splits on whitespace, merging the two-character operators `>=`/`<=`/`!=`
/// that may or may not have surrounding spaces in the source string.
fn tokenize(src: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = src.trim().chars().peekable();
    let mut buf = String::new();

    let flush = |buf: &mut String, out: &mut Vec<String>| {
        if !buf.is_empty() {
            out.push(std::mem::take(buf));
        }
    };

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            flush(&mut buf, &mut out);
            chars.next();
        } else if ">=<!".contains(c) {
            flush(&mut buf, &mut out);
            chars.next();
            if matches!(chars.peek(), Some('=')) {
                chars.next();
                out.push(format!("{c}="));
            } else {
                out.push(c.to_string());
            }
        } else {
            buf.push(c);
            chars.next();
        }
    }
    flush(&mut buf, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn parses_and_evaluates_single_comparison() {
        let cond = Condition::parse("rsi14 < 30").unwrap();
        assert!(cond.eval(&ctx(&[("rsi14", 25.0)])));
        assert!(!cond.eval(&ctx(&[("rsi14", 35.0)])));
    }

    #[test]
    fn left_to_right_equal_precedence_and_then_or() {
        // (a and b) or c, evaluated strictly left to right: a=false, b=true -> false;
        // false or c(true) -> true. If "and" bound tighter this would differ only
        // when there's a 3rd term after "or"; the real test is 3-term chains below.
        let cond = Condition::parse("a > 0 and b > 0 or c > 0").unwrap();
        // a=0 (false), b=5 (true) -> (false and true) = false; false or c(1) = true
        let ok = ctx(&[("a", 0.0), ("b", 5.0), ("c", 1.0)]);
        assert!(cond.eval(&ok));
    }

    #[test]
    fn left_to_right_not_standard_precedence() {
        // a=1(true) or b=0(false) and c=0(false):
        // standard precedence (and binds tighter): a or (b and c) = true or false = true
        // left-to-right equal precedence: (a or b) and c = (true or false) and false = false
        let cond = Condition::parse("a > 0 or b > 0 and c > 0").unwrap();
        let data = ctx(&[("a", 1.0), ("b", 0.0), ("c", 0.0)]);
        assert!(!cond.eval(&data), "must use left-to-right, not and-binds-tighter, precedence");
    }

    #[test]
    fn undefined_identifier_is_false_not_error() {
        let cond = Condition::parse("missing_indicator < 30").unwrap();
        assert!(!cond.eval(&ctx(&[])));
    }

    #[test]
    fn pattern_flag_literal_true_false() {
        let cond = Condition::parse("smc_pattern = true").unwrap();
        assert!(cond.eval(&ctx(&[("smc_pattern", 1.0)])));
        assert!(!cond.eval(&ctx(&[("smc_pattern", 0.0)])));
    }

    #[test]
    fn identifier_vs_identifier_comparison() {
        let cond = Condition::parse("close < bb_lower").unwrap();
        assert!(cond.eval(&ctx(&[("close", 100.0), ("bb_lower", 110.0)])));
        assert!(!cond.eval(&ctx(&[("close", 120.0), ("bb_lower", 110.0)])));
    }

    #[test]
    fn all_operators_tokenize_correctly() {
        for (op_str, op) in [(">", CmpOp::Gt), ("<", CmpOp::Lt), (">=", CmpOp::Ge), ("<=", CmpOp::Le), ("=", CmpOp::Eq), ("!=", CmpOp::Ne)] {
            let cond = Condition::parse(&format!("x {op_str} 5")).unwrap();
            match cond {
                Condition::Cmp { op: parsed_op, .. } => assert_eq!(parsed_op, op),
                _ => panic!("expected a Cmp node"),
            }
        }
    }

    #[test]
    fn empty_condition_is_a_parse_error() {
        assert_eq!(Condition::parse(""), Err(ParseError::Empty));
    }

    #[test]
    fn malformed_condition_reports_bad_operator() {
        assert!(matches!(Condition::parse("rsi14 ~~ 30"), Err(ParseError::BadOperator(_))));
    }

    use proptest::strategy::Strategy as _;

    proptest::proptest! {
        /// For any chain of terms joined by `and`/`or`, `eval` must agree with a
        /// strictly left-to-right fold of the term truth values (spec §9 Open
        /// Question a) — never the "and binds tighter than or" convention.
        #[test]
        fn eval_matches_left_to_right_fold(
            (terms, connectives) in proptest::collection::vec(proptest::bool::ANY, 1..8)
                .prop_flat_map(|terms| {
                    let n = terms.len() - 1;
                    (proptest::prelude::Just(terms), proptest::collection::vec(proptest::bool::ANY, n))
                }),
        ) {
            let mut expr = String::new();
            let mut data = HashMap::new();
            for (i, &truthy) in terms.iter().enumerate() {
                if i > 0 {
                    expr.push_str(if connectives[i - 1] { " and " } else { " or " });
                }
                let var = format!("v{i}");
                expr.push_str(&format!("{var} > 0"));
                data.insert(var, if truthy { 1.0 } else { -1.0 });
            }

            let cond = Condition::parse(&expr).unwrap();

            let mut expected = terms[0];
            for (i, &is_and) in connectives.iter().enumerate() {
                let rhs = terms[i + 1];
                expected = if is_and { expected && rhs } else { expected || rhs };
            }

            proptest::prop_assert_eq!(cond.eval(&data), expected);
        }
    }
}
