//! Expression language for component-assembled strategies.
//!
//! Tier-2 definitions express entry and exit logic in a small indicator
//! expression language: arithmetic and boolean operators over a fixed set
//! of indicator functions. No loops, no assignment, no recursion; anything
//! outside this grammar is tier 3 by construction.
//!
//! The emitter renders a canonical form, so two textual spellings of the
//! same expression generate identical code.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::error::{Error, Result};

/// Indicator and combinator functions the language admits, with arity.
pub const FUNCTIONS: &[(&str, usize)] = &[
    ("sma", 2),
    ("ema", 2),
    ("roc", 2),
    ("rsi", 2),
    ("std", 2),
    ("max", 2),
    ("min", 2),
    ("rank", 1),
    ("cross_above", 2),
    ("cross_below", 2),
];

/// Price/volume series an expression may reference.
pub const SERIES: &[&str] = &["open", "high", "low", "close", "volume"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    And,
    Or,
    Not,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::EqEq);
                } else {
                    return Err(Error::GenerationFailure(
                        "single '=' is not an operator; use '=='".to_string(),
                    ));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    return Err(Error::GenerationFailure("unexpected '!'".to_string()));
                }
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = number
                    .parse()
                    .map_err(|_| Error::GenerationFailure(format!("bad number '{number}'")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c.to_ascii_lowercase());
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(ident),
                });
            }
            other => {
                return Err(Error::GenerationFailure(format!(
                    "unexpected character '{other}'"
                )));
            }
        }
    }
    Ok(tokens)
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// A series reference or named parameter
    Ref(String),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        match self.next() {
            Some(found) if &found == token => Ok(()),
            found => Err(Error::GenerationFailure(format!(
                "expected {token:?}, found {found:?}"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.parse_cmp()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Ge) => BinOp::Ge,
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::NotEq) => BinOp::Ne,
            _ => return Ok(lhs),
        };
        self.next();
        let rhs = self.parse_add()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_mul()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.next();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Not) => {
                self.next();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_or()?);
                            match self.peek() {
                                Some(Token::Comma) => {
                                    self.next();
                                }
                                _ => break,
                            }
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Ref(name))
                }
            }
            found => Err(Error::GenerationFailure(format!(
                "unexpected token {found:?}"
            ))),
        }
    }
}

/// Parse one rule expression.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(Error::GenerationFailure("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::GenerationFailure(format!(
            "trailing tokens after expression in '{input}'"
        )));
    }
    Ok(expr)
}

/// Validate an expression against the closed function set and the known
/// parameter names. Returns the set of indicator functions used.
pub fn validate(
    expr: &Expr,
    parameters: &std::collections::BTreeMap<String, f64>,
) -> Result<BTreeSet<String>> {
    let mut used = BTreeSet::new();
    validate_inner(expr, parameters, &mut used)?;
    Ok(used)
}

fn validate_inner(
    expr: &Expr,
    parameters: &std::collections::BTreeMap<String, f64>,
    used: &mut BTreeSet<String>,
) -> Result<()> {
    match expr {
        Expr::Number(_) => Ok(()),
        Expr::Ref(name) => {
            if SERIES.contains(&name.as_str()) || parameters.contains_key(name) {
                Ok(())
            } else {
                Err(Error::GenerationFailure(format!(
                    "unknown reference '{name}' (not a series or declared parameter)"
                )))
            }
        }
        Expr::Call { name, args } => {
            let arity = FUNCTIONS
                .iter()
                .find(|(fname, _)| fname == name)
                .map(|(_, arity)| *arity)
                .ok_or_else(|| {
                    Error::GenerationFailure(format!("unknown function '{name}'"))
                })?;
            if args.len() != arity {
                return Err(Error::GenerationFailure(format!(
                    "function '{name}' takes {arity} arguments, got {}",
                    args.len()
                )));
            }
            used.insert(name.clone());
            for arg in args {
                validate_inner(arg, parameters, used)?;
            }
            Ok(())
        }
        Expr::Not(inner) | Expr::Neg(inner) => validate_inner(inner, parameters, used),
        Expr::Binary { lhs, rhs, .. } => {
            validate_inner(lhs, parameters, used)?;
            validate_inner(rhs, parameters, used)
        }
    }
}

/// Emit the canonical Python rendering of an expression.
///
/// Series become `self.series("close")`, indicator calls become
/// `self.ind.<name>(...)`, parameters become `self.params["name"]`.
pub fn emit(expr: &Expr, parameters: &std::collections::BTreeMap<String, f64>) -> String {
    let mut out = String::new();
    emit_inner(expr, parameters, &mut out);
    out
}

fn emit_inner(
    expr: &Expr,
    parameters: &std::collections::BTreeMap<String, f64>,
    out: &mut String,
) {
    match expr {
        Expr::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                let _ = write!(out, "{}", *n as i64);
            } else {
                let _ = write!(out, "{n}");
            }
        }
        Expr::Ref(name) => {
            if parameters.contains_key(name) {
                let _ = write!(out, "self.params[\"{name}\"]");
            } else {
                let _ = write!(out, "self.series(\"{name}\")");
            }
        }
        Expr::Call { name, args } => {
            let _ = write!(out, "self.ind.{name}(");
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                emit_inner(arg, parameters, out);
            }
            out.push(')');
        }
        Expr::Not(inner) => {
            out.push_str("not (");
            emit_inner(inner, parameters, out);
            out.push(')');
        }
        Expr::Neg(inner) => {
            out.push_str("-(");
            emit_inner(inner, parameters, out);
            out.push(')');
        }
        Expr::Binary { op, lhs, rhs } => {
            out.push('(');
            emit_inner(lhs, parameters, out);
            let _ = write!(out, " {} ", op.as_str());
            emit_inner(rhs, parameters, out);
            out.push(')');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params() -> BTreeMap<String, f64> {
        BTreeMap::from([("fast".to_string(), 50.0), ("slow".to_string(), 200.0)])
    }

    #[test]
    fn test_parse_and_emit_cross() {
        let expr = parse("cross_above(sma(close, fast), sma(close, slow))").unwrap();
        let used = validate(&expr, &params()).unwrap();
        assert!(used.contains("cross_above"));
        assert!(used.contains("sma"));
        assert_eq!(
            emit(&expr, &params()),
            "self.ind.cross_above(self.ind.sma(self.series(\"close\"), self.params[\"fast\"]), \
             self.ind.sma(self.series(\"close\"), self.params[\"slow\"]))"
        );
    }

    #[test]
    fn test_whitespace_is_canonicalized() {
        let a = parse("rsi(close,14)<30").unwrap();
        let b = parse("  rsi( close , 14 )  <  30 ").unwrap();
        let params = BTreeMap::new();
        assert_eq!(emit(&a, &params), emit(&b, &params));
    }

    #[test]
    fn test_operator_precedence() {
        let expr = parse("roc(close, 20) > 0 and rsi(close, 14) < 30 or volume > 1000").unwrap();
        // `and` binds tighter than `or`
        match expr {
            Expr::Binary { op: BinOp::Or, .. } => {}
            other => panic!("expected top-level or, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_function_rejected() {
        let expr = parse("macd(close, 12)").unwrap();
        // macd takes 2 args here but is not in the closed set
        assert!(validate(&expr, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_wrong_arity_rejected() {
        let expr = parse("sma(close)").unwrap();
        assert!(validate(&expr, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let expr = parse("mystery_series > 0").unwrap();
        assert!(validate(&expr, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_parameter_reference_allowed() {
        let expr = parse("roc(close, fast) > 0").unwrap();
        assert!(validate(&expr, &params()).is_ok());
    }

    #[test]
    fn test_no_turing_complete_constructs() {
        assert!(parse("x = 5").is_err());
        assert!(parse("while close > 0").is_err());
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(parse("close > 0 close").is_err());
    }

    #[test]
    fn test_integer_emission_is_stable() {
        let expr = parse("sma(close, 200.0)").unwrap();
        assert_eq!(
            emit(&expr, &BTreeMap::new()),
            "self.ind.sma(self.series(\"close\"), 200)"
        );
    }
}
