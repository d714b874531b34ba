//! Controlling-expression handling for `#if` and `#elif`.
//!
//! The directive text is tokenized, parsed into an explicit expression
//! tree, and only then evaluated. Evaluation is demand-driven: the right
//! operand of `&&`/`||` is never visited when the left operand already
//! decides the result, and an undefined identifier is reported through the
//! `on_undefined` callback at the moment its value is needed, not when it
//! is parsed. `defined(X)` is the sanctioned existence test and never
//! reports anything.

use thiserror::Error;

use crate::token::{is_identifier_continue, is_identifier_start};

/// Failures that make a controlling expression unusable. Unlike category
/// diagnostics these are always fatal, whatever the warning policy says.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub(crate) enum ExprError {
    #[error("invalid integer literal `{0}`")]
    InvalidNumber(String),
    #[error("invalid character `{0}` in controlling expression")]
    InvalidCharacter(char),
    #[error("operator `defined` requires an identifier operand")]
    MalformedDefined,
    #[error("expected `)` in controlling expression")]
    MissingParen,
    #[error("controlling expression ends unexpectedly")]
    UnexpectedEnd,
    #[error("unexpected token in controlling expression")]
    UnexpectedToken,
    #[error("trailing tokens after controlling expression")]
    TrailingTokens,
    #[error("empty controlling expression")]
    Empty,
    #[error("division by zero in controlling expression")]
    DivisionByZero,
    #[error("remainder by zero in controlling expression")]
    RemainderByZero,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CondToken {
    Number(i64),
    Identifier(String),
    LParen,
    RParen,
    Not,
    Complement,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    ShiftLeft,
    ShiftRight,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Negate,
    Complement,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    ShiftLeft,
    ShiftRight,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

/// Expression tree for one controlling expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CondExpr {
    Number(i64),
    /// A bare identifier left over after macro expansion
    Ident(String),
    /// `defined(X)` or `defined X`
    Defined(String),
    Unary(UnaryOp, Box<CondExpr>),
    Binary(BinaryOp, Box<CondExpr>, Box<CondExpr>),
}

/// Binary operators by precedence, loosest binding first. Each level is
/// parsed left-associatively; extending the grammar is a table edit.
const BINARY_LEVELS: &[&[(CondToken, BinaryOp)]] = &[
    &[(CondToken::LogicalOr, BinaryOp::LogicalOr)],
    &[(CondToken::LogicalAnd, BinaryOp::LogicalAnd)],
    &[(CondToken::BitOr, BinaryOp::BitOr)],
    &[(CondToken::BitXor, BinaryOp::BitXor)],
    &[(CondToken::BitAnd, BinaryOp::BitAnd)],
    &[
        (CondToken::Equal, BinaryOp::Equal),
        (CondToken::NotEqual, BinaryOp::NotEqual),
    ],
    &[
        (CondToken::Less, BinaryOp::Less),
        (CondToken::LessEqual, BinaryOp::LessEqual),
        (CondToken::Greater, BinaryOp::Greater),
        (CondToken::GreaterEqual, BinaryOp::GreaterEqual),
    ],
    &[
        (CondToken::ShiftLeft, BinaryOp::ShiftLeft),
        (CondToken::ShiftRight, BinaryOp::ShiftRight),
    ],
    &[
        (CondToken::Plus, BinaryOp::Add),
        (CondToken::Minus, BinaryOp::Subtract),
    ],
    &[
        (CondToken::Star, BinaryOp::Multiply),
        (CondToken::Slash, BinaryOp::Divide),
        (CondToken::Percent, BinaryOp::Remainder),
    ],
];

/// Tokenize a fully macro-expanded controlling expression.
pub(crate) fn tokenize(expr: &str) -> Result<Vec<CondToken>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            c if c.is_whitespace() => {}
            '0'..='9' => {
                let mut literal = String::new();
                literal.push(ch);
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() {
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(CondToken::Number(parse_int_literal(&literal)?));
            }
            c if is_identifier_start(c) => {
                let mut ident = String::new();
                ident.push(c);
                while let Some(&c2) = chars.peek() {
                    if is_identifier_continue(c2) {
                        ident.push(c2);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(CondToken::Identifier(ident));
            }
            '(' => tokens.push(CondToken::LParen),
            ')' => tokens.push(CondToken::RParen),
            '~' => tokens.push(CondToken::Complement),
            '+' => tokens.push(CondToken::Plus),
            '-' => tokens.push(CondToken::Minus),
            '*' => tokens.push(CondToken::Star),
            '/' => tokens.push(CondToken::Slash),
            '%' => tokens.push(CondToken::Percent),
            '^' => tokens.push(CondToken::BitXor),
            '!' => {
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(CondToken::NotEqual);
                } else {
                    tokens.push(CondToken::Not);
                }
            }
            '=' => {
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(CondToken::Equal);
                } else {
                    return Err(ExprError::InvalidCharacter('='));
                }
            }
            '<' => {
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(CondToken::LessEqual);
                } else if chars.next_if_eq(&'<').is_some() {
                    tokens.push(CondToken::ShiftLeft);
                } else {
                    tokens.push(CondToken::Less);
                }
            }
            '>' => {
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(CondToken::GreaterEqual);
                } else if chars.next_if_eq(&'>').is_some() {
                    tokens.push(CondToken::ShiftRight);
                } else {
                    tokens.push(CondToken::Greater);
                }
            }
            '&' => {
                if chars.next_if_eq(&'&').is_some() {
                    tokens.push(CondToken::LogicalAnd);
                } else {
                    tokens.push(CondToken::BitAnd);
                }
            }
            '|' => {
                if chars.next_if_eq(&'|').is_some() {
                    tokens.push(CondToken::LogicalOr);
                } else {
                    tokens.push(CondToken::BitOr);
                }
            }
            other => return Err(ExprError::InvalidCharacter(other)),
        }
    }

    Ok(tokens)
}

/// Parse a C integer literal: decimal, `0x` hex, or leading-zero octal,
/// with any order of `u`/`l` suffix characters.
fn parse_int_literal(literal: &str) -> Result<i64, ExprError> {
    let digits = literal.trim_end_matches(['u', 'U', 'l', 'L']);
    if digits.is_empty() {
        return Err(ExprError::InvalidNumber(literal.to_string()));
    }
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<u64>()
    };
    parsed
        .map(|v| v as i64)
        .map_err(|_| ExprError::InvalidNumber(literal.to_string()))
}

struct CondParser<'t> {
    tokens: &'t [CondToken],
    pos: usize,
}

impl<'t> CondParser<'t> {
    fn peek(&self) -> Option<&'t CondToken> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t CondToken> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: &CondToken, error: ExprError) -> Result<(), ExprError> {
        if self.peek() == Some(token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(error)
        }
    }

    fn parse_expression(&mut self) -> Result<CondExpr, ExprError> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, level: usize) -> Result<CondExpr, ExprError> {
        let Some(operators) = BINARY_LEVELS.get(level) else {
            return self.parse_unary();
        };
        let mut left = self.parse_binary(level + 1)?;
        'scan: loop {
            for (token, op) in *operators {
                if self.peek() == Some(token) {
                    self.pos += 1;
                    let right = self.parse_binary(level + 1)?;
                    left = CondExpr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'scan;
                }
            }
            break Ok(left);
        }
    }

    fn parse_unary(&mut self) -> Result<CondExpr, ExprError> {
        let op = match self.peek() {
            Some(CondToken::Not) => Some(UnaryOp::Not),
            Some(CondToken::Minus) => Some(UnaryOp::Negate),
            Some(CondToken::Complement) => Some(UnaryOp::Complement),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(CondExpr::Unary(op, Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<CondExpr, ExprError> {
        match self.advance() {
            Some(CondToken::Number(value)) => Ok(CondExpr::Number(*value)),
            Some(CondToken::Identifier(name)) if name == "defined" => self.parse_defined(),
            Some(CondToken::Identifier(name)) => Ok(CondExpr::Ident(name.clone())),
            Some(CondToken::LParen) => {
                let inner = self.parse_expression()?;
                self.expect(&CondToken::RParen, ExprError::MissingParen)?;
                Ok(inner)
            }
            Some(_) => Err(ExprError::UnexpectedToken),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    /// `defined(NAME)` or `defined NAME`.
    fn parse_defined(&mut self) -> Result<CondExpr, ExprError> {
        let parenthesized = self.peek() == Some(&CondToken::LParen);
        if parenthesized {
            self.pos += 1;
        }
        let name = match self.advance() {
            Some(CondToken::Identifier(name)) => name.clone(),
            _ => return Err(ExprError::MalformedDefined),
        };
        if parenthesized {
            self.expect(&CondToken::RParen, ExprError::MalformedDefined)?;
        }
        Ok(CondExpr::Defined(name))
    }
}

/// Parse a token sequence into an expression tree.
pub(crate) fn parse(tokens: &[CondToken]) -> Result<CondExpr, ExprError> {
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }
    let mut parser = CondParser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if parser.pos != tokens.len() {
        return Err(ExprError::TrailingTokens);
    }
    Ok(expr)
}

/// Tokenize and parse in one step.
pub(crate) fn parse_condition(text: &str) -> Result<CondExpr, ExprError> {
    parse(&tokenize(text)?)
}

/// Evaluate an expression tree.
///
/// `is_defined` answers macro-table membership; `on_undefined` fires once
/// per evaluated reference to an identifier that is not in the table. A
/// subtree skipped by short-circuiting is never visited, so identifiers in
/// it go unreported.
pub(crate) fn evaluate<D, U>(
    expr: &CondExpr,
    is_defined: &D,
    on_undefined: &mut U,
) -> Result<i64, ExprError>
where
    D: Fn(&str) -> bool,
    U: FnMut(&str),
{
    match expr {
        CondExpr::Number(value) => Ok(*value),
        CondExpr::Defined(name) => Ok(i64::from(is_defined(name))),
        CondExpr::Ident(name) => {
            if !is_defined(name) {
                on_undefined(name);
            }
            // Leftover identifiers read as 0, like every C preprocessor.
            Ok(0)
        }
        CondExpr::Unary(op, operand) => {
            let value = evaluate(operand, is_defined, on_undefined)?;
            Ok(match op {
                UnaryOp::Not => i64::from(value == 0),
                UnaryOp::Negate => value.wrapping_neg(),
                UnaryOp::Complement => !value,
            })
        }
        CondExpr::Binary(BinaryOp::LogicalAnd, left, right) => {
            if evaluate(left, is_defined, on_undefined)? == 0 {
                return Ok(0);
            }
            Ok(i64::from(evaluate(right, is_defined, on_undefined)? != 0))
        }
        CondExpr::Binary(BinaryOp::LogicalOr, left, right) => {
            if evaluate(left, is_defined, on_undefined)? != 0 {
                return Ok(1);
            }
            Ok(i64::from(evaluate(right, is_defined, on_undefined)? != 0))
        }
        CondExpr::Binary(op, left, right) => {
            let lhs = evaluate(left, is_defined, on_undefined)?;
            let rhs = evaluate(right, is_defined, on_undefined)?;
            apply_binary(*op, lhs, rhs)
        }
    }
}

fn apply_binary(op: BinaryOp, lhs: i64, rhs: i64) -> Result<i64, ExprError> {
    Ok(match op {
        // Short-circuit forms are handled before the operands are computed.
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr => unreachable!("handled in evaluate"),
        BinaryOp::BitOr => lhs | rhs,
        BinaryOp::BitXor => lhs ^ rhs,
        BinaryOp::BitAnd => lhs & rhs,
        BinaryOp::Equal => i64::from(lhs == rhs),
        BinaryOp::NotEqual => i64::from(lhs != rhs),
        BinaryOp::Less => i64::from(lhs < rhs),
        BinaryOp::LessEqual => i64::from(lhs <= rhs),
        BinaryOp::Greater => i64::from(lhs > rhs),
        BinaryOp::GreaterEqual => i64::from(lhs >= rhs),
        BinaryOp::ShiftLeft => lhs.wrapping_shl(rhs as u32),
        BinaryOp::ShiftRight => lhs.wrapping_shr(rhs as u32),
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Subtract => lhs.wrapping_sub(rhs),
        BinaryOp::Multiply => lhs.wrapping_mul(rhs),
        BinaryOp::Divide => {
            if rhs == 0 {
                return Err(ExprError::DivisionByZero);
            }
            lhs.wrapping_div(rhs)
        }
        BinaryOp::Remainder => {
            if rhs == 0 {
                return Err(ExprError::RemainderByZero);
            }
            lhs.wrapping_rem(rhs)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_with(text: &str, defined: &[(&str, bool)]) -> (Result<i64, ExprError>, Vec<String>) {
        let table: Vec<(String, bool)> = defined
            .iter()
            .map(|(n, d)| (n.to_string(), *d))
            .collect();
        let is_defined = |name: &str| table.iter().any(|(n, d)| n == name && *d);
        let mut reported = Vec::new();
        let result = parse_condition(text)
            .and_then(|expr| evaluate(&expr, &is_defined, &mut |name: &str| {
                reported.push(name.to_string());
            }));
        (result, reported)
    }

    fn eval(text: &str) -> i64 {
        let (result, _) = eval_with(text, &[]);
        result.unwrap()
    }

    #[test]
    fn literal_forms() {
        assert_eq!(eval("42"), 42);
        assert_eq!(eval("0x1F"), 31);
        assert_eq!(eval("010"), 8);
        assert_eq!(eval("1UL"), 1);
        assert_eq!(eval("0"), 0);
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3"), 7);
        assert_eq!(eval("(1 + 2) * 3"), 9);
        assert_eq!(eval("10 - 4 - 3"), 3);
        assert_eq!(eval("7 / 2"), 3);
        assert_eq!(eval("7 % 2"), 1);
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval("5 > 3 && 10 >= 10 && 2 < 4 && 5 <= 5"), 1);
        assert_eq!(eval("3 != 4 && 5 == 5"), 1);
        assert_eq!(eval("(1 && 0) || (0 && 1) || (1 && 1)"), 1);
        assert_eq!(eval("!0 && !!1"), 1);
        assert_eq!(eval("-(-5) == 5"), 1);
        assert_eq!(eval("1 < 2 == 1"), 1);
    }

    #[test]
    fn bitwise_and_shifts() {
        assert_eq!(eval("1 << 4"), 16);
        assert_eq!(eval("256 >> 4"), 16);
        assert_eq!(eval("0xF0 | 0x0F"), 0xFF);
        assert_eq!(eval("0xF0 & 0xFF"), 0xF0);
        assert_eq!(eval("0xFF ^ 0x0F"), 0xF0);
        assert_eq!(eval("~0 == -1"), 1);
        // `&` binds tighter than `|`, both looser than `==`.
        assert_eq!(eval("1 | 2 & 2"), 3);
    }

    #[test]
    fn defined_forms() {
        let (result, reported) = eval_with("defined(FOO)", &[("FOO", true)]);
        assert_eq!(result.unwrap(), 1);
        assert!(reported.is_empty());

        let (result, reported) = eval_with("defined FOO", &[("FOO", true)]);
        assert_eq!(result.unwrap(), 1);
        assert!(reported.is_empty());

        let (result, reported) = eval_with("defined(FOO)", &[]);
        assert_eq!(result.unwrap(), 0);
        assert!(reported.is_empty(), "defined() must never report");

        let (result, _) = eval_with("!defined(FOO)", &[]);
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn undefined_identifier_reads_zero_and_reports() {
        let (result, reported) = eval_with("FOO == 0", &[]);
        assert_eq!(result.unwrap(), 1);
        assert_eq!(reported, ["FOO"]);
    }

    #[test]
    fn defined_identifier_is_not_reported() {
        // A function-like macro named without arguments survives expansion;
        // it reads as 0 but is not "undefined".
        let (result, reported) = eval_with("FOO", &[("FOO", true)]);
        assert_eq!(result.unwrap(), 0);
        assert!(reported.is_empty());
    }

    #[test]
    fn short_circuit_skips_right_operand() {
        let (result, reported) = eval_with("defined(FOO) && FOO == 0", &[]);
        assert_eq!(result.unwrap(), 0);
        assert!(reported.is_empty(), "right of && must not be evaluated");

        let (result, reported) = eval_with("1 || FOO", &[]);
        assert_eq!(result.unwrap(), 1);
        assert!(reported.is_empty(), "right of || must not be evaluated");
    }

    #[test]
    fn evaluated_right_operand_reports() {
        let (result, reported) = eval_with("1 && FOO", &[]);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(reported, ["FOO"]);

        let (result, reported) = eval_with("0 || FOO + BAR", &[]);
        assert_eq!(result.unwrap(), 0);
        assert_eq!(reported, ["FOO", "BAR"]);
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let (result, _) = eval_with("1 / 0", &[]);
        assert_eq!(result.unwrap_err(), ExprError::DivisionByZero);
        let (result, _) = eval_with("1 % 0", &[]);
        assert_eq!(result.unwrap_err(), ExprError::RemainderByZero);
        // Unless short-circuiting removes the division from the demanded
        // value entirely.
        let (result, _) = eval_with("0 && 1 / 0", &[]);
        assert_eq!(result.unwrap(), 0);
    }

    #[test]
    fn malformed_expressions() {
        assert!(matches!(
            parse_condition(""),
            Err(ExprError::Empty)
        ));
        assert!(matches!(
            parse_condition("1 +"),
            Err(ExprError::UnexpectedEnd)
        ));
        assert!(matches!(
            parse_condition("(1"),
            Err(ExprError::MissingParen)
        ));
        assert!(matches!(
            parse_condition("1 2"),
            Err(ExprError::TrailingTokens)
        ));
        assert!(matches!(
            parse_condition("defined(1)"),
            Err(ExprError::MalformedDefined)
        ));
        assert!(matches!(
            parse_condition("defined()"),
            Err(ExprError::MalformedDefined)
        ));
        assert!(matches!(
            parse_condition("1 = 2"),
            Err(ExprError::InvalidCharacter('='))
        ));
        assert!(matches!(
            parse_condition("1 @ 2"),
            Err(ExprError::InvalidCharacter('@'))
        ));
        assert!(matches!(
            parse_condition("0x"),
            Err(ExprError::InvalidNumber(_))
        ));
    }
}
