//! Precedence-climbing parser over the token sequence.
//!
//! Binding powers run low to high: `OR` < `AND` < `NOT` < comparisons <
//! additive < multiplicative < `^` (right-associative) < unary prefix sign <
//! atoms. A run of prefix `+`/`-` collapses to a single sign, and the sign
//! binds tighter than `^` (`-2^2` is `(-2)^2`).

use crate::ast::{AggFunc, BinaryOp, Expr, UnaryOp};
use crate::diagnostics::{CompileError, FailureKind};
use crate::lexer::{Token, TokenKind};
use crate::{FALSE_VALUE, TRUE_VALUE};

/// Guard against pathological nesting overflowing the parse stack.
const MAX_NESTING_DEPTH: usize = 64;

const NOT_BINDING: u8 = 5;

pub fn parse(tokens: &[Token]) -> Result<Expr, CompileError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_bp(0)?;
    parser.expect_eof()?;
    validate(&expr)?;
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_text(&self) -> &str {
        self.tokens.get(self.pos).map(|t| t.text.as_str()).unwrap_or("")
    }

    fn advance(&mut self) -> &'a Token {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        self.pos += 1;
        t
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), CompileError> {
        if *self.peek() == kind {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.syntax(format!("expected {what}")))
        }
    }

    fn expect_eof(&self) -> Result<(), CompileError> {
        if *self.peek() == TokenKind::Eof {
            Ok(())
        } else {
            Err(CompileError::new(
                FailureKind::Syntax,
                [format!("unexpected '{}'", self.peek_text())],
            ))
        }
    }

    fn syntax(&self, detail: impl Into<String>) -> CompileError {
        CompileError::new(FailureKind::Syntax, [detail.into()])
    }

    fn enter(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.syntax("formula is nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_bp(&mut self, min_bp: u8) -> Result<Expr, CompileError> {
        self.enter()?;
        let mut lhs = self.parse_prefix()?;
        loop {
            let Some((op, l_bp, r_bp)) = infix_binding(self.peek()) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_bp(r_bp)?;
            lhs = Expr::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
            };
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, CompileError> {
        match self.peek() {
            TokenKind::Plus | TokenKind::Minus => {
                // A run of prefix signs collapses to one.
                let mut negative = false;
                while matches!(self.peek(), TokenKind::Plus | TokenKind::Minus) {
                    if *self.peek() == TokenKind::Minus {
                        negative = !negative;
                    }
                    self.pos += 1;
                }
                let atom = self.parse_atom()?;
                if negative {
                    Ok(Expr::Unary {
                        op: UnaryOp::Neg,
                        expr: Box::new(atom),
                    })
                } else {
                    Ok(atom)
                }
            }
            TokenKind::Not => {
                self.pos += 1;
                let operand = self.parse_bp(NOT_BINDING)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(operand),
                })
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, CompileError> {
        let token = self.advance().clone();
        match token.kind {
            TokenKind::Number(v) => Ok(Expr::Number(v)),
            TokenKind::Pi => Ok(Expr::Number(std::f64::consts::PI)),
            TokenKind::Euler => Ok(Expr::Number(std::f64::consts::E)),
            TokenKind::True => Ok(Expr::Number(TRUE_VALUE)),
            TokenKind::False => Ok(Expr::Number(FALSE_VALUE)),
            TokenKind::Variable(index) => {
                // `X<n>{}` means "use the full runtime vector for slot n".
                if *self.peek() == TokenKind::LBrace {
                    self.pos += 1;
                    self.expect(TokenKind::RBrace, "'}' after vector variable")?;
                    Ok(Expr::VectorVar(index))
                } else {
                    Ok(Expr::ScalarVar(index))
                }
            }
            TokenKind::LParen => {
                self.enter()?;
                let expr = self.parse_bp(0)?;
                self.leave();
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBrace => self.parse_vector_literal(),
            TokenKind::Func(func) => {
                let args = self.parse_call_args(func.name(), func.arity())?;
                Ok(Expr::Call { func, args })
            }
            TokenKind::Agg(func) => self.parse_aggregate(func),
            TokenKind::If => self.parse_conditional(),
            _ => {
                let what = if token.text.is_empty() {
                    "end of formula".to_string()
                } else {
                    format!("'{}'", token.text)
                };
                Err(self.syntax(format!("unexpected {what}")))
            }
        }
    }

    /// `{e1, e2, ...}`, the opening brace already consumed. Elements are
    /// full expressions; nested vector literals are legal elements.
    fn parse_vector_literal(&mut self) -> Result<Expr, CompileError> {
        self.enter()?;
        if *self.peek() == TokenKind::RBrace {
            return Err(CompileError::new(
                FailureKind::InvalidVectorExpression,
                ["empty vector literal"],
            ));
        }
        let mut items = Vec::new();
        loop {
            if *self.peek() == TokenKind::ArgSep {
                return Err(CompileError::new(
                    FailureKind::InvalidVectorExpression,
                    ["stray empty element"],
                ));
            }
            items.push(self.parse_bp(0)?);
            match self.peek() {
                TokenKind::ArgSep => {
                    self.pos += 1;
                    if *self.peek() == TokenKind::RBrace {
                        return Err(CompileError::new(
                            FailureKind::InvalidVectorExpression,
                            ["stray empty element"],
                        ));
                    }
                }
                TokenKind::RBrace => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.syntax("expected ',' or '}' in vector literal")),
            }
        }
        self.leave();
        Ok(Expr::Vector(items))
    }

    fn parse_call_args(&mut self, name: &str, arity: usize) -> Result<Vec<Expr>, CompileError> {
        self.expect(TokenKind::LParen, "'(' after function name")?;
        self.enter()?;
        let mut args = Vec::new();
        if *self.peek() != TokenKind::RParen {
            loop {
                args.push(self.parse_bp(0)?);
                match self.peek() {
                    TokenKind::ArgSep => self.pos += 1,
                    TokenKind::RParen => break,
                    _ => return Err(self.syntax(format!("expected ',' or ')' in {name}(...)"))),
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        self.leave();
        if args.len() != arity {
            return Err(CompileError::new(
                FailureKind::WrongArgumentCount,
                [name.to_string(), arity.to_string()],
            ));
        }
        Ok(args)
    }

    fn parse_aggregate(&mut self, func: AggFunc) -> Result<Expr, CompileError> {
        let mut args = self.parse_call_args(func.name(), func.arity())?;
        let rest = args.split_off(1);
        let vector = args.remove(0);
        Ok(Expr::Aggregate {
            func,
            vector: Box::new(vector),
            args: rest,
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr, CompileError> {
        let mut args = self.parse_call_args("IF", 3)?;
        let otherwise = args.pop().unwrap_or(Expr::Number(FALSE_VALUE));
        let then = args.pop().unwrap_or(Expr::Number(FALSE_VALUE));
        let cond = args.pop().unwrap_or(Expr::Number(FALSE_VALUE));
        if !is_boolean_expr(&cond) {
            return Err(self.syntax("IF condition must be boolean-valued"));
        }
        Ok(Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }
}

/// (operator, left binding power, right binding power). `^` is right
/// associative; everything else is left associative.
fn infix_binding(kind: &TokenKind) -> Option<(BinaryOp, u8, u8)> {
    Some(match kind {
        TokenKind::Or => (BinaryOp::Or, 1, 2),
        TokenKind::And => (BinaryOp::And, 3, 4),
        TokenKind::Eq => (BinaryOp::Eq, 7, 8),
        TokenKind::Lt => (BinaryOp::Lt, 7, 8),
        TokenKind::Le => (BinaryOp::Le, 7, 8),
        TokenKind::Gt => (BinaryOp::Gt, 7, 8),
        TokenKind::Ge => (BinaryOp::Ge, 7, 8),
        TokenKind::Plus => (BinaryOp::Add, 9, 10),
        TokenKind::Minus => (BinaryOp::Sub, 9, 10),
        TokenKind::Star => (BinaryOp::Mul, 11, 12),
        TokenKind::Slash => (BinaryOp::Div, 11, 12),
        TokenKind::Caret => (BinaryOp::Pow, 14, 13),
        _ => return None,
    })
}

/// Conditions of `IF` must be boolean-valued: comparisons, logical
/// operators, `NOT`, boolean literals, or a nested conditional of the same.
fn is_boolean_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Binary { op, .. } => op.is_boolean(),
        Expr::Unary { op, .. } => *op == UnaryOp::Not,
        Expr::Number(v) => *v == TRUE_VALUE || *v == FALSE_VALUE,
        Expr::If { then, otherwise, .. } => is_boolean_expr(then) && is_boolean_expr(otherwise),
        _ => false,
    }
}

/// Type validation: vector-typed nodes may only occur in vector context
/// (aggregate first argument, vector literal elements), and the formula as a
/// whole must produce a scalar.
fn validate(expr: &Expr) -> Result<(), CompileError> {
    if expr.is_vector() {
        return Err(CompileError::new(
            FailureKind::InvalidVectorExpression,
            ["formula result must be scalar"],
        ));
    }
    validate_node(expr)
}

fn validate_node(expr: &Expr) -> Result<(), CompileError> {
    fn require_scalar(e: &Expr, context: &str) -> Result<(), CompileError> {
        if e.is_vector() {
            return Err(CompileError::new(
                FailureKind::InvalidVectorExpression,
                [format!("vector used as {context}")],
            ));
        }
        validate_node(e)
    }

    match expr {
        Expr::Number(_)
        | Expr::ScalarVar(_)
        | Expr::VectorVar(_)
        | Expr::CalcConst(_)
        | Expr::SubtermRef(_)
        | Expr::VectorRef { .. } => Ok(()),
        Expr::Vector(items) => {
            for item in items {
                // Nested vector-typed elements flatten at runtime.
                validate_node(item)?;
            }
            Ok(())
        }
        Expr::Unary { expr, .. } => require_scalar(expr, "operand"),
        Expr::Binary { left, right, .. } => {
            require_scalar(left, "operand")?;
            require_scalar(right, "operand")
        }
        Expr::Call { func, args } => {
            for arg in args {
                require_scalar(arg, &format!("argument of {}", func.name()))?;
            }
            Ok(())
        }
        Expr::Aggregate { func, vector, args } => {
            if !vector.is_vector() {
                return Err(CompileError::new(
                    FailureKind::InvalidVectorExpression,
                    [format!("{} requires a vector argument", func.name())],
                ));
            }
            validate_node(vector)?;
            for arg in args {
                require_scalar(arg, &format!("bound of {}", func.name()))?;
            }
            Ok(())
        }
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            require_scalar(cond, "condition")?;
            require_scalar(then, "branch")?;
            require_scalar(otherwise, "branch")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use pretty_assertions::assert_eq;

    fn parse_str(formula: &str) -> Result<Expr, CompileError> {
        parse(&lex(formula).expect("lex"))
    }

    #[test]
    fn multiplicative_binds_tighter_than_additive() {
        let e = parse_str("1+2*3").expect("parse");
        let Expr::Binary { op: BinaryOp::Add, right, .. } = e else {
            panic!("expected Add at root, got {e:?}");
        };
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn power_is_right_associative() {
        let e = parse_str("2^3^2").expect("parse");
        let Expr::Binary { op: BinaryOp::Pow, left, right } = e else {
            panic!("expected Pow at root, got {e:?}");
        };
        assert_eq!(*left, Expr::Number(2.0));
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn prefix_sign_binds_tighter_than_power() {
        let e = parse_str("-2^2").expect("parse");
        let Expr::Binary { op: BinaryOp::Pow, left, .. } = e else {
            panic!("expected Pow at root, got {e:?}");
        };
        assert!(matches!(*left, Expr::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn repeated_signs_collapse() {
        assert_eq!(parse_str("--2").expect("parse"), Expr::Number(2.0));
        assert_eq!(
            parse_str("+-+2").expect("parse"),
            Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(Expr::Number(2.0)),
            }
        );
    }

    #[test]
    fn not_binds_between_and_and_comparisons() {
        // NOT x0 < 1 AND x1 < 2  ==  (NOT (x0<1)) AND (x1<2)
        let e = parse_str("NOT x0 < 1 AND x1 < 2").expect("parse");
        let Expr::Binary { op: BinaryOp::And, left, .. } = e else {
            panic!("expected And at root, got {e:?}");
        };
        let Expr::Unary { op: UnaryOp::Not, expr } = *left else {
            panic!("expected Not on the left");
        };
        assert!(matches!(*expr, Expr::Binary { op: BinaryOp::Lt, .. }));
    }

    #[test]
    fn parses_vector_variable_suffix() {
        let e = parse_str("sum(x0{})").expect("parse");
        assert_eq!(
            e,
            Expr::Aggregate {
                func: AggFunc::Sum,
                vector: Box::new(Expr::VectorVar(0)),
                args: vec![],
            }
        );
    }

    #[test]
    fn parses_nested_vector_literal() {
        let e = parse_str("count({1,{2,3}})").expect("parse");
        let Expr::Aggregate { vector, .. } = e else {
            panic!("expected aggregate, got {e:?}");
        };
        let Expr::Vector(items) = *vector else {
            panic!("expected vector literal");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Expr::Vector(_)));
    }

    #[test]
    fn rejects_vector_in_scalar_position() {
        let err = parse_str("{1,2}+1").unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidVectorExpression);

        let err = parse_str("exp(x0{})").unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidVectorExpression);

        let err = parse_str("x0{}").unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidVectorExpression);
    }

    #[test]
    fn rejects_scalar_where_vector_required() {
        let err = parse_str("sum(1)").unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidVectorExpression);
    }

    #[test]
    fn rejects_stray_empty_vector_elements() {
        let err = parse_str("mean({1,,2})").unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidVectorExpression);
        let err = parse_str("mean({1,2,})").unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidVectorExpression);
    }

    #[test]
    fn conditional_requires_boolean_condition() {
        assert!(parse_str("IF(x0<4,1,2)").is_ok());
        assert!(parse_str("IF(true,1,2)").is_ok());
        assert!(parse_str("IF(NOT(x0<4) OR x1=2,1,2)").is_ok());
        let err = parse_str("IF(x0+1,1,2)").unwrap_err();
        assert_eq!(err.kind(), FailureKind::Syntax);
    }

    #[test]
    fn both_rewrite_forms_parse() {
        assert!(parse_str("x0+x1*(sin(x2*x3)^x4+exp(-x2*(x0^x6+x1)/x5))").is_ok());
        assert!(parse_str("(exp(-x2*(x0^x6+x1)/x5)+sin(x2*x3)^x4)*x1+x0").is_ok());
    }
}
