//! Pre-parse validation of the token sequence.
//!
//! Runs after the lexer and before the parser, so structural mistakes are
//! reported with their own failure kinds instead of surfacing as generic
//! parse errors: bracket balance, operator placement at the formula
//! boundaries, fixed function arity, separator placement, and bare
//! `AND`/`OR`/`NOT` keywords.

use crate::diagnostics::{CompileError, FailureKind};
use crate::lexer::{Token, TokenKind};

/// Validate the grammatical legality of a token sequence. The sequence is
/// expected to end with `Eof`.
pub fn check(tokens: &[Token]) -> Result<(), CompileError> {
    let body: &[Token] = match tokens.split_last() {
        Some((eof, body)) if eof.kind == TokenKind::Eof => body,
        _ => tokens,
    };
    if body.is_empty() {
        return Err(CompileError::new(FailureKind::Syntax, ["empty formula"]));
    }

    check_bracket_balance(body)?;
    check_boundaries(body)?;
    check_function_arity(body)?;
    check_separators(body)?;
    check_logical_operands(body)?;
    Ok(())
}

fn check_bracket_balance(body: &[Token]) -> Result<(), CompileError> {
    let (mut open_paren, mut close_paren) = (0usize, 0usize);
    let (mut open_brace, mut close_brace) = (0usize, 0usize);
    for t in body {
        match t.kind {
            TokenKind::LParen => open_paren += 1,
            TokenKind::RParen => close_paren += 1,
            TokenKind::LBrace => open_brace += 1,
            TokenKind::RBrace => close_brace += 1,
            _ => {}
        }
    }
    if open_paren != close_paren {
        return Err(CompileError::new(
            FailureKind::UnequalBracketCount,
            [open_paren.to_string(), close_paren.to_string()],
        ));
    }
    if open_brace != close_brace {
        return Err(CompileError::new(
            FailureKind::UnequalBracketCount,
            [open_brace.to_string(), close_brace.to_string()],
        ));
    }
    Ok(())
}

fn check_boundaries(body: &[Token]) -> Result<(), CompileError> {
    // Unary sign and NOT may open a formula; binary-only operators and the
    // separator may not.
    let first = &body[0];
    if first.kind.is_binary_only_operator() || first.kind == TokenKind::ArgSep {
        return Err(CompileError::new(
            FailureKind::Syntax,
            [format!("formula must not start with '{}'", first.text)],
        ));
    }
    let last = &body[body.len() - 1];
    if last.kind.cannot_end_formula() {
        return Err(CompileError::new(
            FailureKind::InvalidLastToken,
            [last.text.clone()],
        ));
    }
    Ok(())
}

/// Required argument count for each function-like token.
fn required_arity(kind: &TokenKind) -> Option<(String, usize)> {
    match kind {
        TokenKind::Func(f) => Some((f.name().to_string(), f.arity())),
        TokenKind::Agg(a) => Some((a.name().to_string(), a.arity())),
        TokenKind::If => Some(("IF".to_string(), 3)),
        _ => None,
    }
}

fn check_function_arity(body: &[Token]) -> Result<(), CompileError> {
    for (i, t) in body.iter().enumerate() {
        let Some((name, required)) = required_arity(&t.kind) else {
            continue;
        };
        // A function name not followed by `(` is left to the parser.
        if body.get(i + 1).map(|t| &t.kind) != Some(&TokenKind::LParen) {
            continue;
        }
        let mut depth = 0usize;
        let mut args = 0usize;
        let mut saw_content = false;
        for t in &body[i + 1..] {
            match t.kind {
                TokenKind::LParen | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::ArgSep if depth == 1 => args += 1,
                _ if depth >= 1 => saw_content = true,
                _ => {}
            }
        }
        if saw_content || args > 0 {
            args += 1;
        }
        if args != required {
            return Err(CompileError::new(
                FailureKind::WrongArgumentCount,
                [name, required.to_string()],
            ));
        }
    }
    Ok(())
}

/// The separator only occurs inside a bracket pair (argument lists and
/// vector literals). A top-level comma is the classic decimal-point mistake.
fn check_separators(body: &[Token]) -> Result<(), CompileError> {
    let mut depth = 0usize;
    for t in body {
        match t.kind {
            TokenKind::LParen | TokenKind::LBrace => depth += 1,
            TokenKind::RParen | TokenKind::RBrace => depth = depth.saturating_sub(1),
            TokenKind::ArgSep if depth == 0 => {
                return Err(CompileError::new(
                    FailureKind::Syntax,
                    ["separator ',' outside brackets (use '.' as decimal point)"],
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

/// `AND`/`OR` need operands on both sides, `NOT` on its right.
fn check_logical_operands(body: &[Token]) -> Result<(), CompileError> {
    fn can_end_operand(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Number(_)
                | TokenKind::Variable(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Pi
                | TokenKind::Euler
                | TokenKind::RParen
                | TokenKind::RBrace
        )
    }
    fn can_start_operand(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Number(_)
                | TokenKind::Variable(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Pi
                | TokenKind::Euler
                | TokenKind::LParen
                | TokenKind::LBrace
                | TokenKind::Func(_)
                | TokenKind::Agg(_)
                | TokenKind::If
                | TokenKind::Not
                | TokenKind::Plus
                | TokenKind::Minus
        )
    }

    for (i, t) in body.iter().enumerate() {
        match t.kind {
            TokenKind::And | TokenKind::Or => {
                let left_ok = i > 0 && can_end_operand(&body[i - 1].kind);
                let right_ok = body.get(i + 1).is_some_and(|n| can_start_operand(&n.kind));
                if !left_ok || !right_ok {
                    return Err(CompileError::new(
                        FailureKind::Syntax,
                        [format!("'{}' is missing an operand", t.text)],
                    ));
                }
            }
            TokenKind::Not => {
                let right_ok = body.get(i + 1).is_some_and(|n| can_start_operand(&n.kind));
                if !right_ok {
                    return Err(CompileError::new(
                        FailureKind::Syntax,
                        [format!("'{}' is missing an operand", t.text)],
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
