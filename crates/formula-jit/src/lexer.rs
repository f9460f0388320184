//! Formula lexer.
//!
//! Splits formula text into tokens by maximal-munch scanning and performs
//! all lexical validation: the recognized character alphabet, numeric
//! literal shape, and resolution of identifiers against the fixed
//! keyword/function table. Newlines count as ignorable whitespace.

use crate::ast::{AggFunc, Func};
use crate::diagnostics::{CompileError, FailureKind};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    /// Scalar variable reference `X<n>`.
    Variable(usize),
    Func(Func),
    Agg(AggFunc),
    If,
    And,
    Or,
    Not,
    True,
    False,
    Pi,
    Euler,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    LBrace,
    RBrace,
    ArgSep,
    Eof,
}

impl TokenKind {
    /// Stable integer code of this token, as used by the grammar checker's
    /// token-sequence view and by introspection tests.
    pub fn code(&self) -> u8 {
        match self {
            TokenKind::Number(_) => 0,
            TokenKind::Variable(_) => 1,
            TokenKind::Func(f) => 10 + f.id() as u8,
            TokenKind::Agg(a) => 20 + a.id() as u8,
            TokenKind::If => 30,
            TokenKind::And => 31,
            TokenKind::Or => 32,
            TokenKind::Not => 33,
            TokenKind::True => 34,
            TokenKind::False => 35,
            TokenKind::Pi => 36,
            TokenKind::Euler => 37,
            TokenKind::Plus => 40,
            TokenKind::Minus => 41,
            TokenKind::Star => 42,
            TokenKind::Slash => 43,
            TokenKind::Caret => 44,
            TokenKind::Eq => 45,
            TokenKind::Lt => 46,
            TokenKind::Le => 47,
            TokenKind::Gt => 48,
            TokenKind::Ge => 49,
            TokenKind::LParen => 50,
            TokenKind::RParen => 51,
            TokenKind::LBrace => 52,
            TokenKind::RBrace => 53,
            TokenKind::ArgSep => 54,
            TokenKind::Eof => 255,
        }
    }

    /// Binary-only operators and keywords that can never open an operand.
    pub fn is_binary_only_operator(&self) -> bool {
        matches!(
            self,
            TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Caret
                | TokenKind::Eq
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::Gt
                | TokenKind::Ge
                | TokenKind::And
                | TokenKind::Or
        )
    }

    /// Operators, separators and openers that leave the formula incomplete
    /// when they are the final token.
    pub fn cannot_end_formula(&self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Caret
                | TokenKind::Eq
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::Gt
                | TokenKind::Ge
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::Not
                | TokenKind::ArgSep
                | TokenKind::LParen
                | TokenKind::LBrace
                | TokenKind::Func(_)
                | TokenKind::Agg(_)
                | TokenKind::If
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Original text, kept for diagnostics.
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Tokenize a formula. The returned sequence always ends with an `Eof`
/// token carrying empty text.
pub fn lex(formula: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(formula).run()
}

struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(formula: &'a str) -> Self {
        Self {
            input: formula.as_bytes(),
            pos: 0,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ws();
            let Some(b) = self.peek() else { break };
            let token = match b {
                b'0'..=b'9' | b'.' => self.scan_number()?,
                b'a'..=b'z' | b'A'..=b'Z' => self.scan_ident()?,
                b'<' | b'>' => self.scan_comparison(),
                b'=' => self.single(TokenKind::Eq),
                b'+' => self.single(TokenKind::Plus),
                b'-' => self.single(TokenKind::Minus),
                b'*' => self.single(TokenKind::Star),
                b'/' => self.single(TokenKind::Slash),
                b'^' => self.single(TokenKind::Caret),
                b'(' => self.single(TokenKind::LParen),
                b')' => self.single(TokenKind::RParen),
                b'{' => self.single(TokenKind::LBrace),
                b'}' => self.single(TokenKind::RBrace),
                b',' => self.single(TokenKind::ArgSep),
                other => {
                    return Err(CompileError::new(
                        FailureKind::ForbiddenCharacter,
                        [(other as char).to_string()],
                    ))
                }
            };
            tokens.push(token);
        }
        tokens.push(Token::new(TokenKind::Eof, ""));
        Ok(tokens)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b == b' ' || b == b'\t' || b == b'\r' || b == b'\n' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn single(&mut self, kind: TokenKind) -> Token {
        let text = (self.input[self.pos] as char).to_string();
        self.pos += 1;
        Token::new(kind, text)
    }

    /// `<=` and `>=` are preferred over the single-character forms.
    fn scan_comparison(&mut self) -> Token {
        let b0 = self.input[self.pos];
        if self.input.get(self.pos + 1) == Some(&b'=') {
            self.pos += 2;
            return match b0 {
                b'<' => Token::new(TokenKind::Le, "<="),
                _ => Token::new(TokenKind::Ge, ">="),
            };
        }
        self.pos += 1;
        match b0 {
            b'<' => Token::new(TokenKind::Lt, "<"),
            _ => Token::new(TokenKind::Gt, ">"),
        }
    }

    /// Digits with at most one `.` decimal point. Comma is the argument
    /// separator and never part of a literal.
    fn scan_number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        let mut seen_dot = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !seen_dot => {
                    seen_dot = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .unwrap_or_default()
            .to_string();
        let value: f64 = text
            .parse()
            .map_err(|_| CompileError::new(FailureKind::Syntax, [format!("bad literal '{text}'")]))?;
        Ok(Token::new(TokenKind::Number(value), text))
    }

    /// Identifiers are letter runs optionally followed by digits. `X<n>` is
    /// a variable; anything else must match the fixed keyword/function
    /// table.
    fn scan_ident(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphabetic() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let letters_end = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let letters = std::str::from_utf8(&self.input[start..letters_end]).unwrap_or_default();
        let digits = std::str::from_utf8(&self.input[letters_end..self.pos]).unwrap_or_default();
        let text = format!("{letters}{digits}");

        if letters.eq_ignore_ascii_case("x") && !digits.is_empty() {
            let index: usize = digits
                .parse()
                .map_err(|_| CompileError::new(FailureKind::MalformedVariable, [text.clone()]))?;
            return Ok(Token::new(TokenKind::Variable(index), text));
        }

        if !digits.is_empty() {
            // Identifiers like `sin2` match nothing in the table.
            return Err(CompileError::new(FailureKind::InvalidToken, [text]));
        }

        if let Some(func) = Func::from_name(letters) {
            return Ok(Token::new(TokenKind::Func(func), text));
        }
        if let Some(agg) = AggFunc::from_name(letters) {
            return Ok(Token::new(TokenKind::Agg(agg), text));
        }
        let kind = match letters.to_ascii_lowercase().as_str() {
            "if" => TokenKind::If,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "pi" => TokenKind::Pi,
            "e" => TokenKind::Euler,
            _ => return Err(CompileError::new(FailureKind::InvalidToken, [text])),
        };
        Ok(Token::new(kind, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(formula: &str) -> Vec<TokenKind> {
        lex(formula)
            .expect("lex")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn scans_numbers_variables_and_operators() {
        assert_eq!(
            kinds("x0 + 2.5*X1"),
            vec![
                TokenKind::Variable(0),
                TokenKind::Plus,
                TokenKind::Number(2.5),
                TokenKind::Star,
                TokenKind::Variable(1),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn prefers_two_character_comparisons() {
        assert_eq!(
            kinds("x0<=1"),
            vec![
                TokenKind::Variable(0),
                TokenKind::Le,
                TokenKind::Number(1.0),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("x0<1"),
            vec![
                TokenKind::Variable(0),
                TokenKind::Lt,
                TokenKind::Number(1.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newline_is_whitespace() {
        assert_eq!(
            kinds("1\n+\n2"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn bare_x_is_an_invalid_token() {
        let err = lex("X").unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidToken);
        assert_eq!(err.diagnostic().params(), ["X"]);
    }

    #[test]
    fn rejects_characters_outside_the_alphabet() {
        let err = lex("x0 $ 1").unwrap_err();
        assert_eq!(err.kind(), FailureKind::ForbiddenCharacter);
        assert_eq!(err.diagnostic().params(), ["$"]);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(kinds("TRUE and PI")[..3].to_vec(), vec![
            TokenKind::True,
            TokenKind::And,
            TokenKind::Pi,
        ]);
        assert_eq!(kinds("SUBTOTAL")[0], TokenKind::Agg(AggFunc::SubTotal));
    }

    #[test]
    fn comma_splits_literals() {
        assert_eq!(
            kinds("1,2345"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::ArgSep,
                TokenKind::Number(2345.0),
                TokenKind::Eof,
            ]
        );
    }
}
