//! Structured failure reporting shared by every compile stage and by the
//! checked evaluator.
//!
//! Each failure is a [`FailureKind`] plus ordered text parameters. The
//! human-readable message is rendered from a fixed, process-wide template
//! table ([`message_templates`]) so hosts can localize or re-render
//! diagnostics without string parsing.

use smallvec::SmallVec;
use std::fmt;

/// Category of a compile- or evaluation-time diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The formula compiled (or evaluated) without error.
    Success,
    /// A character outside the recognized formula alphabet.
    ForbiddenCharacter,
    /// An unrecognized symbol or identifier.
    InvalidToken,
    /// The formula ends on an incomplete construct.
    InvalidLastToken,
    /// A function was called with the wrong number of arguments.
    WrongArgumentCount,
    /// Opening and closing bracket counts differ.
    UnequalBracketCount,
    /// A malformed `{}` literal, or a vector used where a scalar is required.
    InvalidVectorExpression,
    /// A variable reference whose index cannot be read.
    MalformedVariable,
    /// Any other grammar violation.
    Syntax,
    /// Runtime argument arrays shorter than the compiled program requires.
    ArgumentMismatch,
    /// A `subTotal` range outside the vector bounds, or inverted.
    RangeBounds,
    /// Evaluation was requested before a successful compile.
    NotCompiled,
}

impl FailureKind {
    /// Stable index of this kind into [`message_templates`].
    pub fn code(self) -> usize {
        match self {
            FailureKind::Success => 0,
            FailureKind::ForbiddenCharacter => 1,
            FailureKind::InvalidToken => 2,
            FailureKind::InvalidLastToken => 3,
            FailureKind::WrongArgumentCount => 4,
            FailureKind::UnequalBracketCount => 5,
            FailureKind::InvalidVectorExpression => 6,
            FailureKind::MalformedVariable => 7,
            FailureKind::Syntax => 8,
            FailureKind::ArgumentMismatch => 9,
            FailureKind::RangeBounds => 10,
            FailureKind::NotCompiled => 11,
        }
    }
}

/// Message templates, indexed by [`FailureKind::code`]. `{0}`, `{1}`, `{2}`
/// are replaced by the diagnostic's ordered parameters.
const MESSAGE_TEMPLATES: &[&str] = &[
    "formula compiled successfully",
    "forbidden character '{0}' in formula",
    "invalid token '{0}' in formula",
    "formula must not end with '{0}'",
    "function '{0}' requires exactly {1} argument(s)",
    "unequal bracket count: {0} opening, {1} closing",
    "invalid vector expression: {0}",
    "malformed variable reference '{0}'",
    "syntax error: {0}",
    "evaluation requires {0} scalar and {1} vector argument(s)",
    "subTotal range {0}..{1} is invalid for a vector of length {2}",
    "no compiled program",
];

/// The shared, immutable message-template table.
pub fn message_templates() -> &'static [&'static str] {
    MESSAGE_TEMPLATES
}

type Params = SmallVec<[String; 2]>;

/// A structured failure code plus its ordered text parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    kind: FailureKind,
    params: Params,
}

impl Diagnostic {
    pub fn new<I, S>(kind: FailureKind, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn success() -> Self {
        Self {
            kind: FailureKind::Success,
            params: Params::new(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn is_success(&self) -> bool {
        self.kind == FailureKind::Success
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Render the formatted message from the template table.
    pub fn message(&self) -> String {
        let mut out = MESSAGE_TEMPLATES[self.kind.code()].to_string();
        for (i, p) in self.params.iter().enumerate() {
            out = out.replace(&format!("{{{i}}}"), p);
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// A compile-time failure. Wraps the [`Diagnostic`] recorded on the engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct CompileError(pub(crate) Diagnostic);

impl CompileError {
    pub(crate) fn new<I, S>(kind: FailureKind, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Diagnostic::new(kind, params))
    }

    pub fn diagnostic(&self) -> &Diagnostic {
        &self.0
    }

    pub fn kind(&self) -> FailureKind {
        self.0.kind()
    }
}

/// A checked-evaluation failure, carried in the same diagnostic shape as
/// compile-time failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct EvalError(pub(crate) Diagnostic);

impl EvalError {
    pub(crate) fn new<I, S>(kind: FailureKind, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Diagnostic::new(kind, params))
    }

    pub fn diagnostic(&self) -> &Diagnostic {
        &self.0
    }

    pub fn kind(&self) -> FailureKind {
        self.0.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn message_substitutes_ordered_params() {
        let d = Diagnostic::new(FailureKind::WrongArgumentCount, ["log", "2"]);
        assert_eq!(d.message(), "function 'log' requires exactly 2 argument(s)");
    }

    #[test]
    fn template_table_covers_every_kind() {
        assert_eq!(FailureKind::NotCompiled.code() + 1, message_templates().len());
    }

    #[test]
    fn success_diagnostic_has_no_params() {
        let d = Diagnostic::success();
        assert!(d.is_success());
        assert!(d.params().is_empty());
        assert_eq!(d.message(), "formula compiled successfully");
    }
}
