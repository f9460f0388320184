//! Engine façade: owns the optimization flags, the compiled program, and
//! the last compile diagnostic.

use tracing::debug;

use crate::ast::Expr;
use crate::compiler::{emit, EmitInput, ProgramMeta};
use crate::diagnostics::{CompileError, Diagnostic, EvalError, FailureKind};
use crate::optimizer::dedup::{dedup, DedupOutcome};
use crate::optimizer::fold::{fold, FoldOutcome};
use crate::optimizer::peephole;
use crate::program::Program;
use crate::vm::Vm;
use crate::{grammar, lexer, parser};

/// The four independent optimization flags. All passes default to enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// Constant sub-expression recognition.
    pub fold_constants: bool,
    /// Identical subterm recognition.
    pub dedup_subterms: bool,
    /// Stack push optimization over the emitted sequences.
    pub optimize_stack_pushes: bool,
    /// Identical vector recognition.
    pub dedup_vectors: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            fold_constants: true,
            dedup_subterms: true,
            optimize_stack_pushes: true,
            dedup_vectors: true,
        }
    }
}

impl CompileOptions {
    /// Every pass disabled; useful for differential testing.
    pub fn unoptimized() -> Self {
        Self {
            fold_constants: false,
            dedup_subterms: false,
            optimize_stack_pushes: false,
            dedup_vectors: false,
        }
    }
}

/// A just-in-time formula compiler instance.
///
/// Owns at most one compiled program. [`Engine::compile`] replaces any prior
/// program atomically: success installs the new program and records the
/// success diagnostic; failure discards the prior program, leaves the
/// instance uncompiled, and records the failure diagnostic.
///
/// Evaluation never mutates the engine, so concurrent evaluations of one
/// compiled engine from multiple threads are safe.
pub struct Engine {
    options: CompileOptions,
    program: Option<Program>,
    diagnostic: Diagnostic,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_options(CompileOptions::default())
    }

    pub fn with_options(options: CompileOptions) -> Self {
        Self {
            options,
            program: None,
            diagnostic: Diagnostic::new(FailureKind::NotCompiled, Vec::<String>::new()),
        }
    }

    pub fn options(&self) -> CompileOptions {
        self.options
    }

    /// Compile a formula, replacing any previously compiled program.
    ///
    /// No internal fault escapes: every failure is returned as a
    /// [`CompileError`] and recorded as the engine diagnostic.
    pub fn compile(&mut self, formula: &str) -> Result<(), CompileError> {
        // The prior program is gone either way; failure must not leave a
        // stale program installed.
        self.program = None;
        match self.compile_program(formula) {
            Ok(program) => {
                self.program = Some(program);
                self.diagnostic = Diagnostic::success();
                Ok(())
            }
            Err(err) => {
                self.diagnostic = err.diagnostic().clone();
                Err(err)
            }
        }
    }

    fn compile_program(&self, formula: &str) -> Result<Program, CompileError> {
        debug!(formula, "compiling formula");
        let tokens = lexer::lex(formula)?;
        grammar::check(&tokens)?;
        let expr = parser::parse(&tokens)?;
        let meta = meta_of(&expr);

        let FoldOutcome { expr, calc } = if self.options.fold_constants {
            fold(expr)
        } else {
            FoldOutcome {
                expr,
                calc: Vec::new(),
            }
        };
        let DedupOutcome { expr, subterms } = dedup(
            expr,
            self.options.dedup_subterms,
            self.options.dedup_vectors,
        );
        debug!(
            calc_consts = calc.len(),
            subterms = subterms.len(),
            "optimizer passes complete"
        );

        let mut program = emit(
            &EmitInput {
                main: expr,
                subterms,
                calc,
            },
            meta,
        );
        if self.options.optimize_stack_pushes {
            peephole::optimize_program(&mut program);
        }
        Ok(program)
    }

    /// Strict evaluation. Argument array lengths must match the compiled
    /// argument counts; violations (or an uncompiled engine) panic.
    pub fn evaluate(&self, scalars: &[f64], vectors: &[&[f64]]) -> f64 {
        let Some(program) = self.program.as_ref() else {
            panic!("evaluate called without a compiled program");
        };
        Vm::new().eval(program, scalars, vectors)
    }

    /// Checked evaluation: malformed arguments and runtime failures are
    /// returned as diagnostics instead of faulting.
    pub fn try_evaluate(&self, scalars: &[f64], vectors: &[&[f64]]) -> Result<f64, EvalError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| EvalError::new(FailureKind::NotCompiled, Vec::<String>::new()))?;
        Vm::new().try_eval(program, scalars, vectors)
    }

    /// The compiled program, for evaluation with a caller-owned [`Vm`] and
    /// for introspection. `None` until a compile succeeds.
    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn is_compiled(&self) -> bool {
        self.program.is_some()
    }

    /// Diagnostic of the last compile attempt (success included).
    pub fn diagnostic(&self) -> &Diagnostic {
        &self.diagnostic
    }
}

/// Metadata derived from the parsed tree before any optimization pass runs.
fn meta_of(expr: &Expr) -> ProgramMeta {
    let mut meta = ProgramMeta::default();
    let mut max_scalar: Option<usize> = None;
    let mut max_vector: Option<usize> = None;
    scan(expr, &mut meta, &mut max_scalar, &mut max_vector);
    meta.scalar_arg_count = max_scalar.map_or(0, |m| m + 1);
    meta.vector_arg_count = max_vector.map_or(0, |m| m + 1);
    meta
}

fn scan(
    expr: &Expr,
    meta: &mut ProgramMeta,
    max_scalar: &mut Option<usize>,
    max_vector: &mut Option<usize>,
) {
    match expr {
        Expr::Number(_) | Expr::CalcConst(_) | Expr::SubtermRef(_) | Expr::VectorRef(_) => {}
        Expr::ScalarVar(n) => {
            *max_scalar = Some(max_scalar.map_or(*n, |m| m.max(*n)));
        }
        Expr::VectorVar(n) => {
            meta.has_vector = true;
            *max_vector = Some(max_vector.map_or(*n, |m| m.max(*n)));
        }
        Expr::Vector(items) => {
            meta.has_vector = true;
            if items.iter().any(Expr::is_vector) {
                meta.has_nested_vector = true;
            }
            for item in items {
                scan(item, meta, max_scalar, max_vector);
            }
        }
        Expr::Unary { expr, .. } => scan(expr, meta, max_scalar, max_vector),
        Expr::Binary { left, right, .. } => {
            scan(left, meta, max_scalar, max_vector);
            scan(right, meta, max_scalar, max_vector);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                scan(arg, meta, max_scalar, max_vector);
            }
        }
        Expr::Aggregate { vector, args, .. } => {
            meta.has_vector = true;
            scan(vector, meta, max_scalar, max_vector);
            for arg in args {
                scan(arg, meta, max_scalar, max_vector);
            }
        }
        Expr::If {
            cond,
            then,
            otherwise,
        } => {
            meta.has_jump = true;
            scan(cond, meta, max_scalar, max_vector);
            scan(then, meta, max_scalar, max_vector);
            scan(otherwise, meta, max_scalar, max_vector);
        }
    }
}
