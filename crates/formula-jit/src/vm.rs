//! Stack-based evaluator for compiled programs.
//!
//! One execution core serves both entry points; they differ only in fault
//! containment. Strict evaluation trusts the caller's argument shapes and
//! panics if that contract is violated; checked evaluation validates the
//! argument arrays up front and converts every runtime failure into an
//! [`EvalError`].
//!
//! Execution order per call: the calculated-constants sequence seeds the
//! precomputed values, then each extracted subterm/vector-term sequence runs
//! once (consuming earlier cached results as needed), then the main
//! sequence. Every call owns its private stacks; nothing shared is mutated,
//! so concurrent evaluations of one compiled program are safe.

use std::borrow::Cow;

use crate::ast::{AggFunc, Func};
use crate::diagnostics::{EvalError, FailureKind};
use crate::optimizer::fold::apply_literal;
use crate::program::{Instruction, OpCode, Program, OPERAND_CONST, OPERAND_SCALAR_ARG};
use crate::FALSE_VALUE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EvalMode {
    Strict,
    Checked,
}

enum SeqValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

/// Reusable evaluator. The scalar stack is retained across calls to avoid
/// reallocation in compile-once/evaluate-many loops.
#[derive(Default)]
pub struct Vm {
    stack: Vec<f64>,
}

impl Vm {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn with_capacity(stack: usize) -> Self {
        Self {
            stack: Vec::with_capacity(stack),
        }
    }

    /// Strict evaluation: argument array lengths must match the compiled
    /// argument counts. Violations may panic.
    pub fn eval(&mut self, program: &Program, scalars: &[f64], vectors: &[&[f64]]) -> f64 {
        match self.run(program, scalars, vectors, EvalMode::Strict) {
            Ok(v) => v,
            Err(err) => panic!("strict evaluation failed: {err}"),
        }
    }

    /// Checked evaluation: no fault escapes; malformed arguments and
    /// runtime range failures become diagnostics.
    pub fn try_eval(
        &mut self,
        program: &Program,
        scalars: &[f64],
        vectors: &[&[f64]],
    ) -> Result<f64, EvalError> {
        self.run(program, scalars, vectors, EvalMode::Checked)
    }

    fn run(
        &mut self,
        program: &Program,
        scalars: &[f64],
        vectors: &[&[f64]],
        mode: EvalMode,
    ) -> Result<f64, EvalError> {
        if mode == EvalMode::Checked
            && (scalars.len() < program.scalar_arg_count
                || vectors.len() < program.vector_arg_count)
        {
            return Err(EvalError::new(
                FailureKind::ArgumentMismatch,
                [
                    program.scalar_arg_count.to_string(),
                    program.vector_arg_count.to_string(),
                ],
            ));
        }

        let mut calc = vec![0.0f64; program.calc_const_count];
        let mut sub_scalars: Vec<f64> = Vec::new();
        let mut sub_vectors: Vec<Vec<f64>> = Vec::new();

        if !program.calc_consts.is_empty() {
            self.run_sequence(
                &program.calc_consts,
                program,
                scalars,
                vectors,
                &mut calc,
                &sub_scalars,
                &sub_vectors,
                false,
                mode,
            )?;
        }

        for seq in &program.subterms {
            let value = self.run_sequence(
                &seq.instrs,
                program,
                scalars,
                vectors,
                &mut calc,
                &sub_scalars,
                &sub_vectors,
                seq.vector_valued,
                mode,
            )?;
            match value {
                SeqValue::Scalar(v) => sub_scalars.push(v),
                SeqValue::Vector(v) => sub_vectors.push(v),
            }
        }

        let result = self.run_sequence(
            &program.main,
            program,
            scalars,
            vectors,
            &mut calc,
            &sub_scalars,
            &sub_vectors,
            false,
            mode,
        )?;
        match result {
            SeqValue::Scalar(v) => Ok(v),
            SeqValue::Vector(_) => Ok(f64::NAN),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_sequence<'a>(
        &mut self,
        instrs: &[Instruction],
        program: &'a Program,
        scalars: &'a [f64],
        vectors: &[&'a [f64]],
        calc: &mut [f64],
        sub_scalars: &[f64],
        sub_vectors: &'a [Vec<f64>],
        vector_valued: bool,
        mode: EvalMode,
    ) -> Result<SeqValue, EvalError> {
        self.stack.clear();
        let mut vstack: Vec<Cow<'a, [f64]>> = Vec::new();

        let mut pc = 0usize;
        while pc < instrs.len() {
            let instr = instrs[pc];
            let a = instr.a() as usize;
            match instr.op() {
                OpCode::PushConst => self.stack.push(program.consts[a]),
                OpCode::PushScalarArg => self.stack.push(scalars[a]),
                OpCode::PushVectorArg => vstack.push(Cow::Borrowed(vectors[a])),
                OpCode::PushVectorConst => {
                    vstack.push(Cow::Borrowed(program.vector_consts[a].as_slice()))
                }
                OpCode::PushCalcConst => self.stack.push(calc[a]),
                OpCode::PushSubterm => self.stack.push(sub_scalars[a]),
                OpCode::PushVectorSubterm => {
                    vstack.push(Cow::Borrowed(sub_vectors[a].as_slice()))
                }
                OpCode::Neg => {
                    let v = pop(&mut self.stack);
                    self.stack.push(-v);
                }
                OpCode::Not => {
                    let v = pop(&mut self.stack);
                    self.stack.push(if v == FALSE_VALUE {
                        crate::TRUE_VALUE
                    } else {
                        FALSE_VALUE
                    });
                }
                op if op.is_binary() => {
                    let rhs = match instr.b() {
                        OPERAND_CONST => program.consts[a],
                        OPERAND_SCALAR_ARG => scalars[a],
                        _ => pop(&mut self.stack),
                    };
                    let lhs = pop(&mut self.stack);
                    self.stack.push(apply_literal(op.binary_op(), lhs, rhs));
                }
                OpCode::CallFunc => {
                    let func = Func::from_id(instr.a());
                    let value = match func {
                        Func::Exp => pop(&mut self.stack).exp(),
                        Func::Ln => pop(&mut self.stack).ln(),
                        Func::Sin => pop(&mut self.stack).sin(),
                        Func::Cos => pop(&mut self.stack).cos(),
                        Func::Sqrt => pop(&mut self.stack).sqrt(),
                        Func::Log => {
                            let base = pop(&mut self.stack);
                            let value = pop(&mut self.stack);
                            value.log(base)
                        }
                    };
                    self.stack.push(value);
                }
                OpCode::CallAggregate => {
                    let func = AggFunc::from_id(instr.a());
                    let value = self.call_aggregate(func, &mut vstack, mode)?;
                    self.stack.push(value);
                }
                OpCode::NewVector => vstack.push(Cow::Owned(Vec::new())),
                OpCode::AppendScalar => {
                    let v = pop(&mut self.stack);
                    if let Some(top) = vstack.last_mut() {
                        top.to_mut().push(v);
                    }
                }
                OpCode::AppendVector => {
                    if let Some(top) = vstack.pop() {
                        if let Some(below) = vstack.last_mut() {
                            below.to_mut().extend_from_slice(&top);
                        }
                    }
                }
                OpCode::JumpIfFalse => {
                    let cond = pop(&mut self.stack);
                    if cond == FALSE_VALUE {
                        pc = a;
                        continue;
                    }
                }
                OpCode::Jump => {
                    pc = a;
                    continue;
                }
                OpCode::StoreCalcConst => {
                    let v = pop(&mut self.stack);
                    calc[a] = v;
                }
                // Push and unary opcodes are handled above.
                _ => unreachable!("unhandled opcode"),
            }
            pc += 1;
        }

        if vector_valued {
            let v = vstack.pop().map(Cow::into_owned).unwrap_or_default();
            Ok(SeqValue::Vector(v))
        } else {
            Ok(SeqValue::Scalar(pop(&mut self.stack)))
        }
    }

    fn call_aggregate(
        &mut self,
        func: AggFunc,
        vstack: &mut Vec<Cow<'_, [f64]>>,
        mode: EvalMode,
    ) -> Result<f64, EvalError> {
        match func {
            AggFunc::Sum => {
                let v = pop_vector(vstack);
                Ok(v.iter().sum())
            }
            AggFunc::Mean => {
                let v = pop_vector(vstack);
                Ok(v.iter().sum::<f64>() / v.len() as f64)
            }
            AggFunc::Count => {
                let v = pop_vector(vstack);
                Ok(v.len() as f64)
            }
            AggFunc::SubTotal => {
                let end = pop(&mut self.stack);
                let start = pop(&mut self.stack);
                let v = pop_vector(vstack);
                // Bounds truncate toward zero and are inclusive.
                let start_i = start as i64;
                let end_i = end as i64;
                match mode {
                    EvalMode::Checked => {
                        let len = v.len() as i64;
                        if start_i < 0 || end_i >= len || start_i > end_i {
                            return Err(EvalError::new(
                                FailureKind::RangeBounds,
                                [
                                    start_i.to_string(),
                                    end_i.to_string(),
                                    v.len().to_string(),
                                ],
                            ));
                        }
                        Ok(v[start_i as usize..=end_i as usize].iter().sum())
                    }
                    EvalMode::Strict => Ok(v[start_i as usize..=end_i as usize].iter().sum()),
                }
            }
        }
    }
}

#[inline]
fn pop(stack: &mut Vec<f64>) -> f64 {
    stack.pop().unwrap_or(f64::NAN)
}

fn pop_vector<'a>(vstack: &mut Vec<Cow<'a, [f64]>>) -> Cow<'a, [f64]> {
    vstack.pop().unwrap_or(Cow::Borrowed(&[]))
}
