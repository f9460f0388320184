//! Command emission: linearizes the optimized expression trees into the
//! program's instruction sequences by a post-order walk.

use crate::ast::Expr;
use crate::optimizer::dedup::SubtermDef;
use crate::program::{Instruction, OpCode, Program, SubSequence, OPERAND_STACK};

/// Trees left by the optimizer pipeline, ready for emission.
pub(crate) struct EmitInput {
    pub main: Expr,
    pub subterms: Vec<SubtermDef>,
    pub calc: Vec<Expr>,
}

/// Program-wide metadata computed from the parsed tree before optimization.
#[derive(Clone, Copy, Default)]
pub(crate) struct ProgramMeta {
    pub scalar_arg_count: usize,
    pub vector_arg_count: usize,
    pub has_jump: bool,
    pub has_vector: bool,
    pub has_nested_vector: bool,
}

pub(crate) fn emit(input: &EmitInput, meta: ProgramMeta) -> Program {
    let mut program = Program {
        scalar_arg_count: meta.scalar_arg_count,
        vector_arg_count: meta.vector_arg_count,
        has_jump: meta.has_jump,
        has_vector: meta.has_vector,
        has_nested_vector: meta.has_nested_vector,
        calc_const_count: input.calc.len(),
        ..Program::default()
    };

    // Calculated constants run first at evaluation time; each value is
    // stored into its slot by an explicit store instruction.
    let mut calc_seq = Vec::new();
    for (slot, expr) in input.calc.iter().enumerate() {
        let mut ctx = EmitCtx::new(&mut program);
        ctx.emit_expr(expr);
        calc_seq.extend(ctx.instrs);
        calc_seq.push(Instruction::new(OpCode::StoreCalcConst, slot as u32, 0));
    }
    program.calc_consts = calc_seq;

    // Extracted sequences, already in dependency order: a later sequence
    // may reference an earlier cached result, never the reverse.
    for def in &input.subterms {
        let mut ctx = EmitCtx::new(&mut program);
        ctx.emit_expr(&def.expr);
        let instrs = ctx.instrs;
        program.subterms.push(SubSequence {
            instrs,
            vector_valued: def.vector_valued,
            from_vector_pass: def.from_vector_pass,
        });
    }

    let mut ctx = EmitCtx::new(&mut program);
    ctx.emit_expr(&input.main);
    program.main = ctx.instrs;

    program
}

struct EmitCtx<'a> {
    consts: &'a mut Vec<f64>,
    vector_consts: &'a mut Vec<Vec<f64>>,
    instrs: Vec<Instruction>,
}

impl<'a> EmitCtx<'a> {
    fn new(program: &'a mut Program) -> Self {
        Self {
            consts: &mut program.consts,
            vector_consts: &mut program.vector_consts,
            instrs: Vec::new(),
        }
    }

    fn push(&mut self, op: OpCode, a: u32, b: u32) {
        self.instrs.push(Instruction::new(op, a, b));
    }

    fn push_const(&mut self, value: f64) {
        let idx = self.consts.len() as u32;
        self.consts.push(value);
        self.push(OpCode::PushConst, idx, 0);
    }

    fn emit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Number(v) => self.push_const(*v),
            Expr::ScalarVar(n) => self.push(OpCode::PushScalarArg, *n as u32, 0),
            Expr::VectorVar(n) => self.push(OpCode::PushVectorArg, *n as u32, 0),
            Expr::CalcConst(i) => self.push(OpCode::PushCalcConst, *i as u32, 0),
            Expr::SubtermRef(i) => self.push(OpCode::PushSubterm, *i as u32, 0),
            Expr::VectorRef(i) => self.push(OpCode::PushVectorSubterm, *i as u32, 0),
            Expr::Vector(items) => self.emit_vector(items),
            Expr::Unary { op, expr } => {
                self.emit_expr(expr);
                let opcode = match op {
                    crate::ast::UnaryOp::Neg => OpCode::Neg,
                    crate::ast::UnaryOp::Not => OpCode::Not,
                };
                self.push(opcode, 0, 0);
            }
            Expr::Binary { op, left, right } => {
                self.emit_expr(left);
                self.emit_expr(right);
                self.push(OpCode::from_binary(*op), 0, OPERAND_STACK);
            }
            Expr::Call { func, args } => {
                for arg in args {
                    self.emit_expr(arg);
                }
                self.push(OpCode::CallFunc, func.id(), args.len() as u32);
            }
            Expr::Aggregate { func, vector, args } => {
                self.emit_expr(vector);
                for arg in args {
                    self.emit_expr(arg);
                }
                self.push(OpCode::CallAggregate, func.id(), args.len() as u32);
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                self.emit_expr(cond);
                // Patched below once the branch extents are known.
                let jump_idx = self.instrs.len();
                self.push(OpCode::JumpIfFalse, 0, 0);

                self.emit_expr(then);
                let jump_end_idx = self.instrs.len();
                self.push(OpCode::Jump, 0, 0);

                let else_target = self.instrs.len() as u32;
                self.emit_expr(otherwise);
                let end_target = self.instrs.len() as u32;

                self.instrs[jump_idx] = Instruction::new(OpCode::JumpIfFalse, else_target, 0);
                self.instrs[jump_end_idx] = Instruction::new(OpCode::Jump, end_target, 0);
            }
        }
    }

    fn emit_vector(&mut self, items: &[Expr]) {
        // All-literal vectors live in the vector constant pool; anything
        // else is built element by element, flattening nested vectors.
        if items.iter().all(|i| matches!(i, Expr::Number(_))) {
            let values: Vec<f64> = items
                .iter()
                .map(|i| match i {
                    Expr::Number(v) => *v,
                    _ => unreachable!("checked above"),
                })
                .collect();
            let idx = self.vector_consts.len() as u32;
            self.vector_consts.push(values);
            self.push(OpCode::PushVectorConst, idx, 0);
            return;
        }
        self.push(OpCode::NewVector, 0, 0);
        for item in items {
            self.emit_expr(item);
            if item.is_vector() {
                self.push(OpCode::AppendVector, 0, 0);
            } else {
                self.push(OpCode::AppendScalar, 0, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Func};
    use pretty_assertions::assert_eq;

    fn emit_main(expr: Expr) -> Program {
        emit(
            &EmitInput {
                main: expr,
                subterms: Vec::new(),
                calc: Vec::new(),
            },
            ProgramMeta::default(),
        )
    }

    #[test]
    fn emits_post_order_for_binary_ops() {
        let program = emit_main(Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expr::ScalarVar(0)),
            right: Box::new(Expr::Number(1.5)),
        });
        assert_eq!(
            program.main_sequence_text(),
            "push x0\npush 1.5\nadd"
        );
    }

    #[test]
    fn conditional_emits_patched_jumps() {
        let program = emit_main(Expr::If {
            cond: Box::new(Expr::Binary {
                op: BinaryOp::Lt,
                left: Box::new(Expr::ScalarVar(0)),
                right: Box::new(Expr::Number(4.0)),
            }),
            then: Box::new(Expr::Number(1.0)),
            otherwise: Box::new(Expr::Number(2.0)),
        });
        // cond(3) jumpfalse(1) then(1) jump(1) else(1)
        assert_eq!(
            program.main_sequence_text(),
            "push x0\npush 4\nlt\njumpfalse -> 6\npush 1\njump -> 7\npush 2"
        );
    }

    #[test]
    fn all_literal_vectors_are_pooled() {
        let program = emit_main(Expr::Aggregate {
            func: crate::ast::AggFunc::Mean,
            vector: Box::new(Expr::Vector(vec![
                Expr::Number(2.1),
                Expr::Number(4.8),
            ])),
            args: vec![],
        });
        assert_eq!(program.vector_constant_count(), 1);
        assert_eq!(
            program.main_sequence_text(),
            "pushvec vconst[0]\ncall mean/1"
        );
    }

    #[test]
    fn dynamic_vectors_build_elementwise() {
        let program = emit_main(Expr::Aggregate {
            func: crate::ast::AggFunc::Sum,
            vector: Box::new(Expr::Vector(vec![
                Expr::ScalarVar(0),
                Expr::Vector(vec![Expr::Number(2.0), Expr::Number(3.0)]),
            ])),
            args: vec![],
        });
        assert_eq!(
            program.main_sequence_text(),
            "vec.new\npush x0\nvec.push\npushvec vconst[0]\nvec.extend\ncall sum/1"
        );
    }

    #[test]
    fn calc_const_sequence_ends_each_value_with_a_store() {
        let program = emit(
            &EmitInput {
                main: Expr::CalcConst(0),
                subterms: Vec::new(),
                calc: vec![Expr::Call {
                    func: Func::Exp,
                    args: vec![Expr::Number(1.0)],
                }],
            },
            ProgramMeta::default(),
        );
        assert_eq!(
            program.calculated_constant_texts(),
            vec!["push 1", "call exp/1", "store cconst[0]"]
        );
        assert_eq!(program.main_sequence_text(), "push cconst[0]");
    }
}
