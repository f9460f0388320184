//! Stack-push minimization over emitted command sequences.
//!
//! A push-constant or push-scalar-argument instruction immediately followed
//! by a binary instruction supplies that instruction's right operand on the
//! stack top. Such pairs fuse into a single binary instruction with an
//! immediate right operand, removing one push and one pop without changing
//! evaluation order or the numeric result.
//!
//! Fusion is skipped when the binary instruction is a jump target: the
//! jumping path expects both operands on the stack. Jump targets that land
//! on a removed push are remapped onto the fused instruction, which performs
//! the same work.

use crate::program::{
    Instruction, OpCode, Program, OPERAND_CONST, OPERAND_SCALAR_ARG, OPERAND_STACK,
};

pub fn optimize_program(program: &mut Program) {
    program.main = optimize_sequence(std::mem::take(&mut program.main));
    program.calc_consts = optimize_sequence(std::mem::take(&mut program.calc_consts));
    for sub in &mut program.subterms {
        sub.instrs = optimize_sequence(std::mem::take(&mut sub.instrs));
    }
}

pub(crate) fn optimize_sequence(instrs: Vec<Instruction>) -> Vec<Instruction> {
    let mut jump_targets = vec![false; instrs.len() + 1];
    for instr in &instrs {
        if matches!(instr.op(), OpCode::Jump | OpCode::JumpIfFalse) {
            jump_targets[instr.a() as usize] = true;
        }
    }

    let mut out = Vec::with_capacity(instrs.len());
    // Old index -> new index, with one extra entry for the end-of-sequence
    // target of a conditional whose else branch is the final instruction.
    let mut index_map = vec![0u32; instrs.len() + 1];
    let mut i = 0;
    while i < instrs.len() {
        let instr = instrs[i];
        let fused = fusible_operand(instr).and_then(|mode| {
            let next = instrs.get(i + 1)?;
            if next.op().is_binary() && next.b() == OPERAND_STACK && !jump_targets[i + 1] {
                Some(Instruction::new(next.op(), instr.a(), mode))
            } else {
                None
            }
        });
        match fused {
            Some(f) => {
                index_map[i] = out.len() as u32;
                index_map[i + 1] = out.len() as u32;
                out.push(f);
                i += 2;
            }
            None => {
                index_map[i] = out.len() as u32;
                out.push(instr);
                i += 1;
            }
        }
    }
    index_map[instrs.len()] = out.len() as u32;

    for instr in &mut out {
        if matches!(instr.op(), OpCode::Jump | OpCode::JumpIfFalse) {
            let target = index_map[instr.a() as usize];
            *instr = Instruction::new(instr.op(), target, instr.b());
        }
    }
    out
}

fn fusible_operand(instr: Instruction) -> Option<u32> {
    match instr.op() {
        OpCode::PushConst => Some(OPERAND_CONST),
        OpCode::PushScalarArg => Some(OPERAND_SCALAR_ARG),
        _ => None,
    }
}
