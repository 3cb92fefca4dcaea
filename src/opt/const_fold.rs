//! Constant folding: replaces an arithmetic/compare instruction whose
//! operands are both `constant` immediates with a single folded
//! `constant` (spec.md §2 row "Optimizer passes": "Constant fold").
//!
//! Grounded on cranelift-codegen's constant-folding style (pattern-match
//! producer instructions, compute, `replace_references`) generalized to
//! this spec's opcode set (spec.md §4.2: "Other passes follow the same
//! shape").

use crate::error::Result;
use crate::ir::instructions::{Immediate, InstData, Opcode};
use crate::ir::module::Module;
use crate::ir::Function;
use crate::opt::PassResult;

fn as_int_immediate(func: &Function, inst: crate::ir::Inst) -> Option<(u64, u32)> {
    match func.dfg.data(inst) {
        InstData::Immediate {
            imm: Immediate::Int { bits, width_bits },
            ..
        } => Some((*bits, *width_bits)),
        _ => None,
    }
}

fn mask(width_bits: u32) -> u64 {
    if width_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << width_bits) - 1
    }
}

fn fold_binary(opcode: Opcode, a: u64, b: u64, width_bits: u32) -> Option<u64> {
    let m = mask(width_bits);
    let result = match opcode {
        Opcode::IntAdd => a.wrapping_add(b),
        Opcode::IntSub => a.wrapping_sub(b),
        Opcode::IntMul => a.wrapping_mul(b),
        Opcode::IntAnd => a & b,
        Opcode::IntOr => a | b,
        Opcode::IntXor => a ^ b,
        Opcode::IntShl => a.wrapping_shl(b as u32 & 63),
        Opcode::IntLShr => a.wrapping_shr(b as u32 & 63),
        Opcode::IntUDiv if b != 0 => a / b,
        Opcode::IntURem if b != 0 => a % b,
        _ => return None,
    };
    Some(result & m)
}

pub fn apply(_module: &Module, func: &mut Function) -> Result<PassResult> {
    let mut changed = PassResult::Unchanged;
    let blocks: Vec<_> = func.blocks().collect();
    for block in blocks {
        let insts: Vec<_> = func.block_instructions(block).to_vec();
        for inst in insts {
            let (opcode, ty, lhs, rhs) = match func.dfg.data(inst) {
                InstData::TypedRef2 {
                    opcode, ty, lhs, rhs,
                } => (*opcode, *ty, *lhs, *rhs),
                _ => continue,
            };
            let Some((a, wa)) = as_int_immediate(func, lhs) else {
                continue;
            };
            let Some((b, _)) = as_int_immediate(func, rhs) else {
                continue;
            };
            let Some(folded) = fold_binary(opcode, a, b, wa) else {
                continue;
            };
            let new_const = func.add_instruction(
                block,
                InstData::Immediate {
                    opcode: Opcode::Constant,
                    imm: Immediate::Int {
                        bits: folded,
                        width_bits: wa,
                    },
                },
                Some(ty),
                false,
            )?;
            func.replace_references(new_const, inst)?;
            log::debug!("const_fold: {:?} folded to {folded:#x}", inst);
            changed = PassResult::Changed;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeBundle, TypeCode, TypeEntry};

    #[test]
    fn folds_constant_addition() {
        let module = Module::new();
        let mut func = Function::new();
        let block = func.make_block();
        let mut types = TypeBundle::new();
        let ty = types.push(TypeEntry::new(TypeCode::Int {
            width: crate::types::IntWidth::W32,
        }));
        let lhs = func
            .add_instruction(
                block,
                InstData::Immediate {
                    opcode: Opcode::Constant,
                    imm: Immediate::Int {
                        bits: 2,
                        width_bits: 32,
                    },
                },
                Some(ty),
                false,
            )
            .unwrap();
        let rhs = func
            .add_instruction(
                block,
                InstData::Immediate {
                    opcode: Opcode::Constant,
                    imm: Immediate::Int {
                        bits: 3,
                        width_bits: 32,
                    },
                },
                Some(ty),
                false,
            )
            .unwrap();
        let add = func
            .add_instruction(
                block,
                InstData::TypedRef2 {
                    opcode: Opcode::IntAdd,
                    ty,
                    lhs,
                    rhs,
                },
                Some(ty),
                false,
            )
            .unwrap();
        let user = func
            .add_instruction(
                block,
                InstData::Unary {
                    opcode: Opcode::IntNeg,
                    arg: add,
                },
                Some(ty),
                false,
            )
            .unwrap();

        let result = apply(&module, &mut func).unwrap();
        assert_eq!(result, PassResult::Changed);
        match func.dfg.data(user) {
            InstData::Unary { arg, .. } => {
                let folded = as_int_immediate(&func, *arg).unwrap();
                assert_eq!(folded, (5, 32));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
