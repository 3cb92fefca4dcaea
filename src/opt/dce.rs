//! Dead-code elimination: drops pure instructions with no users and no
//! control-flow role (spec.md §2 row "dead-code elimination").
//!
//! A pure instruction only matters through its users (spec.md §3:
//! "pure instructions are freely re-orderable subject to data
//! dependencies"); once nothing references it and it never entered the
//! control list, it contributes nothing to codegen's reverse-postorder
//! walk (spec.md §4.3 item 2, which dispatches per control instruction
//! and lazily binds operands).
//!
//! Grounded on cranelift-codegen's `dce.rs` shape (iterate instructions,
//! drop the ones with an empty use-set) adapted to this IR's separate
//! control-list/side-effect distinction rather than cranelift's
//! `has_side_effect` helper.

use crate::error::Result;
use crate::ir::module::Module;
use crate::ir::Function;
use crate::opt::PassResult;
use std::collections::HashSet;

pub fn apply(_module: &Module, func: &mut Function) -> Result<PassResult> {
    let mut changed = PassResult::Unchanged;
    let blocks: Vec<_> = func.blocks().collect();
    for block in blocks {
        let control: HashSet<_> = func.control_instructions(block).iter().copied().collect();
        let mut dead = Vec::new();
        for &inst in func.block_instructions(block) {
            if control.contains(&inst) {
                continue;
            }
            if func.dfg.data(inst).opcode().has_side_effects() {
                continue;
            }
            if func.dfg.users(inst).is_empty() {
                dead.push(inst);
            }
        }
        if dead.is_empty() {
            continue;
        }
        let dead_set: HashSet<_> = dead.into_iter().collect();
        func.retain_block_instructions(block, |i| !dead_set.contains(&i));
        log::debug!(
            "dce: block {:?} removed {} dead instruction(s)",
            block,
            dead_set.len()
        );
        changed = PassResult::Changed;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::{Immediate, InstData, Opcode};

    #[test]
    fn drops_unused_pure_constant() {
        let module = Module::new();
        let mut func = Function::new();
        let block = func.make_block();
        let dead = func
            .add_instruction(
                block,
                InstData::Immediate {
                    opcode: Opcode::Constant,
                    imm: Immediate::Int {
                        bits: 1,
                        width_bits: 32,
                    },
                },
                None,
                false,
            )
            .unwrap();
        assert_eq!(func.block_instructions(block).len(), 1);
        let result = apply(&module, &mut func).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert!(func.block_instructions(block).is_empty());
        // the id itself is still a valid (but orphaned) dfg entry.
        assert!(func.dfg.is_valid(dead));
    }

    #[test]
    fn keeps_instructions_with_users() {
        let module = Module::new();
        let mut func = Function::new();
        let block = func.make_block();
        let a = func
            .add_instruction(
                block,
                InstData::Immediate {
                    opcode: Opcode::Constant,
                    imm: Immediate::Int {
                        bits: 1,
                        width_bits: 32,
                    },
                },
                None,
                false,
            )
            .unwrap();
        func.add_instruction(
            block,
            InstData::Unary {
                opcode: Opcode::IntNeg,
                arg: a,
            },
            None,
            false,
        )
        .unwrap();
        let result = apply(&module, &mut func).unwrap();
        assert_eq!(result, PassResult::Unchanged);
        assert_eq!(func.block_instructions(block).len(), 2);
    }
}
