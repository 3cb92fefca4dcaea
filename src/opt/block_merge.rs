//! Block merging: folds a block into its sole predecessor when that
//! predecessor ends in an unconditional `jump` to it and no other
//! block can reach it (spec.md §2 row "block merging").
//!
//! Grounded on cranelift-codegen's block-merge shape (predecessor
//! counting over the whole function, then splice) generalized to this
//! IR's separate control-list/full-instruction-list split.

use crate::error::Result;
use crate::ir::instructions::InstData;
use crate::ir::module::Module;
use crate::ir::{Block, Function};
use crate::opt::PassResult;
use std::collections::HashMap;

fn predecessor_counts(func: &Function) -> HashMap<Block, u32> {
    let mut counts = HashMap::new();
    for block in func.blocks() {
        for succ in func.successors(block) {
            *counts.entry(succ).or_insert(0) += 1;
        }
    }
    counts
}

pub fn apply(_module: &Module, func: &mut Function) -> Result<PassResult> {
    let mut changed = PassResult::Unchanged;
    loop {
        let preds = predecessor_counts(func);
        let mut merged_any = false;
        let blocks: Vec<_> = func.blocks().collect();
        for block in blocks {
            let Some(&term) = func.control_instructions(block).last() else {
                continue;
            };
            let InstData::Jump { target } = *func.dfg.data(term) else {
                continue;
            };
            if target == block {
                continue;
            }
            if preds.get(&target).copied().unwrap_or(0) != 1 {
                continue;
            }
            func.drop_control(block, term)?;
            func.merge_blocks(block, target);
            log::debug!("block_merge: folded {:?} into {:?}", target, block);
            changed = PassResult::Changed;
            merged_any = true;
        }
        if !merged_any {
            break;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::{Immediate, Opcode};

    #[test]
    fn merges_sole_successor_reached_by_unconditional_jump() {
        let module = Module::new();
        let mut func = Function::new();
        let entry = func.make_block();
        let tail = func.make_block();
        func.finalize_jump(entry, tail).unwrap();
        let c = func
            .add_instruction(
                tail,
                InstData::Immediate {
                    opcode: Opcode::Constant,
                    imm: Immediate::Int {
                        bits: 7,
                        width_bits: 32,
                    },
                },
                None,
                false,
            )
            .unwrap();
        func.finalize_return(tail, Some(c)).unwrap();

        let result = apply(&module, &mut func).unwrap();
        assert_eq!(result, PassResult::Changed);
        assert_eq!(func.block_instructions(entry).len(), 2);
        let term = *func.control_instructions(entry).last().unwrap();
        assert!(func.dfg.data(term).opcode().is_terminator());
        assert_eq!(func.dfg.data(term).opcode(), Opcode::Return);
    }

    #[test]
    fn leaves_multi_predecessor_target_alone() {
        let module = Module::new();
        let mut func = Function::new();
        let a = func.make_block();
        let b = func.make_block();
        let merge = func.make_block();
        func.finalize_jump(a, merge).unwrap();
        func.finalize_jump(b, merge).unwrap();
        func.finalize_return(merge, None).unwrap();

        let result = apply(&module, &mut func).unwrap();
        assert_eq!(result, PassResult::Unchanged);
    }
}
