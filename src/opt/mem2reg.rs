//! Scalar replacement / mem-to-reg: forwards a `store_mem` to a
//! `stack_alloc` slot directly into the `load_mem`s it reaches, letting
//! DCE drop the slot's memory traffic entirely when every use was
//! forwarded (spec.md §2 row "scalar replacement"; §1.2 lists the same
//! transform as "mem-to-reg").
//!
//! Single-block forwarding only: a load is rewritten when the nearest
//! preceding store to the same `stack_alloc` is in the same block. A
//! full implementation would run this over dominator-tree order with
//! phi insertion at merge points (spec.md §9's dominance invariant);
//! this pass intentionally stays local and lets a subsequent run (or
//! the phi nodes the front-end already emits at merges) pick up the
//! rest, matching spec.md §4.2's "each is independently selectable"
//! pass model rather than a single all-at-once SSA construction.
//!
//! Grounded on cranelift-codegen's `dce.rs`-adjacent pass shape and
//! spec.md §4.1's `replace_references` contract.

use crate::error::Result;
use crate::ir::instructions::InstData;
use crate::ir::module::Module;
use crate::ir::{Function, Inst};
use crate::opt::PassResult;
use std::collections::HashMap;

pub fn apply(_module: &Module, func: &mut Function) -> Result<PassResult> {
    let mut changed = PassResult::Unchanged;
    let blocks: Vec<_> = func.blocks().collect();
    for block in blocks {
        let mut last_store: HashMap<Inst, Inst> = HashMap::new();
        let insts: Vec<_> = func.block_instructions(block).to_vec();
        for inst in insts {
            match func.dfg.data(inst).clone() {
                InstData::StoreMem {
                    base,
                    member_index: None,
                    value,
                    ..
                } => {
                    last_store.insert(base, value);
                }
                InstData::LoadMem {
                    base,
                    member_index: None,
                    ..
                } => {
                    if let Some(&value) = last_store.get(&base) {
                        func.replace_references(value, inst)?;
                        log::debug!("mem2reg: forwarded store to load {:?}", inst);
                        changed = PassResult::Changed;
                    }
                }
                _ => {}
            }
        }
    }
    Ok(changed)
}
