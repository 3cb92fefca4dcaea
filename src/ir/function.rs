//! The optimizer IR container proper: basic blocks, their control
//! lists, and phi nodes, layered on top of [`crate::ir::dfg`]'s
//! instruction storage (spec.md §3 "Optimizer IR container", §4.1).
//!
//! Grounded on cranelift-codegen's block/layout split (`ir/layout.rs`)
//! generalized to this spec's block-level "control list" concept, and
//! `original_source/source/optimizer/pipeline/cmp_branch_fuse.c` for the
//! exact `add_control` / `drop_control` / `finalize_*` sequence a pass
//! performs when rewriting a terminator.

use crate::error::{CoreError, ErrorKind, Result};
use crate::ir::condcodes::IntCC;
use crate::ir::dfg::DataFlowGraph;
use crate::ir::entities::{Block, Inst, Phi};
use crate::ir::instructions::InstData;
use crate::types::TypeId;
use cranelift_entity::PrimaryMap;
use std::collections::BTreeMap;

#[derive(Default)]
struct BlockData {
    /// Every instruction textually inserted into this block, in
    /// insertion order (spec.md §5: "IR instruction order within a
    /// block is textual insertion order").
    insts: Vec<Inst>,
    /// The subset of `insts` that participate in execution order
    /// (spec.md §3: "only control instructions participate in
    /// execution order for scheduling"). Insertion order, except the
    /// terminator is always last (spec.md §5).
    control: Vec<Inst>,
}

struct PhiData {
    block: Block,
    dest: Inst,
    sources: BTreeMap<Block, Inst>,
}

/// One IR function: its data-flow graph, block structure, and phi
/// table.
#[derive(Default)]
pub struct Function {
    pub dfg: DataFlowGraph,
    blocks: PrimaryMap<Block, BlockData>,
    phis: PrimaryMap<Phi, PhiData>,
    entry: Option<Block>,
}

impl Function {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData::default());
        if self.entry.is_none() {
            self.entry = Some(block);
        }
        block
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.entry
    }

    /// `is_finalized`: true iff the block's last control instruction is
    /// a terminator.
    pub fn is_finalized(&self, block: Block) -> bool {
        match self.blocks[block].control.last() {
            Some(inst) => self.dfg.data(*inst).opcode().is_terminator(),
            None => false,
        }
    }

    fn require_not_finalized_for_control(&self, block: Block) -> Result<()> {
        if self.is_finalized(block) {
            return Err(CoreError::new(
                ErrorKind::InvalidState,
                "block is already finalized by a terminator",
            ));
        }
        Ok(())
    }

    /// `add_instruction(block, operation, is_control) -> ref`.
    pub fn add_instruction(
        &mut self,
        block: Block,
        data: InstData,
        result_ty: Option<TypeId>,
        is_control: bool,
    ) -> Result<Inst> {
        if is_control {
            self.require_not_finalized_for_control(block)?;
        }
        let inst = self.dfg.make_inst(data, result_ty);
        self.blocks[block].insts.push(inst);
        if is_control {
            self.blocks[block].control.push(inst);
        }
        Ok(inst)
    }

    /// `add_control`: marks an existing, already-present instruction as
    /// part of the control list at its current position.
    pub fn add_control(&mut self, block: Block, inst: Inst) -> Result<()> {
        self.require_not_finalized_for_control(block)?;
        self.blocks[block].control.push(inst);
        Ok(())
    }

    /// `_side_effect_free` variant: allows re-adding the same ref
    /// without the side-effect/finalization check, for passes that are
    /// re-inserting an instruction they already validated.
    pub fn add_control_side_effect_free(&mut self, block: Block, inst: Inst) {
        self.blocks[block].control.push(inst);
    }

    /// `drop_control`: removes `ref` from the control list; the
    /// instruction remains a valid pure producer.
    pub fn drop_control(&mut self, block: Block, inst: Inst) -> Result<()> {
        let control = &mut self.blocks[block].control;
        let pos = control
            .iter()
            .position(|&i| i == inst)
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, "instruction not in control list"))?;
        control.remove(pos);
        Ok(())
    }

    fn finalize(&mut self, block: Block, data: InstData) -> Result<Inst> {
        self.require_not_finalized_for_control(block)?;
        let inst = self.dfg.make_inst(data, None);
        self.blocks[block].insts.push(inst);
        self.blocks[block].control.push(inst);
        Ok(inst)
    }

    pub fn finalize_jump(&mut self, block: Block, target: Block) -> Result<Inst> {
        self.finalize(block, InstData::Jump { target })
    }

    pub fn finalize_indirect(
        &mut self,
        block: Block,
        target: Inst,
        possible_targets: &[Block],
    ) -> Result<Inst> {
        let list = cranelift_entity::EntityList::from_slice(possible_targets, &mut self.dfg.block_pool);
        self.finalize(
            block,
            InstData::IndirectJump {
                target,
                possible_targets: list,
            },
        )
    }

    pub fn finalize_branch(
        &mut self,
        block: Block,
        cond: Inst,
        target: Block,
        fallthrough: Block,
    ) -> Result<Inst> {
        self.finalize(
            block,
            InstData::Branch {
                cond,
                target,
                fallthrough,
            },
        )
    }

    pub fn finalize_compare_branch(
        &mut self,
        block: Block,
        predicate: IntCC,
        lhs: Inst,
        rhs: Inst,
        target: Block,
        fallthrough: Block,
    ) -> Result<Inst> {
        self.finalize(
            block,
            InstData::CompareBranch {
                predicate,
                lhs,
                rhs,
                target,
                fallthrough,
            },
        )
    }

    pub fn finalize_return(&mut self, block: Block, value: Option<Inst>) -> Result<Inst> {
        self.require_not_finalized_for_control(block)?;
        let args: &[Inst] = value.as_slice();
        let list = cranelift_entity::EntityList::from_slice(args, &mut self.dfg.inst_pool);
        let inst = self.dfg.make_inst(
            InstData::RefN {
                opcode: crate::ir::instructions::Opcode::Return,
                args: list,
            },
            None,
        );
        self.blocks[block].insts.push(inst);
        self.blocks[block].control.push(inst);
        Ok(inst)
    }

    /// Fuses an existing call's descriptor straight into a terminator
    /// (spec.md §2 row "tail-call"). The descriptor's argument/callee
    /// use-def edges stay registered against the `call` instruction
    /// this replaces, which [`crate::opt::tail_call`] leaves in place
    /// (orphaned but never deleted) for exactly that reason.
    pub fn finalize_tail_invoke(
        &mut self,
        block: Block,
        desc: crate::ir::entities::CallDescId,
    ) -> Result<Inst> {
        self.finalize(block, InstData::TailInvoke { desc })
    }

    /// Allocates a call descriptor and the `call` instruction that
    /// consumes it, wiring up argument/callee use-def edges in one
    /// step (spec.md §3: "Call instructions reference a call
    /// descriptor").
    pub fn add_call(
        &mut self,
        block: Block,
        callee: crate::ir::dfg::CallTarget,
        args: &[Inst],
        result_ty: Option<TypeId>,
        vararg: bool,
    ) -> Result<Inst> {
        let desc = self.dfg.make_call_desc(callee, args, result_ty, vararg);
        let inst = self.add_instruction(block, InstData::CallRef { desc }, result_ty, true)?;
        self.dfg.register_call_uses(desc, inst);
        Ok(inst)
    }

    /// `replace_references`: delegates to the data-flow graph.
    pub fn replace_references(&mut self, new_ref: Inst, old_ref: Inst) -> Result<()> {
        self.dfg.replace_references(new_ref, old_ref)
    }

    /// Allocates a new phi node in `block`. Sources must be attached
    /// exactly once per predecessor edge before the container is
    /// considered well-formed (spec.md §4.1).
    pub fn make_phi(&mut self, block: Block, result_ty: Option<TypeId>) -> Phi {
        let dest = self.dfg.make_inst(
            InstData::Nullary {
                opcode: crate::ir::instructions::Opcode::GetLocal,
            },
            result_ty,
        );
        self.blocks[block].insts.push(dest);
        self.phis.push(PhiData {
            block,
            dest,
            sources: BTreeMap::new(),
        })
    }

    pub fn phi_dest(&self, phi: Phi) -> Inst {
        self.phis[phi].dest
    }

    /// Attaches the source value for one predecessor edge. Fails if the
    /// edge has already been attached (spec.md §4.1: "exactly once per
    /// predecessor edge").
    pub fn phi_add_source(&mut self, phi: Phi, predecessor: Block, value: Inst) -> Result<()> {
        if self.phis[phi].sources.insert(predecessor, value).is_some() {
            return Err(CoreError::new(
                ErrorKind::AlreadyExists,
                "phi already has a source for this predecessor",
            ));
        }
        Ok(())
    }

    pub fn phi_sources(&self, phi: Phi) -> impl Iterator<Item = (&Block, &Inst)> {
        self.phis[phi].sources.iter()
    }

    /// Checks the well-formedness invariant: every phi in `block` has a
    /// source for every block in `predecessors`, no more and no less
    /// (spec.md §3: "phi source edges are aligned with the block's
    /// predecessor set").
    pub fn phi_sources_aligned(&self, phi: Phi, predecessors: &[Block]) -> bool {
        let sources = &self.phis[phi].sources;
        sources.len() == predecessors.len() && predecessors.iter().all(|p| sources.contains_key(p))
    }

    pub fn block_instructions(&self, block: Block) -> &[Inst] {
        &self.blocks[block].insts
    }

    /// Drops instructions from `block`'s instruction list for which
    /// `keep` returns false. Used by dead-code elimination to forget
    /// pure, unreferenced producers (spec.md §2 row "dead-code
    /// elimination"); the instruction's id itself is never reused, only
    /// the block's record of it is dropped.
    pub fn retain_block_instructions<F: FnMut(Inst) -> bool>(&mut self, block: Block, keep: F) {
        self.blocks[block].insts.retain(keep);
    }

    pub fn control_instructions(&self, block: Block) -> &[Inst] {
        &self.blocks[block].control
    }

    /// Splices `src`'s instruction and control lists onto the end of
    /// `dest`'s, then empties `src` (spec.md §2 row "block merging").
    /// `src`'s own id is never reused; it is simply left with no
    /// instructions, matching the dense-id-never-reused convention
    /// applied to instructions (spec.md §9).
    pub fn merge_blocks(&mut self, dest: Block, src: Block) {
        let mut src_insts = std::mem::take(&mut self.blocks[src].insts);
        let mut src_control = std::mem::take(&mut self.blocks[src].control);
        self.blocks[dest].insts.append(&mut src_insts);
        self.blocks[dest].control.append(&mut src_control);
        for phi in self.phis.values_mut() {
            if phi.block == src {
                phi.block = dest;
            }
            if let Some(value) = phi.sources.remove(&src) {
                phi.sources.insert(dest, value);
            }
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks.keys()
    }

    /// The successor blocks named by `block`'s terminator, if any.
    pub fn successors(&self, block: Block) -> Vec<Block> {
        let Some(&term) = self.blocks[block].control.last() else {
            return Vec::new();
        };
        match self.dfg.data(term) {
            InstData::Jump { target } => vec![*target],
            InstData::Branch {
                target, fallthrough, ..
            } => vec![*target, *fallthrough],
            InstData::CompareBranch {
                target, fallthrough, ..
            } => vec![*target, *fallthrough],
            InstData::IndirectJump {
                possible_targets, ..
            } => possible_targets.as_slice(&self.dfg.block_pool).to_vec(),
            _ => Vec::new(),
        }
    }

    pub fn phis_in_block(&self, block: Block) -> impl Iterator<Item = Phi> + '_ {
        self.phis
            .keys()
            .filter(move |&p| self.phis[p].block == block)
    }
}

// `finalize_return`'s optional value rides the same ref-list path as
// other variadic payloads (`RefN`), a 0-or-1-element slice.
trait OptionInstSlice {
    fn as_slice(&self) -> &[Inst];
}

impl OptionInstSlice for Option<Inst> {
    fn as_slice(&self) -> &[Inst] {
        match self {
            Some(i) => core::slice::from_ref(i),
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::{Immediate, Opcode};

    fn make_const(func: &mut Function, block: Block, v: i64) -> Inst {
        func.add_instruction(
            block,
            InstData::Immediate {
                opcode: Opcode::Constant,
                imm: Immediate::Int {
                    bits: v as u64,
                    width_bits: 32,
                },
            },
            None,
            false,
        )
        .unwrap()
    }

    #[test]
    fn block_is_finalized_only_after_terminator() {
        let mut func = Function::new();
        let b0 = func.make_block();
        let b1 = func.make_block();
        assert!(!func.is_finalized(b0));
        func.finalize_jump(b0, b1).unwrap();
        assert!(func.is_finalized(b0));
    }

    #[test]
    fn cannot_finalize_twice() {
        let mut func = Function::new();
        let b0 = func.make_block();
        let b1 = func.make_block();
        func.finalize_jump(b0, b1).unwrap();
        assert!(func.finalize_jump(b0, b1).is_err());
    }

    #[test]
    fn drop_control_keeps_instruction_as_pure_producer() {
        let mut func = Function::new();
        let b0 = func.make_block();
        let c = make_const(&mut func, b0, 1);
        func.add_control(b0, c).unwrap();
        assert_eq!(func.control_instructions(b0), &[c]);
        func.drop_control(b0, c).unwrap();
        assert!(func.control_instructions(b0).is_empty());
        assert!(func.dfg.is_valid(c));
    }

    #[test]
    fn phi_sources_must_cover_exactly_the_predecessor_set() {
        let mut func = Function::new();
        let pred0 = func.make_block();
        let pred1 = func.make_block();
        let merge = func.make_block();
        let phi = func.make_phi(merge, None);
        let v0 = make_const(&mut func, pred0, 1);
        let v1 = make_const(&mut func, pred1, 2);
        func.phi_add_source(phi, pred0, v0).unwrap();
        assert!(!func.phi_sources_aligned(phi, &[pred0, pred1]));
        func.phi_add_source(phi, pred1, v1).unwrap();
        assert!(func.phi_sources_aligned(phi, &[pred0, pred1]));
        // duplicate attach for the same predecessor is rejected.
        assert!(func.phi_add_source(phi, pred0, v0).is_err());
    }
}
