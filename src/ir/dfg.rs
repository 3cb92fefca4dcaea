//! The data-flow side of the optimizer IR container: instruction
//! storage, result types, and use-def edges.
//!
//! Grounded on cranelift-codegen's `ir/dfg.rs` (instruction data stored
//! in one dense `PrimaryMap`, results tracked alongside) and
//! `original_source/source/optimizer/pipeline/cmp_branch_fuse.c`'s
//! replace/drop-control sequence, which is what `replace_references`
//! below exists to support.

use crate::error::{CoreError, ErrorKind, Result};
use crate::ir::entities::{Block, CallDescId, FuncDecl, Inst};
use crate::ir::instructions::InstData;
use crate::types::TypeId;
use cranelift_entity::{EntityList, ListPool, PrimaryMap, SecondaryMap};

/// What a call descriptor invokes: a statically known declaration, or
/// a computed function pointer (spec.md §3: "Call instructions
/// reference a call descriptor").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Direct(FuncDecl),
    Indirect(Inst),
}

/// The callee, argument list, result type, and vararg flag a
/// `call`/`tail_invoke` instruction's descriptor carries. Stored
/// separately from [`InstData`] since a call's argument count is
/// unbounded, unlike every other payload's fixed field shape.
#[derive(Debug, Clone)]
pub struct CallDescData {
    pub callee: CallTarget,
    pub args: EntityList<Inst>,
    pub result_ty: Option<TypeId>,
    pub vararg: bool,
}

/// Collects every [`Inst`] operand referenced by an instruction's
/// payload, for use-def bookkeeping. Block/type/immediate fields are
/// not data-flow edges and are skipped.
fn operand_refs(data: &InstData, pool: &ListPool<Inst>) -> Vec<Inst> {
    match data {
        InstData::RefN { args, .. } => args.as_slice(pool).to_vec(),
        InstData::Branch { cond, .. } => vec![*cond],
        InstData::CompareRef2 { lhs, rhs, .. } => vec![*lhs, *rhs],
        InstData::CompareBranch { lhs, rhs, .. } => vec![*lhs, *rhs],
        InstData::CallRef { .. } => vec![],
        InstData::TailInvoke { .. } => vec![],
        InstData::LoadMem { base, .. } => vec![*base],
        InstData::StoreMem { base, value, .. } => vec![*base, *value],
        InstData::AtomicOp { base, value, .. } => vec![*base, *value],
        InstData::BitintRefN { args, .. } => args.as_slice(pool).to_vec(),
        InstData::Immediate { .. } => vec![],
        InstData::TypedRef2 { lhs, rhs, .. } => vec![*lhs, *rhs],
        InstData::Bitfield { base, value, .. } => {
            let mut v = vec![*base];
            v.extend(*value);
            v
        }
        InstData::OverflowArith { lhs, rhs, .. } => vec![*lhs, *rhs],
        InstData::Jump { .. } => vec![],
        InstData::IndirectJump { target, .. } => vec![*target],
        InstData::StackAlloc { .. } => vec![],
        InstData::Unary { arg, .. } => vec![*arg],
        InstData::Nullary { .. } => vec![],
        InstData::InlineAsm { args, .. } => args.as_slice(pool).to_vec(),
        InstData::SymbolRef { .. } => vec![],
    }
}

/// Rewrites every occurrence of `old` to `new` inside one instruction's
/// payload.
fn rewrite_refs(data: &mut InstData, pool: &mut ListPool<Inst>, old: Inst, new: Inst) {
    let sub = |r: &mut Inst| {
        if *r == old {
            *r = new;
        }
    };
    match data {
        InstData::RefN { args, .. } | InstData::BitintRefN { args, .. } => {
            for r in args.as_mut_slice(pool) {
                sub(r);
            }
        }
        InstData::Branch { cond, .. } => sub(cond),
        InstData::CompareRef2 { lhs, rhs, .. } => {
            sub(lhs);
            sub(rhs);
        }
        InstData::CompareBranch { lhs, rhs, .. } => {
            sub(lhs);
            sub(rhs);
        }
        InstData::LoadMem { base, .. } => sub(base),
        InstData::StoreMem { base, value, .. } => {
            sub(base);
            sub(value);
        }
        InstData::AtomicOp { base, value, .. } => {
            sub(base);
            sub(value);
        }
        InstData::TypedRef2 { lhs, rhs, .. } => {
            sub(lhs);
            sub(rhs);
        }
        InstData::Bitfield { base, value, .. } => {
            sub(base);
            if let Some(v) = value {
                sub(v);
            }
        }
        InstData::OverflowArith { lhs, rhs, .. } => {
            sub(lhs);
            sub(rhs);
        }
        InstData::IndirectJump { target, .. } => sub(target),
        InstData::Unary { arg, .. } => sub(arg),
        InstData::InlineAsm { args, .. } => {
            for r in args.as_mut_slice(pool) {
                sub(r);
            }
        }
        InstData::CallRef { .. }
        | InstData::TailInvoke { .. }
        | InstData::Immediate { .. }
        | InstData::Jump { .. }
        | InstData::StackAlloc { .. }
        | InstData::Nullary { .. }
        | InstData::SymbolRef { .. } => {}
    }
}

/// The data-flow graph: dense instruction storage plus incrementally
/// maintained use-def edges (spec.md §3 invariant: "Use-def edges are
/// maintained incrementally: when a producer is replaced, all uses
/// update atomically").
#[derive(Default)]
pub struct DataFlowGraph {
    insts: PrimaryMap<Inst, InstData>,
    result_ty: SecondaryMap<Inst, Option<TypeId>>,
    /// Users of each instruction, kept in sync by `make_inst` and
    /// `replace_references`.
    uses: SecondaryMap<Inst, Vec<Inst>>,
    /// Forwarding target for replaced instructions; `Some` means the
    /// original id is dead and every reference to it must have been
    /// rewritten already.
    forwarded: SecondaryMap<Inst, Option<Inst>>,
    call_descs: PrimaryMap<CallDescId, CallDescData>,
    pub(crate) inst_pool: ListPool<Inst>,
    pub(crate) block_pool: ListPool<Block>,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new instruction, recording use-def edges for every
    /// `Inst` operand in its payload.
    pub fn make_inst(&mut self, data: InstData, result_ty: Option<TypeId>) -> Inst {
        let refs = operand_refs(&data, &self.inst_pool);
        let inst = self.insts.push(data);
        self.result_ty[inst] = result_ty;
        for user_of in refs {
            self.uses[user_of].push(inst);
        }
        inst
    }

    pub fn data(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    pub fn data_mut(&mut self, inst: Inst) -> &mut InstData {
        &mut self.insts[inst]
    }

    pub fn result_type(&self, inst: Inst) -> Option<TypeId> {
        self.result_ty[inst]
    }

    pub fn is_valid(&self, inst: Inst) -> bool {
        use cranelift_entity::EntityRef;
        inst.index() < self.insts.len()
    }

    pub fn is_forwarded(&self, inst: Inst) -> bool {
        self.forwarded[inst].is_some()
    }

    /// Resolves an instruction id through any forwarding chain to the
    /// live id it was ultimately replaced by.
    pub fn resolve(&self, mut inst: Inst) -> Inst {
        while let Some(target) = self.forwarded[inst] {
            inst = target;
        }
        inst
    }

    pub fn users(&self, inst: Inst) -> &[Inst] {
        &self.uses[inst]
    }

    /// Allocates a call descriptor. Argument/callee use-def edges are
    /// not recorded here: the consuming `call`/`tail_invoke`
    /// instruction doesn't exist yet, so callers must follow up with
    /// [`Self::register_call_uses`] once it does.
    pub fn make_call_desc(
        &mut self,
        callee: CallTarget,
        args: &[Inst],
        result_ty: Option<TypeId>,
        vararg: bool,
    ) -> CallDescId {
        let list = EntityList::from_slice(args, &mut self.inst_pool);
        self.call_descs.push(CallDescData {
            callee,
            args: list,
            result_ty,
            vararg,
        })
    }

    pub fn call_desc(&self, id: CallDescId) -> &CallDescData {
        &self.call_descs[id]
    }

    pub fn call_desc_args(&self, id: CallDescId) -> &[Inst] {
        self.call_descs[id].args.as_slice(&self.inst_pool)
    }

    /// Records `consumer` (the `call`/`tail_invoke` instruction built
    /// from `desc`) as a user of every argument and, if indirect, the
    /// callee pointer — the use-def edges [`operand_refs`] can't see
    /// since a call's payload only carries the descriptor id.
    pub fn register_call_uses(&mut self, desc: CallDescId, consumer: Inst) {
        let args = self.call_descs[desc].args.as_slice(&self.inst_pool).to_vec();
        for arg in args {
            self.uses[arg].push(consumer);
        }
        if let CallTarget::Indirect(target) = self.call_descs[desc].callee {
            self.uses[target].push(consumer);
        }
    }

    /// `replace_references`: every use of `old_ref` is rewritten to
    /// `new_ref` and the use-set is updated. Idempotent when `old_ref`
    /// has no users (spec.md §4.1).
    pub fn replace_references(&mut self, new_ref: Inst, old_ref: Inst) -> Result<()> {
        if !self.is_valid(new_ref) {
            return Err(CoreError::new(
                ErrorKind::InvalidParameter,
                "replacement instruction does not exist",
            ));
        }
        let users = core::mem::take(&mut self.uses[old_ref]);
        for user in &users {
            rewrite_refs(&mut self.insts[*user], &mut self.inst_pool, old_ref, new_ref);
            self.uses[new_ref].push(*user);
        }
        self.forwarded[old_ref] = Some(new_ref);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::{Immediate, InstData, Opcode};

    #[test]
    fn replace_references_rewrites_all_users_and_is_idempotent() {
        let mut dfg = DataFlowGraph::new();
        let a = dfg.make_inst(
            InstData::Immediate {
                opcode: Opcode::Constant,
                imm: Immediate::Int {
                    bits: 1,
                    width_bits: 32,
                },
            },
            None,
        );
        let b = dfg.make_inst(
            InstData::Unary {
                opcode: Opcode::IntNeg,
                arg: a,
            },
            None,
        );
        let c = dfg.make_inst(
            InstData::Immediate {
                opcode: Opcode::Constant,
                imm: Immediate::Int {
                    bits: 2,
                    width_bits: 32,
                },
            },
            None,
        );
        dfg.replace_references(c, a).unwrap();
        match dfg.data(b) {
            InstData::Unary { arg, .. } => assert_eq!(*arg, c),
            _ => panic!("wrong payload"),
        }
        assert!(dfg.is_forwarded(a));
        // idempotent: no users left on `a`, so calling again is a no-op.
        dfg.replace_references(c, a).unwrap();
    }

    #[test]
    fn uses_are_recorded_on_construction() {
        let mut dfg = DataFlowGraph::new();
        let a = dfg.make_inst(
            InstData::Immediate {
                opcode: Opcode::Constant,
                imm: Immediate::Int {
                    bits: 1,
                    width_bits: 32,
                },
            },
            None,
        );
        let b = dfg.make_inst(
            InstData::Unary {
                opcode: Opcode::IntNeg,
                arg: a,
            },
            None,
        );
        assert_eq!(dfg.users(a), &[b]);
    }
}
