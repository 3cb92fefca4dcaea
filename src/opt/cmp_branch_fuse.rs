//! Compare/branch fusion: the exemplary pass in spec.md §4.2.
//!
//! For each block whose terminator is `branch(cond, target, fallthrough)`,
//! if `cond` is a supported compare (or a `bool_not` wrapping one, up to
//! two levels, which inverts the predicate), rewrite the terminator to a
//! single `compare_branch(predicate, lhs, rhs, target, fallthrough)`.
//!
//! Grounded, near-verbatim control flow, on
//! `original_source/source/optimizer/pipeline/cmp_branch_fuse.c`.

use crate::error::Result;
use crate::ir::condcodes::IntCC;
use crate::ir::instructions::{InstData, Opcode};
use crate::ir::module::Module;
use crate::ir::{Function, Inst};
use crate::opt::PassResult;

const MAX_BOOL_NOT_DEPTH: u32 = 2;

/// Walks through up to [`MAX_BOOL_NOT_DEPTH`] `bool_not` wrappers to
/// find the underlying compare, inverting the predicate once per level.
fn resolve_predicate(func: &Function, inst: Inst, depth: u32) -> Option<(IntCC, Inst, Inst)> {
    match func.dfg.data(inst) {
        InstData::CompareRef2 { opcode, lhs, rhs } => opcode.as_int_cc().map(|cc| (cc, *lhs, *rhs)),
        InstData::Unary {
            opcode: Opcode::BoolNot,
            arg,
        } if depth < MAX_BOOL_NOT_DEPTH => {
            resolve_predicate(func, *arg, depth + 1).map(|(cc, l, r)| (cc.inverse(), l, r))
        }
        _ => None,
    }
}

pub fn apply(_module: &Module, func: &mut Function) -> Result<PassResult> {
    let mut changed = PassResult::Unchanged;
    let blocks: Vec<_> = func.blocks().collect();
    for block in blocks {
        let Some(&term) = func.control_instructions(block).last() else {
            continue;
        };
        let (cond, target, fallthrough) = match func.dfg.data(term) {
            InstData::Branch {
                cond,
                target,
                fallthrough,
            } => (*cond, *target, *fallthrough),
            _ => continue,
        };
        let Some((predicate, lhs, rhs)) = resolve_predicate(func, cond, 0) else {
            continue;
        };
        func.drop_control(block, term)?;
        func.finalize_compare_branch(block, predicate, lhs, rhs, target, fallthrough)?;
        log::debug!(
            "cmp_branch_fuse: block {:?} fused branch into compare_branch({predicate})",
            block
        );
        changed = PassResult::Changed;
    }
    Ok(changed)
}
