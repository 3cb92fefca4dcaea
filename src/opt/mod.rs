//! The optimization pipeline: pass-per-function transforms operating on
//! the optimizer IR container (spec.md §1.2, §4.2).
//!
//! Grounded on spec.md §4.2's pass-signature description ("`apply(module,
//! function, pass) -> result`... iterates blocks and instructions,
//! reading use-def edges and emitting replacements through the
//! builder") and cranelift-codegen's per-pass-module layout (`dce.rs`
//! being one pass per file, invoked from a fixed pipeline).

pub mod block_merge;
pub mod cmp_branch_fuse;
pub mod const_fold;
pub mod dce;
pub mod mem2reg;
pub mod tail_call;

use crate::error::Result;
use crate::ir::module::Module;
use crate::ir::Function;

/// Whether a pass changed the function it ran over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassResult {
    Changed,
    Unchanged,
}

/// Identifies one of the independently selectable passes (spec.md
/// §4.2: "Other passes follow the same shape; each is independently
/// selectable").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    ConstFold,
    CmpBranchFuse,
    Mem2Reg,
    Dce,
    BlockMerge,
    TailCall,
}

impl PassId {
    pub fn name(self) -> &'static str {
        match self {
            PassId::ConstFold => "const_fold",
            PassId::CmpBranchFuse => "cmp_branch_fuse",
            PassId::Mem2Reg => "mem_to_reg",
            PassId::Dce => "dead_code_elimination",
            PassId::BlockMerge => "block_merge",
            PassId::TailCall => "tail_call",
        }
    }

    /// `apply(module, function, pass) -> result` (spec.md §4.2).
    pub fn apply(self, module: &Module, func: &mut Function) -> Result<PassResult> {
        match self {
            PassId::ConstFold => const_fold::apply(module, func),
            PassId::CmpBranchFuse => cmp_branch_fuse::apply(module, func),
            PassId::Mem2Reg => mem2reg::apply(module, func),
            PassId::Dce => dce::apply(module, func),
            PassId::BlockMerge => block_merge::apply(module, func),
            PassId::TailCall => tail_call::apply(module, func),
        }
    }
}

/// The pass set selected by an optimization level (spec.md §A.3 in
/// SPEC_FULL.md: "`optimization_level` selects a `Vec<PassId>`
/// pipeline").
pub fn pipeline_for_level(level: u8) -> Vec<PassId> {
    match level {
        0 => Vec::new(),
        1 => vec![PassId::CmpBranchFuse, PassId::Dce],
        _ => vec![
            PassId::ConstFold,
            PassId::CmpBranchFuse,
            PassId::Mem2Reg,
            PassId::Dce,
            PassId::BlockMerge,
            PassId::TailCall,
        ],
    }
}

/// Runs a pass pipeline over one function, in the fixed order supplied
/// by the caller (spec.md §5: "Pass pipeline runs passes in the fixed
/// order the caller supplied").
pub fn run_pipeline(passes: &[PassId], module: &Module, func: &mut Function) -> Result<()> {
    for pass in passes {
        let result = pass.apply(module, func)?;
        match result {
            PassResult::Changed => log::debug!("pass {} made progress", pass.name()),
            PassResult::Unchanged => log::trace!("pass {} made no progress", pass.name()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_zero_runs_no_passes() {
        assert!(pipeline_for_level(0).is_empty());
    }

    #[test]
    fn higher_levels_are_supersets_in_spirit() {
        assert!(pipeline_for_level(2).len() > pipeline_for_level(1).len());
    }
}
