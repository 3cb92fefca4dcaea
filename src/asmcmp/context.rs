//! The asmcmp instruction stream: indexed instructions, a label table,
//! and a register-stash table (spec.md §4.4).
//!
//! Grounded on cranelift-codegen's `MachBuffer` (a flat, indexable
//! instruction stream with a label-resolution pass) generalized to
//! this crate's textual (not binary) emission target.

use crate::asmcmp::operand::{Operand, PhysReg};
use crate::asmcmp::vreg::VReg;
use cranelift_entity::{entity_impl, PrimaryMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);
entity_impl!(Label, "L");

/// An asmcmp mnemonic: a near-machine operation, not yet an x86-64
/// encoding — `codegen::lower` emits these, `codegen::xasmgen` prints
/// them (spec.md §4.3 step 6).
#[derive(Debug, Clone, PartialEq)]
pub enum AsmOp {
    Mov,
    MovZx,
    MovSx,
    MovImm,
    Movabs,
    Lea,
    Add,
    Sub,
    /// Add-with-carry: folds the prior limb's carry flag in, for
    /// multi-limb bit-precise arithmetic chains.
    Adc,
    /// Subtract-with-borrow: `Sbb`'s borrow counterpart to `Adc`.
    Sbb,
    IMul,
    IDiv,
    Neg,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Sar,
    Cmp,
    Test,
    SetCc(crate::ir::condcodes::IntCC),
    /// `seto`: sets a byte operand to 1 iff the preceding arithmetic
    /// instruction set the overflow flag (spec.md §3 payload variant
    /// `overflow_arith`; §8.6 "overflow builtins").
    SetO,
    Jmp,
    JmpIndirect,
    Jcc(crate::ir::condcodes::IntCC),
    Call,
    Ret,
    Push,
    Pop,
    Movss,
    Movsd,
    Addss,
    Addsd,
    Subss,
    Subsd,
    Mulss,
    Mulsd,
    Divss,
    Divsd,
    Ucomiss,
    Ucomisd,
    Cvtsi2sd,
    Cvtsi2ss,
    Cvttsd2si,
    Cvttss2si,
    LockPrefixedXadd,
    LockCmpxchg,
    Mfence,
    Nop,
    /// An emitted label definition (not an instruction proper).
    LabelDef(Label),
}

/// One asmcmp instruction: an operation plus its operands, in the
/// order the xasmgen backend should print them.
#[derive(Debug, Clone)]
pub struct AsmInst {
    pub op: AsmOp,
    pub operands: Vec<Operand>,
    /// When set, this instruction is protected by the named stash:
    /// its operands must avoid the stash's physical registers
    /// (spec.md §4.4 item (b)).
    pub stash: Option<StashId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StashId(u32);
entity_impl!(StashId, "stash");

#[derive(Debug, Clone)]
pub struct StashData {
    pub regs: Vec<PhysReg>,
    /// The asmcmp position (index into the instruction stream) of the
    /// call this stash protects, once known.
    pub call_position: Option<usize>,
}

/// The full asmcmp stream for one function.
#[derive(Debug, Default)]
pub struct AsmContext {
    insts: Vec<AsmInst>,
    labels: PrimaryMap<Label, Option<usize>>,
    stashes: PrimaryMap<StashId, StashData>,
}

impl AsmContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_label(&mut self) -> Label {
        self.labels.push(None)
    }

    /// Binds `label` to the current end of the instruction stream and
    /// emits its definition marker.
    pub fn define_label(&mut self, label: Label) {
        self.labels[label] = Some(self.insts.len());
        self.push(AsmOp::LabelDef(label), Vec::new());
    }

    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.labels[label]
    }

    pub fn push(&mut self, op: AsmOp, operands: Vec<Operand>) -> usize {
        let pos = self.insts.len();
        self.insts.push(AsmInst {
            op,
            operands,
            stash: None,
        });
        pos
    }

    pub fn push_stashed(&mut self, op: AsmOp, operands: Vec<Operand>, stash: StashId) -> usize {
        let pos = self.push(op, operands);
        self.insts[pos].stash = Some(stash);
        pos
    }

    /// Declares a new register stash (spec.md §4.4: "a group of
    /// physical regs to preserve across a call").
    pub fn make_stash(&mut self, regs: Vec<PhysReg>) -> StashId {
        self.stashes.push(StashData {
            regs,
            call_position: None,
        })
    }

    pub fn set_stash_call_position(&mut self, stash: StashId, position: usize) {
        self.stashes[stash].call_position = Some(position);
    }

    pub fn stash(&self, id: StashId) -> &StashData {
        &self.stashes[id]
    }

    pub fn stashes(&self) -> impl Iterator<Item = StashId> + '_ {
        self.stashes.keys()
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &AsmInst)> {
        self.insts.iter().enumerate()
    }

    pub fn get(&self, pos: usize) -> &AsmInst {
        &self.insts[pos]
    }

    /// Every virtual register an instruction's operands reference,
    /// used by liveness construction.
    pub fn operand_vregs(&self, pos: usize) -> Vec<VReg> {
        fn collect(op: &Operand, out: &mut Vec<VReg>) {
            match op {
                Operand::Virtual(v) => out.push(*v),
                Operand::Indirect { base, .. } => collect(base, out),
                Operand::Segmented { inner, .. } => collect(inner, out),
                _ => {}
            }
        }
        let mut out = Vec::new();
        for op in &self.insts[pos].operands {
            collect(op, &mut out);
        }
        out
    }

    /// Rewrites every `Operand::Virtual` in the stream through
    /// `resolve`, looking through `Indirect`/`Segmented` wrappers
    /// (spec.md §4.4: once the register allocator has produced an
    /// [`crate::asmcmp::Assignment`] per vreg, the stream's virtual
    /// registers are replaced by the concrete physical register or
    /// frame-relative spill operand it materializes to).
    pub fn resolve_vregs<F: Fn(VReg) -> Operand>(&mut self, resolve: F) {
        fn rewrite(op: &mut Operand, resolve: &impl Fn(VReg) -> Operand) {
            match op {
                Operand::Virtual(v) => *op = resolve(*v),
                Operand::Indirect { base, .. } => rewrite(base, resolve),
                Operand::Segmented { inner, .. } => rewrite(inner, resolve),
                _ => {}
            }
        }
        for inst in &mut self.insts {
            for operand in &mut inst.operands {
                rewrite(operand, &resolve);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_position_is_unknown_until_defined() {
        let mut ctx = AsmContext::new();
        let l = ctx.make_label();
        assert!(ctx.label_position(l).is_none());
        ctx.push(AsmOp::Nop, vec![]);
        ctx.define_label(l);
        assert_eq!(ctx.label_position(l), Some(1));
    }

    #[test]
    fn operand_vregs_looks_through_indirect_wrapping() {
        let mut ctx = AsmContext::new();
        let mut vregs = crate::asmcmp::vreg::VRegTable::new();
        let v = vregs.make(crate::asmcmp::vreg::VRegClass::GeneralPurpose);
        let pos = ctx.push(
            AsmOp::Mov,
            vec![Operand::indirect(
                Operand::Virtual(v),
                -8,
                crate::asmcmp::operand::OperandWidth::Qword,
            )],
        );
        assert_eq!(ctx.operand_vregs(pos), vec![v]);
    }

    #[test]
    fn resolve_vregs_rewrites_through_indirect_wrapping() {
        let mut ctx = AsmContext::new();
        let mut vregs = crate::asmcmp::vreg::VRegTable::new();
        let v = vregs.make(crate::asmcmp::vreg::VRegClass::GeneralPurpose);
        ctx.push(AsmOp::Mov, vec![Operand::Virtual(v)]);
        let pos = ctx.push(
            AsmOp::Mov,
            vec![Operand::indirect(
                Operand::Virtual(v),
                -8,
                crate::asmcmp::operand::OperandWidth::Qword,
            )],
        );
        ctx.resolve_vregs(|resolved| {
            assert_eq!(resolved, v);
            Operand::Phys(crate::asmcmp::operand::PhysReg::Rax)
        });
        assert_eq!(ctx.get(0).operands[0], Operand::Phys(crate::asmcmp::operand::PhysReg::Rax));
        match &ctx.get(pos).operands[0] {
            Operand::Indirect { base, .. } => {
                assert_eq!(**base, Operand::Phys(crate::asmcmp::operand::PhysReg::Rax))
            }
            _ => panic!("expected indirect"),
        }
    }
}
