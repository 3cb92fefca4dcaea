//! asmcmp operand variants (spec.md §4.4: "Operands are tagged
//! variants: physical register, virtual register, integer immediate
//! (signed/unsigned), label..., RIP-relative, indirect..., segment-
//! prefixed").
//!
//! Grounded on cranelift-codegen's `isa/x64/inst/args.rs` operand-enum
//! shape, narrowed to the variant set spec.md §4.4 names.

use crate::asmcmp::vreg::VReg;

/// A hardware general-purpose or SSE register (spec.md §4.5's fixed
/// SysV register pools, plus callee-saved GP registers the allocator
/// and prologue/epilogue code also need to name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysReg {
    Rax, Rbx, Rcx, Rdx, Rsi, Rdi, Rbp, Rsp,
    R8, R9, R10, R11, R12, R13, R14, R15,
    Xmm(u8),
}

impl PhysReg {
    pub fn is_sse(self) -> bool {
        matches!(self, PhysReg::Xmm(_))
    }

    pub fn is_callee_saved(self) -> bool {
        matches!(
            self,
            PhysReg::Rbx | PhysReg::Rbp | PhysReg::R12 | PhysReg::R13 | PhysReg::R14 | PhysReg::R15
        )
    }
}

/// How an operand-width-tagged memory access should be sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandWidth {
    Byte,
    Word,
    Dword,
    Qword,
    Xmmword,
}

/// The relocation kind a label reference needs (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocationKind {
    None,
    Plt,
    GotPcRel,
    TpOff,
    TlsGd,
    GotTpOff,
}

/// A label: a local asmcmp-defined position, or an external symbol
/// carrying a relocation kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LabelRef {
    Local(crate::asmcmp::context::Label),
    External {
        name: crate::util::strpool::StringId,
        relocation: RelocationKind,
    },
}

/// A segment override prefix (spec.md §4.4 "segment-prefixed";
/// `fs`/`gs` are the only ones the TLS lowering strategies use).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Fs,
    Gs,
}

/// One asmcmp operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Phys(PhysReg),
    Virtual(VReg),
    ImmSigned(i64),
    ImmUnsigned(u64),
    Label(LabelRef),
    RipRelative(LabelRef),
    /// `[base + displacement]`, with an explicit access width.
    Indirect {
        base: Box<Operand>,
        displacement: i64,
        width: OperandWidth,
    },
    Segmented {
        segment: Segment,
        inner: Box<Operand>,
    },
}

impl Operand {
    pub fn indirect(base: Operand, displacement: i64, width: OperandWidth) -> Operand {
        Operand::Indirect {
            base: Box::new(base),
            displacement,
            width,
        }
    }

    pub fn segmented(segment: Segment, inner: Operand) -> Operand {
        Operand::Segmented {
            segment,
            inner: Box::new(inner),
        }
    }

    /// The virtual register this operand names, if it names exactly
    /// one directly (not nested inside an indirect/segmented wrapper).
    pub fn as_vreg(&self) -> Option<VReg> {
        match self {
            Operand::Virtual(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indirect_wraps_its_base_operand() {
        let op = Operand::indirect(Operand::Phys(PhysReg::Rbp), -8, OperandWidth::Qword);
        match op {
            Operand::Indirect { base, displacement, width } => {
                assert_eq!(*base, Operand::Phys(PhysReg::Rbp));
                assert_eq!(displacement, -8);
                assert_eq!(width, OperandWidth::Qword);
            }
            _ => panic!("expected indirect"),
        }
    }

    #[test]
    fn callee_saved_classification_matches_sysv_abi() {
        assert!(PhysReg::Rbx.is_callee_saved());
        assert!(!PhysReg::Rax.is_callee_saved());
        assert!(PhysReg::Xmm(0).is_sse());
    }
}
