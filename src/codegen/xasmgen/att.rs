//! AT&T-syntax emission: `%`-prefixed registers, `$`-prefixed
//! immediates, source-before-destination operand order, and a size
//! suffix on otherwise-ambiguous mnemonics (spec.md §4.6: "AT&T
//! (`movq $10, %rax`)").

use crate::asmcmp::{AsmOp, LabelRef, Operand, Segment};
use crate::codegen::xasmgen::operand_fmt::{format_displacement, register_name};
use crate::codegen::xasmgen::Dialect;
use crate::ir::condcodes::IntCC;

pub struct Att;

fn cc_suffix(cc: IntCC) -> &'static str {
    match cc {
        IntCC::Equals => "e",
        IntCC::NotEquals => "ne",
        IntCC::Greater => "g",
        IntCC::GreaterOrEquals => "ge",
        IntCC::Lesser => "l",
        IntCC::LesserOrEquals => "le",
        IntCC::Above => "a",
        IntCC::AboveOrEquals => "ae",
        IntCC::Below => "b",
        IntCC::BelowOrEquals => "be",
    }
}

impl Dialect for Att {
    fn mnemonic(&self, op: &AsmOp) -> String {
        match op {
            AsmOp::Mov => "mov".into(),
            AsmOp::MovZx => "movzx".into(),
            AsmOp::MovSx => "movsx".into(),
            AsmOp::MovImm => "mov".into(),
            AsmOp::Movabs => "movabs".into(),
            AsmOp::Lea => "lea".into(),
            AsmOp::Add => "add".into(),
            AsmOp::Sub => "sub".into(),
            AsmOp::Adc => "adc".into(),
            AsmOp::Sbb => "sbb".into(),
            AsmOp::IMul => "imul".into(),
            AsmOp::IDiv => "idiv".into(),
            AsmOp::Neg => "neg".into(),
            AsmOp::And => "and".into(),
            AsmOp::Or => "or".into(),
            AsmOp::Xor => "xor".into(),
            AsmOp::Not => "not".into(),
            AsmOp::Shl => "shl".into(),
            AsmOp::Shr => "shr".into(),
            AsmOp::Sar => "sar".into(),
            AsmOp::Cmp => "cmp".into(),
            AsmOp::Test => "test".into(),
            AsmOp::SetCc(cc) => format!("set{}", cc_suffix(*cc)),
            AsmOp::SetO => "seto".into(),
            AsmOp::Jmp => "jmp".into(),
            AsmOp::JmpIndirect => "jmp".into(),
            AsmOp::Jcc(cc) => format!("j{}", cc_suffix(*cc)),
            AsmOp::Call => "call".into(),
            AsmOp::Ret => "ret".into(),
            AsmOp::Push => "push".into(),
            AsmOp::Pop => "pop".into(),
            AsmOp::Movss => "movss".into(),
            AsmOp::Movsd => "movsd".into(),
            AsmOp::Addss => "addss".into(),
            AsmOp::Addsd => "addsd".into(),
            AsmOp::Subss => "subss".into(),
            AsmOp::Subsd => "subsd".into(),
            AsmOp::Mulss => "mulss".into(),
            AsmOp::Mulsd => "mulsd".into(),
            AsmOp::Divss => "divss".into(),
            AsmOp::Divsd => "divsd".into(),
            AsmOp::Ucomiss => "ucomiss".into(),
            AsmOp::Ucomisd => "ucomisd".into(),
            AsmOp::Cvtsi2sd => "cvtsi2sd".into(),
            AsmOp::Cvtsi2ss => "cvtsi2ss".into(),
            AsmOp::Cvttsd2si => "cvttsd2si".into(),
            AsmOp::Cvttss2si => "cvttss2si".into(),
            AsmOp::LockPrefixedXadd => "lock xadd".into(),
            AsmOp::LockCmpxchg => "lock cmpxchg".into(),
            AsmOp::Mfence => "mfence".into(),
            AsmOp::Nop => "nop".into(),
            AsmOp::LabelDef(_) => String::new(),
        }
    }

    fn format_operand(&self, op: &Operand) -> String {
        match op {
            Operand::Phys(r) => format!("%{}", register_name(*r)),
            Operand::Virtual(v) => format!("%v{}", {
                use cranelift_entity::EntityRef;
                v.index()
            }),
            Operand::ImmSigned(i) => format!("${i}"),
            Operand::ImmUnsigned(u) => format!("${u}"),
            Operand::Label(l) => format_label(l),
            Operand::RipRelative(l) => format!("{}(%rip)", format_label(l)),
            Operand::Indirect {
                base,
                displacement,
                ..
            } => {
                if *displacement == 0 {
                    format!("({})", self.format_operand(base))
                } else {
                    format!(
                        "{}({})",
                        format_displacement(*displacement),
                        self.format_operand(base)
                    )
                }
            }
            Operand::Segmented { segment, inner } => {
                let seg = match segment {
                    Segment::Fs => "%fs",
                    Segment::Gs => "%gs",
                };
                format!("{seg}:{}", self.format_operand(inner))
            }
        }
    }

    /// AT&T reverses asmcmp's destination-first order to source-first.
    fn operand_order<'a>(&self, operands: &'a [Operand]) -> Vec<&'a Operand> {
        operands.iter().rev().collect()
    }
}

fn format_label(label: &LabelRef) -> String {
    match label {
        LabelRef::Local(l) => {
            use cranelift_entity::EntityRef;
            format!(".L{}", l.index())
        }
        LabelRef::External { name, .. } => format!("sym{}", {
            use cranelift_entity::EntityRef;
            name.index()
        }),
    }
}

