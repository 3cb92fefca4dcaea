//! Call lowering: classifies each argument through
//! [`crate::isa::amd64::abi`], places it in the right integer/SSE
//! register or the outgoing-argument stack area, and wraps the `call`
//! itself in a register stash (spec.md §4.3 step 2: "Memory-class
//! lowerings respect IR memory flags"; §4.4 item (b) stashes).
//!
//! Grounded on cranelift-codegen's `isa/x64/abi.rs` call-lowering shape
//! (classify, assign registers in order, fall back to stack slots)
//! adapted to this crate's eightbyte classifier.

use crate::asmcmp::{AsmContext, AsmOp, Operand, OperandWidth, PhysReg};
use crate::isa::amd64::abi::{classify, ArgLocation, EightbyteClass, RegisterCursor, INTEGER_ARG_REGS, SSE_ARG_REGS};
use crate::types::{TypeBundle, TypeId};

fn phys_reg_for_name(name: &str) -> PhysReg {
    match name {
        "rdi" => PhysReg::Rdi,
        "rsi" => PhysReg::Rsi,
        "rdx" => PhysReg::Rdx,
        "rcx" => PhysReg::Rcx,
        "r8" => PhysReg::R8,
        "r9" => PhysReg::R9,
        other => panic!("not an integer argument register: {other}"),
    }
}

/// One argument's resolved placement, in call order. `Regs` holds one
/// physical register per eightbyte, in eightbyte order; an eightbyte
/// classified `Integer` is a GPR and one classified `Sse`/`SseUp` is an
/// `Xmm`, so a mixed-class argument (e.g. `{long, double}`) can mix
/// both kinds within a single placement (spec.md §4.5: placement is
/// per-eightbyte, not per-argument).
#[derive(Debug, Clone)]
pub enum ArgPlacement {
    Regs(Vec<PhysReg>),
    Stack { offset: u64 },
}

/// The caller-saved registers a call clobbers under the SysV ABI —
/// every register the callee isn't required to preserve.
pub const CALLER_SAVED: [PhysReg; 9] = [
    PhysReg::Rax, PhysReg::Rcx, PhysReg::Rdx, PhysReg::Rsi, PhysReg::Rdi,
    PhysReg::R8, PhysReg::R9, PhysReg::R10, PhysReg::R11,
];

/// Classifies and places every argument of a call, returning each
/// placement in order plus the total outgoing stack-argument size and
/// the `al` vararg SSE count (spec.md §3.5.7 convention).
pub fn place_arguments(
    types: &TypeBundle,
    arg_types: &[TypeId],
) -> (Vec<ArgPlacement>, u64, u8) {
    let mut cursor = RegisterCursor::new();
    let mut placements = Vec::with_capacity(arg_types.len());
    let mut stack_offset = 0u64;

    for &ty in arg_types {
        let location = classify(types, ty).unwrap_or(ArgLocation::Memory);
        match location {
            // `classify` (argument, not return, position) never produces
            // this — an X87-classified argument is always folded into
            // `Memory` per SysV §3.2.3 step 5 — but the variant exists
            // for `classify_return`'s sake, so match it the same as
            // `Memory` rather than leaving the match non-exhaustive.
            ArgLocation::X87 | ArgLocation::Memory => {
                let size = crate::isa::amd64::layout::size_of(types, ty).unwrap_or(8);
                let padded = crate::isa::amd64::layout::align_up(size, 8);
                placements.push(ArgPlacement::Stack {
                    offset: stack_offset,
                });
                stack_offset += padded;
            }
            ArgLocation::Registers(classes) => {
                if cursor.consume(&classes).is_none() {
                    let size = crate::isa::amd64::layout::size_of(types, ty).unwrap_or(8);
                    let padded = crate::isa::amd64::layout::align_up(size, 8);
                    placements.push(ArgPlacement::Stack {
                        offset: stack_offset,
                    });
                    stack_offset += padded;
                    continue;
                }
                // `cursor.consume` already advanced both counters by this
                // argument's totals; recover each eightbyte's index within
                // its own class's consumed range so mixed-class arguments
                // (e.g. `{long, double}` -> `[Integer, Sse]`) place their
                // Integer eightbytes in GPRs and their Sse eightbytes in
                // XMM registers independently.
                let integer_needed = classes
                    .iter()
                    .filter(|c| matches!(c, EightbyteClass::Integer))
                    .count();
                let sse_needed = classes.len() - integer_needed;
                let integer_start = cursor.integer_used - integer_needed;
                let sse_start = cursor.sse_used - sse_needed;
                let mut integer_idx = 0;
                let mut sse_idx = 0;
                let regs = classes
                    .iter()
                    .map(|class| match class {
                        EightbyteClass::Integer => {
                            let reg = phys_reg_for_name(INTEGER_ARG_REGS[integer_start + integer_idx]);
                            integer_idx += 1;
                            reg
                        }
                        _ => {
                            let reg = PhysReg::Xmm((sse_start + sse_idx) as u8);
                            sse_idx += 1;
                            reg
                        }
                    })
                    .collect();
                placements.push(ArgPlacement::Regs(regs));
            }
        }
    }

    let _ = SSE_ARG_REGS;
    (placements, stack_offset, cursor.vararg_sse_count())
}

/// Emits the `mov`/stack-store sequence to place already-computed
/// argument values (given as asmcmp operands) according to
/// `placements`, then the `call` itself wrapped in a stash protecting
/// every caller-saved register still holding a live value afterward.
pub fn lower_call(
    ctx: &mut AsmContext,
    callee: Operand,
    arg_values: &[Operand],
    placements: &[ArgPlacement],
    vararg_al: Option<u8>,
) -> (usize, crate::asmcmp::StashId) {
    for (value, placement) in arg_values.iter().zip(placements) {
        match placement {
            ArgPlacement::Regs(regs) => {
                for reg in regs {
                    let op = if reg.is_sse() { AsmOp::Movsd } else { AsmOp::Mov };
                    ctx.push(op, vec![Operand::Phys(*reg), value.clone()]);
                }
            }
            ArgPlacement::Stack { offset } => {
                ctx.push(
                    AsmOp::Mov,
                    vec![
                        Operand::indirect(Operand::Phys(PhysReg::Rsp), *offset as i64, OperandWidth::Qword),
                        value.clone(),
                    ],
                );
            }
        }
    }
    if let Some(al_count) = vararg_al {
        ctx.push(
            AsmOp::MovImm,
            vec![Operand::Phys(PhysReg::Rax), Operand::ImmUnsigned(al_count as u64)],
        );
    }
    let stash = ctx.make_stash(CALLER_SAVED.to_vec());
    let pos = ctx.push_stashed(AsmOp::Call, vec![callee], stash);
    ctx.set_stash_call_position(stash, pos);
    (pos, stash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntWidth, TypeCode, TypeEntry};

    #[test]
    fn six_integer_args_all_land_in_registers() {
        let mut types = TypeBundle::new();
        let mut arg_types = Vec::new();
        for _ in 0..6 {
            arg_types.push(types.push(TypeEntry::new(TypeCode::Int {
                width: IntWidth::W64,
            })));
        }
        let (placements, stack_size, _) = place_arguments(&types, &arg_types);
        assert_eq!(stack_size, 0);
        assert!(placements.iter().all(|p| matches!(
            p,
            ArgPlacement::Regs(regs) if regs.iter().all(|r| !r.is_sse())
        )));
    }

    /// spec.md §4.5 placement is per-eightbyte: a `{long, double}`
    /// struct classifies as `[Integer, Sse]`, so its first eightbyte
    /// must land in a GPR and its second in an XMM register, not both
    /// in XMM just because the argument isn't all-Integer.
    #[test]
    fn mixed_class_eightbytes_place_each_in_its_own_register_kind() {
        let mut types = TypeBundle::new();
        let root = types.push(TypeEntry::new(TypeCode::Struct { member_count: 2 }));
        types.push(TypeEntry::new(TypeCode::Int {
            width: IntWidth::W64,
        }));
        types.push(TypeEntry::new(TypeCode::Float64));
        let (placements, stack_size, _) = place_arguments(&types, &[root]);
        assert_eq!(stack_size, 0);
        match &placements[0] {
            ArgPlacement::Regs(regs) => {
                assert_eq!(regs.len(), 2);
                assert!(!regs[0].is_sse(), "first eightbyte should be a GPR: {:?}", regs[0]);
                assert!(regs[1].is_sse(), "second eightbyte should be an XMM reg: {:?}", regs[1]);
                assert_eq!(regs[0], PhysReg::Rdi);
                assert_eq!(regs[1], PhysReg::Xmm(0));
            }
            other => panic!("expected Regs placement, got {other:?}"),
        }
    }

    #[test]
    fn seventh_integer_arg_spills_to_the_stack() {
        let mut types = TypeBundle::new();
        let mut arg_types = Vec::new();
        for _ in 0..7 {
            arg_types.push(types.push(TypeEntry::new(TypeCode::Int {
                width: IntWidth::W64,
            })));
        }
        let (placements, stack_size, _) = place_arguments(&types, &arg_types);
        assert!(matches!(placements[6], ArgPlacement::Stack { offset: 0 }));
        assert_eq!(stack_size, 8);
    }

    #[test]
    fn call_is_wrapped_in_a_caller_saved_stash() {
        let mut ctx = AsmContext::new();
        let (pos, stash) = lower_call(&mut ctx, Operand::Label(crate::asmcmp::LabelRef::External {
            name: crate::util::strpool::StringId::new(0),
            relocation: crate::asmcmp::RelocationKind::Plt,
        }), &[], &[], None);
        assert_eq!(ctx.stash(stash).regs.len(), CALLER_SAVED.len());
        assert_eq!(ctx.stash(stash).call_position, Some(pos));
    }
}
