//! Fixture-driven end-to-end scenarios (spec.md §8.10, §A.4 in
//! SPEC_FULL.md): each test hand-builds a small IR function the way
//! the external AST-to-IR front-end would (spec.md §6), then drives it
//! through the real optimizer/codegen pipeline and asserts on the
//! emitted asmcmp stream and assembly text. No assembler or linker is
//! in scope, so assertions stop at "the right instructions, in the
//! right order, in all three dialects" rather than at running the
//! result.

use amd64cc_core::asmcmp::{AsmOp, Operand};
use amd64cc_core::codegen::lower::lower_function;
use amd64cc_core::config::Config;
use amd64cc_core::codegen::xasmgen::{emit_function_body, Syntax};
use amd64cc_core::ir::module::Module;
use amd64cc_core::ir::{Function, Immediate, InstData, Opcode, OverflowOp};
use amd64cc_core::opt::{self, PassId};
use amd64cc_core::types::{IntWidth, TypeBundle, TypeCode, TypeEntry};

fn const_i64(func: &mut Function, block: amd64cc_core::ir::Block, v: i64) -> amd64cc_core::ir::Inst {
    func.add_instruction(
        block,
        InstData::Immediate {
            opcode: Opcode::Constant,
            imm: Immediate::Int {
                bits: v as u64,
                width_bits: 64,
            },
        },
        None,
        false,
    )
    .unwrap()
}

/// A constant return compiles to a `mov`-into-`rax` then `ret` in all
/// three textual dialects (spec.md §6: "one of three syntaxes").
#[test]
fn constant_return_emits_in_all_three_dialects() {
    let module = Module::new();
    let mut func = Function::new();
    let block = func.make_block();
    let c = const_i64(&mut func, block, 7);
    func.finalize_return(block, Some(c)).unwrap();

    let (mut ctx_builder_state, _entry_label) = lower_function(&module, &func, &Config::default()).unwrap();

    let ops: Vec<_> = ctx_builder_state.ctx.iter().map(|(_, i)| i.op.clone()).collect();
    assert!(ops.contains(&AsmOp::Ret));
    assert!(ops.iter().any(|op| matches!(op, AsmOp::MovImm) || matches!(op, AsmOp::Movabs)));

    for syntax in [Syntax::IntelNoPrefix, Syntax::IntelPrefix, Syntax::Att] {
        let text = emit_function_body(&mut ctx_builder_state.ctx, syntax, false, false);
        assert!(text.contains("ret"), "{syntax} output missing ret:\n{text}");
    }
}

/// spec.md §8.8 / the compare-branch-fuse pass, exercised end to end:
/// a hand-built `branch(int_greater(a, b), then, else)` terminator
/// fuses into one `compare_branch`, which lowers to a single `cmp` +
/// `jcc` pair rather than a `cmp`/`setcc`/`test`/`jcc` chain.
#[test]
fn compare_branch_fuse_collapses_to_single_cmp_and_jcc() {
    let module = Module::new();
    let mut func = Function::new();
    let entry = func.make_block();
    let then_block = func.make_block();
    let else_block = func.make_block();

    let a = const_i64(&mut func, entry, 10);
    let b = const_i64(&mut func, entry, 3);
    let cmp = func
        .add_instruction(
            entry,
            InstData::CompareRef2 {
                opcode: Opcode::IntGreater,
                lhs: a,
                rhs: b,
            },
            None,
            false,
        )
        .unwrap();
    func.finalize_branch(entry, cmp, then_block, else_block).unwrap();

    let one = const_i64(&mut func, then_block, 1);
    func.finalize_return(then_block, Some(one)).unwrap();
    let zero = const_i64(&mut func, else_block, 0);
    func.finalize_return(else_block, Some(zero)).unwrap();

    opt::run_pipeline(&[PassId::CmpBranchFuse], &module, &mut func).unwrap();

    // The entry block's terminator is now `compare_branch`, not `branch`.
    let term = *func.control_instructions(entry).last().unwrap();
    assert!(matches!(func.dfg.data(term), InstData::CompareBranch { .. }));

    let (mut state, _entry_label) = lower_function(&module, &func, &Config::default()).unwrap();

    let ops: Vec<_> = state.ctx.iter().map(|(_, i)| i.op.clone()).collect();
    let cmp_count = ops.iter().filter(|op| matches!(op, AsmOp::Cmp)).count();
    let jcc_count = ops.iter().filter(|op| matches!(op, AsmOp::Jcc(_))).count();
    let test_count = ops.iter().filter(|op| matches!(op, AsmOp::Test)).count();
    let setcc_count = ops.iter().filter(|op| matches!(op, AsmOp::SetCc(_))).count();
    assert_eq!(cmp_count, 1, "fused compare should lower to exactly one cmp: {ops:?}");
    assert_eq!(jcc_count, 1, "fused compare should lower to exactly one jcc: {ops:?}");
    assert_eq!(test_count, 0, "a fused compare must not also emit test: {ops:?}");
    assert_eq!(setcc_count, 0, "a fused compare must not also emit setcc: {ops:?}");

    let text = emit_function_body(&mut state.ctx, Syntax::IntelNoPrefix, false, true);
    assert!(text.contains("cmp"));
    assert!(text.contains("jg") || text.contains("jl"));
}

/// spec.md §8.10 scenario 3 (`__builtin_add_overflow` on `long`):
/// the overflow-checked add lowers to `add` immediately followed by
/// `seto`, and both the wrapped sum and the overflow flag remain
/// independently readable by their respective `extract_overflow_*`
/// consumers.
#[test]
fn overflow_add_scenario_lowers_value_and_flag_independently() {
    let module = Module::new();
    let mut func = Function::new();
    let block = func.make_block();
    let mut types = TypeBundle::new();
    let long_ty = types.push(TypeEntry::new(TypeCode::Int { width: IntWidth::W64 }));

    // a = LONG_MAX/2 + 2, b = LONG_MAX/2 (spec.md §8.10 scenario 3).
    let long_max_half_plus_2 = (i64::MAX / 2) + 2;
    let long_max_half = i64::MAX / 2;
    let a = const_i64(&mut func, block, long_max_half_plus_2);
    let b = const_i64(&mut func, block, long_max_half);
    let overflow = func
        .add_instruction(
            block,
            InstData::OverflowArith {
                op: OverflowOp::Add,
                ty: long_ty,
                lhs: a,
                rhs: b,
            },
            None,
            false,
        )
        .unwrap();
    let sum = func
        .add_instruction(
            block,
            InstData::Unary {
                opcode: Opcode::ExtractOverflowValue,
                arg: overflow,
            },
            Some(long_ty),
            false,
        )
        .unwrap();
    let overflowed = func
        .add_instruction(
            block,
            InstData::Unary {
                opcode: Opcode::ExtractOverflowFlag,
                arg: overflow,
            },
            None,
            false,
        )
        .unwrap();
    func.finalize_return(block, Some(overflowed)).unwrap();

    let (state, _entry_label) = lower_function(&module, &func, &Config::default()).unwrap();

    let ops: Vec<_> = state.ctx.iter().map(|(_, i)| i.op.clone()).collect();
    let add_pos = ops.iter().position(|op| *op == AsmOp::Add).expect("add must be emitted");
    let seto_pos = ops.iter().position(|op| *op == AsmOp::SetO).expect("seto must be emitted");
    assert_eq!(seto_pos, add_pos + 1, "seto must immediately follow the add it captures");

    let value_operand = state.operand_of(sum).unwrap();
    let flag_operand = state.operand_of(overflowed).unwrap();
    assert_ne!(
        value_operand, flag_operand,
        "wrapped sum and overflow flag must be distinct locations"
    );
    assert!(matches!(value_operand, Operand::Virtual(_)));
    assert!(matches!(flag_operand, Operand::Virtual(_)));
}

/// spec.md §9's Open Question: `va_list` is rejected as a return type
/// rather than silently widened into a guessed classification.
#[test]
fn va_list_return_is_rejected_not_silently_widened() {
    let mut types = TypeBundle::new();
    let int_ty = types.push(TypeEntry::new(TypeCode::Int { width: IntWidth::W32 }));
    let result = amd64cc_core::isa::amd64::abi::classify_return(&types, int_ty, true);
    assert!(result.is_err());
}
