//! Opcodes and instruction payloads for the optimizer IR.
//!
//! spec.md §9's Design Notes call for "a single enum of opcodes plus a
//! parallel tagged-union for payloads; layout and dispatch derive from
//! pattern-matching rather than [the source's] X-macro expansion". This
//! module is that enum/union pair. The opcode list is a representative
//! slice of spec.md §1's "~200 typed opcodes" spanning every category
//! §1 names (integer/float/bit-precise/complex arithmetic, atomics,
//! memory, calls, control flow) rather than an exhaustive transcription
//! — see DESIGN.md.
//!
//! Grounded on cranelift-codegen's `ir/instructions.rs` (opcode +
//! `InstructionData` payload enum shape) and
//! `original_source/source/optimizer/pipeline/cmp_branch_fuse.c` for the
//! exact payload fields a `branch`/`compare_branch` terminator needs.

use crate::ir::atomic_rmw_op::AtomicRmwOp;
use crate::ir::condcodes::IntCC;
use crate::ir::entities::{Block, CallDescId, Inst};
use crate::ir::memflags::{MemFlags, MemoryOrder};
use crate::types::TypeId;
use crate::util::strpool::StringId;
use cranelift_entity::EntityList;

/// An immediate operand (spec.md §3 payload variant `immediate`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    Bool(bool),
    Int { bits: u64, width_bits: u32 },
    Float32(f32),
    Float64(f64),
    BitInt { limbs: [u64; 4], width_bits: u32 },
    NullPointer,
}

/// Overflow-checked arithmetic operators (spec.md §8.6, §4.1
/// "overflow arithmetic").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverflowOp {
    Add,
    Sub,
    Mul,
}

macro_rules! opcodes {
    ($($variant:ident => $mnemonic:literal),+ $(,)?) => {
        /// The opcode of an instruction. Paired with an [`InstData`]
        /// payload whose shape must agree with the opcode (spec.md §3
        /// invariant: "Opcode and payload variant agree").
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($variant),+
        }

        impl Opcode {
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic),+
                }
            }
        }
    };
}

opcodes! {
    // Integer arithmetic (widths 8/16/32/64 are carried by the producing
    // instruction's result type, not by distinct opcodes).
    IntAdd => "int_add", IntSub => "int_sub", IntMul => "int_mul",
    IntUDiv => "int_udiv", IntSDiv => "int_sdiv",
    IntURem => "int_urem", IntSRem => "int_srem",
    IntAnd => "int_and", IntOr => "int_or", IntXor => "int_xor",
    IntShl => "int_shl", IntLShr => "int_lshr", IntAShr => "int_ashr",
    IntNot => "int_not", IntNeg => "int_neg",
    // Integer compares.
    IntEquals => "int_equals", IntNotEquals => "int_not_equals",
    IntGreater => "int_greater", IntGreaterOrEquals => "int_greater_or_equals",
    IntLesser => "int_lesser", IntLesserOrEquals => "int_lesser_or_equals",
    IntAbove => "int_above", IntAboveOrEquals => "int_above_or_equals",
    IntBelow => "int_below", IntBelowOrEquals => "int_below_or_equals",
    // Boolean ops.
    BoolNot => "bool_not", BoolAnd => "bool_and", BoolOr => "bool_or",
    // Float arithmetic and compares.
    FloatAdd => "float_add", FloatSub => "float_sub",
    FloatMul => "float_mul", FloatDiv => "float_div", FloatNeg => "float_neg",
    FloatEquals => "float_equals", FloatNotEquals => "float_not_equals",
    FloatGreater => "float_greater", FloatGreaterOrEquals => "float_greater_or_equals",
    FloatLesser => "float_lesser", FloatLesserOrEquals => "float_lesser_or_equals",
    // Complex arithmetic.
    ComplexAdd => "complex_add", ComplexSub => "complex_sub",
    ComplexMul => "complex_mul", ComplexDiv => "complex_div",
    ComplexNeg => "complex_neg",
    // Bit-precise ("BitInt") arithmetic.
    BitIntAdd => "bitint_add", BitIntSub => "bitint_sub", BitIntMul => "bitint_mul",
    BitIntAnd => "bitint_and", BitIntOr => "bitint_or", BitIntXor => "bitint_xor",
    BitIntShl => "bitint_shl", BitIntLShr => "bitint_lshr", BitIntAShr => "bitint_ashr",
    BitIntNeg => "bitint_neg", BitIntNot => "bitint_not",
    BitIntUDiv => "bitint_udiv", BitIntSDiv => "bitint_sdiv",
    // Conversions.
    IntTrunc => "int_trunc", IntSext => "int_sext", IntZext => "int_zext",
    IntToFloat => "int_to_float", UintToFloat => "uint_to_float",
    FloatToInt => "float_to_int", FloatToUint => "float_to_uint",
    FloatTrunc => "float_trunc", FloatExt => "float_ext",
    Bitcast => "bitcast",
    // Memory.
    Load => "load_mem", Store => "store_mem",
    StackAlloc => "stack_alloc",
    ScopePush => "scope_push", ScopePop => "scope_pop",
    GetLocal => "get_local", AddressOf => "address_of",
    GetGlobal => "get_global", GetThreadLocal => "get_thread_local",
    // Bitfield access (spec.md §3 payload variant `bitfield`).
    BitfieldExtract => "bitfield_extract", BitfieldInsert => "bitfield_insert",
    // Atomics.
    AtomicLoad => "atomic_load", AtomicStore => "atomic_store",
    AtomicRmw => "atomic_rmw", AtomicCmpXchg => "atomic_cmpxchg",
    AtomicFence => "atomic_fence",
    // Overflow-checked arithmetic (spec.md §3 payload variant `overflow_arith`).
    OverflowArith => "overflow_arith",
    ExtractOverflowValue => "extract_overflow_value",
    ExtractOverflowFlag => "extract_overflow_flag",
    // Calls (spec.md §3 payload variant `call_ref`).
    Call => "call",
    // Control flow / terminators.
    Jump => "jump", IndirectJump => "indirect_jump",
    Branch => "branch", CompareBranch => "compare_branch",
    Return => "return", TailInvoke => "tail_invoke",
    Unreachable => "unreachable",
    // Varargs.
    VaStart => "va_start", VaArg => "va_arg", VaEnd => "va_end", VaCopy => "va_copy",
    // Built-ins.
    BuiltinMemcpy => "builtin_memcpy", BuiltinMemset => "builtin_memset",
    // Immediates.
    Constant => "constant",
    // Inline assembly.
    InlineAsm => "inline_asm",
}

impl Opcode {
    /// Terminators end a block's control list (spec.md §3 invariant:
    /// "Every block ends in exactly one terminator").
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::IndirectJump
                | Opcode::Branch
                | Opcode::CompareBranch
                | Opcode::Return
                | Opcode::TailInvoke
                | Opcode::Unreachable
        )
    }

    /// Recovers the [`IntCC`] predicate an `int_*` compare opcode
    /// denotes, if it is one.
    pub fn as_int_cc(self) -> Option<IntCC> {
        Some(match self {
            Opcode::IntEquals => IntCC::Equals,
            Opcode::IntNotEquals => IntCC::NotEquals,
            Opcode::IntGreater => IntCC::Greater,
            Opcode::IntGreaterOrEquals => IntCC::GreaterOrEquals,
            Opcode::IntLesser => IntCC::Lesser,
            Opcode::IntLesserOrEquals => IntCC::LesserOrEquals,
            Opcode::IntAbove => IntCC::Above,
            Opcode::IntAboveOrEquals => IntCC::AboveOrEquals,
            Opcode::IntBelow => IntCC::Below,
            Opcode::IntBelowOrEquals => IntCC::BelowOrEquals,
            _ => return None,
        })
    }

    /// The opcode denoting a given [`IntCC`] predicate directly (not
    /// wrapped in `bool_not`).
    pub fn from_int_cc(cc: IntCC) -> Opcode {
        match cc {
            IntCC::Equals => Opcode::IntEquals,
            IntCC::NotEquals => Opcode::IntNotEquals,
            IntCC::Greater => Opcode::IntGreater,
            IntCC::GreaterOrEquals => Opcode::IntGreaterOrEquals,
            IntCC::Lesser => Opcode::IntLesser,
            IntCC::LesserOrEquals => Opcode::IntLesserOrEquals,
            IntCC::Above => Opcode::IntAbove,
            IntCC::AboveOrEquals => Opcode::IntAboveOrEquals,
            IntCC::Below => Opcode::IntBelow,
            IntCC::BelowOrEquals => Opcode::IntBelowOrEquals,
        }
    }

    /// Side-effecting instructions must be part of the control list;
    /// everything else is a pure producer, freely re-orderable subject
    /// to data dependencies (spec.md §3: "only control instructions
    /// participate in execution order for scheduling").
    pub fn has_side_effects(self) -> bool {
        self.is_terminator()
            || matches!(
                self,
                Opcode::Store
                    | Opcode::AtomicStore
                    | Opcode::AtomicRmw
                    | Opcode::AtomicCmpXchg
                    | Opcode::AtomicFence
                    | Opcode::Call
                    | Opcode::StackAlloc
                    | Opcode::ScopePush
                    | Opcode::ScopePop
                    | Opcode::VaStart
                    | Opcode::VaEnd
                    | Opcode::BuiltinMemcpy
                    | Opcode::BuiltinMemset
                    | Opcode::InlineAsm
            )
    }
}

/// The operand payload carried by an instruction. The variant tags
/// mirror spec.md §3's enumerated payload classes directly
/// (`refN`, `branch`, `compare_ref2`, `call_ref`, `load_mem`,
/// `store_mem`, `atomic_op`, `bitint_refN`, `immediate`, `typed_ref2`,
/// `bitfield`, `overflow_arith`).
#[derive(Debug, Clone)]
pub enum InstData {
    /// Nullary or variadic reference list (return, varargs, builtins).
    RefN {
        opcode: Opcode,
        args: EntityList<Inst>,
    },
    /// Unconditional branch on a boolean condition to one of two
    /// successors.
    Branch {
        cond: Inst,
        target: Block,
        fallthrough: Block,
    },
    /// A two-operand compare yielding a boolean. `opcode` is one of the
    /// `int_*`/`float_*` compare mnemonics; for integer compares,
    /// [`Opcode::as_int_cc`] recovers the [`IntCC`] predicate.
    CompareRef2 {
        opcode: Opcode,
        lhs: Inst,
        rhs: Inst,
    },
    /// A compare fused directly into a terminator (spec.md §4.2 output
    /// of compare-branch fuse).
    CompareBranch {
        predicate: IntCC,
        lhs: Inst,
        rhs: Inst,
        target: Block,
        fallthrough: Block,
    },
    /// A call through a call descriptor (spec.md §3: "Call instructions
    /// reference a call descriptor").
    CallRef { desc: CallDescId },
    /// A call in tail position, replacing the block's `return` (spec.md
    /// §2 row "tail-call"): same descriptor shape as [`InstData::CallRef`],
    /// but this is itself the block's terminator.
    TailInvoke { desc: CallDescId },
    LoadMem {
        ty: TypeId,
        base: Inst,
        offset: i64,
        member_index: Option<u32>,
        flags: MemFlags,
        order: Option<MemoryOrder>,
    },
    StoreMem {
        ty: TypeId,
        base: Inst,
        offset: i64,
        member_index: Option<u32>,
        flags: MemFlags,
        order: Option<MemoryOrder>,
        value: Inst,
    },
    AtomicOp {
        op: AtomicRmwOp,
        ty: TypeId,
        base: Inst,
        offset: i64,
        value: Inst,
        order: MemoryOrder,
    },
    /// Bit-precise arithmetic; every operand must share `width_bits`
    /// (spec.md §3: "`bitint_*` ops carry an explicit bit-width...
    /// arithmetic requires matching widths on all operands").
    BitintRefN {
        opcode: Opcode,
        width_bits: u32,
        args: EntityList<Inst>,
    },
    Immediate { opcode: Opcode, imm: Immediate },
    /// A typed two-operand op whose result/operand type must be carried
    /// explicitly (conversions, complex arithmetic).
    TypedRef2 {
        opcode: Opcode,
        ty: TypeId,
        lhs: Inst,
        rhs: Inst,
    },
    Bitfield {
        opcode: Opcode,
        base: Inst,
        bit_offset: u32,
        bit_width: u32,
        holder_ty: TypeId,
        value: Option<Inst>,
    },
    OverflowArith {
        op: OverflowOp,
        ty: TypeId,
        lhs: Inst,
        rhs: Inst,
    },
    Jump { target: Block },
    IndirectJump {
        target: Inst,
        possible_targets: EntityList<Block>,
    },
    StackAlloc { ty: TypeId, align: u32 },
    Unary { opcode: Opcode, arg: Inst },
    Nullary { opcode: Opcode },
    InlineAsm {
        template: StringId,
        args: EntityList<Inst>,
    },
    /// References a global or thread-local symbol's address, offset by
    /// a constant byte count (array/struct-member addressing folded in
    /// directly rather than via a separate `int_add`). `opcode` is
    /// [`Opcode::GetGlobal`] or [`Opcode::GetThreadLocal`].
    SymbolRef {
        opcode: Opcode,
        name: StringId,
        offset: i64,
    },
}

impl InstData {
    pub fn opcode(&self) -> Opcode {
        match self {
            InstData::RefN { opcode, .. } => *opcode,
            InstData::Branch { .. } => Opcode::Branch,
            InstData::CompareRef2 { opcode, .. } => *opcode,
            InstData::CompareBranch { .. } => Opcode::CompareBranch,
            InstData::CallRef { .. } => Opcode::Call,
            InstData::TailInvoke { .. } => Opcode::TailInvoke,
            InstData::LoadMem { .. } => Opcode::Load,
            InstData::StoreMem { .. } => Opcode::Store,
            InstData::AtomicOp { op, .. } => op.to_opcode(),
            InstData::BitintRefN { opcode, .. } => *opcode,
            InstData::Immediate { opcode, .. } => *opcode,
            InstData::TypedRef2 { opcode, .. } => *opcode,
            InstData::Bitfield { opcode, .. } => *opcode,
            InstData::OverflowArith { .. } => Opcode::OverflowArith,
            InstData::Jump { .. } => Opcode::Jump,
            InstData::IndirectJump { .. } => Opcode::IndirectJump,
            InstData::StackAlloc { .. } => Opcode::StackAlloc,
            InstData::Unary { opcode, .. } => *opcode,
            InstData::Nullary { opcode } => *opcode,
            InstData::InlineAsm { .. } => Opcode::InlineAsm,
            InstData::SymbolRef { opcode, .. } => *opcode,
        }
    }
}

impl AtomicRmwOp {
    fn to_opcode(self) -> Opcode {
        Opcode::AtomicRmw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_branch_is_a_terminator() {
        assert!(Opcode::CompareBranch.is_terminator());
        assert!(Opcode::Branch.is_terminator());
        assert!(!Opcode::IntAdd.is_terminator());
    }

    #[test]
    fn store_has_side_effects_but_add_does_not() {
        assert!(Opcode::Store.has_side_effects());
        assert!(!Opcode::IntAdd.has_side_effects());
    }

    #[test]
    fn mnemonics_are_stable_strings() {
        assert_eq!(Opcode::CompareBranch.mnemonic(), "compare_branch");
        assert_eq!(Opcode::BitIntAdd.mnemonic(), "bitint_add");
    }
}
