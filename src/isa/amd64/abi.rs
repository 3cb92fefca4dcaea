//! SysV AMD64 eightbyte classification for parameter and return-value
//! passing (spec.md §4.5).
//!
//! Grounded on the System V AMD64 ABI's classification algorithm
//! (section 3.2.3) as cranelift-codegen's `isa/x64/abi.rs` implements
//! it for its own argument legalization, adapted here to classify over
//! [`crate::types::TypeBundle`]'s flat tree and this crate's narrower,
//! per-eightbyte class set.

use crate::error::{CoreError, ErrorKind, Result};
use crate::isa::amd64::layout::{align_up, layout_members, size_of};
use crate::types::{FloatWidth, TypeBundle, TypeCode, TypeId};
use smallvec::{smallvec, SmallVec};

/// An aggregate never classifies into more than two eightbytes (larger
/// ones are excluded to memory by [`classify`]), so the inline
/// capacity always covers the real case without spilling to the heap.
pub type EightbyteClasses = SmallVec<[EightbyteClass; 2]>;

/// One eightbyte's classification (System V AMD64 ABI §3.2.3, pruned
/// to the classes this target ever actually assigns — `SSEUP` and the
/// merge-only intermediates are folded in during [`classify`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EightbyteClass {
    NoClass,
    Integer,
    Sse,
    SseUp,
    X87,
    X87Up,
    ComplexX87,
    Memory,
}

impl EightbyteClass {
    /// The ABI's merge rule (§3.2.3 step 4, clauses (a)-(e)): combines
    /// two classes assigned to the same eightbyte by different fields
    /// of an aggregate.
    fn merge(self, other: EightbyteClass) -> EightbyteClass {
        use EightbyteClass::*;
        if self == other {
            return self;
        }
        if self == NoClass {
            return other;
        }
        if other == NoClass {
            return self;
        }
        if self == Memory || other == Memory {
            return Memory;
        }
        if self == Integer || other == Integer {
            return Integer;
        }
        if matches!(self, X87 | X87Up | ComplexX87) || matches!(other, X87 | X87Up | ComplexX87) {
            return Memory;
        }
        Sse
    }
}

/// Where an argument or return value ultimately lands once its
/// eightbyte classes are resolved: split across integer/SSE registers,
/// or passed in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgLocation {
    /// One or two eightbytes, each landing in an integer or SSE
    /// register, in order.
    Registers(EightbyteClasses),
    /// A return value classified entirely `X87`/`X87Up` (a `long
    /// double`): returned in `st0`, never demoted to `Memory` (spec.md
    /// §4.5 Returns: "X87 -> st0/st1"). Return-only — [`classify`]
    /// never produces this for an argument, since X87-classified
    /// arguments are always passed on the stack.
    X87,
    Memory,
}

const MAX_EIGHTBYTES: usize = 2;

fn classify_into(
    types: &TypeBundle,
    id: TypeId,
    base_offset: u64,
    eightbytes: &mut EightbyteClasses,
) -> Result<()> {
    let entry = types.get(id)?;
    match entry.code {
        TypeCode::Void => {}
        TypeCode::Bool
        | TypeCode::Int { .. }
        | TypeCode::Pointer
        | TypeCode::BitInt { .. }
        | TypeCode::Function => {
            place(eightbytes, base_offset, size_of(types, id)?, EightbyteClass::Integer);
        }
        TypeCode::Float32 | TypeCode::Float64 => {
            place(eightbytes, base_offset, size_of(types, id)?, EightbyteClass::Sse);
        }
        TypeCode::LongDouble => {
            place(eightbytes, base_offset, 8, EightbyteClass::X87);
            place(eightbytes, base_offset + 8, 8, EightbyteClass::X87Up);
        }
        TypeCode::Complex { width } => match width {
            FloatWidth::LongDouble => {
                place(eightbytes, base_offset, 32, EightbyteClass::ComplexX87);
            }
            FloatWidth::F32 | FloatWidth::F64 => {
                let scalar = size_of(types, id)? / 2;
                place(eightbytes, base_offset, scalar, EightbyteClass::Sse);
                place(eightbytes, base_offset + scalar, scalar, EightbyteClass::Sse);
            }
        },
        TypeCode::Array { count } => {
            let elem = types.child_index(id, 0)?;
            let elem_size = size_of(types, elem)?;
            for i in 0..count {
                classify_into(types, elem, base_offset + i * elem_size, eightbytes)?;
            }
        }
        TypeCode::Struct { .. } => {
            let (_, offsets) = layout_members(types, id)?;
            for (child, member_offset) in types.children(id)?.into_iter().zip(offsets) {
                classify_into(types, child, base_offset + member_offset, eightbytes)?;
            }
        }
        TypeCode::Union { .. } => {
            for child in types.children(id)? {
                classify_into(types, child, base_offset, eightbytes)?;
            }
        }
    }
    Ok(())
}

fn place(eightbytes: &mut EightbyteClasses, byte_offset: u64, size: u64, class: EightbyteClass) {
    if size == 0 {
        return;
    }
    let first = (byte_offset / 8) as usize;
    let last = ((byte_offset + size - 1) / 8) as usize;
    for idx in first..=last {
        while eightbytes.len() <= idx {
            eightbytes.push(EightbyteClass::NoClass);
        }
        eightbytes[idx] = eightbytes[idx].merge(class);
    }
}

/// Classifies `id` into its eightbyte-class sequence (System V AMD64
/// ABI §3.2.3 steps 1-4). Aggregates larger than two eightbytes, or
/// whose first eightbyte resolves to `MEMORY`/`X87`/`COMPLEX_X87`, are
/// passed in memory per step 5's exclusion rules.
pub fn classify(types: &TypeBundle, id: TypeId) -> Result<ArgLocation> {
    let size = size_of(types, id)?;
    if size == 0 {
        return Ok(ArgLocation::Registers(EightbyteClasses::new()));
    }
    let padded = align_up(size, 8);
    if padded > (MAX_EIGHTBYTES as u64) * 8 {
        return Ok(ArgLocation::Memory);
    }
    let mut eightbytes = EightbyteClasses::new();
    classify_into(types, id, 0, &mut eightbytes)?;
    if eightbytes
        .iter()
        .any(|c| matches!(c, EightbyteClass::Memory | EightbyteClass::X87 | EightbyteClass::ComplexX87))
    {
        return Ok(ArgLocation::Memory);
    }
    Ok(ArgLocation::Registers(eightbytes))
}

/// The fixed integer argument-register pool, in consumption order
/// (spec.md §4.5: SysV integer argument registers).
pub const INTEGER_ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
/// The fixed SSE argument-register pool, in consumption order.
pub const SSE_ARG_REGS: [&str; 8] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
];

/// Tracks how much of each argument-register pool a call's arguments
/// have consumed so far, plus the `al` vararg count convention (SysV
/// §3.5.7: "al must be set to the number of vector registers used").
#[derive(Debug, Default, Clone, Copy)]
pub struct RegisterCursor {
    pub integer_used: usize,
    pub sse_used: usize,
}

impl RegisterCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to consume registers for a classified argument,
    /// returning `None` (falling back to the stack) if the pool is
    /// exhausted for any eightbyte class it needs.
    pub fn consume(&mut self, classes: &[EightbyteClass]) -> Option<()> {
        let integer_needed = classes
            .iter()
            .filter(|c| matches!(c, EightbyteClass::Integer))
            .count();
        let sse_needed = classes
            .iter()
            .filter(|c| matches!(c, EightbyteClass::Sse | EightbyteClass::SseUp))
            .count();
        if self.integer_used + integer_needed > INTEGER_ARG_REGS.len()
            || self.sse_used + sse_needed > SSE_ARG_REGS.len()
        {
            return None;
        }
        self.integer_used += integer_needed;
        self.sse_used += sse_needed;
        Some(())
    }

    /// The `al` register value a varargs call site must set: the
    /// number of SSE registers used by the fixed arguments.
    pub fn vararg_sse_count(&self) -> u8 {
        self.sse_used as u8
    }
}

/// `va_list` itself can never be the function's scalar return type —
/// kefir's own restriction (original_source), carried forward rather
/// than widened (see DESIGN.md's Open Question resolution).
///
/// Unlike [`classify`], a return value whose eightbytes are all
/// `X87`/`X87Up` (a plain `long double`) resolves to [`ArgLocation::X87`]
/// rather than being folded into `Memory`: spec.md §4.5 Returns treats
/// `X87 -> st0/st1` and `MEMORY -> hidden sret pointer` as distinct
/// outcomes, and the sanctioned `NotSupported` restriction (spec.md §9's
/// Open Question) names only `va_list`, not every long-double return.
/// A `ComplexX87`-classified return (complex long double) still folds
/// into `Memory`, matching [`classify`] — nothing in this module
/// resolves that case differently.
pub fn classify_return(types: &TypeBundle, id: TypeId, is_va_list: bool) -> Result<ArgLocation> {
    if is_va_list {
        return Err(CoreError::new(
            ErrorKind::NotSupported,
            "va_list is not a supported return type",
        ));
    }
    let size = size_of(types, id)?;
    if size == 0 {
        return Ok(ArgLocation::Registers(EightbyteClasses::new()));
    }
    let padded = align_up(size, 8);
    if padded > (MAX_EIGHTBYTES as u64) * 8 {
        return Ok(ArgLocation::Memory);
    }
    let mut eightbytes = EightbyteClasses::new();
    classify_into(types, id, 0, &mut eightbytes)?;
    if eightbytes
        .iter()
        .any(|c| matches!(c, EightbyteClass::Memory | EightbyteClass::ComplexX87))
    {
        return Ok(ArgLocation::Memory);
    }
    if eightbytes
        .iter()
        .any(|c| matches!(c, EightbyteClass::X87 | EightbyteClass::X87Up))
    {
        return Ok(ArgLocation::X87);
    }
    Ok(ArgLocation::Registers(eightbytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntWidth, TypeEntry};

    #[test]
    fn scalar_long_classifies_as_single_integer_eightbyte() {
        let mut types = TypeBundle::new();
        let id = types.push(TypeEntry::new(TypeCode::Int {
            width: IntWidth::W64,
        }));
        assert_eq!(
            classify(&types, id).unwrap(),
            ArgLocation::Registers(smallvec![EightbyteClass::Integer])
        );
    }

    #[test]
    fn complex_double_is_two_sse_eightbytes() {
        let mut types = TypeBundle::new();
        let id = types.push(TypeEntry::new(TypeCode::Complex {
            width: FloatWidth::F64,
        }));
        assert_eq!(
            classify(&types, id).unwrap(),
            ArgLocation::Registers(smallvec![EightbyteClass::Sse, EightbyteClass::Sse])
        );
    }

    #[test]
    fn oversized_bitint_struct_goes_to_memory() {
        let mut types = TypeBundle::new();
        let root = types.push(TypeEntry::new(TypeCode::Struct { member_count: 1 }));
        types.push(TypeEntry::new(TypeCode::BitInt {
            signed: false,
            width: 192,
        }));
        assert_eq!(classify(&types, root).unwrap(), ArgLocation::Memory);
    }

    #[test]
    fn long_double_is_memory_class_via_x87() {
        let mut types = TypeBundle::new();
        let id = types.push(TypeEntry::new(TypeCode::LongDouble));
        assert_eq!(classify(&types, id).unwrap(), ArgLocation::Memory);
    }

    #[test]
    fn register_cursor_exhausts_and_reports_vararg_sse_count() {
        let mut cursor = RegisterCursor::new();
        for _ in 0..6 {
            assert!(cursor.consume(&[EightbyteClass::Integer]).is_some());
        }
        assert!(cursor.consume(&[EightbyteClass::Integer]).is_none());
        let mut sse_cursor = RegisterCursor::new();
        sse_cursor.consume(&[EightbyteClass::Sse]).unwrap();
        sse_cursor.consume(&[EightbyteClass::Sse, EightbyteClass::Sse]).unwrap();
        assert_eq!(sse_cursor.vararg_sse_count(), 3);
    }

    #[test]
    fn classify_return_rejects_va_list() {
        let mut types = TypeBundle::new();
        let id = types.push(TypeEntry::new(TypeCode::Pointer));
        assert!(classify_return(&types, id, true).is_err());
        assert!(classify_return(&types, id, false).is_ok());
    }

    /// spec.md §4.5 Returns: `X87 -> st0/st1` is distinct from
    /// `MEMORY -> hidden sret pointer`. Argument passing still folds
    /// `long double` to `Memory` ([`long_double_is_memory_class_via_x87`]
    /// above), but as a return value it must resolve to `ArgLocation::X87`,
    /// not be silently widened into the same `Memory` bucket as an
    /// oversized aggregate.
    #[test]
    fn long_double_return_classifies_as_x87_not_memory() {
        let mut types = TypeBundle::new();
        let id = types.push(TypeEntry::new(TypeCode::LongDouble));
        assert_eq!(classify_return(&types, id, false).unwrap(), ArgLocation::X87);
    }

    /// The sanctioned `NotSupported` restriction (spec.md §9's Open
    /// Question) names only `va_list`; an oversized aggregate return
    /// still classifies as plain `Memory`, unaffected by the X87 carve-out.
    #[test]
    fn oversized_aggregate_return_is_still_memory() {
        let mut types = TypeBundle::new();
        let root = types.push(TypeEntry::new(TypeCode::Struct { member_count: 1 }));
        types.push(TypeEntry::new(TypeCode::BitInt {
            signed: false,
            width: 192,
        }));
        assert_eq!(classify_return(&types, root, false).unwrap(), ArgLocation::Memory);
    }
}
