//! Size, alignment, and struct/union member offsets for the x86-64
//! SysV data model (spec.md §4.5, LP64: `long`/pointer are 8 bytes,
//! `int` is 4).
//!
//! Grounded on cranelift-codegen's `ir/types.rs` constant-size-table
//! idiom, generalized to recurse over [`crate::types::TypeBundle`]'s
//! flat tree instead of a fixed primitive set.

use crate::error::Result;
use crate::types::{FloatWidth, IntWidth, TypeBundle, TypeCode, TypeId};

/// `long double` is 80-bit extended precision stored in a 16-byte slot
/// under the SysV data model.
pub const LONG_DOUBLE_SIZE: u64 = 16;
pub const LONG_DOUBLE_ALIGN: u32 = 16;

fn scalar_align(width: FloatWidth) -> u32 {
    match width {
        FloatWidth::F32 => 4,
        FloatWidth::F64 => 8,
        FloatWidth::LongDouble => LONG_DOUBLE_ALIGN,
    }
}

fn scalar_size(width: FloatWidth) -> u64 {
    match width {
        FloatWidth::F32 => 4,
        FloatWidth::F64 => 8,
        FloatWidth::LongDouble => LONG_DOUBLE_SIZE,
    }
}

/// Rounds `value` up to the nearest multiple of `align` (`align` must
/// be a power of two, or 1).
pub fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    (value + align - 1) & !(align - 1)
}

fn bitint_bytes(width: u32) -> u64 {
    (width as u64 + 7) / 8
}

/// The type's natural (or explicitly overridden) alignment in bytes.
pub fn align_of(types: &TypeBundle, id: TypeId) -> Result<u32> {
    let entry = types.get(id)?;
    if entry.alignment != 0 {
        return Ok(entry.alignment);
    }
    Ok(match entry.code {
        TypeCode::Void => 1,
        TypeCode::Bool => 1,
        TypeCode::Int { width } => (width.bits() / 8).max(1),
        TypeCode::Float32 => 4,
        TypeCode::Float64 => 8,
        TypeCode::LongDouble => LONG_DOUBLE_ALIGN,
        TypeCode::Complex { width } => scalar_align(width),
        TypeCode::BitInt { width, .. } => {
            let bytes = bitint_bytes(width);
            if bytes <= 16 {
                bytes.next_power_of_two() as u32
            } else {
                8
            }
        }
        TypeCode::Pointer => 8,
        TypeCode::Array { .. } => {
            let elem = types.child_index(id, 0)?;
            align_of(types, elem)?
        }
        TypeCode::Struct { .. } | TypeCode::Union { .. } => {
            let mut max = 1u32;
            for child in types.children(id)? {
                max = max.max(align_of(types, child)?);
            }
            max
        }
        TypeCode::Function => 1,
    })
}

/// The type's size in bytes, including trailing padding for
/// struct/array alignment.
pub fn size_of(types: &TypeBundle, id: TypeId) -> Result<u64> {
    let entry = types.get(id)?;
    Ok(match entry.code {
        TypeCode::Void => 0,
        TypeCode::Bool => 1,
        TypeCode::Int { width } => (width.bits() / 8) as u64,
        TypeCode::Float32 => 4,
        TypeCode::Float64 => 8,
        TypeCode::LongDouble => LONG_DOUBLE_SIZE,
        TypeCode::Complex { width } => scalar_size(width) * 2,
        TypeCode::BitInt { width, .. } => {
            let align = align_of(types, id)? as u64;
            align_up(bitint_bytes(width), align)
        }
        TypeCode::Pointer => 8,
        TypeCode::Array { count } => {
            let elem = types.child_index(id, 0)?;
            size_of(types, elem)? * count
        }
        TypeCode::Struct { .. } => {
            let (size, _) = layout_members(types, id)?;
            size
        }
        TypeCode::Union { .. } => {
            let align = align_of(types, id)?;
            let mut max = 0u64;
            for child in types.children(id)? {
                max = max.max(size_of(types, child)?);
            }
            align_up(max, align as u64)
        }
        TypeCode::Function => 0,
    })
}

/// Byte offsets of every top-level member of a struct, plus the
/// struct's own padded total size.
pub fn layout_members(types: &TypeBundle, id: TypeId) -> Result<(u64, Vec<u64>)> {
    let mut offset = 0u64;
    let mut offsets = Vec::new();
    for child in types.children(id)? {
        let child_align = align_of(types, child)? as u64;
        offset = align_up(offset, child_align);
        offsets.push(offset);
        offset += size_of(types, child)?;
    }
    let struct_align = align_of(types, id)? as u64;
    Ok((align_up(offset, struct_align), offsets))
}

/// The byte offset of struct member `n` (spec.md §4.5 layout input to
/// eightbyte classification).
pub fn member_offset(types: &TypeBundle, id: TypeId, n: usize) -> Result<u64> {
    let (_, offsets) = layout_members(types, id)?;
    offsets.get(n).copied().ok_or_else(|| {
        crate::error::CoreError::new(crate::error::ErrorKind::OutOfBounds, "member index out of bounds")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeEntry;

    #[test]
    fn struct_of_char_then_long_pads_to_eight_byte_alignment() {
        let mut types = TypeBundle::new();
        let root = types.push(TypeEntry::new(TypeCode::Struct { member_count: 2 }));
        types.push(TypeEntry::new(TypeCode::Int {
            width: IntWidth::W8,
        }));
        types.push(TypeEntry::new(TypeCode::Int {
            width: IntWidth::W64,
        }));
        let (size, offsets) = layout_members(&types, root).unwrap();
        assert_eq!(offsets, vec![0, 8]);
        assert_eq!(size, 16);
        assert_eq!(align_of(&types, root).unwrap(), 8);
    }

    #[test]
    fn array_size_multiplies_element_size() {
        let mut types = TypeBundle::new();
        let root = types.push(TypeEntry::new(TypeCode::Array { count: 4 }));
        types.push(TypeEntry::new(TypeCode::Float64));
        assert_eq!(size_of(&types, root).unwrap(), 32);
    }

    #[test]
    fn union_size_is_the_largest_member_padded_to_its_alignment() {
        let mut types = TypeBundle::new();
        let root = types.push(TypeEntry::new(TypeCode::Union { member_count: 2 }));
        types.push(TypeEntry::new(TypeCode::Int {
            width: IntWidth::W8,
        }));
        types.push(TypeEntry::new(TypeCode::Int {
            width: IntWidth::W64,
        }));
        assert_eq!(size_of(&types, root).unwrap(), 8);
    }

    #[test]
    fn bitint_192_rounds_up_to_whole_eightbytes() {
        let mut types = TypeBundle::new();
        let root = types.push(TypeEntry::new(TypeCode::BitInt {
            signed: false,
            width: 192,
        }));
        assert_eq!(size_of(&types, root).unwrap(), 24);
        assert_eq!(align_of(&types, root).unwrap(), 8);
    }
}
