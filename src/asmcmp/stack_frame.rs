//! Stack-frame layout: negative, rbp-relative offsets for spill slots,
//! `stack_alloc`'d objects, the outgoing call-argument area, and the
//! dynamic-scope slot, rounded to 16-byte total alignment (spec.md
//! §4.4 "stack-frame layout").
//!
//! Grounded on `original_source/source/codegen/amd64/stack_frame.c`'s
//! four-region layout and final 16-byte rounding (the SysV AMD64 ABI's
//! stack alignment requirement at a `call` instruction).

use crate::isa::amd64::layout::align_up;

const SPILL_SLOT_SIZE: u64 = 8;
const POINTER_SIZE: u64 = 8;
const FINAL_ALIGNMENT: u64 = 16;

/// One `stack_alloc`'d object's size/alignment requirement, in the
/// order its IR instruction was encountered.
#[derive(Debug, Clone, Copy)]
pub struct StackObject {
    pub size: u64,
    pub align: u64,
}

/// Accumulates a function's frame requirements as codegen lowers it,
/// then resolves them to concrete offsets once lowering completes.
#[derive(Debug, Default)]
pub struct StackFrameBuilder {
    spill_slots: u32,
    objects: Vec<StackObject>,
    outgoing_args_size: u64,
    has_dynamic_scope: bool,
    preserved_regs_size: u64,
}

impl StackFrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves one more spill slot, returning its dense index.
    pub fn add_spill_slot(&mut self) -> u32 {
        let idx = self.spill_slots;
        self.spill_slots += 1;
        idx
    }

    /// Reserves space for a `stack_alloc`'d object, returning its index.
    pub fn add_object(&mut self, size: u64, align: u64) -> usize {
        self.objects.push(StackObject { size, align });
        self.objects.len() - 1
    }

    /// Widens the outgoing-argument area to fit a call needing
    /// `bytes` of stack-passed arguments.
    pub fn reserve_outgoing_args(&mut self, bytes: u64) {
        self.outgoing_args_size = self.outgoing_args_size.max(bytes);
    }

    /// Marks the frame as needing the dynamic-scope pointer slot
    /// (spec.md §4.3 step 1: materialized "the first time a
    /// scope-push / stack-alloc is encountered").
    pub fn mark_dynamic_scope(&mut self) {
        self.has_dynamic_scope = true;
    }

    /// Records how many bytes the prologue's `push`-per-callee-saved
    /// sequence already moved `rsp` down by, so `build` can fold it
    /// into the 16-byte rounding of the *whole* frame (spec.md §4.4
    /// "finally, the whole frame is padded down to 16 bytes") rather
    /// than rounding only the `sub rsp` portion.
    pub fn set_preserved_regs_size(&mut self, bytes: u64) {
        self.preserved_regs_size = bytes;
    }

    pub fn build(&self) -> StackFrame {
        // The prologue pushes each callee-saved register immediately
        // below the saved rbp, before any of the regions below run
        // (`module_emit`'s synthesized prologue: push rbp; mov rbp,
        // rsp; push <preserved regs>); every other region's cursor has
        // to start past that space or a spill slot and a preserved
        // register alias to the same `[rbp-n]` address.
        let mut cursor = self.preserved_regs_size;

        // Region 1: the local-variables area (`stack_alloc`'d objects),
        // each aligned within the frame, immediately below the
        // preserved-regs region (spec.md §4.4: "below [preserved_regs],
        // the local area padded down to its alignment").
        let mut object_offsets = Vec::with_capacity(self.objects.len());
        for obj in &self.objects {
            cursor = align_up(cursor, obj.align);
            object_offsets.push(cursor);
            cursor += obj.size;
        }
        let objects_region_end = cursor;

        // Region 2: virtual-register spill slots, below the local area
        // (spec.md §4.4: "below it, spill area").
        let spill_region_start = cursor;
        cursor += self.spill_slots as u64 * SPILL_SLOT_SIZE;
        let spill_region_end = cursor;

        // Region 3: the dynamic-scope pointer, if this frame has a
        // varying stack pointer.
        let dynamic_scope_offset = if self.has_dynamic_scope {
            cursor = align_up(cursor, POINTER_SIZE);
            let offset = cursor;
            cursor += POINTER_SIZE;
            Some(offset)
        } else {
            None
        };

        // Region 4: outgoing call arguments, furthest from rbp (placed
        // just above the call's own return-address slot).
        let outgoing_args_offset = cursor;
        cursor += self.outgoing_args_size;

        // `top_of_frame` (spec.md §4.4, §8.9) measures the whole frame
        // from the saved rbp; the preserved-regs region is already
        // folded into `cursor` above, so only the remainder is what the
        // prologue's `sub rsp` instruction must additionally carve out.
        let top_of_frame = align_up(cursor, FINAL_ALIGNMENT);
        let allocated = top_of_frame - self.preserved_regs_size;

        StackFrame {
            total_size: top_of_frame,
            allocated,
            spill_region_start,
            spill_region_end,
            object_offsets,
            objects_region_end,
            dynamic_scope_offset,
            outgoing_args_offset,
        }
    }
}

/// The resolved frame: every region's rbp-relative offset is returned
/// as a positive byte count *below* the saved rbp (the caller negates
/// it when emitting `[rbp - n]`).
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub total_size: u64,
    /// `allocated` in spec.md §4.4: the amount the prologue's
    /// `sub rsp, allocated` carves out, i.e. `total_size` minus
    /// whatever the callee-saved `push` sequence already moved `rsp`
    /// down by.
    pub allocated: u64,
    spill_region_start: u64,
    spill_region_end: u64,
    object_offsets: Vec<u64>,
    objects_region_end: u64,
    dynamic_scope_offset: Option<u64>,
    outgoing_args_offset: u64,
}

impl StackFrame {
    /// `[rbp - offset]` for spill slot `idx` (each `SPILL_SLOT_SIZE`
    /// bytes, slot 0 sitting just past the local-variables region).
    pub fn spill_slot_offset(&self, idx: u32) -> u64 {
        self.spill_region_start + (idx as u64 + 1) * SPILL_SLOT_SIZE
    }

    pub fn object_offset(&self, idx: usize) -> u64 {
        self.object_offsets[idx]
    }

    pub fn dynamic_scope_offset(&self) -> Option<u64> {
        self.dynamic_scope_offset
    }

    pub fn outgoing_args_offset(&self) -> u64 {
        self.outgoing_args_offset
    }

    pub fn spill_region_end(&self) -> u64 {
        self.spill_region_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_size_rounds_up_to_sixteen_bytes() {
        let mut builder = StackFrameBuilder::new();
        builder.add_spill_slot();
        let frame = builder.build();
        assert_eq!(frame.total_size % 16, 0);
        assert!(frame.total_size >= 8);
    }

    #[test]
    fn objects_are_aligned_within_the_frame() {
        let mut builder = StackFrameBuilder::new();
        builder.add_spill_slot(); // 8 bytes, puts cursor at 8
        let idx = builder.add_object(4, 16);
        let frame = builder.build();
        assert_eq!(frame.object_offsets[idx] % 16, 0);
    }

    #[test]
    fn dynamic_scope_and_outgoing_args_land_after_objects() {
        let mut builder = StackFrameBuilder::new();
        builder.add_object(8, 8);
        builder.mark_dynamic_scope();
        builder.reserve_outgoing_args(32);
        let frame = builder.build();
        assert!(frame.dynamic_scope_offset().unwrap() >= frame.objects_region_end);
        assert!(frame.outgoing_args_offset() >= frame.dynamic_scope_offset().unwrap());
        assert_eq!(frame.total_size % 16, 0);
    }

    // spec.md §8.9: "For any used-callee-saved set and any locals
    // layout, top_of_frame % 16 == 0" — an odd number of preserved
    // registers (24 bytes, not 16-aligned on its own) must still land
    // the whole frame on a 16-byte boundary.
    #[test]
    fn odd_preserved_regs_count_still_yields_a_16_aligned_frame() {
        let mut builder = StackFrameBuilder::new();
        builder.add_spill_slot();
        builder.set_preserved_regs_size(24);
        let frame = builder.build();
        assert_eq!(frame.total_size % 16, 0);
        assert_eq!(frame.allocated, frame.total_size - 24);
    }

    // A spill slot must never alias a pushed callee-saved register: if
    // the prologue has already pushed 16 bytes of callee-saved regs,
    // spill slot 0 has to land at `[rbp-24]`, not `[rbp-8]` (which
    // would be the second pushed register).
    #[test]
    fn spill_slots_do_not_alias_preserved_registers() {
        let mut builder = StackFrameBuilder::new();
        builder.set_preserved_regs_size(16);
        let slot0 = builder.add_spill_slot();
        let slot1 = builder.add_spill_slot();
        let frame = builder.build();
        assert_eq!(frame.spill_slot_offset(slot0), 24);
        assert_eq!(frame.spill_slot_offset(slot1), 32);
        assert!(frame.spill_region_end() >= 32);
    }

    // spec.md §4.4: nearest-to-farthest from the saved rbp is
    // preserved_regs, then the local area, then the spill area — a
    // spill slot must sit farther from rbp than every local object, not
    // the other way around.
    #[test]
    fn spill_slots_sit_farther_from_rbp_than_locals() {
        let mut builder = StackFrameBuilder::new();
        let obj = builder.add_object(8, 8);
        let slot = builder.add_spill_slot();
        let frame = builder.build();
        assert!(frame.spill_slot_offset(slot) > frame.object_offset(obj));
        assert!(frame.spill_slot_offset(slot) >= frame.objects_region_end);
    }
}
