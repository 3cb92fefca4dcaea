//! Linear-scan register allocation over the asmcmp liveness map
//! (spec.md §4.4 "Register allocator").
//!
//! Grounded on cranelift-codegen's historical linear-scan allocator
//! shape (sort by start position, maintain an active set sorted by
//! end, expire-then-assign) generalized to this crate's stash/pinning
//! constraints, which `regalloc2`-style allocators do not model
//! directly.

use crate::asmcmp::liveness::{LivenessMap, Range};
use crate::asmcmp::operand::PhysReg;
use crate::asmcmp::vreg::{VReg, VRegClass, VRegTable};
use std::collections::HashMap;

/// Where the allocator ultimately placed a virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Register(PhysReg),
    /// A dense, class-independent spill-slot index; the frame layout
    /// maps this to a concrete rbp-relative offset.
    Spill(u32),
}

/// A call site's register stash: the physical registers that must not
/// hold a live value across `call_position` (spec.md §4.4 item (b)).
#[derive(Debug, Clone)]
pub struct Stash {
    pub regs: Vec<PhysReg>,
    pub call_position: u64,
}

const GP_POOL: [PhysReg; 13] = [
    PhysReg::Rax, PhysReg::Rcx, PhysReg::Rdx, PhysReg::Rsi, PhysReg::Rdi,
    PhysReg::R8, PhysReg::R9, PhysReg::R10, PhysReg::R11,
    PhysReg::Rbx, PhysReg::R12, PhysReg::R13, PhysReg::R14,
];

fn sse_pool() -> Vec<PhysReg> {
    (0..16).map(PhysReg::Xmm).collect()
}

fn pool_for(class: VRegClass) -> Vec<PhysReg> {
    match class {
        VRegClass::GeneralPurpose => GP_POOL.to_vec(),
        VRegClass::FloatingPoint => sse_pool(),
        VRegClass::SpillSlot | VRegClass::DirectSpill => Vec::new(),
    }
}

struct ActiveEntry {
    vreg: VReg,
    range: Range,
    reg: PhysReg,
}

/// Assigns every virtual register in `vregs` an [`Assignment`], given
/// its liveness and the function's register stashes.
pub fn allocate(
    vregs: &VRegTable,
    liveness: &LivenessMap,
    stashes: &[Stash],
) -> HashMap<VReg, Assignment> {
    let mut result = HashMap::new();
    let mut next_spill_slot = 0u32;

    let mut order: Vec<(VReg, Range)> = Vec::new();
    for vreg in vregs.iter() {
        match vregs.class(vreg) {
            VRegClass::SpillSlot | VRegClass::DirectSpill => {
                result.insert(vreg, Assignment::Spill(next_spill_slot));
                next_spill_slot += 1;
            }
            VRegClass::GeneralPurpose | VRegClass::FloatingPoint => {
                if let Some(range) = liveness.global_range(vreg) {
                    order.push((vreg, range));
                }
            }
        }
    }
    order.sort_by_key(|(_, r)| r.begin);

    let mut active: HashMap<VRegClass, Vec<ActiveEntry>> = HashMap::new();
    active.insert(VRegClass::GeneralPurpose, Vec::new());
    active.insert(VRegClass::FloatingPoint, Vec::new());

    for (vreg, range) in order {
        let class = vregs.class(vreg);
        let entries = active.get_mut(&class).unwrap();
        entries.retain(|e| e.range.end > range.begin);

        if let Some(pinned) = vregs.requirement(vreg) {
            result.insert(vreg, Assignment::Register(pinned));
            entries.push(ActiveEntry { vreg, range, reg: pinned });
            continue;
        }

        let forbidden: Vec<PhysReg> = stashes
            .iter()
            .filter(|s| range.begin <= s.call_position && s.call_position < range.end)
            .flat_map(|s| s.regs.iter().copied())
            .collect();

        let used: Vec<PhysReg> = entries.iter().map(|e| e.reg).collect();
        let pool = pool_for(class);
        let free_reg = pool
            .iter()
            .copied()
            .find(|r| !used.contains(r) && !forbidden.contains(r));

        if let Some(reg) = free_reg {
            result.insert(vreg, Assignment::Register(reg));
            entries.push(ActiveEntry { vreg, range, reg });
            continue;
        }

        // No free register: evict whichever active entry of this class
        // ends furthest in the future, if that is later than `range`
        // itself ends (classic linear-scan spill heuristic); prefer to
        // keep callee-saved registers occupied since their caller
        // already paid the save/restore cost in the prologue.
        let evict_idx = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !forbidden.contains(&e.reg))
            .max_by_key(|(_, e)| (e.range.end, !e.reg.is_callee_saved()))
            .map(|(i, _)| i);

        match evict_idx {
            Some(idx) if entries[idx].range.end > range.end => {
                let evicted = entries.remove(idx);
                result.insert(evicted.vreg, Assignment::Spill(next_spill_slot));
                next_spill_slot += 1;
                result.insert(vreg, Assignment::Register(evicted.reg));
                entries.push(ActiveEntry {
                    vreg,
                    range,
                    reg: evicted.reg,
                });
            }
            _ => {
                result.insert(vreg, Assignment::Spill(next_spill_slot));
                next_spill_slot += 1;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_ranges_can_share_a_register() {
        let mut vregs = VRegTable::new();
        let a = vregs.make(VRegClass::GeneralPurpose);
        let b = vregs.make(VRegClass::GeneralPurpose);
        let mut liveness = LivenessMap::new();
        liveness.mark(a, 0, 5);
        liveness.mark(b, 10, 15);
        let result = allocate(&vregs, &liveness, &[]);
        match (result[&a], result[&b]) {
            (Assignment::Register(ra), Assignment::Register(rb)) => assert_eq!(ra, rb),
            other => panic!("expected both registers, got {other:?}"),
        }
    }

    #[test]
    fn spill_slot_class_never_touches_the_register_pool() {
        let mut vregs = VRegTable::new();
        let a = vregs.make(VRegClass::DirectSpill);
        let liveness = LivenessMap::new();
        let result = allocate(&vregs, &liveness, &[]);
        assert!(matches!(result[&a], Assignment::Spill(_)));
    }

    #[test]
    fn pinned_vreg_keeps_its_required_register() {
        let mut vregs = VRegTable::new();
        let a = vregs.make(VRegClass::GeneralPurpose);
        vregs.set_requirement(a, PhysReg::Rax);
        let mut liveness = LivenessMap::new();
        liveness.mark(a, 0, 10);
        let result = allocate(&vregs, &liveness, &[]);
        assert_eq!(result[&a], Assignment::Register(PhysReg::Rax));
    }

    #[test]
    fn overlapping_live_ranges_get_distinct_registers() {
        let mut vregs = VRegTable::new();
        let a = vregs.make(VRegClass::GeneralPurpose);
        let b = vregs.make(VRegClass::GeneralPurpose);
        let mut liveness = LivenessMap::new();
        liveness.mark(a, 0, 20);
        liveness.mark(b, 5, 10);
        let result = allocate(&vregs, &liveness, &[]);
        match (result[&a], result[&b]) {
            (Assignment::Register(ra), Assignment::Register(rb)) => assert_ne!(ra, rb),
            other => panic!("expected both registers, got {other:?}"),
        }
    }
}
