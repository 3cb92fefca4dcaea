//! Per-virtual-register liveness: a global activity range widened by
//! marks, plus a set of piecewise active ranges merged on insertion
//! (spec.md §4.4 "Liveness map", §8.7 "Liveness merge").
//!
//! Grounded on `original_source/source/codegen/asmcmp/liveness.c`'s
//! widen-then-merge algorithm, implemented here over
//! [`crate::util::hashtree::HashTree`] rather than the source's
//! intrusive tree, per DESIGN.md's util module grounding. The outer
//! per-vreg table uses `rustc-hash`'s `FxHashMap`, the same
//! non-cryptographic hasher cranelift-codegen reaches for on its own
//! dense, integer-keyed regalloc maps.

use crate::asmcmp::vreg::VReg;
use crate::util::hashtree::HashTree;
use rustc_hash::FxHashMap;

/// An inclusive-exclusive asmcmp-position range `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub begin: u64,
    pub end: u64,
}

struct VRegLiveness {
    global: Option<Range>,
    /// Keyed by `begin`, value is `end`; merged so that no two entries
    /// overlap or touch (spec.md §4.4: "Inserting a new range merges
    /// with its lower-bound predecessor if overlapping and with any
    /// successor whose begin <= predecessor's end").
    active: HashTree<u64, u64>,
}

impl Default for VRegLiveness {
    fn default() -> Self {
        VRegLiveness {
            global: None,
            active: HashTree::new(),
        }
    }
}

/// The liveness map over every virtual register in one function's
/// asmcmp stream.
#[derive(Default)]
pub struct LivenessMap {
    per_vreg: FxHashMap<VReg, VRegLiveness>,
}

impl LivenessMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `[begin, end)` as live for `vreg`: widens the global range
    /// and merges the piecewise active-range set.
    pub fn mark(&mut self, vreg: VReg, begin: u64, end: u64) {
        let entry = self.per_vreg.entry(vreg).or_default();
        entry.global = Some(match entry.global {
            None => Range { begin, end },
            Some(g) => Range {
                begin: g.begin.min(begin),
                end: g.end.max(end),
            },
        });

        let mut new_begin = begin;
        let mut new_end = end;

        if let Ok((&k, &v)) = entry.active.lower_bound(&new_begin) {
            if v >= new_begin {
                new_begin = new_begin.min(k);
                new_end = new_end.max(v);
                entry.active.delete(&k).expect("entry just found by lower_bound");
            }
        }
        loop {
            let Some((&k, &v)) = entry.active.next_node(&new_begin) else {
                break;
            };
            if k > new_end {
                break;
            }
            new_end = new_end.max(v);
            entry.active.delete(&k).expect("entry just found");
        }
        entry
            .active
            .insert(new_begin, new_end)
            .expect("merged range cannot collide after overlap removal");
    }

    /// The global `[min begin, max end)` range marked for `vreg`, if
    /// any.
    pub fn global_range(&self, vreg: VReg) -> Option<Range> {
        self.per_vreg.get(&vreg).and_then(|e| e.global)
    }

    /// The merged active range containing position `p`, or `None` if
    /// `p` falls in a hole (spec.md §4.4 query semantics).
    pub fn active_range(&self, vreg: VReg, p: u64) -> Option<Range> {
        let entry = self.per_vreg.get(&vreg)?;
        let (&begin, &end) = entry.active.lower_bound(&p).ok()?;
        if p < end {
            Some(Range { begin, end })
        } else {
            None
        }
    }
}

/// Builds a [`LivenessMap`] for every virtual register an asmcmp
/// stream mentions, by marking `[pos, pos + 1)` at each position that
/// references it (spec.md §4.3 item 5: the register allocator consumes
/// this directly after lowering; no separate dataflow pass is needed
/// since a vreg's def and every use already appear as stream
/// positions).
pub fn build_from_context(ctx: &crate::asmcmp::AsmContext) -> LivenessMap {
    let mut map = LivenessMap::new();
    for (pos, _) in ctx.iter() {
        for vreg in ctx.operand_vregs(pos) {
            map.mark(vreg, pos as u64, pos as u64 + 1);
        }
    }
    map
}

#[cfg(test)]
mod build_from_context_tests {
    use super::*;
    use crate::asmcmp::context::{AsmContext, AsmOp};
    use crate::asmcmp::operand::Operand;
    use crate::asmcmp::vreg::{VRegClass, VRegTable};

    #[test]
    fn spans_from_first_def_to_last_use() {
        let mut ctx = AsmContext::new();
        let mut vregs = VRegTable::new();
        let v = vregs.make(VRegClass::GeneralPurpose);
        ctx.push(AsmOp::MovImm, vec![Operand::Virtual(v), Operand::ImmSigned(1)]);
        ctx.push(AsmOp::Nop, vec![]);
        ctx.push(AsmOp::Ret, vec![Operand::Virtual(v)]);
        let map = build_from_context(&ctx);
        assert_eq!(map.global_range(v), Some(Range { begin: 0, end: 3 }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn overlapping_ranges_merge_into_one() {
        let mut map = LivenessMap::new();
        let v = VReg::new(0);
        map.mark(v, 0, 5);
        map.mark(v, 3, 10);
        assert_eq!(map.active_range(v, 4), Some(Range { begin: 0, end: 10 }));
        assert_eq!(map.global_range(v), Some(Range { begin: 0, end: 10 }));
    }

    #[test]
    fn disjoint_ranges_leave_a_hole() {
        let mut map = LivenessMap::new();
        let v = VReg::new(0);
        map.mark(v, 0, 5);
        map.mark(v, 10, 15);
        assert_eq!(map.active_range(v, 7), None);
        assert_eq!(map.active_range(v, 12), Some(Range { begin: 10, end: 15 }));
        assert_eq!(map.global_range(v), Some(Range { begin: 0, end: 15 }));
    }

    #[test]
    fn a_bridging_range_merges_both_neighbors_at_once() {
        let mut map = LivenessMap::new();
        let v = VReg::new(0);
        map.mark(v, 0, 5);
        map.mark(v, 10, 15);
        map.mark(v, 4, 11);
        assert_eq!(map.active_range(v, 0), Some(Range { begin: 0, end: 15 }));
        assert_eq!(map.active_range(v, 14), Some(Range { begin: 0, end: 15 }));
    }
}
