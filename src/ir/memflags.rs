//! Memory-access flags and atomic memory order, attached to load/store
//! and atomic instructions per spec.md §3 ("Memory ops record: ...
//! volatility, non-temporal hints, atomic memory order").
//!
//! Bitflag layout keeps the teacher's `MemFlags` shape (cranelift-codegen
//! `ir/memflags.rs`: a packed `bits: u8` with named accessors) but the
//! flag set itself is this spec's, not cranelift's heap/table/vmctx
//! alias-analysis bits.

use core::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

enum FlagBit {
    Volatile,
    NonTemporal,
}

const NAMES: [&str; 2] = ["volatile", "nontemporal"];

/// Flags carried by every `load_mem` / `store_mem` instruction.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct MemFlags {
    bits: u8,
}

impl MemFlags {
    pub fn new() -> Self {
        Self { bits: 0 }
    }

    fn read(self, bit: FlagBit) -> bool {
        self.bits & (1 << bit as usize) != 0
    }

    fn set(&mut self, bit: FlagBit) {
        self.bits |= 1 << bit as usize
    }

    pub fn set_by_name(&mut self, name: &str) -> bool {
        match NAMES.iter().position(|&s| s == name) {
            Some(bit) => {
                self.bits |= 1 << bit;
                true
            }
            None => false,
        }
    }

    /// Volatile accesses may not be reordered across one another or
    /// eliminated, matching spec.md §4.3 item 2 ("volatile → no
    /// reordering across").
    pub fn volatile(self) -> bool {
        self.read(FlagBit::Volatile)
    }

    pub fn set_volatile(&mut self) {
        self.set(FlagBit::Volatile)
    }

    pub fn with_volatile(mut self) -> Self {
        self.set_volatile();
        self
    }

    /// Non-temporal accesses lower to the NT store/load variant (spec.md
    /// §4.3 item 2: "non-temporal → NT store variant").
    pub fn non_temporal(self) -> bool {
        self.read(FlagBit::NonTemporal)
    }

    pub fn set_non_temporal(&mut self) {
        self.set(FlagBit::NonTemporal)
    }

    pub fn with_non_temporal(mut self) -> Self {
        self.set_non_temporal();
        self
    }
}

impl fmt::Display for MemFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, n) in NAMES.iter().enumerate() {
            if self.bits & (1 << i) != 0 {
                write!(f, " {}", n)?;
            }
        }
        Ok(())
    }
}

/// Memory ordering for atomic operations, per spec.md §4.1's per-opcode
/// builders: "the atomic and load/store variants take explicit ...
/// memory-order (relaxed, acquire, release, acq_rel, seq_cst)".
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum MemoryOrder {
    Relaxed,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

impl fmt::Display for MemoryOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            MemoryOrder::Relaxed => "relaxed",
            MemoryOrder::Acquire => "acquire",
            MemoryOrder::Release => "release",
            MemoryOrder::AcqRel => "acq_rel",
            MemoryOrder::SeqCst => "seq_cst",
        };
        f.write_str(s)
    }
}
