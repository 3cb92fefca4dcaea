//! Code generation: per-opcode lowering into the asmcmp stream, ABI-
//! driven call emission, thread-local address sequences, DWARF debug
//! info, and the textual assembly backend (spec.md §4.3, §4.5, §4.6,
//! §6).

pub mod calls;
pub mod dwarf;
pub mod lower;
pub mod module_emit;
pub mod tls;
pub mod xasmgen;
