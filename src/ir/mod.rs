//! The optimizer IR: module, function container, instructions, and
//! supporting entity/flag types (spec.md §3, §4.1).

pub mod atomic_rmw_op;
pub mod condcodes;
pub mod debug;
pub mod dfg;
pub mod entities;
pub mod function;
pub mod instructions;
pub mod memflags;
pub mod module;

pub use entities::{Block, CallDescId, FuncDecl, Inst, LocalVar, Phi};
pub use function::Function;
pub use instructions::{Immediate, InstData, Opcode, OverflowOp};
pub use memflags::{MemFlags, MemoryOrder};
pub use module::{FuncDeclData, IdentifierKind, Module, TlsEntry};
