//! Target-specific lowering support. x86-64 SysV is the only target
//! this crate implements (spec.md §1: "targets the x86-64 SysV ABI").

pub mod amd64;
