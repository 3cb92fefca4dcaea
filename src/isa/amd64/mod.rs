//! x86-64 SysV target: type layout and argument/return classification
//! (spec.md §4.5).

pub mod abi;
pub mod layout;
