//! Atomic read-modify-write operators, carried by `atomic_op` payloads
//! (spec.md §3).

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicRmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Max,
    Min,
    Umax,
    Umin,
}

impl fmt::Display for AtomicRmwOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AtomicRmwOp::Xchg => "xchg",
            AtomicRmwOp::Add => "add",
            AtomicRmwOp::Sub => "sub",
            AtomicRmwOp::And => "and",
            AtomicRmwOp::Nand => "nand",
            AtomicRmwOp::Or => "or",
            AtomicRmwOp::Xor => "xor",
            AtomicRmwOp::Max => "max",
            AtomicRmwOp::Min => "min",
            AtomicRmwOp::Umax => "umax",
            AtomicRmwOp::Umin => "umin",
        };
        f.write_str(s)
    }
}
