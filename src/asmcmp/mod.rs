//! The near-machine intermediate form between optimized IR and
//! assembly text: instruction stream, virtual registers, liveness,
//! register allocation, and stack-frame layout (spec.md §4.4).

pub mod context;
pub mod liveness;
pub mod operand;
pub mod regalloc;
pub mod stack_frame;
pub mod vreg;

pub use context::{AsmContext, AsmInst, AsmOp, Label, StashId};
pub use liveness::{build_from_context, LivenessMap};
pub use operand::{LabelRef, Operand, OperandWidth, PhysReg, RelocationKind, Segment};
pub use regalloc::{allocate, Assignment, Stash};
pub use stack_frame::{StackFrame, StackFrameBuilder};
pub use vreg::{VReg, VRegClass, VRegTable};
