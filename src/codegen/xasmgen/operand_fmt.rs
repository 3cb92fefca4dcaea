//! Operand-text helpers shared by the Intel and AT&T dialects (spec.md
//! §4.6): register names, size suffixes, and displacement formatting.

use crate::asmcmp::PhysReg;

pub fn register_name(reg: PhysReg) -> &'static str {
    match reg {
        PhysReg::Rax => "rax", PhysReg::Rbx => "rbx", PhysReg::Rcx => "rcx",
        PhysReg::Rdx => "rdx", PhysReg::Rsi => "rsi", PhysReg::Rdi => "rdi",
        PhysReg::Rbp => "rbp", PhysReg::Rsp => "rsp",
        PhysReg::R8 => "r8", PhysReg::R9 => "r9", PhysReg::R10 => "r10",
        PhysReg::R11 => "r11", PhysReg::R12 => "r12", PhysReg::R13 => "r13",
        PhysReg::R14 => "r14", PhysReg::R15 => "r15",
        PhysReg::Xmm(n) => xmm_name(n),
    }
}

fn xmm_name(n: u8) -> &'static str {
    const NAMES: [&str; 16] = [
        "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
        "xmm8", "xmm9", "xmm10", "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
    ];
    NAMES[n as usize]
}

/// `0x10` for a positive displacement, `-0x10` for a negative one —
/// both dialects format hex displacements the same way.
pub fn format_displacement(disp: i64) -> String {
    if disp < 0 {
        format!("-0x{:x}", -disp)
    } else {
        format!("0x{disp:x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_displacement_keeps_its_sign() {
        assert_eq!(format_displacement(-8), "-0x8");
        assert_eq!(format_displacement(16), "0x10");
    }

    #[test]
    fn xmm_names_cover_the_full_sse_register_file() {
        assert_eq!(register_name(PhysReg::Xmm(15)), "xmm15");
    }
}
