//! Translation of CodeView register numbers (as found in PDB symbol records)
//! into the decoder's register enumeration.
//!
//! The x86 and AMD64 numbering schemes agree on the legacy registers but
//! diverge from 252 upwards: x86 puts YMM0-7 there, AMD64 puts XMM8-15 there
//! and adds the REX registers above 324. A map is therefore chosen by the
//! image's bitness.

use crate::disasm::decoder::Register;

/// CodeView register numbering scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterMap {
    X86,
    Amd64,
}

impl RegisterMap {
    pub fn for_bitness(bits: u32) -> Self {
        if bits == 64 {
            RegisterMap::Amd64
        } else {
            RegisterMap::X86
        }
    }

    /// Decoder register for a CodeView register number, or
    /// [`Register::None`] when the register has no decoder counterpart
    /// (flags, descriptor-table registers, MMX, x87 control words, ...).
    pub fn map(self, cv: u16) -> Register {
        if let Some(reg) = common(cv) {
            return reg;
        }
        match self {
            RegisterMap::X86 => x86_only(cv),
            RegisterMap::Amd64 => amd64_only(cv),
        }
    }

    /// CodeView number of the frame pointer used by `S_BPREL32` records
    pub fn frame_pointer(self) -> u16 {
        match self {
            RegisterMap::X86 => 22, // EBP
            RegisterMap::Amd64 => 334, // RBP
        }
    }
}

fn common(cv: u16) -> Option<Register> {
    let reg = match cv {
        1 => Register::AL,
        2 => Register::CL,
        3 => Register::DL,
        4 => Register::BL,
        5 => Register::AH,
        6 => Register::CH,
        7 => Register::DH,
        8 => Register::BH,
        9 => Register::AX,
        10 => Register::CX,
        11 => Register::DX,
        12 => Register::BX,
        13 => Register::SP,
        14 => Register::BP,
        15 => Register::SI,
        16 => Register::DI,
        17 => Register::EAX,
        18 => Register::ECX,
        19 => Register::EDX,
        20 => Register::EBX,
        21 => Register::ESP,
        22 => Register::EBP,
        23 => Register::ESI,
        24 => Register::EDI,
        25 => Register::ES,
        26 => Register::CS,
        27 => Register::SS,
        28 => Register::DS,
        29 => Register::FS,
        30 => Register::GS,
        80 => Register::CR0,
        81 => Register::CR1,
        82 => Register::CR2,
        83 => Register::CR3,
        84 => Register::CR4,
        90 => Register::DR0,
        91 => Register::DR1,
        92 => Register::DR2,
        93 => Register::DR3,
        94 => Register::DR4,
        95 => Register::DR5,
        96 => Register::DR6,
        97 => Register::DR7,
        128 => Register::ST0,
        129 => Register::ST1,
        130 => Register::ST2,
        131 => Register::ST3,
        132 => Register::ST4,
        133 => Register::ST5,
        134 => Register::ST6,
        135 => Register::ST7,
        154 => Register::XMM0,
        155 => Register::XMM1,
        156 => Register::XMM2,
        157 => Register::XMM3,
        158 => Register::XMM4,
        159 => Register::XMM5,
        160 => Register::XMM6,
        161 => Register::XMM7,
        _ => return None,
    };
    Some(reg)
}

fn x86_only(cv: u16) -> Register {
    match cv {
        33 => Register::EIP,
        252 => Register::YMM0,
        253 => Register::YMM1,
        254 => Register::YMM2,
        255 => Register::YMM3,
        256 => Register::YMM4,
        257 => Register::YMM5,
        258 => Register::YMM6,
        259 => Register::YMM7,
        _ => Register::None,
    }
}

fn amd64_only(cv: u16) -> Register {
    match cv {
        33 => Register::RIP,
        88 => Register::CR8,
        98 => Register::DR8,
        99 => Register::DR9,
        100 => Register::DR10,
        101 => Register::DR11,
        102 => Register::DR12,
        103 => Register::DR13,
        104 => Register::DR14,
        105 => Register::DR15,
        252 => Register::XMM8,
        253 => Register::XMM9,
        254 => Register::XMM10,
        255 => Register::XMM11,
        256 => Register::XMM12,
        257 => Register::XMM13,
        258 => Register::XMM14,
        259 => Register::XMM15,
        324 => Register::SIL,
        325 => Register::DIL,
        326 => Register::BPL,
        327 => Register::SPL,
        328 => Register::RAX,
        329 => Register::RBX,
        330 => Register::RCX,
        331 => Register::RDX,
        332 => Register::RSI,
        333 => Register::RDI,
        334 => Register::RBP,
        335 => Register::RSP,
        336 => Register::R8,
        337 => Register::R9,
        338 => Register::R10,
        339 => Register::R11,
        340 => Register::R12,
        341 => Register::R13,
        342 => Register::R14,
        343 => Register::R15,
        344 => Register::R8L,
        345 => Register::R9L,
        346 => Register::R10L,
        347 => Register::R11L,
        348 => Register::R12L,
        349 => Register::R13L,
        350 => Register::R14L,
        351 => Register::R15L,
        352 => Register::R8W,
        353 => Register::R9W,
        354 => Register::R10W,
        355 => Register::R11W,
        356 => Register::R12W,
        357 => Register::R13W,
        358 => Register::R14W,
        359 => Register::R15W,
        360 => Register::R8D,
        361 => Register::R9D,
        362 => Register::R10D,
        363 => Register::R11D,
        364 => Register::R12D,
        365 => Register::R13D,
        366 => Register::R14D,
        367 => Register::R15D,
        368..=383 => ymm(cv - 368),
        _ => Register::None,
    }
}

fn ymm(n: u16) -> Register {
    const YMM: [Register; 16] = [
        Register::YMM0,
        Register::YMM1,
        Register::YMM2,
        Register::YMM3,
        Register::YMM4,
        Register::YMM5,
        Register::YMM6,
        Register::YMM7,
        Register::YMM8,
        Register::YMM9,
        Register::YMM10,
        Register::YMM11,
        Register::YMM12,
        Register::YMM13,
        Register::YMM14,
        Register::YMM15,
    ];
    YMM.get(n as usize).copied().unwrap_or(Register::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_registers_agree_across_maps() {
        for map in [RegisterMap::X86, RegisterMap::Amd64] {
            assert_eq!(map.map(17), Register::EAX);
            assert_eq!(map.map(22), Register::EBP);
            assert_eq!(map.map(1), Register::AL);
            assert_eq!(map.map(8), Register::BH);
            assert_eq!(map.map(27), Register::SS);
            assert_eq!(map.map(154), Register::XMM0);
            assert_eq!(map.map(135), Register::ST7);
        }
    }

    #[test]
    fn amd64_general_purpose_registers() {
        let map = RegisterMap::Amd64;
        assert_eq!(map.map(328), Register::RAX);
        assert_eq!(map.map(334), Register::RBP);
        assert_eq!(map.map(335), Register::RSP);
        assert_eq!(map.map(343), Register::R15);
        assert_eq!(map.map(344), Register::R8L);
        assert_eq!(map.map(359), Register::R15W);
        assert_eq!(map.map(360), Register::R8D);
        assert_eq!(map.map(326), Register::BPL);
        assert_eq!(map.map(33), Register::RIP);
        assert_eq!(map.map(383), Register::YMM15);
    }

    #[test]
    fn overlapping_numbers_follow_bitness() {
        assert_eq!(RegisterMap::X86.map(252), Register::YMM0);
        assert_eq!(RegisterMap::Amd64.map(252), Register::XMM8);
        assert_eq!(RegisterMap::X86.map(33), Register::EIP);
        assert_eq!(RegisterMap::X86.map(328), Register::None);
        assert_eq!(RegisterMap::X86.map(88), Register::None);
        assert_eq!(RegisterMap::Amd64.map(88), Register::CR8);
    }

    #[test]
    fn unrepresentable_registers_map_to_none() {
        for map in [RegisterMap::X86, RegisterMap::Amd64] {
            // NONE, IP, FLAGS, EFLAGS, CR5, GDTR, TR, MM0, MXCSR, out of range
            for cv in [0, 31, 32, 34, 85, 110, 115, 146, 211, 9999] {
                assert_eq!(map.map(cv), Register::None, "cv {}", cv);
            }
        }
    }

    #[test]
    fn selection_and_frame_pointer() {
        assert_eq!(RegisterMap::for_bitness(64), RegisterMap::Amd64);
        assert_eq!(RegisterMap::for_bitness(32), RegisterMap::X86);
        assert_eq!(
            RegisterMap::X86.map(RegisterMap::X86.frame_pointer()),
            Register::EBP
        );
        assert_eq!(
            RegisterMap::Amd64.map(RegisterMap::Amd64.frame_pointer()),
            Register::RBP
        );
    }
}
