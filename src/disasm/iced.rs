use iced_x86::{DecoderError, DecoderOptions, FlowControl, Formatter, IntelFormatter, OpKind};

use crate::disasm::decoder::{
    Category, DecodeError, DecodeResult, Decoder, Instruction, MemoryOperand, Operand,
};

pub struct IcedDecoder {
    bits: u32,
}

impl IcedDecoder {
    pub fn new(bits: u32) -> DecodeResult<Self> {
        match bits {
            16 | 32 | 64 => Ok(Self { bits }),
            other => Err(DecodeError::UnsupportedBitness(other)),
        }
    }

    fn formatter() -> IntelFormatter {
        let mut fmt = IntelFormatter::new();
        let opts = fmt.options_mut();
        opts.set_hex_prefix("0x");
        opts.set_hex_suffix("");
        opts.set_space_after_operand_separator(true);
        fmt
    }

    fn category(instr: &iced_x86::Instruction) -> Category {
        match instr.flow_control() {
            FlowControl::Return => Category::Return,
            FlowControl::Call | FlowControl::IndirectCall => Category::Call,
            FlowControl::UnconditionalBranch | FlowControl::IndirectBranch => Category::Branch,
            FlowControl::ConditionalBranch => Category::ConditionalBranch,
            FlowControl::Interrupt => Category::Interrupt,
            _ => Category::Other,
        }
    }

    /// Sign-extend the displacement according to the addressing size.
    fn displacement(instr: &iced_x86::Instruction, bits: u32) -> i64 {
        let base = instr.memory_base();
        let index = instr.memory_index();
        if base.is_gpr16() || index.is_gpr16() {
            instr.memory_displacement32() as u16 as i16 as i64
        } else if bits < 64 || base.is_gpr32() || index.is_gpr32() {
            instr.memory_displacement32() as i32 as i64
        } else {
            instr.memory_displacement64() as i64
        }
    }

    fn iced_operands(instr: &iced_x86::Instruction, bits: u32) -> Vec<Operand> {
        let mut out = Vec::new();
        for i in 0..instr.op_count() {
            match instr.op_kind(i) {
                OpKind::Register => out.push(Operand::Register {
                    reg: instr.op_register(i),
                }),
                OpKind::Memory => out.push(Operand::Memory(MemoryOperand {
                    base: instr.memory_base(),
                    index: instr.memory_index(),
                    scale: instr.memory_index_scale(),
                    displacement: Self::displacement(instr, bits),
                    displacement_width: instr.memory_displ_size(),
                    segment: instr.memory_segment(),
                })),
                OpKind::Immediate8 | OpKind::Immediate8_2nd => out.push(Operand::Immediate {
                    value: instr.immediate(i) as u8 as i8 as i64,
                    size: 8,
                }),
                OpKind::Immediate16 | OpKind::Immediate8to16 => out.push(Operand::Immediate {
                    value: instr.immediate(i) as u16 as i16 as i64,
                    size: 16,
                }),
                OpKind::Immediate32 | OpKind::Immediate8to32 => out.push(Operand::Immediate {
                    value: instr.immediate(i) as u32 as i32 as i64,
                    size: 32,
                }),
                OpKind::Immediate64 | OpKind::Immediate8to64 | OpKind::Immediate32to64 => {
                    out.push(Operand::Immediate {
                        value: instr.immediate(i) as i64,
                        size: 64,
                    })
                }
                OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
                    out.push(Operand::Branch {
                        target: instr.near_branch_target(),
                    })
                }
                OpKind::FarBranch16 | OpKind::FarBranch32 => out.push(Operand::Branch {
                    target: instr.far_branch32() as u64,
                }),
                // String instruction operands (MemorySegSI and friends) are
                // implicit and carry no displacement; skip them.
                _ => {}
            }
        }
        out
    }
}

impl Decoder for IcedDecoder {
    fn decode(&self, ip: u64, bytes: &[u8]) -> DecodeResult<Instruction> {
        let mut decoder = iced_x86::Decoder::try_with_ip(self.bits, bytes, ip, DecoderOptions::NONE)
            .map_err(|_| DecodeError::UnsupportedBitness(self.bits))?;

        let instr = decoder.decode();
        if instr.is_invalid() {
            return Err(match decoder.last_error() {
                DecoderError::NoMoreBytes => DecodeError::InsufficientBytes,
                _ => DecodeError::InvalidInstruction,
            });
        }

        let mut fmt = Self::formatter();
        let mut text = String::new();
        fmt.format(&instr, &mut text);
        let mut mnemonic = String::new();
        fmt.format_mnemonic(&instr, &mut mnemonic);

        Ok(Instruction {
            ip,
            length: instr.len(),
            mnemonic,
            text,
            operands: Self::iced_operands(&instr, self.bits),
            category: Self::category(&instr),
        })
    }

    fn max_instruction_length(&self) -> usize {
        15
    }

    fn bitness(&self) -> u32 {
        self.bits
    }

    fn name(&self) -> &str {
        "iced-x86"
    }
}
