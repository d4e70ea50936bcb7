//! Decoder trait and the instruction model handed to the sweep and the
//! operand correlator.
//!
//! Registers are expressed in iced-x86's `Register` enumeration, which is the
//! common vocabulary between decoded operands and translated debug-info
//! registers.

use std::fmt;

pub use iced_x86::Register;

/// Errors that can occur while decoding one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Bytes do not form a valid instruction
    InvalidInstruction,
    /// Fewer bytes than the instruction needs
    InsufficientBytes,
    /// Decoder was asked for a mode other than 16, 32 or 64 bits
    UnsupportedBitness(u32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidInstruction => write!(f, "InvalidInstruction"),
            DecodeError::InsufficientBytes => write!(f, "InsufficientBytes"),
            DecodeError::UnsupportedBitness(b) => write!(f, "UnsupportedBitness({})", b),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result type for decoding operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Broad control-flow class of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Return,
    Call,
    Branch,
    ConditionalBranch,
    Interrupt,
    Other,
}

impl Category {
    pub fn is_return(self) -> bool {
        self == Category::Return
    }
}

/// Memory operand: `[segment: base + index*scale + displacement]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryOperand {
    pub base: Register,
    pub index: Register,
    pub scale: u32,
    /// Sign-extended displacement
    pub displacement: i64,
    /// Encoded displacement width in bytes; 0 when the encoding has none
    pub displacement_width: u32,
    pub segment: Register,
}

impl MemoryOperand {
    pub fn has_index(&self) -> bool {
        self.index != Register::None
    }

    pub fn has_displacement(&self) -> bool {
        self.displacement_width != 0
    }
}

/// Decoded operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Register { reg: Register },
    Memory(MemoryOperand),
    Immediate { value: i64, size: u8 },
    Branch { target: u64 },
}

/// A single decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Address the instruction was decoded at
    pub ip: u64,
    /// Encoded length in bytes
    pub length: usize,
    pub mnemonic: String,
    /// Full formatted text (mnemonic plus operands)
    pub text: String,
    pub operands: Vec<Operand>,
    pub category: Category,
}

impl Instruction {
    pub fn is_return(&self) -> bool {
        self.category.is_return()
    }

    /// Memory operands in operand order
    pub fn memory_operands(&self) -> impl Iterator<Item = &MemoryOperand> {
        self.operands.iter().filter_map(|op| match op {
            Operand::Memory(m) => Some(m),
            _ => None,
        })
    }
}

/// Instruction decoder for one processor mode
pub trait Decoder: Send + Sync {
    /// Decode the instruction at the start of `bytes`, which lives at `ip`.
    fn decode(&self, ip: u64, bytes: &[u8]) -> DecodeResult<Instruction>;

    /// Get the maximum instruction length for this architecture in bytes
    fn max_instruction_length(&self) -> usize;

    /// Processor mode in bits
    fn bitness(&self) -> u32;

    /// Get the name of this decoder backend
    fn name(&self) -> &str;
}
