//! Instruction decoding and the per-function disassembly pipeline.
//!
//! - `decoder`: decoder trait and instruction model
//! - `iced`: iced-x86 backend for x86/x64
//! - `registers`: CodeView register numbers to decoder registers
//! - `sweep`: linear sweep with one-byte resynchronization
//! - `correlate`: operand-to-variable annotations

pub mod correlate;
pub mod decoder;
pub mod iced;
pub mod registers;
pub mod sweep;

pub use correlate::OperandCorrelator;
pub use decoder::{Category, DecodeError, Decoder, Instruction, MemoryOperand, Operand, Register};
pub use iced::IcedDecoder;
pub use registers::RegisterMap;
pub use sweep::{DecodedInstruction, FunctionDisassembly, LinearSweep};
