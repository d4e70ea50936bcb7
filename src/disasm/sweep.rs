//! Linear sweep over a function's declared byte range.
//!
//! Decoding starts at the first byte and walks forward. When the decoder
//! rejects the bytes at the cursor, a one-byte invalid marker is emitted and
//! decoding resumes at the next byte. No control flow is followed.

use tracing::{trace, warn};

use crate::config::SweepConfig;
use crate::disasm::decoder::{Decoder, Instruction};
use crate::symbols::FunctionSymbol;

/// Longest x86 instruction encoding
pub const MAX_INSTRUCTION_WIDTH: usize = 15;

/// End each function at its first return instruction
pub const STOP_AT_FIRST_RETURN: bool = true;

/// One step of the sweep: a decoded instruction or an invalid byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Offset from the function start
    pub offset: u64,
    /// Exactly the bytes this entry consumed
    pub bytes: Vec<u8>,
    /// `None` marks an undecodable byte; `bytes` then holds that single byte
    pub decoded: Option<Instruction>,
    /// Variable annotations attached after correlation
    pub annotations: Vec<String>,
}

impl DecodedInstruction {
    pub fn is_valid(&self) -> bool {
        self.decoded.is_some()
    }
}

/// Instructions of one function, in address order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionDisassembly {
    /// Virtual address of the first byte
    pub address: u64,
    pub instructions: Vec<DecodedInstruction>,
}

impl FunctionDisassembly {
    pub fn invalid_count(&self) -> usize {
        self.instructions.iter().filter(|i| !i.is_valid()).count()
    }

    /// Total bytes consumed by the sweep
    pub fn consumed(&self) -> u64 {
        self.instructions.iter().map(|i| i.bytes.len() as u64).sum()
    }
}

/// Linear sweep driver over a decoder
pub struct LinearSweep<'d> {
    decoder: &'d dyn Decoder,
    config: SweepConfig,
}

impl<'d> LinearSweep<'d> {
    pub fn new(decoder: &'d dyn Decoder, config: SweepConfig) -> Self {
        Self { decoder, config }
    }

    /// Decode `code`, the bytes of `function`, which starts at virtual
    /// address `address`.
    ///
    /// `code` may be shorter than the declared length when the image ends
    /// early; the sweep stops at whichever comes first.
    pub fn disassemble(
        &self,
        function: &FunctionSymbol,
        code: &[u8],
        address: u64,
    ) -> FunctionDisassembly {
        let width = self
            .config
            .max_instruction_width
            .clamp(1, self.decoder.max_instruction_length().max(1));
        let length = usize::try_from(function.length)
            .unwrap_or(usize::MAX)
            .min(code.len());

        let mut instructions = Vec::new();
        let mut cursor = 0usize;

        while cursor < length {
            let window = &code[cursor..length.min(cursor + width)];
            let ip = address.wrapping_add(cursor as u64);

            match self.decoder.decode(ip, window) {
                Ok(insn) => {
                    let len = insn.length.clamp(1, window.len());
                    let stop = self.config.stop_at_return && insn.is_return();
                    trace!(offset = cursor, len, text = %insn.text, "Decoded");
                    instructions.push(DecodedInstruction {
                        offset: cursor as u64,
                        bytes: window[..len].to_vec(),
                        decoded: Some(insn),
                        annotations: Vec::new(),
                    });
                    cursor += len;
                    if stop {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        compiland = %function.compiland,
                        function = %function.name,
                        offset = cursor,
                        bytes = %hex::encode(window),
                        error = %err,
                        "Invalid instruction"
                    );
                    instructions.push(DecodedInstruction {
                        offset: cursor as u64,
                        bytes: window[..1].to_vec(),
                        decoded: None,
                        annotations: Vec::new(),
                    });
                    cursor += 1;
                }
            }
        }

        FunctionDisassembly {
            address,
            instructions,
        }
    }
}
