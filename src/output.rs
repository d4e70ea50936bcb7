//! Fixed-width text rendering of annotated disassembly.

use std::io::{self, Write};

use crate::config::OutputConfig;
use crate::disasm::decoder::Register;
use crate::disasm::registers::RegisterMap;
use crate::disasm::sweep::{DecodedInstruction, FunctionDisassembly};
use crate::symbols::{FunctionSymbol, LocationKind, VariableSymbol};

/// Placeholder text for bytes the decoder rejected
pub const INVALID_TEXT: &str = "(bad)";

pub struct DumpWriter<'c> {
    config: &'c OutputConfig,
    registers: RegisterMap,
}

impl<'c> DumpWriter<'c> {
    pub fn new(config: &'c OutputConfig, registers: RegisterMap) -> Self {
        Self { config, registers }
    }

    /// Write every function in order. `disassemblies[i]` belongs to
    /// `functions[i]`.
    pub fn write_all<W: Write>(
        &self,
        out: &mut W,
        functions: &[FunctionSymbol],
        disassemblies: &[FunctionDisassembly],
    ) -> io::Result<()> {
        for (function, disasm) in functions.iter().zip(disassemblies) {
            self.write_function(out, function, disasm)?;
        }
        out.flush()
    }

    pub fn write_function<W: Write>(
        &self,
        out: &mut W,
        function: &FunctionSymbol,
        disasm: &FunctionDisassembly,
    ) -> io::Result<()> {
        let start = disasm.address;
        let end = start.wrapping_add(function.length.saturating_sub(1));

        writeln!(out)?;
        writeln!(out, "{}", function.compiland)?;
        writeln!(out, "{}", function.name)?;
        writeln!(out, "0x{:016X} - 0x{:016X}", start, end)?;
        writeln!(out)?;

        if self.config.list_variables {
            for var in function.variables() {
                writeln!(out, "{}", self.describe_variable(var))?;
            }
        }

        for entry in &disasm.instructions {
            self.write_instruction(out, start, entry)?;
        }
        Ok(())
    }

    fn write_instruction<W: Write>(
        &self,
        out: &mut W,
        function_start: u64,
        entry: &DecodedInstruction,
    ) -> io::Result<()> {
        let text = entry
            .decoded
            .as_ref()
            .map_or(INVALID_TEXT, |insn| insn.text.as_str());

        let mut bytes = String::with_capacity(entry.bytes.len() * 3);
        for b in &entry.bytes {
            if self.config.uppercase_hex {
                bytes.push_str(&format!(" {:02X}", b));
            } else {
                bytes.push_str(&format!(" {:02x}", b));
            }
        }

        write!(
            out,
            "0x{:016X} {:<tw$}{:<bw$}",
            function_start.wrapping_add(entry.offset),
            text,
            bytes,
            tw = self.config.mnemonic_width,
            bw = self.config.bytes_width,
        )?;
        for note in &entry.annotations {
            write!(out, " {} ", note)?;
        }
        writeln!(out)
    }

    /// `; <role> <name> : <type> @ <location>`
    pub fn describe_variable(&self, var: &VariableSymbol) -> String {
        let ty = var
            .type_ref
            .as_ref()
            .map_or_else(|| "?".to_string(), |t| t.to_string());
        format!(
            "; {} {} : {} @ {}",
            var.role,
            var.name,
            ty,
            self.describe_location(var)
        )
    }

    fn register_name(&self, cv: u16) -> String {
        match self.registers.map(cv) {
            Register::None => format!("cv{}", cv),
            reg => format!("{:?}", reg).to_ascii_lowercase(),
        }
    }

    fn describe_location(&self, var: &VariableSymbol) -> String {
        match var.location {
            LocationKind::RegisterValue => self.register_name(var.register),
            LocationKind::RegisterRelative => format!(
                "[{} {} 0x{:x}]",
                self.register_name(var.register),
                if var.offset >= 0 { '+' } else { '-' },
                var.offset.unsigned_abs()
            ),
            LocationKind::StaticImageAddress => format!("rva 0x{:x}", var.offset),
            LocationKind::StaticSectionOffset => {
                format!("{:04x}:{:08x}", var.section, var.offset)
            }
            LocationKind::MemberOffset => format!("this + 0x{:x}", var.offset),
            LocationKind::Bitfield => format!("bit {}", var.section),
            LocationKind::ConstantValue => "constant".to_string(),
            LocationKind::Unknown => "unknown".to_string(),
        }
    }
}
