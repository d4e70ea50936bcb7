//! Matching of decoded operands against variable locations.
//!
//! Register operands are compared with register-resident locals. Memory
//! operands of the plain `[base + disp]` form are compared with
//! frame-relative locals and parameters. Anything that would need data-flow
//! knowledge (indexed addressing, no displacement) is left alone.

use crate::config::CorrelateConfig;
use crate::disasm::decoder::{Instruction, MemoryOperand, Operand, Register};
use crate::disasm::registers::RegisterMap;
use crate::disasm::sweep::FunctionDisassembly;
use crate::symbols::{FunctionSymbol, LocationKind, VariableSymbol};

/// Stop looking at memory operands after the first one that names a variable
pub const FIRST_MEMORY_MATCH_ONLY: bool = true;

pub struct OperandCorrelator {
    registers: RegisterMap,
    first_memory_match_only: bool,
}

impl OperandCorrelator {
    pub fn new(registers: RegisterMap, config: &CorrelateConfig) -> Self {
        Self {
            registers,
            first_memory_match_only: config.first_memory_match_only,
        }
    }

    /// Annotations for one instruction, register matches first, then memory
    /// matches.
    pub fn annotate(&self, insn: &Instruction, function: &FunctionSymbol) -> Vec<String> {
        let mut notes = Vec::new();

        for op in &insn.operands {
            if let Operand::Register { reg } = op {
                if let Some(var) = self.register_local(*reg, function) {
                    notes.push(format!("{:?} = {}", reg, var.name));
                }
            }
        }

        for mem in insn.memory_operands() {
            if mem.has_index() || !mem.has_displacement() {
                continue;
            }
            if let Some(var) = self.frame_variable(mem, function) {
                notes.push(format!(
                    "{} {} 0x{:x} = {}",
                    format!("{:?}", mem.base).to_ascii_lowercase(),
                    if mem.displacement >= 0 { '+' } else { '-' },
                    mem.displacement.unsigned_abs(),
                    var.name
                ));
                if self.first_memory_match_only {
                    break;
                }
            }
        }

        notes
    }

    /// Annotate every valid instruction of a function in place.
    pub fn annotate_function(&self, disasm: &mut FunctionDisassembly, function: &FunctionSymbol) {
        for entry in &mut disasm.instructions {
            if let Some(insn) = &entry.decoded {
                entry.annotations = self.annotate(insn, function);
            }
        }
    }

    /// First local held in `reg`. Parameters are not considered.
    fn register_local<'f>(
        &self,
        reg: Register,
        function: &'f FunctionSymbol,
    ) -> Option<&'f VariableSymbol> {
        if reg == Register::None {
            return None;
        }
        function.locals.iter().find(|var| {
            var.location == LocationKind::RegisterValue && self.registers.map(var.register) == reg
        })
    }

    /// First local, then parameter, stored at `[base + displacement]`.
    fn frame_variable<'f>(
        &self,
        mem: &MemoryOperand,
        function: &'f FunctionSymbol,
    ) -> Option<&'f VariableSymbol> {
        if mem.base == Register::None {
            return None;
        }
        function
            .locals
            .iter()
            .chain(function.parameters.iter())
            .find(|var| {
                var.location == LocationKind::RegisterRelative
                    && var.offset == mem.displacement
                    && self.registers.map(var.register) == mem.base
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::decoder::Category;
    use crate::symbols::VariableRole;

    const CV_RAX: u16 = 328;
    const CV_RBP: u16 = 334;

    fn var(
        name: &str,
        role: VariableRole,
        location: LocationKind,
        register: u16,
        offset: i64,
    ) -> VariableSymbol {
        VariableSymbol {
            name: name.into(),
            role,
            location,
            register,
            offset,
            section: 0,
            size_bits: 32,
            type_ref: None,
        }
    }

    fn function(parameters: Vec<VariableSymbol>, locals: Vec<VariableSymbol>) -> FunctionSymbol {
        FunctionSymbol {
            compiland: "c.obj".into(),
            name: "f".into(),
            rva: 0x1000,
            length: 0x40,
            parameters,
            locals,
        }
    }

    fn mem(base: Register, displacement: i64) -> Operand {
        Operand::Memory(MemoryOperand {
            base,
            index: Register::None,
            scale: 1,
            displacement,
            displacement_width: 1,
            segment: Register::SS,
        })
    }

    fn insn(operands: Vec<Operand>) -> Instruction {
        Instruction {
            ip: 0,
            length: 4,
            mnemonic: "mov".into(),
            text: "mov".into(),
            operands,
            category: Category::Other,
        }
    }

    fn correlator() -> OperandCorrelator {
        OperandCorrelator::new(RegisterMap::Amd64, &CorrelateConfig::default())
    }

    #[test]
    fn register_operand_matches_register_local() {
        let f = function(
            vec![],
            vec![var("x", VariableRole::Local, LocationKind::RegisterValue, CV_RAX, 0)],
        );
        let c = correlator();

        let notes = c.annotate(&insn(vec![Operand::Register { reg: Register::RAX }]), &f);
        assert_eq!(notes, vec!["RAX = x"]);

        let notes = c.annotate(&insn(vec![Operand::Register { reg: Register::RCX }]), &f);
        assert!(notes.is_empty());
    }

    #[test]
    fn register_parameters_are_not_matched() {
        let f = function(
            vec![var("p", VariableRole::Parameter, LocationKind::RegisterValue, CV_RAX, 0)],
            vec![],
        );
        let rax = insn(vec![Operand::Register { reg: Register::RAX }]);
        assert!(correlator().annotate(&rax, &f).is_empty());
    }

    #[test]
    fn frame_relative_local_matches_exact_offset() {
        let f = function(
            vec![],
            vec![var("y", VariableRole::Local, LocationKind::RegisterRelative, CV_RBP, -8)],
        );
        let c = correlator();

        let notes = c.annotate(&insn(vec![mem(Register::RBP, -8)]), &f);
        assert_eq!(notes, vec!["rbp - 0x8 = y"]);

        let notes = c.annotate(&insn(vec![mem(Register::RBP, -16)]), &f);
        assert!(notes.is_empty());
    }

    #[test]
    fn parameters_match_memory_after_locals() {
        let f = function(
            vec![
                var("argc", VariableRole::Parameter, LocationKind::RegisterRelative, CV_RBP, 0x10),
                var("shadow", VariableRole::Parameter, LocationKind::RegisterRelative, CV_RBP, -4),
            ],
            vec![var("local", VariableRole::Local, LocationKind::RegisterRelative, CV_RBP, -4)],
        );
        let c = correlator();
        assert_eq!(
            c.annotate(&insn(vec![mem(Register::RBP, 0x10)]), &f),
            vec!["rbp + 0x10 = argc"]
        );
        assert_eq!(
            c.annotate(&insn(vec![mem(Register::RBP, -4)]), &f),
            vec!["rbp - 0x4 = local"]
        );
    }

    #[test]
    fn only_first_memory_match_is_reported() {
        let f = function(
            vec![],
            vec![
                var("a", VariableRole::Local, LocationKind::RegisterRelative, CV_RBP, -8),
                var("b", VariableRole::Local, LocationKind::RegisterRelative, CV_RBP, -16),
            ],
        );
        let two = insn(vec![mem(Register::RBP, -16), mem(Register::RBP, -8)]);

        assert_eq!(correlator().annotate(&two, &f), vec!["rbp - 0x10 = b"]);

        let all = OperandCorrelator::new(
            RegisterMap::Amd64,
            &CorrelateConfig {
                first_memory_match_only: false,
            },
        );
        assert_eq!(
            all.annotate(&two, &f),
            vec!["rbp - 0x10 = b", "rbp - 0x8 = a"]
        );
    }

    #[test]
    fn indexed_and_displacement_free_operands_are_skipped() {
        let f = function(
            vec![],
            vec![var("z", VariableRole::Local, LocationKind::RegisterRelative, CV_RBP, 0)],
        );
        let indexed = Operand::Memory(MemoryOperand {
            base: Register::RBP,
            index: Register::RCX,
            scale: 4,
            displacement: 0,
            displacement_width: 1,
            segment: Register::SS,
        });
        let no_disp = Operand::Memory(MemoryOperand {
            base: Register::RBP,
            index: Register::None,
            scale: 1,
            displacement: 0,
            displacement_width: 0,
            segment: Register::SS,
        });
        let c = correlator();
        assert!(c.annotate(&insn(vec![indexed]), &f).is_empty());
        assert!(c.annotate(&insn(vec![no_disp]), &f).is_empty());
    }

    #[test]
    fn unmapped_registers_never_match() {
        // CodeView 32 (FLAGS) has no decoder register
        let f = function(
            vec![],
            vec![
                var("flags", VariableRole::Local, LocationKind::RegisterValue, 32, 0),
                var("frame", VariableRole::Local, LocationKind::RegisterRelative, 32, 8),
            ],
        );
        let c = correlator();
        assert!(c
            .annotate(&insn(vec![Operand::Register { reg: Register::None }]), &f)
            .is_empty());
        let absolute = Operand::Memory(MemoryOperand {
            base: Register::None,
            index: Register::None,
            scale: 1,
            displacement: 8,
            displacement_width: 4,
            segment: Register::DS,
        });
        assert!(c.annotate(&insn(vec![absolute]), &f).is_empty());
    }
}
