//! Batch pipeline: load the image, load its symbols, disassemble every
//! function, write the dump.

use std::io::Write;
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, debug_span, info, warn};

use crate::config::DumpConfig;
use crate::disasm::{
    Decoder, FunctionDisassembly, IcedDecoder, LinearSweep, OperandCorrelator, RegisterMap,
};
use crate::error::Result;
use crate::formats::pe::ImageLayout;
use crate::io::ImageReader;
use crate::output::DumpWriter;
use crate::symbols::pdb::{locate_pdb, PdbSymbolProvider};
use crate::symbols::{FunctionSymbol, SymbolModel, SymbolProvider};

/// Totals over one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub functions: usize,
    pub instructions: usize,
    pub invalid: usize,
    pub annotations: usize,
}

impl DumpSummary {
    fn from_disassemblies(disassemblies: &[FunctionDisassembly]) -> Self {
        let mut summary = Self {
            functions: disassemblies.len(),
            ..Self::default()
        };
        for d in disassemblies {
            summary.instructions += d.instructions.len();
            summary.invalid += d.invalid_count();
            summary.annotations += d
                .instructions
                .iter()
                .map(|i| i.annotations.len())
                .sum::<usize>();
        }
        summary
    }
}

/// Loaded image and symbols, ready to disassemble
pub struct Session {
    config: DumpConfig,
    layout: ImageLayout,
    model: SymbolModel,
    decoder: IcedDecoder,
    registers: RegisterMap,
}

impl Session {
    /// Open `image` and its debug database. The database is `pdb` when given,
    /// otherwise it is searched for next to the image.
    pub fn open(image: &Path, pdb: Option<&Path>, config: DumpConfig) -> Result<Self> {
        let reader = ImageReader::open(image, &config.io)?;
        let layout = ImageLayout::from_bytes(reader.into_bytes())?;

        let codeview = layout.codeview_pdb_path();
        let pdb_path = locate_pdb(image, pdb, codeview.as_deref())?;
        info!(
            image = %image.display(),
            pdb = %pdb_path.display(),
            machine = %layout.machine(),
            "Loading symbols"
        );

        let mut provider = PdbSymbolProvider::new(pdb_path, layout.bitness());
        Self::with_provider(layout, &mut provider, config)
    }

    /// Build a session from a parsed image and any symbol provider.
    pub fn with_provider(
        layout: ImageLayout,
        provider: &mut dyn SymbolProvider,
        config: DumpConfig,
    ) -> Result<Self> {
        config.validate()?;
        let model = SymbolModel::load(provider)?;
        let decoder = IcedDecoder::new(layout.bitness())?;
        let registers = RegisterMap::for_bitness(layout.bitness());
        debug!(
            decoder = decoder.name(),
            bits = decoder.bitness(),
            functions = model.len(),
            "Session ready"
        );
        Ok(Self {
            config,
            layout,
            model,
            decoder,
            registers,
        })
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn model(&self) -> &SymbolModel {
        &self.model
    }

    pub fn config(&self) -> &DumpConfig {
        &self.config
    }

    /// Sweep and annotate one function.
    pub fn disassemble_function(&self, function: &FunctionSymbol) -> FunctionDisassembly {
        let _span = debug_span!("function", name = %function.name, rva = function.rva).entered();
        let address = self.layout.image_base().wrapping_add(function.rva as u64);

        let code = match self.layout.function_bytes(function.rva, function.length) {
            Ok(code) => code,
            Err(reason) => {
                warn!(
                    compiland = %function.compiland,
                    function = %function.name,
                    rva = format_args!("0x{:x}", function.rva),
                    %reason,
                    "Function bytes are not in the image"
                );
                return FunctionDisassembly {
                    address,
                    instructions: Vec::new(),
                };
            }
        };

        if let Some(section) = self.layout.section_containing(function.rva) {
            if !section.is_executable() && !section.contains_code() {
                warn!(
                    function = %function.name,
                    section = %section.name(),
                    "Function lies in a non-code section"
                );
            }
        }

        let sweep = LinearSweep::new(&self.decoder, self.config.sweep.clone());
        let mut disasm = sweep.disassemble(function, code, address);
        OperandCorrelator::new(self.registers, &self.config.correlate)
            .annotate_function(&mut disasm, function);
        disasm
    }

    /// Disassemble every function. The result is indexed like
    /// [`SymbolModel::functions`].
    pub fn disassemble(&self) -> Result<Vec<FunctionDisassembly>> {
        let functions = self.model.functions();
        if self.config.jobs <= 1 {
            return Ok(functions
                .iter()
                .map(|f| self.disassemble_function(f))
                .collect());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs)
            .build()?;
        Ok(pool.install(|| {
            functions
                .par_iter()
                .map(|f| self.disassemble_function(f))
                .collect()
        }))
    }

    /// Render disassembly produced by [`disassemble`](Self::disassemble).
    pub fn write<W: Write>(&self, out: &mut W, disassemblies: &[FunctionDisassembly]) -> Result<()> {
        DumpWriter::new(&self.config.output, self.registers).write_all(
            out,
            self.model.functions(),
            disassemblies,
        )?;
        Ok(())
    }

    /// Disassemble everything and write the dump.
    pub fn run<W: Write>(&self, out: &mut W) -> Result<DumpSummary> {
        let disassemblies = self.disassemble()?;
        self.write(out, &disassemblies)?;

        let summary = DumpSummary::from_disassemblies(&disassemblies);
        info!(
            functions = summary.functions,
            instructions = summary.instructions,
            invalid = summary.invalid,
            annotations = summary.annotations,
            "Dump complete"
        );
        Ok(summary)
    }
}
