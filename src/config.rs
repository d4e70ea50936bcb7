//! Configuration for a dump run.
//!
//! Every section has defaults; a JSON file may override any subset of fields
//! and command line flags override the file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::disasm::correlate::FIRST_MEMORY_MATCH_ONLY;
use crate::disasm::sweep::{MAX_INSTRUCTION_WIDTH, STOP_AT_FIRST_RETURN};
use crate::io::IOLimits;

/// Master configuration for the dump pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Limits applied when opening the image.
    pub io: IOLimits,
    /// Linear sweep behavior.
    pub sweep: SweepConfig,
    /// Operand annotation behavior.
    pub correlate: CorrelateConfig,
    /// Text layout of the dump.
    pub output: OutputConfig,
    /// Worker threads for disassembly; 0 or 1 runs on the calling thread.
    pub jobs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Bytes offered to the decoder per step.
    pub max_instruction_width: usize,
    /// End a function at its first return instruction.
    pub stop_at_return: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_instruction_width: MAX_INSTRUCTION_WIDTH,
            stop_at_return: STOP_AT_FIRST_RETURN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelateConfig {
    /// Annotate at most one memory operand per instruction.
    pub first_memory_match_only: bool,
}

impl Default for CorrelateConfig {
    fn default() -> Self {
        Self {
            first_memory_match_only: FIRST_MEMORY_MATCH_ONLY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Column width of the instruction text.
    pub mnemonic_width: usize,
    /// Column width of the raw byte listing.
    pub bytes_width: usize,
    /// Emit one line per parameter and local under each function header.
    pub list_variables: bool,
    /// Render raw bytes as upper-case hex.
    pub uppercase_hex: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mnemonic_width: 40,
            bytes_width: 45,
            list_variables: false,
            uppercase_hex: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("sweep.max_instruction_width must be at least 1")]
    ZeroWidth,
}

impl DumpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep.max_instruction_width == 0 {
            return Err(ConfigError::ZeroWidth);
        }
        Ok(())
    }
}
