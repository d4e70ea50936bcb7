//! Error types for symdump.
//!
//! Each layer has its own error type; `DumpError` rolls them up for callers
//! of the session API.

use thiserror::Error;

use crate::config::ConfigError;
use crate::disasm::decoder::DecodeError;
use crate::formats::pe::PeError;
use crate::io::error::IoError;
use crate::symbols::SymbolError;

/// Main error type for dump operations.
#[derive(Debug, Error)]
pub enum DumpError {
    /// Image container errors
    #[error("Invalid image: {0}")]
    Image(#[from] PeError),

    /// Debug database errors
    #[error(transparent)]
    Symbols(#[from] SymbolError),

    /// Decoder setup errors
    #[error("Decoder error: {0}")]
    Decoder(#[from] DecodeError),

    /// Bounded reader errors
    #[error(transparent)]
    Input(#[from] IoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Output file errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Worker pool setup errors
    #[error("Cannot start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type alias for dump operations
pub type Result<T> = std::result::Result<T, DumpError>;
