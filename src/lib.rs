//! Symbol-annotated disassembly of PE images.
//!
//! The pipeline reads an image, translates function RVAs to file bytes,
//! linearly sweeps each function with an x86 decoder and tags operands that
//! refer to the function's parameters and locals as recorded in the PDB.

pub mod config;
pub mod disasm;
pub mod error;
pub mod formats;
pub mod io;
pub mod logging;
pub mod output;
pub mod session;
pub mod symbols;

pub use config::DumpConfig;
pub use error::{DumpError, Result};
pub use formats::pe::ImageLayout;
pub use session::{DumpSummary, Session};
pub use symbols::{FunctionSymbol, SymbolModel, SymbolProvider};
