//! Boundary between a debug-information source and the symbol model.

use crate::symbols::error::Result;
use crate::symbols::types::{LocationKind, TypeRef};

/// What a data record declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Param,
    Local,
    StaticLocal,
    Global,
    Member,
    Constant,
    Other,
}

/// Data record attached to a function, as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDatum {
    pub name: Option<String>,
    pub kind: DataKind,
    pub location: LocationKind,
    pub register: u16,
    pub offset: i64,
    pub section: u32,
    pub size_bits: u64,
    pub type_ref: Option<TypeRef>,
}

impl RawDatum {
    pub fn new(kind: DataKind, location: LocationKind) -> Self {
        Self {
            name: None,
            kind,
            location,
            register: 0,
            offset: 0,
            section: 0,
            size_bits: 0,
            type_ref: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn register(mut self, register: u16) -> Self {
        self.register = register;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Function record, as reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFunction {
    pub compiland: Option<String>,
    pub name: Option<String>,
    pub rva: Option<u32>,
    pub length: Option<u64>,
    pub data: Vec<RawDatum>,
}

/// Source of function and variable records
pub trait SymbolProvider {
    /// Enumerate every function of every compiland, in database order.
    fn load(&mut self) -> Result<Vec<RawFunction>>;
}

/// Provider over records already in memory
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    functions: Vec<RawFunction>,
}

impl StaticProvider {
    pub fn new(functions: Vec<RawFunction>) -> Self {
        Self { functions }
    }
}

impl SymbolProvider for StaticProvider {
    fn load(&mut self) -> Result<Vec<RawFunction>> {
        Ok(std::mem::take(&mut self.functions))
    }
}
