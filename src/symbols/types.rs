//! Symbol types and data structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a variable lives at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationKind {
    /// Held directly in a register
    RegisterValue,
    /// At a fixed offset from a base register (frame or stack pointer)
    RegisterRelative,
    /// Offset within an enclosing aggregate
    MemberOffset,
    /// Bit range within an enclosing aggregate
    Bitfield,
    /// Static storage with a known RVA
    StaticImageAddress,
    /// Static storage known only as section index and offset
    StaticSectionOffset,
    /// Compile-time constant
    ConstantValue,
    Unknown,
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LocationKind::RegisterValue => "register",
            LocationKind::RegisterRelative => "register-relative",
            LocationKind::MemberOffset => "member",
            LocationKind::Bitfield => "bitfield",
            LocationKind::StaticImageAddress => "static",
            LocationKind::StaticSectionOffset => "section-relative",
            LocationKind::ConstantValue => "constant",
            LocationKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Role of a variable within its function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableRole {
    Parameter,
    Local,
    StaticLocal,
}

impl fmt::Display for VariableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableRole::Parameter => write!(f, "param"),
            VariableRole::Local => write!(f, "local"),
            VariableRole::StaticLocal => write!(f, "static"),
        }
    }
}

/// Summary of a variable's debug type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeShape {
    Primitive { name: String },
    Pointer { pointee: Box<TypeShape> },
    Array { element: Box<TypeShape>, size_bytes: u64 },
    Udt { name: String, members: u32 },
    Unknown,
}

impl fmt::Display for TypeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeShape::Primitive { name } => f.write_str(name),
            TypeShape::Pointer { pointee } => write!(f, "{}*", pointee),
            TypeShape::Array {
                element,
                size_bytes,
            } => write!(f, "{}[{} bytes]", element, size_bytes),
            TypeShape::Udt { name, members } => write!(f, "{} ({} members)", name, members),
            TypeShape::Unknown => f.write_str("?"),
        }
    }
}

/// Reference to a type record in the debug database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    pub index: u32,
    pub shape: TypeShape,
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.shape.fmt(f)
    }
}

/// A parameter, local or static local of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSymbol {
    pub name: String,
    pub role: VariableRole,
    pub location: LocationKind,
    /// CodeView register number; meaningful for register locations
    pub register: u16,
    /// Frame offset, member offset or static offset depending on `location`
    pub offset: i64,
    /// Section index, or bit position for bitfields
    pub section: u32,
    pub size_bits: u64,
    pub type_ref: Option<TypeRef>,
}

/// A function with a resolved address range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSymbol {
    pub compiland: String,
    pub name: String,
    pub rva: u32,
    pub length: u64,
    pub parameters: Vec<VariableSymbol>,
    pub locals: Vec<VariableSymbol>,
}

impl FunctionSymbol {
    /// RVA of the last byte, inclusive
    pub fn last_rva(&self) -> u64 {
        (self.rva as u64 + self.length).saturating_sub(1)
    }

    /// Parameters followed by locals
    pub fn variables(&self) -> impl Iterator<Item = &VariableSymbol> {
        self.parameters.iter().chain(self.locals.iter())
    }
}
