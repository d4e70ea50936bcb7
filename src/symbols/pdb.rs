//! PDB-backed [`SymbolProvider`].
//!
//! Walks every module stream of the database and reports each procedure
//! together with the data records declared in its outermost scope. Records in
//! nested blocks and inlined sites are not attributed to the procedure.

use std::fs::File;
use std::path::{Path, PathBuf};

use pdb::{
    AddressMap, FallibleIterator, IdData, IdFinder, IdIndex, SymbolData, TypeData, TypeFinder,
    TypeIndex, PDB,
};
use tracing::{debug, info, trace};

use crate::disasm::registers::RegisterMap;
use crate::formats::pe::utils::ReadExt;
use crate::symbols::error::{Result, SymbolError};
use crate::symbols::provider::{DataKind, RawDatum, RawFunction, SymbolProvider};
use crate::symbols::types::{LocationKind, TypeRef, TypeShape};

// CodeView symbol kinds that open or close a lexical scope
const S_END: u16 = 0x0006;
const S_THUNK32: u16 = 0x1102;
const S_BLOCK32: u16 = 0x1103;
const S_WITH32: u16 = 0x1104;
const S_BPREL32: u16 = 0x110B;
const S_GDATA32: u16 = 0x110D;
const S_LPROC32: u16 = 0x110F;
const S_GPROC32: u16 = 0x1110;
const S_GMANDATA: u16 = 0x111D;
const S_SEPCODE: u16 = 0x1132;
const S_LPROC32_ID: u16 = 0x1146;
const S_GPROC32_ID: u16 = 0x1147;
const S_INLINESITE: u16 = 0x114D;
const S_INLINESITE_END: u16 = 0x114E;
const S_PROC_ID_END: u16 = 0x114F;
const S_LPROC32_DPC: u16 = 0x1155;
const S_LPROC32_DPC_ID: u16 = 0x1156;
const S_INLINESITE2: u16 = 0x115D;

/// Type indices below this value are primitive and have no TPI record
const FIRST_NON_PRIMITIVE: u32 = 0x1000;

/// Depth limit when summarizing nested pointer/array/modifier types
const MAX_TYPE_DEPTH: usize = 8;

fn is_procedure(kind: u16) -> bool {
    matches!(
        kind,
        S_LPROC32 | S_GPROC32 | S_LPROC32_ID | S_GPROC32_ID | S_LPROC32_DPC | S_LPROC32_DPC_ID
    )
}

fn uses_id_index(kind: u16) -> bool {
    matches!(kind, S_LPROC32_ID | S_GPROC32_ID | S_LPROC32_DPC_ID)
}

fn opens_scope(kind: u16) -> bool {
    matches!(
        kind,
        S_THUNK32 | S_BLOCK32 | S_WITH32 | S_SEPCODE | S_INLINESITE | S_INLINESITE2
    )
}

fn closes_scope(kind: u16) -> bool {
    matches!(kind, S_END | S_PROC_ID_END | S_INLINESITE_END)
}

fn scope_change(kind: u16) -> Option<ScopeEvent> {
    if opens_scope(kind) {
        Some(ScopeEvent::Open)
    } else if closes_scope(kind) {
        Some(ScopeEvent::Close)
    } else {
        None
    }
}

/// Signature slots of an argument list. A trailing no-type entry marks
/// varargs and is not a parameter.
fn declared_parameters(arguments: &[TypeIndex]) -> usize {
    arguments.iter().rev().skip_while(|t| t.0 == 0).count()
}

/// S_BPREL32 after the kind: offset i32, type u32, zero-terminated name
fn parse_bprel32(raw: &[u8]) -> Option<(i32, TypeIndex, &str)> {
    let offset = raw.read_u32_le_at(2)? as i32;
    let type_index = TypeIndex(raw.read_u32_le_at(6)?);
    let name = raw.read_cstring_at(10, raw.len())?;
    Some((offset, type_index, name))
}

fn static_kind(kind: u16) -> DataKind {
    if matches!(kind, S_GDATA32 | S_GMANDATA) {
        DataKind::Global
    } else {
        DataKind::StaticLocal
    }
}

/// Static storage is addressed by RVA when the address map resolves it,
/// otherwise by section and offset.
fn static_datum(kind: u16, rva: Option<u32>, section: u16, offset: u32) -> RawDatum {
    match rva {
        Some(rva) => {
            RawDatum::new(static_kind(kind), LocationKind::StaticImageAddress).offset(rva as i64)
        }
        None => {
            let mut d = RawDatum::new(static_kind(kind), LocationKind::StaticSectionOffset)
                .offset(offset as i64);
            d.section = section as u32;
            d
        }
    }
}

/// Find the debug database for `image`.
///
/// Candidates, in order: an explicit path, the path recorded in the image's
/// CodeView record, that file name next to the image, and `<stem>.pdb` next
/// to the image.
pub fn locate_pdb(image: &Path, explicit: Option<&Path>, codeview: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(SymbolError::PdbNotFound {
                searched: vec![path.to_path_buf()],
            })
        };
    }

    let dir = image.parent().unwrap_or_else(|| Path::new("."));
    let mut candidates = Vec::new();
    if let Some(recorded) = codeview {
        candidates.push(PathBuf::from(recorded));
        // Recorded paths are usually Windows paths from the build machine
        if let Some(file_name) = recorded.rsplit(['\\', '/']).next().filter(|s| !s.is_empty()) {
            candidates.push(dir.join(file_name));
        }
    }
    if let Some(stem) = image.file_stem() {
        let mut name = stem.to_os_string();
        name.push(".pdb");
        candidates.push(dir.join(name));
    }

    for candidate in &candidates {
        trace!(candidate = %candidate.display(), "Checking for debug database");
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Found debug database");
            return Ok(candidate.clone());
        }
    }

    Err(SymbolError::PdbNotFound {
        searched: candidates,
    })
}

/// Reads procedures and their variables from a PDB file
pub struct PdbSymbolProvider {
    path: PathBuf,
    registers: RegisterMap,
}

impl PdbSymbolProvider {
    pub fn new(path: impl Into<PathBuf>, bitness: u32) -> Self {
        Self {
            path: path.into(),
            registers: RegisterMap::for_bitness(bitness),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SymbolProvider for PdbSymbolProvider {
    fn load(&mut self) -> Result<Vec<RawFunction>> {
        let file = File::open(&self.path).map_err(|source| SymbolError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut pdb = PDB::open(file)?;

        let address_map = pdb.address_map()?;
        let type_information = pdb.type_information()?;
        // Older databases have no IPI stream
        let id_information = pdb.id_information().ok();

        let mut type_finder = type_information.finder();
        let mut types = type_information.iter();
        while types.next()?.is_some() {
            type_finder.update(&types);
        }

        let id_finder = match &id_information {
            Some(id_information) => {
                let mut finder = id_information.finder();
                let mut ids = id_information.iter();
                while ids.next()?.is_some() {
                    finder.update(&ids);
                }
                Some(finder)
            }
            None => None,
        };

        let ctx = Context {
            address_map: &address_map,
            types: &type_finder,
            ids: id_finder.as_ref(),
            frame_pointer: self.registers.frame_pointer(),
        };

        let dbi = pdb.debug_information()?;
        let mut modules = dbi.modules()?;
        let mut functions = Vec::new();
        let mut module_count = 0usize;

        while let Some(module) = modules.next()? {
            module_count += 1;
            let compiland = module.module_name().into_owned();
            let Some(info) = pdb.module_info(&module)? else {
                trace!(compiland = %compiland, "Module has no symbol stream");
                continue;
            };

            let before = functions.len();
            let mut symbols = info.symbols()?;
            let mut walker = ScopeWalker::default();
            while let Some(symbol) = symbols.next()? {
                let event = ctx.event(&compiland, &symbol, walker.collecting());
                walker.apply(event, &mut functions);
            }
            trace!(
                compiland = %compiland,
                functions = functions.len() - before,
                "Read module symbols"
            );
        }

        info!(
            path = %self.path.display(),
            modules = module_count,
            functions = functions.len(),
            "Loaded debug database"
        );
        Ok(functions)
    }
}

struct Context<'a, 's, 't> {
    address_map: &'a AddressMap<'s>,
    types: &'a TypeFinder<'t>,
    ids: Option<&'a IdFinder<'t>>,
    frame_pointer: u16,
}

impl Context<'_, '_, '_> {
    /// Declared parameter count of a procedure's signature, including the
    /// implicit `this` of member functions.
    fn parameter_count(&self, kind: u16, type_index: TypeIndex) -> usize {
        let signature = if uses_id_index(kind) {
            let Some(ids) = self.ids else {
                return 0;
            };
            match ids.find(IdIndex(type_index.0)).and_then(|i| i.parse()) {
                Ok(IdData::Function(f)) => f.function_type,
                Ok(IdData::MemberFunction(f)) => f.function_type,
                _ => return 0,
            }
        } else {
            type_index
        };

        match self.types.find(signature).and_then(|t| t.parse()) {
            Ok(TypeData::Procedure(p)) => self
                .argument_count(p.argument_list)
                .unwrap_or(p.parameter_count as usize),
            Ok(TypeData::MemberFunction(m)) => {
                self.argument_count(m.argument_list)
                    .unwrap_or(m.parameter_count as usize)
                    + usize::from(m.this_pointer_type.is_some())
            }
            _ => 0,
        }
    }

    fn argument_count(&self, list: TypeIndex) -> Option<usize> {
        match self.types.find(list).and_then(|t| t.parse()) {
            Ok(TypeData::ArgumentList(a)) => Some(declared_parameters(&a.arguments)),
            _ => None,
        }
    }

    /// Read one symbol record. Data records are only decoded when
    /// `collecting`.
    fn event(&self, compiland: &str, symbol: &pdb::Symbol<'_>, collecting: bool) -> ScopeEvent {
        let kind = symbol.raw_kind();

        if is_procedure(kind) {
            let procedure = match symbol.parse() {
                Ok(SymbolData::Procedure(p)) => {
                    let function = RawFunction {
                        compiland: Some(compiland.to_string()),
                        name: Some(p.name.to_string().into_owned()),
                        rva: p.offset.to_rva(self.address_map).map(|r| r.0),
                        length: Some(p.len as u64),
                        data: Vec::new(),
                    };
                    Some((function, self.parameter_count(kind, p.type_index)))
                }
                _ => None,
            };
            return ScopeEvent::Procedure(procedure);
        }

        if let Some(change) = scope_change(kind) {
            return change;
        }
        if !collecting {
            return ScopeEvent::Ignored;
        }
        match self.datum(kind, symbol) {
            Some((slot, datum)) => ScopeEvent::Datum(slot, datum),
            None => ScopeEvent::Ignored,
        }
    }

    fn typed(&self, mut datum: RawDatum, index: TypeIndex) -> RawDatum {
        let (type_ref, size_bits) = self.type_ref(index);
        datum.type_ref = type_ref;
        datum.size_bits = size_bits;
        datum
    }

    fn datum(&self, kind: u16, symbol: &pdb::Symbol<'_>) -> Option<(Slot, RawDatum)> {
        if kind == S_BPREL32 {
            let (offset, type_index, name) = parse_bprel32(symbol.raw_bytes())?;
            let datum = RawDatum::new(DataKind::Local, LocationKind::RegisterRelative)
                .named(name)
                .register(self.frame_pointer)
                .offset(offset as i64);
            return Some((Slot::Frame, self.typed(datum, type_index)));
        }

        let entry = match symbol.parse().ok()? {
            SymbolData::RegisterRelative(r) => {
                let datum = RawDatum::new(DataKind::Local, LocationKind::RegisterRelative)
                    .named(r.name.to_string().into_owned())
                    .register(r.register.0)
                    .offset(r.offset as i64);
                (Slot::Frame, self.typed(datum, r.type_index))
            }
            SymbolData::RegisterVariable(r) => {
                let datum = RawDatum::new(DataKind::Local, LocationKind::RegisterValue)
                    .named(r.name.to_string().into_owned())
                    .register(r.register.0);
                (Slot::Frame, self.typed(datum, r.type_index))
            }
            SymbolData::Data(data) => {
                let rva = data.offset.to_rva(self.address_map).map(|r| r.0);
                let datum = static_datum(kind, rva, data.offset.section, data.offset.offset)
                    .named(data.name.to_string().into_owned());
                (Slot::Fixed, self.typed(datum, data.type_index))
            }
            SymbolData::Local(l) => {
                // Def-range records are not resolved, so the location stays
                // unknown and the model drops it.
                let name = l.name.to_string().into_owned();
                if l.flags.isparam {
                    (
                        Slot::Parameter,
                        RawDatum::new(DataKind::Param, LocationKind::Unknown).named(name),
                    )
                } else {
                    (
                        Slot::Fixed,
                        RawDatum::new(DataKind::Local, LocationKind::Unknown).named(name),
                    )
                }
            }
            SymbolData::Constant(c) => (
                Slot::Fixed,
                RawDatum::new(DataKind::Constant, LocationKind::ConstantValue)
                    .named(c.name.to_string().into_owned()),
            ),
            _ => return None,
        };
        Some(entry)
    }

    fn type_ref(&self, index: TypeIndex) -> (Option<TypeRef>, u64) {
        if index.0 == 0 {
            return (None, 0);
        }
        let (shape, size) = self.shape(index, 0);
        (
            Some(TypeRef {
                index: index.0,
                shape,
            }),
            size * 8,
        )
    }

    /// Shape and size in bytes of a type
    fn shape(&self, index: TypeIndex, depth: usize) -> (TypeShape, u64) {
        if index.0 < FIRST_NON_PRIMITIVE {
            return primitive(index.0);
        }
        if depth >= MAX_TYPE_DEPTH {
            return (TypeShape::Unknown, 0);
        }

        let Ok(data) = self.types.find(index).and_then(|t| t.parse()) else {
            return (TypeShape::Unknown, 0);
        };
        match data {
            TypeData::Modifier(m) => self.shape(m.underlying_type, depth + 1),
            TypeData::Pointer(p) => {
                let (pointee, _) = self.shape(p.underlying_type, depth + 1);
                (
                    TypeShape::Pointer {
                        pointee: Box::new(pointee),
                    },
                    p.attributes.size() as u64,
                )
            }
            TypeData::Array(a) => {
                let (element, _) = self.shape(a.element_type, depth + 1);
                let size_bytes = a.dimensions.last().copied().unwrap_or(0) as u64;
                (
                    TypeShape::Array {
                        element: Box::new(element),
                        size_bytes,
                    },
                    size_bytes,
                )
            }
            TypeData::Class(c) => (
                TypeShape::Udt {
                    name: c.name.to_string().into_owned(),
                    members: c.count as u32,
                },
                c.size as u64,
            ),
            TypeData::Union(u) => (
                TypeShape::Udt {
                    name: u.name.to_string().into_owned(),
                    members: u.count as u32,
                },
                u.size as u64,
            ),
            TypeData::Enumeration(e) => {
                let (_, size) = self.shape(e.underlying_type, depth + 1);
                (
                    TypeShape::Udt {
                        name: e.name.to_string().into_owned(),
                        members: e.count as u32,
                    },
                    size,
                )
            }
            TypeData::Bitfield(b) => self.shape(b.underlying_type, depth + 1),
            _ => (TypeShape::Unknown, 0),
        }
    }
}

/// Summary of a primitive type index: low byte is the kind, bits 8-11 the
/// pointer mode.
fn primitive(index: u32) -> (TypeShape, u64) {
    let (name, size) = match index & 0xFF {
        0x03 => ("void", 0),
        0x08 => ("HRESULT", 4),
        0x10 => ("signed char", 1),
        0x20 => ("unsigned char", 1),
        0x68 => ("int8_t", 1),
        0x69 => ("uint8_t", 1),
        0x70 => ("char", 1),
        0x71 => ("wchar_t", 2),
        0x7a => ("char16_t", 2),
        0x7b => ("char32_t", 4),
        0x7c => ("char8_t", 1),
        0x11 => ("short", 2),
        0x21 => ("unsigned short", 2),
        0x72 => ("int16_t", 2),
        0x73 => ("uint16_t", 2),
        0x12 => ("long", 4),
        0x22 => ("unsigned long", 4),
        0x74 => ("int", 4),
        0x75 => ("unsigned int", 4),
        0x13 => ("__int64", 8),
        0x23 => ("unsigned __int64", 8),
        0x76 => ("int64_t", 8),
        0x77 => ("uint64_t", 8),
        0x40 => ("float", 4),
        0x41 => ("double", 8),
        0x42 => ("long double", 10),
        0x30 => ("bool", 1),
        _ => return (TypeShape::Unknown, 0),
    };
    let base = TypeShape::Primitive {
        name: name.to_string(),
    };
    match (index >> 8) & 0xF {
        0 => (base, size),
        mode => {
            let width = if mode == 0x6 { 8 } else { 4 };
            (
                TypeShape::Pointer {
                    pointee: Box::new(base),
                },
                width,
            )
        }
    }
}

/// Scope-relevant reading of one symbol record
enum ScopeEvent {
    /// Procedure start and its declared parameter count; `None` when the
    /// record could not be read
    Procedure(Option<(RawFunction, usize)>),
    Open,
    Close,
    Datum(Slot, RawDatum),
    Ignored,
}

/// How a data record relates to the procedure's signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Frame or register storage, a parameter while signature slots remain
    Frame,
    /// Flagged as a parameter by the compiler; takes a slot
    Parameter,
    Fixed,
}

/// Tracks lexical nesting within one module's symbol stream
#[derive(Debug, Default)]
struct ScopeWalker {
    depth: usize,
    in_procedure: bool,
    params_left: usize,
}

impl ScopeWalker {
    /// Whether a data record read now belongs to the current procedure
    fn collecting(&self) -> bool {
        self.in_procedure && self.depth == 1
    }

    fn apply(&mut self, event: ScopeEvent, out: &mut Vec<RawFunction>) {
        match event {
            ScopeEvent::Procedure(procedure) => {
                self.depth = 1;
                self.in_procedure = procedure.is_some();
                self.params_left = 0;
                if let Some((function, parameters)) = procedure {
                    self.params_left = parameters;
                    out.push(function);
                }
            }
            ScopeEvent::Open => {
                if self.depth > 0 {
                    self.depth += 1;
                }
            }
            ScopeEvent::Close => {
                self.depth = self.depth.saturating_sub(1);
                if self.depth == 0 {
                    self.in_procedure = false;
                }
            }
            ScopeEvent::Datum(slot, mut datum) => {
                if !self.collecting() {
                    return;
                }
                match slot {
                    Slot::Frame => datum.kind = self.frame_kind(),
                    Slot::Parameter => self.params_left = self.params_left.saturating_sub(1),
                    Slot::Fixed => {}
                }
                if let Some(function) = out.last_mut() {
                    function.data.push(datum);
                }
            }
            ScopeEvent::Ignored => {}
        }
    }

    /// Frame and register records fill the signature's parameters first.
    fn frame_kind(&mut self) -> DataKind {
        if self.params_left > 0 {
            self.params_left -= 1;
            DataKind::Param
        } else {
            DataKind::Local
        }
    }
}
