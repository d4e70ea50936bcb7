//! PE image layout: headers, section table and RVA translation

pub mod headers;
pub mod sections;
pub mod types;
pub mod utils;

use tracing::{debug, trace, warn};

use crate::io::ImageBytes;

use headers::*;
pub use sections::{NoMapping, SectionTable};
pub use types::*;
use utils::ReadExt;

/// Parsed PE image.
///
/// Keeps the whole file alive and exposes the raw bytes that follow the
/// section headers, up to the end of the file. `buffer()[i]` is the byte at
/// file offset `start_offset() + i`.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    nt_headers: NtHeaders,
    data_directories: Vec<DataDirectory>,
    section_table: SectionTable,
    data: ImageBytes,
    start_offset: u64,
}

impl ImageLayout {
    /// Parse an image held in memory. The bytes are copied.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::from_bytes(ImageBytes::from(data))
    }

    /// Parse an image without copying it, typically a mapping taken from
    /// [`ImageReader::into_bytes`](crate::io::ImageReader::into_bytes).
    pub fn from_bytes(data: ImageBytes) -> Result<Self> {
        let dos_header = parse_dos_header(&data)?;
        let nt_offset = dos_header.e_lfanew as usize;

        let (nt_headers, data_directories) = parse_nt_headers(&data, nt_offset)?;

        let section_offset =
            nt_offset + 4 + COFF_HEADER_SIZE + nt_headers.file_header.size_of_optional_header as usize;
        let section_headers = parse_section_headers(
            &data,
            section_offset,
            nt_headers.file_header.number_of_sections,
        )?;

        let start = section_offset + section_headers.len() * SECTION_HEADER_SIZE;
        let buffer_len = data.len().saturating_sub(start);

        debug!(
            machine = %nt_headers.file_header.machine,
            sections = section_headers.len(),
            image_base = format_args!("0x{:x}", nt_headers.optional_header.image_base),
            start_offset = start,
            buffer_len,
            mapped = data.is_mapped(),
            "Parsed PE layout"
        );

        Ok(Self {
            nt_headers,
            data_directories,
            section_table: SectionTable::new(section_headers),
            data,
            start_offset: start as u64,
        })
    }

    /// Get NT headers
    pub fn nt_headers(&self) -> &NtHeaders {
        &self.nt_headers
    }

    /// Get machine type
    pub fn machine(&self) -> Machine {
        self.nt_headers.file_header.machine
    }

    /// Decoder bitness: 64 for AMD64 images, 32 for i386.
    pub fn bitness(&self) -> u32 {
        self.machine().bitness().unwrap_or(32)
    }

    pub fn is_64bit(&self) -> bool {
        self.bitness() == 64
    }

    /// Get image base
    pub fn image_base(&self) -> u64 {
        self.nt_headers.optional_header.image_base
    }

    /// Get entry point RVA
    pub fn entry_point(&self) -> u32 {
        self.nt_headers.optional_header.address_of_entry_point
    }

    /// Sections in declaration order
    pub fn sections(&self) -> &[SectionHeader] {
        self.section_table.sections()
    }

    pub fn section_table(&self) -> &SectionTable {
        &self.section_table
    }

    /// Find section containing RVA
    pub fn section_containing(&self, rva: u32) -> Option<&SectionHeader> {
        self.section_table.section_containing_rva(rva)
    }

    /// Raw bytes following the section headers
    pub fn buffer(&self) -> &[u8] {
        self.data
            .get(self.start_offset as usize..)
            .unwrap_or_default()
    }

    /// File offset of `buffer()[0]`
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Translate an RVA to an index into [`buffer`](Self::buffer).
    pub fn translate(&self, rva: u32) -> std::result::Result<usize, NoMapping> {
        self.section_table.translate(rva, self.start_offset)
    }

    /// Up to `len` bytes starting at `rva`. The slice is shorter than `len`
    /// when the file ends first.
    pub fn bytes_at(&self, rva: u32, len: usize) -> std::result::Result<&[u8], NoMapping> {
        let start = self.translate(rva)?;
        let Some(tail) = self.buffer().get(start..) else {
            return Err(NoMapping::OutsideBuffer {
                file_offset: self.start_offset + start as u64,
            });
        };
        Ok(&tail[..len.min(tail.len())])
    }

    /// Bytes of a function declared at `rva` with `len` bytes. A length that
    /// runs past the end of the file is clamped.
    pub fn function_bytes(&self, rva: u32, len: u64) -> std::result::Result<&[u8], NoMapping> {
        let wanted = usize::try_from(len).unwrap_or(usize::MAX);
        let bytes = self.bytes_at(rva, wanted)?;
        if bytes.len() < wanted {
            warn!(
                rva = format_args!("0x{:x}", rva),
                declared = len,
                available = bytes.len(),
                "Function extends past end of file; clamping"
            );
        }
        Ok(bytes)
    }

    /// Get data directory by index
    pub fn data_directory(&self, index: usize) -> Option<&DataDirectory> {
        self.data_directories.get(index)
    }

    /// Check if file has debug info
    pub fn has_debug_info(&self) -> bool {
        self.data_directory(IMAGE_DIRECTORY_ENTRY_DEBUG)
            .is_some_and(|d| d.is_present())
    }

    /// Entries of the debug data directory
    pub fn debug_entries(&self) -> Vec<DebugEntry> {
        let Some(dir) = self
            .data_directory(IMAGE_DIRECTORY_ENTRY_DEBUG)
            .filter(|d| d.is_present())
        else {
            return Vec::new();
        };

        let Ok(raw) = self.bytes_at(dir.virtual_address, dir.size as usize) else {
            return Vec::new();
        };

        raw.chunks_exact(DEBUG_DIRECTORY_ENTRY_SIZE)
            .filter_map(parse_debug_entry)
            .collect()
    }

    /// CodeView record naming the image's PDB, if any.
    ///
    /// Prefers the debug directory; falls back to scanning the section data
    /// for an RSDS signature.
    pub fn codeview(&self) -> Option<CodeViewInfo> {
        for entry in self.debug_entries() {
            if entry.debug_type != IMAGE_DEBUG_TYPE_CODEVIEW {
                continue;
            }
            let record = (entry.pointer_to_raw_data as u64)
                .checked_sub(self.start_offset)
                .and_then(|o| {
                    self.buffer()
                        .read_slice_at(o as usize, entry.size_of_data as usize)
                })
                .or_else(|| {
                    self.bytes_at(entry.address_of_raw_data, entry.size_of_data as usize)
                        .ok()
                });
            if let Some(info) = record.and_then(parse_codeview) {
                trace!(pdb = %info.pdb_path, "CodeView record from debug directory");
                return Some(info);
            }
        }

        let pos = memchr::memmem::find(self.buffer(), &CODEVIEW_RSDS_SIGNATURE)?;
        let info = parse_codeview(&self.buffer()[pos..])?;
        trace!(pdb = %info.pdb_path, offset = pos, "CodeView record from signature scan");
        Some(info)
    }

    /// PDB path recorded by the linker, if any
    pub fn codeview_pdb_path(&self) -> Option<String> {
        self.codeview().map(|cv| cv.pdb_path)
    }
}
