//! PE header parsing

use crate::formats::pe::types::*;
use crate::formats::pe::utils::{field, ReadExt};

/// Parse DOS header from data
pub fn parse_dos_header(data: &[u8]) -> Result<DosHeader> {
    if data.len() < DOS_HEADER_SIZE {
        return Err(PeError::TruncatedHeader {
            expected: DOS_HEADER_SIZE,
            actual: data.len(),
        });
    }

    let e_magic = field(data.read_u16_le_at(0), 0, 2, data)?;
    if e_magic != DOS_SIGNATURE {
        return Err(PeError::InvalidDosSignature);
    }

    Ok(DosHeader {
        e_magic,
        e_lfanew: field(data.read_u32_le_at(60), 60, 4, data)?,
    })
}

/// Parse COFF header from data at offset
pub fn parse_coff_header(data: &[u8], offset: usize) -> Result<CoffHeader> {
    let header = data
        .read_slice_at(offset, COFF_HEADER_SIZE)
        .ok_or(PeError::TruncatedHeader {
            expected: offset + COFF_HEADER_SIZE,
            actual: data.len(),
        })?;

    // Bounds were checked above; the reads below cannot fail.
    let u16_at = |o: usize| header.read_u16_le_at(o).unwrap_or_default();
    let u32_at = |o: usize| header.read_u32_le_at(o).unwrap_or_default();

    Ok(CoffHeader {
        machine: Machine::from(u16_at(0)),
        number_of_sections: u16_at(2),
        time_date_stamp: u32_at(4),
        pointer_to_symbol_table: u32_at(8),
        number_of_symbols: u32_at(12),
        size_of_optional_header: u16_at(16),
        characteristics: u16_at(18),
    })
}

/// Parse optional header from data at offset.
///
/// The declared header size selects the layout: exactly
/// [`OPTIONAL_HEADER64_SIZE`] bytes is PE32+, anything else is read as PE32.
/// The magic must agree with the chosen layout.
pub fn parse_optional_header(data: &[u8], offset: usize, size: u16) -> Result<OptionalHeader> {
    if size < 2 {
        return Err(PeError::TruncatedHeader {
            expected: offset + 2,
            actual: offset + size as usize,
        });
    }

    if offset + size as usize > data.len() {
        return Err(PeError::TruncatedHeader {
            expected: offset + size as usize,
            actual: data.len(),
        });
    }

    let magic = field(data.read_u16_le_at(offset), offset, 2, data)?;
    if magic != PE32_MAGIC && magic != PE32PLUS_MAGIC {
        return Err(PeError::InvalidMagic(magic));
    }

    let wide = size == OPTIONAL_HEADER64_SIZE;
    if wide != (magic == PE32PLUS_MAGIC) {
        return Err(PeError::InvalidOptionalHeaderSize { size, magic });
    }

    if wide {
        parse_optional_header64(data, offset)
    } else {
        parse_optional_header32(data, offset, size)
    }
}

fn parse_optional_header32(data: &[u8], offset: usize, size: u16) -> Result<OptionalHeader> {
    if size < 96 {
        return Err(PeError::TruncatedHeader {
            expected: offset + 96,
            actual: offset + size as usize,
        });
    }

    let h = &data[offset..offset + size as usize];
    let u8_at = |o: usize| h.read_u8_at(o).unwrap_or_default();
    let u16_at = |o: usize| h.read_u16_le_at(o).unwrap_or_default();
    let u32_at = |o: usize| h.read_u32_le_at(o).unwrap_or_default();

    Ok(OptionalHeader {
        magic: u16_at(0),
        major_linker_version: u8_at(2),
        minor_linker_version: u8_at(3),
        size_of_code: u32_at(4),
        address_of_entry_point: u32_at(16),
        base_of_code: u32_at(20),
        // offset 24 is BaseOfData, which PE32+ dropped
        image_base: u32_at(28) as u64,
        section_alignment: u32_at(32),
        file_alignment: u32_at(36),
        size_of_image: u32_at(56),
        size_of_headers: u32_at(60),
        checksum: u32_at(64),
        subsystem: u16_at(68),
        dll_characteristics: u16_at(70),
        size_of_stack_reserve: u32_at(72) as u64,
        size_of_stack_commit: u32_at(76) as u64,
        size_of_heap_reserve: u32_at(80) as u64,
        size_of_heap_commit: u32_at(84) as u64,
        loader_flags: u32_at(88),
        number_of_rva_and_sizes: u32_at(92),
    })
}

fn parse_optional_header64(data: &[u8], offset: usize) -> Result<OptionalHeader> {
    let h = &data[offset..offset + OPTIONAL_HEADER64_SIZE as usize];
    let u8_at = |o: usize| h.read_u8_at(o).unwrap_or_default();
    let u16_at = |o: usize| h.read_u16_le_at(o).unwrap_or_default();
    let u32_at = |o: usize| h.read_u32_le_at(o).unwrap_or_default();
    let u64_at = |o: usize| h.read_u64_le_at(o).unwrap_or_default();

    Ok(OptionalHeader {
        magic: u16_at(0),
        major_linker_version: u8_at(2),
        minor_linker_version: u8_at(3),
        size_of_code: u32_at(4),
        address_of_entry_point: u32_at(16),
        base_of_code: u32_at(20),
        image_base: u64_at(24),
        section_alignment: u32_at(32),
        file_alignment: u32_at(36),
        size_of_image: u32_at(56),
        size_of_headers: u32_at(60),
        checksum: u32_at(64),
        subsystem: u16_at(68),
        dll_characteristics: u16_at(70),
        size_of_stack_reserve: u64_at(72),
        size_of_stack_commit: u64_at(80),
        size_of_heap_reserve: u64_at(88),
        size_of_heap_commit: u64_at(96),
        loader_flags: u32_at(104),
        number_of_rva_and_sizes: u32_at(108),
    })
}

/// Parse data directories from data at offset
pub fn parse_data_directories(data: &[u8], offset: usize, count: u32) -> Vec<DataDirectory> {
    let count = (count as usize).min(IMAGE_NUMBEROF_DIRECTORY_ENTRIES);
    let mut directories = Vec::with_capacity(IMAGE_NUMBEROF_DIRECTORY_ENTRIES);

    for i in 0..count {
        let dir_offset = offset + i * 8;
        match (
            data.read_u32_le_at(dir_offset),
            data.read_u32_le_at(dir_offset + 4),
        ) {
            (Some(virtual_address), Some(size)) => directories.push(DataDirectory {
                virtual_address,
                size,
            }),
            _ => break,
        }
    }

    // Pad with empty directories if needed
    directories.resize(IMAGE_NUMBEROF_DIRECTORY_ENTRIES, DataDirectory::default());
    directories
}

/// Parse NT headers (PE signature + COFF + Optional)
pub fn parse_nt_headers(data: &[u8], offset: usize) -> Result<(NtHeaders, Vec<DataDirectory>)> {
    let signature: [u8; 4] = data
        .read_slice_at(offset, 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(PeError::TruncatedHeader {
            expected: offset + 4,
            actual: data.len(),
        })?;

    if signature != PE_SIGNATURE {
        return Err(PeError::InvalidPeSignature);
    }

    let coff_header = parse_coff_header(data, offset + 4)?;
    if coff_header.machine.bitness().is_none() {
        return Err(PeError::UnsupportedMachine(coff_header.machine));
    }

    let opt_offset = offset + 4 + COFF_HEADER_SIZE;
    let optional_header =
        parse_optional_header(data, opt_offset, coff_header.size_of_optional_header)?;

    // Data directories trail the fixed part of the optional header
    let fixed = if optional_header.is_64bit() { 112 } else { 96 };
    let directories = parse_data_directories(
        data,
        opt_offset + fixed,
        optional_header.number_of_rva_and_sizes,
    );

    let nt_headers = NtHeaders {
        signature,
        file_header: coff_header,
        optional_header,
    };

    Ok((nt_headers, directories))
}

/// Parse `count` section headers starting at `offset`, preserving their
/// declaration order.
pub fn parse_section_headers(data: &[u8], offset: usize, count: u16) -> Result<Vec<SectionHeader>> {
    let mut headers = Vec::with_capacity(count as usize);

    for i in 0..count as usize {
        let start = offset + i * SECTION_HEADER_SIZE;
        let raw = data
            .read_slice_at(start, SECTION_HEADER_SIZE)
            .ok_or(PeError::TruncatedHeader {
                expected: start + SECTION_HEADER_SIZE,
                actual: data.len(),
            })?;

        let mut name = [0u8; 8];
        name.copy_from_slice(&raw[..8]);
        let u16_at = |o: usize| raw.read_u16_le_at(o).unwrap_or_default();
        let u32_at = |o: usize| raw.read_u32_le_at(o).unwrap_or_default();

        headers.push(SectionHeader {
            name,
            virtual_size: u32_at(8),
            virtual_address: u32_at(12),
            size_of_raw_data: u32_at(16),
            pointer_to_raw_data: u32_at(20),
            pointer_to_relocations: u32_at(24),
            pointer_to_line_numbers: u32_at(28),
            number_of_relocations: u16_at(32),
            number_of_line_numbers: u16_at(34),
            characteristics: u32_at(36),
        });
    }

    Ok(headers)
}

/// Parse a CodeView RSDS record.
pub fn parse_codeview(record: &[u8]) -> Option<CodeViewInfo> {
    if record.read_slice_at(0, 4)? != CODEVIEW_RSDS_SIGNATURE {
        return None;
    }
    let mut guid = [0u8; 16];
    guid.copy_from_slice(record.read_slice_at(4, 16)?);
    let age = record.read_u32_le_at(20)?;
    let pdb_path = record.read_cstring_at(24, 1024)?;
    if pdb_path.is_empty() {
        return None;
    }
    Some(CodeViewInfo {
        guid,
        age,
        pdb_path: pdb_path.to_string(),
    })
}

/// Parse one debug directory entry
pub fn parse_debug_entry(raw: &[u8]) -> Option<DebugEntry> {
    Some(DebugEntry {
        characteristics: raw.read_u32_le_at(0)?,
        time_date_stamp: raw.read_u32_le_at(4)?,
        major_version: raw.read_u16_le_at(8)?,
        minor_version: raw.read_u16_le_at(10)?,
        debug_type: raw.read_u32_le_at(12)?,
        size_of_data: raw.read_u32_le_at(16)?,
        address_of_raw_data: raw.read_u32_le_at(20)?,
        pointer_to_raw_data: raw.read_u32_le_at(24)?,
    })
}
