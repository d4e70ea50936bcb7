//! Section table and RVA translation for PE images

use std::fmt;

use crate::formats::pe::types::*;

/// Why an RVA has no bytes in the image buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoMapping {
    /// No section's virtual range contains the RVA.
    OutsideSections,
    /// The containing section has no raw data on disk (e.g. `.bss`).
    Unbacked { section: String },
    /// The section's raw data pointer lies before the buffer start.
    OutsideBuffer { file_offset: u64 },
}

impl fmt::Display for NoMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutsideSections => write!(f, "not inside any section"),
            Self::Unbacked { section } => write!(f, "section {} has no file backing", section),
            Self::OutsideBuffer { file_offset } => {
                write!(f, "file offset 0x{:x} precedes section data", file_offset)
            }
        }
    }
}

/// Section table kept in declaration order. Lookups scan linearly and the
/// first matching section wins.
#[derive(Debug, Clone, Default)]
pub struct SectionTable {
    sections: Vec<SectionHeader>,
}

impl SectionTable {
    /// Create a new section table
    pub fn new(sections: Vec<SectionHeader>) -> Self {
        Self { sections }
    }

    /// Get all sections
    pub fn sections(&self) -> &[SectionHeader] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// First section, in declaration order, whose virtual range holds `rva`
    pub fn section_containing_rva(&self, rva: u32) -> Option<&SectionHeader> {
        self.sections.iter().find(|s| s.contains_rva(rva))
    }

    /// Translate an RVA into an index into a buffer that starts at file
    /// offset `buffer_start`.
    pub fn translate(&self, rva: u32, buffer_start: u64) -> std::result::Result<usize, NoMapping> {
        let section = self
            .section_containing_rva(rva)
            .ok_or(NoMapping::OutsideSections)?;

        if !section.has_file_backing() {
            return Err(NoMapping::Unbacked {
                section: section.name(),
            });
        }

        let file_offset =
            section.pointer_to_raw_data as u64 + (rva - section.virtual_address) as u64;
        file_offset
            .checked_sub(buffer_start)
            .map(|o| o as usize)
            .ok_or(NoMapping::OutsideBuffer { file_offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_section(name: &str, va: u32, vsize: u32, raw_ptr: u32) -> SectionHeader {
        let mut name_bytes = [0u8; 8];
        let bytes = name.as_bytes();
        name_bytes[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);

        SectionHeader {
            name: name_bytes,
            virtual_size: vsize,
            virtual_address: va,
            size_of_raw_data: if raw_ptr == 0 { 0 } else { vsize },
            pointer_to_raw_data: raw_ptr,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_EXECUTE,
        }
    }

    #[test]
    fn test_translate_inside_backed_section() {
        let table = SectionTable::new(vec![
            create_test_section(".text", 0x1000, 0x1000, 0x400),
            create_test_section(".data", 0x2000, 0x800, 0x1400),
        ]);

        // Buffer begins right after the headers at 0x400
        assert_eq!(table.translate(0x1000, 0x400), Ok(0));
        assert_eq!(table.translate(0x1010, 0x400), Ok(0x10));
        assert_eq!(table.translate(0x2004, 0x400), Ok(0x1004));
        assert_eq!(table.translate(0x2004, 0x200), Ok(0x1204));
    }

    #[test]
    fn test_translate_zero_offset_is_distinct_from_no_mapping() {
        let table = SectionTable::new(vec![
            create_test_section(".text", 0x1000, 0x100, 0x400),
            create_test_section(".bss", 0x3000, 0x100, 0),
        ]);

        assert_eq!(table.translate(0x1000, 0x400), Ok(0));
        assert_eq!(
            table.translate(0x3010, 0x400),
            Err(NoMapping::Unbacked {
                section: ".bss".to_string()
            })
        );
        assert_eq!(
            table.translate(0x5000, 0x400),
            Err(NoMapping::OutsideSections)
        );
        assert_eq!(
            table.translate(0x1000, 0x800),
            Err(NoMapping::OutsideBuffer { file_offset: 0x400 })
        );
    }

    #[test]
    fn test_declaration_order_first_match_wins() {
        // Overlapping virtual ranges: the earlier-declared section wins
        let table = SectionTable::new(vec![
            create_test_section(".b", 0x2000, 0x1000, 0x3000),
            create_test_section(".a", 0x1000, 0x2000, 0x800),
        ]);

        assert_eq!(table.sections()[0].name(), ".b");
        assert_eq!(table.translate(0x2000, 0), Ok(0x3000));
        assert_eq!(table.translate(0x1800, 0), Ok(0x1000));
        assert_eq!(table.section_containing_rva(0x2800).unwrap().name(), ".b");
    }

    #[test]
    fn test_section_end_is_inclusive() {
        let table = SectionTable::new(vec![create_test_section(".text", 0x1000, 0x10, 0x400)]);
        assert_eq!(table.translate(0x1010, 0x400), Ok(0x10));
        assert_eq!(
            table.translate(0x1011, 0x400),
            Err(NoMapping::OutsideSections)
        );
    }

    #[test]
    fn test_section_lookup() {
        let table = SectionTable::new(vec![
            create_test_section(".text", 0x1000, 0x1000, 0x400),
            create_test_section(".bss", 0x3000, 0x100, 0),
        ]);

        assert_eq!(table.len(), 2);
        assert_eq!(table.section_containing_rva(0x1800).unwrap().name(), ".text");
        assert!(!table.section_containing_rva(0x3000).unwrap().has_file_backing());
        assert!(table.section_containing_rva(0x5000).is_none());
    }
}
