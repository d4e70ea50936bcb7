//! Common test utilities and helpers.
//!
//! Images are assembled in memory so the integration tests need no sample
//! binaries on disk.

#![allow(dead_code)]

use symdump::symbols::{DataKind, LocationKind, RawDatum, RawFunction};

pub const FILE_ALIGNMENT: usize = 0x200;
pub const SECTION_ALIGNMENT: u32 = 0x1000;

/// CodeView register numbers used by the fixtures
pub mod cv {
    pub const EAX: u16 = 17;
    pub const EBP: u16 = 22;
    pub const RAX: u16 = 328;
    pub const RBP: u16 = 334;
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    virtual_address: u32,
    virtual_size: u32,
    data: Option<Vec<u8>>,
}

/// Builder for minimal PE32/PE32+ images
#[derive(Debug, Clone)]
pub struct PeBuilder {
    machine: u16,
    image_base: u64,
    sections: Vec<Section>,
    codeview: Option<String>,
}

impl PeBuilder {
    pub fn pe32() -> Self {
        Self {
            machine: 0x014c,
            image_base: 0x40_0000,
            sections: Vec::new(),
            codeview: None,
        }
    }

    pub fn pe32plus() -> Self {
        Self {
            machine: 0x8664,
            image_base: 0x1_4000_0000,
            sections: Vec::new(),
            codeview: None,
        }
    }

    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Section backed by `data` on disk
    pub fn section(mut self, name: &str, virtual_address: u32, data: &[u8]) -> Self {
        self.sections.push(Section {
            name: name.to_string(),
            virtual_address,
            virtual_size: data.len() as u32,
            data: Some(data.to_vec()),
        });
        self
    }

    /// Section with no raw data (pointer to raw data is zero)
    pub fn bss(mut self, name: &str, virtual_address: u32, virtual_size: u32) -> Self {
        self.sections.push(Section {
            name: name.to_string(),
            virtual_address,
            virtual_size,
            data: None,
        });
        self
    }

    /// Add a debug directory with an RSDS record naming `pdb_path`
    pub fn codeview(mut self, pdb_path: &str) -> Self {
        self.codeview = Some(pdb_path.to_string());
        self
    }

    fn is_64bit(&self) -> bool {
        self.machine == 0x8664
    }

    pub fn build(&self) -> Vec<u8> {
        let mut sections = self.sections.clone();

        // .rdata with a debug directory entry followed by its RSDS record
        let debug_dir = self.codeview.as_ref().map(|path| {
            let va = sections
                .iter()
                .map(|s| s.virtual_address + s.virtual_size)
                .max()
                .unwrap_or(0)
                .next_multiple_of(SECTION_ALIGNMENT)
                .max(SECTION_ALIGNMENT);
            let mut data = vec![0u8; 28];
            data.extend_from_slice(b"RSDS");
            data.extend_from_slice(&[0x11; 16]);
            data.extend_from_slice(&1u32.to_le_bytes());
            data.extend_from_slice(path.as_bytes());
            data.push(0);
            let record_len = (data.len() - 28) as u32;
            put_u32(&mut data, 12, 2); // IMAGE_DEBUG_TYPE_CODEVIEW
            put_u32(&mut data, 16, record_len);
            put_u32(&mut data, 20, va + 28);
            sections.push(Section {
                name: ".rdata".to_string(),
                virtual_address: va,
                virtual_size: data.len() as u32,
                data: Some(data),
            });
            (sections.len() - 1, va)
        });

        let opt_size: usize = if self.is_64bit() { 240 } else { 224 };
        let nt = 0x80;
        let opt = nt + 4 + 20;
        let section_headers = opt + opt_size;
        let headers_end = section_headers + sections.len() * 40;

        // Raw data layout
        let mut next = headers_end.next_multiple_of(FILE_ALIGNMENT);
        let mut raw = Vec::new();
        for s in &sections {
            match &s.data {
                Some(d) => {
                    let size = d.len().next_multiple_of(FILE_ALIGNMENT).max(FILE_ALIGNMENT);
                    raw.push((next, size));
                    next += size;
                }
                None => raw.push((0, 0)),
            }
        }

        if let Some((index, _)) = debug_dir {
            let file_offset = raw[index].0 as u32;
            if let Some(data) = sections[index].data.as_mut() {
                put_u32(data, 24, file_offset + 28);
            }
        }

        let mut image = vec![0u8; next.max(headers_end)];

        // DOS header
        image[0] = b'M';
        image[1] = b'Z';
        put_u32(&mut image, 60, nt as u32);

        // PE signature and COFF header
        image[nt..nt + 4].copy_from_slice(b"PE\0\0");
        put_u16(&mut image, nt + 4, self.machine);
        put_u16(&mut image, nt + 6, sections.len() as u16);
        put_u16(&mut image, nt + 20, opt_size as u16);

        // Optional header
        let dirs = if self.is_64bit() {
            put_u16(&mut image, opt, 0x20B);
            put_u64(&mut image, opt + 24, self.image_base);
            put_u32(&mut image, opt + 108, 16);
            opt + 112
        } else {
            put_u16(&mut image, opt, 0x10B);
            put_u32(&mut image, opt + 28, self.image_base as u32);
            put_u32(&mut image, opt + 92, 16);
            opt + 96
        };
        put_u32(&mut image, opt + 16, SECTION_ALIGNMENT);
        put_u32(&mut image, opt + 32, SECTION_ALIGNMENT);
        put_u32(&mut image, opt + 36, FILE_ALIGNMENT as u32);
        if let Some((_, va)) = debug_dir {
            put_u32(&mut image, dirs + 6 * 8, va);
            put_u32(&mut image, dirs + 6 * 8 + 4, 28);
        }

        // Section headers and raw data
        for (i, (s, &(ptr, size))) in sections.iter().zip(&raw).enumerate() {
            let h = section_headers + i * 40;
            let name = s.name.as_bytes();
            image[h..h + name.len().min(8)].copy_from_slice(&name[..name.len().min(8)]);
            put_u32(&mut image, h + 8, s.virtual_size);
            put_u32(&mut image, h + 12, s.virtual_address);
            put_u32(&mut image, h + 16, size as u32);
            put_u32(&mut image, h + 20, ptr as u32);
            put_u32(&mut image, h + 36, 0x6000_0020);
            if let Some(d) = &s.data {
                image[ptr..ptr + d.len()].copy_from_slice(d);
            }
        }

        image
    }
}

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, v: u64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

/// x64 frame function at offset 0 of `.text`:
///
/// ```text
/// +0  55             push rbp
/// +1  48 89 e5       mov rbp, rsp
/// +4  48 89 45 f8    mov [rbp-8], rax
/// +8  06             (invalid in 64-bit mode)
/// +9  8b 45 10       mov eax, [rbp+0x10]
/// +12 5d             pop rbp
/// +13 c3             ret
/// +14 cc cc          padding
/// ```
pub const X64_MAIN: [u8; 16] = [
    0x55, 0x48, 0x89, 0xE5, 0x48, 0x89, 0x45, 0xF8, 0x06, 0x8B, 0x45, 0x10, 0x5D, 0xC3, 0xCC,
    0xCC,
];

/// x86 frame function:
///
/// ```text
/// +0  55             push ebp
/// +1  89 e5          mov ebp, esp
/// +3  8b 45 08       mov eax, [ebp+8]
/// +6  89 45 fc       mov [ebp-4], eax
/// +9  c9             leave
/// +10 c3             ret
/// ```
pub const X86_MAIN: [u8; 11] = [
    0x55, 0x89, 0xE5, 0x8B, 0x45, 0x08, 0x89, 0x45, 0xFC, 0xC9, 0xC3,
];

pub fn raw_function(name: &str, rva: u32, length: u64, data: Vec<RawDatum>) -> RawFunction {
    RawFunction {
        compiland: Some("C:\\build\\main.obj".to_string()),
        name: Some(name.to_string()),
        rva: Some(rva),
        length: Some(length),
        data,
    }
}

pub fn frame_var(kind: DataKind, name: &str, register: u16, offset: i64) -> RawDatum {
    RawDatum::new(kind, LocationKind::RegisterRelative)
        .named(name)
        .register(register)
        .offset(offset)
}

pub fn register_var(kind: DataKind, name: &str, register: u16) -> RawDatum {
    RawDatum::new(kind, LocationKind::RegisterValue)
        .named(name)
        .register(register)
}
