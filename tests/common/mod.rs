//! Common test utilities and helpers.
//!
//! [`PeBuilder`] lays out small but structurally complete PE32 / PE32+
//! images: a section table, data directories, and export, import and base
//! relocation tables written at caller-chosen RVAs.

#![allow(dead_code)]

use std::path::Path;

pub const NT_OFFSET: usize = 0x80;
pub const OPTIONAL_OFFSET: usize = NT_OFFSET + 24;
pub const IMAGE_BASE_32: u64 = 0x40_0000;
pub const IMAGE_BASE_64: u64 = 0x1_4000_0000;

pub const DIR_EXPORT: usize = 0;
pub const DIR_IMPORT: usize = 1;
pub const DIR_BASERELOC: usize = 5;
pub const DIR_DELAY_IMPORT: usize = 13;

/// Test helper for checking if sample files exist
pub fn sample_file_exists<P: AsRef<Path>>(relative_path: P) -> bool {
    Path::new("samples").join(relative_path).exists()
}

/// Get the full path to a sample file
pub fn sample_file_path<P: AsRef<Path>>(relative_path: P) -> std::path::PathBuf {
    Path::new("samples").join(relative_path)
}

#[derive(Debug, Clone)]
pub struct SectionSpec {
    pub name: &'static str,
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub pointer_to_raw_data: u32,
    pub size_of_raw_data: u32,
    pub characteristics: u32,
}

/// One address-table slot of an export directory
#[derive(Debug, Clone, Copy)]
pub enum ExportSlot<'a> {
    Address(u32),
    Forward(&'a str),
    Unused,
}

/// One thunk of an imported DLL
#[derive(Debug, Clone, Copy)]
pub enum ImportSpec<'a> {
    Name(u16, &'a str),
    Ordinal(u16),
}

/// Import directory flavour written by [`PeBuilder::imports`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportLayout {
    Eager,
    /// Delay-load descriptors holding RVAs (attributes bit 0 set)
    Delay,
    /// Version 1 delay-load descriptors holding VAs
    DelayV1,
}

pub struct PeBuilder {
    pub is_64: bool,
    pub sections: Vec<SectionSpec>,
    pub directories: [(u32, u32); 16],
    pub entry_point: u32,
    pub checksum: u32,
    writes: Vec<(u32, Vec<u8>)>,
}

impl PeBuilder {
    /// `.text` at RVA 0x1000 / file 0x400, `.rdata` at RVA 0x2000 / file 0x1400
    pub fn new(is_64: bool) -> Self {
        Self {
            is_64,
            sections: vec![
                SectionSpec {
                    name: ".text",
                    virtual_address: 0x1000,
                    virtual_size: 0x1000,
                    pointer_to_raw_data: 0x400,
                    size_of_raw_data: 0x1000,
                    characteristics: 0x6000_0020,
                },
                SectionSpec {
                    name: ".rdata",
                    virtual_address: 0x2000,
                    virtual_size: 0x1000,
                    pointer_to_raw_data: 0x1400,
                    size_of_raw_data: 0x1000,
                    characteristics: 0x4000_0040,
                },
            ],
            directories: [(0, 0); 16],
            entry_point: 0x1000,
            checksum: 0,
            writes: Vec::new(),
        }
    }

    pub fn image_base(&self) -> u64 {
        if self.is_64 {
            IMAGE_BASE_64
        } else {
            IMAGE_BASE_32
        }
    }

    pub fn thunk_size(&self) -> u32 {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    fn fixed_optional_size(&self) -> usize {
        if self.is_64 {
            112
        } else {
            96
        }
    }

    pub fn optional_header_size(&self) -> usize {
        self.fixed_optional_size() + 16 * 8
    }

    pub fn checksum_offset(&self) -> usize {
        OPTIONAL_OFFSET + 64
    }

    pub fn write(&mut self, rva: u32, bytes: &[u8]) -> &mut Self {
        self.writes.push((rva, bytes.to_vec()));
        self
    }

    pub fn write_u16(&mut self, rva: u32, value: u16) -> &mut Self {
        self.write(rva, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, rva: u32, value: u32) -> &mut Self {
        self.write(rva, &value.to_le_bytes())
    }

    pub fn write_thunk(&mut self, rva: u32, value: u64) -> &mut Self {
        if self.is_64 {
            self.write(rva, &value.to_le_bytes())
        } else {
            self.write_u32(rva, value as u32)
        }
    }

    pub fn directory(&mut self, index: usize, rva: u32, size: u32) -> &mut Self {
        self.directories[index] = (rva, size);
        self
    }

    /// Write an export directory at `rva`; `names` pairs each name with its
    /// address-table index and must already be sorted.
    pub fn exports(
        &mut self,
        rva: u32,
        dll_name: &str,
        base: u32,
        slots: &[ExportSlot<'_>],
        names: &[(&str, u16)],
    ) -> &mut Self {
        let address_table = rva + 40;
        let name_table = address_table + 4 * slots.len() as u32;
        let ordinal_table = name_table + 4 * names.len() as u32;
        let mut strings = ordinal_table + 2 * names.len() as u32;

        let mut string_at = |builder: &mut Self, text: &str| {
            let at = strings;
            let mut bytes = text.as_bytes().to_vec();
            bytes.push(0);
            strings += bytes.len() as u32;
            builder.write(at, &bytes);
            at
        };

        let dll_name_rva = string_at(self, dll_name);
        for (i, slot) in slots.iter().enumerate() {
            let value = match *slot {
                ExportSlot::Address(target) => target,
                ExportSlot::Forward(target) => string_at(self, target),
                ExportSlot::Unused => 0,
            };
            self.write_u32(address_table + 4 * i as u32, value);
        }
        for (i, (name, index)) in names.iter().enumerate() {
            let name_rva = string_at(self, name);
            self.write_u32(name_table + 4 * i as u32, name_rva);
            self.write_u16(ordinal_table + 2 * i as u32, *index);
        }

        self.write_u32(rva + 12, dll_name_rva)
            .write_u32(rva + 16, base)
            .write_u32(rva + 20, slots.len() as u32)
            .write_u32(rva + 24, names.len() as u32)
            .write_u32(rva + 28, address_table)
            .write_u32(rva + 32, if names.is_empty() { 0 } else { name_table })
            .write_u32(rva + 36, if names.is_empty() { 0 } else { ordinal_table });

        self.directory(DIR_EXPORT, rva, strings - rva)
    }

    /// Write an import descriptor table at `rva` followed by every name,
    /// lookup table and address table it references.
    pub fn imports(
        &mut self,
        layout: ImportLayout,
        rva: u32,
        dlls: &[(&str, &[ImportSpec<'_>])],
    ) -> &mut Self {
        let descriptor_size = if layout == ImportLayout::Eager { 20 } else { 32 };
        let width = self.thunk_size();
        let ordinal_flag = if self.is_64 { 1u64 << 63 } else { 1u64 << 31 };
        let bias = if layout == ImportLayout::DelayV1 {
            self.image_base() as u32
        } else {
            0
        };

        let mut cursor = rva + descriptor_size * (dlls.len() as u32 + 1);
        for (d, (dll, functions)) in dlls.iter().enumerate() {
            let descriptor = rva + descriptor_size * d as u32;

            let name_rva = cursor;
            let mut name = dll.as_bytes().to_vec();
            name.push(0);
            cursor += (name.len() as u32 + 7) & !7;
            self.write(name_rva, &name);

            let lookup = cursor;
            cursor += width * (functions.len() as u32 + 1);
            let iat = cursor;
            cursor += width * (functions.len() as u32 + 1);

            for (i, function) in functions.iter().enumerate() {
                let value = match *function {
                    ImportSpec::Ordinal(ordinal) => ordinal_flag | ordinal as u64,
                    ImportSpec::Name(hint, text) => {
                        let at = cursor;
                        let mut entry = hint.to_le_bytes().to_vec();
                        entry.extend_from_slice(text.as_bytes());
                        entry.push(0);
                        cursor += (entry.len() as u32 + 1) & !1;
                        self.write(at, &entry);
                        (at + bias) as u64
                    }
                };
                self.write_thunk(lookup + width * i as u32, value);
                self.write_thunk(iat + width * i as u32, value);
            }

            match layout {
                ImportLayout::Eager => {
                    self.write_u32(descriptor, lookup)
                        .write_u32(descriptor + 12, name_rva)
                        .write_u32(descriptor + 16, iat);
                }
                ImportLayout::Delay | ImportLayout::DelayV1 => {
                    let attributes = u32::from(layout == ImportLayout::Delay);
                    self.write_u32(descriptor, attributes)
                        .write_u32(descriptor + 4, name_rva + bias)
                        .write_u32(descriptor + 12, iat + bias)
                        .write_u32(descriptor + 16, lookup + bias);
                }
            }
        }

        let index = if layout == ImportLayout::Eager {
            DIR_IMPORT
        } else {
            DIR_DELAY_IMPORT
        };
        self.directory(index, rva, descriptor_size * (dlls.len() as u32 + 1))
    }

    /// Write base relocation blocks at `rva`
    pub fn relocations(&mut self, rva: u32, blocks: &[(u32, &[u16])]) -> &mut Self {
        let mut cursor = rva;
        for (page, entries) in blocks {
            let size = 8 + 2 * entries.len() as u32;
            self.write_u32(cursor, *page).write_u32(cursor + 4, size);
            for (i, entry) in entries.iter().enumerate() {
                self.write_u16(cursor + 8 + 2 * i as u32, *entry);
            }
            cursor += size;
        }
        self.directory(DIR_BASERELOC, rva, cursor - rva)
    }

    fn rva_to_offset(&self, rva: u32) -> usize {
        let section = self
            .sections
            .iter()
            .find(|s| rva >= s.virtual_address && rva < s.virtual_address + s.size_of_raw_data)
            .unwrap_or_else(|| panic!("rva {rva:#x} is not in any section"));
        (section.pointer_to_raw_data + (rva - section.virtual_address)) as usize
    }

    pub fn build(&self) -> Vec<u8> {
        let file_size = self
            .sections
            .iter()
            .map(|s| (s.pointer_to_raw_data + s.size_of_raw_data) as usize)
            .max()
            .unwrap_or(0x400)
            .max(0x400);
        let mut data = vec![0u8; file_size];

        let put16 = |data: &mut Vec<u8>, at: usize, v: u16| data[at..at + 2].copy_from_slice(&v.to_le_bytes());
        let put32 = |data: &mut Vec<u8>, at: usize, v: u32| data[at..at + 4].copy_from_slice(&v.to_le_bytes());

        data[0..2].copy_from_slice(b"MZ");
        put32(&mut data, 0x3C, NT_OFFSET as u32);
        data[NT_OFFSET..NT_OFFSET + 4].copy_from_slice(b"PE\0\0");

        let file_header = NT_OFFSET + 4;
        put16(&mut data, file_header, if self.is_64 { 0x8664 } else { 0x014c });
        put16(&mut data, file_header + 2, self.sections.len() as u16);
        put32(&mut data, file_header + 4, 0x5F00_0000);
        put16(&mut data, file_header + 16, self.optional_header_size() as u16);
        let characteristics = if self.is_64 { 0x2022 } else { 0x2102 };
        put16(&mut data, file_header + 18, characteristics);

        let opt = OPTIONAL_OFFSET;
        put16(&mut data, opt, if self.is_64 { 0x20B } else { 0x10B });
        put32(&mut data, opt + 16, self.entry_point);
        if self.is_64 {
            data[opt + 24..opt + 32].copy_from_slice(&IMAGE_BASE_64.to_le_bytes());
        } else {
            put32(&mut data, opt + 28, IMAGE_BASE_32 as u32);
        }
        put32(&mut data, opt + 32, 0x1000);
        put32(&mut data, opt + 36, 0x200);
        put32(&mut data, opt + 56, 0x3000);
        put32(&mut data, opt + 60, 0x400);
        put32(&mut data, opt + 64, self.checksum);
        put16(&mut data, opt + 68, 3);
        put16(&mut data, opt + 70, 0x8160);
        put32(&mut data, opt + self.fixed_optional_size() - 4, 16);
        for (i, (rva, size)) in self.directories.iter().enumerate() {
            let at = opt + self.fixed_optional_size() + 8 * i;
            put32(&mut data, at, *rva);
            put32(&mut data, at + 4, *size);
        }

        let table = opt + self.optional_header_size();
        for (i, s) in self.sections.iter().enumerate() {
            let at = table + 40 * i;
            data[at..at + s.name.len()].copy_from_slice(s.name.as_bytes());
            put32(&mut data, at + 8, s.virtual_size);
            put32(&mut data, at + 12, s.virtual_address);
            put32(&mut data, at + 16, s.size_of_raw_data);
            put32(&mut data, at + 20, s.pointer_to_raw_data);
            put32(&mut data, at + 36, s.characteristics);
        }

        for (rva, bytes) in &self.writes {
            let at = self.rva_to_offset(*rva);
            data[at..at + bytes.len()].copy_from_slice(bytes);
        }

        data
    }
}

/// An image with one export table, eager and delay imports of the same
/// functions, and two relocation blocks.
pub fn sample_image(is_64: bool) -> Vec<u8> {
    let functions = [
        ImportSpec::Name(0x15E, "ExitProcess"),
        ImportSpec::Ordinal(17),
        ImportSpec::Name(0x2A1, "GetProcAddress"),
    ];
    let user32 = [ImportSpec::Name(0x285, "MessageBoxW")];
    let dlls: [(&str, &[ImportSpec<'_>]); 2] = [("KERNEL32.dll", &functions), ("USER32.dll", &user32)];

    let mut builder = PeBuilder::new(is_64);
    builder
        .exports(
            0x2000,
            "sample.dll",
            1,
            &[
                ExportSlot::Address(0x1100),
                ExportSlot::Address(0x1200),
                ExportSlot::Forward("NTDLL.RtlAllocateHeap"),
                ExportSlot::Unused,
            ],
            &[("Alloc", 2), ("Bar", 1), ("Foo", 0)],
        )
        .imports(ImportLayout::Eager, 0x2400, &dlls)
        .imports(ImportLayout::Delay, 0x2800, &dlls)
        .relocations(
            0x2C00,
            &[(0x1000, &[0xA010, 0xA020][..]), (0x2000, &[0x3004, 0x0000][..])],
        );
    builder.build()
}
