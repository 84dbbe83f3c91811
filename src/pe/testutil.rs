//! Synthetic image builder for unit tests

use crate::pe::types::*;

/// RVA of the single `.data` section every built image carries
pub(crate) const TEST_SECTION_RVA: u32 = 0x1000;
const TEST_SECTION_OFFSET: usize = 0x400;
const TEST_SECTION_SIZE: usize = 0x1000;
const NT_OFFSET: usize = 0x80;
const OPTIONAL_OFFSET: usize = NT_OFFSET + NT_SIGNATURE_SIZE + FILE_HEADER_SIZE;

/// Builds a one-section image with all 16 data directories declared.
pub(crate) struct ImageBuilder {
    data: Vec<u8>,
    magic: Magic,
}

impl ImageBuilder {
    pub fn new(is_64: bool) -> Self {
        let magic = if is_64 { Magic::Pe32Plus } else { Magic::Pe32 };
        let mut data = vec![0u8; TEST_SECTION_OFFSET + TEST_SECTION_SIZE];
        let put_u16 = |data: &mut Vec<u8>, at: usize, v: u16| data[at..at + 2].copy_from_slice(&v.to_le_bytes());
        let put_u32 = |data: &mut Vec<u8>, at: usize, v: u32| data[at..at + 4].copy_from_slice(&v.to_le_bytes());

        put_u16(&mut data, 0, DOS_SIGNATURE);
        put_u32(&mut data, E_LFANEW_OFFSET, NT_OFFSET as u32);
        data[NT_OFFSET..NT_OFFSET + 4].copy_from_slice(&PE_SIGNATURE);

        let file_header = NT_OFFSET + NT_SIGNATURE_SIZE;
        put_u16(&mut data, file_header, if is_64 { 0x8664 } else { 0x014c });
        put_u16(&mut data, file_header + 2, 1);
        let optional_size = magic.fixed_optional_header_size() + 16 * DATA_DIRECTORY_SIZE;
        put_u16(&mut data, file_header + 16, optional_size as u16);

        put_u16(&mut data, OPTIONAL_OFFSET, magic.raw());
        if is_64 {
            data[OPTIONAL_OFFSET + 24..OPTIONAL_OFFSET + 32]
                .copy_from_slice(&0x1_4000_0000u64.to_le_bytes());
        } else {
            put_u32(&mut data, OPTIONAL_OFFSET + 28, 0x40_0000);
        }
        put_u32(
            &mut data,
            OPTIONAL_OFFSET + magic.fixed_optional_header_size() - 4,
            16,
        );

        let section = OPTIONAL_OFFSET + optional_size;
        data[section..section + 5].copy_from_slice(b".data");
        put_u32(&mut data, section + 8, TEST_SECTION_SIZE as u32);
        put_u32(&mut data, section + 12, TEST_SECTION_RVA);
        put_u32(&mut data, section + 16, TEST_SECTION_SIZE as u32);
        put_u32(&mut data, section + 20, TEST_SECTION_OFFSET as u32);
        put_u32(&mut data, section + 36, 0xC000_0040);

        Self { data, magic }
    }

    pub fn image_base(&self) -> u64 {
        match self.magic {
            Magic::Pe32 => 0x40_0000,
            Magic::Pe32Plus => 0x1_4000_0000,
        }
    }

    fn offset(rva: u32) -> usize {
        (rva - TEST_SECTION_RVA) as usize + TEST_SECTION_OFFSET
    }

    pub fn write_bytes(&mut self, rva: u32, bytes: &[u8]) {
        let at = Self::offset(rva);
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_u16(&mut self, rva: u32, value: u16) {
        self.write_bytes(rva, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, rva: u32, value: u32) {
        self.write_bytes(rva, &value.to_le_bytes());
    }

    pub fn write_thunk(&mut self, is_64: bool, rva: u32, value: u64) {
        if is_64 {
            self.write_bytes(rva, &value.to_le_bytes());
        } else {
            self.write_u32(rva, value as u32);
        }
    }

    pub fn set_directory(&mut self, index: usize, rva: u32, size: u32) {
        let at = OPTIONAL_OFFSET + self.magic.fixed_optional_header_size() + index * DATA_DIRECTORY_SIZE;
        self.data[at..at + 4].copy_from_slice(&rva.to_le_bytes());
        self.data[at + 4..at + 8].copy_from_slice(&size.to_le_bytes());
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}
