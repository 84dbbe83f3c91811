//! Section table views and RVA translation

use std::borrow::Cow;
use std::ffi::CStr;

use crate::error::{PeError, Result};
use crate::pe::types::*;
use crate::pe::utils::{read_cstr, section_name_bytes, ReadExt};

/// Zero-copy view over one 40-byte `IMAGE_SECTION_HEADER`.
#[derive(Clone, Copy)]
pub struct SectionHeader<'data> {
    raw: &'data [u8; SECTION_HEADER_SIZE],
}

impl<'data> SectionHeader<'data> {
    fn field_u32(&self, offset: usize) -> u32 {
        let bytes: [u8; 4] = [
            self.raw[offset],
            self.raw[offset + 1],
            self.raw[offset + 2],
            self.raw[offset + 3],
        ];
        u32::from_le_bytes(bytes)
    }

    /// Raw 8-byte name field
    pub fn raw_name(&self) -> &'data [u8; 8] {
        let raw: &'data [u8; SECTION_HEADER_SIZE] = self.raw;
        raw[..8].try_into().unwrap_or(&[0; 8])
    }

    /// Name bytes up to the first NUL
    pub fn name_bytes(&self) -> &'data [u8] {
        section_name_bytes(self.raw_name())
    }

    /// Name decoded lossily as UTF-8
    pub fn name(&self) -> Cow<'data, str> {
        String::from_utf8_lossy(self.name_bytes())
    }

    pub fn virtual_size(&self) -> u32 {
        self.field_u32(8)
    }

    pub fn virtual_address(&self) -> u32 {
        self.field_u32(12)
    }

    pub fn size_of_raw_data(&self) -> u32 {
        self.field_u32(16)
    }

    pub fn pointer_to_raw_data(&self) -> u32 {
        self.field_u32(20)
    }

    pub fn characteristics(&self) -> SectionCharacteristics {
        SectionCharacteristics::from_bits_retain(self.field_u32(36))
    }

    /// True when `rva` lies in `[VirtualAddress, VirtualAddress + SizeOfRawData)`.
    ///
    /// Only the file-backed extent counts; the tail of a section that exists
    /// purely in memory has no bytes in the buffer to translate to.
    pub fn contains_rva(&self, rva: u32) -> bool {
        let start = self.virtual_address() as u64;
        let end = start + self.size_of_raw_data() as u64;
        (start..end).contains(&(rva as u64))
    }

    /// File offset of `rva`, assuming `contains_rva(rva)`.
    fn offset_of(&self, rva: u32) -> u64 {
        self.pointer_to_raw_data() as u64 + (rva - self.virtual_address()) as u64
    }
}

impl std::fmt::Debug for SectionHeader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionHeader")
            .field("name", &self.name())
            .field("virtual_address", &format_args!("{:#x}", self.virtual_address()))
            .field("virtual_size", &format_args!("{:#x}", self.virtual_size()))
            .field("pointer_to_raw_data", &format_args!("{:#x}", self.pointer_to_raw_data()))
            .field("size_of_raw_data", &format_args!("{:#x}", self.size_of_raw_data()))
            .finish()
    }
}

/// Borrowed section table, in file order.
#[derive(Clone, Copy)]
pub struct SectionTable<'data> {
    raw: &'data [u8],
}

impl<'data> SectionTable<'data> {
    /// `raw` must hold a whole number of section headers; any trailing
    /// partial header is ignored.
    pub fn new(raw: &'data [u8]) -> Self {
        let whole = raw.len() - raw.len() % SECTION_HEADER_SIZE;
        Self { raw: &raw[..whole] }
    }

    pub fn len(&self) -> usize {
        self.raw.len() / SECTION_HEADER_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<SectionHeader<'data>> {
        let start = index.checked_mul(SECTION_HEADER_SIZE)?;
        let raw = self.raw.read_slice_at(start, SECTION_HEADER_SIZE)?;
        Some(SectionHeader {
            raw: raw.try_into().ok()?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = SectionHeader<'data>> + 'data {
        self.raw
            .chunks_exact(SECTION_HEADER_SIZE)
            .filter_map(|chunk| chunk.try_into().ok().map(|raw| SectionHeader { raw }))
    }

    /// First section whose file-backed extent contains `rva`.
    ///
    /// Overlapping sections are not rejected: the first match in table order
    /// wins, so the result for crafted overlapping layouts depends on input.
    pub fn section_containing_rva(&self, rva: u32) -> Option<SectionHeader<'data>> {
        self.iter().find(|s| s.contains_rva(rva))
    }

    pub fn section_by_name(&self, name: &str) -> Option<SectionHeader<'data>> {
        self.iter().find(|s| s.name_bytes() == name.as_bytes())
    }

    /// Convert RVA to file offset. No check against the buffer is made here.
    pub fn rva_to_offset(&self, rva: u32) -> Option<u64> {
        self.section_containing_rva(rva).map(|s| s.offset_of(rva))
    }

    /// Convert file offset to RVA
    pub fn offset_to_rva(&self, offset: u64) -> Option<u32> {
        self.iter().find_map(|s| {
            let raw_start = s.pointer_to_raw_data() as u64;
            let raw_end = raw_start + s.size_of_raw_data() as u64;
            if (raw_start..raw_end).contains(&offset) {
                u32::try_from(offset - raw_start)
                    .ok()
                    .and_then(|delta| s.virtual_address().checked_add(delta))
            } else {
                None
            }
        })
    }
}

impl std::fmt::Debug for SectionTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// A translated RVA whose byte range is known to lie inside the buffer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CheckedRange<'data> {
    rva: u32,
    offset: usize,
    bytes: &'data [u8],
}

impl<'data> CheckedRange<'data> {
    pub(crate) fn new(rva: u32, offset: usize, bytes: &'data [u8]) -> Self {
        Self { rva, offset, bytes }
    }

    pub fn rva(&self) -> u32 {
        self.rva
    }

    /// Offset from the start of the buffer (`ViewBase`).
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn bytes(&self) -> &'data [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Address inside the caller's buffer.
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }
}

impl std::fmt::Debug for CheckedRange<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckedRange")
            .field("rva", &format_args!("{:#x}", self.rva))
            .field("offset", &format_args!("{:#x}", self.offset))
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Translate `rva` through `sections` and bounds-check `len` bytes in `data`.
pub(crate) fn translate<'data>(
    data: &'data [u8],
    sections: &SectionTable<'data>,
    rva: u32,
    len: usize,
) -> Option<CheckedRange<'data>> {
    // RVA 0 means "absent" throughout the format
    if rva == 0 {
        return None;
    }
    let offset = usize::try_from(sections.rva_to_offset(rva)?).ok()?;
    let bytes = data.read_slice_at(offset, len)?;
    Some(CheckedRange::new(rva, offset, bytes))
}

/// Everything needed to turn RVAs and VAs into checked byte ranges.
///
/// Copied into each directory view so views borrow only the buffer.
#[derive(Clone, Copy)]
pub(crate) struct Translator<'data> {
    pub data: &'data [u8],
    pub sections: SectionTable<'data>,
    pub image_base: u64,
    pub max_name_length: usize,
}

impl<'data> Translator<'data> {
    pub fn range(&self, rva: u32, len: usize) -> Result<CheckedRange<'data>> {
        translate(self.data, &self.sections, rva, len).ok_or(PeError::Bounds { rva, len })
    }

    /// `None` when `va` is below the image base or more than 4 GiB above it.
    pub fn va_to_rva(&self, va: u64) -> Option<u32> {
        va.checked_sub(self.image_base)
            .and_then(|rva| u32::try_from(rva).ok())
    }

    /// Rebase a 32-bit VA, wrapping modulo 2^32.
    pub fn va32_to_rva(&self, va: u32) -> u32 {
        va.wrapping_sub(self.image_base as u32)
    }

    pub fn va_range(&self, va: u64, len: usize) -> Result<CheckedRange<'data>> {
        let rva = self.va_to_rva(va).ok_or(PeError::Bounds {
            rva: va as u32,
            len,
        })?;
        self.range(rva, len)
    }

    /// NUL-terminated string at `rva`, capped at `max_name_length` bytes.
    pub fn cstr(&self, rva: u32) -> Result<&'data CStr> {
        let start = self.range(rva, 1)?;
        read_cstr(self.data, start.offset(), self.max_name_length).ok_or(
            PeError::UnterminatedString {
                rva,
                limit: self.max_name_length,
            },
        )
    }
}

impl std::fmt::Debug for Translator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("data_len", &self.data.len())
            .field("sections", &self.sections.len())
            .field("image_base", &format_args!("{:#x}", self.image_base))
            .field("max_name_length", &self.max_name_length)
            .finish()
    }
}
