//! Mapped PE image

use std::ffi::CStr;

pub mod checksum;
pub mod directories;
pub mod headers;
pub mod sections;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod testutil;

use crate::config::ParseOptions;
use crate::error::{PeError, Result};

pub use directories::*;
use headers::*;
pub use headers::OptionalHeader;
use sections::Translator;
pub use sections::{CheckedRange, SectionHeader, SectionTable};
pub use types::*;

/// A validated PE image borrowed from a caller-owned buffer.
///
/// Construction validates the DOS and NT headers and the placement of the
/// section table; everything else is read on demand. Nothing is copied, and
/// every view handed out borrows the same buffer.
#[derive(Clone)]
pub struct MappedImage<'data> {
    data: &'data [u8],
    nt: NtHeaders<'data>,
    options: ParseOptions,
}

impl std::fmt::Debug for MappedImage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedImage")
            .field("len", &self.data.len())
            .field("nt", &self.nt)
            .field("options", &self.options)
            .finish()
    }
}

impl<'data> MappedImage<'data> {
    /// Validate `data` with default options
    pub fn new(data: &'data [u8]) -> Result<Self> {
        Self::with_options(data, ParseOptions::default())
    }

    /// Validate `data` with custom options
    pub fn with_options(data: &'data [u8], options: ParseOptions) -> Result<Self> {
        let nt = parse_nt_headers(data, &options)?;
        Ok(Self { data, nt, options })
    }

    fn translator(&self) -> Translator<'data> {
        Translator {
            data: self.data,
            sections: self.nt.sections,
            image_base: self.image_base(),
            max_name_length: self.options.max_name_length,
        }
    }

    // Buffer access

    pub fn as_bytes(&self) -> &'data [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Start of the caller's buffer
    pub fn view_base(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    // Header access methods

    /// File offset of the `PE\0\0` signature
    pub fn nt_headers_offset(&self) -> usize {
        self.nt.offset
    }

    pub fn file_header(&self) -> &FileHeader {
        &self.nt.file_header
    }

    pub fn optional_header(&self) -> OptionalHeader<'data> {
        self.nt.optional_header
    }

    pub fn magic(&self) -> Magic {
        self.nt.optional_header.magic()
    }

    pub fn is_64bit(&self) -> bool {
        self.nt.optional_header.is_64bit()
    }

    pub fn machine(&self) -> Machine {
        self.nt.file_header.machine
    }

    pub fn characteristics(&self) -> FileCharacteristics {
        self.nt.file_header.characteristics
    }

    pub fn time_date_stamp(&self) -> u32 {
        self.nt.file_header.time_date_stamp
    }

    pub fn number_of_sections(&self) -> u16 {
        self.nt.file_header.number_of_sections
    }

    /// Entry point RVA
    pub fn entry_point(&self) -> u32 {
        self.nt.optional_header.entry_point()
    }

    pub fn image_base(&self) -> u64 {
        self.nt.optional_header.image_base()
    }

    pub fn size_of_image(&self) -> u32 {
        self.nt.optional_header.size_of_image()
    }

    pub fn size_of_headers(&self) -> u32 {
        self.nt.optional_header.size_of_headers()
    }

    pub fn subsystem(&self) -> Subsystem {
        self.nt.optional_header.subsystem()
    }

    pub fn dll_characteristics(&self) -> DllCharacteristics {
        self.nt.optional_header.dll_characteristics()
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        self.nt.optional_header.number_of_rva_and_sizes()
    }

    // Section access methods

    pub fn sections(&self) -> SectionTable<'data> {
        self.nt.sections
    }

    pub fn section_by_name(&self, name: &str) -> Option<SectionHeader<'data>> {
        self.nt.sections.section_by_name(name)
    }

    /// First section whose file-backed extent contains `rva`
    pub fn rva_to_section(&self, rva: u32) -> Option<SectionHeader<'data>> {
        self.nt.sections.section_containing_rva(rva)
    }

    /// Section containing the entry point
    pub fn entry_section(&self) -> Option<SectionHeader<'data>> {
        self.rva_to_section(self.entry_point())
    }

    // Address translation

    /// Translate `rva` and check that `len` bytes there lie inside the buffer.
    pub fn rva_to_range(&self, rva: u32, len: usize) -> Result<CheckedRange<'data>> {
        self.translator().range(rva, len)
    }

    /// Like [`rva_to_range`](Self::rva_to_range) for a virtual address at the
    /// preferred image base.
    pub fn va_to_range(&self, va: u64, len: usize) -> Result<CheckedRange<'data>> {
        self.translator().va_range(va, len)
    }

    /// Convert RVA to file offset.
    ///
    /// Only the section table is consulted; the offset may lie past the end
    /// of a truncated buffer. Use [`rva_to_range`](Self::rva_to_range) before
    /// reading.
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        self.nt
            .sections
            .rva_to_offset(rva)
            .and_then(|offset| usize::try_from(offset).ok())
    }

    /// Convert file offset to RVA
    pub fn offset_to_rva(&self, offset: usize) -> Option<u32> {
        self.nt.sections.offset_to_rva(offset as u64)
    }

    /// NUL-terminated string at `rva`, at most `max_name_length` bytes long
    pub fn read_cstr_at_rva(&self, rva: u32) -> Result<&'data CStr> {
        self.translator().cstr(rva)
    }

    // Data directories

    /// Directory entry `index`.
    ///
    /// Fails with `IndexOutOfRange` when the index is not below
    /// `NumberOfRvaAndSizes` or the entry lies outside the optional header.
    pub fn data_directory(&self, index: usize) -> Result<DataDirectory> {
        let optional = self.nt.optional_header;
        optional
            .data_directory(index)
            .ok_or(PeError::IndexOutOfRange {
                index,
                count: optional.data_directory_count(),
            })
    }

    /// Every readable directory entry with its index, empty ones included
    pub fn data_directories(&self) -> impl Iterator<Item = (usize, DataDirectory)> + '_ {
        let optional = self.nt.optional_header;
        (0..optional.data_directory_count())
            .filter_map(move |i| optional.data_directory(i).map(|d| (i, d)))
    }

    // Directory parsers

    pub fn exports(&self) -> Result<ExportTable<'data>> {
        let directory = self
            .data_directory(IMAGE_DIRECTORY_ENTRY_EXPORT)
            .map_err(|_| PeError::NoExportDirectory)?;
        ExportTable::parse(self.translator(), directory)
    }

    pub fn imports(&self, kind: ImportKind) -> Result<ImportTable<'data>> {
        let directory = self
            .data_directory(kind.directory_index())
            .map_err(|_| PeError::NoImportDirectory)?;
        ImportTable::parse(self.translator(), self.magic(), kind, directory, &self.options)
    }

    /// Import hash over the eager import table
    pub fn import_hash(&self) -> Result<String> {
        self.imports(ImportKind::Eager)?.import_hash()
    }

    /// Base relocations; empty when the image has none
    pub fn relocations(&self) -> Result<Vec<RelocationEntry>> {
        let directory = match self.data_directory(IMAGE_DIRECTORY_ENTRY_BASERELOC) {
            Ok(directory) => directory,
            Err(_) => return Ok(Vec::new()),
        };
        reloc::parse_relocations(
            &self.translator(),
            directory,
            self.options.max_relocation_blocks,
        )
    }

    // Checksum

    /// File offset of the optional header `CheckSum` field
    pub fn checksum_offset(&self) -> usize {
        self.nt.offset + NT_SIGNATURE_SIZE + FILE_HEADER_SIZE + CHECKSUM_FIELD_OFFSET
    }

    pub fn stored_checksum(&self) -> u32 {
        self.nt.optional_header.checksum()
    }

    /// Checksum of the whole buffer, excluding the stored field
    pub fn compute_checksum(&self) -> u32 {
        checksum::compute_checksum(self.data, self.checksum_offset())
    }

    /// True when the stored checksum matches, or no checksum is stored
    pub fn checksum_valid(&self) -> bool {
        let stored = self.stored_checksum();
        stored == 0 || stored == self.compute_checksum()
    }
}
