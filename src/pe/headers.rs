//! PE header validation

use tracing::{debug, trace};

use crate::config::ParseOptions;
use crate::error::{PeError, Result};
use crate::pe::sections::SectionTable;
use crate::pe::types::*;
use crate::pe::utils::ReadExt;

/// Offset of the optional header relative to the NT header
const OPTIONAL_HEADER_OFFSET: usize = NT_SIGNATURE_SIZE + FILE_HEADER_SIZE;

/// Parse DOS header from data
pub fn parse_dos_header(data: &[u8]) -> Result<DosHeader> {
    let (Some(e_magic), Some(e_lfanew)) = (
        data.get(..DOS_HEADER_SIZE).and_then(|h| h.read_u16_le_at(0)),
        data.read_u32_le_at(E_LFANEW_OFFSET),
    ) else {
        return Err(PeError::TruncatedHeader {
            expected: DOS_HEADER_SIZE,
            actual: data.len(),
        });
    };

    if e_magic != DOS_SIGNATURE {
        return Err(PeError::NotMzSignature { found: e_magic });
    }

    Ok(DosHeader { e_magic, e_lfanew })
}

/// Parse COFF file header from data at offset
pub fn parse_file_header(data: &[u8], offset: usize) -> Result<FileHeader> {
    let raw = data
        .read_slice_at(offset, FILE_HEADER_SIZE)
        .ok_or(PeError::TruncatedHeader {
            expected: offset.saturating_add(FILE_HEADER_SIZE),
            actual: data.len(),
        })?;

    // Slice is exactly FILE_HEADER_SIZE bytes, every read below succeeds
    let u16_at = |o: usize| raw.read_u16_le_at(o).unwrap_or_default();
    let u32_at = |o: usize| raw.read_u32_le_at(o).unwrap_or_default();

    Ok(FileHeader {
        machine: Machine::from(u16_at(0)),
        number_of_sections: u16_at(2),
        time_date_stamp: u32_at(4),
        pointer_to_symbol_table: u32_at(8),
        number_of_symbols: u32_at(12),
        size_of_optional_header: u16_at(16),
        characteristics: FileCharacteristics::from_bits_retain(u16_at(18)),
    })
}

/// Borrowed view over the optional header.
///
/// Construction guarantees the slice covers at least the fixed part for its
/// magic, so the scalar accessors never fall off the end.
#[derive(Clone, Copy)]
pub struct OptionalHeader<'data> {
    magic: Magic,
    raw: &'data [u8],
}

impl std::fmt::Debug for OptionalHeader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionalHeader")
            .field("magic", &self.magic)
            .field("size", &self.raw.len())
            .field("image_base", &format_args!("{:#x}", self.image_base()))
            .field("entry_point", &format_args!("{:#x}", self.entry_point()))
            .finish_non_exhaustive()
    }
}

impl<'data> OptionalHeader<'data> {
    fn u16_at(&self, offset: usize) -> u16 {
        self.raw.read_u16_le_at(offset).unwrap_or_default()
    }

    fn u32_at(&self, offset: usize) -> u32 {
        self.raw.read_u32_le_at(offset).unwrap_or_default()
    }

    pub fn magic(&self) -> Magic {
        self.magic
    }

    pub fn is_64bit(&self) -> bool {
        self.magic == Magic::Pe32Plus
    }

    /// Declared size of the optional header, data directories included
    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn as_bytes(&self) -> &'data [u8] {
        self.raw
    }

    pub fn entry_point(&self) -> u32 {
        self.u32_at(16)
    }

    pub fn image_base(&self) -> u64 {
        match self.magic {
            Magic::Pe32 => self.u32_at(28) as u64,
            Magic::Pe32Plus => self.raw.read_u64_le_at(24).unwrap_or_default(),
        }
    }

    pub fn section_alignment(&self) -> u32 {
        self.u32_at(32)
    }

    pub fn file_alignment(&self) -> u32 {
        self.u32_at(36)
    }

    pub fn size_of_image(&self) -> u32 {
        self.u32_at(56)
    }

    pub fn size_of_headers(&self) -> u32 {
        self.u32_at(60)
    }

    pub fn checksum(&self) -> u32 {
        self.u32_at(CHECKSUM_FIELD_OFFSET)
    }

    pub fn subsystem(&self) -> Subsystem {
        Subsystem::from(self.u16_at(68))
    }

    pub fn dll_characteristics(&self) -> DllCharacteristics {
        DllCharacteristics::from_bits_retain(self.u16_at(70))
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        // Last field of the fixed part in both layouts
        self.u32_at(self.magic.fixed_optional_header_size() - 4)
    }

    /// Directory entry `index`, if declared and inside the optional header.
    pub fn data_directory(&self, index: usize) -> Option<DataDirectory> {
        if index >= self.number_of_rva_and_sizes() as usize {
            return None;
        }
        let offset = index
            .checked_mul(DATA_DIRECTORY_SIZE)?
            .checked_add(self.magic.fixed_optional_header_size())?;
        let entry = self.raw.read_slice_at(offset, DATA_DIRECTORY_SIZE)?;
        Some(DataDirectory {
            virtual_address: entry.read_u32_le_at(0)?,
            size: entry.read_u32_le_at(4)?,
        })
    }

    /// Number of directory entries that are both declared and present.
    pub fn data_directory_count(&self) -> usize {
        let room = (self.raw.len() - self.magic.fixed_optional_header_size()) / DATA_DIRECTORY_SIZE;
        room.min(self.number_of_rva_and_sizes() as usize)
    }
}

/// Validated NT headers and the regions they describe
#[derive(Debug, Clone, Copy)]
pub struct NtHeaders<'data> {
    pub offset: usize,
    pub file_header: FileHeader,
    pub optional_header: OptionalHeader<'data>,
    pub sections: SectionTable<'data>,
}

/// Validate the DOS stub and NT headers and locate the section table.
pub fn parse_nt_headers<'data>(data: &'data [u8], options: &ParseOptions) -> Result<NtHeaders<'data>> {
    let dos_header = parse_dos_header(data)?;
    let e_lfanew = dos_header.e_lfanew;

    if e_lfanew == 0 || e_lfanew >= options.max_header_offset || e_lfanew as usize >= data.len() {
        return Err(PeError::InvalidHeaderOffset {
            offset: e_lfanew,
            size: data.len(),
        });
    }
    let offset = e_lfanew as usize;

    // First probe: signature and file header
    let file_header = parse_file_header(data, offset + NT_SIGNATURE_SIZE)?;

    // Second probe: optional header and section table
    let optional_offset = offset + OPTIONAL_HEADER_OFFSET;
    let optional_size = file_header.size_of_optional_header as usize;
    let table_size = file_header.number_of_sections as usize * SECTION_HEADER_SIZE;
    let extent = optional_offset + optional_size + table_size;
    if extent > data.len() {
        return Err(PeError::TruncatedHeader {
            expected: extent,
            actual: data.len(),
        });
    }
    trace!(nt_offset = offset, extent, "header probes passed");

    if data.get(offset..offset + NT_SIGNATURE_SIZE) != Some(&PE_SIGNATURE[..]) {
        return Err(PeError::BadSignature);
    }

    let raw_magic = data
        .read_u16_le_at(optional_offset)
        .ok_or(PeError::TruncatedHeader {
            expected: optional_offset + 2,
            actual: data.len(),
        })?;
    let magic = Magic::from_raw(raw_magic).ok_or(PeError::UnsupportedMagic(raw_magic))?;

    let fixed = magic.fixed_optional_header_size();
    if optional_size < fixed {
        return Err(PeError::TruncatedHeader {
            expected: fixed,
            actual: optional_size,
        });
    }

    let optional_raw = &data[optional_offset..optional_offset + optional_size];
    let table_offset = optional_offset + optional_size;
    let sections = SectionTable::new(&data[table_offset..table_offset + table_size]);

    debug!(
        nt_offset = offset,
        magic = ?magic,
        sections = sections.len(),
        "validated NT headers"
    );

    Ok(NtHeaders {
        offset,
        file_header,
        optional_header: OptionalHeader {
            magic,
            raw: optional_raw,
        },
        sections,
    })
}
