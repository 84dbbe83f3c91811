//! Base relocation table parsing

use tracing::{debug, warn};

use crate::error::{PeError, Result};
use crate::pe::sections::Translator;
use crate::pe::types::*;
use crate::pe::utils::ReadExt;

/// Relocation types (high 4 bits of an entry)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationType {
    /// Padding, no fixup
    Absolute,
    High,
    Low,
    HighLow,
    HighAdj,
    /// MIPS JMPADDR, ARM MOV32, RISC-V HIGH20
    MachineSpecific5,
    Section,
    /// THUMB MOV32, RISC-V LOW12I
    MachineSpecific7,
    RiscvLow12S,
    MipsJmpAddr16,
    Dir64,
    Other(u8),
}

impl RelocationType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Absolute,
            1 => Self::High,
            2 => Self::Low,
            3 => Self::HighLow,
            4 => Self::HighAdj,
            5 => Self::MachineSpecific5,
            6 => Self::Section,
            7 => Self::MachineSpecific7,
            8 => Self::RiscvLow12S,
            9 => Self::MipsJmpAddr16,
            10 => Self::Dir64,
            other => Self::Other(other),
        }
    }
}

/// One fixup location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationEntry {
    /// Position of the owning block in the directory
    pub block_index: u32,
    /// Page RVA of the owning block
    pub block_rva: u32,
    pub kind: RelocationType,
    /// 12-bit offset within the page
    pub offset: u16,
    /// `block_rva + offset`
    pub rva: u32,
    /// Target address at the preferred image base
    pub va: u64,
}

/// Walk every `IMAGE_BASE_RELOCATION` block inside `directory`.
///
/// Blocks are read back to back from the translated start of the directory
/// until `directory.size` bytes are consumed.
pub(crate) fn parse_relocations(
    translator: &Translator<'_>,
    directory: DataDirectory,
    max_blocks: usize,
) -> Result<Vec<RelocationEntry>> {
    if directory.is_empty() {
        return Ok(Vec::new());
    }

    let data = translator.data;
    let start = translator
        .range(directory.virtual_address, BASE_RELOCATION_SIZE)?
        .offset();
    let end = start.saturating_add(directory.size as usize);

    let mut entries = Vec::new();
    let mut cursor = start;
    let mut block_index = 0u32;
    while cursor < end {
        if block_index as usize >= max_blocks {
            warn!(limit = max_blocks, "relocation block limit reached");
            return Err(PeError::ScanLimitExceeded {
                what: "relocation blocks",
                limit: max_blocks,
            });
        }

        let header_rva = directory
            .virtual_address
            .wrapping_add((cursor - start) as u32);
        let header = data
            .read_slice_at(cursor, BASE_RELOCATION_SIZE)
            .ok_or(PeError::Bounds {
                rva: header_rva,
                len: BASE_RELOCATION_SIZE,
            })?;
        let block_rva = header.read_u32_le_at(0).unwrap_or_default();
        let size_of_block = header.read_u32_le_at(4).unwrap_or_default();

        if (size_of_block as usize) < BASE_RELOCATION_SIZE {
            return Err(PeError::InvalidRelocationBlock {
                rva: block_rva,
                size: size_of_block,
            });
        }

        let block = data
            .read_slice_at(cursor, size_of_block as usize)
            .ok_or(PeError::Bounds {
                rva: header_rva,
                len: size_of_block as usize,
            })?;

        for word in block[BASE_RELOCATION_SIZE..].chunks_exact(2) {
            let value = u16::from_le_bytes([word[0], word[1]]);
            let offset = value & 0x0FFF;
            let rva = block_rva.wrapping_add(offset as u32);
            entries.push(RelocationEntry {
                block_index,
                block_rva,
                kind: RelocationType::from_u8((value >> 12) as u8),
                offset,
                rva,
                va: translator.image_base.wrapping_add(rva as u64),
            });
        }

        cursor += size_of_block as usize;
        block_index += 1;
    }

    debug!(blocks = block_index, entries = entries.len(), "parsed base relocations");
    Ok(entries)
}
