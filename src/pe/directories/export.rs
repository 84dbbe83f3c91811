//! Export table parsing

use std::cmp::Ordering;
use std::ffi::CStr;

use tracing::debug;

use crate::error::{PeError, Result};
use crate::pe::sections::{CheckedRange, Translator};
use crate::pe::types::*;
use crate::pe::utils::ReadExt;

/// One exported function slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportEntry<'data> {
    /// Biased ordinal (`Base + address_index`)
    pub ordinal: u32,
    pub name: Option<&'data CStr>,
    /// Index into the name pointer table, for named exports
    pub hint: Option<u32>,
    /// Index into the address table (the unbiased ordinal)
    pub address_index: u32,
}

/// What an export slot resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFunction<'data> {
    /// Code or data inside the image
    Resolved {
        rva: u32,
        address: CheckedRange<'data>,
    },
    /// `"OTHERDLL.Function"` or `"OTHERDLL.#12"`
    Forwarded { name: &'data CStr },
}

impl<'data> ExportFunction<'data> {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded { .. })
    }
}

/// Export directory with its three parallel tables
#[derive(Clone, Copy)]
pub struct ExportTable<'data> {
    translator: Translator<'data>,
    directory: DataDirectory,
    header: CheckedRange<'data>,
    address_table: &'data [u8],
    name_table: Option<&'data [u8]>,
    ordinal_table: Option<&'data [u8]>,
}

impl std::fmt::Debug for ExportTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportTable")
            .field("directory", &self.directory)
            .field("base", &self.base())
            .field("number_of_functions", &self.number_of_functions())
            .field("number_of_names", &self.number_of_names())
            .finish_non_exhaustive()
    }
}

/// Translate a table of `count` entries of `width` bytes.
///
/// A zero count is never translated; a zero RVA marks an absent table.
fn table<'data>(
    translator: &Translator<'data>,
    rva: u32,
    count: u32,
    width: usize,
) -> Result<Option<&'data [u8]>> {
    if count == 0 {
        return Ok(Some(&[]));
    }
    if rva == 0 {
        return Ok(None);
    }
    let len = (count as usize)
        .checked_mul(width)
        .ok_or(PeError::Bounds { rva, len: usize::MAX })?;
    Ok(Some(translator.range(rva, len)?.bytes()))
}

impl<'data> ExportTable<'data> {
    pub(crate) fn parse(translator: Translator<'data>, directory: DataDirectory) -> Result<Self> {
        if directory.is_empty() {
            return Err(PeError::NoExportDirectory);
        }

        let header = translator.range(directory.virtual_address, EXPORT_DIRECTORY_SIZE)?;
        let raw = header.bytes();
        let field = |offset: usize| raw.read_u32_le_at(offset).unwrap_or_default();

        let number_of_functions = field(20);
        let number_of_names = field(24);

        let address_table = table(&translator, field(28), number_of_functions, 4)?
            .ok_or(PeError::Bounds { rva: 0, len: 4 })?;
        let name_table = table(&translator, field(32), number_of_names, 4)?;
        let ordinal_table = table(&translator, field(36), number_of_names, 2)?;

        debug!(
            functions = number_of_functions,
            names = number_of_names,
            "parsed export directory"
        );

        Ok(Self {
            translator,
            directory,
            header,
            address_table,
            name_table,
            ordinal_table,
        })
    }

    fn field(&self, offset: usize) -> u32 {
        self.header.bytes().read_u32_le_at(offset).unwrap_or_default()
    }

    /// The export data directory entry this table was read from
    pub fn directory(&self) -> DataDirectory {
        self.directory
    }

    pub fn time_date_stamp(&self) -> u32 {
        self.field(4)
    }

    pub fn base(&self) -> u32 {
        self.field(16)
    }

    pub fn number_of_functions(&self) -> u32 {
        self.field(20)
    }

    pub fn number_of_names(&self) -> u32 {
        self.field(24)
    }

    /// Name the DLL was linked under
    pub fn dll_name(&self) -> Result<&'data CStr> {
        self.translator.cstr(self.field(12))
    }

    fn address_at(&self, index: u32) -> Option<u32> {
        self.address_table.read_u32_le_at(index as usize * 4)
    }

    fn name_at(&self, index: u32) -> Result<&'data CStr> {
        let rva = self
            .name_table
            .and_then(|t| t.read_u32_le_at(index as usize * 4))
            .ok_or(PeError::IndexOutOfRange {
                index: index as usize,
                count: self.number_of_names() as usize,
            })?;
        self.translator.cstr(rva)
    }

    fn ordinal_at(&self, index: u32) -> Option<u16> {
        self.ordinal_table
            .and_then(|t| t.read_u16_le_at(index as usize * 2))
    }

    fn named_tables(&self) -> bool {
        self.name_table.is_some() && self.ordinal_table.is_some()
    }

    fn entry_for_name_index(&self, name_index: u32, name: &'data CStr) -> Result<ExportEntry<'data>> {
        let address_index = self
            .ordinal_at(name_index)
            .ok_or_else(|| PeError::NotFound(name.to_string_lossy().into_owned()))?
            as u32;
        Ok(ExportEntry {
            ordinal: self.base().wrapping_add(address_index),
            name: Some(name),
            hint: Some(name_index),
            address_index,
        })
    }

    fn entry_at(&self, index: u32, name_index: Option<u32>) -> Result<ExportEntry<'data>> {
        let name = name_index.map(|i| self.name_at(i)).transpose()?;
        Ok(ExportEntry {
            ordinal: self.base().wrapping_add(index),
            name,
            hint: name_index,
            address_index: index,
        })
    }

    /// Entry for address-table slot `index`.
    ///
    /// The name, if any, is found by scanning the ordinal table for a slot
    /// that points back at `index`. Use [`entries`](Self::entries) to walk
    /// every slot.
    pub fn entry(&self, index: u32) -> Result<ExportEntry<'data>> {
        if index >= self.number_of_functions() {
            return Err(PeError::IndexOutOfRange {
                index: index as usize,
                count: self.number_of_functions() as usize,
            });
        }

        let name_index = if self.named_tables() {
            (0..self.number_of_names()).find(|&i| self.ordinal_at(i).map(u32::from) == Some(index))
        } else {
            None
        };
        self.entry_at(index, name_index)
    }

    /// Name-table index for every address slot, first name wins.
    fn name_indices(&self) -> Vec<Option<u32>> {
        // The address table is bounds-checked, so this is at most len / 4
        let mut slots = vec![None; self.address_table.len() / 4];
        if self.named_tables() {
            for i in 0..self.number_of_names() {
                let Some(ordinal) = self.ordinal_at(i) else { break };
                if let Some(slot) = slots.get_mut(ordinal as usize) {
                    slot.get_or_insert(i);
                }
            }
        }
        slots
    }

    /// All address-table slots in order, including unused ones.
    ///
    /// The ordinal table is read once up front, so enumeration is linear in
    /// the size of the tables.
    pub fn entries(&self) -> impl Iterator<Item = Result<ExportEntry<'data>>> + '_ {
        let names = self.name_indices();
        (0..self.number_of_functions()).map(move |i| {
            let name_index = names.get(i as usize).copied().flatten();
            self.entry_at(i, name_index)
        })
    }

    /// Look up a named export by binary search over the name pointer table.
    ///
    /// The table is assumed sorted in byte order, as linkers emit it. A table
    /// that is not sorted can make this miss names that are present; use
    /// [`lookup_by_name_linear`](Self::lookup_by_name_linear) for such images.
    pub fn lookup_by_name(&self, name: &str) -> Result<ExportEntry<'data>> {
        let not_found = || PeError::NotFound(name.to_string());
        if !self.named_tables() || self.number_of_names() == 0 {
            return Err(not_found());
        }

        let needle = name.as_bytes();
        let mut low = 0u32;
        let mut high = self.number_of_names();
        while low < high {
            let mid = low + (high - low) / 2;
            let candidate = self.name_at(mid)?;
            match candidate.to_bytes().cmp(needle) {
                Ordering::Equal => return self.entry_for_name_index(mid, candidate),
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
            }
        }

        Err(not_found())
    }

    /// Look up a named export by scanning every name in table order.
    pub fn lookup_by_name_linear(&self, name: &str) -> Result<ExportEntry<'data>> {
        if self.named_tables() {
            for i in 0..self.number_of_names() {
                let candidate = self.name_at(i)?;
                if candidate.to_bytes() == name.as_bytes() {
                    return self.entry_for_name_index(i, candidate);
                }
            }
        }
        Err(PeError::NotFound(name.to_string()))
    }

    /// Look up an export by biased ordinal
    pub fn lookup_by_ordinal(&self, ordinal: u32) -> Result<ExportEntry<'data>> {
        match ordinal.checked_sub(self.base()) {
            Some(index) if index < self.number_of_functions() => self.entry(index),
            _ => Err(PeError::NotFound(format!("#{ordinal}"))),
        }
    }

    /// Resolve an entry to its code address or forwarder string.
    pub fn function(&self, entry: &ExportEntry<'data>) -> Result<ExportFunction<'data>> {
        let rva = self
            .address_at(entry.address_index)
            .ok_or(PeError::IndexOutOfRange {
                index: entry.address_index as usize,
                count: self.number_of_functions() as usize,
            })?;

        if self.directory.contains(rva) {
            return Ok(ExportFunction::Forwarded {
                name: self.translator.cstr(rva)?,
            });
        }

        let address = self.translator.range(rva, 1)?;
        Ok(ExportFunction::Resolved { rva, address })
    }
}
