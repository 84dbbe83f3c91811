//! Import table parsing, eager and delay-load

use std::ffi::CStr;

use tracing::{debug, trace, warn};

use crate::config::ParseOptions;
use crate::error::{PeError, Result};
use crate::pe::sections::Translator;
use crate::pe::types::*;
use crate::pe::utils::{read_cstr, ReadExt};

/// Which import directory to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    /// `IMAGE_DIRECTORY_ENTRY_IMPORT`, resolved by the loader at load time
    Eager,
    /// `IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT`, resolved on first call
    Delay,
}

impl ImportKind {
    pub fn directory_index(self) -> usize {
        match self {
            Self::Eager => IMAGE_DIRECTORY_ENTRY_IMPORT,
            Self::Delay => IMAGE_DIRECTORY_ENTRY_DELAY_IMPORT,
        }
    }

    pub fn descriptor_size(self) -> usize {
        match self {
            Self::Eager => IMPORT_DESCRIPTOR_SIZE,
            Self::Delay => DELAY_IMPORT_DESCRIPTOR_SIZE,
        }
    }
}

/// One import descriptor, in either layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDescriptor {
    /// `IMAGE_IMPORT_DESCRIPTOR`
    Eager {
        original_first_thunk: u32,
        time_date_stamp: u32,
        forwarder_chain: u32,
        name: u32,
        first_thunk: u32,
    },
    /// `IMAGE_DELAYLOAD_DESCRIPTOR`
    Delay {
        attributes: u32,
        dll_name: u32,
        module_handle: u32,
        import_address_table: u32,
        import_name_table: u32,
        bound_import_address_table: u32,
        unload_information_table: u32,
        time_date_stamp: u32,
    },
}

impl ImportDescriptor {
    fn parse(kind: ImportKind, raw: &[u8]) -> Self {
        let field = |index: usize| raw.read_u32_le_at(index * 4).unwrap_or_default();
        match kind {
            ImportKind::Eager => Self::Eager {
                original_first_thunk: field(0),
                time_date_stamp: field(1),
                forwarder_chain: field(2),
                name: field(3),
                first_thunk: field(4),
            },
            ImportKind::Delay => Self::Delay {
                attributes: field(0),
                dll_name: field(1),
                module_handle: field(2),
                import_address_table: field(3),
                import_name_table: field(4),
                bound_import_address_table: field(5),
                unload_information_table: field(6),
                time_date_stamp: field(7),
            },
        }
    }

    /// True for version 1 delay descriptors, whose addresses are VAs.
    pub fn uses_virtual_addresses(&self) -> bool {
        matches!(self, Self::Delay { attributes, .. } if attributes & 1 == 0)
    }

    /// Address of the DLL name (RVA, or VA for v1 delay descriptors)
    pub fn name_address(&self) -> u32 {
        match *self {
            Self::Eager { name, .. } => name,
            Self::Delay { dll_name, .. } => dll_name,
        }
    }

    /// Address of the thunk array describing what is imported.
    pub fn lookup_table_address(&self) -> u32 {
        match *self {
            Self::Eager {
                original_first_thunk,
                first_thunk,
                ..
            } => {
                if original_first_thunk != 0 {
                    original_first_thunk
                } else {
                    first_thunk
                }
            }
            Self::Delay {
                import_name_table, ..
            } => import_name_table,
        }
    }

    /// Address of the import address table the loader patches.
    pub fn iat_address(&self) -> u32 {
        match *self {
            Self::Eager { first_thunk, .. } => first_thunk,
            Self::Delay {
                import_address_table,
                ..
            } => import_address_table,
        }
    }
}

/// One imported function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportEntry<'data> {
    ByOrdinal(u16),
    ByName { hint: u16, name: &'data CStr },
}

impl<'data> ImportEntry<'data> {
    pub fn name(&self) -> Option<&'data CStr> {
        match self {
            Self::ByName { name, .. } => Some(name),
            Self::ByOrdinal(_) => None,
        }
    }

    pub fn ordinal(&self) -> Option<u16> {
        match self {
            Self::ByOrdinal(ordinal) => Some(*ordinal),
            Self::ByName { .. } => None,
        }
    }
}

/// Map a descriptor address to an RVA, honouring v1 delay descriptors.
///
/// v1 fields are 32 bits wide even in PE32+ images, so the VA is rebased
/// modulo 2^32 against the low half of the image base.
fn resolve(translator: &Translator<'_>, descriptor: &ImportDescriptor, address: u32) -> u32 {
    if descriptor.uses_virtual_addresses() {
        translator.va32_to_rva(address)
    } else {
        address
    }
}

/// Descriptor table for one import kind
#[derive(Clone, Copy)]
pub struct ImportTable<'data> {
    translator: Translator<'data>,
    magic: Magic,
    kind: ImportKind,
    descriptors: &'data [u8],
    max_thunks: Option<usize>,
}

impl<'data> ImportTable<'data> {
    pub(crate) fn parse(
        translator: Translator<'data>,
        magic: Magic,
        kind: ImportKind,
        directory: DataDirectory,
        options: &ParseOptions,
    ) -> Result<Self> {
        if directory.virtual_address == 0 {
            return Err(PeError::NoImportDirectory);
        }

        let size = kind.descriptor_size();
        let data = translator.data;
        let start = translator.range(directory.virtual_address, 1)?.offset();
        let limit = ParseOptions::scan_limit(options.max_import_descriptors, data.len(), size);

        let mut count = 0usize;
        loop {
            if count >= limit {
                warn!(?kind, limit, "import descriptor scan limit reached");
                return Err(PeError::ScanLimitExceeded {
                    what: "import descriptors",
                    limit,
                });
            }
            let raw = data
                .read_slice_at(start + count * size, size)
                .ok_or(PeError::TruncatedDescriptorTable { parsed: count })?;
            if raw.iter().all(|&b| b == 0) {
                break;
            }
            count += 1;
        }

        debug!(?kind, dlls = count, "parsed import descriptors");

        Ok(Self {
            translator,
            magic,
            kind,
            descriptors: &data[start..start + count * size],
            max_thunks: options.max_import_thunks,
        })
    }

    pub fn kind(&self) -> ImportKind {
        self.kind
    }

    /// Number of descriptors before the sentinel
    pub fn len(&self) -> usize {
        self.descriptors.len() / self.kind.descriptor_size()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptor(&self, index: usize) -> Result<ImportDescriptor> {
        let size = self.kind.descriptor_size();
        let raw = index
            .checked_mul(size)
            .and_then(|offset| self.descriptors.read_slice_at(offset, size))
            .ok_or(PeError::IndexOutOfRange {
                index,
                count: self.len(),
            })?;
        Ok(ImportDescriptor::parse(self.kind, raw))
    }

    /// Resolve descriptor `index` into its DLL name and thunk array.
    pub fn dll(&self, index: usize) -> Result<ImportDll<'data>> {
        let descriptor = self.descriptor(index)?;
        let translator = self.translator;

        let name_rva = resolve(&translator, &descriptor, descriptor.name_address());
        let name = translator.cstr(name_rva)?;

        let lookup_rva = resolve(&translator, &descriptor, descriptor.lookup_table_address());
        let width = self.magic.thunk_size();
        let start = translator.range(lookup_rva, 1)?.offset();
        let limit = ParseOptions::scan_limit(self.max_thunks, translator.data.len(), width);

        let mut count = 0usize;
        loop {
            if count >= limit {
                warn!(dll = ?name, limit, "import thunk scan limit reached");
                return Err(PeError::ScanLimitExceeded {
                    what: "import thunks",
                    limit,
                });
            }
            let raw = translator
                .data
                .read_slice_at(start + count * width, width)
                .ok_or(PeError::TruncatedThunkTable {
                    rva: lookup_rva,
                    parsed: count,
                })?;
            if raw.iter().all(|&b| b == 0) {
                break;
            }
            count += 1;
        }
        trace!(dll = ?name, thunks = count, "scanned thunk array");

        Ok(ImportDll {
            translator,
            magic: self.magic,
            descriptor,
            name,
            thunks: &translator.data[start..start + count * width],
        })
    }

    pub fn dlls(&self) -> impl Iterator<Item = Result<ImportDll<'data>>> + '_ {
        (0..self.len()).map(move |i| self.dll(i))
    }

    /// Import hash ("imphash") over this table.
    ///
    /// Each import contributes `dll.function`, lowercased, with a `.dll`,
    /// `.ocx` or `.sys` extension dropped from the DLL name and ordinal
    /// imports written as `ordN`. Entries keep table order and are joined
    /// with commas before hashing with MD5.
    pub fn import_hash(&self) -> Result<String> {
        let mut parts = Vec::new();
        for dll in self.dlls() {
            let dll = dll?;
            let lib = dll.name().to_string_lossy().to_ascii_lowercase();
            let lib = match lib.rsplit_once('.') {
                Some((stem, "dll" | "ocx" | "sys")) => stem.to_string(),
                _ => lib,
            };
            for entry in dll.entries() {
                let function = match entry? {
                    ImportEntry::ByOrdinal(ordinal) => format!("ord{ordinal}"),
                    ImportEntry::ByName { name, .. } => name.to_string_lossy().to_ascii_lowercase(),
                };
                parts.push(format!("{lib}.{function}"));
            }
        }

        Ok(format!("{:032x}", md5::compute(parts.join(",").as_bytes())))
    }
}

/// One imported DLL and its thunk array
#[derive(Clone, Copy)]
pub struct ImportDll<'data> {
    translator: Translator<'data>,
    magic: Magic,
    descriptor: ImportDescriptor,
    name: &'data CStr,
    thunks: &'data [u8],
}

impl std::fmt::Debug for ImportTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportTable")
            .field("kind", &self.kind)
            .field("magic", &self.magic)
            .field("descriptors", &self.len())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ImportDll<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportDll")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("thunks", &self.len())
            .finish_non_exhaustive()
    }
}

impl<'data> ImportDll<'data> {
    pub fn name(&self) -> &'data CStr {
        self.name
    }

    pub fn descriptor(&self) -> &ImportDescriptor {
        &self.descriptor
    }

    /// Number of thunks before the sentinel
    pub fn len(&self) -> usize {
        self.thunks.len() / self.magic.thunk_size()
    }

    pub fn is_empty(&self) -> bool {
        self.thunks.is_empty()
    }

    /// RVA of the import address table, if the descriptor has one
    pub fn iat_rva(&self) -> Option<u32> {
        match self.descriptor.iat_address() {
            0 => None,
            address => Some(resolve(&self.translator, &self.descriptor, address)),
        }
    }

    /// Raw thunk value at `index`, zero-extended for PE32
    pub fn thunk(&self, index: usize) -> Result<u64> {
        let width = self.magic.thunk_size();
        let offset = index.checked_mul(width);
        let value = match self.magic {
            Magic::Pe32 => offset
                .and_then(|o| self.thunks.read_u32_le_at(o))
                .map(u64::from),
            Magic::Pe32Plus => offset.and_then(|o| self.thunks.read_u64_le_at(o)),
        };
        value.ok_or(PeError::IndexOutOfRange {
            index,
            count: self.len(),
        })
    }

    pub fn entry(&self, index: usize) -> Result<ImportEntry<'data>> {
        let thunk = self.thunk(index)?;
        if thunk & self.magic.ordinal_flag() != 0 {
            return Ok(ImportEntry::ByOrdinal(thunk as u16));
        }

        let rva = resolve(&self.translator, &self.descriptor, thunk as u32);
        let by_name = self.translator.range(rva, 2)?;
        let hint = by_name.bytes().read_u16_le_at(0).unwrap_or_default();
        let limit = self.translator.max_name_length;
        let name = read_cstr(self.translator.data, by_name.offset() + 2, limit).ok_or(
            PeError::UnterminatedString {
                rva: rva.wrapping_add(2),
                limit,
            },
        )?;

        Ok(ImportEntry::ByName { hint, name })
    }

    pub fn entries(&self) -> impl Iterator<Item = Result<ImportEntry<'data>>> + '_ {
        (0..self.len()).map(move |i| self.entry(i))
    }
}
