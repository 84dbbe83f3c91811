//! Data directory parsers

pub mod export;
pub mod import;
pub mod reloc;

pub use export::{ExportEntry, ExportFunction, ExportTable};
pub use import::{ImportDescriptor, ImportDll, ImportEntry, ImportKind, ImportTable};
pub use reloc::{RelocationEntry, RelocationType};
