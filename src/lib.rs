//! Zero-copy reader for PE/COFF images held in memory.
//!
//! [`MappedImage`] borrows a byte buffer (a memory-mapped file, a `Vec<u8>`,
//! or a copy of a loaded module), validates its headers once, and hands out
//! bounds-checked views of sections, data directories, exports, imports and
//! base relocations. Hostile input produces a [`PeError`], never a panic or
//! an out-of-bounds read.
//!
//! ```no_run
//! use pemap::{ImportKind, MappedImage};
//!
//! let data = std::fs::read("kernel32.dll").unwrap();
//! let image = MappedImage::new(&data).unwrap();
//! let exports = image.exports().unwrap();
//! let entry = exports.lookup_by_name("CreateFileW").unwrap();
//! println!("{:?}", exports.function(&entry).unwrap());
//!
//! for dll in image.imports(ImportKind::Eager).unwrap().dlls() {
//!     println!("{:?}", dll.unwrap().name());
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pe;

pub use config::{ConfigError, ParseOptions};
pub use error::{ErrorKind, PeError, Result};
pub use pe::{
    CheckedRange, ExportEntry, ExportFunction, ExportTable, ImportDll, ImportEntry, ImportKind,
    ImportTable, MappedImage, RelocationEntry, SectionHeader, SectionTable,
};
