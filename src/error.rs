//! Error types for mapped PE image parsing.
//!
//! Every accessor in this crate returns [`Result`]. Variants carry enough
//! location information (RVA, offset, index) to report where parsing stopped;
//! [`PeError::kind`] collapses them into the coarse [`ErrorKind`] taxonomy for
//! callers that only need to know *why* a structure was rejected.

use thiserror::Error;

/// Coarse classification of a [`PeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Wrong magic, signature, or an internally inconsistent structure.
    Format,
    /// A declared structure extends past the end of the buffer.
    Truncated,
    /// A translated RVA plus the requested length lies outside the buffer.
    Bounds,
    /// A name, ordinal, index or directory lookup missed.
    NotFound,
    /// The optional header magic is neither PE32 nor PE32+.
    Unsupported,
}

/// Errors produced while interpreting a mapped PE image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeError {
    #[error("Invalid DOS signature (expected 'MZ', found {found:#06x})")]
    NotMzSignature { found: u16 },

    #[error("Invalid NT header offset {offset:#x} (buffer size {size:#x})")]
    InvalidHeaderOffset { offset: u32, size: usize },

    #[error("Truncated header: expected {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },

    #[error("Invalid PE signature")]
    BadSignature,

    #[error("Unsupported optional header magic: {0:#06x}")]
    UnsupportedMagic(u16),

    #[error("RVA {rva:#010x} (+{len:#x}) is outside the mapped image")]
    Bounds { rva: u32, len: usize },

    #[error("String at RVA {rva:#010x} is not NUL-terminated within {limit} bytes")]
    UnterminatedString { rva: u32, limit: usize },

    #[error("Index {index} out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Image has no export directory")]
    NoExportDirectory,

    #[error("Image has no import directory")]
    NoImportDirectory,

    #[error("Export not found: {0}")]
    NotFound(String),

    #[error("Import descriptor table truncated after {parsed} descriptors")]
    TruncatedDescriptorTable { parsed: usize },

    #[error("Thunk table at RVA {rva:#010x} truncated after {parsed} entries")]
    TruncatedThunkTable { rva: u32, parsed: usize },

    #[error("Scan limit exceeded: {what} (limit {limit})")]
    ScanLimitExceeded { what: &'static str, limit: usize },

    #[error("Invalid base relocation block at RVA {rva:#010x} (size {size})")]
    InvalidRelocationBlock { rva: u32, size: u32 },
}

impl PeError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotMzSignature { .. }
            | Self::InvalidHeaderOffset { .. }
            | Self::BadSignature
            | Self::InvalidRelocationBlock { .. } => ErrorKind::Format,
            Self::TruncatedHeader { .. }
            | Self::TruncatedDescriptorTable { .. }
            | Self::TruncatedThunkTable { .. }
            | Self::ScanLimitExceeded { .. } => ErrorKind::Truncated,
            Self::Bounds { .. } | Self::UnterminatedString { .. } => ErrorKind::Bounds,
            Self::IndexOutOfRange { .. }
            | Self::NoExportDirectory
            | Self::NoImportDirectory
            | Self::NotFound(_) => ErrorKind::NotFound,
            Self::UnsupportedMagic(_) => ErrorKind::Unsupported,
        }
    }

    /// True for errors caused by data running off the end of the buffer.
    pub fn is_out_of_bounds(&self) -> bool {
        matches!(self.kind(), ErrorKind::Truncated | ErrorKind::Bounds)
    }
}

/// Result type alias for pemap operations
pub type Result<T> = std::result::Result<T, PeError>;
