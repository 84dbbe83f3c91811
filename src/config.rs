//! Parse limits for mapped image analysis.
//!
//! The PE format is full of counts and sentinel-terminated arrays chosen by
//! whoever produced the file. These limits put a deterministic ceiling on how
//! far any single scan may run, independent of the buffer size.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a [`ParseOptions`] document.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid parse options document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Limits applied while parsing a mapped image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Upper bound (exclusive) for `e_lfanew`.
    pub max_header_offset: u32,
    /// Longest NUL-terminated name read from the image, excluding the NUL.
    pub max_name_length: usize,
    /// Maximum import descriptors scanned before the sentinel. `None` derives
    /// the limit from the buffer size.
    pub max_import_descriptors: Option<usize>,
    /// Maximum thunks scanned per imported DLL. `None` derives the limit from
    /// the buffer size.
    pub max_import_thunks: Option<usize>,
    /// Maximum base relocation blocks walked.
    pub max_relocation_blocks: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_header_offset: 0x1000_0000,
            max_name_length: 0x1000,
            max_import_descriptors: None,
            max_import_thunks: None,
            max_relocation_blocks: 0x10000,
        }
    }
}

impl ParseOptions {
    /// Load options from a JSON document. Missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize options to a JSON document.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Effective cap for a sentinel-terminated array of `entry_size` byte
    /// entries in a buffer of `buffer_len` bytes.
    pub(crate) fn scan_limit(configured: Option<usize>, buffer_len: usize, entry_size: usize) -> usize {
        let derived = buffer_len / entry_size.max(1);
        configured.map_or(derived, |limit| limit.min(derived))
    }
}
