//! Bounds-checked primitive reads over the mapped buffer

use std::ffi::CStr;

/// Extension trait for reading little-endian primitives from byte slices.
///
/// Every read returns `None` instead of panicking when the requested range is
/// not fully inside the slice.
pub trait ReadExt {
    fn read_u8_at(&self, offset: usize) -> Option<u8>;
    fn read_u16_le_at(&self, offset: usize) -> Option<u16>;
    fn read_u32_le_at(&self, offset: usize) -> Option<u32>;
    fn read_u64_le_at(&self, offset: usize) -> Option<u64>;
    fn read_slice_at(&self, offset: usize, len: usize) -> Option<&[u8]>;
}

impl ReadExt for [u8] {
    #[inline(always)]
    fn read_u8_at(&self, offset: usize) -> Option<u8> {
        self.get(offset).copied()
    }

    #[inline(always)]
    fn read_u16_le_at(&self, offset: usize) -> Option<u16> {
        self.read_slice_at(offset, 2)
            .and_then(|b| b.try_into().ok())
            .map(u16::from_le_bytes)
    }

    #[inline(always)]
    fn read_u32_le_at(&self, offset: usize) -> Option<u32> {
        self.read_slice_at(offset, 4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
    }

    #[inline(always)]
    fn read_u64_le_at(&self, offset: usize) -> Option<u64> {
        self.read_slice_at(offset, 8)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
    }

    #[inline(always)]
    fn read_slice_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.get(offset..end)
    }
}

/// Read a NUL-terminated string starting at `offset`.
///
/// At most `max_len` bytes before the terminator are examined; `None` when no
/// NUL is found within that window or before the end of `data`.
pub fn read_cstr(data: &[u8], offset: usize, max_len: usize) -> Option<&CStr> {
    let window_end = offset.saturating_add(max_len).saturating_add(1).min(data.len());
    let window = data.get(offset..window_end)?;
    let nul = memchr::memchr(0, window)?;
    CStr::from_bytes_with_nul(&window[..=nul]).ok()
}

/// Decode a fixed 8-byte section name, trimming at the first NUL.
pub fn section_name_bytes(name: &[u8; 8]) -> &[u8] {
    let end = memchr::memchr(0, name).unwrap_or(name.len());
    &name[..end]
}
