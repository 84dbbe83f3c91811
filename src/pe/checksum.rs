//! PE image checksum.
//!
//! The algorithm is the one `imagehlp!CheckSumMappedFile` uses: a 16-bit
//! one's-complement style sum over the whole file with end-around carry, the
//! stored `CheckSum` field backed out afterwards, and the file length added.

use crate::pe::utils::ReadExt;

/// Fold a sequence of little-endian 16-bit words into `sum`.
///
/// An odd trailing byte is treated as a word whose high byte is zero. Any
/// `u32` seed is accepted; it is folded to 16 bits before the first word.
pub fn partial_sum(mut sum: u32, data: &[u8]) -> u16 {
    sum = (sum >> 16) + (sum & 0xFFFF);
    sum = (sum >> 16) + (sum & 0xFFFF);

    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_le_bytes([word[0], word[1]]) as u32;
        sum = (sum >> 16) + (sum & 0xFFFF);
    }
    if let [last] = words.remainder() {
        sum += *last as u32;
        sum = (sum >> 16) + (sum & 0xFFFF);
    }

    sum = (sum >> 16) + sum;
    sum as u16
}

/// Compute the image checksum of `data` whose `CheckSum` field starts at
/// `checksum_offset`.
///
/// The stored field is read from the buffer and subtracted, so the result
/// does not depend on what the field currently holds. A field that does not
/// fit in the buffer contributes nothing.
pub fn compute_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let mut sum = partial_sum(0, data);

    let adjust = [
        data.read_u16_le_at(checksum_offset).unwrap_or(0),
        data.read_u16_le_at(checksum_offset.saturating_add(2)).unwrap_or(0),
    ];
    // Subtract with borrow
    for adj in adjust {
        sum = sum.wrapping_sub((sum < adj) as u16);
        sum = sum.wrapping_sub(adj);
    }

    (sum as u32).wrapping_add(data.len() as u32)
}
