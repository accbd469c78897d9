//! Big-endian integer helpers and record block sizing.

use bytes::{Buf, BufMut};

/// Size of the header at the front of every block in the data file.
pub const BLOCK_HEADER_SIZE: u32 = 16;

/// Blocks in the data file are allocated in multiples of this.
pub const BLOCK_ALIGN: u32 = 16;

/// Read a big-endian `u32` at `pos`.
///
/// Callers guarantee `pos + 4 <= buf.len()`.
pub fn get_u32(buf: &[u8], pos: usize) -> u32 {
    (&buf[pos..pos + 4]).get_u32()
}

/// Write `value` big-endian at `pos`.
pub fn put_u32(buf: &mut [u8], pos: usize, value: u32) {
    (&mut buf[pos..pos + 4]).put_u32(value);
}

/// Allocated size of a block holding `data_len` bytes of record data,
/// header included. Saturates instead of wrapping for absurd lengths.
pub fn block_size(data_len: u32) -> u32 {
    let raw = BLOCK_HEADER_SIZE.saturating_add(data_len);
    match raw % BLOCK_ALIGN {
        0 => raw,
        rem => raw.saturating_add(BLOCK_ALIGN - rem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_is_big_endian() {
        let mut buf = [0u8; 8];
        put_u32(&mut buf, 2, 0x0102_0304);
        assert_eq!(buf, [0, 0, 1, 2, 3, 4, 0, 0]);
        assert_eq!(get_u32(&buf, 2), 0x0102_0304);
    }

    #[test]
    fn test_block_size_rounds_up() {
        assert_eq!(block_size(0), 16);
        assert_eq!(block_size(1), 32);
        assert_eq!(block_size(16), 32);
        assert_eq!(block_size(17), 48);
    }

    #[test]
    fn test_block_size_saturates() {
        assert!(block_size(u32::MAX) >= BLOCK_HEADER_SIZE);
    }
}
