//! Record blocks in the data file, and the linear free-block scan over them.
//!
//! A data file is its own header (`IndexConfig::data_start` bytes) followed
//! by back-to-back blocks. Each block starts with a [`BlockHeader`] and is
//! [`block_size`] bytes long in total.

use log::trace;

use crate::codec::{block_size, get_u32, put_u32, BLOCK_HEADER_SIZE};
use crate::file::BlockFile;
use crate::{Result, StorageError};

/// Record id carried by a block that holds no record.
pub const FREE_BLOCK_ID: u32 = 0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockHeader {
    pub record_id: u32,
    pub data_len: u32,
    pub tag: u32,
    pub reserved: u32,
}

impl BlockHeader {
    pub fn new(record_id: u32, data_len: u32, tag: u32) -> Self {
        Self {
            record_id,
            data_len,
            tag,
            reserved: 0,
        }
    }

    /// A free block able to hold `data_len` bytes.
    pub fn free(data_len: u32) -> Self {
        Self::new(FREE_BLOCK_ID, data_len, 0)
    }

    pub fn is_free(&self) -> bool {
        self.record_id == FREE_BLOCK_ID
    }

    /// Allocated size of the block, header included.
    pub fn block_size(&self) -> u32 {
        block_size(self.data_len)
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE as usize] {
        let mut bytes = [0u8; BLOCK_HEADER_SIZE as usize];
        put_u32(&mut bytes, 0, self.record_id);
        put_u32(&mut bytes, 4, self.data_len);
        put_u32(&mut bytes, 8, self.tag);
        put_u32(&mut bytes, 12, self.reserved);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; BLOCK_HEADER_SIZE as usize]) -> Self {
        Self {
            record_id: get_u32(bytes, 0),
            data_len: get_u32(bytes, 4),
            tag: get_u32(bytes, 8),
            reserved: get_u32(bytes, 12),
        }
    }

    pub fn read(file: &mut impl BlockFile, offset: u32) -> Result<Self> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        let n = file.read_at(offset, &mut buf)?;
        if n < buf.len() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short block header read at {offset}"),
            )));
        }
        Ok(Self::from_bytes(&buf))
    }
}

/// Write a whole block at `offset`: the header, then zeroes up to the
/// block's allocated size. Record data itself is the caller's business.
pub fn write_block(file: &mut impl BlockFile, offset: u32, header: &BlockHeader) -> Result<()> {
    let size = header.block_size() as usize;
    let mut block = vec![0u8; size];
    block[..BLOCK_HEADER_SIZE as usize].copy_from_slice(&header.to_bytes());
    file.write_at(offset, &block)?;
    file.commit_write()?;
    Ok(())
}

/// Visit every block in `start..end`, in file order, until `visit` returns
/// true. Returns the offset of that block, if any.
pub fn scan_blocks(
    file: &mut impl BlockFile,
    start: u32,
    end: u32,
    mut visit: impl FnMut(&BlockHeader) -> bool,
) -> Result<Option<u32>> {
    let mut offset = start;
    while offset < end {
        let header = BlockHeader::read(file, offset)?;
        if visit(&header) {
            return Ok(Some(offset));
        }
        offset = match offset.checked_add(header.block_size()) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(None)
}

/// First free block in `start..end` big enough for `data_len` bytes of
/// record data, or 0 when the record has to be appended at the end.
pub fn find_free_block(
    file: &mut impl BlockFile,
    start: u32,
    end: u32,
    data_len: u32,
) -> Result<u32> {
    let needed = block_size(data_len);
    let found = scan_blocks(file, start, end, |header| {
        header.is_free() && header.block_size() >= needed
    })?;

    trace!("free block for {data_len} bytes: {found:?}");
    Ok(found.unwrap_or(0))
}

/// Number of blocks in `start..end` that hold a record.
pub fn count_records(file: &mut impl BlockFile, start: u32, end: u32) -> Result<u32> {
    let mut count = 0;
    scan_blocks(file, start, end, |header| {
        if !header.is_free() {
            count += 1;
        }
        false
    })?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemFile;
    use pretty_assertions::assert_eq;

    const START: u32 = 48;

    /// Lay out `blocks` back to back from `START`, returning their offsets
    /// and the end of the last one.
    fn layout(file: &mut MemFile, blocks: &[BlockHeader]) -> (Vec<u32>, u32) {
        let mut offsets = Vec::new();
        let mut offset = START;
        for header in blocks {
            write_block(file, offset, header).unwrap();
            offsets.push(offset);
            offset += header.block_size();
        }
        (offsets, offset)
    }

    #[test]
    fn test_header_bytes() {
        let header = BlockHeader::new(7, 20, 3);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..8], &[0, 0, 0, 7, 0, 0, 0, 20]);
        assert_eq!(BlockHeader::from_bytes(&bytes), header);
        assert_eq!(header.block_size(), 48);
    }

    #[test]
    fn test_finds_first_fitting_free_block() {
        let mut file = MemFile::new();
        let (offsets, end) = layout(
            &mut file,
            &[
                BlockHeader::new(1, 10, 0),
                BlockHeader::free(4),
                BlockHeader::new(2, 100, 0),
                BlockHeader::free(64),
                BlockHeader::free(200),
            ],
        );

        // too big for the small hole, fits the 64-byte one
        assert_eq!(find_free_block(&mut file, START, end, 40).unwrap(), offsets[3]);
        // small request takes the first hole
        assert_eq!(find_free_block(&mut file, START, end, 1).unwrap(), offsets[1]);
        // same rounded size as the hole still fits
        assert_eq!(find_free_block(&mut file, START, end, 16).unwrap(), offsets[1]);
        // nothing big enough: append
        assert_eq!(find_free_block(&mut file, START, end, 1000).unwrap(), 0);
    }

    #[test]
    fn test_scan_stops_at_logical_end() {
        let mut file = MemFile::new();
        let (offsets, _) = layout(
            &mut file,
            &[BlockHeader::new(1, 10, 0), BlockHeader::free(10)],
        );

        // the free block lies past the logical end handed in
        assert_eq!(find_free_block(&mut file, START, offsets[1], 1).unwrap(), 0);
    }

    #[test]
    fn test_empty_data_file() {
        let mut file = MemFile::new();
        assert_eq!(find_free_block(&mut file, START, START, 1).unwrap(), 0);
        assert_eq!(count_records(&mut file, START, START).unwrap(), 0);
    }

    #[test]
    fn test_count_records() {
        let mut file = MemFile::new();
        let (_, end) = layout(
            &mut file,
            &[
                BlockHeader::new(1, 10, 0),
                BlockHeader::free(4),
                BlockHeader::new(2, 100, 0),
            ],
        );
        assert_eq!(count_records(&mut file, START, end).unwrap(), 2);
    }

    #[test]
    fn test_truncated_block_header_is_error() {
        let mut file = MemFile::from_bytes(vec![0u8; START as usize + 8]);
        assert!(find_free_block(&mut file, START, START + 32, 1).is_err());
    }
}
