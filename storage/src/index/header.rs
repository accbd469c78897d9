// storage/src/index/header.rs

use crate::codec::{get_u32, put_u32};
use crate::file::BlockFile;
use crate::index::node::NODE_SIZE;
use crate::{Result, StorageError};

pub const HEADER_SIZE: u32 = 16;

/// Offset of the id-tree seed node written on creation.
pub const ID_ROOT_SEED: u32 = HEADER_SIZE;

/// Offset of the (reserved) free-block-tree seed node written on creation.
pub const FREE_BLOCK_ROOT_SEED: u32 = HEADER_SIZE + NODE_SIZE;

/// File size right after creation: header plus the two seed nodes.
pub const INITIAL_SIZE: u32 = HEADER_SIZE + 2 * NODE_SIZE;

/// The 16-byte header at the start of every index file.
///
/// Every field is an absolute offset (or size) stored big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexHeader {
    /// Total size of the index file; the next node is appended here.
    pub size: u32,
    /// Root node of the record-id tree.
    pub id_root: u32,
    /// Root node of the free-block tree. Seeded on creation and carried for
    /// format compatibility; the free-block scanner never consults it.
    pub free_block_root: u32,
    /// Head of the free node list (0 = empty).
    pub free_head: u32,
}

impl IndexHeader {
    /// Header of a freshly created index with its two seed nodes.
    pub fn new() -> Self {
        Self {
            size: INITIAL_SIZE,
            id_root: ID_ROOT_SEED,
            free_block_root: FREE_BLOCK_ROOT_SEED,
            free_head: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut bytes = [0u8; HEADER_SIZE as usize];

        put_u32(&mut bytes, 0, self.size);
        put_u32(&mut bytes, 4, self.id_root);
        put_u32(&mut bytes, 8, self.free_block_root);
        put_u32(&mut bytes, 12, self.free_head);

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(StorageError::corrupt("Invalid index header size"));
        }

        let header = Self {
            size: get_u32(bytes, 0),
            id_root: get_u32(bytes, 4),
            free_block_root: get_u32(bytes, 8),
            free_head: get_u32(bytes, 12),
        };

        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.size < INITIAL_SIZE || !is_node_boundary(self.size) {
            return Err(StorageError::corrupt(format!(
                "Invalid index size: {}",
                self.size
            )));
        }

        let fields = [
            ("id root", self.id_root),
            ("free-block root", self.free_block_root),
        ];
        for (name, offset) in fields {
            if !self.holds_node(offset) {
                return Err(StorageError::corrupt(format!(
                    "Invalid {name} offset: {offset}"
                )));
            }
        }

        if self.free_head != 0 && !self.holds_node(self.free_head) {
            return Err(StorageError::corrupt(format!(
                "Invalid free list head: {}",
                self.free_head
            )));
        }

        Ok(())
    }

    /// Whether a whole node fits at `offset` inside the file this header
    /// describes.
    pub fn holds_node(&self, offset: u32) -> bool {
        offset >= HEADER_SIZE
            && is_node_boundary(offset)
            && offset
                .checked_add(NODE_SIZE)
                .is_some_and(|end| end <= self.size)
    }

    pub fn read(file: &mut impl BlockFile) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        let n = file.read_at(0, &mut buf)?;
        if n < buf.len() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("index header truncated: {n} of {HEADER_SIZE} bytes"),
            )));
        }

        Self::from_bytes(&buf)
    }

    /// Write the header at offset 0 and commit.
    pub fn write(&self, file: &mut impl BlockFile) -> Result<()> {
        file.write_at(0, &self.to_bytes())?;
        file.commit_write()?;
        Ok(())
    }
}

impl Default for IndexHeader {
    fn default() -> Self {
        Self::new()
    }
}

fn is_node_boundary(offset: u32) -> bool {
    offset >= HEADER_SIZE && (offset - HEADER_SIZE) % NODE_SIZE == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemFile;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_header_layout() {
        let header = IndexHeader::new();
        assert_eq!(header.size, 216);
        assert_eq!(header.id_root, 16);
        assert_eq!(header.free_block_root, 116);
        assert_eq!(header.free_head, 0);

        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 216]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 16]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 116]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_header_write_read() {
        let mut file = MemFile::new();
        let header = IndexHeader {
            size: 416,
            id_root: 316,
            free_block_root: 116,
            free_head: 216,
        };
        header.write(&mut file).unwrap();

        assert_eq!(IndexHeader::read(&mut file).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_misaligned_root() {
        let mut header = IndexHeader::new();
        header.id_root = 20;
        assert!(IndexHeader::from_bytes(&header.to_bytes()).is_err());
    }

    #[test]
    fn test_header_rejects_root_past_end() {
        let mut header = IndexHeader::new();
        header.id_root = 216;
        assert!(IndexHeader::from_bytes(&header.to_bytes()).is_err());
    }

    #[test]
    fn test_truncated_header_is_eof() {
        let mut file = MemFile::from_bytes(vec![0, 0, 0]);
        match IndexHeader::read(&mut file) {
            Err(StorageError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF error, got {other:?}"),
        }
    }
}
