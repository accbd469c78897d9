// storage/src/index/node.rs

use bytes::{Buf, BufMut, BytesMut};
use log::trace;

use crate::file::BlockFile;
use crate::{Result, StorageError};

/// Maximum keys in a persisted node.
pub const MAX_KEYS: usize = 8;

/// Minimum keys in any node except the root.
pub const MIN_KEYS: usize = MAX_KEYS.div_ceil(2);

/// On-disk size of one node: a leading child plus `MAX_KEYS` triplets.
pub const NODE_SIZE: u32 = 4 + (MAX_KEYS as u32) * 12;

/// One B-tree node, identified by its own offset in the index file.
///
/// Layout on disk (big-endian):
/// `[child0][key0][value0][child1] ... [key7][value7][child8]`
///
/// The in-memory arrays carry one spare slot so a node can briefly hold
/// `MAX_KEYS + 1` keys between an insert and the split that follows it.
/// A zero key ends the populated prefix; a zero child means no subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub(crate) offset: u32,
    pub(crate) keys: [u32; MAX_KEYS + 1],
    pub(crate) values: [u32; MAX_KEYS + 1],
    pub(crate) children: [u32; MAX_KEYS + 2],
}

impl Node {
    pub fn new(offset: u32) -> Self {
        Self {
            offset,
            keys: [0; MAX_KEYS + 1],
            values: [0; MAX_KEYS + 1],
            children: [0; MAX_KEYS + 2],
        }
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn key_count(&self) -> usize {
        self.keys
            .iter()
            .position(|&k| k == 0)
            .unwrap_or(self.keys.len())
    }

    pub fn key(&self, index: usize) -> u32 {
        self.keys[index]
    }

    pub fn value(&self, index: usize) -> u32 {
        self.values[index]
    }

    pub fn child(&self, index: usize) -> u32 {
        self.children[index]
    }

    pub fn is_leaf(&self) -> bool {
        self.children[0] == 0
    }

    /// Index `i` such that `child(i) == offset`.
    pub fn child_position(&self, offset: u32) -> Option<usize> {
        self.children[..=self.key_count()]
            .iter()
            .position(|&c| c == offset)
    }

    /// Read the node stored at `offset`.
    ///
    /// Triplets are decoded up to the first zero key; everything after it is
    /// left zeroed regardless of what the block holds.
    pub fn load(file: &mut impl BlockFile, offset: u32) -> Result<Self> {
        let mut buf = [0u8; NODE_SIZE as usize];
        let n = file.read_at(offset, &mut buf)?;
        if n < buf.len() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short node read at {offset}: {n} of {NODE_SIZE} bytes"),
            )));
        }
        trace!("load node {offset}");

        let mut node = Self::new(offset);
        let mut cursor = &buf[..];
        node.children[0] = cursor.get_u32();
        for i in 0..MAX_KEYS {
            let key = cursor.get_u32();
            if key == 0 {
                break;
            }
            node.keys[i] = key;
            node.values[i] = cursor.get_u32();
            node.children[i + 1] = cursor.get_u32();
        }

        Ok(node)
    }

    pub fn to_bytes(&self) -> Result<BytesMut> {
        let count = self.key_count();
        if count > MAX_KEYS {
            return Err(StorageError::corrupt(format!(
                "node {} holds {count} keys, more than fit on disk",
                self.offset
            )));
        }

        let mut buf = BytesMut::with_capacity(NODE_SIZE as usize);
        buf.put_u32(self.children[0]);
        for i in 0..MAX_KEYS {
            buf.put_u32(self.keys[i]);
            buf.put_u32(self.values[i]);
            buf.put_u32(self.children[i + 1]);
        }

        Ok(buf)
    }

    /// Write the whole block back to its own offset and commit before
    /// returning.
    pub fn save(&self, file: &mut impl BlockFile) -> Result<()> {
        let bytes = self.to_bytes()?;
        file.write_at(self.offset, &bytes)?;
        file.commit_write()?;
        trace!("save node {} ({} keys)", self.offset, self.key_count());
        Ok(())
    }

    /// Open a slot at `index` for `(key, value)` whose right subtree is
    /// `right_child`. The child to the left of the slot is untouched.
    pub fn add_key(&mut self, index: usize, key: u32, value: u32, right_child: u32) {
        let count = self.key_count();
        debug_assert!(count <= MAX_KEYS && index <= count);

        self.keys.copy_within(index..count, index + 1);
        self.values.copy_within(index..count, index + 1);
        self.children.copy_within(index + 1..count + 1, index + 2);

        self.keys[index] = key;
        self.values[index] = value;
        self.children[index + 1] = right_child;
    }

    /// Close the slot at `index`, dropping the key, its value and its right
    /// child.
    pub fn delete_key(&mut self, index: usize) {
        let count = self.key_count();
        debug_assert!(index < count);

        self.keys.copy_within(index + 1..count, index);
        self.values.copy_within(index + 1..count, index);
        self.children.copy_within(index + 2..count + 1, index + 1);

        self.keys[count - 1] = 0;
        self.values[count - 1] = 0;
        self.children[count] = 0;
    }

    pub fn push_back(&mut self, key: u32, value: u32, right_child: u32) {
        self.add_key(self.key_count(), key, value, right_child);
    }

    /// Remove the last entry, returning it with its right child.
    pub fn pop_back(&mut self) -> (u32, u32, u32) {
        let last = self.key_count() - 1;
        let entry = (self.keys[last], self.values[last], self.children[last + 1]);
        self.delete_key(last);
        entry
    }

    /// Insert an entry in front, with `left_child` becoming the new leftmost
    /// child.
    pub fn push_front(&mut self, key: u32, value: u32, left_child: u32) {
        let old_first = self.children[0];
        self.add_key(0, key, value, old_first);
        self.children[0] = left_child;
    }

    /// Remove the first entry, returning it with the old leftmost child. The
    /// entry's right child becomes the new leftmost child.
    pub fn pop_front(&mut self) -> (u32, u32, u32) {
        let entry = (self.keys[0], self.values[0], self.children[0]);
        let right = self.children[1];
        self.delete_key(0);
        self.children[0] = right;
        entry
    }

    /// Split an overfull node in two. Keeps the lower half here, moves the
    /// upper half into a fresh node at `sibling_offset`, and returns the
    /// promoted median with that sibling. The median's right subtree becomes
    /// the sibling's leftmost child.
    pub fn split(&mut self, sibling_offset: u32) -> (u32, u32, Node) {
        const MID: usize = MAX_KEYS / 2;
        let count = self.key_count();
        debug_assert!(count > MAX_KEYS);

        let mut sibling = Node::new(sibling_offset);
        let moved = count - MID - 1;
        sibling.keys[..moved].copy_from_slice(&self.keys[MID + 1..count]);
        sibling.values[..moved].copy_from_slice(&self.values[MID + 1..count]);
        sibling.children[..=moved].copy_from_slice(&self.children[MID + 1..=count]);

        let promoted = (self.keys[MID], self.values[MID]);
        self.keys[MID..].fill(0);
        self.values[MID..].fill(0);
        self.children[MID + 1..].fill(0);

        (promoted.0, promoted.1, sibling)
    }

    /// Append the separator `(key, value)` and then every entry of `right`,
    /// whose leftmost child hangs off the separator.
    pub fn merge(&mut self, key: u32, value: u32, right: &Node) {
        self.push_back(key, value, right.children[0]);
        for i in 0..right.key_count() {
            self.push_back(right.keys[i], right.values[i], right.children[i + 1]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemFile;
    use pretty_assertions::assert_eq;

    fn node_with(offset: u32, keys: &[u32]) -> Node {
        let mut node = Node::new(offset);
        for &k in keys {
            node.push_back(k, k * 10, 0);
        }
        node
    }

    #[test]
    fn test_node_size() {
        assert_eq!(NODE_SIZE, 100);
        assert_eq!(MIN_KEYS, 4);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut file = MemFile::new();
        let mut node = Node::new(16);
        node.children[0] = 316;
        node.push_back(3, 300, 416);
        node.push_back(9, 900, 516);
        node.save(&mut file).unwrap();

        assert_eq!(file.len().unwrap(), 116);
        let loaded = Node::load(&mut file, 16).unwrap();
        assert_eq!(loaded, node);
        assert_eq!(loaded.key_count(), 2);
    }

    #[test]
    fn test_load_stops_at_zero_key() {
        let mut file = MemFile::new();
        let mut bytes = [0xffu8; NODE_SIZE as usize];
        // child0, then key0 = 0 terminates decoding
        bytes[0..4].copy_from_slice(&7u32.to_be_bytes());
        bytes[4..8].copy_from_slice(&0u32.to_be_bytes());
        file.write_at(16, &bytes).unwrap();

        let node = Node::load(&mut file, 16).unwrap();
        assert_eq!(node.key_count(), 0);
        assert_eq!(node.child(0), 7);
        assert!(node.children[1..].iter().all(|&c| c == 0));
        assert!(node.values.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_short_read_is_error() {
        let mut file = MemFile::from_bytes(vec![0u8; 50]);
        assert!(Node::load(&mut file, 16).is_err());
    }

    #[test]
    fn test_add_and_delete_key() {
        let mut node = node_with(16, &[10, 30]);
        node.children = [1, 2, 3, 0, 0, 0, 0, 0, 0, 0];

        node.add_key(1, 20, 200, 9);
        assert_eq!(&node.keys[..3], &[10, 20, 30]);
        assert_eq!(&node.children[..4], &[1, 2, 9, 3]);

        node.delete_key(0);
        assert_eq!(&node.keys[..3], &[20, 30, 0]);
        assert_eq!(&node.children[..4], &[1, 9, 3, 0]);
    }

    #[test]
    fn test_front_and_back_rotation() {
        let mut node = node_with(16, &[10, 20]);
        node.children[..3].copy_from_slice(&[1, 2, 3]);

        assert_eq!(node.pop_front(), (10, 100, 1));
        assert_eq!(&node.children[..2], &[2, 3]);

        node.push_front(5, 50, 7);
        assert_eq!(&node.keys[..2], &[5, 20]);
        assert_eq!(&node.children[..3], &[7, 2, 3]);

        assert_eq!(node.pop_back(), (20, 200, 3));
        assert_eq!(node.key_count(), 1);
        assert_eq!(&node.children[..3], &[7, 2, 0]);
    }

    #[test]
    fn test_split_moves_upper_half() {
        let mut node = node_with(16, &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        for (i, c) in node.children.iter_mut().enumerate() {
            *c = 1000 + i as u32;
        }

        let (key, value, sibling) = node.split(116);
        assert_eq!((key, value), (5, 50));
        assert_eq!(node.key_count(), 4);
        assert_eq!(&node.children[..6], &[1000, 1001, 1002, 1003, 1004, 0]);
        assert_eq!(sibling.offset(), 116);
        assert_eq!(&sibling.keys[..5], &[6, 7, 8, 9, 0]);
        assert_eq!(&sibling.children[..6], &[1005, 1006, 1007, 1008, 1009, 0]);
    }

    #[test]
    fn test_merge_appends_separator_then_sibling() {
        let mut left = node_with(16, &[1, 2]);
        let mut right = node_with(116, &[5, 6]);
        right.children[0] = 42;

        left.merge(3, 30, &right);
        assert_eq!(&left.keys[..6], &[1, 2, 3, 5, 6, 0]);
        assert_eq!(left.child(3), 42);
    }
}
