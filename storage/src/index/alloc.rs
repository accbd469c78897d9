// storage/src/index/alloc.rs

use log::{debug, trace};

use crate::codec::{get_u32, put_u32};
use crate::file::BlockFile;
use crate::index::header::{IndexHeader, FREE_BLOCK_ROOT_SEED, HEADER_SIZE, ID_ROOT_SEED};
use crate::index::node::{Node, NODE_SIZE};
use crate::{Result, StorageError};

/// Node-sized slots of one index file, plus its header.
///
/// Hands out slots from the free list first and appends otherwise. Every
/// header change is written and committed before the call returns.
pub struct NodeStore<F: BlockFile> {
    file: F,
    header: IndexHeader,
}

impl<F: BlockFile> NodeStore<F> {
    /// Initialize an empty file: two zeroed seed nodes, then the header.
    ///
    /// The header goes last so a crash part-way leaves a file that still
    /// reads as uninitialized.
    pub fn create(mut file: F) -> Result<Self> {
        let header = IndexHeader::new();

        let zero = Node::new(ID_ROOT_SEED).to_bytes()?;
        file.write_at(ID_ROOT_SEED, &zero)?;
        file.write_at(FREE_BLOCK_ROOT_SEED, &zero)?;
        file.commit_write()?;
        header.write(&mut file)?;

        debug!("created index: {header:?}");
        Ok(Self { file, header })
    }

    /// Open `file`, initializing it when no header was ever written: a file
    /// shorter than the header, or one whose header is all zeroes (a crash
    /// after the seeds were written but before the header was).
    pub fn open_or_create(mut file: F) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        let n = file.read_at(0, &mut buf)?;
        if n < buf.len() || buf.iter().all(|&b| b == 0) {
            debug!("no index header ({n} bytes), initializing");
            return Self::create(file);
        }

        Self::open(file)
    }

    pub fn open(mut file: F) -> Result<Self> {
        let header = IndexHeader::read(&mut file)?;

        let len = file.len()?;
        if len < header.size {
            return Err(StorageError::corrupt(format!(
                "index file is {len} bytes but header claims {}",
                header.size
            )));
        }

        debug!("opened index: {header:?}");
        Ok(Self { file, header })
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn into_file(self) -> F {
        self.file
    }

    pub fn load(&mut self, offset: u32) -> Result<Node> {
        if !self.header.holds_node(offset) {
            return Err(StorageError::corrupt(format!(
                "node offset {offset} outside index of {} bytes",
                self.header.size
            )));
        }
        Node::load(&mut self.file, offset)
    }

    pub fn save(&mut self, node: &Node) -> Result<()> {
        node.save(&mut self.file)
    }

    pub fn set_id_root(&mut self, offset: u32) -> Result<()> {
        debug!("id root {} -> {offset}", self.header.id_root);
        self.header.id_root = offset;
        self.header.write(&mut self.file)
    }

    /// Pop a slot off the free list, or append one at the end of the file.
    pub fn allocate_node(&mut self) -> Result<u32> {
        let offset = if self.header.free_head != 0 {
            let offset = self.header.free_head;
            let next = self.read_link(offset)?;
            if next != 0 && !self.header.holds_node(next) {
                return Err(StorageError::corrupt(format!(
                    "free list link {next} at {offset} is not a node"
                )));
            }
            self.header.free_head = next;
            offset
        } else {
            let offset = self.header.size;
            let size = offset.checked_add(NODE_SIZE).ok_or_else(|| {
                StorageError::corrupt("index file would exceed 32-bit offsets")
            })?;

            let zero = Node::new(offset).to_bytes()?;
            self.file.write_at(offset, &zero)?;
            self.file.commit_write()?;
            self.header.size = size;
            offset
        };

        self.header.write(&mut self.file)?;
        trace!("allocate node {offset}");
        Ok(offset)
    }

    /// Push `offset` onto the free list, threading the old head through its
    /// first four bytes.
    pub fn free_node(&mut self, offset: u32) -> Result<()> {
        if !self.header.holds_node(offset) {
            return Err(StorageError::corrupt(format!(
                "cannot free {offset}: not a node"
            )));
        }

        let mut link = [0u8; 4];
        put_u32(&mut link, 0, self.header.free_head);
        self.file.write_at(offset, &link)?;
        self.file.commit_write()?;

        self.header.free_head = offset;
        self.header.write(&mut self.file)?;
        trace!("free node {offset}");
        Ok(())
    }

    /// Length of the free list, giving up once it is longer than the file
    /// could hold (a cycle).
    pub fn free_nodes(&mut self) -> Result<usize> {
        let limit = (self.header.size / NODE_SIZE) as usize;
        let mut count = 0;
        let mut offset = self.header.free_head;

        while offset != 0 {
            if count > limit || !self.header.holds_node(offset) {
                return Err(StorageError::corrupt(format!(
                    "free list is broken at {offset}"
                )));
            }
            count += 1;
            offset = self.read_link(offset)?;
        }

        Ok(count)
    }

    fn read_link(&mut self, offset: u32) -> Result<u32> {
        let mut link = [0u8; 4];
        let n = self.file.read_at(offset, &mut link)?;
        if n < link.len() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short free list read at {offset}"),
            )));
        }
        Ok(get_u32(&link, 0))
    }
}
