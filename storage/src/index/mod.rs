//! Persistent record-id index.
//!
//! An index file is a 16-byte [`IndexHeader`] followed by fixed-size B-tree
//! nodes addressed by their file offset. [`RecordIndex`] is the surface the
//! record store calls; it keeps the header in step with the tree.

pub mod alloc;
pub mod btree;
pub mod header;
pub mod node;

pub use btree::{RootChange, TreeStats};
pub use header::IndexHeader;
pub use node::{Node, MAX_KEYS, MIN_KEYS, NODE_SIZE};

use log::{debug, trace, warn};

use crate::config::IndexConfig;
use crate::file::BlockFile;
use crate::record::{self, BlockHeader};
use crate::store::RecordStore;
use crate::{Result, StorageError};

use self::alloc::NodeStore;
use self::btree::BTree;

/// Record id to data-file offset index over one index file.
pub struct RecordIndex<F: BlockFile> {
    nodes: NodeStore<F>,
    config: IndexConfig,
}

impl<F: BlockFile> RecordIndex<F> {
    /// Open the index named `name` for store `store_id`, creating it on first
    /// use.
    pub fn open<S>(store: &mut S, store_id: u32, name: &str, config: IndexConfig) -> Result<Self>
    where
        S: RecordStore<File = F>,
    {
        let file = store.create_index_file(store_id, name)?;
        Self::from_file(file, config)
    }

    /// Open an index over `file`; a file without a header is initialized.
    pub fn from_file(file: F, config: IndexConfig) -> Result<Self> {
        let nodes = NodeStore::open_or_create(file)?;

        let mut index = Self { nodes, config };
        if index.config.warm_up {
            index.warm_up();
        }
        Ok(index)
    }

    /// Touch the root node so the first real lookup does not pay for it.
    /// Failures are logged and dropped; the next real access reports them.
    fn warm_up(&mut self) {
        let root = self.nodes.header().id_root;
        if let Err(e) = self.nodes.load(root) {
            warn!("index warm-up failed, continuing: {e}");
        }
    }

    pub fn header(&self) -> &IndexHeader {
        self.nodes.header()
    }

    fn tree(&mut self) -> BTree<'_, F> {
        let root = self.nodes.header().id_root;
        BTree::new(&mut self.nodes, root, self.config.max_depth)
    }

    /// All record ids in ascending order, at most as many as the store says
    /// it holds.
    pub fn record_ids<S: RecordStore>(&mut self, store: &mut S) -> Result<Vec<u32>> {
        let capacity = store.num_records()? as usize;
        Ok(self.entries(capacity)?.into_iter().map(|(id, _)| id).collect())
    }

    /// Up to `limit` `(record id, block offset)` pairs in ascending id order.
    pub fn entries(&mut self, limit: usize) -> Result<Vec<(u32, u32)>> {
        self.tree().walk(limit)
    }

    pub fn block_offset_of_record(&mut self, id: u32) -> Result<u32> {
        check_id(id)?;
        self.tree()
            .get(id)?
            .ok_or(StorageError::InvalidRecordId(id))
    }

    /// Block offset and block header of record `id`, read from the store's
    /// data file.
    pub fn record_header<S: RecordStore>(
        &mut self,
        store: &mut S,
        id: u32,
    ) -> Result<(u32, BlockHeader)> {
        let offset = self.block_offset_of_record(id)?;
        let header = BlockHeader::read(store.db_file(), offset)?;
        Ok((offset, header))
    }

    /// Point `id` at `offset`, inserting it if new.
    pub fn update_record_id(&mut self, id: u32, offset: u32) -> Result<()> {
        check_id(id)?;
        let new_root = self.tree().insert(id, offset)?;
        if let Some(root) = new_root {
            self.nodes.set_id_root(root)?;
        }
        trace!("record {id} -> {offset}");
        Ok(())
    }

    /// Drop `id` from the index. Unknown ids are ignored.
    pub fn delete_record_index(&mut self, id: u32) -> Result<()> {
        check_id(id)?;
        let change = self.tree().remove(id)?;
        if let Some(change) = change {
            self.nodes.set_id_root(change.root)?;
            for offset in change.retired {
                self.nodes.free_node(offset)?;
            }
        }
        Ok(())
    }

    /// Offset of a free data block able to hold `data_len` bytes, or 0 to
    /// append. Scans the whole data file.
    pub fn free_block<S: RecordStore>(&self, store: &mut S, data_len: u32) -> Result<u32> {
        let end = store.size()?;
        record::find_free_block(store.db_file(), self.config.data_start, end, data_len)
    }

    /// Release bookkeeping for a data block. Free blocks are found by
    /// scanning, so there is nothing to release.
    pub fn remove_block(&mut self, offset: u32) -> Result<()> {
        trace!("remove block {offset}: nothing tracked");
        Ok(())
    }

    pub fn verify(&mut self) -> Result<TreeStats> {
        self.tree().verify()
    }

    pub fn free_nodes(&mut self) -> Result<usize> {
        self.nodes.free_nodes()
    }

    /// Commit and release the index file.
    pub fn close(self) -> Result<()> {
        let mut file = self.nodes.into_file();
        file.commit_write()?;
        debug!("closed index");
        Ok(())
    }
}

fn check_id(id: u32) -> Result<()> {
    if id == 0 {
        return Err(StorageError::InvalidRecordId(id));
    }
    Ok(())
}
