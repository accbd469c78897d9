//! The record-store manager side of the index: who owns the data file and
//! where index files come from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::IndexConfig;
use crate::file::{BlockFile, DiskFile, MemFile};
use crate::record;
use crate::Result;

/// What an index needs from the store it belongs to.
///
/// The index borrows the data file per call and never closes it.
pub trait RecordStore {
    type File: BlockFile;

    fn db_file(&mut self) -> &mut Self::File;

    /// Logical end of the data file.
    fn size(&mut self) -> Result<u32> {
        Ok(self.db_file().len()?)
    }

    fn num_records(&mut self) -> Result<u32>;

    /// Open the index file for `(store_id, name)`, creating it empty when it
    /// does not exist yet.
    fn create_index_file(&mut self, store_id: u32, name: &str) -> Result<Self::File>;
}

/// Reserve the data file's own header on first use.
fn init_data_file(file: &mut impl BlockFile, data_start: u32) -> Result<()> {
    if file.len()? < data_start {
        file.write_at(0, &vec![0u8; data_start as usize])?;
        file.commit_write()?;
    }
    Ok(())
}

/// A store kept in one directory: `<name>.db` holds the records and
/// `<name>.<id>.idx` the indexes.
pub struct DirStore {
    dir: PathBuf,
    name: String,
    data: DiskFile,
    config: IndexConfig,
}

impl DirStore {
    pub fn open(dir: &Path, name: &str, config: IndexConfig) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.db"));
        let mut data = DiskFile::open_or_create(&path, config.sync_writes)?;
        init_data_file(&mut data, config.data_start)?;

        debug!("opened store {}", path.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            data,
            config,
        })
    }

    pub fn index_path(&self, store_id: u32, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{store_id}.idx", name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl RecordStore for DirStore {
    type File = DiskFile;

    fn db_file(&mut self) -> &mut DiskFile {
        &mut self.data
    }

    fn num_records(&mut self) -> Result<u32> {
        let end = self.size()?;
        record::count_records(&mut self.data, self.config.data_start, end)
    }

    fn create_index_file(&mut self, store_id: u32, name: &str) -> Result<DiskFile> {
        let path = self.index_path(store_id, name);
        Ok(DiskFile::open_or_create(&path, self.config.sync_writes)?)
    }
}

/// A store living entirely in memory. Index files survive for as long as
/// the store does, so an index can be closed and opened again.
#[derive(Debug, Clone)]
pub struct MemStore {
    data: MemFile,
    indexes: HashMap<(u32, String), MemFile>,
    data_start: u32,
}

impl MemStore {
    pub fn new(data_start: u32) -> Result<Self> {
        let mut data = MemFile::new();
        init_data_file(&mut data, data_start)?;
        Ok(Self {
            data,
            indexes: HashMap::new(),
            data_start,
        })
    }

    /// Handle onto an index file previously created by this store.
    pub fn index_file(&self, store_id: u32, name: &str) -> Option<MemFile> {
        self.indexes.get(&(store_id, name.to_string())).cloned()
    }
}

impl RecordStore for MemStore {
    type File = MemFile;

    fn db_file(&mut self) -> &mut MemFile {
        &mut self.data
    }

    fn num_records(&mut self) -> Result<u32> {
        let end = self.size()?;
        record::count_records(&mut self.data, self.data_start, end)
    }

    fn create_index_file(&mut self, store_id: u32, name: &str) -> Result<MemFile> {
        Ok(self
            .indexes
            .entry((store_id, name.to_string()))
            .or_default()
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{write_block, BlockHeader};
    use tempfile::tempdir;

    #[test]
    fn test_mem_store_counts_records() {
        let mut store = MemStore::new(48).unwrap();
        assert_eq!(store.size().unwrap(), 48);
        assert_eq!(store.num_records().unwrap(), 0);

        let first = BlockHeader::new(1, 10, 0);
        write_block(store.db_file(), 48, &first).unwrap();
        write_block(store.db_file(), 48 + first.block_size(), &BlockHeader::free(10)).unwrap();
        assert_eq!(store.num_records().unwrap(), 1);
    }

    #[test]
    fn test_mem_store_index_files_persist() {
        let mut store = MemStore::new(48).unwrap();
        let mut file = store.create_index_file(3, "idx").unwrap();
        file.write_at(0, b"abc").unwrap();

        let mut again = store.create_index_file(3, "idx").unwrap();
        assert_eq!(again.len().unwrap(), 3);
        assert!(store.index_file(4, "idx").is_none());
    }

    #[test]
    fn test_dir_store_layout() {
        let dir = tempdir().unwrap();
        let mut store = DirStore::open(dir.path(), "books", IndexConfig::unsynced()).unwrap();
        assert_eq!(store.size().unwrap(), 48);
        assert_eq!(store.name(), "books");

        let mut file = store.create_index_file(1, "books").unwrap();
        assert!(file.is_empty().unwrap());
        assert!(dir.path().join("books.db").exists());
        assert!(dir.path().join("books.1.idx").exists());
    }
}
