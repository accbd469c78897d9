//! Tunables for opening an index and the files behind it.

/// Offset of the first record block in a data file. Everything before it is
/// the data file's own header, which this crate never interprets.
pub const DEFAULT_DATA_START: u32 = 48;

/// Deepest tree a walk or search will follow before declaring the file
/// corrupt. A full tree of this height holds far more than 2^32 keys.
pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IndexConfig {
    /// Issue `sync_data` on every commit of a disk file.
    pub sync_writes: bool,
    /// Offset where the free-block scanner starts in the data file.
    pub data_start: u32,
    /// Load the root node right after opening, ignoring failures.
    pub warm_up: bool,
    /// Height limit for tree traversals.
    pub max_depth: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            sync_writes: true,
            data_start: DEFAULT_DATA_START,
            warm_up: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl IndexConfig {
    /// Defaults with fsync turned off, for tests and throwaway stores.
    pub fn unsynced() -> Self {
        Self {
            sync_writes: false,
            ..Self::default()
        }
    }
}
