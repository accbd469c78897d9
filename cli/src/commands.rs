use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use storage::{DirStore, IndexConfig, RecordIndex, StorageError};

use crate::Command;

#[derive(Serialize)]
struct Entry {
    record: u32,
    offset: u32,
}

#[derive(Serialize)]
struct CheckReport {
    #[serde(flatten)]
    stats: storage::TreeStats,
    free_nodes: usize,
    size: u32,
}

fn render<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to encode JSON")
}

/// Run one command against the store in `dir` and return what to print.
pub fn run(
    dir: &Path,
    name: &str,
    store_id: u32,
    config: IndexConfig,
    command: &Command,
    json: bool,
) -> Result<String> {
    let mut store = DirStore::open(dir, name, config.clone())
        .with_context(|| format!("Failed to open store {name} in {}", dir.display()))?;
    let mut index = RecordIndex::open(&mut store, store_id, name, config)
        .with_context(|| format!("Failed to open index {}", store.index_path(store_id, name).display()))?;

    let output = match command {
        Command::Init | Command::DumpHeader => {
            let header = *index.header();
            if json {
                render(&header)?
            } else {
                format!(
                    "size {}\nid root {}\nfree-block root {}\nfree list head {}",
                    header.size, header.id_root, header.free_block_root, header.free_head
                )
            }
        }
        Command::Put { record, offset } => {
            index.update_record_id(*record, *offset)?;
            info!(record, offset, "updated record");
            format!("{record} -> {offset}")
        }
        Command::Get { record } => match index.block_offset_of_record(*record) {
            Ok(offset) if json => render(&Entry {
                record: *record,
                offset,
            })?,
            Ok(offset) => offset.to_string(),
            Err(StorageError::InvalidRecordId(id)) => {
                anyhow::bail!("record {id} is not in the index")
            }
            Err(e) => return Err(e.into()),
        },
        Command::Delete { record } => {
            index.delete_record_index(*record)?;
            format!("deleted {record}")
        }
        Command::List { limit } => {
            let entries = index.entries(limit.unwrap_or(usize::MAX))?;
            if json {
                let entries: Vec<Entry> = entries
                    .into_iter()
                    .map(|(record, offset)| Entry { record, offset })
                    .collect();
                render(&entries)?
            } else {
                let mut out = String::new();
                for (record, offset) in entries {
                    let _ = writeln!(out, "{record}\t{offset}");
                }
                out.trim_end().to_string()
            }
        }
        Command::Check => {
            let report = CheckReport {
                stats: index.verify()?,
                free_nodes: index.free_nodes()?,
                size: index.header().size,
            };
            if json {
                render(&report)?
            } else {
                format!(
                    "ok: {} keys in {} nodes, height {}, {} free nodes, {} bytes",
                    report.stats.keys,
                    report.stats.nodes,
                    report.stats.height,
                    report.free_nodes,
                    report.size
                )
            }
        }
        Command::FreeBlock { len } => match index.free_block(&mut store, *len)? {
            0 => "none, append at end".to_string(),
            offset => offset.to_string(),
        },
    };

    index.close()?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exec(dir: &Path, command: Command, json: bool) -> Result<String> {
        run(dir, "records", 1, IndexConfig::unsynced(), &command, json)
    }

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();

        exec(dir.path(), Command::Put { record: 42, offset: 1000 }, false).unwrap();
        assert_eq!(exec(dir.path(), Command::Get { record: 42 }, false).unwrap(), "1000");

        exec(dir.path(), Command::Delete { record: 42 }, false).unwrap();
        let err = exec(dir.path(), Command::Get { record: 42 }, false).unwrap_err();
        assert!(err.to_string().contains("not in the index"));
    }

    #[test]
    fn test_list_and_check_json() {
        let dir = tempdir().unwrap();
        for record in [3, 1, 2] {
            exec(dir.path(), Command::Put { record, offset: record * 64 }, false).unwrap();
        }

        let listed = exec(dir.path(), Command::List { limit: None }, false).unwrap();
        assert_eq!(listed, "1\t64\n2\t128\n3\t192");

        let report: serde_json::Value =
            serde_json::from_str(&exec(dir.path(), Command::Check, true).unwrap()).unwrap();
        assert_eq!(report["keys"], 3);
        assert_eq!(report["height"], 1);
    }

    #[test]
    fn test_init_prints_fresh_header() {
        let dir = tempdir().unwrap();
        let header: serde_json::Value =
            serde_json::from_str(&exec(dir.path(), Command::Init, true).unwrap()).unwrap();
        assert_eq!(header["size"], 216);
        assert_eq!(header["id_root"], 16);
        assert_eq!(
            exec(dir.path(), Command::FreeBlock { len: 10 }, false).unwrap(),
            "none, append at end"
        );
    }
}
