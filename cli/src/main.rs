//! `recstore`: inspect and edit the record-id index of a directory store.
//!
//! # Usage
//!
//! ```bash
//! # Create the store and its index
//! recstore --dir /var/lib/recstore init
//!
//! # Point record 42 at block offset 1000, then read it back
//! recstore --dir /var/lib/recstore put 42 1000
//! recstore --dir /var/lib/recstore get 42
//!
//! # Structural check, as JSON
//! recstore --dir /var/lib/recstore --json check
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use storage::IndexConfig;

#[derive(Parser, Debug)]
#[command(name = "recstore", version, about = "Record-id index tool")]
struct Args {
    /// Directory holding the store files
    #[arg(short = 'd', long, value_name = "DIR", default_value = ".", env = "RECSTORE_DIR")]
    dir: PathBuf,

    /// Store name; files are <name>.db and <name>.<id>.idx
    #[arg(short = 's', long, default_value = "records")]
    store: String,

    /// Store id the index belongs to
    #[arg(long, default_value_t = 1)]
    id: u32,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the store and index if missing and print the index header
    Init,
    /// Map a record id to a block offset
    Put { record: u32, offset: u32 },
    /// Print the block offset of a record
    Get { record: u32 },
    /// Remove a record id from the index
    Delete { record: u32 },
    /// List (record id, block offset) pairs in id order
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Verify the tree structure
    Check,
    /// Find a reusable data block for a record of LEN bytes
    FreeBlock { len: u32 },
    /// Print the index header
    DumpHeader,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(args.config.as_deref())?;
    let output = commands::run(
        &args.dir,
        &args.store,
        args.id,
        config,
        &args.command,
        args.json,
    )?;
    println!("{output}");
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults, then the config file if given, then `RECSTORE_*` variables.
fn load_config(path: Option<&std::path::Path>) -> Result<IndexConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("RECSTORE")
            .try_parsing(true)
            .ignore_empty(true),
    );

    builder
        .build()
        .and_then(|c| c.try_deserialize::<IndexConfig>())
        .context("Failed to load configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recstore.toml");
        std::fs::write(&path, "sync_writes = false\nmax_depth = 12\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert!(!config.sync_writes);
        assert_eq!(config.max_depth, 12);
        assert_eq!(config.data_start, IndexConfig::default().data_start);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["recstore", "--dir", "/tmp/x", "put", "7", "128"]).unwrap();
        assert_eq!(args.dir, PathBuf::from("/tmp/x"));
        assert!(matches!(args.command, Command::Put { record: 7, offset: 128 }));
    }
}
