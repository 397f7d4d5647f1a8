use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{ByteRecord, ReaderBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::primitives::pager::{FileStore, PageStore};
use crate::storage::btree::{BulkLoad, BulkOptions, Layout, Tree, TreeOptions};
use crate::types::{ArborError, PageAddr};

/// Records between two progress callbacks.
pub const PROGRESS_INTERVAL: u64 = 4096;

/// Error type for CLI load/scan operations.
#[derive(Error, Debug)]
pub enum CliError {
    /// Generic error message.
    #[error("{0}")]
    Message(String),
    /// IO error from file operations.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// CSV parsing error.
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// Sidecar metadata could not be encoded or decoded.
    #[error("store metadata: {0}")]
    Json(#[from] serde_json::Error),
    /// Storage layer error.
    #[error(transparent)]
    Storage(#[from] ArborError),
}

impl From<&str> for CliError {
    fn from(value: &str) -> Self {
        CliError::Message(value.to_string())
    }
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        CliError::Message(value)
    }
}

/// Sidecar describing a loaded store, written next to it as `<STORE>.meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreMeta {
    /// Record layout of the tree.
    pub layout: Layout,
    /// Value width for fixed-length column trees.
    pub fixed_width: u8,
    /// Address of the root image.
    pub root: PageAddr,
    /// Records loaded.
    pub records: u64,
    /// Leaf pages written.
    pub leaf_pages: u64,
}

impl StoreMeta {
    /// Reads the sidecar that belongs to `store`.
    pub fn read(store: &Path) -> Result<Self, CliError> {
        let path = meta_path(store);
        let raw = fs::read(&path).map_err(|err| {
            CliError::Message(format!("cannot read {}: {err}", path.display()))
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Writes the sidecar for `store`, returning its path.
    pub fn write(&self, store: &Path) -> Result<PathBuf, CliError> {
        let path = meta_path(store);
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Tree options that reopen the stored tree.
    pub fn tree_options(&self) -> TreeOptions {
        TreeOptions::default()
            .layout(self.layout)
            .fixed_width(self.fixed_width)
            .root(self.root)
    }
}

/// Location of the sidecar for `store`.
pub fn meta_path(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Configuration for loading a CSV file into a new store.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Store file to create (truncated if it exists).
    pub store_path: PathBuf,
    /// CSV input.
    pub input: PathBuf,
    /// Tree layout and page format options.
    pub tree: TreeOptions,
    /// Bulk-load tuning.
    pub bulk: BulkOptions,
    /// Whether the first CSV row names the columns.
    pub has_headers: bool,
}

/// Summary statistics from a load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    /// Records loaded.
    pub records: u64,
    /// Leaf pages written.
    pub leaf_pages: u64,
    /// Address of the root image.
    pub root: PageAddr,
    /// Size of the store file after the load.
    pub store_bytes: u64,
    /// Where the sidecar was written.
    pub meta_path: PathBuf,
}

struct Columns {
    key: Option<usize>,
    value: usize,
}

fn resolve_columns(layout: Layout, headers: Option<&ByteRecord>) -> Result<Columns, CliError> {
    let find = |name: &str| {
        headers.and_then(|h| h.iter().position(|field| field == name.as_bytes()))
    };
    if layout.is_column() {
        let value = match headers {
            Some(_) => find("value").ok_or("CSV input needs a 'value' column")?,
            None => 0,
        };
        return Ok(Columns { key: None, value });
    }
    match headers {
        Some(_) => Ok(Columns {
            key: Some(find("key").ok_or("CSV input needs a 'key' column")?),
            value: find("value").ok_or("CSV input needs a 'value' column")?,
        }),
        None => Ok(Columns {
            key: Some(0),
            value: 1,
        }),
    }
}

/// Bulk loads `cfg.input` into a new file store.
///
/// `progress` is called with the running record count every
/// [`PROGRESS_INTERVAL`] records and once at the end.
pub fn run_load<F>(cfg: &LoadConfig, mut progress: F) -> Result<LoadSummary, CliError>
where
    F: FnMut(u64),
{
    let mut reader = ReaderBuilder::new()
        .has_headers(cfg.has_headers)
        .from_path(&cfg.input)?;
    let headers = if cfg.has_headers {
        Some(reader.byte_headers()?.clone())
    } else {
        None
    };
    let layout = cfg.tree.layout;
    let columns = resolve_columns(layout, headers.as_ref())?;

    let file_store = Arc::new(FileStore::create(&cfg.store_path)?);
    let store: Arc<dyn PageStore> = file_store.clone();
    let mut tree_opts = cfg.tree.clone();
    tree_opts.root = None;
    let mut tree = Tree::open_or_create(&store, tree_opts)?;
    let mut load = BulkLoad::begin(&mut tree, cfg.bulk.clone())?;
    debug!(input = %cfg.input.display(), layout = %layout, "loading CSV");

    let mut record = ByteRecord::new();
    let mut line = 0u64;
    while reader.read_byte_record(&mut record)? {
        line += 1;
        let value = record
            .get(columns.value)
            .ok_or_else(|| CliError::Message(format!("record {line}: missing value field")))?;
        match columns.key {
            Some(idx) => {
                let key = record
                    .get(idx)
                    .ok_or_else(|| CliError::Message(format!("record {line}: missing key field")))?;
                load.insert_row(key, value)?;
            }
            None => load.insert_value(value)?,
        }
        if line % PROGRESS_INTERVAL == 0 {
            progress(line);
        }
    }
    let summary = load.end()?;
    progress(summary.records);
    store.sync()?;
    tree.emit_stats();

    let meta = StoreMeta {
        layout,
        fixed_width: cfg.tree.fixed_width,
        root: summary.root,
        records: summary.records,
        leaf_pages: summary.leaf_pages,
    };
    let meta_path = meta.write(&cfg.store_path)?;
    info!(
        store = %cfg.store_path.display(),
        records = summary.records,
        leaf_pages = summary.leaf_pages,
        "load complete"
    );
    Ok(LoadSummary {
        records: summary.records,
        leaf_pages: summary.leaf_pages,
        root: summary.root,
        store_bytes: file_store.len(),
        meta_path,
    })
}
