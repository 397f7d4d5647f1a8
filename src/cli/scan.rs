use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::cli::load::{CliError, StoreMeta};
use crate::primitives::pager::{FileStore, PageStore};
use crate::storage::btree::Tree;
use crate::types::ArborError;

/// Renders bytes as UTF-8 when printable, otherwise as `0x`-prefixed hex.
pub fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.chars().any(char::is_control) => text.to_string(),
        _ => format!("0x{}", hex::encode(bytes)),
    }
}

/// Writes every record of the store at `store_path` to `out`, one per line,
/// as `key<TAB>value` (row layout) or `recno<TAB>value` (column layouts).
///
/// Returns the number of records written.
pub fn run_scan<W: Write>(store_path: &Path, out: &mut W) -> Result<u64, CliError> {
    let meta = StoreMeta::read(store_path)?;
    let store: Arc<dyn PageStore> = Arc::new(FileStore::open(store_path)?);
    let tree = Tree::open_or_create(&store, meta.tree_options())?;
    let mut count = 0u64;
    let mut write_line = |left: String, value: &[u8]| -> crate::types::Result<()> {
        writeln!(out, "{left}\t{}", display_bytes(value)).map_err(ArborError::Io)?;
        count += 1;
        Ok(())
    };
    if meta.layout.is_column() {
        tree.for_each_record(|recno, value| write_line(recno.to_string(), value))?;
    } else {
        tree.for_each_row(|key, value| write_line(display_bytes(key), value))?;
    }
    if count != meta.records {
        return Err(CliError::Message(format!(
            "store holds {count} records but its metadata says {}",
            meta.records
        )));
    }
    Ok(count)
}
