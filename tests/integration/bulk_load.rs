#![allow(missing_docs)]

use std::sync::Arc;

use arbor::primitives::pager::{FileStore, PageStore};
use arbor::storage::btree::{BulkLoad, BulkOptions, Layout, RootEntries, Tree, TreeOptions};
use arbor::types::{ArborError, RecordNo, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

fn key(i: u32) -> [u8; 4] {
    i.to_be_bytes()
}

#[test]
fn row_tree_round_trips_through_file_store() -> Result<()> {
    let dir = TempDir::new().map_err(ArborError::Io)?;
    let path = dir.path().join("rows.arbor");
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let rows: Vec<([u8; 4], Vec<u8>)> = (0..20_000u32)
        .map(|i| {
            let len = rng.gen_range(0..32);
            (key(i * 3), (0..len).map(|_| rng.gen()).collect())
        })
        .collect();

    let root = {
        let store: Arc<dyn PageStore> = Arc::new(FileStore::create(&path)?);
        let mut tree = Tree::open_or_create(&store, TreeOptions::default())?;
        let mut load = BulkLoad::begin(&mut tree, BulkOptions::default().records_per_page(1000))?;
        for (k, v) in &rows {
            load.insert_row(k, v)?;
        }
        let summary = load.end()?;
        assert_eq!(summary.leaf_pages, 20);
        assert!(tree.eviction_enabled());
        let stats = tree.stats_snapshot();
        assert_eq!(stats.items_inserted, 20_000);
        assert_eq!(stats.loads_completed, 1);
        store.sync()?;
        summary.root
    };

    let store: Arc<dyn PageStore> = Arc::new(FileStore::open(&path)?);
    let tree = Tree::open_or_create(&store, TreeOptions::default().root(root))?;
    match tree.root_entries()? {
        RootEntries::Row(children) => {
            assert_eq!(children.len(), 20);
            assert_eq!(&*children[1].key, &key(3_000)[..]);
        }
        other => panic!("unexpected root {other:?}"),
    }
    let mut seen = 0usize;
    tree.for_each_row(|k, v| {
        assert_eq!(k, &rows[seen].0[..]);
        assert_eq!(v, rows[seen].1.as_slice());
        seen += 1;
        Ok(())
    })?;
    assert_eq!(seen, rows.len());
    assert_eq!(tree.get_row(&key(2_999))?, None);
    assert_eq!(tree.get_row(&key(3_000))?, Some(rows[1_000].1.clone()));
    assert!(store.stats().images_read > 20);
    Ok(())
}

#[test]
fn default_page_capacity_holds_fifty_thousand_records() -> Result<()> {
    let dir = TempDir::new().map_err(ArborError::Io)?;
    let store: Arc<dyn PageStore> = Arc::new(FileStore::create(dir.path().join("rle.arbor"))?);
    let mut tree = Tree::open_or_create(
        &store,
        TreeOptions::default().layout(Layout::RunLengthColumn),
    )?;
    let mut load = BulkLoad::begin(&mut tree, BulkOptions::default())?;
    for i in 0..120_000u32 {
        load.insert_value(&[(i / 10_000) as u8])?;
    }
    let summary = load.end()?;
    assert_eq!(summary.leaf_pages, 3);
    match tree.root_entries()? {
        RootEntries::Column(children) => {
            let starts: Vec<u64> = children.iter().map(|c| c.recno.0).collect();
            assert_eq!(starts, vec![1, 50_001, 100_001]);
        }
        other => panic!("unexpected root {other:?}"),
    }
    assert_eq!(tree.get_record(RecordNo(120_000))?, Some(vec![11]));
    assert_eq!(tree.get_record(RecordNo(50_000))?, Some(vec![4]));
    assert_eq!(tree.get_record(RecordNo(120_001))?, None);
    Ok(())
}

#[test]
fn reopened_tree_refuses_a_second_load() -> Result<()> {
    let dir = TempDir::new().map_err(ArborError::Io)?;
    let path = dir.path().join("once.arbor");
    let store: Arc<dyn PageStore> = Arc::new(FileStore::create(&path)?);
    let opts = TreeOptions::default().layout(Layout::VariableColumn);
    let mut tree = Tree::open_or_create(&store, opts.clone())?;
    let mut load = BulkLoad::begin(&mut tree, BulkOptions::default())?;
    load.insert_value(b"only")?;
    let root = load.end()?.root;

    let mut reopened = Tree::open_or_create(&store, opts.root(root))?;
    assert!(matches!(
        BulkLoad::begin(&mut reopened, BulkOptions::default()),
        Err(ArborError::NotEmpty)
    ));
    assert_eq!(reopened.get_record(RecordNo(1))?, Some(b"only".to_vec()));
    Ok(())
}
