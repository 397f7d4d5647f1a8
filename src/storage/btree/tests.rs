use super::page::Page;
use super::{
    Allocator, BulkLoad, BulkOptions, FailingAllocator, ImageReconciler, Layout, ReconcileFlags,
    Reconciler, RootEntries, Tree, TreeOptions,
};
use crate::primitives::pager::{FileStore, MemStore, PageStore};
use crate::types::{ArborError, ChildSlot, PageAddr, PageRole, RecordNo, Result};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

fn mem_tree(layout: Layout) -> Result<(Arc<MemStore>, Tree)> {
    let mem = Arc::new(MemStore::new());
    let store: Arc<dyn PageStore> = mem.clone();
    let tree = Tree::open_or_create(&store, TreeOptions::default().layout(layout))?;
    Ok((mem, tree))
}

fn per_page(records: u64) -> BulkOptions {
    BulkOptions::default().records_per_page(records)
}

fn collect_rows(tree: &Tree) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut rows = Vec::new();
    tree.for_each_row(|k, v| {
        rows.push((k.to_vec(), v.to_vec()));
        Ok(())
    })?;
    Ok(rows)
}

fn collect_records(tree: &Tree) -> Result<Vec<(u64, Vec<u8>)>> {
    let mut records = Vec::new();
    tree.for_each_record(|recno, v| {
        records.push((recno.0, v.to_vec()));
        Ok(())
    })?;
    Ok(records)
}

/// Delegates to an image reconciler but fails its `fail_on`th call.
struct FailingReconciler {
    inner: ImageReconciler,
    fail_on: u64,
    calls: AtomicU64,
}

impl FailingReconciler {
    fn wrap(tree: &Tree, fail_on: u64) -> Arc<dyn Reconciler> {
        Arc::new(Self {
            inner: ImageReconciler::new(Arc::clone(tree.store()), 1, tree.stats()),
            fail_on,
            calls: AtomicU64::new(0),
        })
    }
}

impl Reconciler for FailingReconciler {
    fn reconcile_and_evict(&self, page: &mut Page, flags: ReconcileFlags) -> Result<PageAddr> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if call == self.fail_on {
            return Err(ArborError::Corruption("injected reconcile failure"));
        }
        self.inner.reconcile_and_evict(page, flags)
    }
}

#[test]
fn row_pages_split_at_capacity() -> Result<()> {
    let (_mem, mut tree) = mem_tree(Layout::Row)?;
    let mut load = BulkLoad::begin(&mut tree, per_page(2))?;
    load.insert_row(b"a", b"1")?;
    load.insert_row(b"b", b"2")?;
    assert_eq!(load.leaf_pages(), 1);
    assert_eq!(load.page_records(), 0);
    load.insert_row(b"c", b"3")?;
    assert_eq!(load.page_records(), 1);
    let summary = load.end()?;
    assert_eq!(summary.records, 3);
    assert_eq!(summary.leaf_pages, 2);
    assert_eq!(tree.root_addr(), Some(summary.root));

    match tree.root_entries()? {
        RootEntries::Row(children) => {
            let keys: Vec<&[u8]> = children.iter().map(|c| &*c.key).collect();
            assert_eq!(keys, vec![&b"a"[..], &b"c"[..]]);
        }
        other => panic!("expected row root, got {other:?}"),
    }
    assert_eq!(
        collect_rows(&tree)?,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );
    assert_eq!(tree.get_row(b"b")?, Some(b"2".to_vec()));
    assert_eq!(tree.get_row(b"0")?, None);
    assert_eq!(tree.get_row(b"bb")?, None);
    Ok(())
}

#[test]
fn column_pages_carry_starting_record_numbers() -> Result<()> {
    let (_mem, mut tree) = mem_tree(Layout::VariableColumn)?;
    let mut load = BulkLoad::begin(&mut tree, per_page(3))?;
    for value in [b"10", b"20", b"30", b"40"] {
        load.insert_value(value)?;
    }
    assert_eq!(load.next_recno(), RecordNo(5));
    assert_eq!(load.leaf_pages(), 1);
    let summary = load.end()?;
    assert_eq!(summary.leaf_pages, 2);

    match tree.root_entries()? {
        RootEntries::Column(children) => {
            let starts: Vec<u64> = children.iter().map(|c| c.recno.0).collect();
            assert_eq!(starts, vec![1, 4]);
        }
        other => panic!("expected column root, got {other:?}"),
    }
    assert_eq!(tree.get_record(RecordNo(4))?, Some(b"40".to_vec()));
    assert_eq!(tree.get_record(RecordNo(2))?, Some(b"20".to_vec()));
    assert_eq!(tree.get_record(RecordNo(5))?, None);
    assert_eq!(tree.get_record(RecordNo(0))?, None);
    Ok(())
}

#[test]
fn end_without_inserts_builds_childless_root() -> Result<()> {
    let (_mem, mut tree) = mem_tree(Layout::Row)?;
    let load = BulkLoad::begin(&mut tree, BulkOptions::default())?;
    let summary = load.end()?;
    assert_eq!(summary.leaf_pages, 0);
    assert_eq!(summary.records, 0);
    assert!(tree.root_entries()?.is_empty());
    assert!(collect_rows(&tree)?.is_empty());
    assert_eq!(tree.get_row(b"anything")?, None);
    let stats = tree.stats_snapshot();
    assert_eq!(stats.leaf_pages_reconciled, 0);
    assert_eq!(stats.internal_pages_reconciled, 1);
    Ok(())
}

#[test]
fn begin_on_loaded_tree_fails_without_mutation() -> Result<()> {
    let (mem, mut tree) = mem_tree(Layout::Row)?;
    let mut load = BulkLoad::begin(&mut tree, per_page(4))?;
    load.insert_row(b"k", b"v")?;
    let summary = load.end()?;
    let store_len = mem.len();

    for _ in 0..2 {
        assert!(matches!(
            BulkLoad::begin(&mut tree, BulkOptions::default()),
            Err(ArborError::NotEmpty)
        ));
    }
    assert_eq!(tree.root_addr(), Some(summary.root));
    assert_eq!(mem.len(), store_len);
    assert!(tree.eviction_enabled());
    assert_eq!(tree.stats_snapshot().loads_abandoned, 0);

    tree.truncate();
    let mut load = BulkLoad::begin(&mut tree, per_page(4))?;
    load.insert_row(b"x", b"y")?;
    load.end()?;
    assert_eq!(collect_rows(&tree)?, vec![(b"x".to_vec(), b"y".to_vec())]);
    Ok(())
}

#[test]
fn invalid_options_are_rejected_before_release() -> Result<()> {
    let (_mem, mut tree) = mem_tree(Layout::Row)?;
    assert!(matches!(
        BulkLoad::begin(&mut tree, per_page(0)),
        Err(ArborError::Invalid(_))
    ));
    assert!(tree.is_initially_empty());
    assert!(tree.eviction_enabled());
    Ok(())
}

#[test]
fn column_allocation_failure_keeps_previous_records() -> Result<()> {
    let (_mem, mut tree) = mem_tree(Layout::VariableColumn)?;
    let alloc = Arc::new(FailingAllocator::fail_on_call(4));
    let mut load = BulkLoad::begin_with_allocator(&mut tree, per_page(100), alloc.clone())?;
    for value in [b"a", b"b", b"c"] {
        load.insert_value(value)?;
    }
    assert!(matches!(
        load.insert_value(b"d"),
        Err(ArborError::OutOfMemory("update"))
    ));
    assert_eq!(load.page_records(), 3);
    assert_eq!(load.records_inserted(), 3);
    assert_eq!(alloc.ledger().live(), 3);

    load.insert_value(b"d")?;
    assert_eq!(load.page_records(), 4);
    load.end()?;
    assert_eq!(
        collect_records(&tree)?,
        vec![
            (1, b"a".to_vec()),
            (2, b"b".to_vec()),
            (3, b"c".to_vec()),
            (4, b"d".to_vec()),
        ]
    );
    assert!(alloc.ledger().is_balanced());
    assert_eq!(tree.stats_snapshot().alloc_failures, 1);
    Ok(())
}

#[test]
fn row_allocation_failure_releases_the_key() -> Result<()> {
    let (_mem, mut tree) = mem_tree(Layout::Row)?;
    // Each row allocates a key then an update, so call 6 is the third update.
    let alloc = Arc::new(FailingAllocator::fail_on_call(6));
    let mut load = BulkLoad::begin_with_allocator(&mut tree, per_page(100), alloc.clone())?;
    load.insert_row(b"k1", b"v1")?;
    load.insert_row(b"k2", b"v2")?;
    assert!(matches!(
        load.insert_row(b"k3", b"v3"),
        Err(ArborError::OutOfMemory("update"))
    ));
    assert_eq!(load.page_records(), 2);
    assert_eq!(alloc.ledger().live(), 4);
    assert_eq!(alloc.ledger().allocations(), 5);
    drop(load);
    assert!(alloc.ledger().is_balanced());
    assert_eq!(tree.stats_snapshot().loads_abandoned, 1);
    Ok(())
}

#[test]
fn row_key_allocation_failure_allows_retry() -> Result<()> {
    let (_mem, mut tree) = mem_tree(Layout::Row)?;
    // Call 5 is the key of the third row.
    let alloc = Arc::new(FailingAllocator::fail_on_call(5));
    let mut load = BulkLoad::begin_with_allocator(&mut tree, per_page(2), alloc.clone())?;
    load.insert_row(b"a", b"1")?;
    load.insert_row(b"b", b"2")?;
    assert_eq!(load.leaf_pages(), 1);
    assert!(matches!(
        load.insert_row(b"c", b"3"),
        Err(ArborError::OutOfMemory("key record"))
    ));
    assert_eq!(load.page_records(), 0);
    assert_eq!(load.records_inserted(), 2);
    assert!(alloc.ledger().is_balanced());

    load.insert_row(b"c", b"3")?;
    assert_eq!(load.page_records(), 1);
    load.end()?;
    assert_eq!(
        collect_rows(&tree)?,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );
    assert!(alloc.ledger().is_balanced());
    assert_eq!(tree.stats_snapshot().alloc_failures, 1);
    Ok(())
}

/// Delegates to an image reconciler and remembers each page's back-reference.
struct RecordingReconciler {
    inner: ImageReconciler,
    seen: parking_lot::Mutex<Vec<(Option<ChildSlot>, u64)>>,
}

impl Reconciler for RecordingReconciler {
    fn reconcile_and_evict(&self, page: &mut Page, flags: ReconcileFlags) -> Result<PageAddr> {
        self.seen.lock().push((page.parent_slot(), page.read_gen()));
        self.inner.reconcile_and_evict(page, flags)
    }
}

#[test]
fn flushed_leaves_carry_their_parent_slot() -> Result<()> {
    let (_mem, tree) = mem_tree(Layout::VariableColumn)?;
    let recorder = Arc::new(RecordingReconciler {
        inner: ImageReconciler::new(Arc::clone(tree.store()), 1, tree.stats()),
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    let mut tree = tree.with_reconciler(recorder.clone());
    let mut load = BulkLoad::begin(&mut tree, per_page(2))?;
    for value in [b"v", b"w", b"x", b"y", b"z"] {
        load.insert_value(value)?;
    }
    load.end()?;
    let seen = recorder.seen.lock().clone();
    assert_eq!(
        seen.iter().map(|(slot, _)| *slot).collect::<Vec<_>>(),
        vec![Some(ChildSlot(0)), Some(ChildSlot(1)), Some(ChildSlot(2)), None]
    );
    let leaf_gens: Vec<u64> = seen[..3].iter().map(|(_, gen)| *gen).collect();
    assert!(leaf_gens.windows(2).all(|w| w[0] < w[1]));
    match tree.root_entries()? {
        RootEntries::Column(children) => {
            let starts: Vec<u64> = children.iter().map(|c| c.recno.0).collect();
            assert_eq!(starts, vec![1, 3, 5]);
            assert!(children.iter().all(|c| c.addr.is_some()));
        }
        other => panic!("unexpected root {other:?}"),
    }
    Ok(())
}

#[test]
fn leaf_reconcile_failure_abandons_the_load() -> Result<()> {
    let (_mem, tree) = mem_tree(Layout::Row)?;
    let failing = FailingReconciler::wrap(&tree, 1);
    let mut tree = tree.with_reconciler(failing);
    let mut load = BulkLoad::begin(&mut tree, per_page(2))?;
    load.insert_row(b"a", b"1")?;
    let err = load.insert_row(b"b", b"2").unwrap_err();
    assert!(matches!(
        err,
        ArborError::ReconcileFailed {
            page: PageRole::Leaf(ChildSlot(0)),
            ..
        }
    ));
    assert!(load.is_abandoned());
    assert!(matches!(
        load.insert_row(b"c", b"3"),
        Err(ArborError::Invalid("bulk load was abandoned"))
    ));
    let ledger = load.ledger();
    drop(load);
    assert!(ledger.is_balanced());
    assert!(!tree.eviction_enabled());
    assert!(matches!(
        tree.for_each_row(|_, _| Ok(())),
        Err(ArborError::NotFound)
    ));

    tree.truncate();
    assert!(tree.is_initially_empty());
    assert_eq!(tree.stats_snapshot().loads_abandoned, 1);
    Ok(())
}

#[test]
fn root_reconcile_failure_leaves_resident_root() -> Result<()> {
    let (_mem, tree) = mem_tree(Layout::Row)?;
    let failing = FailingReconciler::wrap(&tree, 3);
    let mut tree = tree.with_reconciler(failing);
    let mut load = BulkLoad::begin(&mut tree, per_page(2))?;
    for key in [b"a", b"b", b"c"] {
        load.insert_row(key, b"v")?;
    }
    let err = load.end().unwrap_err();
    assert!(matches!(
        err,
        ArborError::ReconcileFailed {
            page: PageRole::Root,
            ..
        }
    ));
    assert_eq!(tree.root_addr(), None);
    assert_eq!(tree.resident_root_entries(), Some(2));
    assert!(!tree.eviction_enabled());
    assert!(matches!(
        BulkLoad::begin(&mut tree, BulkOptions::default()),
        Err(ArborError::NotEmpty)
    ));
    let stats = tree.stats_snapshot();
    assert_eq!(stats.leaf_pages_reconciled, 2);
    assert_eq!(stats.loads_completed, 0);
    assert_eq!(stats.loads_abandoned, 1);
    Ok(())
}

#[test]
fn run_length_layout_counts_logical_records() -> Result<()> {
    let (_mem, mut tree) = mem_tree(Layout::RunLengthColumn)?;
    let values: [&[u8]; 6] = [b"x", b"x", b"x", b"y", b"y", b"x"];
    let mut load = BulkLoad::begin(&mut tree, per_page(4))?;
    for value in values {
        load.insert_value(value)?;
    }
    assert_eq!(load.leaf_pages(), 1);
    assert_eq!(load.page_records(), 2);
    let ledger = load.ledger();
    assert_eq!(ledger.allocations(), 4);
    load.end()?;

    match tree.root_entries()? {
        RootEntries::Column(children) => {
            assert_eq!(children.len(), 2);
            assert_eq!(children[1].recno, RecordNo(5));
        }
        other => panic!("expected column root, got {other:?}"),
    }
    let records = collect_records(&tree)?;
    let got: Vec<&[u8]> = records.iter().map(|(_, v)| v.as_slice()).collect();
    assert_eq!(got, values.to_vec());
    assert_eq!(tree.get_record(RecordNo(6))?, Some(b"x".to_vec()));
    assert!(ledger.is_balanced());
    Ok(())
}

#[test]
fn fixed_layout_rejects_wrong_width_at_flush() -> Result<()> {
    let mem = Arc::new(MemStore::new());
    let store: Arc<dyn PageStore> = mem.clone();
    let opts = TreeOptions::default()
        .layout(Layout::FixedColumn)
        .fixed_width(2);
    let mut tree = Tree::open_or_create(&store, opts.clone())?;
    let mut load = BulkLoad::begin(&mut tree, per_page(2))?;
    load.insert_value(b"ab")?;
    load.insert_value(b"cd")?;
    load.insert_value(b"ef")?;
    load.end()?;
    assert_eq!(tree.get_record(RecordNo(3))?, Some(b"ef".to_vec()));

    let mut tree = Tree::open_or_create(&store, opts)?;
    let mut load = BulkLoad::begin(&mut tree, per_page(2))?;
    load.insert_value(b"ab")?;
    let err = load.insert_value(b"xyz").unwrap_err();
    match err {
        ArborError::ReconcileFailed { page, source } => {
            assert_eq!(page, PageRole::Leaf(ChildSlot(0)));
            assert!(matches!(*source, ArborError::Invalid(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
    Ok(())
}

#[test]
fn column_insert_with_key_is_rejected() -> Result<()> {
    let (_mem, mut tree) = mem_tree(Layout::VariableColumn)?;
    let mut load = BulkLoad::begin(&mut tree, BulkOptions::default())?;
    assert!(matches!(
        load.insert(Some(b"k"), b"v"),
        Err(ArborError::Invalid("column-store inserts take no key"))
    ));
    assert_eq!(load.records_inserted(), 0);
    assert!(!load.is_abandoned());
    load.end()?;
    Ok(())
}

#[test]
fn child_reference_array_grows_in_chunks() -> Result<()> {
    let (_mem, mut tree) = mem_tree(Layout::VariableColumn)?;
    let opts = per_page(1).child_ref_chunk(4);
    let mut load = BulkLoad::begin(&mut tree, opts)?;
    assert_eq!(load.child_refs_used(), 0);
    assert!(load.child_refs_allocated() >= 4);
    for i in 0..9u32 {
        load.insert_value(&i.to_be_bytes())?;
    }
    assert_eq!(load.child_refs_used(), 9);
    assert_eq!(load.next_child_slot(), ChildSlot(9));
    assert!(load.child_refs_allocated() >= 9);
    let summary = load.end()?;
    assert_eq!(summary.leaf_pages, 9);
    assert_eq!(tree.root_entries()?.len(), 9);
    Ok(())
}

#[test]
fn corrupted_leaf_is_detected_on_read() -> Result<()> {
    let (mem, mut tree) = mem_tree(Layout::Row)?;
    let mut load = BulkLoad::begin(&mut tree, per_page(8))?;
    load.insert_row(b"key", b"value")?;
    load.end()?;
    mem.corrupt_byte(30);
    assert!(collect_rows(&tree).is_err());
    assert_eq!(tree.store().stats().checksum_failures, 1);
    Ok(())
}

#[test]
fn file_store_load_survives_reopen() -> Result<()> {
    let dir = tempdir().map_err(ArborError::Io)?;
    let path = dir.path().join("column.arbor");
    let mut rng = ChaCha8Rng::seed_from_u64(0xB01C);
    let values: Vec<Vec<u8>> = (0..5_000)
        .map(|_| {
            let len = rng.gen_range(0..24);
            (0..len).map(|_| rng.gen()).collect()
        })
        .collect();

    let root = {
        let store: Arc<dyn PageStore> = Arc::new(FileStore::create(&path)?);
        let mut tree =
            Tree::open_or_create(&store, TreeOptions::default().layout(Layout::VariableColumn))?;
        let mut load = BulkLoad::begin(&mut tree, per_page(256))?;
        for value in &values {
            load.insert_value(value)?;
        }
        let summary = load.end()?;
        assert_eq!(summary.leaf_pages, 20);
        store.sync()?;
        summary.root
    };

    let store: Arc<dyn PageStore> = Arc::new(FileStore::open(&path)?);
    let tree = Tree::open_or_create(
        &store,
        TreeOptions::default()
            .layout(Layout::VariableColumn)
            .root(root),
    )?;
    assert!(!tree.is_initially_empty());
    for probe in [1u64, 256, 257, 4_999, 5_000] {
        assert_eq!(
            tree.get_record(RecordNo(probe))?.as_deref(),
            Some(values[probe as usize - 1].as_slice())
        );
    }
    let records = collect_records(&tree)?;
    assert_eq!(records.len(), values.len());
    assert!(records
        .iter()
        .zip(&values)
        .all(|((_, got), want)| got == want));
    Ok(())
}

fn sorted_rows() -> impl Strategy<Value = BTreeMap<Vec<u8>, Vec<u8>>> {
    prop::collection::btree_map(
        prop::collection::vec(any::<u8>(), 1..6),
        prop::collection::vec(any::<u8>(), 0..6),
        0..120,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]
    #[test]
    fn flush_count_matches_capacity(total in 1u64..300, capacity in 1u64..20) {
        let (_mem, mut tree) = mem_tree(Layout::VariableColumn).expect("tree");
        let mut load = BulkLoad::begin(&mut tree, per_page(capacity)).expect("begin");
        for i in 0..total {
            load.insert_value(&i.to_le_bytes()).expect("insert");
        }
        let summary = load.end().expect("end");
        let expected = (total - 1) / capacity + 1;
        prop_assert_eq!(summary.leaf_pages, expected);
        prop_assert_eq!(tree.root_entries().expect("root").len() as u64, expected);
        prop_assert_eq!(tree.stats_snapshot().leaf_pages_reconciled, expected);
        prop_assert_eq!(tree.stats_snapshot().items_inserted, total);
    }

    #[test]
    fn row_load_scans_back_in_order(rows in sorted_rows(), capacity in 1u64..10) {
        let (_mem, mut tree) = mem_tree(Layout::Row).expect("tree");
        let mut load = BulkLoad::begin(&mut tree, per_page(capacity)).expect("begin");
        for (key, value) in &rows {
            load.insert_row(key, value).expect("insert");
        }
        load.end().expect("end");
        let expected: Vec<(Vec<u8>, Vec<u8>)> = rows.clone().into_iter().collect();
        prop_assert_eq!(collect_rows(&tree).expect("scan"), expected);
        for (key, value) in &rows {
            prop_assert_eq!(tree.get_row(key).expect("get"), Some(value.clone()));
        }
    }

    #[test]
    fn column_record_n_is_nth_value(
        values in prop::collection::vec(prop::collection::vec(0u8..3, 1..3), 0..150),
        capacity in 1u64..16,
        rle in any::<bool>(),
    ) {
        let layout = if rle { Layout::RunLengthColumn } else { Layout::VariableColumn };
        let (_mem, mut tree) = mem_tree(layout).expect("tree");
        let mut load = BulkLoad::begin(&mut tree, per_page(capacity)).expect("begin");
        for value in &values {
            load.insert_value(value).expect("insert");
        }
        load.end().expect("end");
        let records = collect_records(&tree).expect("scan");
        prop_assert_eq!(records.len(), values.len());
        for (idx, (recno, value)) in records.iter().enumerate() {
            prop_assert_eq!(*recno, idx as u64 + 1);
            prop_assert_eq!(value, &values[idx]);
        }
    }
}
