#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use arbor::cli::load::{meta_path, StoreMeta};
use arbor::storage::btree::Layout;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn write_csv(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write csv");
    path
}

fn load_json(store: &Path, input: &Path, extra: &[&str]) -> Value {
    let output = cargo_bin_cmd!("arbor")
        .args(["--quiet", "--format", "json", "load"])
        .arg(store)
        .arg("--input")
        .arg(input)
        .args(extra)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

fn scan(store: &Path) -> String {
    let output = cargo_bin_cmd!("arbor")
        .arg("scan")
        .arg(store)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8(output).expect("utf8 scan output")
}

#[test]
fn row_load_then_scan() {
    let dir = TempDir::new().expect("tempdir");
    let input = write_csv(&dir, "rows.csv", "key,value\na,1\nb,2\nc,3\n");
    let store = dir.path().join("rows.arbor");
    let json = load_json(&store, &input, &["--layout", "row", "--records-per-page", "2"]);
    assert_eq!(json["records"], 3);
    assert_eq!(json["leaf_pages"], 2);
    assert!(json["root"]["offset"].is_number());

    let meta = StoreMeta::read(&store).expect("sidecar");
    assert_eq!(meta.layout, Layout::Row);
    assert!(meta_path(&store).exists());

    assert_eq!(scan(&store), "a\t1\nb\t2\nc\t3\n");
}

#[test]
fn column_layouts_number_records() {
    let dir = TempDir::new().expect("tempdir");
    let input = write_csv(&dir, "values.csv", "value\nx\nx\ny\n");
    for layout in ["var", "rle"] {
        let store = dir.path().join(format!("{layout}.arbor"));
        let json = load_json(&store, &input, &["--layout", layout]);
        assert_eq!(json["records"], 3);
        assert_eq!(json["leaf_pages"], 1);
        assert_eq!(scan(&store), "1\tx\n2\tx\n3\ty\n");
    }
}

#[test]
fn config_file_supplies_layout_and_flags_override() {
    let dir = TempDir::new().expect("tempdir");
    let config = write_csv(
        &dir,
        "arbor.toml",
        "[tree]\nlayout = \"fix\"\nfixed_width = 2\n\n[bulk]\nrecords_per_page = 100\n",
    );
    let input = write_csv(&dir, "fixed.csv", "value\naa\nbb\ncc\n");
    let store = dir.path().join("fixed.arbor");
    let json = load_json(
        &store,
        &input,
        &["--config", config.to_str().expect("utf8 path"), "--records-per-page", "1"],
    );
    assert_eq!(json["leaf_pages"], 3);
    let meta = StoreMeta::read(&store).expect("sidecar");
    assert_eq!(meta.layout, Layout::FixedColumn);
    assert_eq!(meta.fixed_width, 2);
    assert_eq!(scan(&store), "1\taa\n2\tbb\n3\tcc\n");
}

#[test]
fn wrong_fixed_width_fails_the_load() {
    let dir = TempDir::new().expect("tempdir");
    let input = write_csv(&dir, "fixed.csv", "value\nabc\n");
    let store = dir.path().join("bad.arbor");
    cargo_bin_cmd!("arbor")
        .args(["--quiet", "load"])
        .arg(&store)
        .arg("--input")
        .arg(&input)
        .args(["--layout", "fix", "--fixed-width", "2"])
        .assert()
        .failure();
    assert!(!meta_path(&store).exists());
}

#[test]
fn zero_records_per_page_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let input = write_csv(&dir, "rows.csv", "key,value\na,1\n");
    let store = dir.path().join("rows.arbor");
    cargo_bin_cmd!("arbor")
        .args(["--quiet", "load"])
        .arg(&store)
        .arg("--input")
        .arg(&input)
        .args(["--layout", "row", "--records-per-page", "0"])
        .assert()
        .failure();
    assert!(!store.exists());
}

#[test]
fn scan_without_sidecar_fails() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("arbor")
        .arg("scan")
        .arg(dir.path().join("missing.arbor"))
        .assert()
        .failure();
}
