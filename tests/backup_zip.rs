#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("schoolbook-backup-src");
    let workspace2 = temp_dir("schoolbook-backup-dst");
    let out_dir = temp_dir("schoolbook-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("schoolbook.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.join("nested").join("workspace.sbbackup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/schoolbook.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT);

    let restored = std::fs::read(workspace2.join("schoolbook.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn export_without_database_fails() {
    let workspace = temp_dir("schoolbook-backup-empty");
    let out = workspace.join("out.zip");
    assert!(backup::export_workspace_bundle(&workspace, &out).is_err());
    let _ = std::fs::remove_dir_all(workspace);
}

fn write_bundle(path: &std::path::Path, manifest: serde_json::Value, db: &[u8]) {
    let f = File::create(path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(f);
    let opts = zip::write::FileOptions::default();
    zip.start_file("manifest.json", opts).expect("manifest entry");
    zip.write_all(manifest.to_string().as_bytes())
        .expect("write manifest");
    zip.start_file("db/schoolbook.sqlite3", opts)
        .expect("db entry");
    zip.write_all(db).expect("write db");
    zip.finish().expect("finish zip");
}

#[test]
fn tampered_database_is_rejected() {
    let out_dir = temp_dir("schoolbook-backup-tampered");
    let workspace = temp_dir("schoolbook-backup-tampered-dst");
    std::fs::write(workspace.join("schoolbook.sqlite3"), b"keep-me").expect("write existing db");

    let bundle_path = out_dir.join("tampered.zip");
    write_bundle(
        &bundle_path,
        serde_json::json!({
            "format": backup::BUNDLE_FORMAT,
            "version": 1,
            "dbSha256": "0".repeat(64),
        }),
        b"swapped-payload",
    );

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("checksum mismatch must fail");
    assert!(err.to_string().contains("checksum mismatch"), "{}", err);
    let kept = std::fs::read(workspace.join("schoolbook.sqlite3")).expect("read existing db");
    assert_eq!(kept, b"keep-me");

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bundle_without_checksum_is_rejected() {
    let out_dir = temp_dir("schoolbook-backup-nosum");
    let workspace = temp_dir("schoolbook-backup-nosum-dst");
    std::fs::write(workspace.join("schoolbook.sqlite3"), b"keep-me").expect("write existing db");

    let bundle_path = out_dir.join("nosum.zip");
    write_bundle(
        &bundle_path,
        serde_json::json!({ "format": backup::BUNDLE_FORMAT, "version": 1 }),
        b"unchecked-payload",
    );

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("missing checksum must fail");
    assert!(err.to_string().contains("dbSha256"), "{}", err);
    let kept = std::fs::read(workspace.join("schoolbook.sqlite3")).expect("read existing db");
    assert_eq!(kept, b"keep-me");

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = temp_dir("schoolbook-backup-raw");
    let workspace = temp_dir("schoolbook-backup-raw-dst");

    let raw_file = out_dir.join("copy.sqlite3");
    let bytes = b"raw-sqlite-copy";
    std::fs::write(&raw_file, bytes).expect("write raw sqlite file");

    let import = backup::import_workspace_bundle(&raw_file, &workspace).expect("import raw sqlite");
    assert_eq!(import.bundle_format_detected, "raw-sqlite3");

    let restored = std::fs::read(workspace.join("schoolbook.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
