//! Archive Tests
//!
//! Tests for zip extraction and the traversal guard.

use std::fs;
use std::io::{Cursor, Write};

use chrono::{TimeZone, Utc};
use rdagent::transfer::{
    archive_directory, extract_archive, list_metadata, set_last_write_time, ExtractError,
};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, FileOptions::default()).unwrap();
        } else {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

// =============================================================================
// Extraction Tests
// =============================================================================

#[test]
fn test_extract_creates_files_and_directories() {
    let data = zip_of(&[("empty/", b""), ("a/b/c.txt", b"hello"), ("top.txt", b"t")]);
    let dst = TempDir::new().unwrap();

    let count = extract_archive(&data, dst.path(), false).unwrap();
    assert_eq!(count, 3);
    assert!(dst.path().join("empty").is_dir());
    assert_eq!(fs::read(dst.path().join("a/b/c.txt")).unwrap(), b"hello");
    assert_eq!(fs::read(dst.path().join("top.txt")).unwrap(), b"t");
}

#[test]
fn test_traversal_rejects_whole_archive() {
    let data = zip_of(&[("good.txt", b"ok"), ("../outside", b"evil")]);
    let root = TempDir::new().unwrap();
    let dst = root.path().join("target");

    let err = extract_archive(&data, &dst, false).unwrap_err();
    assert!(matches!(err, ExtractError::PathOutsideTarget(ref name) if name == "../outside"));
    assert!(!root.path().join("outside").exists());
    assert!(!dst.join("good.txt").exists());
}

#[test]
fn test_inner_parent_components_stay_inside() {
    let data = zip_of(&[("a/../b.txt", b"fine")]);
    let dst = TempDir::new().unwrap();
    extract_archive(&data, dst.path(), false).unwrap();
    assert_eq!(fs::read(dst.path().join("b.txt")).unwrap(), b"fine");
}

#[test]
fn test_garbage_is_an_archive_error() {
    let dst = TempDir::new().unwrap();
    assert!(matches!(
        extract_archive(b"not a zip", dst.path(), false),
        Err(ExtractError::Archive(_)) | Err(ExtractError::Io(_))
    ));
}

// =============================================================================
// Archive Round Trip Tests
// =============================================================================

#[test]
fn test_archive_round_trip_preserves_timestamps() {
    let src = TempDir::new().unwrap();
    fs::create_dir_all(src.path().join("dir/nested")).unwrap();
    fs::write(src.path().join("dir/f.txt"), b"payload").unwrap();
    // Zip stores local times at two-second resolution
    let stamp = Utc.with_ymd_and_hms(2022, 2, 2, 10, 20, 30).unwrap();
    for path in ["dir/f.txt", "dir/nested", "dir"] {
        set_last_write_time(&src.path().join(path), stamp).unwrap();
    }

    let data = archive_directory(src.path()).unwrap();
    let dst = TempDir::new().unwrap();
    extract_archive(&data, dst.path(), true).unwrap();

    let listing = list_metadata(&dst.path().join("dir"), true).unwrap();
    assert_eq!(listing.len(), 3);
    for entry in &listing {
        assert_eq!(entry.last_write_time_utc, stamp, "{}", entry.relative_path);
    }
}
