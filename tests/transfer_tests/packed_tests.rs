//! Packed Transfer Tests
//!
//! Tests for parallel pack/unpack.

use std::fs;

use chrono::{TimeZone, Utc};
use rdagent::protocol::TransferStatus;
use rdagent::transfer::{list_metadata, pack_files, unpack_files, PackedFile};
use tempfile::TempDir;

fn paths(list: &[&str]) -> Vec<String> {
    list.iter().map(|p| p.to_string()).collect()
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_pack_then_unpack_recreates_tree() {
    let src = TempDir::new().unwrap();
    fs::create_dir_all(src.path().join("dir/empty")).unwrap();
    fs::write(src.path().join("dir/a.bin"), [0u8, 1, 2, 3]).unwrap();
    fs::write(src.path().join("top.txt"), b"top").unwrap();

    let request = paths(&["dir/", "dir/empty/", "dir/a.bin", "top.txt"]);
    let packed = pack_files(src.path(), &request, 3).unwrap();
    assert_eq!(
        packed.iter().map(|f| f.relative_path.as_str()).collect::<Vec<_>>(),
        vec!["dir/", "dir/empty/", "dir/a.bin", "top.txt"]
    );
    assert!(packed[0].data.is_empty());
    assert_eq!(packed[2].data, vec![0, 1, 2, 3]);

    let dst = TempDir::new().unwrap();
    unpack_files(dst.path(), &packed, true, 3).unwrap();

    assert!(dst.path().join("dir/empty").is_dir());
    assert_eq!(fs::read(dst.path().join("top.txt")).unwrap(), b"top");
    assert_eq!(
        list_metadata(src.path(), true).unwrap()[1..],
        list_metadata(dst.path(), true).unwrap()[1..]
    );
}

#[test]
fn test_unpack_stamps_directories_after_contents() {
    let old = Utc.with_ymd_and_hms(2010, 5, 17, 9, 30, 0).unwrap();
    let files = vec![
        PackedFile::new(Vec::new(), "a/", old),
        PackedFile::new(Vec::new(), "a/b/", old),
        PackedFile::new(b"x".to_vec(), "a/b/x.txt", old),
        PackedFile::new(b"y".to_vec(), "a/y.txt", old),
    ];
    let dst = TempDir::new().unwrap();
    unpack_files(dst.path(), &files, true, 4).unwrap();

    for entry in list_metadata(&dst.path().join("a"), true).unwrap() {
        assert_eq!(entry.last_write_time_utc, old, "{}", entry.relative_path);
    }
}

#[test]
fn test_unpack_without_preserve_keeps_current_time() {
    let old = Utc.with_ymd_and_hms(2010, 5, 17, 9, 30, 0).unwrap();
    let dst = TempDir::new().unwrap();
    unpack_files(dst.path(), &[PackedFile::new(b"z".to_vec(), "z.txt", old)], false, 1).unwrap();

    let listing = list_metadata(&dst.path().join("z.txt"), false).unwrap();
    assert!(listing[0].last_write_time_utc > old);
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_missing_file_reports_not_found() {
    let src = TempDir::new().unwrap();
    fs::write(src.path().join("present"), b"1").unwrap();

    let failure = pack_files(src.path(), &paths(&["present", "absent"]), 2).unwrap_err();
    assert_eq!(failure.status, TransferStatus::FileOrDirectoryNotFound);
    assert_eq!(failure.path, "absent");
}

#[test]
fn test_file_requested_as_directory_fails() {
    let src = TempDir::new().unwrap();
    fs::write(src.path().join("plain"), b"1").unwrap();

    let failure = pack_files(src.path(), &paths(&["plain/"]), 1).unwrap_err();
    assert_eq!(failure.path, "plain/");
}

#[cfg(unix)]
#[test]
fn test_unpack_into_read_only_directory_reports_permission_denied() {
    use std::os::unix::fs::PermissionsExt;

    let root = TempDir::new().unwrap();
    let locked = root.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
    if fs::write(locked.join("canary"), b"").is_ok() {
        // Privileged users write regardless of the mode bits
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let files = vec![
        PackedFile::new(b"1".to_vec(), "sub/x", Utc::now()),
        PackedFile::new(b"2".to_vec(), "y", Utc::now()),
    ];
    let result = unpack_files(&locked, &files, false, 2);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    let failure = result.unwrap_err();
    assert_eq!(failure.status, TransferStatus::PermissionDenied);
    assert!(!locked.join("y").exists());
}

#[test]
fn test_unpack_rejects_parent_traversal() {
    let root = TempDir::new().unwrap();
    let dst = root.path().join("dst");
    let files = vec![PackedFile::new(b"evil".to_vec(), "../outside", Utc::now())];

    assert!(unpack_files(&dst, &files, false, 1).is_err());
    assert!(!root.path().join("outside").exists());
}

#[test]
fn test_many_files_in_parallel() {
    let src = TempDir::new().unwrap();
    let names: Vec<String> = (0..64).map(|i| format!("f{:02}.dat", i)).collect();
    for (i, name) in names.iter().enumerate() {
        fs::write(src.path().join(name), vec![i as u8; i * 10]).unwrap();
    }

    let packed = pack_files(src.path(), &names, 8).unwrap();
    assert_eq!(packed.len(), 64);
    for (i, file) in packed.iter().enumerate() {
        assert_eq!(file.relative_path, names[i]);
        assert_eq!(file.data.len(), i * 10);
    }
}
