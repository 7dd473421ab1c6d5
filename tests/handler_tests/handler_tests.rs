//! Handler Tests
//!
//! Tests for command dispatch and the per-command handlers.

use std::fs;
use std::io::{Cursor, Write};

use rdagent::handlers::{fetch_metadata, fetch_result_range, put_directory, put_file};
use rdagent::protocol::*;
use rdagent::transfer::list_metadata;
use rdagent::{Config, DispatchContext, Dispatcher};
use tempfile::TempDir;

fn dispatcher() -> Dispatcher {
    Dispatcher::new(Config::builder().transfer_workers(2).build())
}

fn dispatch(command: Command) -> Response {
    dispatcher()
        .dispatch(command, &DispatchContext::default())
        .expect("command should be answered")
}

// =============================================================================
// Dispatch Tests
// =============================================================================

#[test]
fn test_capabilities_are_current() {
    match dispatch(Command::GetServerCapabilities) {
        Response::GetServerCapabilities(info) => {
            assert_eq!(info.version, rdagent::VERSION);
            assert!(info.is_up_to_date());
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_environment_listing_contains_path() {
    match dispatch(Command::ListEnvironmentVariables) {
        Response::EnvironmentVariablesListed(listed) => {
            assert_eq!(listed.variables.get("PATH"), std::env::var("PATH").ok().as_ref());
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_deploy_is_not_answered() {
    let dir = TempDir::new().unwrap();
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("app.cfg", zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(b"cfg").unwrap();
    let data = writer.finish().unwrap().into_inner();

    let response = dispatcher().dispatch(
        Command::Deploy(DeployCommand {
            destination: dir.path().to_string_lossy().into_owned(),
            data,
        }),
        &DispatchContext::default(),
    );
    assert!(response.is_none());
    assert_eq!(fs::read(dir.path().join("app.cfg")).unwrap(), b"cfg");
}

#[cfg(unix)]
#[test]
fn test_execute_reports_exit_code_and_output() {
    let response = dispatch(Command::Execute(ExecuteCommand {
        executable: "/bin/sh".into(),
        arguments: r#"-c "echo hi; exit 4""#.into(),
        wait_for_completion: true,
        ..ExecuteCommand::default()
    }));
    match response {
        Response::ExecutionCompleted(done) => {
            assert_eq!(done.status, ExecutionStatus::Completed);
            assert_eq!(done.exit_code, 4);
            assert_eq!(done.stdout, "hi\n");
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_execute_missing_binary_could_not_launch() {
    let response = dispatch(Command::Execute(ExecuteCommand {
        executable: "/no/such/tool".into(),
        wait_for_completion: true,
        ..ExecuteCommand::default()
    }));
    match response {
        Response::ExecutionCompleted(done) => {
            assert_eq!(done.status, ExecutionStatus::CouldNotLaunch);
            assert_eq!(done.exit_code, -1);
            assert!(!done.stderr.is_empty());
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[cfg(unix)]
#[test]
fn test_execute_timeout_reports_tree() {
    let response = dispatch(Command::Execute(ExecuteCommand {
        executable: "/bin/sh".into(),
        arguments: r#"-c "sleep 10""#.into(),
        wait_for_completion: true,
        execution_timeout_secs: 1,
        ..ExecuteCommand::default()
    }));
    match response {
        Response::ExecutionTimedOut(timed_out) => {
            assert!(!timed_out.process_tree.is_empty());
            assert!(timed_out.execution_time_ms >= 1000);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

// =============================================================================
// File Handler Tests
// =============================================================================

#[test]
fn test_put_file_creates_parents() {
    let dir = TempDir::new().unwrap();
    let response = put_file(&PutFileCommand {
        data: b"abc".to_vec(),
        work_dir: dir.path().to_string_lossy().into_owned(),
        path: "x/y/z.txt".into(),
    });
    assert!(matches!(
        response,
        Response::PutFile(PutFileResponse { status: TransferStatus::Successful, .. })
    ));
    assert_eq!(fs::read(dir.path().join("x/y/z.txt")).unwrap(), b"abc");
}

#[test]
fn test_check_outdated_uses_list_files_response() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("f"), b"1").unwrap();
    let mut files = list_metadata(dir.path(), true).unwrap();
    files[1].size = 99;

    let response = dispatch(Command::CheckOutdatedFiles(CheckOutdatedFilesCommand {
        dst_path: dir.path().to_string_lossy().into_owned(),
        files,
    }));
    match response {
        Response::ListFiles(listed) => {
            assert_eq!(listed.files.len(), 1);
            assert_eq!(listed.files[0].relative_path, "f");
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_get_file_then_send_file() {
    let src = TempDir::new().unwrap();
    fs::create_dir(src.path().join("d")).unwrap();
    fs::write(src.path().join("d/one"), b"1").unwrap();

    let response = dispatch(Command::GetFile(GetFileCommand {
        root_path: src.path().to_string_lossy().into_owned(),
        paths: vec!["d/".into(), "d/one".into()],
        use_compression: true,
    }));
    assert_eq!(response.response_type(), ResponseType::Compressed);
    let Response::GetFiles(got) = response.into_uncompressed(1 << 20).unwrap() else {
        panic!("expected GetFiles");
    };
    assert_eq!(got.status, TransferStatus::Successful);

    let dst = TempDir::new().unwrap();
    let response = dispatch(Command::SendFile(SendFileCommand {
        root_path: dst.path().to_string_lossy().into_owned(),
        files: got.files,
        preserve_timestamps: true,
    }));
    assert!(matches!(
        response,
        Response::PutFile(PutFileResponse { status: TransferStatus::Successful, .. })
    ));
    assert_eq!(fs::read(dst.path().join("d/one")).unwrap(), b"1");
}

#[test]
fn test_list_files_of_missing_path_is_empty() {
    let dir = TempDir::new().unwrap();
    let response = dispatch(Command::ListFiles(ListFilesCommand {
        work_dir: dir.path().to_string_lossy().into_owned(),
        path: "missing".into(),
        include_subdirectories: true,
    }));
    assert_eq!(response, Response::ListFiles(ListFilesResponse::default()));
}

#[cfg(unix)]
#[test]
fn test_list_files_skips_dangling_links() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"a").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub/b.txt"), b"bb").unwrap();
    std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("sub/broken")).unwrap();

    let response = dispatch(Command::ListFiles(ListFilesCommand {
        work_dir: dir.path().to_string_lossy().into_owned(),
        path: String::new(),
        include_subdirectories: true,
    }));
    match response {
        Response::ListFiles(listed) => {
            let paths: Vec<&str> = listed.files.iter().map(|f| f.relative_path.as_str()).collect();
            assert_eq!(paths, vec!["./", "a.txt", "sub/", "sub/b.txt"]);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

/// Make `dir` read-only; `false` when the process can write regardless (root)
#[cfg(unix)]
fn make_read_only(dir: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o555)).unwrap();
    let canary = dir.join("canary");
    if fs::write(&canary, b"").is_ok() {
        fs::remove_file(&canary).unwrap();
        fs::set_permissions(dir, fs::Permissions::from_mode(0o755)).unwrap();
        return false;
    }
    true
}

#[cfg(unix)]
#[test]
fn test_put_file_into_read_only_directory_is_permission_denied() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let locked = dir.path().join("locked");
    fs::create_dir(&locked).unwrap();
    if !make_read_only(&locked) {
        return;
    }

    let response = put_file(&PutFileCommand {
        data: b"abc".to_vec(),
        work_dir: locked.to_string_lossy().into_owned(),
        path: "z.txt".into(),
    });
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    match response {
        Response::PutFile(put) => {
            assert_eq!(put.status, TransferStatus::PermissionDenied);
            assert!(put.error_message.contains("z.txt"));
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_put_directory_onto_file_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("taken"), b"").unwrap();
    let response = put_directory(&PutDirectoryCommand {
        zip_data: Vec::new(),
        work_dir: dir.path().to_string_lossy().into_owned(),
        path: "taken".into(),
        preserve_timestamps: false,
    });
    assert!(matches!(
        response,
        Response::PutDirectory(PutDirectoryResponse {
            status: PutDirectoryStatus::TargetPathIsFile,
            ..
        })
    ));
}

#[test]
fn test_put_directory_with_traversal_is_refused() {
    let dir = TempDir::new().unwrap();
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("../../escape", zip::write::FileOptions::default())
        .unwrap();
    writer.write_all(b"x").unwrap();
    let zip_data = writer.finish().unwrap().into_inner();

    let response = put_directory(&PutDirectoryCommand {
        zip_data,
        work_dir: dir.path().to_string_lossy().into_owned(),
        path: "out".into(),
        preserve_timestamps: false,
    });
    assert!(matches!(
        response,
        Response::PutDirectory(PutDirectoryResponse {
            status: PutDirectoryStatus::ArchiveContainsPathOutsideTarget,
            ..
        })
    ));
}

// =============================================================================
// Fetch Handler Tests
// =============================================================================

#[test]
fn test_fetch_binary_metadata_and_range() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.bin");
    fs::write(&path, (0u8..32).collect::<Vec<_>>()).unwrap();
    let file_path = path.to_string_lossy().into_owned();

    match fetch_metadata(&FetchMetadataCommand {
        file_path: file_path.clone(),
        binary_output: true,
    }) {
        Response::MetadataFetched(meta) => {
            assert_eq!(meta.status, FetchStatus::Successful);
            assert_eq!(meta.byte_count, 32);
        }
        other => panic!("unexpected response: {:?}", other),
    }

    match fetch_result_range(&FetchResultRangeCommand {
        file_path,
        binary_output: true,
        byte_offset: 4,
        byte_count: 4,
        output_offset: 8,
    }) {
        Response::ResultRangeFetched(range) => assert_eq!(range.data, vec![12, 13, 14, 15]),
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_fetch_text_range_decodes_hex_dwords() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.txt");
    fs::write(&path, "header line\n0x00000001\n0x0A0B0C0D\nFFFFFFFF\n\n").unwrap();
    let file_path = path.to_string_lossy().into_owned();

    match fetch_metadata(&FetchMetadataCommand {
        file_path: file_path.clone(),
        binary_output: false,
    }) {
        Response::MetadataFetched(meta) => assert_eq!(meta.byte_count, 12),
        other => panic!("unexpected response: {:?}", other),
    }

    match fetch_result_range(&FetchResultRangeCommand {
        file_path,
        binary_output: false,
        byte_offset: 4,
        byte_count: 8,
        output_offset: 1,
    }) {
        Response::ResultRangeFetched(range) => {
            assert_eq!(range.data, vec![0x0D, 0x0C, 0x0B, 0x0A, 0xFF, 0xFF, 0xFF, 0xFF]);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_fetch_missing_file_is_not_found() {
    let response = fetch_result_range(&FetchResultRangeCommand {
        file_path: "/definitely/missing/output".into(),
        binary_output: true,
        ..FetchResultRangeCommand::default()
    });
    match response {
        Response::ResultRangeFetched(range) => {
            assert_eq!(range.status, FetchStatus::FileNotFound);
            assert!(range.data.is_empty());
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[test]
fn test_fetch_directory_is_not_found() {
    let dir = TempDir::new().unwrap();
    let file_path = dir.path().to_string_lossy().into_owned();

    match fetch_metadata(&FetchMetadataCommand {
        file_path: file_path.clone(),
        binary_output: true,
    }) {
        Response::MetadataFetched(meta) => {
            assert_eq!(meta.status, FetchStatus::FileNotFound);
            assert_eq!(meta.byte_count, 0);
        }
        other => panic!("unexpected response: {:?}", other),
    }

    match fetch_result_range(&FetchResultRangeCommand {
        file_path,
        binary_output: false,
        byte_count: 4,
        ..FetchResultRangeCommand::default()
    }) {
        Response::ResultRangeFetched(range) => {
            assert_eq!(range.status, FetchStatus::FileNotFound);
            assert!(range.data.is_empty());
        }
        other => panic!("unexpected response: {:?}", other),
    }
}
