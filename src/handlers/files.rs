//! File transfer handlers

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::protocol::{
    CheckOutdatedFilesCommand, DeployCommand, GetFileCommand, GetFilesResponse, ListFilesCommand,
    ListFilesResponse, PutDirectoryCommand, PutDirectoryResponse, PutDirectoryStatus,
    PutFileCommand, PutFileResponse, Response, SendFileCommand, TransferStatus,
};
use crate::transfer::{
    check_outdated, extract_archive, list_metadata, pack_files, transfer_status, unpack_files,
    ExtractError,
};

/// `work_dir` joined with `path`; an absolute `path` replaces `work_dir`
fn target_path(work_dir: &str, path: &str) -> PathBuf {
    Path::new(work_dir).join(path)
}

/// Write one blob, creating missing parent directories
pub fn put_file(command: &PutFileCommand) -> Response {
    let target = target_path(&command.work_dir, &command.path);
    let result = (|| -> io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &command.data)
    })();

    Response::PutFile(match result {
        Ok(()) => {
            debug!(path = %target.display(), bytes = command.data.len(), "File written");
            PutFileResponse {
                status: TransferStatus::Successful,
                error_message: String::new(),
            }
        }
        Err(e) => {
            warn!(path = %target.display(), error = %e, "Failed to write file");
            PutFileResponse {
                status: transfer_status(&e),
                error_message: format!("{}: {}", target.display(), e),
            }
        }
    })
}

/// Breadth-first listing of `work_dir/path`
pub fn list_files(command: &ListFilesCommand) -> Response {
    let root = target_path(&command.work_dir, &command.path);
    let files = list_metadata(&root, command.include_subdirectories).unwrap_or_else(|e| {
        warn!(path = %root.display(), error = %e, "Failed to list files");
        Vec::new()
    });
    Response::ListFiles(ListFilesResponse { files })
}

/// Entries of the reference listing that are stale on this host
pub fn check_outdated_files(command: &CheckOutdatedFilesCommand) -> Response {
    let files = check_outdated(Path::new(&command.dst_path), &command.files);
    debug!(
        checked = command.files.len(),
        outdated = files.len(),
        "Checked for outdated files"
    );
    Response::ListFiles(ListFilesResponse { files })
}

/// Unpack records below the root
pub fn send_file(command: &SendFileCommand, workers: usize) -> Response {
    let root = Path::new(&command.root_path);
    Response::PutFile(
        match unpack_files(root, &command.files, command.preserve_timestamps, workers) {
            Ok(()) => PutFileResponse {
                status: TransferStatus::Successful,
                error_message: String::new(),
            },
            Err(failure) => {
                warn!(root = %root.display(), path = %failure.path, error = %failure.message, "Unpack failed");
                PutFileResponse {
                    status: failure.status,
                    error_message: failure.message,
                }
            }
        },
    )
}

/// Pack files below the root, compressing the response when asked
pub fn get_file(command: &GetFileCommand, workers: usize) -> Response {
    let root = Path::new(&command.root_path);
    let response = Response::GetFiles(match pack_files(root, &command.paths, workers) {
        Ok(files) => GetFilesResponse {
            status: TransferStatus::Successful,
            error_message: String::new(),
            files,
        },
        Err(failure) => {
            warn!(root = %root.display(), path = %failure.path, error = %failure.message, "Pack failed");
            GetFilesResponse {
                status: failure.status,
                error_message: failure.message,
                files: Vec::new(),
            }
        }
    });

    if !command.use_compression {
        return response;
    }
    match response.compressed() {
        Ok(compressed) => compressed,
        Err(e) => {
            warn!(error = %e, "Compression failed, sending uncompressed");
            response
        }
    }
}

/// Extract a zip archive into `work_dir/path`
pub fn put_directory(command: &PutDirectoryCommand) -> Response {
    let target = target_path(&command.work_dir, &command.path);
    if target.is_file() {
        return Response::PutDirectory(PutDirectoryResponse {
            status: PutDirectoryStatus::TargetPathIsFile,
            error_message: format!("{} is a file", target.display()),
        });
    }

    let result = extract_archive(&command.zip_data, &target, command.preserve_timestamps);
    Response::PutDirectory(match result {
        Ok(entries) => {
            debug!(path = %target.display(), entries, "Directory extracted");
            PutDirectoryResponse {
                status: PutDirectoryStatus::Successful,
                error_message: String::new(),
            }
        }
        Err(e) => {
            warn!(path = %target.display(), error = %e, "Failed to extract directory");
            PutDirectoryResponse {
                status: put_directory_status(&e),
                error_message: e.to_string(),
            }
        }
    })
}

fn put_directory_status(err: &ExtractError) -> PutDirectoryStatus {
    match err {
        ExtractError::PathOutsideTarget(_) => PutDirectoryStatus::ArchiveContainsPathOutsideTarget,
        ExtractError::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            PutDirectoryStatus::PermissionDenied
        }
        ExtractError::Io(_) | ExtractError::Archive(_) => PutDirectoryStatus::OtherIOError,
    }
}

/// Unpack a deployment archive; failures are only logged
pub fn deploy(command: &DeployCommand) {
    let destination = Path::new(&command.destination);
    match extract_archive(&command.data, destination, true) {
        Ok(entries) => info!(destination = %destination.display(), entries, "Deployed archive"),
        Err(e) => warn!(destination = %destination.display(), error = %e, "Deploy failed"),
    }
}
