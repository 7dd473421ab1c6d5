//! File Transfer Module
//!
//! Moves files between the client and the agent host.
//!
//! ## Operations
//! - Metadata listing and staleness checks ([`list_metadata`], [`check_outdated`])
//! - Parallel pack/unpack of flat [`PackedFile`] records ([`pack_files`], [`unpack_files`])
//! - Zip extraction with a path traversal guard ([`extract_archive`])
//!
//! Paths on the wire are relative and `/`-separated; a trailing `/` marks
//! a directory.

mod archive;
mod metadata;
mod packed;

pub use archive::{archive_directory, extract_archive, ExtractError};
pub use metadata::{check_outdated, list_metadata, FileMetadata};
pub use packed::{pack_files, unpack_files, PackedFile, TransferFailure};

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use crossbeam::channel;

use crate::protocol::TransferStatus;

/// Join a `/`-separated relative path onto a root
pub(crate) fn resolve(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in relative.split('/').filter(|p| !p.is_empty() && *p != ".") {
        path.push(part);
    }
    path
}

/// Map an I/O error to the status reported for it
pub(crate) fn transfer_status(err: &io::Error) -> TransferStatus {
    match err.kind() {
        io::ErrorKind::NotFound => TransferStatus::FileOrDirectoryNotFound,
        io::ErrorKind::PermissionDenied => TransferStatus::PermissionDenied,
        _ => TransferStatus::OtherIOError,
    }
}

/// Rank used to pick the reported failure: permission > not-found > other
pub(crate) fn status_priority(status: TransferStatus) -> u8 {
    match status {
        TransferStatus::PermissionDenied => 3,
        TransferStatus::FileOrDirectoryNotFound => 2,
        TransferStatus::OtherIOError => 1,
        TransferStatus::Successful => 0,
    }
}

/// Last write time of a file or directory, at wire precision
pub(crate) fn modified_utc(path: &Path) -> io::Result<DateTime<Utc>> {
    let modified = path.metadata()?.modified()?;
    Ok(crate::protocol::wire::utc_from_system_time(modified))
}

/// Stamp a file or directory with a last write time
pub fn set_last_write_time(path: &Path, time: DateTime<Utc>) -> io::Result<()> {
    let time = SystemTime::from(time);
    open_for_times(path)?.set_modified(time)
}

#[cfg(windows)]
fn open_for_times(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    // Directory handles need backup semantics
    OpenOptions::new()
        .write(true)
        .custom_flags(winapi::um::winbase::FILE_FLAG_BACKUP_SEMANTICS)
        .open(path)
}

#[cfg(not(windows))]
fn open_for_times(path: &Path) -> io::Result<File> {
    if path.is_dir() {
        File::open(path)
    } else {
        OpenOptions::new().write(true).open(path)
    }
}

/// Run `work` over every job on a pool of `workers` scoped threads
///
/// Every job runs to completion regardless of the outcome of its siblings.
/// Results come back in job order.
pub(crate) fn run_parallel<T, R, F>(jobs: Vec<T>, workers: usize, work: F) -> io::Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = jobs.len();
    let workers = workers.clamp(1, total.max(1));
    let (job_tx, job_rx) = channel::bounded::<(usize, T)>(workers * 2);
    let (result_tx, result_rx) = channel::unbounded::<(usize, R)>();

    crossbeam::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let work = &work;
            scope.spawn(move |_| {
                for (index, job) in job_rx.iter() {
                    if result_tx.send((index, work(job))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        for job in jobs.into_iter().enumerate() {
            if job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);
    })
    .map_err(|_| io::Error::new(io::ErrorKind::Other, "transfer worker panicked"))?;

    drop(result_tx);
    let mut results: Vec<(usize, R)> = result_rx.try_iter().collect();
    if results.len() != total {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("transfer finished {} of {} jobs", results.len(), total),
        ));
    }
    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, result)| result).collect())
}
