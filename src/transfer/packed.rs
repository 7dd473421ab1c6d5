//! Packed file records and parallel pack/unpack

use std::fs;
use std::io;
use std::path::{Component, Path};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::{modified_utc, resolve, run_parallel, set_last_write_time, status_priority, transfer_status};
use crate::error::Result;
use crate::protocol::{TransferStatus, WireReader, WireRecord, WireWriter};

/// Delay before the single retry of a busy file
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(100);

/// File contents with their relative path and last write time
///
/// Directories are zero-length entries whose path ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackedFile {
    #[serde(skip)]
    pub data: Vec<u8>,
    pub relative_path: String,
    pub last_write_time_utc: DateTime<Utc>,
}

impl PackedFile {
    pub fn new(data: Vec<u8>, relative_path: impl Into<String>, last_write_time_utc: DateTime<Utc>) -> Self {
        Self {
            data,
            relative_path: relative_path.into(),
            last_write_time_utc,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.relative_path.ends_with('/')
    }
}

impl WireRecord for PackedFile {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_blob(&self.data)?;
        writer.write_string(&self.relative_path)?;
        writer.write_timestamp(&self.last_write_time_utc)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            data: reader.read_blob()?,
            relative_path: reader.read_string()?,
            last_write_time_utc: reader.read_timestamp()?,
        })
    }
}

/// The failure reported for a bulk transfer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransferFailure {
    pub status: TransferStatus,
    /// Relative path of the entry that failed
    pub path: String,
    pub message: String,
}

impl TransferFailure {
    fn from_io(path: &str, full_path: &Path, err: &io::Error) -> Self {
        Self {
            status: transfer_status(err),
            path: path.to_string(),
            message: format!("{}: {}", full_path.display(), err),
        }
    }

    fn other(path: &str, message: impl Into<String>) -> Self {
        Self {
            status: TransferStatus::OtherIOError,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

/// Pick the failure to report: highest priority, earliest job on ties
fn first_failure<T>(outcomes: Vec<std::result::Result<T, TransferFailure>>) -> std::result::Result<Vec<T>, TransferFailure> {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut failure: Option<TransferFailure> = None;
    for outcome in outcomes {
        match outcome {
            Ok(value) => values.push(value),
            Err(err) => {
                let replace = failure
                    .as_ref()
                    .map_or(true, |f| status_priority(err.status) > status_priority(f.status));
                if replace {
                    failure = Some(err);
                }
            }
        }
    }
    match failure {
        Some(failure) => Err(failure),
        None => Ok(values),
    }
}

// =============================================================================
// Pack
// =============================================================================

/// Read every path below `root` into a packed record, in parallel
///
/// Paths ending with `/` must name directories and produce empty records.
/// All paths are attempted; the reported failure follows the priority
/// permission > not found > other.
pub fn pack_files(root: &Path, paths: &[String], workers: usize) -> std::result::Result<Vec<PackedFile>, TransferFailure> {
    debug!(root = %root.display(), count = paths.len(), workers, "Packing files");

    let outcomes = run_parallel(paths.to_vec(), workers, |path| pack_one(root, path))
        .map_err(|e| TransferFailure::other("", e.to_string()))?;
    first_failure(outcomes)
}

fn pack_one(root: &Path, path: String) -> std::result::Result<PackedFile, TransferFailure> {
    let full_path = resolve(root, &path);
    let fail = |e: io::Error| TransferFailure::from_io(&path, &full_path, &e);

    if path.ends_with('/') {
        let meta = fs::metadata(&full_path).map_err(fail)?;
        if !meta.is_dir() {
            return Err(fail(io::Error::new(
                io::ErrorKind::NotFound,
                "directory not found",
            )));
        }
        let modified = modified_utc(&full_path).map_err(fail)?;
        Ok(PackedFile::new(Vec::new(), path, modified))
    } else {
        let data = fs::read(&full_path).map_err(fail)?;
        let modified = modified_utc(&full_path).map_err(fail)?;
        Ok(PackedFile::new(data, path, modified))
    }
}

// =============================================================================
// Unpack
// =============================================================================

/// Materialize packed records below `root`, in parallel
///
/// Missing parent directories are created. With `preserve_timestamps`
/// every entry is stamped with its transferred time; directories are
/// stamped last, deepest first, so writing their contents does not move
/// the time again. A busy file is retried once after a short delay.
pub fn unpack_files(
    root: &Path,
    files: &[PackedFile],
    preserve_timestamps: bool,
    workers: usize,
) -> std::result::Result<(), TransferFailure> {
    debug!(root = %root.display(), count = files.len(), workers, "Unpacking files");

    fs::create_dir_all(root).map_err(|e| TransferFailure::from_io("", root, &e))?;

    let outcomes = run_parallel(files.iter().collect(), workers, |file| {
        unpack_one(root, file, preserve_timestamps)
    })
    .map_err(|e| TransferFailure::other("", e.to_string()))?;
    first_failure(outcomes)?;

    if preserve_timestamps {
        let mut dirs: Vec<&PackedFile> = files.iter().filter(|f| f.is_directory()).collect();
        dirs.sort_by_key(|f| std::cmp::Reverse(f.relative_path.matches('/').count()));
        for dir in dirs {
            let full_path = resolve(root, &dir.relative_path);
            set_last_write_time(&full_path, dir.last_write_time_utc)
                .map_err(|e| TransferFailure::from_io(&dir.relative_path, &full_path, &e))?;
        }
    }
    Ok(())
}

fn unpack_one(root: &Path, file: &PackedFile, preserve_timestamps: bool) -> std::result::Result<(), TransferFailure> {
    if escapes_root(&file.relative_path) {
        return Err(TransferFailure::other(
            &file.relative_path,
            format!("{} points outside the target directory", file.relative_path),
        ));
    }
    let full_path = resolve(root, &file.relative_path);

    let write = || -> io::Result<()> {
        if file.is_directory() {
            return fs::create_dir_all(&full_path);
        }
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full_path, &file.data)?;
        if preserve_timestamps {
            set_last_write_time(&full_path, file.last_write_time_utc)?;
        }
        Ok(())
    };

    with_busy_retry(&full_path, write)
        .map_err(|e| TransferFailure::from_io(&file.relative_path, &full_path, &e))
}

/// Run `op`, retrying it once after [`BUSY_RETRY_DELAY`] if the file is busy
fn with_busy_retry(path: &Path, mut op: impl FnMut() -> io::Result<()>) -> io::Result<()> {
    match op() {
        Err(e) if is_busy(&e) => {
            warn!(path = %path.display(), error = %e, "File busy, retrying once");
            thread::sleep(BUSY_RETRY_DELAY);
            op()
        }
        other => other,
    }
}

/// Whether a relative path climbs above its root
fn escapes_root(relative: &str) -> bool {
    let path = Path::new(relative);
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return true,
            },
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}

/// Errors a process holding the file open can cause
#[cfg(unix)]
fn is_busy(err: &io::Error) -> bool {
    use nix::errno::Errno;
    matches!(err.raw_os_error(), Some(code) if code == Errno::EBUSY as i32 || code == Errno::ETXTBSY as i32)
}

#[cfg(windows)]
fn is_busy(err: &io::Error) -> bool {
    use winapi::shared::winerror::{ERROR_LOCK_VIOLATION, ERROR_SHARING_VIOLATION};
    matches!(err.raw_os_error(), Some(code) if code as u32 == ERROR_SHARING_VIOLATION || code as u32 == ERROR_LOCK_VIOLATION)
}

#[cfg(not(any(unix, windows)))]
fn is_busy(_err: &io::Error) -> bool {
    false
}
