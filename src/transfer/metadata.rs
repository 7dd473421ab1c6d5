//! File metadata listing and staleness checks

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use super::{modified_utc, resolve};
use crate::error::Result;
use crate::protocol::{WireReader, WireRecord, WireWriter};

/// Path, size and last write time of one file or directory
///
/// Equality is structural, so two listings can be compared entry by entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileMetadata {
    /// `/`-separated path relative to the listing root; directories end with `/`
    pub relative_path: String,
    pub size: i64,
    pub last_write_time_utc: DateTime<Utc>,
}

impl FileMetadata {
    pub fn new(relative_path: impl Into<String>, size: i64, last_write_time_utc: DateTime<Utc>) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
            last_write_time_utc,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.relative_path.ends_with('/')
    }
}

impl WireRecord for FileMetadata {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string(&self.relative_path)?;
        writer.write_i64(self.size);
        writer.write_timestamp(&self.last_write_time_utc)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            relative_path: reader.read_string()?,
            size: reader.read_i64()?,
            last_write_time_utc: reader.read_timestamp()?,
        })
    }
}

/// List `root` and, breadth first, everything below it
///
/// A directory root is reported as `./`, a file root as `.`. Entries of
/// each directory are sorted by name. Without `include_subdirectories`
/// only the direct files of the root are listed. A missing root yields
/// an empty listing; entries that cannot be read (dangling links,
/// unreadable directories) are skipped.
pub fn list_metadata(root: &Path, include_subdirectories: bool) -> io::Result<Vec<FileMetadata>> {
    let root_meta = match fs::metadata(root) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    if !root_meta.is_dir() {
        return Ok(vec![FileMetadata::new(
            ".",
            root_meta.len() as i64,
            modified_utc(root)?,
        )]);
    }

    let max_depth = if include_subdirectories { usize::MAX } else { 1 };
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(true)
        .sort_by_file_name();

    let mut entries: Vec<(usize, FileMetadata)> = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        match describe(root, &entry, include_subdirectories) {
            Ok(Some(file)) => entries.push((entry.depth(), file)),
            Ok(None) => {}
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Skipping unreadable entry"),
        }
    }

    // The sorted depth-first walk, restricted to one depth, is already in
    // breadth-first order; a stable sort by depth yields the full listing
    entries.sort_by_key(|(depth, _)| *depth);

    let mut files = Vec::with_capacity(entries.len() + 1);
    files.push(FileMetadata::new("./", 0, modified_utc(root)?));
    files.extend(entries.into_iter().map(|(_, file)| file));
    Ok(files)
}

fn describe(root: &Path, entry: &DirEntry, include_subdirectories: bool) -> io::Result<Option<FileMetadata>> {
    let meta = entry.metadata().map_err(io::Error::from)?;
    let relative = relative_path(root, entry.path());
    if meta.is_dir() {
        if !include_subdirectories {
            return Ok(None);
        }
        return Ok(Some(FileMetadata::new(
            format!("{}/", relative),
            0,
            modified_utc(entry.path())?,
        )));
    }
    Ok(Some(FileMetadata::new(
        relative,
        meta.len() as i64,
        modified_utc(entry.path())?,
    )))
}

/// `/`-separated form of `path` below `root`
fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Entries of `reference` that are missing below `root` or differ from disk
///
/// Files differ by size or timestamp, directories by timestamp only.
pub fn check_outdated(root: &Path, reference: &[FileMetadata]) -> Vec<FileMetadata> {
    reference
        .iter()
        .filter(|entry| is_outdated(root, entry))
        .cloned()
        .collect()
}

fn is_outdated(root: &Path, entry: &FileMetadata) -> bool {
    let path = resolve(root, &entry.relative_path);
    let meta = match fs::metadata(&path) {
        Ok(meta) => meta,
        Err(_) => return true,
    };
    if entry.is_directory() != meta.is_dir() {
        return true;
    }
    if !entry.is_directory() && meta.len() as i64 != entry.size {
        return true;
    }
    match modified_utc(&path) {
        Ok(modified) => modified != entry.last_write_time_utc,
        Err(_) => true,
    }
}
