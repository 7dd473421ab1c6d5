//! Zip based directory transfer

use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use thiserror::Error;
use tracing::debug;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{list_metadata, set_last_write_time};

/// Why an archive could not be extracted
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Archive entry '{0}' points outside the target directory")]
    PathOutsideTarget(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Archive(String),
}

impl From<ZipError> for ExtractError {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => ExtractError::Io(e),
            other => ExtractError::Archive(other.to_string()),
        }
    }
}

struct Entry {
    index: usize,
    target: PathBuf,
    is_dir: bool,
    modified: Option<DateTime<Utc>>,
}

/// Extract a zip archive into `destination`
///
/// Every entry is checked before anything is written: an entry whose
/// resolved path is not below the absolute destination rejects the whole
/// archive. Returns the number of entries extracted.
pub fn extract_archive(
    data: &[u8],
    destination: &Path,
    preserve_timestamps: bool,
) -> std::result::Result<usize, ExtractError> {
    fs::create_dir_all(destination)?;
    let root = fs::canonicalize(destination)?;
    let mut archive = ZipArchive::new(Cursor::new(data))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        let name = file.name().replace('\\', "/");
        let target = contained_path(&root, &name)
            .ok_or_else(|| ExtractError::PathOutsideTarget(name.clone()))?;
        entries.push(Entry {
            index,
            target,
            is_dir: file.is_dir() || name.ends_with('/'),
            modified: zip_time_to_utc(file.last_modified()),
        });
    }

    for entry in &entries {
        if entry.is_dir {
            fs::create_dir_all(&entry.target)?;
            continue;
        }
        if let Some(parent) = entry.target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = archive.by_index(entry.index)?;
        let mut out = fs::File::create(&entry.target)?;
        io::copy(&mut file, &mut out)?;
        drop(out);
        if preserve_timestamps {
            if let Some(modified) = entry.modified {
                set_last_write_time(&entry.target, modified)?;
            }
        }
    }

    if preserve_timestamps {
        let mut dirs: Vec<&Entry> = entries.iter().filter(|e| e.is_dir).collect();
        dirs.sort_by_key(|e| std::cmp::Reverse(e.target.components().count()));
        for dir in dirs {
            if let Some(modified) = dir.modified {
                set_last_write_time(&dir.target, modified)?;
            }
        }
    }

    debug!(destination = %root.display(), entries = entries.len(), "Extracted archive");
    Ok(entries.len())
}

/// Resolve `name` below `root` lexically; None if it escapes
fn contained_path(root: &Path, name: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                path.pop();
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if path.starts_with(root) {
        Some(path)
    } else {
        None
    }
}

fn zip_time_to_utc(time: zip::DateTime) -> Option<DateTime<Utc>> {
    let naive = NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?
    .and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )?;
    Some(Utc.from_utc_datetime(&naive))
}

fn utc_to_zip_time(time: DateTime<Utc>) -> Option<zip::DateTime> {
    zip::DateTime::from_date_and_time(
        u16::try_from(time.year()).ok()?,
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
    )
    .ok()
}

/// Zip the contents of `root`, keeping last write times
pub fn archive_directory(root: &Path) -> crate::error::Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let base = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in list_metadata(root, true)? {
        if entry.relative_path == "./" || entry.relative_path == "." {
            continue;
        }
        let options = match utc_to_zip_time(entry.last_write_time_utc) {
            Some(time) => base.last_modified_time(time),
            None => base,
        };
        if entry.is_directory() {
            writer.add_directory(entry.relative_path.as_str(), options)?;
        } else {
            let mut contents = Vec::with_capacity(entry.size.max(0) as usize);
            fs::File::open(super::resolve(root, &entry.relative_path))?.read_to_end(&mut contents)?;
            writer.start_file(entry.relative_path.as_str(), options)?;
            writer.write_all(&contents)?;
        }
    }

    Ok(writer.finish()?.into_inner())
}
