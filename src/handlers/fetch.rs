//! Debugger output fetching
//!
//! Output files come in two forms:
//! - binary: raw bytes, optionally preceded by `output_offset` header bytes
//! - text: one header line, then one hex dword per line (`0x` optional)

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::protocol::wire::{utc_from_system_time, zero_timestamp};
use crate::protocol::{
    FetchMetadataCommand, FetchResultRangeCommand, FetchStatus, MetadataFetchedResponse,
    Response, ResultRangeFetchedResponse,
};

/// Last write time of the regular file at `path`; anything else is not found
fn last_write_time(path: &Path) -> io::Result<DateTime<Utc>> {
    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "not a regular file"));
    }
    Ok(utc_from_system_time(meta.modified()?))
}

/// Size of the output in bytes and its last write time
pub fn fetch_metadata(command: &FetchMetadataCommand) -> Response {
    let path = Path::new(&command.file_path);
    let result = last_write_time(path).and_then(|timestamp| {
        let byte_count = if command.binary_output {
            fs::metadata(path)?.len()
        } else {
            text_byte_count(path)?
        };
        Ok((timestamp, byte_count))
    });

    Response::MetadataFetched(match result {
        Ok((timestamp, byte_count)) => MetadataFetchedResponse {
            status: FetchStatus::Successful,
            byte_count: i32::try_from(byte_count).unwrap_or(i32::MAX),
            timestamp,
        },
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to read output metadata");
            }
            MetadataFetchedResponse {
                status: FetchStatus::FileNotFound,
                byte_count: 0,
                timestamp: zero_timestamp(),
            }
        }
    })
}

/// A byte window of the output
pub fn fetch_result_range(command: &FetchResultRangeCommand) -> Response {
    let path = Path::new(&command.file_path);
    let result = last_write_time(path).and_then(|timestamp| {
        let data = if command.binary_output {
            read_binary_range(path, command)?
        } else {
            read_text_range(path, command)?
        };
        Ok((timestamp, data))
    });

    Response::ResultRangeFetched(match result {
        Ok((timestamp, data)) => ResultRangeFetchedResponse {
            status: FetchStatus::Successful,
            data,
            timestamp,
        },
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to read output range");
            }
            ResultRangeFetchedResponse {
                status: FetchStatus::FileNotFound,
                data: Vec::new(),
                timestamp: zero_timestamp(),
            }
        }
    })
}

/// Dword count of a text output times four, excluding the header line
fn text_byte_count(path: &Path) -> io::Result<u64> {
    let mut lines = 0u64;
    for line in BufReader::new(File::open(path)?).lines() {
        if !line?.trim().is_empty() {
            lines += 1;
        }
    }
    Ok(lines.saturating_sub(1) * 4)
}

fn read_binary_range(path: &Path, command: &FetchResultRangeCommand) -> io::Result<Vec<u8>> {
    if command.byte_offset == 0 && command.byte_count == 0 {
        return fs::read(path);
    }
    let start = non_negative(command.byte_offset)? + non_negative(command.output_offset)?;
    let count = non_negative(command.byte_count)?;

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut data = Vec::with_capacity(count as usize);
    file.take(count).read_to_end(&mut data)?;
    Ok(data)
}

fn read_text_range(path: &Path, command: &FetchResultRangeCommand) -> io::Result<Vec<u8>> {
    let offset = non_negative(command.byte_offset)?;
    let count = non_negative(command.byte_count)?;
    // Dwords are the unit: the window starts on a dword boundary
    let first = offset / 4;
    let end = (offset + count + 3) / 4;

    let mut data = Vec::new();
    let mut lines = BufReader::new(File::open(path)?).lines();
    for _ in 0..command.output_offset.max(0) {
        if lines.next().transpose()?.is_none() {
            return Ok(data);
        }
    }

    let mut index = 0u64;
    while index < end {
        let Some(line) = lines.next().transpose()? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if index >= first {
            let digits = line.trim_start_matches("0x").trim_start_matches("0X");
            if let Ok(value) = u32::from_str_radix(digits, 16) {
                data.extend_from_slice(&value.to_le_bytes());
            }
        }
        index += 1;
    }
    Ok(data)
}

fn non_negative(value: i32) -> io::Result<u64> {
    u64::try_from(value).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("negative offset or count: {}", value))
    })
}
