//! Response definitions
//!
//! Replies sent by the server, one per answered command.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::capabilities::CapabilityInfo;
use super::codec;
use super::wire::{byte_enum, WireReader, WireRecord, WireWriter};
use crate::error::Result;
use crate::process::ProcessTreeItem;
use crate::transfer::{FileMetadata, PackedFile};

byte_enum! {
    /// Response tags (append-only)
    pub enum ResponseType ("response type") {
        ExecutionCompleted = 0,
        MetadataFetched = 1,
        ResultRangeFetched = 2,
        EnvironmentVariablesListed = 3,
        PutFile = 4,
        PutDirectory = 5,
        ListFiles = 6,
        GetFiles = 7,
        GetServerCapabilities = 8,
        ExecutionTimedOut = 9,
        ExecutionTerminated = 10,
        Compressed = 0xFF,
    }
}

// =============================================================================
// Status codes
// =============================================================================

byte_enum! {
    pub enum ExecutionStatus ("execution status") {
        Completed = 0,
        TimedOut = 1,
        CouldNotLaunch = 2,
    }
}

byte_enum! {
    pub enum FetchStatus ("fetch status") {
        Successful = 0,
        FileNotFound = 1,
    }
}

byte_enum! {
    pub enum TransferStatus ("transfer status") {
        Successful = 0,
        FileOrDirectoryNotFound = 1,
        PermissionDenied = 2,
        OtherIOError = 3,
    }
}

byte_enum! {
    pub enum PutDirectoryStatus ("put directory status") {
        Successful = 0,
        TargetPathIsFile = 1,
        ArchiveContainsPathOutsideTarget = 2,
        PermissionDenied = 3,
        OtherIOError = 4,
    }
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionCompletedResponse {
    pub status: ExecutionStatus,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: i64,
}

impl ExecutionCompletedResponse {
    /// Reply for a process that could not be started
    pub fn could_not_launch(stderr: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::CouldNotLaunch,
            exit_code: -1,
            stdout: String::new(),
            stderr: stderr.into(),
            execution_time_ms: 0,
        }
    }
}

impl WireRecord for ExecutionCompletedResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_u8(self.status.as_byte());
        writer.write_i32(self.exit_code);
        writer.write_string(&self.stdout)?;
        writer.write_string(&self.stderr)?;
        writer.write_i64(self.execution_time_ms);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            status: ExecutionStatus::from_byte(reader.read_u8()?)?,
            exit_code: reader.read_i32()?,
            stdout: reader.read_string()?,
            stderr: reader.read_string()?,
            execution_time_ms: reader.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataFetchedResponse {
    pub status: FetchStatus,
    pub byte_count: i32,
    pub timestamp: DateTime<Utc>,
}

impl WireRecord for MetadataFetchedResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_u8(self.status.as_byte());
        writer.write_i32(self.byte_count);
        writer.write_timestamp(&self.timestamp)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            status: FetchStatus::from_byte(reader.read_u8()?)?,
            byte_count: reader.read_i32()?,
            timestamp: reader.read_timestamp()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRangeFetchedResponse {
    pub status: FetchStatus,
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl WireRecord for ResultRangeFetchedResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_u8(self.status.as_byte());
        writer.write_blob(&self.data)?;
        writer.write_timestamp(&self.timestamp)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            status: FetchStatus::from_byte(reader.read_u8()?)?,
            data: reader.read_blob()?,
            timestamp: reader.read_timestamp()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentVariablesListedResponse {
    pub variables: BTreeMap<String, String>,
}

impl WireRecord for EnvironmentVariablesListedResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string_dict(&self.variables)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            variables: reader.read_string_dict()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutFileResponse {
    pub status: TransferStatus,
    pub error_message: String,
}

impl WireRecord for PutFileResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_u8(self.status.as_byte());
        writer.write_string(&self.error_message)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            status: TransferStatus::from_byte(reader.read_u8()?)?,
            error_message: reader.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutDirectoryResponse {
    pub status: PutDirectoryStatus,
    pub error_message: String,
}

impl WireRecord for PutDirectoryResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_u8(self.status.as_byte());
        writer.write_string(&self.error_message)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            status: PutDirectoryStatus::from_byte(reader.read_u8()?)?,
            error_message: reader.read_string()?,
        })
    }
}

/// Answers both ListFiles and CheckOutdatedFiles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileMetadata>,
}

impl WireRecord for ListFilesResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_records(&self.files)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            files: reader.read_records()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GetFilesResponse {
    pub status: TransferStatus,
    pub error_message: String,
    pub files: Vec<PackedFile>,
}

impl WireRecord for GetFilesResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_u8(self.status.as_byte());
        writer.write_string(&self.error_message)?;
        writer.write_records(&self.files)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            status: TransferStatus::from_byte(reader.read_u8()?)?,
            error_message: reader.read_string()?,
            files: reader.read_records()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionTimedOutResponse {
    /// Processes killed after the timeout, root first
    pub process_tree: Vec<ProcessTreeItem>,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: i64,
}

impl WireRecord for ExecutionTimedOutResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_records(&self.process_tree)?;
        writer.write_string(&self.stdout)?;
        writer.write_string(&self.stderr)?;
        writer.write_i64(self.execution_time_ms);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            process_tree: reader.read_records()?,
            stdout: reader.read_string()?,
            stderr: reader.read_string()?,
            execution_time_ms: reader.read_i64()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionTerminatedResponse {
    pub terminated_process_tree: Vec<ProcessTreeItem>,
}

impl WireRecord for ExecutionTerminatedResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_records(&self.terminated_process_tree)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            terminated_process_tree: reader.read_records()?,
        })
    }
}

/// A response serialized (tag + payload) and run through raw deflate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressedResponse {
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl CompressedResponse {
    /// Serialize and compress `inner`
    pub fn wrap(inner: &Response) -> Result<Self> {
        let body = codec::encode_response_body(inner)?;
        Ok(Self {
            data: codec::deflate(&body)?,
        })
    }

    /// Decompress and decode the wrapped response (one level)
    ///
    /// `max_size` bounds the inflated body so a small envelope cannot
    /// expand without limit.
    pub fn unwrap_inner(&self, max_size: usize) -> Result<Response> {
        let body = codec::inflate(&self.data, max_size)?;
        codec::decode_response_body(&body)
    }
}

impl WireRecord for CompressedResponse {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_blob(&self.data)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            data: reader.read_blob()?,
        })
    }
}

// =============================================================================
// Response
// =============================================================================

/// A response to send to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Response {
    ExecutionCompleted(ExecutionCompletedResponse),
    MetadataFetched(MetadataFetchedResponse),
    ResultRangeFetched(ResultRangeFetchedResponse),
    EnvironmentVariablesListed(EnvironmentVariablesListedResponse),
    PutFile(PutFileResponse),
    PutDirectory(PutDirectoryResponse),
    ListFiles(ListFilesResponse),
    GetFiles(GetFilesResponse),
    GetServerCapabilities(CapabilityInfo),
    ExecutionTimedOut(ExecutionTimedOutResponse),
    ExecutionTerminated(ExecutionTerminatedResponse),
    Compressed(CompressedResponse),
}

impl Response {
    /// Get the response type
    pub fn response_type(&self) -> ResponseType {
        match self {
            Response::ExecutionCompleted(_) => ResponseType::ExecutionCompleted,
            Response::MetadataFetched(_) => ResponseType::MetadataFetched,
            Response::ResultRangeFetched(_) => ResponseType::ResultRangeFetched,
            Response::EnvironmentVariablesListed(_) => ResponseType::EnvironmentVariablesListed,
            Response::PutFile(_) => ResponseType::PutFile,
            Response::PutDirectory(_) => ResponseType::PutDirectory,
            Response::ListFiles(_) => ResponseType::ListFiles,
            Response::GetFiles(_) => ResponseType::GetFiles,
            Response::GetServerCapabilities(_) => ResponseType::GetServerCapabilities,
            Response::ExecutionTimedOut(_) => ResponseType::ExecutionTimedOut,
            Response::ExecutionTerminated(_) => ResponseType::ExecutionTerminated,
            Response::Compressed(_) => ResponseType::Compressed,
        }
    }

    /// Wrap this response in a compressed envelope
    pub fn compressed(&self) -> Result<Response> {
        Ok(Response::Compressed(CompressedResponse::wrap(self)?))
    }

    /// Strip every compression layer, returning the innermost response
    pub fn into_uncompressed(self, max_size: usize) -> Result<Response> {
        let mut response = self;
        while let Response::Compressed(envelope) = response {
            response = envelope.unwrap_inner(max_size)?;
        }
        Ok(response)
    }

    /// Write the variant's payload (without the tag)
    pub fn encode_payload(&self, writer: &mut WireWriter) -> Result<()> {
        match self {
            Response::ExecutionCompleted(r) => r.encode(writer),
            Response::MetadataFetched(r) => r.encode(writer),
            Response::ResultRangeFetched(r) => r.encode(writer),
            Response::EnvironmentVariablesListed(r) => r.encode(writer),
            Response::PutFile(r) => r.encode(writer),
            Response::PutDirectory(r) => r.encode(writer),
            Response::ListFiles(r) => r.encode(writer),
            Response::GetFiles(r) => r.encode(writer),
            Response::GetServerCapabilities(r) => r.encode(writer),
            Response::ExecutionTimedOut(r) => r.encode(writer),
            Response::ExecutionTerminated(r) => r.encode(writer),
            Response::Compressed(r) => r.encode(writer),
        }
    }

    /// Read the payload of a response whose tag has already been consumed
    pub fn decode_payload(kind: ResponseType, reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(match kind {
            ResponseType::ExecutionCompleted => Response::ExecutionCompleted(reader.read_record()?),
            ResponseType::MetadataFetched => Response::MetadataFetched(reader.read_record()?),
            ResponseType::ResultRangeFetched => Response::ResultRangeFetched(reader.read_record()?),
            ResponseType::EnvironmentVariablesListed => {
                Response::EnvironmentVariablesListed(reader.read_record()?)
            }
            ResponseType::PutFile => Response::PutFile(reader.read_record()?),
            ResponseType::PutDirectory => Response::PutDirectory(reader.read_record()?),
            ResponseType::ListFiles => Response::ListFiles(reader.read_record()?),
            ResponseType::GetFiles => Response::GetFiles(reader.read_record()?),
            ResponseType::GetServerCapabilities => {
                Response::GetServerCapabilities(reader.read_record()?)
            }
            ResponseType::ExecutionTimedOut => Response::ExecutionTimedOut(reader.read_record()?),
            ResponseType::ExecutionTerminated => {
                Response::ExecutionTerminated(reader.read_record()?)
            }
            ResponseType::Compressed => Response::Compressed(reader.read_record()?),
        })
    }
}
