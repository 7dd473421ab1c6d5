//! Command definitions
//!
//! Requests sent by a client. Each variant owns its payload layout through
//! [`WireRecord`]; the tag byte is written by the codec.

use std::collections::BTreeMap;

use serde::Serialize;

use super::wire::{byte_enum, WireReader, WireRecord, WireWriter};
use crate::error::Result;
use crate::transfer::{FileMetadata, PackedFile};

byte_enum! {
    /// Command tags (append-only)
    pub enum CommandType ("command type") {
        Execute = 0,
        FetchMetadata = 1,
        FetchResultRange = 2,
        Deploy = 3,
        ListEnvironmentVariables = 4,
        PutFile = 5,
        CheckOutdatedFiles = 6,
        ListFiles = 7,
        SendFile = 8,
        GetFile = 9,
        PutDirectory = 10,
        GetServerCapabilities = 11,
    }
}

/// Run a process on the agent host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecuteCommand {
    pub working_directory: String,
    pub executable: String,
    /// Single argument string, split with Windows command-line rules
    pub arguments: String,
    /// Variables set on top of the agent's own environment
    pub environment: BTreeMap<String, String>,
    pub run_as_administrator: bool,
    pub wait_for_completion: bool,
    /// 0 = no timeout
    pub execution_timeout_secs: i32,
}

impl WireRecord for ExecuteCommand {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string(&self.working_directory)?;
        writer.write_string(&self.executable)?;
        writer.write_string(&self.arguments)?;
        writer.write_string_dict(&self.environment)?;
        writer.write_bool(self.run_as_administrator);
        writer.write_bool(self.wait_for_completion);
        writer.write_i32(self.execution_timeout_secs);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            working_directory: reader.read_string()?,
            executable: reader.read_string()?,
            arguments: reader.read_string()?,
            environment: reader.read_string_dict()?,
            run_as_administrator: reader.read_bool()?,
            wait_for_completion: reader.read_bool()?,
            execution_timeout_secs: reader.read_i32()?,
        })
    }
}

/// Query the size and timestamp of a debugger output file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchMetadataCommand {
    pub file_path: String,
    pub binary_output: bool,
}

impl WireRecord for FetchMetadataCommand {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string(&self.file_path)?;
        writer.write_bool(self.binary_output);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            file_path: reader.read_string()?,
            binary_output: reader.read_bool()?,
        })
    }
}

/// Read a byte window of a debugger output file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchResultRangeCommand {
    pub file_path: String,
    pub binary_output: bool,
    pub byte_offset: i32,
    /// 0 together with a zero offset = whole file
    pub byte_count: i32,
    /// Header bytes (binary) or header lines (text) to skip
    pub output_offset: i32,
}

impl WireRecord for FetchResultRangeCommand {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string(&self.file_path)?;
        writer.write_bool(self.binary_output);
        writer.write_i32(self.byte_offset);
        writer.write_i32(self.byte_count);
        writer.write_i32(self.output_offset);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            file_path: reader.read_string()?,
            binary_output: reader.read_bool()?,
            byte_offset: reader.read_i32()?,
            byte_count: reader.read_i32()?,
            output_offset: reader.read_i32()?,
        })
    }
}

/// Unpack a zip archive into a destination directory; not answered
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployCommand {
    pub destination: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl WireRecord for DeployCommand {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string(&self.destination)?;
        writer.write_blob(&self.data)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            destination: reader.read_string()?,
            data: reader.read_blob()?,
        })
    }
}

/// Write a single file below a working directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PutFileCommand {
    #[serde(skip)]
    pub data: Vec<u8>,
    pub work_dir: String,
    pub path: String,
}

impl WireRecord for PutFileCommand {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_blob(&self.data)?;
        writer.write_string(&self.work_dir)?;
        writer.write_string(&self.path)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            data: reader.read_blob()?,
            work_dir: reader.read_string()?,
            path: reader.read_string()?,
        })
    }
}

/// Report which of the given entries differ from what is on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckOutdatedFilesCommand {
    pub dst_path: String,
    pub files: Vec<FileMetadata>,
}

impl WireRecord for CheckOutdatedFilesCommand {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string(&self.dst_path)?;
        writer.write_records(&self.files)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            dst_path: reader.read_string()?,
            files: reader.read_records()?,
        })
    }
}

/// List metadata for a file or directory tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListFilesCommand {
    pub work_dir: String,
    pub path: String,
    pub include_subdirectories: bool,
}

impl WireRecord for ListFilesCommand {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string(&self.work_dir)?;
        writer.write_string(&self.path)?;
        writer.write_bool(self.include_subdirectories);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            work_dir: reader.read_string()?,
            path: reader.read_string()?,
            include_subdirectories: reader.read_bool()?,
        })
    }
}

/// Materialize packed files below a root (unpack)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendFileCommand {
    pub root_path: String,
    pub files: Vec<PackedFile>,
    pub preserve_timestamps: bool,
}

impl WireRecord for SendFileCommand {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string(&self.root_path)?;
        writer.write_records(&self.files)?;
        writer.write_bool(self.preserve_timestamps);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            root_path: reader.read_string()?,
            files: reader.read_records()?,
            preserve_timestamps: reader.read_bool()?,
        })
    }
}

/// Read files below a root into packed records (pack)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GetFileCommand {
    pub root_path: String,
    /// Relative paths; directory markers end with `/`
    pub paths: Vec<String>,
    pub use_compression: bool,
}

impl WireRecord for GetFileCommand {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string(&self.root_path)?;
        writer.write_string_array(&self.paths)?;
        writer.write_bool(self.use_compression);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            root_path: reader.read_string()?,
            paths: reader.read_string_array()?,
            use_compression: reader.read_bool()?,
        })
    }
}

/// Extract a zip archive into `work_dir/path`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PutDirectoryCommand {
    #[serde(skip)]
    pub zip_data: Vec<u8>,
    pub work_dir: String,
    pub path: String,
    pub preserve_timestamps: bool,
}

impl WireRecord for PutDirectoryCommand {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_blob(&self.zip_data)?;
        writer.write_string(&self.work_dir)?;
        writer.write_string(&self.path)?;
        writer.write_bool(self.preserve_timestamps);
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            zip_data: reader.read_blob()?,
            work_dir: reader.read_string()?,
            path: reader.read_string()?,
            preserve_timestamps: reader.read_bool()?,
        })
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Command {
    Execute(ExecuteCommand),
    FetchMetadata(FetchMetadataCommand),
    FetchResultRange(FetchResultRangeCommand),
    Deploy(DeployCommand),
    ListEnvironmentVariables,
    PutFile(PutFileCommand),
    CheckOutdatedFiles(CheckOutdatedFilesCommand),
    ListFiles(ListFilesCommand),
    SendFile(SendFileCommand),
    GetFile(GetFileCommand),
    PutDirectory(PutDirectoryCommand),
    GetServerCapabilities,
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Execute(_) => CommandType::Execute,
            Command::FetchMetadata(_) => CommandType::FetchMetadata,
            Command::FetchResultRange(_) => CommandType::FetchResultRange,
            Command::Deploy(_) => CommandType::Deploy,
            Command::ListEnvironmentVariables => CommandType::ListEnvironmentVariables,
            Command::PutFile(_) => CommandType::PutFile,
            Command::CheckOutdatedFiles(_) => CommandType::CheckOutdatedFiles,
            Command::ListFiles(_) => CommandType::ListFiles,
            Command::SendFile(_) => CommandType::SendFile,
            Command::GetFile(_) => CommandType::GetFile,
            Command::PutDirectory(_) => CommandType::PutDirectory,
            Command::GetServerCapabilities => CommandType::GetServerCapabilities,
        }
    }

    /// Whether the server answers this command with a response
    pub fn expects_response(&self) -> bool {
        !matches!(self, Command::Deploy(_))
    }

    /// Write the variant's payload (without the tag)
    pub fn encode_payload(&self, writer: &mut WireWriter) -> Result<()> {
        match self {
            Command::Execute(c) => c.encode(writer),
            Command::FetchMetadata(c) => c.encode(writer),
            Command::FetchResultRange(c) => c.encode(writer),
            Command::Deploy(c) => c.encode(writer),
            Command::PutFile(c) => c.encode(writer),
            Command::CheckOutdatedFiles(c) => c.encode(writer),
            Command::ListFiles(c) => c.encode(writer),
            Command::SendFile(c) => c.encode(writer),
            Command::GetFile(c) => c.encode(writer),
            Command::PutDirectory(c) => c.encode(writer),
            Command::ListEnvironmentVariables | Command::GetServerCapabilities => Ok(()),
        }
    }

    /// Read the payload of a command whose tag has already been consumed
    pub fn decode_payload(kind: CommandType, reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(match kind {
            CommandType::Execute => Command::Execute(reader.read_record()?),
            CommandType::FetchMetadata => Command::FetchMetadata(reader.read_record()?),
            CommandType::FetchResultRange => Command::FetchResultRange(reader.read_record()?),
            CommandType::Deploy => Command::Deploy(reader.read_record()?),
            CommandType::ListEnvironmentVariables => Command::ListEnvironmentVariables,
            CommandType::PutFile => Command::PutFile(reader.read_record()?),
            CommandType::CheckOutdatedFiles => Command::CheckOutdatedFiles(reader.read_record()?),
            CommandType::ListFiles => Command::ListFiles(reader.read_record()?),
            CommandType::SendFile => Command::SendFile(reader.read_record()?),
            CommandType::GetFile => Command::GetFile(reader.read_record()?),
            CommandType::PutDirectory => Command::PutDirectory(reader.read_record()?),
            CommandType::GetServerCapabilities => Command::GetServerCapabilities,
        })
    }
}
