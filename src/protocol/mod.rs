//! Protocol Module
//!
//! Defines the wire protocol spoken between a debugger client and the agent.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Len (4)  │ Tag (1)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//! `Len` is a little-endian u32 counting tag + payload. `Len == 0` is a
//! ping, answered with another zero-length frame.
//!
//! ### Commands
//! - 0: Execute                  - 7: ListFiles
//! - 1: FetchMetadata            - 8: SendFile (unpack)
//! - 2: FetchResultRange         - 9: GetFile (pack)
//! - 3: Deploy (no response)     - 10: PutDirectory
//! - 4: ListEnvironmentVariables - 11: GetServerCapabilities
//! - 5: PutFile
//! - 6: CheckOutdatedFiles
//!
//! ### Responses
//! - 0: ExecutionCompleted         - 6: ListFiles
//! - 1: MetadataFetched            - 7: GetFiles
//! - 2: ResultRangeFetched         - 8: GetServerCapabilities
//! - 3: EnvironmentVariablesListed - 9: ExecutionTimedOut
//! - 4: PutFile                    - 10: ExecutionTerminated
//! - 5: PutDirectory               - 0xFF: Compressed
//!
//! Tag values are append-only. Payload layouts live next to each variant.

mod capabilities;
mod codec;
mod command;
mod response;
pub mod wire;

pub use capabilities::{CapabilityInfo, ServerCapability, ServerPlatform};
pub use codec::{
    decode_command, decode_command_body, decode_response, decode_response_body, deflate,
    encode_command, encode_command_body, encode_response, encode_response_body, inflate,
    read_command, read_frame, read_response, write_command, write_ping, write_response,
    ReadOutcome, LENGTH_PREFIX_SIZE,
};
pub use command::{
    CheckOutdatedFilesCommand, Command, CommandType, DeployCommand, ExecuteCommand,
    FetchMetadataCommand, FetchResultRangeCommand, GetFileCommand, ListFilesCommand,
    PutDirectoryCommand, PutFileCommand, SendFileCommand,
};
pub use response::{
    CompressedResponse, EnvironmentVariablesListedResponse, ExecutionCompletedResponse,
    ExecutionStatus, ExecutionTerminatedResponse, ExecutionTimedOutResponse, FetchStatus,
    GetFilesResponse, ListFilesResponse, MetadataFetchedResponse, PutDirectoryResponse,
    PutDirectoryStatus, PutFileResponse, Response, ResponseType, ResultRangeFetchedResponse,
    TransferStatus,
};
pub use wire::{WireReader, WireRecord, WireWriter};
