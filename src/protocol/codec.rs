//! Protocol codec
//!
//! Framing, tag dispatch and the deflate layer of compressed responses.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Len (4)  │ Tag (1)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//! `Len` is little-endian and counts the tag plus payload. A frame with
//! `Len == 0` is a ping and carries no tag.
//!
//! Frames are always built in memory and written with a single
//! `write_all`, so a message is never partially interleaved with another.

use std::io::{self, Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use super::wire::{WireReader, WireWriter};
use super::{Command, CommandType, Response, ResponseType};
use crate::error::{AgentError, Result};

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Result of reading one frame from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome<T> {
    /// A complete message
    Message(T),
    /// A zero-length frame
    Ping,
    /// The peer closed the stream (possibly mid-frame)
    Closed,
}

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command body: tag + payload
pub fn encode_command_body(command: &Command) -> Result<Vec<u8>> {
    let mut writer = WireWriter::with_capacity(64);
    writer.write_u8(command.command_type().as_byte());
    command.encode_payload(&mut writer)?;
    Ok(writer.into_vec())
}

/// Encode a command as a complete frame
pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    frame(&encode_command_body(command)?)
}

/// Decode a command body (tag + payload), consuming it exactly
pub fn decode_command_body(body: &[u8]) -> Result<Command> {
    let (&tag, payload) = body
        .split_first()
        .ok_or_else(|| AgentError::Protocol("Empty command body".into()))?;
    let kind = CommandType::from_byte(tag).map_err(|_| AgentError::UnexpectedMessageType {
        kind: "command",
        tag,
    })?;

    let mut reader = WireReader::new(payload);
    let command = Command::decode_payload(kind, &mut reader)?;
    reader.finish()?;
    Ok(command)
}

/// Decode a command from a complete frame
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    decode_command_body(unframe(bytes)?)
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response body: tag + payload
pub fn encode_response_body(response: &Response) -> Result<Vec<u8>> {
    let mut writer = WireWriter::with_capacity(64);
    writer.write_u8(response.response_type().as_byte());
    response.encode_payload(&mut writer)?;
    Ok(writer.into_vec())
}

/// Encode a response as a complete frame
pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    frame(&encode_response_body(response)?)
}

/// Decode a response body (tag + payload), consuming it exactly
pub fn decode_response_body(body: &[u8]) -> Result<Response> {
    let (&tag, payload) = body
        .split_first()
        .ok_or_else(|| AgentError::Protocol("Empty response body".into()))?;
    let kind = ResponseType::from_byte(tag).map_err(|_| AgentError::UnexpectedMessageType {
        kind: "response",
        tag,
    })?;

    let mut reader = WireReader::new(payload);
    let response = Response::decode_payload(kind, &mut reader)?;
    reader.finish()?;
    Ok(response)
}

/// Decode a response from a complete frame
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    decode_response_body(unframe(bytes)?)
}

// =============================================================================
// Framing
// =============================================================================

/// Prepend the length prefix to a body
fn frame(body: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(body.len()).map_err(|_| AgentError::MessageTooLarge {
        size: body.len(),
        max: u32::MAX as usize,
    })?;
    let mut message = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    message.extend_from_slice(&len.to_le_bytes());
    message.extend_from_slice(body);
    Ok(message)
}

/// Validate a complete frame and return its body
///
/// The declared length must match the bytes present before any tag
/// dispatch happens.
fn unframe(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < LENGTH_PREFIX_SIZE {
        return Err(AgentError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            LENGTH_PREFIX_SIZE,
            bytes.len()
        )));
    }
    let (prefix, body) = bytes.split_at(LENGTH_PREFIX_SIZE);
    let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if declared != body.len() {
        return Err(AgentError::Protocol(format!(
            "Declared length {} does not match {} bytes of body",
            declared,
            body.len()
        )));
    }
    if body.is_empty() {
        return Err(AgentError::Protocol("Ping frame carries no message".into()));
    }
    Ok(body)
}

// =============================================================================
// Compression
// =============================================================================

/// Raw-deflate a buffer
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| AgentError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| AgentError::Compression(e.to_string()))
}

/// Inflate a raw-deflate buffer, refusing output larger than `max_size`
pub fn inflate(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .take(max_size as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| AgentError::Compression(e.to_string()))?;
    if out.len() > max_size {
        return Err(AgentError::MessageTooLarge {
            size: out.len(),
            max: max_size,
        });
    }
    Ok(out)
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Fill `buf` completely; false if the stream ended first
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Read one frame body (tag + payload) from a stream
///
/// Blocks until a complete frame is received, the peer closes, or an
/// error occurs. The length is checked against `max_size` before the
/// body is allocated.
pub fn read_frame<R: Read>(reader: &mut R, max_size: usize) -> Result<ReadOutcome<Vec<u8>>> {
    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    if !read_full(reader, &mut header)? {
        return Ok(ReadOutcome::Closed);
    }

    let len = u32::from_le_bytes(header) as usize;
    if len == 0 {
        return Ok(ReadOutcome::Ping);
    }
    if len > max_size {
        return Err(AgentError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut body = vec![0u8; len];
    if !read_full(reader, &mut body)? {
        return Ok(ReadOutcome::Closed);
    }
    Ok(ReadOutcome::Message(body))
}

/// Read a complete command from a stream
pub fn read_command<R: Read>(reader: &mut R, max_size: usize) -> Result<ReadOutcome<Command>> {
    Ok(match read_frame(reader, max_size)? {
        ReadOutcome::Message(body) => ReadOutcome::Message(decode_command_body(&body)?),
        ReadOutcome::Ping => ReadOutcome::Ping,
        ReadOutcome::Closed => ReadOutcome::Closed,
    })
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R, max_size: usize) -> Result<ReadOutcome<Response>> {
    Ok(match read_frame(reader, max_size)? {
        ReadOutcome::Message(body) => ReadOutcome::Message(decode_response_body(&body)?),
        ReadOutcome::Ping => ReadOutcome::Ping,
        ReadOutcome::Closed => ReadOutcome::Closed,
    })
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<usize> {
    let bytes = encode_command(command)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(bytes.len())
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<usize> {
    let bytes = encode_response(response)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(bytes.len())
}

/// Write a zero-length frame
pub fn write_ping<W: Write>(writer: &mut W) -> Result<()> {
    writer.write_all(&[0u8; LENGTH_PREFIX_SIZE])?;
    writer.flush()?;
    Ok(())
}
