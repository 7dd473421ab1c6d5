//! Wire primitives
//!
//! Reader/writer for the scalar and collection encodings shared by every
//! command and response payload.
//!
//! ## Encodings
//! - Fixed-width integers: little-endian
//! - bool: one byte, 0 or 1
//! - varint: 7-bit groups, low group first, high bit = continuation
//! - string: varint byte length + UTF-8
//! - blob: varint length + raw bytes
//! - string array / dictionary / record list: varint count + elements
//! - timestamp: i64, low 62 bits = 100ns ticks since 0001-01-01 UTC,
//!   top 2 bits = kind (1 = UTC)

use std::collections::BTreeMap;
use std::time::SystemTime;

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};

use crate::error::{AgentError, Result};

/// Largest encoded size of a 32-bit varint
const MAX_VARINT_BYTES: usize = 5;

const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: i64 = 100;
/// Ticks between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
/// Ticks at 9999-12-31T23:59:59.9999999
const MAX_TICKS: i64 = 3_155_378_975_999_999_999;
const TICKS_MASK: u64 = (1 << 62) - 1;
const KIND_SHIFT: u32 = 62;
const KIND_UNSPECIFIED: u64 = 0;
const KIND_UTC: u64 = 1;

/// Declares a `#[repr(u8)]` enum that maps to and from a single wire byte.
macro_rules! byte_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($what:literal) {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
        #[repr(u8)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $name {
            /// Wire byte for this value
            pub fn as_byte(self) -> u8 {
                self as u8
            }

            /// Parse a wire byte, rejecting values outside the enum
            pub fn from_byte(byte: u8) -> $crate::error::Result<Self> {
                match byte {
                    $( $value => Ok($name::$variant), )+
                    other => Err($crate::error::AgentError::Protocol(format!(
                        "Invalid {} byte: {}",
                        $what, other
                    ))),
                }
            }
        }
    };
}

pub(crate) use byte_enum;

/// A value with a fixed field layout on the wire
///
/// Field order is part of the wire format and must never change for an
/// existing message type.
pub trait WireRecord: Sized {
    fn encode(&self, writer: &mut WireWriter) -> Result<()>;
    fn decode(reader: &mut WireReader<'_>) -> Result<Self>;
}

// =============================================================================
// Writer
// =============================================================================

/// Serializes primitives into an in-memory buffer
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    /// Write a 7-bit encoded unsigned integer
    pub fn write_varint(&mut self, mut value: u32) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    /// Write a collection length or count as a varint
    pub fn write_len(&mut self, len: usize) -> Result<()> {
        // Peers store lengths in a signed 32-bit int
        let len = i32::try_from(len)
            .map_err(|_| AgentError::Protocol(format!("Length {} does not fit the wire", len)))?;
        self.write_varint(len as u32);
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_len(value.len())?;
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_blob(&mut self, data: &[u8]) -> Result<()> {
        self.write_len(data.len())?;
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn write_string_array(&mut self, values: &[String]) -> Result<()> {
        self.write_len(values.len())?;
        for value in values {
            self.write_string(value)?;
        }
        Ok(())
    }

    pub fn write_string_dict(&mut self, values: &BTreeMap<String, String>) -> Result<()> {
        self.write_len(values.len())?;
        for (key, value) in values {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        Ok(())
    }

    /// Write a UTC timestamp in tick form
    pub fn write_timestamp(&mut self, value: &DateTime<Utc>) -> Result<()> {
        let ticks = utc_to_ticks(value)?;
        self.write_i64(((ticks as u64) | (KIND_UTC << KIND_SHIFT)) as i64);
        Ok(())
    }

    pub fn write_record<T: WireRecord>(&mut self, record: &T) -> Result<()> {
        record.encode(self)
    }

    pub fn write_records<T: WireRecord>(&mut self, records: &[T]) -> Result<()> {
        self.write_len(records.len())?;
        for record in records {
            record.encode(self)?;
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Deserializes primitives from a complete in-memory payload
///
/// Every read checks the remaining length first; running out of bytes is a
/// protocol error, never a panic.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(AgentError::Protocol(format!(
                "Truncated {}: need {} bytes, {} left",
                what,
                needed,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1, "byte")?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(AgentError::Protocol(format!("Invalid bool byte: {}", other))),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4, "i32")?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4, "u32")?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8, "i64")?;
        Ok(self.buf.get_i64_le())
    }

    /// Read a 7-bit encoded unsigned integer
    pub fn read_varint(&mut self) -> Result<u32> {
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            let group = u32::from(byte & 0x7F);
            if i == MAX_VARINT_BYTES - 1 && group > 0x0F {
                return Err(AgentError::Protocol("Varint overflows 32 bits".into()));
            }
            value |= group << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(AgentError::Protocol("Varint longer than 5 bytes".into()))
    }

    /// Read a collection count; each element takes at least `min_element_size`
    /// bytes, which bounds the count by what is left in the payload
    fn read_count(&mut self, min_element_size: usize, what: &str) -> Result<usize> {
        let raw = self.read_varint()?;
        let count = i32::try_from(raw)
            .map_err(|_| AgentError::Protocol(format!("Negative {} length", what)))?
            as usize;
        self.ensure(count.saturating_mul(min_element_size), what)?;
        Ok(count)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len, "bytes")?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_count(1, "string")?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| AgentError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>> {
        let len = self.read_count(1, "blob")?;
        Ok(self.read_bytes(len)?.to_vec())
    }

    pub fn read_string_array(&mut self) -> Result<Vec<String>> {
        let count = self.read_count(1, "string array")?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Ok(values)
    }

    pub fn read_string_dict(&mut self) -> Result<BTreeMap<String, String>> {
        let count = self.read_count(2, "dictionary")?;
        let mut values = BTreeMap::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            values.insert(key, value);
        }
        Ok(values)
    }

    pub fn read_timestamp(&mut self) -> Result<DateTime<Utc>> {
        let raw = self.read_i64()? as u64;
        match raw >> KIND_SHIFT {
            KIND_UTC | KIND_UNSPECIFIED => {}
            _ => {
                return Err(AgentError::Protocol(
                    "Timestamp is not in UTC (local kind)".into(),
                ))
            }
        }
        ticks_to_utc((raw & TICKS_MASK) as i64)
    }

    pub fn read_record<T: WireRecord>(&mut self) -> Result<T> {
        T::decode(self)
    }

    pub fn read_records<T: WireRecord>(&mut self) -> Result<Vec<T>> {
        let count = self.read_count(1, "record list")?;
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(T::decode(self)?);
        }
        Ok(records)
    }

    /// Assert the payload was consumed exactly
    pub fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(AgentError::Protocol(format!(
                "Payload has {} unexpected trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Timestamp helpers
// =============================================================================

fn utc_to_ticks(value: &DateTime<Utc>) -> Result<i64> {
    let secs = i128::from(value.timestamp());
    let sub_ticks = i128::from(value.timestamp_subsec_nanos()) / i128::from(NANOS_PER_TICK);
    let ticks = secs * i128::from(TICKS_PER_SECOND) + sub_ticks + i128::from(UNIX_EPOCH_TICKS);
    if !(0..=i128::from(MAX_TICKS)).contains(&ticks) {
        return Err(AgentError::Protocol(format!(
            "Timestamp {} is outside the wire range",
            value
        )));
    }
    Ok(ticks as i64)
}

fn ticks_to_utc(ticks: i64) -> Result<DateTime<Utc>> {
    if ticks > MAX_TICKS {
        return Err(AgentError::Protocol(format!("Timestamp ticks {} out of range", ticks)));
    }
    let since_epoch = ticks - UNIX_EPOCH_TICKS;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = since_epoch.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK;
    DateTime::<Utc>::from_timestamp(secs, nanos as u32)
        .ok_or_else(|| AgentError::Protocol(format!("Timestamp ticks {} out of range", ticks)))
}

/// Round a timestamp down to the 100ns resolution the wire carries
pub fn to_wire_precision(value: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = value.timestamp_subsec_nanos();
    let truncated = nanos - nanos % NANOS_PER_TICK as u32;
    DateTime::<Utc>::from_timestamp(value.timestamp(), truncated).unwrap_or(value)
}

/// Tick zero (0001-01-01), sent where no timestamp applies
pub fn zero_timestamp() -> DateTime<Utc> {
    ticks_to_utc(0).unwrap_or_default()
}

/// Convert a filesystem time to a wire-precision UTC timestamp
pub fn utc_from_system_time(time: SystemTime) -> DateTime<Utc> {
    to_wire_precision(DateTime::<Utc>::from(time))
}
