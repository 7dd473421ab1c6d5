//! Wire Tests
//!
//! Tests for the scalar and collection encodings.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use rdagent::protocol::wire::{to_wire_precision, zero_timestamp};
use rdagent::protocol::{WireReader, WireWriter};
use rdagent::AgentError;

// =============================================================================
// Scalar Tests
// =============================================================================

#[test]
fn test_integers_are_little_endian() {
    let mut writer = WireWriter::new();
    writer.write_i32(0x0102_0304);
    writer.write_i64(-2);
    assert_eq!(
        writer.as_slice(),
        &[0x04, 0x03, 0x02, 0x01, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
    );

    let mut reader = WireReader::new(writer.as_slice());
    assert_eq!(reader.read_i32().unwrap(), 0x0102_0304);
    assert_eq!(reader.read_i64().unwrap(), -2);
    reader.finish().unwrap();
}

#[test]
fn test_bool_rejects_values_other_than_zero_and_one() {
    let mut reader = WireReader::new(&[0, 1, 2]);
    assert!(!reader.read_bool().unwrap());
    assert!(reader.read_bool().unwrap());
    assert!(matches!(reader.read_bool(), Err(AgentError::Protocol(_))));
}

#[test]
fn test_varint_boundaries() {
    for value in [0u32, 1, 127, 128, 16_383, 16_384, u32::MAX] {
        let mut writer = WireWriter::new();
        writer.write_varint(value);
        let mut reader = WireReader::new(writer.as_slice());
        assert_eq!(reader.read_varint().unwrap(), value, "value {}", value);
        reader.finish().unwrap();
    }

    let mut writer = WireWriter::new();
    writer.write_varint(u32::MAX);
    assert_eq!(writer.len(), 5);
}

#[test]
fn test_truncated_input_is_an_error() {
    let mut reader = WireReader::new(&[0x01, 0x02]);
    assert!(reader.read_i32().is_err());
}

// =============================================================================
// String & Collection Tests
// =============================================================================

#[test]
fn test_string_is_length_prefixed_utf8() {
    let mut writer = WireWriter::new();
    writer.write_string("héllo").unwrap();
    assert_eq!(writer.as_slice()[0], 6);

    let mut reader = WireReader::new(writer.as_slice());
    assert_eq!(reader.read_string().unwrap(), "héllo");
}

#[test]
fn test_invalid_utf8_is_rejected() {
    let mut reader = WireReader::new(&[2, 0xC3, 0x28]);
    assert!(reader.read_string().is_err());
}

#[test]
fn test_empty_collections() {
    let mut writer = WireWriter::new();
    writer.write_string("").unwrap();
    writer.write_blob(&[]).unwrap();
    writer.write_string_array(&[]).unwrap();
    writer.write_string_dict(&BTreeMap::new()).unwrap();
    assert_eq!(writer.as_slice(), &[0, 0, 0, 0]);
}

#[test]
fn test_dictionary_preserves_pairs() {
    let mut dict = BTreeMap::new();
    dict.insert("PATH".to_string(), "/usr/bin".to_string());
    dict.insert("EMPTY".to_string(), String::new());

    let mut writer = WireWriter::new();
    writer.write_string_dict(&dict).unwrap();
    let mut reader = WireReader::new(writer.as_slice());
    assert_eq!(reader.read_string_dict().unwrap(), dict);
    reader.finish().unwrap();
}

#[test]
fn test_trailing_bytes_fail_finish() {
    let reader = WireReader::new(&[0]);
    assert!(matches!(reader.finish(), Err(AgentError::Protocol(_))));
}

// =============================================================================
// Timestamp Tests
// =============================================================================

#[test]
fn test_timestamp_round_trips_at_tick_precision() {
    let value = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
    let mut writer = WireWriter::new();
    writer.write_timestamp(&value).unwrap();
    assert_eq!(writer.len(), 8);

    let mut reader = WireReader::new(writer.as_slice());
    let decoded = reader.read_timestamp().unwrap();
    assert_eq!(decoded, to_wire_precision(value));
    assert_eq!(decoded.timestamp_subsec_nanos(), 123_456_700);
}

#[test]
fn test_timestamp_carries_utc_kind() {
    let mut writer = WireWriter::new();
    writer.write_timestamp(&zero_timestamp()).unwrap();
    // Tick zero with kind = UTC in the top two bits
    assert_eq!(writer.as_slice(), &[0, 0, 0, 0, 0, 0, 0, 0x40]);
}
