//! # Telemetry Snapshot
//!
//! The single persisted record handed from the gateway loop to the HTTP adapter.
//!
//! On disk it is a compact JSON object:
//!
//! ```text
//! {"payload":"4869","rssi":-42,"snr":9.5,"timestamp":"2026-10-19 14:03:07"}
//! ```
//!
//! `payload` is the raw packet, lowercase hex encoded, because packets are not
//! guaranteed to be text.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Timestamp format used in the snapshot file (local time, second resolution)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Latest packet with link-quality metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Raw packet bytes
    #[serde(with = "hex_payload")]
    pub payload: Vec<u8>,

    /// Received signal strength in dBm
    pub rssi: i32,

    /// Signal-to-noise ratio in dB, if the radio reports it
    pub snr: Option<f32>,

    /// Gateway-local receive time
    #[serde(with = "local_timestamp")]
    pub timestamp: NaiveDateTime,
}

impl TelemetrySnapshot {
    /// Build a snapshot from one received packet
    ///
    /// The timestamp is truncated to whole seconds.
    pub fn new(payload: &[u8], rssi: i32, snr: Option<f32>, received_at: NaiveDateTime) -> Self {
        Self {
            payload: payload.to_vec(),
            rssi,
            snr,
            timestamp: truncate_to_seconds(received_at),
        }
    }

    /// Payload as ASCII text, if it is text
    pub fn payload_text(&self) -> Result<&str, DecodeError> {
        decode_text(&self.payload)
    }

    /// Serialize to the on-disk JSON form
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse the on-disk JSON form
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

fn truncate_to_seconds(at: NaiveDateTime) -> NaiveDateTime {
    use chrono::Timelike;
    at.with_nanosecond(0).unwrap_or(at)
}

/// Interpret packet bytes as ASCII text
///
/// # Errors
///
/// Returns [`DecodeError`] locating the first non-ASCII byte
///
/// # Examples
///
/// ```
/// use cansat_gateway::snapshot::decode_text;
///
/// assert_eq!(decode_text(b"temp:25.5").unwrap(), "temp:25.5");
/// assert!(decode_text(&[0x48, 0xFF]).is_err());
/// ```
pub fn decode_text(bytes: &[u8]) -> Result<&str, DecodeError> {
    match bytes.iter().position(|b| !b.is_ascii()) {
        Some(offset) => Err(DecodeError {
            offset,
            byte: bytes[offset],
        }),
        // ASCII is always valid UTF-8
        None => std::str::from_utf8(bytes).map_err(|e| DecodeError {
            offset: e.valid_up_to(),
            byte: bytes[e.valid_up_to()],
        }),
    }
}

/// Lowercase hex encoding
pub fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Decode hex text (either case)
pub fn decode_hex(text: &str) -> Result<Vec<u8>, String> {
    if text.len() % 2 != 0 {
        return Err(format!("hex payload has odd length {}", text.len()));
    }

    text.as_bytes()
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            std::str::from_utf8(pair)
                .ok()
                .filter(|digits| digits.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| format!("invalid hex digits at offset {}", i * 2))
        })
        .collect()
}

mod hex_payload {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_hex(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode_hex(&text).map_err(de::Error::custom)
    }
}

mod local_timestamp {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(at: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&at.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT).map_err(de::Error::custom)
    }
}
