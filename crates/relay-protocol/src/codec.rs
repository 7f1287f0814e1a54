//! Codec for encoding and decoding relay envelopes.
//!
//! Frames are compact JSON text. Decoding accepts text or binary
//! WebSocket payloads as long as they hold UTF-8 JSON.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::Envelope;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the size limit.
    #[error("Frame size {size} exceeds maximum {limit}")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Limit in force.
        limit: usize,
    },

    /// Frame is not valid JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an object.
    #[error("Envelope must be a JSON object")]
    NotAnObject,

    /// Object has no string `type` field.
    #[error("Envelope is missing a string `type` field")]
    MissingType,
}

/// Decode an envelope from raw frame bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large, not JSON, or not an envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    decode_with_limit(data, MAX_FRAME_SIZE)
}

/// Decode an envelope, rejecting frames larger than `limit` bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large, not JSON, or not an envelope.
pub fn decode_with_limit(data: &[u8], limit: usize) -> Result<Envelope, ProtocolError> {
    if data.len() > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: data.len(),
            limit,
        });
    }

    match serde_json::from_slice::<Value>(data)? {
        Value::Object(fields) => Envelope::try_from(fields),
        _ => Err(ProtocolError::NotAnObject),
    }
}

/// Encode an envelope to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}
