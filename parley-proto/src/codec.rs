//! Serialization and deserialization for the Parley wire protocol.
//!
//! Frames are postcard-encoded and carried in WebSocket binary frames,
//! which preserve message boundaries, so no additional framing is needed.

use crate::frame::{ClientFrame, ServerFrame};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`ClientFrame`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ClientFrame`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the bytes cannot be deserialized.
pub fn decode_client(bytes: &[u8]) -> Result<ClientFrame, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ServerFrame`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ServerFrame`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the bytes cannot be deserialized.
pub fn decode_server(bytes: &[u8]) -> Result<ServerFrame, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
