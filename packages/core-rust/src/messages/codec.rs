//! Named `MsgPack` framing for requests and chunks.
//!
//! Uses `rmp_serde::to_vec_named()` so struct fields travel as map keys, which
//! the internally tagged [`PivotChunk`] and flattened JAQL payloads require.

use crate::error::CodecError;
use crate::messages::chunk::PivotChunk;
use crate::messages::request::QueryRequest;

/// Encodes a query request for the wire.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_request(request: &QueryRequest) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(request)?)
}

/// Decodes a query request frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the frame is not a valid request.
pub fn decode_request(bytes: &[u8]) -> Result<QueryRequest, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Encodes a response chunk for the wire.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_chunk(chunk: &PivotChunk) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(chunk)?)
}

/// Decodes a response chunk frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the frame is not a valid chunk.
pub fn decode_chunk(bytes: &[u8]) -> Result<PivotChunk, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
