//! Value serialization contract used by the cache layer.
//!
//! `gantry` itself does not need to know how a task's output is encoded; it
//! only needs a type that can round-trip an arbitrary value to bytes. The
//! `JsonCodec` below is provided as the one concrete implementation so the
//! crate is testable end-to-end without every consumer bringing their own.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(String),
    #[error("failed to decode value: {0}")]
    Decode(String),
}

/// Encodes and decodes a single value type to and from bytes.
///
/// A codec is associated with a `tag`: the cache layer stores the tag
/// alongside a cached entry so a later run using a different codec for the
/// same task fails loudly instead of silently misinterpreting bytes.
pub trait ValueCodec<T> {
    fn encode(value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(bytes: &[u8]) -> Result<T, CodecError>;
    fn tag() -> &'static str;
}

/// A `serde_json`-backed codec for any `Serialize + DeserializeOwned` type.
#[cfg(feature = "json-codec")]
pub struct JsonCodec;

#[cfg(feature = "json-codec")]
impl<T> ValueCodec<T> for JsonCodec
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    fn encode(value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn tag() -> &'static str {
        "json"
    }
}
