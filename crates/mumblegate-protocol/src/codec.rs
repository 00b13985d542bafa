//! Codec trait and implementations for serializing/deserializing frames.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The peer link doesn't care HOW frames are serialized; it just needs
//! something that implements the [`Codec`] trait.
//!
//! Currently we provide [`JsonCodec`], which is what the chat server's
//! RPC gateway speaks and is easy to read in a packet capture.

use serde::{de::DeserializeOwned, Serialize};

use crate::{Frame, ProtocolError};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// ## Trait bounds explained
///
/// - `Send + Sync` → the codec is shared between the reader task and
///   every task that sends a call.
/// - `'static` → the codec doesn't borrow temporary data, so it can live
///   inside long-running tasks.
///
/// `DeserializeOwned` (vs plain `Deserialize`) means the result doesn't
/// borrow from the input bytes, so the receive buffer can be dropped
/// right after decoding.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Shorthand for `encode::<Frame>`.
    fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
        self.encode(frame)
    }

    /// Shorthand for `decode::<Frame>`.
    fn decode_frame(&self, data: &[u8]) -> Result<Frame, ProtocolError> {
        self.decode(data)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// This is behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use mumblegate_protocol::{Call, Codec, Context, Frame, JsonCodec};
///
/// let codec = JsonCodec;
///
/// let frame = Frame::Call {
///     seq: 1,
///     context: Context::with_secret(Some("s3cret")),
///     call: Call::GetBootedServers,
/// };
///
/// let bytes = codec.encode_frame(&frame).unwrap();
/// let decoded = codec.decode_frame(&bytes).unwrap();
/// assert_eq!(frame, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
