//! Error types for the protocol layer.
//!
//! Three kinds of failure live here, one per direction of travel:
//!
//! - [`ProtocolError`]: bytes that don't decode into a frame, or frames
//!   that make no sense.
//! - [`RpcFault`]: a *remote* exception: what one side of the RPC
//!   channel tells the other when it refuses a call. This one is
//!   serializable because it crosses the wire.
//! - [`PeerError`]: what an outbound call to the chat server can fail
//!   with, from the bridge's point of view.

use serde::{Deserialize, Serialize};

use crate::ServerId;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a frame into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a frame).
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but violates the protocol, e.g. a reply whose
    /// value doesn't match the call it answers.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// A fault raised by the callee of an RPC and returned to the caller.
///
/// This is the only error information that ever crosses the boundary.
/// Backend failures never become faults; they are turned into the
/// documented fallback values long before a reply is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum RpcFault {
    /// The call did not carry the configured shared secret.
    #[error("invalid secret")]
    InvalidSecret,

    /// The call names a server this side has nothing registered for.
    #[error("no authenticator registered for server {server}")]
    UnknownServer { server: ServerId },

    /// The callee does not implement this operation.
    #[error("unsupported call: {call}")]
    Unsupported { call: String },
}

/// Failure of an outbound call from the bridge to the chat server.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The connection to the peer is down or could not be opened.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// The peer did not answer in time.
    #[error("peer call {0} timed out")]
    Timeout(&'static str),

    /// The peer refused the call because our secret is wrong.
    #[error("peer rejected our secret")]
    InvalidSecret,

    /// The peer raised some other fault.
    #[error("peer fault: {0}")]
    Fault(RpcFault),

    /// The peer answered with something we could not make sense of.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<RpcFault> for PeerError {
    fn from(fault: RpcFault) -> Self {
        match fault {
            RpcFault::InvalidSecret => PeerError::InvalidSecret,
            other => PeerError::Fault(other),
        }
    }
}

impl PeerError {
    /// Whether the failure means the connection itself is gone.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, PeerError::Unreachable(_) | PeerError::Timeout(_))
    }
}
