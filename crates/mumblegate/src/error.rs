//! Unified error type for the bridge.

use mumblegate_backend::BackendError;
use mumblegate_protocol::{PeerError, ProtocolError};
use mumblegate_session::SessionError;
use mumblegate_transport::TransportError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Bad or unreadable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Dialing or talking to the chat server failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An outbound call to the chat server failed.
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// Connecting or attaching failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A backend could not be built.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Installing the log subscriber failed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let bridge_err: BridgeError = err.into();
        assert!(matches!(bridge_err, BridgeError::Transport(_)));
        assert!(bridge_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let bridge_err: BridgeError = err.into();
        assert!(matches!(bridge_err, BridgeError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::NotConnected;
        let bridge_err: BridgeError = err.into();
        assert!(matches!(bridge_err, BridgeError::Session(_)));
    }

    #[test]
    fn test_from_peer_error() {
        let bridge_err: BridgeError = PeerError::InvalidSecret.into();
        assert!(matches!(bridge_err, BridgeError::Peer(_)));
    }

    #[test]
    fn test_from_config_error() {
        let err = ConfigError::Invalid {
            key: "ice.port".into(),
            reason: "must not be 0".into(),
        };
        let bridge_err: BridgeError = err.into();
        assert!(bridge_err.to_string().contains("ice.port"));
    }
}
