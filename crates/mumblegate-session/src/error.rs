//! Error types for the session layer.

use mumblegate_backend::BackendError;
use mumblegate_protocol::{PeerError, ServerId};

/// Errors that can occur while managing the session with the chat server.
///
/// None of these ever reach the chat server. Inbound calls are answered
/// with fallback values; these errors are for the bridge's own control
/// flow: startup, attach, and the watchdog.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The initial connection could not be established. Fatal at startup.
    #[error("could not connect to the chat server: {0}")]
    Connect(#[source] PeerError),

    /// An outbound call to the chat server failed.
    #[error(transparent)]
    Peer(#[from] PeerError),

    /// The backend for a server could not be built.
    #[error("backend for server {server_id}: {source}")]
    Backend {
        server_id: ServerId,
        #[source]
        source: BackendError,
    },

    /// There is no session with the chat server.
    #[error("not connected to the chat server")]
    NotConnected,

    /// The manager is shutting down and accepts no more work.
    #[error("session is shutting down")]
    ShuttingDown,
}

impl SessionError {
    /// Whether the error means the connection to the peer is gone.
    pub fn is_unreachable(&self) -> bool {
        match self {
            SessionError::Connect(e) | SessionError::Peer(e) => e.is_unreachable(),
            SessionError::NotConnected => true,
            _ => false,
        }
    }
}
