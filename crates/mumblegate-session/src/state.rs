//! Session state and attachment records.

use std::fmt;
use std::sync::Arc;

use mumblegate_protocol::{ServerAuthenticator, ServerId, ServerProxy};
use tokio::time::Instant;

use crate::ProtocolAdapter;

/// Where the bridge stands with the chat server.
///
/// ```text
/// Disconnected ──connect──→ Connecting ──ok──→ Connected
///      ↑                                          │
///      └────────── peer unreachable ──────────────┘
///      any state ──shutdown──→ ShuttingDown (terminal)
/// ```
///
/// The watchdog moves `Disconnected` back to `Connected` once a pass
/// succeeds again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::ShuttingDown => "shutting down",
        })
    }
}

/// One server with an authenticator installed by us.
#[derive(Clone)]
pub struct AttachmentRecord {
    pub server_id: ServerId,
    pub adapter: Arc<ProtocolAdapter>,
    /// Proxy the adapter was last installed through.
    pub proxy: Arc<dyn ServerProxy>,
    pub attached_at: Instant,
}

impl AttachmentRecord {
    pub fn new(adapter: Arc<ProtocolAdapter>, proxy: Arc<dyn ServerProxy>) -> Self {
        Self {
            server_id: adapter.server_id(),
            adapter,
            proxy,
            attached_at: Instant::now(),
        }
    }

    /// The adapter as the trait object the peer is handed.
    pub fn authenticator(&self) -> Arc<dyn ServerAuthenticator> {
        self.adapter.clone()
    }
}

impl fmt::Debug for AttachmentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentRecord")
            .field("server_id", &self.server_id)
            .field("adapter", &self.adapter)
            .field("attached_at", &self.attached_at)
            .finish_non_exhaustive()
    }
}
