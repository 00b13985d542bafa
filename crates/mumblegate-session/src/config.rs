//! Session configuration: which servers are managed and how.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use mumblegate_backend::BackendSpec;
use mumblegate_protocol::{AUTH_REFUSED, FALL_THROUGH, ServerId, UserId};

/// What `authenticate` answers when the backend could not.
///
/// Resolved once at startup from `reject_on_error` and shared by every
/// adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Refuse the login (`-1`). The chat server's own database is not
    /// consulted, so a database outage can't be used to log in as a
    /// locally registered user with a weaker password.
    #[default]
    Reject,
    /// Let the chat server fall back to its own database (`-2`).
    Defer,
}

impl ErrorPolicy {
    pub fn from_reject_on_error(reject: bool) -> Self {
        if reject { Self::Reject } else { Self::Defer }
    }

    /// The `authenticate` id to answer with after a backend error.
    pub fn auth_code(self) -> UserId {
        match self {
            Self::Reject => AUTH_REFUSED,
            Self::Defer => FALL_THROUGH,
        }
    }
}

/// How one server (or the default for all servers) is served.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerProfile {
    /// Added to backend ids to get the ids the chat server sees.
    pub id_offset: i32,
    /// Registered backend kind.
    pub backend_kind: String,
    /// Kind-specific settings.
    pub backend_settings: serde_json::Value,
}

impl Default for ServerProfile {
    fn default() -> Self {
        Self {
            id_offset: 1_000_000_000,
            backend_kind: "sql".into(),
            backend_settings: serde_json::Value::Object(Default::default()),
        }
    }
}

/// A managed server: a server id bound to its profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedServer {
    pub id: ServerId,
    pub id_offset: i32,
    pub backend_kind: String,
    pub backend_settings: serde_json::Value,
}

impl ManagedServer {
    pub fn new(id: ServerId, profile: &ServerProfile) -> Self {
        Self {
            id,
            id_offset: profile.id_offset,
            backend_kind: profile.backend_kind.clone(),
            backend_settings: profile.backend_settings.clone(),
        }
    }

    /// The registry request for this server's backend.
    pub fn backend_spec(&self) -> BackendSpec {
        BackendSpec {
            server_id: self.id,
            kind: self.backend_kind.clone(),
            settings: self.backend_settings.clone(),
        }
    }
}

/// Everything the [`SessionManager`](crate::SessionManager) needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Shared secret. `None` disables verification.
    pub secret: Option<String>,
    /// Watchdog period. Zero disables the watchdog.
    pub watchdog: Duration,
    /// Servers to manage. Empty means every booted server.
    pub allowed_servers: BTreeSet<ServerId>,
    pub error_policy: ErrorPolicy,
    /// Profile for servers without an explicit entry.
    pub default_profile: ServerProfile,
    /// Per-server overrides.
    pub servers: HashMap<ServerId, ServerProfile>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            watchdog: Duration::from_secs(30),
            allowed_servers: BTreeSet::new(),
            error_policy: ErrorPolicy::default(),
            default_profile: ServerProfile::default(),
            servers: HashMap::new(),
        }
    }
}

impl SessionConfig {
    /// Whether `id` is one of the servers this bridge manages.
    pub fn is_allowed(&self, id: ServerId) -> bool {
        self.allowed_servers.is_empty() || self.allowed_servers.contains(&id)
    }

    /// The managed-server entry for `id`, from its override or the default.
    pub fn managed(&self, id: ServerId) -> ManagedServer {
        let profile = self.servers.get(&id).unwrap_or(&self.default_profile);
        ManagedServer::new(id, profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_policy_codes() {
        assert_eq!(ErrorPolicy::Reject.auth_code(), -1);
        assert_eq!(ErrorPolicy::Defer.auth_code(), -2);
        assert_eq!(ErrorPolicy::from_reject_on_error(true), ErrorPolicy::Reject);
        assert_eq!(ErrorPolicy::from_reject_on_error(false), ErrorPolicy::Defer);
    }

    #[test]
    fn test_empty_allow_list_allows_everything() {
        let config = SessionConfig::default();
        assert!(config.is_allowed(ServerId(1)));
        assert!(config.is_allowed(ServerId(99)));
    }

    #[test]
    fn test_allow_list_restricts() {
        let config = SessionConfig {
            allowed_servers: [ServerId(1), ServerId(3)].into_iter().collect(),
            ..Default::default()
        };
        assert!(config.is_allowed(ServerId(3)));
        assert!(!config.is_allowed(ServerId(2)));
    }

    #[test]
    fn test_managed_uses_override_then_default() {
        let mut config = SessionConfig::default();
        config.servers.insert(
            ServerId(2),
            ServerProfile {
                id_offset: 5_000,
                backend_kind: "other".into(),
                ..Default::default()
            },
        );

        let two = config.managed(ServerId(2));
        assert_eq!(two.id_offset, 5_000);
        assert_eq!(two.backend_kind, "other");

        let one = config.managed(ServerId(1));
        assert_eq!(one.id_offset, 1_000_000_000);
        assert_eq!(one.backend_spec().kind, "sql");
        assert_eq!(one.backend_spec().server_id, ServerId(1));
    }
}
