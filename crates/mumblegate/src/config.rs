//! The bridge's configuration file.
//!
//! Loaded with `figment`: built-in defaults, then the TOML file, then
//! `MUMBLEGATE_`-prefixed environment variables (`__` separates
//! sections, so `MUMBLEGATE_ICE__SECRET` sets `ice.secret`).

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use mumblegate_backend::{
    AvatarSettings, BackendRegistry, DatabaseSettings, SQL_KIND, SqlBackendSettings,
};
use mumblegate_protocol::ServerId;
use mumblegate_session::{ErrorPolicy, ServerProfile, SessionConfig};
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mumblegate.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "MUMBLEGATE_";

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// `[ice]`: how to reach the chat server's RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceSettings {
    pub host: String,
    pub port: u16,
    /// Shared secret. Empty disables verification.
    pub secret: String,
    /// Watchdog period in seconds. `0` disables the watchdog.
    pub watchdog: u64,
    /// Path of the RPC endpoint.
    pub path: String,
    /// Outbound call timeout in seconds.
    pub call_timeout: u64,
    /// Connect timeout in seconds.
    pub connect_timeout: u64,
}

impl Default for IceSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6502,
            secret: String::new(),
            watchdog: 30,
            path: "/meta".into(),
            call_timeout: 10,
            connect_timeout: 10,
        }
    }
}

impl IceSettings {
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("ws://{}:{}{}", self.host, self.port, path)
    }

    pub fn secret(&self) -> Option<&str> {
        (!self.secret.is_empty()).then_some(self.secret.as_str())
    }
}

/// `[user]`: how backend users are presented to the chat server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub id_offset: i32,
    /// Refuse logins when the database is unreachable, instead of letting
    /// the chat server fall back to its own users.
    pub reject_on_error: bool,
    pub reserved_names: Vec<String>,
    pub avatar_enable: bool,
    /// URL template with a `{charid}` placeholder.
    pub avatar_url: String,
    /// Seconds.
    pub avatar_timeout: u64,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            id_offset: 1_000_000_000,
            reject_on_error: true,
            reserved_names: vec!["SuperUser".into()],
            avatar_enable: false,
            avatar_url: String::new(),
            avatar_timeout: 5,
        }
    }
}

/// `[murmur]`: which virtual servers to manage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MurmurSettings {
    /// Allow-list of server ids. Empty manages every server.
    pub servers: Vec<i32>,
}

/// `[[managed]]`: per-server overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedOverride {
    pub id: i32,
    #[serde(default)]
    pub id_offset: Option<i32>,
    /// Backend kind, `sql` if absent.
    #[serde(default)]
    pub backend: Option<String>,
    /// User table, replacing `database.table` for this server.
    #[serde(default)]
    pub table: Option<String>,
}

/// `[log]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `mumblegate_session=debug`.
    pub level: Option<String>,
    /// Append plain-text logs to this file in addition to stderr.
    pub file: Option<PathBuf>,
}

/// `[healthcheck]`: credentials the `healthcheck` command verifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthcheckSettings {
    pub username: String,
    pub password: String,
}

impl Default for HealthcheckSettings {
    fn default() -> Self {
        Self {
            username: "healthcheck_user".into(),
            password: String::new(),
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub ice: IceSettings,
    pub user: UserSettings,
    pub database: DatabaseSettings,
    pub murmur: MurmurSettings,
    pub managed: Vec<ManagedOverride>,
    pub log: LogSettings,
    pub healthcheck: HealthcheckSettings,
}

impl BridgeConfig {
    /// Loads defaults, then `path` (if it exists), then the environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::figment(path).extract().map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Parses a TOML document on top of the defaults, without the
    /// environment. Used by tests and `--check`-style tooling.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Checks values that deserialize fine but can't work.
    pub fn validate(&self, registry: &BackendRegistry) -> Result<(), ConfigError> {
        if self.ice.port == 0 {
            return Err(ConfigError::invalid("ice.port", "must not be 0"));
        }
        if self.ice.host.trim().is_empty() {
            return Err(ConfigError::invalid("ice.host", "must not be empty"));
        }
        if self.ice.call_timeout == 0 {
            return Err(ConfigError::invalid("ice.call_timeout", "must be at least 1 second"));
        }
        if self.user.id_offset < 0 {
            return Err(ConfigError::invalid("user.id_offset", "must not be negative"));
        }
        if self.user.avatar_enable && self.user.avatar_url.trim().is_empty() {
            return Err(ConfigError::invalid(
                "user.avatar_url",
                "must be set when avatar_enable is true",
            ));
        }
        if self.database.port == 0 {
            return Err(ConfigError::invalid("database.port", "must not be 0"));
        }
        if self.database.max_size == 0 {
            return Err(ConfigError::invalid("database.max_size", "must be at least 1"));
        }
        if !registry.contains(SQL_KIND) {
            return Err(ConfigError::invalid(
                "managed.backend",
                format!("backend kind `{SQL_KIND}` is not available in this build"),
            ));
        }

        let mut seen = BTreeSet::new();
        for (i, entry) in self.managed.iter().enumerate() {
            if !seen.insert(entry.id) {
                return Err(ConfigError::invalid(
                    format!("managed[{i}].id"),
                    format!("server {} is listed twice", entry.id),
                ));
            }
            if entry.id_offset.is_some_and(|offset| offset < 0) {
                return Err(ConfigError::invalid(
                    format!("managed[{i}].id_offset"),
                    "must not be negative",
                ));
            }
            if let Some(kind) = &entry.backend {
                if !registry.contains(kind) {
                    return Err(ConfigError::invalid(
                        format!("managed[{i}].backend"),
                        format!("unknown backend kind `{kind}`, known: {:?}", registry.kinds()),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn secret(&self) -> Option<&str> {
        self.ice.secret()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ice.connect_timeout.max(1))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.ice.call_timeout)
    }

    pub fn allowed_servers(&self) -> BTreeSet<ServerId> {
        self.murmur.servers.iter().copied().map(ServerId).collect()
    }

    fn backend_settings(
        &self,
        database: DatabaseSettings,
    ) -> Result<serde_json::Value, ConfigError> {
        let avatar = self.user.avatar_enable.then(|| AvatarSettings {
            url: self.user.avatar_url.clone(),
            timeout_secs: self.user.avatar_timeout,
        });
        let settings = SqlBackendSettings {
            database,
            reserved_names: self.user.reserved_names.clone(),
            avatar,
        };
        serde_json::to_value(settings)
            .map_err(|e| ConfigError::invalid("database", e.to_string()))
    }

    /// Everything the session layer needs, resolved from this file.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let default_profile = ServerProfile {
            id_offset: self.user.id_offset,
            backend_kind: SQL_KIND.into(),
            backend_settings: self.backend_settings(self.database.clone())?,
        };

        let mut servers = HashMap::new();
        for entry in &self.managed {
            let backend_settings = match &entry.table {
                Some(table) => self.backend_settings(DatabaseSettings {
                    table: table.clone(),
                    ..self.database.clone()
                })?,
                None => default_profile.backend_settings.clone(),
            };
            servers.insert(
                ServerId(entry.id),
                ServerProfile {
                    id_offset: entry.id_offset.unwrap_or(self.user.id_offset),
                    backend_kind: entry.backend.clone().unwrap_or_else(|| SQL_KIND.into()),
                    backend_settings,
                },
            );
        }

        Ok(SessionConfig {
            secret: self.secret().map(str::to_string),
            watchdog: Duration::from_secs(self.ice.watchdog),
            allowed_servers: self.allowed_servers(),
            error_policy: ErrorPolicy::from_reject_on_error(self.user.reject_on_error),
            default_profile,
            servers,
        })
    }
}
