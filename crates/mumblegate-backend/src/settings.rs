//! Settings for the SQL backend.
//!
//! These travel from the bridge's config file to the backend registry as
//! a `serde_json::Value`, so every backend kind can define its own shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the user table lives and how it is laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Prepended to every table name.
    pub prefix: String,
    /// The user table, without prefix.
    pub table: String,
    /// Column holding an optional display name. `None` when the schema
    /// has no such column.
    pub display_name_column: Option<String>,
    /// Table mapping characters to external character ids, used for
    /// avatars.
    pub character_table: String,
    /// Table linking users to their main character.
    pub profile_table: String,
    /// Connections checked out at once; further calls wait.
    pub max_size: usize,
    /// Idle connections kept in the pool.
    pub max_idle: usize,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5432,
            name: "alliance_auth".into(),
            user: "allianceserver".into(),
            password: String::new(),
            prefix: String::new(),
            table: "mumble_mumbleuser".into(),
            display_name_column: None,
            character_table: "eveonline_evecharacter".into(),
            profile_table: "authentication_userprofile".into(),
            max_size: 16,
            max_idle: 8,
        }
    }
}

/// Avatar fetching. Absent means avatars are disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarSettings {
    /// URL with a `{charid}` placeholder.
    pub url: String,
    /// Per-request timeout, in seconds.
    #[serde(default = "default_avatar_timeout")]
    pub timeout_secs: u64,
}

fn default_avatar_timeout() -> u64 {
    5
}

impl AvatarSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Everything the `sql` backend kind needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlBackendSettings {
    pub database: DatabaseSettings,
    /// Names that always resolve as unknown, so the chat server's own
    /// accounts (e.g. its admin) can never be claimed from the database.
    pub reserved_names: Vec<String>,
    pub avatar: Option<AvatarSettings>,
}

impl Default for SqlBackendSettings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            reserved_names: vec!["SuperUser".into()],
            avatar: None,
        }
    }
}
