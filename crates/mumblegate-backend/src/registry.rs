//! Maps backend kind names to constructors.
//!
//! The config file names a backend kind per managed server; the registry
//! turns that name plus the server's settings into a live backend. New
//! kinds are added by registering a constructor at startup.

use std::collections::HashMap;
use std::sync::Arc;

use mumblegate_protocol::ServerId;
use tracing::debug;

use crate::{BackendAuthenticator, BackendError};

/// What a constructor gets to build one backend.
#[derive(Debug, Clone)]
pub struct BackendSpec {
    /// The server the backend will serve, for logging.
    pub server_id: ServerId,
    /// Registered kind name.
    pub kind: String,
    /// Kind-specific settings, deserialized by the constructor.
    pub settings: serde_json::Value,
}

/// A backend constructor.
pub type BackendFactory =
    Arc<dyn Fn(&BackendSpec) -> Result<Arc<dyn BackendAuthenticator>, BackendError> + Send + Sync>;

/// Name → constructor table.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in kind registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "postgres")]
        registry.register(crate::SQL_KIND, build_sql);
        registry
    }

    /// Registers `factory` under `kind`, replacing any previous one.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&BackendSpec) -> Result<Arc<dyn BackendAuthenticator>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Builds a backend for `spec`.
    pub fn build(&self, spec: &BackendSpec) -> Result<Arc<dyn BackendAuthenticator>, BackendError> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| BackendError::UnknownKind(spec.kind.clone()))?;
        debug!(server_id = %spec.server_id, kind = %spec.kind, "building backend");
        factory(spec)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Constructor for the `sql` kind. Opens no connection; the pool connects
/// on first use.
#[cfg(feature = "postgres")]
fn build_sql(spec: &BackendSpec) -> Result<Arc<dyn BackendAuthenticator>, BackendError> {
    use crate::{
        AvatarFetcher, IdentityStore, Pool, PostgresManager, SqlAuthenticator, SqlBackendSettings,
    };

    let settings: SqlBackendSettings = serde_json::from_value(spec.settings.clone())
        .map_err(|e| BackendError::Config(format!("server {}: {e}", spec.server_id)))?;

    let manager = PostgresManager::new(&settings.database);
    let database = &settings.database;
    let pool = Arc::new(Pool::new(manager, database.max_size, database.max_idle));
    let store = IdentityStore::new(pool, &settings.database);
    let mut backend = SqlAuthenticator::new(store, settings.reserved_names);
    if let Some(avatar) = settings.avatar {
        backend = backend.with_avatars(AvatarFetcher::new(avatar.url.clone(), avatar.timeout())?);
    }
    Ok(Arc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthenticatedUser;
    use async_trait::async_trait;

    struct Nobody;

    #[async_trait]
    impl BackendAuthenticator for Nobody {
        fn kind(&self) -> &str {
            "nobody"
        }
        async fn authenticate(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Option<AuthenticatedUser>, BackendError> {
            Ok(None)
        }
        async fn get_id(&self, _: &str) -> Result<Option<i32>, BackendError> {
            Ok(None)
        }
        async fn get_name(&self, _: i32) -> Result<Option<String>, BackendError> {
            Ok(None)
        }
    }

    fn spec(kind: &str, settings: serde_json::Value) -> BackendSpec {
        BackendSpec {
            server_id: ServerId(1),
            kind: kind.into(),
            settings,
        }
    }

    #[test]
    fn test_defaults_include_sql() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.contains("sql"));
        assert_eq!(registry.kinds(), vec!["sql"]);
    }

    #[test]
    fn test_unknown_kind_is_error() {
        let registry = BackendRegistry::new();
        let err = registry.build(&spec("ldap", serde_json::Value::Null)).err().unwrap();
        assert!(matches!(err, BackendError::UnknownKind(kind) if kind == "ldap"));
    }

    #[test]
    fn test_registered_factory_is_used() {
        let mut registry = BackendRegistry::new();
        registry.register("nobody", |_| Ok(Arc::new(Nobody) as Arc<dyn BackendAuthenticator>));
        let backend = registry.build(&spec("nobody", serde_json::json!({}))).unwrap();
        assert_eq!(backend.kind(), "nobody");
    }

    #[tokio::test]
    async fn test_sql_factory_builds_without_connecting() {
        let registry = BackendRegistry::with_defaults();
        let backend = registry
            .build(&spec(
                "sql",
                serde_json::json!({ "database": { "host": "db.invalid" } }),
            ))
            .unwrap();
        assert_eq!(backend.kind(), "sql");
    }

    #[test]
    fn test_sql_factory_rejects_bad_settings() {
        let registry = BackendRegistry::with_defaults();
        let err = registry
            .build(&spec("sql", serde_json::json!({ "database": { "port": "x" } })))
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Config(_)));
    }
}
