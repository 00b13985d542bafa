//! `Bridge` builder, run loop, and the healthcheck.
//!
//! This ties the layers together: config → backend registry → session
//! manager → WebSocket peer.

use std::future::Future;
use std::sync::Arc;

use mumblegate_backend::BackendRegistry;
use mumblegate_protocol::{
    AUTH_REFUSED, Context, FALL_THROUGH, PeerConnector, PeerError, ServerId, UserId,
};
use mumblegate_session::SessionManager;
use tracing::{debug, error, info, warn};

use crate::BridgeError;
use crate::config::BridgeConfig;
use crate::peer::{PeerSettings, WsConnector};

fn peer_settings(config: &BridgeConfig) -> PeerSettings {
    PeerSettings {
        url: config.ice.url(),
        connect_timeout: config.connect_timeout(),
        call_timeout: config.call_timeout(),
    }
}

/// Builder for a [`Bridge`].
///
/// # Example
///
/// ```rust,ignore
/// let config = BridgeConfig::load(Path::new("mumblegate.toml"))?;
/// let bridge = Bridge::builder(config).build()?;
/// bridge.run_until(tokio::signal::ctrl_c().map(|_| ())).await
/// ```
pub struct BridgeBuilder {
    config: BridgeConfig,
    registry: Option<BackendRegistry>,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            registry: None,
        }
    }

    /// Replaces the built-in backend kinds.
    pub fn registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validates the configuration and sets up the session layer. Does
    /// not touch the network.
    pub fn build(self) -> Result<Bridge, BridgeError> {
        let registry = self.registry.unwrap_or_else(BackendRegistry::with_defaults);
        self.config.validate(&registry)?;
        let manager = SessionManager::new(self.config.session_config()?, registry);
        let connector = WsConnector::new(peer_settings(&self.config));
        Ok(Bridge {
            config: self.config,
            manager,
            connector,
        })
    }
}

/// A configured bridge, ready to connect.
pub struct Bridge {
    config: BridgeConfig,
    manager: Arc<SessionManager>,
    connector: WsConnector,
}

impl Bridge {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Connects, attaches every booted server, and starts the watchdog.
    ///
    /// A failed connect is returned as-is; there is no retry at this
    /// level.
    pub async fn start(&self) -> Result<(), BridgeError> {
        debug!(url = %self.config.ice.url(), "starting bridge");
        self.manager.connect(&self.connector).await?;

        if self.manager.spawn_watchdog() {
            info!(period_secs = self.config.ice.watchdog, "watchdog started");
        } else {
            info!("watchdog disabled");
        }
        Ok(())
    }

    /// Runs until `shutdown` resolves, then detaches and closes
    /// everything.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.start().await {
            error!(error = %e, "could not start");
            self.manager.shutdown().await;
            return Err(e);
        }

        info!(
            servers = ?self.manager.attached_servers().await,
            "mumblegate running"
        );
        shutdown.await;

        info!("shutting down");
        self.manager.shutdown().await;
        Ok(())
    }
}

/// What one healthcheck pass saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// `verify_password` result per checked server.
    pub results: Vec<(ServerId, UserId)>,
    /// Whether a password was configured, so `-1` means failure.
    pub password_set: bool,
}

impl HealthReport {
    /// `-2` anywhere is unhealthy: the bridge did not answer for that
    /// server. `-1` is too, when the check used a real password.
    pub fn is_healthy(&self) -> bool {
        self.results.iter().all(|&(_, code)| {
            code != FALL_THROUGH && !(self.password_set && code == AUTH_REFUSED)
        })
    }
}

/// Asks the chat server to verify the healthcheck credentials on every
/// allowed server. The chat server routes that through whatever
/// authenticator is attached, so this checks a running bridge end to end.
pub async fn healthcheck(config: &BridgeConfig) -> Result<HealthReport, BridgeError> {
    let connector = WsConnector::new(peer_settings(config));
    let meta = connector
        .connect(Context::with_secret(config.secret()))
        .await?;

    let allowed = config.allowed_servers();
    let username = config.healthcheck.username.as_str();
    let password = config.healthcheck.password.as_str();
    let mut results = Vec::new();

    let servers = match meta.get_booted_servers().await {
        Ok(servers) => servers,
        Err(e) => {
            meta.close().await;
            return Err(e.into());
        }
    };

    for server in servers {
        let id = match server.known_id() {
            Some(id) => id,
            None => match server.id().await {
                Ok(id) => id,
                Err(e) => {
                    meta.close().await;
                    return Err(e.into());
                }
            },
        };
        if !allowed.is_empty() && !allowed.contains(&id) {
            continue;
        }

        let code = match server.verify_password(username, password).await {
            Ok(code) => code,
            Err(PeerError::Timeout(op)) => {
                warn!(server_id = %id, op, "healthcheck timed out");
                FALL_THROUGH
            }
            Err(e) => {
                meta.close().await;
                return Err(e.into());
            }
        };
        info!(server_id = %id, user = username, code, "healthcheck result");
        results.push((id, code));
    }

    meta.close().await;
    Ok(HealthReport {
        results,
        password_set: !password.is_empty(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(results: &[(i32, i32)], password_set: bool) -> HealthReport {
        HealthReport {
            results: results.iter().map(|&(s, c)| (ServerId(s), c)).collect(),
            password_set,
        }
    }

    #[test]
    fn test_is_healthy_all_verified() {
        assert!(report(&[(1, 1_000_000_042), (2, 1_000_000_042)], true).is_healthy());
    }

    #[test]
    fn test_is_healthy_fall_through_fails() {
        assert!(!report(&[(1, 1_000_000_042), (2, FALL_THROUGH)], false).is_healthy());
    }

    #[test]
    fn test_is_healthy_refused_depends_on_password() {
        assert!(report(&[(1, AUTH_REFUSED)], false).is_healthy());
        assert!(!report(&[(1, AUTH_REFUSED)], true).is_healthy());
    }

    #[test]
    fn test_is_healthy_no_servers() {
        assert!(report(&[], true).is_healthy());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = BridgeConfig::from_toml("[ice]\nport = 0\n").unwrap();
        let err = Bridge::builder(config).build().err().unwrap();
        assert!(err.to_string().contains("ice.port"));
    }
}
