//! The lifecycle callback registered with the chat server's meta object.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use mumblegate_protocol::{Context, MetaCallback, RpcFault, ServerProxy};
use tracing::debug;

use crate::{CallGuard, SessionManager};

/// Forwards `started`/`stopped` events to the [`SessionManager`].
///
/// Holds the manager weakly: the manager owns the callback, and the
/// callback must not keep a shut-down manager alive.
pub struct LifecycleCallback {
    manager: Weak<SessionManager>,
    guard: CallGuard,
}

impl LifecycleCallback {
    pub(crate) fn new(manager: Weak<SessionManager>, secret: Option<&str>) -> Self {
        Self {
            manager,
            guard: CallGuard::new(secret, None),
        }
    }
}

#[async_trait]
impl MetaCallback for LifecycleCallback {
    async fn started(&self, server: Arc<dyn ServerProxy>, ctx: &Context) -> Result<(), RpcFault> {
        self.guard.check_secret("started", ctx)?;
        let Some(manager) = self.manager.upgrade() else {
            debug!("started event after shutdown, ignoring");
            return Ok(());
        };
        self.guard
            .contain("started", (), manager.handle_started(server))
            .await;
        Ok(())
    }

    async fn stopped(&self, server: Arc<dyn ServerProxy>, ctx: &Context) -> Result<(), RpcFault> {
        self.guard.check_secret("stopped", ctx)?;
        let Some(manager) = self.manager.upgrade() else {
            debug!("stopped event after shutdown, ignoring");
            return Ok(());
        };
        self.guard
            .contain("stopped", (), manager.handle_stopped(server))
            .await;
        Ok(())
    }
}
