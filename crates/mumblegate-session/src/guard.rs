//! The checks wrapped around every inbound call.
//!
//! An inbound call is first checked for the shared secret. A call with a
//! bad secret is refused with [`RpcFault::InvalidSecret`] before any
//! backend work starts. Past that point nothing may escape: backend
//! errors and panics are logged and the call is answered with the
//! operation's fallback value.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use mumblegate_backend::BackendError;
use mumblegate_protocol::{Context, RpcFault, ServerId};
use tracing::{error, warn};

/// Secret check plus error and panic containment for one server's calls.
#[derive(Debug, Clone)]
pub struct CallGuard {
    secret: Option<Arc<str>>,
    server_id: Option<ServerId>,
}

impl CallGuard {
    /// A guard for calls about `server_id`, or about no particular server.
    pub fn new(secret: Option<&str>, server_id: Option<ServerId>) -> Self {
        Self {
            secret: secret.map(Arc::from),
            server_id,
        }
    }

    /// Refuses the call unless `ctx` carries the configured secret.
    ///
    /// Always passes when no secret is configured.
    pub fn check_secret(&self, op: &'static str, ctx: &Context) -> Result<(), RpcFault> {
        let Some(expected) = self.secret.as_deref() else {
            return Ok(());
        };
        if ctx.secret() == Some(expected) {
            return Ok(());
        }
        error!(
            server_id = ?self.server_id,
            op,
            "call carried an invalid secret, refusing"
        );
        Err(RpcFault::InvalidSecret)
    }

    /// Runs `call` after the secret check, answering `fallback` if it
    /// fails or panics.
    ///
    /// `call` is only invoked once the secret has been accepted, so a
    /// refused call never reaches the backend.
    pub async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        ctx: &Context,
        fallback: T,
        call: F,
    ) -> Result<T, RpcFault>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        self.check_secret(op, ctx)?;
        match AssertUnwindSafe(call()).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_unavailable() {
                    error!(
                        server_id = ?self.server_id,
                        op,
                        error = %e,
                        "backend unavailable, answering fallback"
                    );
                } else {
                    warn!(
                        server_id = ?self.server_id,
                        op,
                        error = %e,
                        "backend call failed, answering fallback"
                    );
                }
                Ok(fallback)
            }
            Err(panic) => {
                error!(
                    server_id = ?self.server_id,
                    op,
                    panic = panic_message(panic.as_ref()),
                    "backend call panicked, answering fallback"
                );
                Ok(fallback)
            }
        }
    }

    /// Runs `fut`, answering `fallback` if it panics.
    pub async fn contain<T, Fut>(&self, op: &'static str, fallback: T, fut: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(value) => value,
            Err(panic) => {
                error!(
                    server_id = ?self.server_id,
                    op,
                    panic = panic_message(panic.as_ref()),
                    "handler panicked"
                );
                fallback
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
