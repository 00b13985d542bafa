//! The session manager: owns the connection to the chat server and every
//! authenticator the bridge has installed on it.
//!
//! It is responsible for:
//! - Connecting and registering the lifecycle callback
//! - Attaching an authenticator to each managed virtual server
//! - Detaching when a server stops
//! - The watchdog, which heals everything above after a dropped session
//! - Orderly shutdown
//!
//! # Locking
//!
//! Attachment records live behind one `tokio::sync::Mutex`, held for the
//! whole of every attach, detach and heartbeat pass, including the remote
//! calls made while it is held. Backends are cached per server behind a
//! second mutex, which is only ever taken after the first.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::FutureExt;
use mumblegate_backend::{BackendAuthenticator, BackendRegistry};
use mumblegate_protocol::{Context, MetaCallback, MetaProxy, PeerConnector, ServerId, ServerProxy};
use mumblegate_tick::{Ticker, TickerConfig};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::guard::panic_message;
use crate::{
    AttachmentRecord, LifecycleCallback, ProtocolAdapter, SessionConfig, SessionError,
    SessionState,
};

/// Owns the session with the chat server.
///
/// Always lives in an `Arc`: the lifecycle callback and the watchdog task
/// both need a handle back to it.
///
/// ## Lifecycle
///
/// ```text
/// new() ──→ connect() ──→ spawn_watchdog() ──→ … ──→ shutdown()
///                ↑                │
///                │                ▼
///     started/stopped events   heartbeat() every period
/// ```
pub struct SessionManager {
    config: SessionConfig,
    registry: BackendRegistry,
    state: RwLock<SessionState>,
    meta: RwLock<Option<Arc<dyn MetaProxy>>>,
    callback: Arc<LifecycleCallback>,
    attachments: Mutex<HashMap<ServerId, AttachmentRecord>>,
    backends: Mutex<HashMap<ServerId, Arc<dyn BackendAuthenticator>>>,
    /// Set after a clean watchdog pass; per-server logs drop to `debug`.
    quiet: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    watchdog: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, registry: BackendRegistry) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new_cyclic(|weak| Self {
            callback: Arc::new(LifecycleCallback::new(weak.clone(), config.secret.as_deref())),
            config,
            registry,
            state: RwLock::new(SessionState::Disconnected),
            meta: RwLock::new(None),
            attachments: Mutex::new(HashMap::new()),
            backends: Mutex::new(HashMap::new()),
            quiet: AtomicBool::new(false),
            shutdown_tx,
            watchdog: std::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// The callback object registered with the peer.
    pub fn callback(&self) -> Arc<dyn MetaCallback> {
        self.callback.clone()
    }

    /// The current meta proxy, if connected at least once.
    pub fn meta(&self) -> Option<Arc<dyn MetaProxy>> {
        self.meta.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Ids of every attached server, sorted.
    pub async fn attached_servers(&self) -> Vec<ServerId> {
        let mut ids: Vec<ServerId> = self.attachments.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The record for `server_id`, if attached.
    pub async fn attachment(&self, server_id: ServerId) -> Option<AttachmentRecord> {
        self.attachments.lock().await.get(&server_id).cloned()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state == SessionState::ShuttingDown || *state == next {
            return;
        }
        debug!(from = %*state, to = %next, "session state change");
        *state = next;
    }

    /// Records that the peer is gone. The watchdog reconnects later.
    pub fn mark_disconnected(&self) {
        if self.is_connected() {
            warn!("lost connection to the chat server");
        }
        self.set_state(SessionState::Disconnected);
        self.quiet.store(false, Ordering::Relaxed);
    }

    fn note_peer_failure(&self, err: &SessionError) {
        if err.is_unreachable() {
            self.mark_disconnected();
        }
    }

    // =====================================================================
    // Connect / attach / detach
    // =====================================================================

    /// Opens the session, registers the lifecycle callback and attaches
    /// every booted server on the allow-list.
    ///
    /// # Errors
    /// Any failure to connect, register the callback or list servers.
    /// Failing to attach one server is logged and does not fail the call.
    pub async fn connect(&self, connector: &dyn PeerConnector) -> Result<(), SessionError> {
        if self.state() == SessionState::ShuttingDown {
            return Err(SessionError::ShuttingDown);
        }
        if self.config.secret.is_none() {
            warn!(
                "no shared secret configured, calls between bridge and chat server are not \
                 verified"
            );
        }
        self.set_state(SessionState::Connecting);
        info!("connecting to the chat server");

        let ctx = Context::with_secret(self.config.secret.as_deref());
        let meta = match connector.connect(ctx).await {
            Ok(meta) => meta,
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                return Err(SessionError::Connect(e));
            }
        };
        *self.meta.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&meta));

        let result = self.sync(meta.as_ref(), true).await;
        match &result {
            Ok(()) => {
                self.set_state(SessionState::Connected);
                self.quiet.store(true, Ordering::Relaxed);
                info!("connected to the chat server");
            }
            Err(_) => self.set_state(SessionState::Disconnected),
        }
        result
    }

    /// Installs an authenticator on `server` and records it.
    ///
    /// Reuses the server's backend if one was built before.
    pub async fn attach(&self, server: Arc<dyn ServerProxy>) -> Result<(), SessionError> {
        if self.state() == SessionState::ShuttingDown {
            return Err(SessionError::ShuttingDown);
        }
        let server_id = server.id().await.map_err(SessionError::from).inspect_err(|e| {
            self.note_peer_failure(e);
        })?;
        let mut records = self.attachments.lock().await;
        self.attach_locked(&mut records, server_id, server, true).await
    }

    async fn attach_locked(
        &self,
        records: &mut HashMap<ServerId, AttachmentRecord>,
        server_id: ServerId,
        server: Arc<dyn ServerProxy>,
        verbose: bool,
    ) -> Result<(), SessionError> {
        let adapter = match records.get(&server_id) {
            Some(existing) => Arc::clone(&existing.adapter),
            None => Arc::new(self.build_adapter(server_id).await?),
        };

        if verbose {
            info!(
                server_id = %server_id,
                backend = adapter.backend().kind(),
                "setting authenticator for virtual server"
            );
        } else {
            debug!(server_id = %server_id, "setting authenticator for virtual server");
        }

        let installed: Arc<dyn mumblegate_protocol::ServerAuthenticator> = adapter.clone();
        if let Err(e) = server.set_authenticator(installed).await {
            records.remove(&server_id);
            let err = SessionError::from(e);
            self.note_peer_failure(&err);
            return Err(err);
        }

        records.insert(server_id, AttachmentRecord::new(adapter, server));
        Ok(())
    }

    async fn build_adapter(&self, server_id: ServerId) -> Result<ProtocolAdapter, SessionError> {
        let managed = self.config.managed(server_id);
        let mut backends = self.backends.lock().await;
        let backend = match backends.get(&server_id) {
            Some(backend) => Arc::clone(backend),
            None => {
                let backend = self
                    .registry
                    .build(&managed.backend_spec())
                    .map_err(|source| SessionError::Backend { server_id, source })?;
                info!(server_id = %server_id, kind = backend.kind(), "backend created");
                backends.insert(server_id, Arc::clone(&backend));
                backend
            }
        };
        Ok(ProtocolAdapter::new(
            &managed,
            backend,
            self.config.secret.as_deref(),
            self.config.error_policy,
        ))
    }

    /// Forgets the attachment for `server_id` and stops routing its calls.
    /// The backend is kept for a later re-attach and only shut down with
    /// the manager.
    pub async fn detach(&self, server_id: ServerId) -> bool {
        let removed = self.attachments.lock().await.remove(&server_id);
        match removed {
            Some(record) => {
                record.proxy.release();
                info!(server_id = %server_id, "authenticator detached");
                true
            }
            None => {
                debug!(server_id = %server_id, "detach for server that was not attached");
                false
            }
        }
    }

    // =====================================================================
    // Lifecycle events
    // =====================================================================

    pub(crate) async fn handle_started(&self, server: Arc<dyn ServerProxy>) {
        if self.state() == SessionState::ShuttingDown {
            debug!("started event while shutting down, ignoring");
            return;
        }
        let server_id = match server.id().await {
            Ok(id) => id,
            Err(e) => {
                let err = SessionError::from(e);
                self.note_peer_failure(&err);
                warn!(error = %err, "could not resolve started server");
                return;
            }
        };
        if !self.config.is_allowed(server_id) {
            info!(server_id = %server_id, "virtual server started but is not managed, ignoring");
            return;
        }
        info!(server_id = %server_id, "virtual server started");

        let mut records = self.attachments.lock().await;
        if let Err(e) = self.attach_locked(&mut records, server_id, server, true).await {
            error!(server_id = %server_id, error = %e, "could not attach to started server");
        }
    }

    pub(crate) async fn handle_stopped(&self, server: Arc<dyn ServerProxy>) {
        if !self.is_connected() {
            let known = server.known_id();
            debug!(server_id = ?known, "virtual server stopped while the connection is down");
            if let Some(server_id) = known {
                if let Some(record) = self.attachments.lock().await.remove(&server_id) {
                    record.proxy.release();
                }
            }
            return;
        }

        match server.id().await {
            Ok(server_id) => {
                info!(server_id = %server_id, "virtual server stopped");
                self.detach(server_id).await;
            }
            Err(e) => {
                let err = SessionError::from(e);
                self.note_peer_failure(&err);
                warn!(error = %err, "could not resolve stopped server");
            }
        }
    }

    // =====================================================================
    // Watchdog
    // =====================================================================

    /// One watchdog pass. Never fails: problems are logged and the next
    /// pass tries again.
    pub async fn heartbeat(&self) {
        if self.state() == SessionState::ShuttingDown {
            return;
        }
        let Some(meta) = self.meta() else {
            debug!("watchdog pass before first connect, skipping");
            return;
        };
        let verbose = !self.quiet.load(Ordering::Relaxed);
        let was_connected = self.is_connected();

        match self.sync(meta.as_ref(), verbose).await {
            Ok(()) => {
                if !was_connected {
                    info!("connection to the chat server restored");
                }
                self.set_state(SessionState::Connected);
                self.quiet.store(true, Ordering::Relaxed);
                debug!("watchdog pass complete");
            }
            Err(e) => {
                self.note_peer_failure(&e);
                self.quiet.store(false, Ordering::Relaxed);
                error!(error = %e, "watchdog pass failed");
            }
        }
    }

    /// Registers the callback and brings attachments in line with the
    /// booted servers.
    async fn sync(&self, meta: &dyn MetaProxy, verbose: bool) -> Result<(), SessionError> {
        if verbose {
            info!("registering lifecycle callback");
        }
        meta.add_callback(self.callback()).await?;
        let booted = meta.get_booted_servers().await?;

        let mut records = self.attachments.lock().await;
        let mut seen = HashSet::new();
        for server in booted {
            let server_id = server.id().await?;
            if !self.config.is_allowed(server_id) {
                debug!(server_id = %server_id, "booted server is not managed, skipping");
                continue;
            }
            seen.insert(server_id);
            if let Err(e) = self.attach_locked(&mut records, server_id, server, verbose).await {
                if e.is_unreachable() {
                    return Err(e);
                }
                error!(server_id = %server_id, error = %e, "could not attach authenticator");
            }
        }

        let gone: Vec<ServerId> = records.keys().filter(|id| !seen.contains(id)).copied().collect();
        for server_id in gone {
            if let Some(record) = records.remove(&server_id) {
                record.proxy.release();
            }
            info!(server_id = %server_id, "server no longer booted, attachment dropped");
        }
        Ok(())
    }

    /// Starts the watchdog task. Does nothing if the period is zero or a
    /// watchdog is already running.
    pub fn spawn_watchdog(self: &Arc<Self>) -> bool {
        let config = TickerConfig::with_period(self.config.watchdog);
        if config.period.is_zero() {
            info!("watchdog disabled");
            return false;
        }
        let mut slot = self.watchdog.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }

        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        info!(period_secs = config.period.as_secs(), "watchdog started");
        *slot = Some(tokio::spawn(async move {
            let mut ticker = Ticker::new(config);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.wait_for_tick() => {
                        if let Err(panic) = std::panic::AssertUnwindSafe(manager.heartbeat())
                            .catch_unwind()
                            .await
                        {
                            manager.quiet.store(false, Ordering::Relaxed);
                            error!(panic = panic_message(panic.as_ref()), "watchdog pass panicked");
                        }
                        ticker.record_pass_end();
                    }
                }
            }
            debug!("watchdog stopped");
        }));
        true
    }

    // =====================================================================
    // Shutdown
    // =====================================================================

    /// Stops the watchdog, drops every attachment, shuts every backend
    /// down once and closes the session. Safe to call more than once.
    pub async fn shutdown(&self) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = SessionState::ShuttingDown;
        let _ = self.shutdown_tx.send(true);

        let handle = self.watchdog.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "watchdog task ended abnormally");
            }
        }

        let dropped = {
            let mut records = self.attachments.lock().await;
            let n = records.len();
            for (_, record) in records.drain() {
                record.proxy.release();
            }
            n
        };

        // A factory may hand the same backend to several servers.
        let mut backends: Vec<(ServerId, Arc<dyn BackendAuthenticator>)> = Vec::new();
        for (server_id, backend) in self.backends.lock().await.drain() {
            if !backends.iter().any(|(_, seen)| Arc::ptr_eq(seen, &backend)) {
                backends.push((server_id, backend));
            }
        }
        for (server_id, backend) in &backends {
            debug!(server_id = %server_id, kind = backend.kind(), "shutting down backend");
            backend.shutdown().await;
        }

        let meta = self.meta.write().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(meta) = meta {
            meta.close().await;
        }
        info!(attachments = dropped, backends = backends.len(), "session shut down");
    }
}
