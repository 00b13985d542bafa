//! The RPC session with the chat server, over one WebSocket.
//!
//! Both directions share the connection. Outbound calls are matched to
//! their replies by sequence number through a pending-call table; inbound
//! calls are each answered on their own task so a slow database lookup
//! never holds up the reader.
//!
//! ```text
//!            ┌──────────── reader task ────────────┐
//!  socket ──→│ Reply{seq} → pending[seq].send()    │
//!            │ Call{seq}  → spawn(dispatch → Reply)│
//!            └─────────────────────────────────────┘
//!  call() ──→ pending.insert(seq) → send Call{seq} → await reply / timeout
//! ```
//!
//! When the connection drops, every pending call fails with
//! [`PeerError::Unreachable`] and the next outbound call dials again. The
//! session manager's watchdog makes such a call every period, which is
//! what heals a dropped session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use mumblegate_protocol::{
    Call, Codec, Context, Frame, JsonCodec, MetaCallback, MetaProxy, Outcome, PeerConnector,
    PeerError, ProtocolError, ReplyValue, RpcFault, ServerAuthenticator, ServerId, ServerProxy,
    UserId,
};
use mumblegate_transport::{Connection, Transport, WebSocketConnection, WebSocketTransport};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::dispatch::Dispatcher;

/// Where and how to reach the chat server.
#[derive(Debug, Clone)]
pub struct PeerSettings {
    /// `ws://host:port/path`
    pub url: String,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
}

/// One live connection plus the calls waiting on it.
struct Link {
    conn: WebSocketConnection,
    pending: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
}

impl Link {
    fn new(conn: WebSocketConnection) -> Self {
        Self {
            conn,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, seq: u64) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.pending().insert(seq, tx);
        rx
    }

    fn complete(&self, seq: u64, outcome: Outcome) -> bool {
        match self.pending().remove(&seq) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    fn forget(&self, seq: u64) {
        self.pending().remove(&seq);
    }

    /// Drops every waiter; their receivers see the connection as lost.
    fn fail_all(&self) -> usize {
        let mut pending = self.pending();
        let n = pending.len();
        pending.clear();
        n
    }

    fn is_live(&self) -> bool {
        !self.conn.is_closed()
    }
}

/// The bridge's side of the RPC session.
///
/// Implements [`MetaProxy`] directly; per-server handles are
/// [`WsServer`]s sharing this peer.
pub struct WsPeer {
    me: Weak<WsPeer>,
    transport: WebSocketTransport,
    codec: JsonCodec,
    context: Context,
    call_timeout: Duration,
    link: Mutex<Option<Arc<Link>>>,
    /// Serializes dialing so concurrent callers share one connection.
    dialing: tokio::sync::Mutex<()>,
    next_seq: AtomicU64,
    dispatcher: Dispatcher,
    closed: AtomicBool,
}

impl WsPeer {
    /// A peer that dials lazily, on the first call.
    pub fn new(settings: PeerSettings, context: Context) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            transport: WebSocketTransport::new(settings.url, settings.connect_timeout),
            codec: JsonCodec,
            context,
            call_timeout: settings.call_timeout,
            link: Mutex::new(None),
            dialing: tokio::sync::Mutex::new(()),
            next_seq: AtomicU64::new(1),
            dispatcher: Dispatcher::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// A peer with its connection already open.
    pub async fn connect(settings: PeerSettings, context: Context) -> Result<Arc<Self>, PeerError> {
        let peer = Self::new(settings, context);
        peer.link().await?;
        Ok(peer)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Whether a connection is currently open. Never dials.
    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// A handle to one virtual server.
    pub fn server(&self, id: ServerId) -> Option<WsServer> {
        self.me.upgrade().map(|peer| WsServer { peer, id })
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<Link>>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current(&self) -> Option<Arc<Link>> {
        self.slot().as_ref().filter(|link| link.is_live()).cloned()
    }

    fn drop_link(&self, link: &Arc<Link>) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, link)) {
            *slot = None;
        }
    }

    /// The live connection, dialing if there is none.
    async fn link(&self) -> Result<Arc<Link>, PeerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PeerError::Unreachable("session closed".into()));
        }
        if let Some(link) = self.current() {
            return Ok(link);
        }

        let _dialing = self.dialing.lock().await;
        if let Some(link) = self.current() {
            return Ok(link);
        }

        debug!(url = self.endpoint(), "dialing chat server");
        let conn = self
            .transport
            .connect()
            .await
            .map_err(|e| PeerError::Unreachable(e.to_string()))?;
        info!(url = self.endpoint(), conn = %conn.id(), "connected to chat server");

        let link = Arc::new(Link::new(conn));
        *self.slot() = Some(Arc::clone(&link));
        tokio::spawn(read_loop(self.me.clone(), Arc::clone(&link), self.codec));
        Ok(link)
    }

    /// Makes one outbound call and waits for its reply.
    pub async fn call(&self, call: Call) -> Result<ReplyValue, PeerError> {
        let op = call.name();
        let link = self.link().await?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let bytes = self.codec.encode_frame(&Frame::Call {
            seq,
            context: self.context.clone(),
            call,
        })?;

        let reply = link.register(seq);
        if let Err(e) = link.conn.send(&bytes).await {
            link.forget(seq);
            self.drop_link(&link);
            return Err(PeerError::Unreachable(e.to_string()));
        }
        trace!(op, seq, "call sent");

        match tokio::time::timeout(self.call_timeout, reply).await {
            Ok(Ok(outcome)) => {
                Result::<ReplyValue, RpcFault>::from(outcome).map_err(PeerError::from)
            }
            Ok(Err(_)) => Err(PeerError::Unreachable(format!("connection lost during {op}"))),
            Err(_) => {
                link.forget(seq);
                warn!(op, seq, timeout_secs = self.call_timeout.as_secs(), "call timed out");
                Err(PeerError::Timeout(op))
            }
        }
    }

    /// Answers one inbound call on `link`.
    async fn answer(self: Arc<Self>, link: Arc<Link>, seq: u64, call: Call, context: Context) {
        let op = call.name();
        let peer = Arc::clone(&self);
        let outcome = self
            .dispatcher
            .dispatch(call, &context, move |id| {
                Arc::new(WsServer { peer, id }) as Arc<dyn ServerProxy>
            })
            .await;

        let bytes = match self.codec.encode_frame(&Frame::Reply { seq, outcome }) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(op, seq, error = %e, "could not encode reply");
                return;
            }
        };
        if let Err(e) = link.conn.send(&bytes).await {
            debug!(op, seq, error = %e, "could not send reply");
        }
    }
}

/// Reads frames until the connection ends.
async fn read_loop(peer: Weak<WsPeer>, link: Arc<Link>, codec: JsonCodec) {
    let conn_id = link.conn.id();
    loop {
        let data = match link.conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!(conn = %conn_id, "chat server closed the connection");
                break;
            }
            Err(e) => {
                debug!(conn = %conn_id, error = %e, "receive failed");
                break;
            }
        };

        let frame = match codec.decode_frame(&data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn = %conn_id, error = %e, "undecodable frame, ignoring");
                continue;
            }
        };

        match frame {
            Frame::Reply { seq, outcome } => {
                if !link.complete(seq, outcome) {
                    debug!(conn = %conn_id, seq, "reply for unknown or expired call");
                }
            }
            Frame::Call { seq, context, call } => {
                let Some(peer) = peer.upgrade() else {
                    break;
                };
                tokio::spawn(peer.answer(Arc::clone(&link), seq, call, context));
            }
        }
    }

    let failed = link.fail_all();
    if let Some(peer) = peer.upgrade() {
        peer.drop_link(&link);
        if peer.closed.load(Ordering::Acquire) {
            debug!(conn = %conn_id, "connection closed");
        } else {
            warn!(conn = %conn_id, pending = failed, "connection to chat server lost");
        }
    }
}

fn unexpected(op: &str, got: &ReplyValue) -> PeerError {
    PeerError::Protocol(ProtocolError::InvalidMessage(format!(
        "{op}: unexpected {} reply",
        got.kind()
    )))
}

#[async_trait]
impl MetaProxy for WsPeer {
    async fn get_booted_servers(&self) -> Result<Vec<Arc<dyn ServerProxy>>, PeerError> {
        let Some(peer) = self.me.upgrade() else {
            return Err(PeerError::Unreachable("session closed".into()));
        };
        match self.call(Call::GetBootedServers).await? {
            ReplyValue::Servers(ids) => Ok(ids
                .into_iter()
                .map(|id| {
                    Arc::new(WsServer {
                        peer: Arc::clone(&peer),
                        id,
                    }) as Arc<dyn ServerProxy>
                })
                .collect()),
            other => Err(unexpected("get_booted_servers", &other)),
        }
    }

    async fn add_callback(&self, callback: Arc<dyn MetaCallback>) -> Result<(), PeerError> {
        self.dispatcher.add_callback(callback);
        match self.call(Call::AddMetaCallback).await? {
            ReplyValue::Unit => Ok(()),
            other => Err(unexpected("add_meta_callback", &other)),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let link = self.slot().take();
        if let Some(link) = link {
            if let Err(e) = link.conn.close().await {
                debug!(error = %e, "error while closing connection");
            }
            link.fail_all();
        }
        info!(url = self.endpoint(), "session with chat server closed");
    }
}

/// Handle to one virtual server, sharing its peer's connection.
#[derive(Clone)]
pub struct WsServer {
    peer: Arc<WsPeer>,
    id: ServerId,
}

impl WsServer {
    pub fn peer(&self) -> &Arc<WsPeer> {
        &self.peer
    }
}

#[async_trait]
impl ServerProxy for WsServer {
    /// The id is carried locally; this only fails when there is no live
    /// connection to ask over.
    async fn id(&self) -> Result<ServerId, PeerError> {
        if self.peer.is_connected() {
            Ok(self.id)
        } else {
            Err(PeerError::Unreachable("not connected".into()))
        }
    }

    fn known_id(&self) -> Option<ServerId> {
        Some(self.id)
    }

    async fn set_authenticator(
        &self,
        authenticator: Arc<dyn ServerAuthenticator>,
    ) -> Result<(), PeerError> {
        // Routable before the peer hears about it, so a call arriving right
        // after the reply finds its authenticator.
        self.peer.dispatcher.set_authenticator(self.id, authenticator);
        let result = match self.peer.call(Call::SetAuthenticator { server: self.id }).await {
            Ok(ReplyValue::Unit) => Ok(()),
            Ok(other) => Err(unexpected("set_authenticator", &other)),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.peer.dispatcher.remove_authenticator(self.id);
        }
        result
    }

    async fn verify_password(&self, name: &str, password: &str) -> Result<UserId, PeerError> {
        let call = Call::VerifyPassword {
            server: self.id,
            name: name.to_string(),
            password: password.to_string(),
        };
        match self.peer.call(call).await? {
            ReplyValue::Id(id) | ReplyValue::Code(id) => Ok(id),
            other => Err(unexpected("verify_password", &other)),
        }
    }

    fn release(&self) {
        if self.peer.dispatcher.remove_authenticator(self.id) {
            debug!(server_id = %self.id, "authenticator route removed");
        }
    }
}

/// Opens [`WsPeer`] sessions.
#[derive(Debug, Clone)]
pub struct WsConnector {
    settings: PeerSettings,
}

impl WsConnector {
    pub fn new(settings: PeerSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PeerConnector for WsConnector {
    async fn connect(&self, context: Context) -> Result<Arc<dyn MetaProxy>, PeerError> {
        let peer = WsPeer::connect(self.settings.clone(), context).await?;
        Ok(peer)
    }
}
