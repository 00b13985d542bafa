//! The two RPC surfaces the bridge plugs into.
//!
//! The chat server exposes a *meta* object (list servers, register
//! lifecycle callbacks) and one proxy per virtual server (set the
//! authenticator). In the other direction, the bridge exposes an
//! authenticator object per server and one lifecycle callback object.
//!
//! ```text
//!   bridge ── MetaProxy / ServerProxy ──────────────→ chat server
//!   bridge ←── ServerAuthenticator / MetaCallback ─── chat server
//! ```
//!
//! All traits are object-safe (`async_trait`) because the session layer
//! stores them behind `Arc<dyn …>`: which backend sits behind an
//! authenticator is decided per server at runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    AuthenticateReply, AuthenticateRequest, Context, PeerError, RpcFault, ServerId,
    UserId, UserInfo,
};

/// The authenticator object the chat server calls into.
///
/// Every method receives the caller's [`Context`]. An implementation
/// returns `Err` only to refuse the call outright (bad secret); every
/// other outcome is expressed through the return value, using the
/// protocol's numeric codes.
#[async_trait]
pub trait ServerAuthenticator: Send + Sync {
    /// Authenticates a connecting user.
    ///
    /// Returns the external id, display name and groups on success,
    /// `-1` for a wrong password, `-2` to let the server fall back to
    /// its own user database.
    async fn authenticate(
        &self,
        request: AuthenticateRequest,
        ctx: &Context,
    ) -> Result<AuthenticateReply, RpcFault>;

    /// Extra info about a user; `(false, None)` to let the server use its own.
    async fn get_info(
        &self,
        id: UserId,
        ctx: &Context,
    ) -> Result<(bool, Option<UserInfo>), RpcFault>;

    /// Maps a name to an id, `-2` if unknown.
    async fn name_to_id(&self, name: &str, ctx: &Context) -> Result<UserId, RpcFault>;

    /// Maps an id to a name, empty if unknown.
    async fn id_to_name(&self, id: UserId, ctx: &Context) -> Result<String, RpcFault>;

    /// The user's avatar texture, empty if there is none.
    async fn id_to_texture(&self, id: UserId, ctx: &Context)
    -> Result<Vec<u8>, RpcFault>;

    /// Registers a new user. `-2` falls through to the server's database.
    async fn register_user(&self, info: UserInfo, ctx: &Context) -> Result<UserId, RpcFault>;

    /// Unregisters a user. `-1` falls through to the server's database.
    async fn unregister_user(&self, id: UserId, ctx: &Context) -> Result<i32, RpcFault>;

    /// All registered users whose name contains `filter`.
    async fn get_registered_users(
        &self,
        filter: &str,
        ctx: &Context,
    ) -> Result<BTreeMap<UserId, String>, RpcFault>;

    /// Stores extra info about a user. `-1` falls through.
    async fn set_info(&self, id: UserId, info: UserInfo, ctx: &Context)
    -> Result<i32, RpcFault>;

    /// Stores a user's texture. `-1` falls through.
    async fn set_texture(
        &self,
        id: UserId,
        texture: Vec<u8>,
        ctx: &Context,
    ) -> Result<i32, RpcFault>;
}

/// Lifecycle notifications about virtual servers.
#[async_trait]
pub trait MetaCallback: Send + Sync {
    /// A virtual server was started.
    async fn started(&self, server: Arc<dyn ServerProxy>, ctx: &Context)
    -> Result<(), RpcFault>;

    /// A virtual server was stopped.
    async fn stopped(&self, server: Arc<dyn ServerProxy>, ctx: &Context)
    -> Result<(), RpcFault>;
}

/// Handle to one virtual server on the chat server.
#[async_trait]
pub trait ServerProxy: Send + Sync {
    /// Asks the peer for this server's id.
    ///
    /// May fail on a dead connection, like any other remote call.
    async fn id(&self) -> Result<ServerId, PeerError>;

    /// The id this proxy was created for, when it is known locally.
    ///
    /// Never touches the network. Used on paths that must not make a
    /// remote call, such as handling a `stopped` event while the
    /// connection is believed to be down.
    fn known_id(&self) -> Option<ServerId>;

    /// Installs `authenticator` as this server's authenticator.
    async fn set_authenticator(
        &self,
        authenticator: Arc<dyn ServerAuthenticator>,
    ) -> Result<(), PeerError>;

    /// Asks the server to check a name/password pair through its normal
    /// authentication chain (used by the healthcheck).
    async fn verify_password(&self, name: &str, password: &str) -> Result<UserId, PeerError>;

    /// Stops answering calls for this server with the authenticator
    /// installed through this handle. Local only; the chat server is not
    /// told.
    fn release(&self) {}
}

/// Handle to the chat server's meta object.
#[async_trait]
pub trait MetaProxy: Send + Sync {
    /// Every virtual server currently running.
    async fn get_booted_servers(&self) -> Result<Vec<Arc<dyn ServerProxy>>, PeerError>;

    /// Registers a lifecycle callback. Registering the same callback
    /// again is harmless.
    async fn add_callback(&self, callback: Arc<dyn MetaCallback>) -> Result<(), PeerError>;

    /// Tears down the session.
    async fn close(&self);
}

/// Opens an RPC session with the chat server.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Connects, attaching `context` to every outgoing call.
    async fn connect(&self, context: Context) -> Result<Arc<dyn MetaProxy>, PeerError>;
}
