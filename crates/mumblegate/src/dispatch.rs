//! Routes inbound calls from the chat server to local objects.
//!
//! The chat server calls two kinds of object on the bridge: the
//! authenticator installed for a virtual server, and the lifecycle
//! callbacks registered on the meta object. The [`Dispatcher`] keeps both
//! tables and turns one inbound [`Call`] into one [`Outcome`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mumblegate_protocol::{
    Call, Context, MetaCallback, Outcome, ReplyValue, RpcFault, ServerAuthenticator, ServerId,
    ServerProxy,
};
use tracing::{debug, trace};

/// Local objects the chat server can call.
#[derive(Default)]
pub struct Dispatcher {
    authenticators: RwLock<HashMap<ServerId, Arc<dyn ServerAuthenticator>>>,
    callbacks: RwLock<Vec<Arc<dyn MetaCallback>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes calls for `server` to `authenticator`, replacing any
    /// previous one.
    pub fn set_authenticator(&self, server: ServerId, authenticator: Arc<dyn ServerAuthenticator>) {
        self.authenticators
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(server, authenticator);
    }

    pub fn remove_authenticator(&self, server: ServerId) -> bool {
        self.authenticators
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&server)
            .is_some()
    }

    pub fn authenticator(&self, server: ServerId) -> Option<Arc<dyn ServerAuthenticator>> {
        self.authenticators
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&server)
            .cloned()
    }

    /// Registers a lifecycle callback. Returns `false` if this very
    /// callback was already registered.
    pub fn add_callback(&self, callback: Arc<dyn MetaCallback>) -> bool {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        if callbacks.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            return false;
        }
        callbacks.push(callback);
        true
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn callbacks(&self) -> Vec<Arc<dyn MetaCallback>> {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn route(&self, server: ServerId) -> Result<Arc<dyn ServerAuthenticator>, RpcFault> {
        self.authenticator(server)
            .ok_or(RpcFault::UnknownServer { server })
    }

    /// Handles one inbound call.
    ///
    /// `proxy_for` builds the server handle passed to lifecycle callbacks.
    pub async fn dispatch<P>(&self, call: Call, ctx: &Context, proxy_for: P) -> Outcome
    where
        P: FnOnce(ServerId) -> Arc<dyn ServerProxy>,
    {
        let op = call.name();
        trace!(op, server_id = ?call.server(), "inbound call");
        let result = self.dispatch_inner(call, ctx, proxy_for).await;
        if let Err(fault) = &result {
            debug!(op, %fault, "inbound call refused");
        }
        result.into()
    }

    async fn dispatch_inner<P>(
        &self,
        call: Call,
        ctx: &Context,
        proxy_for: P,
    ) -> Result<ReplyValue, RpcFault>
    where
        P: FnOnce(ServerId) -> Arc<dyn ServerProxy>,
    {
        let op = call.name();
        match call {
            Call::Started { server } => {
                let proxy = proxy_for(server);
                for callback in self.callbacks() {
                    callback.started(Arc::clone(&proxy), ctx).await?;
                }
                Ok(ReplyValue::Unit)
            }
            Call::Stopped { server } => {
                let proxy = proxy_for(server);
                for callback in self.callbacks() {
                    callback.stopped(Arc::clone(&proxy), ctx).await?;
                }
                Ok(ReplyValue::Unit)
            }
            Call::Authenticate { server, request } => self
                .route(server)?
                .authenticate(request, ctx)
                .await
                .map(ReplyValue::Authenticate),
            Call::GetInfo { server, id } => {
                let (present, info) = self.route(server)?.get_info(id, ctx).await?;
                Ok(ReplyValue::Info { present, info })
            }
            Call::NameToId { server, name } => {
                self.route(server)?.name_to_id(&name, ctx).await.map(ReplyValue::Id)
            }
            Call::IdToName { server, id } => {
                self.route(server)?.id_to_name(id, ctx).await.map(ReplyValue::Name)
            }
            Call::IdToTexture { server, id } => self
                .route(server)?
                .id_to_texture(id, ctx)
                .await
                .map(ReplyValue::Texture),
            Call::RegisterUser { server, info } => {
                self.route(server)?.register_user(info, ctx).await.map(ReplyValue::Id)
            }
            Call::UnregisterUser { server, id } => self
                .route(server)?
                .unregister_user(id, ctx)
                .await
                .map(ReplyValue::Code),
            Call::GetRegisteredUsers { server, filter } => self
                .route(server)?
                .get_registered_users(&filter, ctx)
                .await
                .map(ReplyValue::Users),
            Call::SetInfo { server, id, info } => {
                self.route(server)?.set_info(id, info, ctx).await.map(ReplyValue::Code)
            }
            Call::SetTexture { server, id, texture } => self
                .route(server)?
                .set_texture(id, texture, ctx)
                .await
                .map(ReplyValue::Code),
            Call::GetBootedServers
            | Call::AddMetaCallback
            | Call::SetAuthenticator { .. }
            | Call::VerifyPassword { .. } => Err(RpcFault::Unsupported { call: op.to_string() }),
        }
    }
}
