//! Adapts a backend onto the authenticator surface the chat server calls.
//!
//! The chat server and the backend number users differently: the server
//! sees `backend_id + id_offset`, so the bridge's users never collide with
//! the server's own registrations. The adapter does that translation and
//! turns backend outcomes into the protocol's codes:
//!
//! | Operation | Found | Unknown | Backend error |
//! |---|---|---|---|
//! | `authenticate` | `(id + offset, name, groups)` | `-2` | `-1` or `-2` (policy) |
//! | `get_info` | `(true, info)` | `(false, None)` | `(false, None)` |
//! | `name_to_id` | `id + offset` | `-2` | `-2` |
//! | `id_to_name` | name | `""` | `""` |
//! | `id_to_texture` | bytes | empty | empty |
//! | `get_registered_users` | `{id + offset: name}` | `{}` | `{}` |
//!
//! A wrong password is `-1` regardless of policy. Registration and the
//! setters are not supported and always fall through to the server's own
//! database.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use mumblegate_backend::{BackendAuthenticator, BackendError};
use mumblegate_protocol::{
    AUTH_REFUSED, AuthenticateReply, AuthenticateRequest, Context, FALL_THROUGH, RpcFault,
    ServerAuthenticator, ServerId, UserId, UserInfo,
};
use tracing::{debug, info};

use crate::{CallGuard, ErrorPolicy, ManagedServer};

/// The authenticator installed on one managed server.
pub struct ProtocolAdapter {
    server_id: ServerId,
    id_offset: i32,
    backend: Arc<dyn BackendAuthenticator>,
    policy: ErrorPolicy,
    guard: CallGuard,
}

impl std::fmt::Debug for ProtocolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolAdapter")
            .field("server_id", &self.server_id)
            .field("id_offset", &self.id_offset)
            .field("backend", &self.backend.kind())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ProtocolAdapter {
    pub fn new(
        server: &ManagedServer,
        backend: Arc<dyn BackendAuthenticator>,
        secret: Option<&str>,
        policy: ErrorPolicy,
    ) -> Self {
        Self {
            server_id: server.id,
            id_offset: server.id_offset,
            backend,
            policy,
            guard: CallGuard::new(secret, Some(server.id)),
        }
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn id_offset(&self) -> i32 {
        self.id_offset
    }

    pub fn backend(&self) -> &Arc<dyn BackendAuthenticator> {
        &self.backend
    }

    /// Backend id → external id. `None` if the sum overflows.
    fn to_external(&self, id: i32) -> Option<UserId> {
        id.checked_add(self.id_offset)
    }

    /// External id → backend id. `None` for ids below the offset, which
    /// belong to the chat server's own users.
    fn to_backend(&self, id: UserId) -> Option<i32> {
        if id < self.id_offset {
            None
        } else {
            id.checked_sub(self.id_offset)
        }
    }

    fn out_of_range(&self, id: i32) -> BackendError {
        BackendError::Unavailable(format!(
            "backend id {id} does not fit with offset {}",
            self.id_offset
        ))
    }
}

#[async_trait]
impl ServerAuthenticator for ProtocolAdapter {
    async fn authenticate(
        &self,
        request: AuthenticateRequest,
        ctx: &Context,
    ) -> Result<AuthenticateReply, RpcFault> {
        let fallback = AuthenticateReply::code(self.policy.auth_code());
        self.guard
            .run("authenticate", ctx, fallback, || async {
                match self.backend.authenticate(&request.name, &request.password).await {
                    Ok(Some(user)) => {
                        let id = self
                            .to_external(user.id)
                            .ok_or_else(|| self.out_of_range(user.id))?;
                        info!(
                            server_id = %self.server_id,
                            login = %request.name,
                            user_id = id,
                            name = %user.name,
                            groups = ?user.groups,
                            "user authenticated"
                        );
                        Ok(AuthenticateReply::success(id, user.name, user.groups))
                    }
                    Ok(None) => {
                        info!(
                            server_id = %self.server_id,
                            login = %request.name,
                            "unknown user, falling through"
                        );
                        Ok(AuthenticateReply::fall_through())
                    }
                    Err(BackendError::AuthRefused) => {
                        info!(
                            server_id = %self.server_id,
                            login = %request.name,
                            "wrong password, refusing"
                        );
                        Ok(AuthenticateReply::refused())
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }

    async fn get_info(
        &self,
        id: UserId,
        ctx: &Context,
    ) -> Result<(bool, Option<UserInfo>), RpcFault> {
        self.guard
            .run("get_info", ctx, (false, None), || async {
                let Some(backend_id) = self.to_backend(id) else {
                    return Ok((false, None));
                };
                Ok(match self.backend.get_info(backend_id).await? {
                    Some(info) => (true, Some(info)),
                    None => (false, None),
                })
            })
            .await
    }

    async fn name_to_id(&self, name: &str, ctx: &Context) -> Result<UserId, RpcFault> {
        self.guard
            .run("name_to_id", ctx, FALL_THROUGH, || async {
                let Some(backend_id) = self.backend.get_id(name).await? else {
                    debug!(server_id = %self.server_id, name, "name not known to backend");
                    return Ok(FALL_THROUGH);
                };
                let id = self.to_external(backend_id).ok_or_else(|| self.out_of_range(backend_id))?;
                debug!(server_id = %self.server_id, name, user_id = id, "name resolved");
                Ok(id)
            })
            .await
    }

    async fn id_to_name(&self, id: UserId, ctx: &Context) -> Result<String, RpcFault> {
        self.guard
            .run("id_to_name", ctx, String::new(), || async {
                let Some(backend_id) = self.to_backend(id) else {
                    return Ok(String::new());
                };
                let name = self.backend.get_name(backend_id).await?.unwrap_or_default();
                debug!(server_id = %self.server_id, user_id = id, name = %name, "id resolved");
                Ok(name)
            })
            .await
    }

    async fn id_to_texture(&self, id: UserId, ctx: &Context) -> Result<Vec<u8>, RpcFault> {
        self.guard
            .run("id_to_texture", ctx, Vec::new(), || async {
                let Some(backend_id) = self.to_backend(id) else {
                    return Ok(Vec::new());
                };
                let texture = self.backend.get_texture(backend_id).await?.unwrap_or_default();
                debug!(
                    server_id = %self.server_id,
                    user_id = id,
                    bytes = texture.len(),
                    "texture lookup"
                );
                Ok(texture)
            })
            .await
    }

    async fn register_user(&self, info: UserInfo, ctx: &Context) -> Result<UserId, RpcFault> {
        self.guard.check_secret("register_user", ctx)?;
        debug!(
            server_id = %self.server_id,
            fields = info.len(),
            "registration not supported, falling through"
        );
        Ok(FALL_THROUGH)
    }

    async fn unregister_user(&self, id: UserId, ctx: &Context) -> Result<i32, RpcFault> {
        self.guard.check_secret("unregister_user", ctx)?;
        debug!(
            server_id = %self.server_id,
            user_id = id,
            "unregistration not supported, falling through"
        );
        Ok(AUTH_REFUSED)
    }

    async fn get_registered_users(
        &self,
        filter: &str,
        ctx: &Context,
    ) -> Result<BTreeMap<UserId, String>, RpcFault> {
        self.guard
            .run("get_registered_users", ctx, BTreeMap::new(), || async {
                let users = self.backend.get_registered_users(filter).await?;
                let mut out = BTreeMap::new();
                for (backend_id, name) in users {
                    match self.to_external(backend_id) {
                        Some(id) => {
                            out.insert(id, name);
                        }
                        None => debug!(
                            server_id = %self.server_id,
                            backend_id,
                            "skipping user outside id range"
                        ),
                    }
                }
                debug!(
                    server_id = %self.server_id,
                    filter,
                    count = out.len(),
                    "registered users listed"
                );
                Ok(out)
            })
            .await
    }

    async fn set_info(&self, id: UserId, _info: UserInfo, ctx: &Context) -> Result<i32, RpcFault> {
        self.guard.check_secret("set_info", ctx)?;
        debug!(
            server_id = %self.server_id,
            user_id = id,
            "set_info not supported, falling through"
        );
        Ok(AUTH_REFUSED)
    }

    async fn set_texture(
        &self,
        id: UserId,
        texture: Vec<u8>,
        ctx: &Context,
    ) -> Result<i32, RpcFault> {
        self.guard.check_secret("set_texture", ctx)?;
        debug!(
            server_id = %self.server_id,
            user_id = id,
            bytes = texture.len(),
            "set_texture not supported, falling through"
        );
        Ok(AUTH_REFUSED)
    }
}
