//! The SQL backend: users live in a table written by a web application.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::hash;
use crate::{
    AuthenticatedUser, AvatarFetcher, BackendAuthenticator, BackendError, ConnectionManager,
    IdentityStore,
};

/// Backend kind name.
pub const SQL_KIND: &str = "sql";

/// [`BackendAuthenticator`] over an [`IdentityStore`].
pub struct SqlAuthenticator<M: ConnectionManager> {
    store: IdentityStore<M>,
    reserved_names: Vec<String>,
    avatars: Option<AvatarFetcher>,
}

impl<M: ConnectionManager> SqlAuthenticator<M> {
    pub fn new(store: IdentityStore<M>, reserved_names: Vec<String>) -> Self {
        Self {
            store,
            reserved_names,
            avatars: None,
        }
    }

    /// Enables avatar textures.
    pub fn with_avatars(mut self, avatars: AvatarFetcher) -> Self {
        self.avatars = Some(avatars);
        self
    }

    pub fn store(&self) -> &IdentityStore<M> {
        &self.store
    }

    pub fn avatars(&self) -> Option<&AvatarFetcher> {
        self.avatars.as_ref()
    }

    fn is_reserved(&self, name: &str) -> bool {
        self.reserved_names.iter().any(|r| r == name)
    }
}

#[async_trait]
impl<M: ConnectionManager> BackendAuthenticator for SqlAuthenticator<M> {
    fn kind(&self) -> &str {
        SQL_KIND
    }

    async fn authenticate(
        &self,
        name: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>, BackendError> {
        if self.is_reserved(name) {
            debug!(user = name, "forced fall through for reserved name");
            return Ok(None);
        }

        let Some(identity) = self.store.find_by_username(name).await? else {
            info!(user = name, "fall through for unknown user");
            return Ok(None);
        };

        debug!(user = name, scheme = %identity.hashfn, "checking password");
        if !hash::verify(password.as_bytes(), &identity.pwhash, &identity.hashfn) {
            info!(user = name, backend_id = identity.user_id, "failed authentication attempt");
            return Err(BackendError::AuthRefused);
        }

        let shown = identity.display();
        info!(user = %shown, backend_id = identity.user_id, "user authenticated");
        debug!(groups = ?identity.groups, "group memberships");
        Ok(Some(AuthenticatedUser {
            id: identity.user_id,
            name: shown,
            groups: identity.groups,
        }))
    }

    async fn get_id(&self, name: &str) -> Result<Option<i32>, BackendError> {
        if self.is_reserved(name) {
            debug!(user = name, "get_id forced fall through for reserved name");
            return Ok(None);
        }
        let id = self.store.find_by_username(name).await?.map(|i| i.user_id);
        debug!(user = name, backend_id = ?id, "get_id");
        Ok(id)
    }

    async fn get_name(&self, id: i32) -> Result<Option<String>, BackendError> {
        let name = self
            .store
            .find_by_id(id)
            .await?
            .map(|i| i.username)
            .filter(|name| {
                let reserved = self.is_reserved(name);
                if reserved {
                    debug!(backend_id = id, "get_name hit a reserved name");
                }
                !reserved
            });
        debug!(backend_id = id, user = ?name, "get_name");
        Ok(name)
    }

    async fn get_texture(&self, id: i32) -> Result<Option<Vec<u8>>, BackendError> {
        let Some(avatars) = &self.avatars else {
            debug!(backend_id = id, "avatar display disabled");
            return Ok(None);
        };
        let Some(character_id) = self.store.find_character_id(id).await? else {
            debug!(backend_id = id, "no main character, no avatar");
            return Ok(None);
        };
        let Some(url) = avatars.url_for(&character_id) else {
            return Ok(None);
        };
        Ok(avatars.fetch(&url).await)
    }

    async fn get_registered_users(
        &self,
        filter: &str,
    ) -> Result<BTreeMap<i32, String>, BackendError> {
        let mut users = self.store.search(filter).await?;
        users.retain(|_, name| !self.is_reserved(name));
        debug!(filter, count = users.len(), "get_registered_users");
        Ok(users)
    }

    async fn shutdown(&self) {
        info!(backend = SQL_KIND, "closing database pool");
        self.store.close();
    }
}
