//! The backend contract: authenticate and look up users in some external
//! user database.
//!
//! A backend works purely in its own id space. Offsetting ids into the chat
//! server's numbering, checking secrets and turning errors into protocol
//! codes all happen a layer up, in the session crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use mumblegate_protocol::UserInfo;

use crate::BackendError;

/// A successfully authenticated user, in backend terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Backend id, before any offset.
    pub id: i32,
    /// Name to show in the chat server.
    pub name: String,
    pub groups: Vec<String>,
}

/// Authenticates users and answers identity lookups for one managed server.
///
/// Implementations must be object-safe: the bridge picks a backend per
/// server at runtime and stores it as `Arc<dyn BackendAuthenticator>`.
///
/// # Outcomes
///
/// | Result | Meaning |
/// |---|---|
/// | `Ok(Some(_))` | found / authenticated |
/// | `Ok(None)` | unknown user |
/// | `Err(AuthRefused)` | user exists, wrong password (`authenticate` only) |
/// | `Err(Unavailable)` | could not answer |
#[async_trait]
pub trait BackendAuthenticator: Send + Sync {
    /// Short name of this backend kind, for logs.
    fn kind(&self) -> &str;

    async fn authenticate(
        &self,
        name: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>, BackendError>;

    /// Backend id for a login name.
    async fn get_id(&self, name: &str) -> Result<Option<i32>, BackendError>;

    /// Login name for a backend id.
    async fn get_name(&self, id: i32) -> Result<Option<String>, BackendError>;

    /// Extra user info. Most backends have none.
    async fn get_info(&self, _id: i32) -> Result<Option<UserInfo>, BackendError> {
        Ok(None)
    }

    /// Avatar image bytes.
    async fn get_texture(&self, _id: i32) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(None)
    }

    /// Users whose name matches `filter`, keyed by backend id.
    async fn get_registered_users(
        &self,
        _filter: &str,
    ) -> Result<BTreeMap<i32, String>, BackendError> {
        Ok(BTreeMap::new())
    }

    /// Releases pooled connections and other resources. Called once, at
    /// shutdown, after the backend is no longer attached anywhere.
    async fn shutdown(&self) {}
}
