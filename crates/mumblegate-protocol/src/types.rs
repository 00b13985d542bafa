//! Core value types of the authenticator RPC contract.
//!
//! These mirror what the chat server's authenticator extension point
//! passes around: numeric user ids with a few reserved negative codes,
//! a per-call context bag that carries the shared secret, and the
//! user-info map the server asks for when it wants more than a name.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A user id as seen by the chat server.
///
/// Ids exposed by the bridge are always `backend id + id_offset`; the
/// negative values below are protocol codes, not users.
pub type UserId = i32;

/// "I don't know this user, use your own database." Also returned when
/// the bridge decides to defer after an internal error.
pub const FALL_THROUGH: UserId = -2;

/// "This user exists and the credentials are wrong." Also the generic
/// "not handled" answer for the write-side calls.
pub const AUTH_REFUSED: UserId = -1;

/// Identifier of one virtual server instance on the chat server.
///
/// Assigned by the peer; the bridge never invents one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ServerId(pub i32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vs-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Context key the shared secret travels under.
pub const SECRET_KEY: &str = "secret";

/// The string map attached to every RPC call.
///
/// The bridge puts the shared secret into the context of each outgoing
/// call, and expects the peer to do the same on every call it makes
/// into the bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<String, String>);

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context carrying `secret`, or an empty one when there is none.
    pub fn with_secret(secret: Option<&str>) -> Self {
        let mut ctx = Self::new();
        if let Some(secret) = secret {
            ctx.insert(SECRET_KEY, secret);
        }
        ctx
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The secret carried by this context, if any.
    pub fn secret(&self) -> Option<&str> {
        self.get(SECRET_KEY)
    }
}

// ---------------------------------------------------------------------------
// User info
// ---------------------------------------------------------------------------

/// Keys of the user-info map.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum UserInfoField {
    UserName,
    UserEmail,
    UserComment,
    UserHash,
    UserPassword,
    UserLastActive,
    UserKdfIterations,
}

/// Extra information about a registered user.
pub type UserInfo = BTreeMap<UserInfoField, String>;

// ---------------------------------------------------------------------------
// authenticate()
// ---------------------------------------------------------------------------

/// Everything the chat server sends when a client tries to log in.
///
/// Certificate data is only trustworthy when `certstrong` is set; the
/// bridge authenticates on name and password alone and keeps the rest
/// for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub name: String,
    pub password: String,
    /// DER-encoded certificate chain the client connected with.
    #[serde(default)]
    pub certificates: Vec<Vec<u8>>,
    /// Hash of the client certificate as the server computes it.
    #[serde(default)]
    pub certhash: String,
    /// True if the certificate chain was valid and signed by a trusted CA.
    #[serde(default)]
    pub certstrong: bool,
}

impl AuthenticateRequest {
    /// A request with just a name and password.
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            certificates: Vec::new(),
            certhash: String::new(),
            certstrong: false,
        }
    }
}

/// The `(id, name, groups)` triple returned by `authenticate`.
///
/// On success `id` is the external user id and `name`/`groups` are set.
/// On any other outcome `id` is [`FALL_THROUGH`] or [`AUTH_REFUSED`] and
/// both options are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateReply {
    pub id: UserId,
    pub name: Option<String>,
    pub groups: Option<Vec<String>>,
}

impl AuthenticateReply {
    pub fn success(id: UserId, name: String, groups: Vec<String>) -> Self {
        Self {
            id,
            name: Some(name),
            groups: Some(groups),
        }
    }

    pub fn fall_through() -> Self {
        Self::code(FALL_THROUGH)
    }

    pub fn refused() -> Self {
        Self::code(AUTH_REFUSED)
    }

    /// A reply carrying only a status code.
    pub fn code(id: UserId) -> Self {
        Self {
            id,
            name: None,
            groups: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.id >= 0
    }
}
