//! Frames exchanged with the chat server over the RPC connection.
//!
//! Both sides can initiate calls on the same connection, so every frame
//! is either a [`Frame::Call`] or a [`Frame::Reply`], matched up by
//! `seq`. Sequence numbers are per-direction: the bridge numbers its own
//! calls, the peer numbers its own, and a reply echoes the `seq` of the
//! call it answers.
//!
//! ```text
//! { "kind": "call",  "seq": 3, "context": {"secret": "…"},
//!   "call": { "op": "name_to_id", "server": 1, "name": "alice" } }
//! { "kind": "reply", "seq": 3,
//!   "outcome": { "status": "ok", "value": { "type": "id", "value": 1000000042 } } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{AuthenticateReply, AuthenticateRequest, Context, RpcFault, ServerId, UserId, UserInfo};

/// One message on the RPC connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// A request; expects exactly one [`Frame::Reply`] with the same `seq`.
    Call {
        seq: u64,
        #[serde(default)]
        context: Context,
        call: Call,
    },
    /// The answer to an earlier call.
    Reply { seq: u64, outcome: Outcome },
}

/// Every operation that can travel on the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    // -- bridge → chat server ---------------------------------------------
    GetBootedServers,
    AddMetaCallback,
    SetAuthenticator { server: ServerId },
    VerifyPassword {
        server: ServerId,
        name: String,
        password: String,
    },

    // -- chat server → bridge: lifecycle ----------------------------------
    Started { server: ServerId },
    Stopped { server: ServerId },

    // -- chat server → bridge: authenticator ------------------------------
    Authenticate {
        server: ServerId,
        request: AuthenticateRequest,
    },
    GetInfo { server: ServerId, id: UserId },
    NameToId { server: ServerId, name: String },
    IdToName { server: ServerId, id: UserId },
    IdToTexture { server: ServerId, id: UserId },
    RegisterUser { server: ServerId, info: UserInfo },
    UnregisterUser { server: ServerId, id: UserId },
    GetRegisteredUsers { server: ServerId, filter: String },
    SetInfo {
        server: ServerId,
        id: UserId,
        info: UserInfo,
    },
    SetTexture {
        server: ServerId,
        id: UserId,
        texture: Vec<u8>,
    },
}

impl Call {
    /// Operation name, for logs and timeouts.
    pub fn name(&self) -> &'static str {
        match self {
            Call::GetBootedServers => "get_booted_servers",
            Call::AddMetaCallback => "add_meta_callback",
            Call::SetAuthenticator { .. } => "set_authenticator",
            Call::VerifyPassword { .. } => "verify_password",
            Call::Started { .. } => "started",
            Call::Stopped { .. } => "stopped",
            Call::Authenticate { .. } => "authenticate",
            Call::GetInfo { .. } => "get_info",
            Call::NameToId { .. } => "name_to_id",
            Call::IdToName { .. } => "id_to_name",
            Call::IdToTexture { .. } => "id_to_texture",
            Call::RegisterUser { .. } => "register_user",
            Call::UnregisterUser { .. } => "unregister_user",
            Call::GetRegisteredUsers { .. } => "get_registered_users",
            Call::SetInfo { .. } => "set_info",
            Call::SetTexture { .. } => "set_texture",
        }
    }

    /// The virtual server a call is about, if any.
    pub fn server(&self) -> Option<ServerId> {
        match self {
            Call::GetBootedServers | Call::AddMetaCallback => None,
            Call::SetAuthenticator { server }
            | Call::VerifyPassword { server, .. }
            | Call::Started { server }
            | Call::Stopped { server }
            | Call::Authenticate { server, .. }
            | Call::GetInfo { server, .. }
            | Call::NameToId { server, .. }
            | Call::IdToName { server, .. }
            | Call::IdToTexture { server, .. }
            | Call::RegisterUser { server, .. }
            | Call::UnregisterUser { server, .. }
            | Call::GetRegisteredUsers { server, .. }
            | Call::SetInfo { server, .. }
            | Call::SetTexture { server, .. } => Some(*server),
        }
    }
}

/// Result of a call: a value or a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Ok(ReplyValue),
    Fault(RpcFault),
}

impl From<Result<ReplyValue, RpcFault>> for Outcome {
    fn from(result: Result<ReplyValue, RpcFault>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(fault) => Outcome::Fault(fault),
        }
    }
}

impl From<Outcome> for Result<ReplyValue, RpcFault> {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(value) => Ok(value),
            Outcome::Fault(fault) => Err(fault),
        }
    }
}

/// Return values, one shape per family of calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReplyValue {
    Unit,
    Servers(Vec<ServerId>),
    Authenticate(AuthenticateReply),
    Info {
        present: bool,
        info: Option<UserInfo>,
    },
    Id(UserId),
    Name(String),
    Texture(Vec<u8>),
    Users(BTreeMap<UserId, String>),
    Code(i32),
}

impl ReplyValue {
    /// Variant name, for "expected X, got Y" errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ReplyValue::Unit => "unit",
            ReplyValue::Servers(_) => "servers",
            ReplyValue::Authenticate(_) => "authenticate",
            ReplyValue::Info { .. } => "info",
            ReplyValue::Id(_) => "id",
            ReplyValue::Name(_) => "name",
            ReplyValue::Texture(_) => "texture",
            ReplyValue::Users(_) => "users",
            ReplyValue::Code(_) => "code",
        }
    }
}
