//! RPC contract between mumblegate and the chat server.
//!
//! This crate defines the "language" both sides speak:
//!
//! - **Types** ([`UserId`], [`ServerId`], [`Context`], [`UserInfo`], …):
//!   the values the authenticator extension point passes around.
//! - **Surface** ([`ServerAuthenticator`], [`MetaCallback`],
//!   [`ServerProxy`], [`MetaProxy`], [`PeerConnector`]): the objects
//!   each side exposes to the other.
//! - **Wire** ([`Frame`], [`Call`], [`Outcome`], [`ReplyValue`]): how
//!   calls on those objects travel as messages.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames become bytes.
//! - **Errors** ([`ProtocolError`], [`RpcFault`], [`PeerError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (which servers are attached, which backend answers them). It knows
//! nothing about databases or connections.
//!
//! ```text
//! Transport (bytes) → Protocol (Frame / surface traits) → Session (attachments)
//! ```

mod codec;
mod error;
mod surface;
mod types;
mod wire;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::{PeerError, ProtocolError, RpcFault};
pub use surface::{MetaCallback, MetaProxy, PeerConnector, ServerAuthenticator, ServerProxy};
pub use types::{
    AUTH_REFUSED, AuthenticateReply, AuthenticateRequest, Context, FALL_THROUGH, SECRET_KEY,
    ServerId, UserId, UserInfo, UserInfoField,
};
pub use wire::{Call, Frame, Outcome, ReplyValue};
