//! # mumblegate
//!
//! External authenticator for Mumble/Murmur servers, backed by a user
//! database.
//!
//! The chat server delegates every login and registered-user lookup on
//! each attached virtual server to this process. Answers come from a
//! per-server backend (PostgreSQL by default). Ids are shifted by a
//! configured offset so they never collide with the chat server's own
//! registrations, and anything the backend doesn't know falls through to
//! the chat server's own database.
//!
//! ## Layers
//!
//! ```text
//! Transport (WebSocket) → Protocol (frames, surface traits)
//!     → Session (attachments, watchdog) → Backend (SQL, hashes, avatars)
//! ```
//!
//! This crate is the top of the stack: configuration, the RPC peer that
//! carries calls both ways, and the [`Bridge`] run loop.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use mumblegate::{Bridge, BridgeConfig};
//!
//! # async fn run() -> Result<(), mumblegate::BridgeError> {
//! let config = BridgeConfig::load(Path::new("mumblegate.toml"))?;
//! let bridge = Bridge::builder(config).build()?;
//! bridge
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! # }
//! ```

pub mod config;
pub mod dispatch;
mod error;
pub mod peer;
pub mod runtime;

pub use config::{BridgeConfig, ConfigError};
pub use dispatch::Dispatcher;
pub use error::BridgeError;
pub use peer::{PeerSettings, WsConnector, WsPeer, WsServer};
pub use runtime::{Bridge, BridgeBuilder, HealthReport, healthcheck};
