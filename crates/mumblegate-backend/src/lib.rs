//! User database backends for mumblegate.
//!
//! This crate answers "who is this user and is the password right?"
//! against an external user database:
//!
//! - **Hash verification** ([`hash::verify`]): the legacy and current
//!   password hash schemes the user table may contain.
//! - **Identity store** ([`IdentityStore`]): read-only lookups over a
//!   connection [`Pool`], with PostgreSQL as the shipped driver.
//! - **Backends** ([`BackendAuthenticator`] trait, [`SqlAuthenticator`]):
//!   the authenticate/lookup contract, in the backend's own id space.
//! - **Registry** ([`BackendRegistry`]): picks a backend implementation
//!   per managed server by kind name.
//!
//! # How it fits in the stack
//!
//! ```text
//! Session Layer (above)  ← adapts backends onto the RPC authenticator surface
//!     ↕
//! Backend Layer (this crate)  ← users, passwords, avatars
//!     ↕
//! Database / HTTP (below)
//! ```

mod backend;
mod error;
pub mod hash;
mod identity;
mod pool;
#[cfg(feature = "postgres")]
mod postgres;
mod registry;
mod settings;
mod sql;
mod store;
mod texture;

pub use backend::{AuthenticatedUser, BackendAuthenticator};
pub use error::{BackendError, DbError};
pub use identity::{Identity, decode_entities, parse_groups};
pub use pool::{ConnectionManager, DbConnection, Pool, PooledConnection, Row, SqlParam, SqlValue};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresConnection, PostgresManager};
pub use registry::{BackendFactory, BackendRegistry, BackendSpec};
pub use settings::{AvatarSettings, DatabaseSettings, SqlBackendSettings};
pub use sql::{SQL_KIND, SqlAuthenticator};
pub use store::IdentityStore;
pub use texture::{AvatarFetcher, CHARID_PLACEHOLDER};
