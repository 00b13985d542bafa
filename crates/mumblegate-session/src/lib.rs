//! Session management for mumblegate.
//!
//! This crate keeps the bridge's authenticators installed on the chat
//! server:
//!
//! 1. **Adaptation**: [`ProtocolAdapter`] puts a backend behind the RPC
//!    authenticator surface, with id offsets and protocol codes
//! 2. **Containment**: [`CallGuard`] checks the shared secret on every
//!    inbound call and turns backend errors and panics into fallbacks
//! 3. **Tracking**: [`SessionManager`] attaches, detaches, and re-attaches
//!    authenticators as servers start, stop, and the connection drops
//!
//! # How it fits in the stack
//!
//! ```text
//! Bridge binary (above)  ← connects, runs the watchdog, handles signals
//!     ↕
//! Session Layer (this crate)  ← attachments and protocol adaptation
//!     ↕
//! Backend Layer (below)  ← users and passwords
//! ```

mod adapter;
mod callback;
mod config;
mod error;
mod guard;
mod manager;
mod state;

pub use adapter::ProtocolAdapter;
pub use callback::LifecycleCallback;
pub use config::{ErrorPolicy, ManagedServer, ServerProfile, SessionConfig};
pub use error::SessionError;
pub use guard::CallGuard;
pub use manager::SessionManager;
pub use state::{AttachmentRecord, SessionState};
