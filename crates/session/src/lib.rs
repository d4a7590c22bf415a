//! `lb-session` — the connection-session manager.
//!
//! Owns one long-lived logical connection to the messaging network and
//! drives it through provisioning, active operation, transient failure
//! with automatic recovery, and termination. Credentials are persisted
//! through a [`CredentialStore`] on every update so a restarted process
//! resumes an already-linked session without re-provisioning.
//!
//! # Architecture
//!
//! ```text
//!   Transport ──EventSink──▶ ordered event channel ──▶ dispatcher task
//!       ▲                                                  │
//!       │ open / send / close                              ├─▶ CredentialStore (put/delete)
//!       │                                                  ├─▶ Shared state (Mutex)
//!   reconnect worker ◀── Notify (recoverable close) ───────┤
//!                                                          └─▶ relay queue ──▶ MessageHandler
//!
//!   adapters: SessionManager::{start, send, snapshot, stop}
//! ```
//!
//! The dispatcher is the only writer of session state. Adapters read a
//! [`Snapshot`] and call [`SessionManager::send`], which is gated on the
//! session being active.

pub mod builder;
pub mod event;
pub mod manager;
pub mod reconnect;
pub mod relay;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::SessionManagerBuilder;
pub use event::{CloseCause, CloseKind, ConnectionChange, EventSink, TransportEvent};
pub use manager::SessionManager;
pub use reconnect::ReconnectBackoff;
pub use relay::{handler_from_config, AutoReply, MessageHandler, NoopHandler};
pub use store::{create_store, CredentialStore, FileCredentialStore, MongoCredentialStore};
pub use transport::{Connection, Transport};
pub use types::{
    Credentials, InboundMessage, MessageBody, OutboundRequest, SendReceipt, SessionState,
    SessionStatus, Snapshot,
};
