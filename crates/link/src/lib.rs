//! `lb-link` — Transport over a WebSocket to a link service.
//!
//! The link service holds the real messaging-network socket and speaks the
//! [`lb_protocol`] frames. This crate turns those frames into
//! [`TransportEvent`](lb_session::TransportEvent)s for the session manager
//! and turns outbound requests into `send` frames.
//!
//! # Connection flow
//!
//! 1. Connect to `url?token=…&session_id=…`.
//! 2. Send `hello` with the stored credentials (if any).
//! 3. Wait for `welcome` (bounded by the handshake timeout).
//! 4. Spawn the reader, writer and heartbeat tasks and hand the
//!    connection back to the session.
//!
//! Every way the reader can stop ends in exactly one `Closed` event: the
//! service's own `close` frame when it sent one, `connection_lost`
//! otherwise.

pub mod builder;
pub mod transport;

pub use builder::LinkTransportBuilder;
pub use transport::{LinkConnection, LinkTransport};
