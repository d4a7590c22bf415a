//! Transport-to-manager events and the per-connection sink that carries
//! them.

use tokio::sync::mpsc;

use crate::types::{Credentials, InboundMessage};

/// How a closed connection should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Transient loss; the session reconnects with stored credentials.
    Recoverable,
    /// Logged out or revoked; credentials are discarded.
    Terminal,
}

/// Why a connection closed. Classification is made by the transport,
/// which is the only party that understands the network's close codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseCause {
    pub kind: CloseKind,
    pub reason: String,
}

impl CloseCause {
    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self {
            kind: CloseKind::Recoverable,
            reason: reason.into(),
        }
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        Self {
            kind: CloseKind::Terminal,
            reason: reason.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == CloseKind::Terminal
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionChange {
    /// The connection is established and authenticated. `own_id` is the
    /// linked account's identifier when the network reports it.
    Open { own_id: Option<String> },
    Closed(CloseCause),
}

/// Everything a transport can report about one connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A short-lived token to present to an already-authenticated device.
    Provisioning { token: String },
    /// The credential blob changed and must be persisted.
    CredentialUpdate(Credentials),
    ConnectionChanged(ConnectionChange),
    MessageReceived(InboundMessage),
}

impl TransportEvent {
    pub fn open(own_id: Option<String>) -> Self {
        TransportEvent::ConnectionChanged(ConnectionChange::Open { own_id })
    }

    pub fn closed(cause: CloseCause) -> Self {
        TransportEvent::ConnectionChanged(ConnectionChange::Closed(cause))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Provisioning { .. } => "provisioning",
            TransportEvent::CredentialUpdate(_) => "credential_update",
            TransportEvent::ConnectionChanged(ConnectionChange::Open { .. }) => "open",
            TransportEvent::ConnectionChanged(ConnectionChange::Closed(_)) => "closed",
            TransportEvent::MessageReceived(_) => "message",
        }
    }
}

/// Handed to [`Transport::open`](crate::Transport::open). Every event for
/// one connection goes through its sink, in the order it is emitted.
///
/// Each sink is stamped with the generation of the connection attempt it
/// belongs to, so events from a superseded connection are recognisable.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<TransportEvent>,
}

impl EventSink {
    /// Create a sink and the receiving half of its channel.
    pub fn channel(generation: u64, capacity: usize) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { generation, tx }, rx)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event. Returns `false` when the receiver is gone, i.e.
    /// the connection has been abandoned by the session.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
