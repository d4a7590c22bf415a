//! Link protocol: the JSON frames exchanged between the bridge and the
//! link service that holds the actual messaging-network connection.
//!
//! The bridge opens a WebSocket, announces itself with `hello` (carrying
//! any stored credentials), waits for `welcome`, and from then on the
//! service streams lifecycle and message frames while the bridge pushes
//! `send` requests.

use serde::{Deserialize, Serialize};

/// Bumped whenever a frame changes shape incompatibly.
pub const PROTOCOL_VERSION: u32 = 1;

/// WebSocket frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkFrame {
    /// Bridge → Service: initial handshake.
    Hello {
        protocol_version: u32,
        session_id: String,
        client: String,
        /// Stored credentials; `None` starts a fresh link.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<serde_json::Value>,
    },

    /// Service → Bridge: handshake accepted.
    Welcome { service_version: String },

    /// Service → Bridge: a new provisioning token to present as a QR code.
    Qr { token: String },

    /// Service → Bridge: the authenticated session state changed and must
    /// be persisted.
    CredsUpdate { credentials: serde_json::Value },

    /// Service → Bridge: the network connection is authenticated and open.
    Open {
        /// The linked account's own identifier.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        me: Option<String>,
    },

    /// Service → Bridge: the network connection closed.
    Close {
        reason: DisconnectReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Service → Bridge: a batch of messages.
    Messages {
        upsert: UpsertKind,
        messages: Vec<WireMessage>,
    },

    /// Bridge → Service: deliver a text message.
    Send {
        request_id: String,
        to: String,
        text: String,
    },

    /// Service → Bridge: the send was accepted by the network.
    SendAck {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    /// Service → Bridge: the send failed.
    SendFailed { request_id: String, error: String },

    /// Bidirectional: heartbeat.
    Ping { timestamp: i64 },

    /// Bidirectional: heartbeat response.
    Pong { timestamp: i64 },
}

/// Why the network connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    LoggedOut,
    BadSession,
    ConnectionLost,
    ConnectionClosed,
    TimedOut,
    ConnectionReplaced,
    RestartRequired,
    Unavailable,
    #[serde(other)]
    Unknown,
}

impl DisconnectReason {
    /// Terminal causes invalidate the stored credentials; everything else
    /// is retried with the same credentials.
    pub fn is_terminal(self) -> bool {
        matches!(self, DisconnectReason::LoggedOut | DisconnectReason::BadSession)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::LoggedOut => "logged_out",
            DisconnectReason::BadSession => "bad_session",
            DisconnectReason::ConnectionLost => "connection_lost",
            DisconnectReason::ConnectionClosed => "connection_closed",
            DisconnectReason::TimedOut => "timed_out",
            DisconnectReason::ConnectionReplaced => "connection_replaced",
            DisconnectReason::RestartRequired => "restart_required",
            DisconnectReason::Unavailable => "unavailable",
            DisconnectReason::Unknown => "unknown",
        }
    }
}

/// `notify` batches are live traffic; `append` batches are history sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKind {
    Notify,
    Append,
}

/// A single message as delivered by the link service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Chat the message arrived in (reply address).
    pub remote_jid: String,
    /// Sent by the linked account itself (from another device or by us).
    #[serde(default)]
    pub from_me: bool,
    /// Text body; absent for media and other non-text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_tagged_snake_case() {
        let json = serde_json::to_value(LinkFrame::CredsUpdate {
            credentials: serde_json::json!({ "noise": "k" }),
        })
        .unwrap();
        assert_eq!(json["type"], "creds_update");

        let frame: LinkFrame = serde_json::from_str(
            r#"{"type":"close","reason":"logged_out","message":"device removed"}"#,
        )
        .unwrap();
        match frame {
            LinkFrame::Close { reason, message } => {
                assert_eq!(reason, DisconnectReason::LoggedOut);
                assert_eq!(message.as_deref(), Some("device removed"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_disconnect_reason_is_recoverable() {
        let frame: LinkFrame =
            serde_json::from_str(r#"{"type":"close","reason":"stream_errored"}"#).unwrap();
        let LinkFrame::Close { reason, .. } = frame else {
            panic!("expected close");
        };
        assert_eq!(reason, DisconnectReason::Unknown);
        assert!(!reason.is_terminal());
    }

    #[test]
    fn only_logout_and_bad_session_are_terminal() {
        assert!(DisconnectReason::LoggedOut.is_terminal());
        assert!(DisconnectReason::BadSession.is_terminal());
        for r in [
            DisconnectReason::ConnectionLost,
            DisconnectReason::ConnectionClosed,
            DisconnectReason::TimedOut,
            DisconnectReason::ConnectionReplaced,
            DisconnectReason::RestartRequired,
            DisconnectReason::Unavailable,
        ] {
            assert!(!r.is_terminal(), "{} should be recoverable", r.as_str());
        }
    }

    #[test]
    fn hello_omits_absent_credentials() {
        let json = serde_json::to_string(&LinkFrame::Hello {
            protocol_version: PROTOCOL_VERSION,
            session_id: "default".into(),
            client: "linkbridge".into(),
            credentials: None,
        })
        .unwrap();
        assert!(!json.contains("credentials"));
    }

    #[test]
    fn media_message_has_no_text() {
        let msg: WireMessage =
            serde_json::from_str(r#"{"remote_jid":"123@s.whatsapp.net","timestamp":1700000000}"#)
                .unwrap();
        assert!(msg.text.is_none());
        assert!(!msg.from_me);
    }
}
