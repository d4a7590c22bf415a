//! Session data model: lifecycle states, the external snapshot, the
//! opaque credential blob and the transient message types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lb_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Internal state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Uninitialized,
    AwaitingLink,
    Active,
    Closed,
}

/// Externally reported status. `Recovering` is `Active` with a reconnect
/// in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Uninitialized,
    AwaitingLink,
    Active,
    Recovering,
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Uninitialized => "Uninitialized",
            SessionStatus::AwaitingLink => "AwaitingLink",
            SessionStatus::Active => "Active",
            SessionStatus::Recovering => "Recovering",
            SessionStatus::Closed => "Closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable view of the session for external polling. Never carries
/// credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub status: SessionStatus,
    /// Present only while `status == AwaitingLink`.
    pub provisioning_token: Option<String>,
    pub last_error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credentials
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opaque authenticated-session blob issued by the transport.
///
/// The manager stores and reloads it verbatim; `Debug` never prints it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(serde_json::Value);

impl Credentials {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Serialized size, used for logging only.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(&self.0).map(|v| v.len()).unwrap_or(0)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Marker used when a message carries no text.
pub const MEDIA_MARKER: &str = "Media/Other";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum MessageBody {
    Text(String),
    Media,
}

impl MessageBody {
    pub fn from_text(text: Option<String>) -> Self {
        match text {
            Some(t) => MessageBody::Text(t),
            None => MessageBody::Media,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageBody::Text(t) => Some(t),
            MessageBody::Media => None,
        }
    }
}

impl fmt::Display for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text().unwrap_or(MEDIA_MARKER))
    }
}

/// A received message. Not persisted: handed to the message handler and
/// discarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    /// Sender / chat identifier; replies go here.
    pub sender: String,
    pub body: MessageBody,
    pub received_at: DateTime<Utc>,
    /// Sent by the linked account itself.
    #[serde(default)]
    pub from_me: bool,
}

impl InboundMessage {
    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: MessageBody::Text(text.into()),
            received_at: Utc::now(),
            from_me: false,
        }
    }
}

/// An outbound text message request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// Recipient identifier.
    #[serde(default)]
    pub to: String,
    /// Message body.
    #[serde(default)]
    pub text: String,
}

impl OutboundRequest {
    pub fn new(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            text: text.into(),
        }
    }

    /// Both recipient and body must be non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.to.trim().is_empty() {
            return Err(Error::Validation("missing 'to' field".into()));
        }
        if self.text.trim().is_empty() {
            return Err(Error::Validation("missing 'text' field".into()));
        }
        Ok(())
    }
}

/// Acknowledgement of a single send attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Whether two account identifiers name the same account.
///
/// Identifiers look like `user[:device]@domain`; the device suffix is
/// ignored and a missing domain matches any domain.
pub fn same_account(a: &str, b: &str) -> bool {
    fn split(id: &str) -> (&str, Option<&str>) {
        let (user, domain) = match id.split_once('@') {
            Some((u, d)) => (u, Some(d)),
            None => (id, None),
        };
        let user = user.split_once(':').map(|(u, _)| u).unwrap_or(user);
        (user, domain)
    }

    let (ua, da) = split(a.trim());
    let (ub, db) = split(b.trim());
    if ua.is_empty() || ua != ub {
        return false;
    }
    match (da, db) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => true,
    }
}
