use serde::Serialize;

/// Structured trace events emitted across all linkbridge crates.
///
/// Provisioning tokens and credential blobs never appear here; events
/// carry sizes and identifiers only.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionTransition {
        session_id: String,
        from: String,
        to: String,
        cause: String,
    },
    ProvisioningIssued {
        session_id: String,
        token_chars: usize,
    },
    CredentialsPersisted {
        session_id: String,
        bytes: usize,
        duration_ms: u64,
    },
    CredentialsCleared {
        session_id: String,
        reason: String,
    },
    ReconnectScheduled {
        session_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    InboundMessage {
        session_id: String,
        sender: String,
        self_echo: bool,
    },
    OutboundSend {
        session_id: String,
        recipient: String,
        ok: bool,
        duration_ms: u64,
    },
    WebhookReceived {
        object: String,
        messages: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "lb_event");
    }
}
