use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Link service (transport) connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the bridge reaches the messaging network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// WebSocket URL of the link service.
    #[serde(default = "d_url")]
    pub url: String,
    /// Environment variable holding the link service token (sent as the
    /// `token` query parameter).
    #[serde(default = "d_token_env")]
    pub token_env: String,
    /// Client name announced in `hello`.
    #[serde(default = "d_client_name")]
    pub client_name: String,
    #[serde(default = "d_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "d_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Frames larger than this are dropped unparsed.
    #[serde(default = "d_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Appended as `<id>@<domain>` to recipients given without a domain.
    #[serde(default = "d_recipient_domain")]
    pub recipient_domain: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: d_url(),
            token_env: d_token_env(),
            client_name: d_client_name(),
            handshake_timeout_secs: d_handshake_timeout_secs(),
            heartbeat_interval_secs: d_heartbeat_interval_secs(),
            max_frame_bytes: d_max_frame_bytes(),
            recipient_domain: d_recipient_domain(),
        }
    }
}

impl LinkConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

fn d_url() -> String {
    "ws://127.0.0.1:7861/link".into()
}
fn d_token_env() -> String {
    "LB_LINK_TOKEN".into()
}
fn d_client_name() -> String {
    "linkbridge".into()
}
fn d_handshake_timeout_secs() -> u64 {
    10
}
fn d_heartbeat_interval_secs() -> u64 {
    30
}
fn d_max_frame_bytes() -> usize {
    1024 * 1024
}
fn d_recipient_domain() -> String {
    "s.whatsapp.net".into()
}
