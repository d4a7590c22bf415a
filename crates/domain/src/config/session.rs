use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tunables for the connection-session manager.
///
/// Every call the manager makes into the credential store or the
/// transport is bounded by one of the timeouts below, so a stalled
/// collaborator turns into a failure outcome instead of blocking the
/// event dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Stable identifier used as the credential-store key.
    #[serde(default = "d_session_id")]
    pub session_id: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default = "d_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "d_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Upper bound on a single transport open (connect + handshake).
    #[serde(default = "d_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "d_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// Capacity of the inbound queue feeding the message handler.
    #[serde(default = "d_relay_queue")]
    pub relay_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: d_session_id(),
            reconnect: ReconnectConfig::default(),
            store_timeout_ms: d_store_timeout_ms(),
            send_timeout_ms: d_send_timeout_ms(),
            connect_timeout_ms: d_connect_timeout_ms(),
            close_timeout_ms: d_close_timeout_ms(),
            relay_queue: d_relay_queue(),
        }
    }
}

impl SessionConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Reconnect back-off after a recoverable connection loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied after each failed attempt. `1.0` gives a fixed delay.
    #[serde(default = "d_backoff_factor")]
    pub backoff_factor: f64,
    /// Consecutive failures before giving up. `0` retries forever.
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: d_initial_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            backoff_factor: d_backoff_factor(),
            max_attempts: 0,
        }
    }
}

fn d_session_id() -> String {
    "default".into()
}
fn d_store_timeout_ms() -> u64 {
    5_000
}
fn d_send_timeout_ms() -> u64 {
    15_000
}
fn d_connect_timeout_ms() -> u64 {
    20_000
}
fn d_close_timeout_ms() -> u64 {
    5_000
}
fn d_relay_queue() -> usize {
    64
}
fn d_initial_delay_ms() -> u64 {
    1_000
}
fn d_max_delay_ms() -> u64 {
    30_000
}
fn d_backoff_factor() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_retry_forever() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.session_id, "default");
        assert_eq!(cfg.reconnect.max_attempts, 0);
        assert_eq!(cfg.store_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn partial_reconnect_table_keeps_other_defaults() {
        let toml_str = r#"
            session_id = "shop-bot"

            [reconnect]
            backoff_factor = 1.0
        "#;
        let cfg: SessionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.session_id, "shop-bot");
        assert_eq!(cfg.reconnect.backoff_factor, 1.0);
        assert_eq!(cfg.reconnect.initial_delay_ms, 1_000);
        assert_eq!(cfg.send_timeout_ms, 15_000);
    }
}
