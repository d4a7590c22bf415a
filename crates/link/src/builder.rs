//! Builder pattern for constructing a [`LinkTransport`].

use std::time::Duration;

use lb_domain::config::{secret_from_env, LinkConfig};
use lb_domain::error::{Error, Result};

use crate::transport::LinkTransport;

/// Fluent builder for [`LinkTransport`].
///
/// ```rust,no_run
/// # use lb_link::LinkTransportBuilder;
/// let transport = LinkTransportBuilder::new()
///     .url("ws://127.0.0.1:7861/link")
///     .token("secret")
///     .session_id("default")
///     .heartbeat_interval(std::time::Duration::from_secs(30))
///     .build()
///     .unwrap();
/// ```
pub struct LinkTransportBuilder {
    url: String,
    token: Option<String>,
    session_id: String,
    client_name: String,
    handshake_timeout: Duration,
    heartbeat_interval: Duration,
    max_frame_bytes: usize,
    recipient_domain: String,
}

impl LinkTransportBuilder {
    pub fn new() -> Self {
        let defaults = LinkConfig::default();
        Self {
            url: defaults.url.clone(),
            token: None,
            session_id: "default".into(),
            client_name: defaults.client_name.clone(),
            handshake_timeout: defaults.handshake_timeout(),
            heartbeat_interval: defaults.heartbeat_interval(),
            max_frame_bytes: defaults.max_frame_bytes,
            recipient_domain: defaults.recipient_domain,
        }
    }

    /// Populate from the `[link]` config section. The token is read from
    /// the environment variable named by `token_env`.
    pub fn from_config(session_id: &str, cfg: &LinkConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            token: secret_from_env(&cfg.token_env),
            session_id: session_id.to_string(),
            client_name: cfg.client_name.clone(),
            handshake_timeout: cfg.handshake_timeout(),
            heartbeat_interval: cfg.heartbeat_interval(),
            max_frame_bytes: cfg.max_frame_bytes,
            recipient_domain: cfg.recipient_domain.clone(),
        }
    }

    // ── Required ─────────────────────────────────────────────────────

    /// WebSocket URL of the link service (`ws://` or `wss://`).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    // ── Tuning ───────────────────────────────────────────────────────

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    pub fn recipient_domain(mut self, domain: impl Into<String>) -> Self {
        self.recipient_domain = domain.into();
        self
    }

    pub fn build(self) -> Result<LinkTransport> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(Error::Configuration(format!(
                "link url must start with ws:// or wss:// (got {:?})",
                self.url
            )));
        }
        if self.session_id.trim().is_empty() {
            return Err(Error::Configuration("link session_id must not be empty".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::Configuration("link handshake timeout must be > 0".into()));
        }

        Ok(LinkTransport {
            url: self.url,
            token: self.token,
            session_id: self.session_id,
            client_name: self.client_name,
            handshake_timeout: self.handshake_timeout,
            heartbeat_interval: self.heartbeat_interval.max(Duration::from_secs(1)),
            max_frame_bytes: self.max_frame_bytes.max(1024),
            recipient_domain: self.recipient_domain,
        })
    }
}

impl Default for LinkTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}
