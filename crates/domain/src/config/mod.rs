mod cloud;
mod link;
mod observability;
mod relay;
mod server;
mod session;
mod store;
mod webhook;

pub use cloud::*;
pub use link::*;
pub use observability::*;
pub use relay::*;
pub use server::*;
pub use session::*;
pub use store::*;
pub use webhook::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub cloud: CloudApiConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Read a secret from the environment variable named `var`.
///
/// Unset and empty values are both treated as absent.
pub fn secret_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good. Only the shape of
    /// the file is checked here; secrets referenced by `*_env` fields are
    /// resolved (and reported) by the components that use them.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        if self.session.session_id.trim().is_empty() {
            errors.push(ConfigError::error("session.session_id", "session id must not be empty"));
        }
        let rc = &self.session.reconnect;
        if rc.backoff_factor < 1.0 {
            errors.push(ConfigError::error(
                "session.reconnect.backoff_factor",
                "backoff factor must be >= 1.0",
            ));
        }
        if rc.initial_delay_ms == 0 {
            errors.push(ConfigError::error(
                "session.reconnect.initial_delay_ms",
                "a zero delay would hot-loop against the remote endpoint",
            ));
        }
        if rc.initial_delay_ms > rc.max_delay_ms {
            errors.push(ConfigError::error(
                "session.reconnect.max_delay_ms",
                "max delay must be >= initial delay",
            ));
        }
        for (field, value) in [
            ("session.store_timeout_ms", self.session.store_timeout_ms),
            ("session.send_timeout_ms", self.session.send_timeout_ms),
            ("session.connect_timeout_ms", self.session.connect_timeout_ms),
            ("session.close_timeout_ms", self.session.close_timeout_ms),
        ] {
            if value == 0 {
                errors.push(ConfigError::error(field, "timeout must be greater than 0"));
            }
        }
        if self.session.relay_queue == 0 {
            errors.push(ConfigError::error("session.relay_queue", "queue capacity must be > 0"));
        }

        match self.store.backend {
            StoreBackend::File => {
                if self.store.path.as_os_str().is_empty() {
                    errors.push(ConfigError::error("store.path", "path must not be empty"));
                }
            }
            StoreBackend::Mongo => {
                if self.store.mongo_uri_env.is_empty() {
                    errors.push(ConfigError::error(
                        "store.mongo_uri_env",
                        "mongo backend needs the name of the connection-string variable",
                    ));
                }
                if self.store.database.is_empty() {
                    errors.push(ConfigError::error("store.database", "database must not be empty"));
                }
                if self.store.collection.is_empty() {
                    errors.push(ConfigError::error(
                        "store.collection",
                        "collection must not be empty",
                    ));
                }
            }
        }

        if self.link.url.is_empty() {
            errors.push(ConfigError::error("link.url", "link service url must not be empty"));
        } else if !(self.link.url.starts_with("ws://") || self.link.url.starts_with("wss://")) {
            errors.push(ConfigError::error("link.url", "link service url must be ws:// or wss://"));
        }

        if self.relay.auto_reply && self.relay.reply_text.trim().is_empty() {
            errors.push(ConfigError::warning(
                "relay.reply_text",
                "auto_reply is enabled with an empty reply; replies will be skipped",
            ));
        }

        if self.cloud.base_url.is_empty() {
            errors.push(ConfigError::error("cloud.base_url", "base_url must not be empty"));
        }

        errors
    }
}
