//! Builder pattern for constructing a [`SessionManager`].

use std::sync::Arc;

use lb_domain::config::SessionConfig;
use lb_domain::error::{Error, Result};

use crate::manager::SessionManager;
use crate::relay::MessageHandler;
use crate::store::CredentialStore;
use crate::transport::Transport;

/// Fluent builder for [`SessionManager`].
///
/// ```rust,ignore
/// let session = SessionManagerBuilder::new(config.session.clone())
///     .store(create_store(&config.store).await?)
///     .transport(Arc::new(link))
///     .handler(handler_from_config(&config.relay))
///     .build()?;
/// session.start().await?;
/// ```
pub struct SessionManagerBuilder {
    config: SessionConfig,
    store: Option<Arc<dyn CredentialStore>>,
    transport: Option<Arc<dyn Transport>>,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl SessionManagerBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            store: None,
            transport: None,
            handler: None,
        }
    }

    // ── Required ─────────────────────────────────────────────────────

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    // ── Optional ─────────────────────────────────────────────────────

    /// Without a handler, inbound messages are logged and dropped.
    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<SessionManager> {
        if self.config.session_id.trim().is_empty() {
            return Err(Error::Configuration("session_id must not be empty".into()));
        }
        let store = self
            .store
            .ok_or_else(|| Error::Configuration("session manager requires a credential store".into()))?;
        let transport = self
            .transport
            .ok_or_else(|| Error::Configuration("session manager requires a transport".into()))?;
        Ok(SessionManager::new(self.config, store, transport, self.handler))
    }
}
