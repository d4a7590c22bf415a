//! Inbound message handling.

use std::sync::Arc;

use async_trait::async_trait;

use lb_domain::config::RelayConfig;

use crate::types::{InboundMessage, OutboundRequest};

/// Receives every live inbound message that is not a self-echo.
///
/// Returning a request makes the session send it through the active
/// connection; send failures are logged and dropped.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &InboundMessage) -> Option<OutboundRequest>;
}

/// Replies to every sender with a fixed text.
#[derive(Debug, Clone)]
pub struct AutoReply {
    text: String,
}

impl AutoReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl MessageHandler for AutoReply {
    async fn handle(&self, message: &InboundMessage) -> Option<OutboundRequest> {
        tracing::info!(sender = %message.sender, body = %message.body, "inbound message");
        if self.text.trim().is_empty() {
            return None;
        }
        Some(OutboundRequest::new(message.sender.clone(), self.text.clone()))
    }
}

/// Logs and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

#[async_trait]
impl MessageHandler for NoopHandler {
    async fn handle(&self, message: &InboundMessage) -> Option<OutboundRequest> {
        tracing::info!(sender = %message.sender, body = %message.body, "inbound message");
        None
    }
}

pub fn handler_from_config(cfg: &RelayConfig) -> Arc<dyn MessageHandler> {
    if cfg.auto_reply {
        Arc::new(AutoReply::new(cfg.reply_text.clone()))
    } else {
        Arc::new(NoopHandler)
    }
}
