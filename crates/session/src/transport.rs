//! The seam between the session manager and the messaging network.

use std::sync::Arc;

use async_trait::async_trait;

use lb_domain::error::Result;

use crate::event::EventSink;
use crate::types::{Credentials, OutboundRequest, SendReceipt};

/// Opens client connections to the messaging network.
///
/// `open` returns once the underlying link is established (not
/// necessarily authenticated). Provisioning tokens, credential updates,
/// the `Open` notification and every closure are reported through
/// `events`. A connection whose sink is dropped has been abandoned and
/// should release its resources.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        credentials: Option<Credentials>,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>>;
}

/// A single live client connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one text message. Exactly one attempt; failures are returned,
    /// never retried here.
    async fn send(&self, request: &OutboundRequest) -> Result<SendReceipt>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&self);
}
