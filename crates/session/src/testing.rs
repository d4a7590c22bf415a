//! Test doubles: a scripted transport and an in-memory credential store.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use lb_domain::error::{Error, Result};

use crate::event::{EventSink, TransportEvent};
use crate::transport::{Connection, Transport};
use crate::types::{Credentials, OutboundRequest, SendReceipt};

pub use crate::store::MemoryCredentialStore;

/// A transport driven by the test.
///
/// Every `open` records the credentials it was given and keeps the sink so
/// the test can emit events as if they came from the network.
#[derive(Default)]
pub struct ScriptedTransport {
    sinks: Mutex<Vec<EventSink>>,
    opened_with: Mutex<Vec<Option<Credentials>>>,
    fail_opens: AtomicUsize,
    auto_open: Mutex<Option<Option<String>>>,
    outbound: Arc<Outbound>,
}

#[derive(Default)]
struct Outbound {
    sent: Mutex<Vec<OutboundRequest>>,
    attempts: AtomicUsize,
    fail_sends: AtomicBool,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// When `open` receives stored credentials, immediately report the
    /// connection as open with `own_id`, like a network that accepts the
    /// resumed session.
    pub fn auto_open_with_credentials(&self, own_id: Option<&str>) {
        *self.auto_open.lock() = Some(own_id.map(str::to_string));
    }

    /// Stop reporting `Open` automatically; connections stay pending
    /// until the test emits it.
    pub fn manual_open(&self) {
        *self.auto_open.lock() = None;
    }

    /// Fail the next `n` calls to `open`.
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, on: bool) {
        self.outbound.fail_sends.store(on, Ordering::SeqCst);
    }

    /// Successful opens so far.
    pub fn open_count(&self) -> usize {
        self.sinks.lock().len()
    }

    /// Credentials passed to each successful open, oldest first.
    pub fn credentials_seen(&self) -> Vec<Option<Credentials>> {
        self.opened_with.lock().clone()
    }

    pub fn sink(&self, index: usize) -> Option<EventSink> {
        self.sinks.lock().get(index).cloned()
    }

    /// Emit on the most recent connection. Returns `false` when there is
    /// none or it has been abandoned.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sink = self.sinks.lock().last().cloned();
        match sink {
            Some(sink) => sink.emit(event).await,
            None => false,
        }
    }

    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.outbound.sent.lock().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.outbound.attempts.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.outbound.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(
        &self,
        credentials: Option<Credentials>,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>> {
        let failing = self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::TransientConnection("scripted open failure".into()));
        }

        let auto = self.auto_open.lock().clone();
        if let (Some(own_id), Some(_)) = (auto, credentials.as_ref()) {
            events.emit(TransportEvent::open(own_id)).await;
        }

        self.opened_with.lock().push(credentials);
        self.sinks.lock().push(events);
        Ok(Arc::new(ScriptedConnection {
            outbound: self.outbound.clone(),
        }))
    }
}

struct ScriptedConnection {
    outbound: Arc<Outbound>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&self, request: &OutboundRequest) -> Result<SendReceipt> {
        let n = self.outbound.attempts.fetch_add(1, Ordering::SeqCst);
        if self.outbound.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Dependency("scripted send failure".into()));
        }
        self.outbound.sent.lock().push(request.clone());
        Ok(SendReceipt {
            message_id: Some(format!("msg-{n}")),
        })
    }

    async fn close(&self) {
        self.outbound.closes.fetch_add(1, Ordering::SeqCst);
    }
}
