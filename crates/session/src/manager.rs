//! The connection-session manager.
//!
//! One [`SessionManager`] owns one logical session. All transport events
//! flow through a single dispatcher task in emission order; the dispatcher
//! is the only writer of session state, so a credential write always
//! completes before the next event for the same session is applied.
//!
//! Each connection attempt gets a new generation number. Events stamped
//! with an older generation, or arriving after their connection was
//! declared closed, are dropped; this is what keeps a duplicated close
//! notification from starting two reconnects. The one exception is a
//! terminal close for the latest generation: it still ends the session
//! even after that connection already reported a recoverable close.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use lb_domain::config::SessionConfig;
use lb_domain::error::{Error, Result};
use lb_domain::trace::TraceEvent;

use crate::builder::SessionManagerBuilder;
use crate::event::{CloseCause, ConnectionChange, EventSink, TransportEvent};
use crate::reconnect::ReconnectBackoff;
use crate::relay::MessageHandler;
use crate::store::CredentialStore;
use crate::transport::{Connection, Transport};
use crate::types::{
    same_account, Credentials, InboundMessage, OutboundRequest, SendReceipt, SessionState,
    SessionStatus, Snapshot,
};

/// Per-connection event buffer between the transport and the dispatcher.
const EVENT_QUEUE: usize = 256;

struct Envelope {
    generation: u64,
    event: TransportEvent,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    session_id: String,
    config: SessionConfig,
    backoff: ReconnectBackoff,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    handler: Option<Arc<dyn MessageHandler>>,
    shared: Mutex<Shared>,
    events_tx: mpsc::Sender<Envelope>,
    events_rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    /// Serializes `start` and `stop`.
    lifecycle: tokio::sync::Mutex<()>,
}

/// Mutable session state. Never held across an await point.
struct Shared {
    state: SessionState,
    recovering: bool,
    provisioning_token: Option<String>,
    last_error: Option<String>,
    own_identity: Option<String>,
    /// Last blob known to be in the store; identical updates are not rewritten.
    credentials: Option<Credentials>,
    /// A fresh link is open but no credential write has succeeded yet.
    awaiting_first_write: bool,
    generation: u64,
    /// The current generation's connection has not reported a close.
    live: bool,
    connection: Option<Arc<dyn Connection>>,
    run: Option<Run>,
}

/// Workers belonging to one `start()`..`stop()` span.
struct Run {
    cancel: CancellationToken,
    wake: Arc<Notify>,
    attempts: Arc<AtomicU32>,
    relay: Option<mpsc::Sender<InboundMessage>>,
}

impl Shared {
    fn status(&self) -> SessionStatus {
        match self.state {
            SessionState::Uninitialized => SessionStatus::Uninitialized,
            SessionState::AwaitingLink => SessionStatus::AwaitingLink,
            SessionState::Active if self.recovering => SessionStatus::Recovering,
            SessionState::Active => SessionStatus::Active,
            SessionState::Closed => SessionStatus::Closed,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.run.is_some() && self.live && self.generation == generation
    }

    /// A terminal close may follow a recoverable one from the same
    /// connection while its reconnect is still pending.
    fn accepts(&self, generation: u64, event: &TransportEvent) -> bool {
        if self.is_current(generation) {
            return true;
        }
        matches!(
            event,
            TransportEvent::ConnectionChanged(ConnectionChange::Closed(cause)) if cause.is_terminal()
        ) && self.run.is_some()
            && self.generation == generation
    }
}

fn report(session_id: &str, from: SessionStatus, to: SessionStatus, cause: &str) {
    if from == to {
        return;
    }
    tracing::info!(session_id, %from, %to, cause, "session state changed");
    TraceEvent::SessionTransition {
        session_id: session_id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        cause: cause.to_string(),
    }
    .emit();
}

async fn release(session_id: &str, conn: Arc<dyn Connection>, timeout: std::time::Duration) {
    if tokio::time::timeout(timeout, conn.close()).await.is_err() {
        tracing::warn!(session_id, "connection close timed out; abandoning it");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public API
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl SessionManager {
    pub fn builder(config: SessionConfig) -> SessionManagerBuilder {
        SessionManagerBuilder::new(config)
    }

    pub(crate) fn new(
        config: SessionConfig,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Self {
            inner: Arc::new(Inner {
                session_id: config.session_id.clone(),
                backoff: ReconnectBackoff::from_config(&config.reconnect),
                config,
                store,
                transport,
                handler,
                shared: Mutex::new(Shared {
                    state: SessionState::Uninitialized,
                    recovering: false,
                    provisioning_token: None,
                    last_error: None,
                    own_identity: None,
                    credentials: None,
                    awaiting_first_write: false,
                    generation: 0,
                    live: false,
                    connection: None,
                    run: None,
                }),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Load stored credentials and open the first connection.
    ///
    /// Idempotent while running. Fails only when the credential store
    /// cannot be read; a failed connection attempt is handed to the
    /// reconnect worker instead.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let lifecycle = inner.lifecycle.lock().await;
        let running = inner.shared.lock().run.is_some();
        if running {
            tracing::debug!(session_id = %inner.session_id, "start ignored; session already running");
            return Ok(());
        }
        inner.spawn_dispatcher();

        let credentials = match inner.load_credentials().await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(session_id = %inner.session_id, error = %e, "cannot read stored credentials");
                inner.shared.lock().last_error = Some(e.to_string());
                return Err(e);
            }
        };
        tracing::info!(
            session_id = %inner.session_id,
            backend = inner.store.backend(),
            resumed = credentials.is_some(),
            "starting session"
        );

        let cancel = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        let attempts = Arc::new(AtomicU32::new(0));
        let relay = inner.handler.clone().map(|handler| {
            let (tx, rx) = mpsc::channel(inner.config.relay_queue.max(1));
            tokio::spawn(relay_worker(Arc::downgrade(inner), handler, rx, cancel.clone()));
            tx
        });

        let (from, to) = {
            let mut s = inner.shared.lock();
            let from = s.status();
            s.state = SessionState::Uninitialized;
            s.recovering = false;
            s.provisioning_token = None;
            s.last_error = None;
            s.own_identity = None;
            s.credentials = credentials.clone();
            s.run = Some(Run {
                cancel: cancel.clone(),
                wake: wake.clone(),
                attempts: attempts.clone(),
                relay,
            });
            (from, s.status())
        };
        report(&inner.session_id, from, to, "start");

        tokio::spawn(reconnect_worker(
            Arc::downgrade(inner),
            cancel.clone(),
            wake.clone(),
            attempts,
        ));
        drop(lifecycle);

        if let Err(e) = inner.open_connection(credentials, &cancel).await {
            tracing::warn!(session_id = %inner.session_id, error = %e, "initial connection failed; retrying");
            wake.notify_one();
        }
        Ok(())
    }

    /// Send one text message through the active connection.
    ///
    /// Fails with `NotReady` unless the session is `Active` with its
    /// credentials persisted. Transport failures are returned as-is and
    /// never retried.
    pub async fn send(&self, request: OutboundRequest) -> Result<SendReceipt> {
        request.validate()?;
        let inner = &self.inner;
        let conn = {
            let s = inner.shared.lock();
            if s.state != SessionState::Active || s.recovering {
                return Err(Error::NotReady(format!("session is {}", s.status())));
            }
            if s.awaiting_first_write {
                return Err(Error::NotReady(
                    "credentials for the new link have not been persisted yet".into(),
                ));
            }
            s.connection
                .clone()
                .ok_or_else(|| Error::NotReady("no open connection".into()))?
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(inner.config.send_timeout(), conn.send(&request)).await {
            Ok(r) => r,
            Err(_) => Err(Error::Timeout(format!(
                "send exceeded {}ms",
                inner.config.send_timeout_ms
            ))),
        };

        TraceEvent::OutboundSend {
            session_id: inner.session_id.clone(),
            recipient: request.to.clone(),
            ok: result.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        if let Err(e) = &result {
            tracing::warn!(session_id = %inner.session_id, recipient = %request.to, error = %e, "send failed");
        }
        result
    }

    pub fn snapshot(&self) -> Snapshot {
        let s = self.inner.shared.lock();
        let status = s.status();
        Snapshot {
            status,
            provisioning_token: if status == SessionStatus::AwaitingLink {
                s.provisioning_token.clone()
            } else {
                None
            },
            last_error: s.last_error.clone(),
        }
    }

    /// Close the connection and stop reconnecting. Stored credentials are
    /// kept, so a later `start` resumes the same link.
    pub async fn stop(&self) {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        let (conn, run, from, to) = {
            let mut s = inner.shared.lock();
            let from = s.status();
            s.live = false;
            s.state = SessionState::Closed;
            s.recovering = false;
            s.provisioning_token = None;
            (s.connection.take(), s.run.take(), from, s.status())
        };
        if let Some(run) = run {
            run.cancel.cancel();
        }
        if let Some(conn) = conn {
            release(&inner.session_id, conn, inner.config.close_timeout()).await;
        }
        report(&inner.session_id, from, to, "stopped");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection attempts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Inner {
    async fn load_credentials(&self) -> Result<Option<Credentials>> {
        match tokio::time::timeout(self.config.store_timeout(), self.store.get(&self.session_id)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "credential load exceeded {}ms",
                self.config.store_timeout_ms
            ))),
        }
    }

    /// Open a connection for a new generation and install it.
    ///
    /// Events from the transport are buffered until the connection is
    /// installed, so an observed `Active` always has a connection to send
    /// through.
    async fn open_connection(
        self: &Arc<Self>,
        credentials: Option<Credentials>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let fresh = credentials.is_none();
        let (generation, sink, events, from, to) = {
            let mut s = self.shared.lock();
            s.generation += 1;
            s.live = true;
            s.awaiting_first_write = fresh;
            s.credentials = credentials.clone();
            let from = s.status();
            if fresh && s.state == SessionState::Uninitialized {
                s.state = SessionState::AwaitingLink;
            }
            let (sink, events) = EventSink::channel(s.generation, EVENT_QUEUE);
            (s.generation, sink, events, from, s.status())
        };
        report(&self.session_id, from, to, "linking new device");

        let opened = tokio::select! {
            r = tokio::time::timeout(self.config.connect_timeout(), self.transport.open(credentials, sink)) => r,
            _ = cancel.cancelled() => return Ok(()),
        };
        let result = match opened {
            Ok(r) => r,
            Err(_) => Err(Error::Timeout(format!(
                "transport open exceeded {}ms",
                self.config.connect_timeout_ms
            ))),
        };
        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                self.abandon_attempt(generation, &e);
                return Err(e);
            }
        };

        let installed = {
            let mut s = self.shared.lock();
            if s.is_current(generation) && !cancel.is_cancelled() {
                s.connection = Some(conn.clone());
                true
            } else {
                false
            }
        };
        if !installed {
            tracing::debug!(session_id = %self.session_id, generation, "connection superseded before install");
            release(&self.session_id, conn, self.config.close_timeout()).await;
            return Ok(());
        }

        tracing::debug!(session_id = %self.session_id, generation, "connection installed");
        self.forward_events(generation, events);
        Ok(())
    }

    fn abandon_attempt(&self, generation: u64, error: &Error) {
        let (from, to) = {
            let mut s = self.shared.lock();
            if s.generation == generation {
                s.live = false;
            }
            s.last_error = Some(error.to_string());
            let from = s.status();
            if s.state == SessionState::AwaitingLink {
                s.state = SessionState::Uninitialized;
                s.provisioning_token = None;
            }
            (from, s.status())
        };
        report(&self.session_id, from, to, "connection attempt failed");
    }

    fn forward_events(&self, generation: u64, mut events: mpsc::Receiver<TransportEvent>) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(Envelope { generation, event }).await.is_err() {
                    break;
                }
            }
        });
    }

    fn spawn_dispatcher(self: &Arc<Self>) {
        let Some(mut rx) = self.events_rx.lock().take() else {
            return;
        };
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.dispatch(envelope).await;
            }
            tracing::debug!("session event dispatcher stopped");
        });
    }

    async fn give_up(&self, attempts: u32) {
        tracing::error!(session_id = %self.session_id, attempts, "reconnect attempts exhausted; closing session");
        let (conn, run, from, to) = {
            let mut s = self.shared.lock();
            let from = s.status();
            s.live = false;
            s.state = SessionState::Closed;
            s.recovering = false;
            s.provisioning_token = None;
            s.last_error = Some(format!("gave up reconnecting after {attempts} attempts"));
            (s.connection.take(), s.run.take(), from, s.status())
        };
        if let Some(run) = run {
            run.cancel.cancel();
        }
        if let Some(conn) = conn {
            release(&self.session_id, conn, self.config.close_timeout()).await;
        }
        report(&self.session_id, from, to, "reconnect attempts exhausted");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Inner {
    async fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        let Envelope { generation, event } = envelope;
        let current = self.shared.lock().accepts(generation, &event);
        if !current {
            tracing::debug!(
                session_id = %self.session_id,
                generation,
                kind = event.kind(),
                "dropping event from superseded connection"
            );
            return;
        }

        match event {
            TransportEvent::Provisioning { token } => self.on_provisioning(token),
            TransportEvent::CredentialUpdate(credentials) => {
                self.on_credential_update(credentials).await
            }
            TransportEvent::ConnectionChanged(ConnectionChange::Open { own_id }) => {
                self.on_open(own_id)
            }
            TransportEvent::ConnectionChanged(ConnectionChange::Closed(cause)) => {
                self.on_closed(cause).await
            }
            TransportEvent::MessageReceived(message) => self.on_message(message),
        }
    }

    fn on_provisioning(&self, token: String) {
        let token_chars = token.chars().count();
        let transition = {
            let mut s = self.shared.lock();
            if s.state == SessionState::Active && !s.recovering {
                None
            } else {
                let from = s.status();
                s.state = SessionState::AwaitingLink;
                s.recovering = false;
                s.awaiting_first_write = true;
                s.provisioning_token = Some(token);
                Some((from, s.status()))
            }
        };
        let Some((from, to)) = transition else {
            tracing::warn!(session_id = %self.session_id, "provisioning token while active; ignored");
            return;
        };
        report(&self.session_id, from, to, "provisioning token issued");
        TraceEvent::ProvisioningIssued {
            session_id: self.session_id.clone(),
            token_chars,
        }
        .emit();
    }

    async fn on_credential_update(&self, credentials: Credentials) {
        let unchanged = {
            let s = self.shared.lock();
            !s.awaiting_first_write && s.credentials.as_ref() == Some(&credentials)
        };
        if unchanged {
            tracing::debug!(session_id = %self.session_id, "credential update matches stored blob; skipping write");
            return;
        }

        let bytes = credentials.encoded_len();
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.config.store_timeout(),
            self.store.put(&self.session_id, &credentials),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(Error::Timeout(format!(
                "credential write exceeded {}ms",
                self.config.store_timeout_ms
            ))),
        };

        match outcome {
            Ok(()) => {
                {
                    let mut s = self.shared.lock();
                    s.credentials = Some(credentials);
                    s.awaiting_first_write = false;
                }
                TraceEvent::CredentialsPersisted {
                    session_id: self.session_id.clone(),
                    bytes,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
                .emit();
            }
            Err(e) => {
                let e = match e {
                    Error::Dependency(_) | Error::Timeout(_) => e,
                    other => Error::Dependency(other.to_string()),
                };
                tracing::error!(session_id = %self.session_id, error = %e, "failed to persist credential update");
                self.shared.lock().last_error = Some(e.to_string());
            }
        }
    }

    fn on_open(&self, own_id: Option<String>) {
        let (from, to) = {
            let mut s = self.shared.lock();
            let from = s.status();
            s.state = SessionState::Active;
            s.recovering = false;
            s.provisioning_token = None;
            s.last_error = None;
            if own_id.is_some() {
                s.own_identity = own_id;
            }
            if let Some(run) = &s.run {
                run.attempts.store(0, Ordering::SeqCst);
            }
            (from, s.status())
        };
        report(&self.session_id, from, to, "connection open");
    }

    async fn on_closed(&self, cause: CloseCause) {
        if cause.is_terminal() {
            self.terminate(&cause.reason).await;
            return;
        }

        let (conn, wake, from, to) = {
            let mut s = self.shared.lock();
            let from = s.status();
            s.live = false;
            match s.state {
                SessionState::Active => s.recovering = true,
                SessionState::AwaitingLink => {
                    s.state = SessionState::Uninitialized;
                    s.provisioning_token = None;
                }
                SessionState::Uninitialized | SessionState::Closed => {}
            }
            s.last_error = Some(format!("connection closed: {}", cause.reason));
            (
                s.connection.take(),
                s.run.as_ref().map(|r| r.wake.clone()),
                from,
                s.status(),
            )
        };
        report(&self.session_id, from, to, &cause.reason);

        if let Some(conn) = conn {
            let session_id = self.session_id.clone();
            let timeout = self.config.close_timeout();
            tokio::spawn(async move { release(&session_id, conn, timeout).await });
        }
        if let Some(wake) = wake {
            wake.notify_one();
        }
    }

    /// Logged out or revoked: stop everything and forget the credentials.
    async fn terminate(&self, reason: &str) {
        let terminal = Error::TerminalSession(reason.to_string());
        tracing::warn!(session_id = %self.session_id, error = %terminal, "session terminated by the network");
        let (conn, run) = {
            let mut s = self.shared.lock();
            s.live = false;
            s.recovering = false;
            s.provisioning_token = None;
            (s.connection.take(), s.run.take())
        };
        if let Some(run) = run {
            run.cancel.cancel();
        }
        if let Some(conn) = conn {
            release(&self.session_id, conn, self.config.close_timeout()).await;
        }

        let cleared = match tokio::time::timeout(
            self.config.store_timeout(),
            self.store.delete(&self.session_id),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(Error::Timeout(format!(
                "credential delete exceeded {}ms",
                self.config.store_timeout_ms
            ))),
        };

        let (from, to) = {
            let mut s = self.shared.lock();
            let from = s.status();
            s.state = SessionState::Closed;
            s.credentials = None;
            s.own_identity = None;
            s.awaiting_first_write = false;
            s.last_error = Some(match &cleared {
                Ok(()) => terminal.to_string(),
                Err(e) => format!("{terminal}; {e}"),
            });
            (from, s.status())
        };

        match cleared {
            Ok(()) => TraceEvent::CredentialsCleared {
                session_id: self.session_id.clone(),
                reason: reason.to_string(),
            }
            .emit(),
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "failed to delete credentials after termination")
            }
        }
        report(&self.session_id, from, to, reason);
    }

    fn on_message(&self, message: InboundMessage) {
        let (self_echo, relay) = {
            let s = self.shared.lock();
            let echo = message.from_me
                || s
                    .own_identity
                    .as_deref()
                    .is_some_and(|me| same_account(me, &message.sender));
            (echo, s.run.as_ref().and_then(|r| r.relay.clone()))
        };
        TraceEvent::InboundMessage {
            session_id: self.session_id.clone(),
            sender: message.sender.clone(),
            self_echo,
        }
        .emit();

        if self_echo {
            tracing::debug!(session_id = %self.session_id, "dropping self-echo");
            return;
        }
        let Some(relay) = relay else {
            tracing::debug!(session_id = %self.session_id, sender = %message.sender, "no message handler; dropping inbound message");
            return;
        };
        match relay.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(m)) => {
                tracing::warn!(session_id = %self.session_id, sender = %m.sender, "relay queue full; dropping inbound message")
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One per run. Woken on every recoverable close (and on a failed first
/// open); retries with back-off until a connection is installed.
async fn reconnect_worker(
    weak: Weak<Inner>,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    attempts: Arc<AtomicU32>,
) {
    loop {
        tokio::select! {
            _ = wake.notified() => {}
            _ = cancel.cancelled() => break,
        }

        loop {
            let Some(inner) = weak.upgrade() else { return };
            let attempt = attempts.load(Ordering::SeqCst);
            if inner.backoff.should_give_up(attempt) {
                inner.give_up(attempt).await;
                return;
            }
            let delay = inner.backoff.delay_for_attempt(attempt);
            tracing::info!(
                session_id = %inner.session_id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            TraceEvent::ReconnectScheduled {
                session_id: inner.session_id.clone(),
                attempt: attempt + 1,
                delay_ms: delay.as_millis() as u64,
            }
            .emit();
            drop(inner);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return,
            }
            attempts.fetch_add(1, Ordering::SeqCst);

            let Some(inner) = weak.upgrade() else { return };
            let credentials = match inner.load_credentials().await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(session_id = %inner.session_id, error = %e, "cannot reload credentials; retrying");
                    inner.shared.lock().last_error = Some(e.to_string());
                    continue;
                }
            };
            match inner.open_connection(credentials, &cancel).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(session_id = %inner.session_id, error = %e, "reconnect attempt failed");
                    if cancel.is_cancelled() {
                        return;
                    }
                }
            }
        }
    }
    tracing::debug!("reconnect worker stopped");
}

/// Hands queued inbound messages to the handler and sends its replies.
async fn relay_worker(
    weak: Weak<Inner>,
    handler: Arc<dyn MessageHandler>,
    mut rx: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            m = rx.recv() => match m {
                Some(m) => m,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };
        let Some(reply) = handler.handle(&message).await else {
            continue;
        };
        let Some(inner) = weak.upgrade() else { break };
        let session = SessionManager { inner };
        if let Err(e) = session.send(reply).await {
            tracing::warn!(
                session_id = %session.session_id(),
                recipient = %message.sender,
                error = %e,
                "reply not sent"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lb_domain::config::ReconnectConfig;
    use serde_json::json;

    use crate::relay::AutoReply;
    use crate::testing::{MemoryCredentialStore, ScriptedTransport};

    const SID: &str = "default";
    const ME: &str = "111:4@s.whatsapp.net";

    fn fast_config() -> SessionConfig {
        SessionConfig {
            reconnect: ReconnectConfig {
                initial_delay_ms: 10,
                max_delay_ms: 40,
                backoff_factor: 2.0,
                max_attempts: 0,
            },
            store_timeout_ms: 300,
            send_timeout_ms: 300,
            connect_timeout_ms: 300,
            close_timeout_ms: 100,
            ..SessionConfig::default()
        }
    }

    struct Harness {
        session: SessionManager,
        store: Arc<MemoryCredentialStore>,
        transport: Arc<ScriptedTransport>,
    }

    fn harness_with(
        config: SessionConfig,
        store: MemoryCredentialStore,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Harness {
        let store = Arc::new(store);
        let transport = ScriptedTransport::new();
        let mut builder = SessionManager::builder(config)
            .store(store.clone())
            .transport(transport.clone());
        if let Some(handler) = handler {
            builder = builder.handler(handler);
        }
        Harness {
            session: builder.build().unwrap(),
            store,
            transport,
        }
    }

    fn harness(store: MemoryCredentialStore) -> Harness {
        harness_with(fast_config(), store, None)
    }

    fn creds(v: i64) -> Credentials {
        Credentials::new(json!({ "v": v }))
    }

    fn linked(v: i64) -> MemoryCredentialStore {
        MemoryCredentialStore::with_record(SID, creds(v))
    }

    async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_for_status(session: &SessionManager, status: SessionStatus) {
        wait_until(status.as_str(), || session.snapshot().status == status).await;
    }

    /// Linked session that the network accepts immediately.
    async fn active(store: MemoryCredentialStore) -> Harness {
        let h = harness(store);
        h.transport.auto_open_with_credentials(Some(ME));
        h.session.start().await.unwrap();
        wait_for_status(&h.session, SessionStatus::Active).await;
        h
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<InboundMessage>>,
    }

    #[async_trait::async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: &InboundMessage) -> Option<OutboundRequest> {
            self.seen.lock().push(message.clone());
            None
        }
    }

    // ── Linking ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn fresh_link_reports_token_then_becomes_active() {
        let h = harness(MemoryCredentialStore::new());
        h.session.start().await.unwrap();
        assert_eq!(h.transport.credentials_seen(), vec![None]);
        assert_eq!(h.session.snapshot().status, SessionStatus::AwaitingLink);

        assert!(h.transport.emit(TransportEvent::Provisioning { token: "T1".into() }).await);
        wait_until("token", || {
            h.session.snapshot().provisioning_token.as_deref() == Some("T1")
        })
        .await;

        h.transport.emit(TransportEvent::CredentialUpdate(creds(1))).await;
        h.transport.emit(TransportEvent::open(Some(ME.into()))).await;
        wait_for_status(&h.session, SessionStatus::Active).await;

        let snap = h.session.snapshot();
        assert!(snap.provisioning_token.is_none());
        assert!(snap.last_error.is_none());
        assert_eq!(h.store.snapshot(SID), Some(creds(1)));
    }

    #[tokio::test]
    async fn newer_token_replaces_older_one() {
        let h = harness(MemoryCredentialStore::new());
        h.session.start().await.unwrap();
        h.transport.emit(TransportEvent::Provisioning { token: "T1".into() }).await;
        h.transport.emit(TransportEvent::Provisioning { token: "T2".into() }).await;
        wait_until("second token", || {
            h.session.snapshot().provisioning_token.as_deref() == Some("T2")
        })
        .await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let h = active(linked(1)).await;
        h.session.start().await.unwrap();
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test]
    async fn start_fails_only_when_store_is_unreadable() {
        let store = MemoryCredentialStore::new();
        store.fail_reads(true);
        let h = harness(store);

        let err = h.session.start().await.unwrap_err();
        assert!(matches!(err, Error::Dependency(_)));
        assert_eq!(h.transport.open_count(), 0);
        assert_eq!(h.session.snapshot().status, SessionStatus::Uninitialized);
        assert!(h.session.snapshot().last_error.is_some());

        h.store.fail_reads(false);
        h.session.start().await.unwrap();
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test]
    async fn credential_write_lands_before_open_is_applied() {
        let h = harness(MemoryCredentialStore::new());
        h.store.set_write_delay(Some(Duration::from_millis(40)));
        h.session.start().await.unwrap();

        h.transport.emit(TransportEvent::CredentialUpdate(creds(1))).await;
        h.transport.emit(TransportEvent::CredentialUpdate(creds(2))).await;
        h.transport.emit(TransportEvent::open(None)).await;
        wait_for_status(&h.session, SessionStatus::Active).await;

        assert_eq!(h.store.put_count(), 2);
        assert_eq!(h.store.snapshot(SID), Some(creds(2)));
    }

    #[tokio::test]
    async fn fresh_link_blocks_send_until_credentials_persist() {
        let h = harness(MemoryCredentialStore::new());
        h.session.start().await.unwrap();
        h.transport.emit(TransportEvent::open(None)).await;
        wait_for_status(&h.session, SessionStatus::Active).await;

        let req = OutboundRequest::new("12345", "hi");
        assert!(matches!(h.session.send(req.clone()).await, Err(Error::NotReady(_))));

        h.transport.emit(TransportEvent::CredentialUpdate(creds(1))).await;
        let mut receipt = None;
        for _ in 0..200 {
            match h.session.send(req.clone()).await {
                Ok(r) => {
                    receipt = Some(r);
                    break;
                }
                Err(Error::NotReady(_)) => tokio::time::sleep(Duration::from_millis(5)).await,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(receipt.is_some());
        assert_eq!(h.transport.sent(), vec![req]);
    }

    #[tokio::test]
    async fn failed_credential_write_keeps_state() {
        let h = active(linked(1)).await;
        h.store.fail_writes(true);
        h.transport.emit(TransportEvent::CredentialUpdate(creds(2))).await;

        wait_until("write error", || h.session.snapshot().last_error.is_some()).await;
        assert_eq!(h.session.snapshot().status, SessionStatus::Active);
        assert_eq!(h.store.snapshot(SID), Some(creds(1)));
    }

    #[tokio::test]
    async fn unchanged_credentials_are_not_rewritten() {
        let h = active(linked(1)).await;
        h.transport.emit(TransportEvent::CredentialUpdate(creds(1))).await;
        h.transport.emit(TransportEvent::CredentialUpdate(creds(2))).await;
        h.transport.emit(TransportEvent::CredentialUpdate(creds(2))).await;

        wait_until("rotated credentials", || h.store.snapshot(SID) == Some(creds(2))).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.store.put_count(), 1);
    }

    #[tokio::test]
    async fn failed_write_is_retried_on_next_identical_update() {
        let h = active(linked(1)).await;
        h.store.fail_writes(true);
        h.transport.emit(TransportEvent::CredentialUpdate(creds(2))).await;
        wait_until("write error", || h.session.snapshot().last_error.is_some()).await;

        h.store.fail_writes(false);
        h.transport.emit(TransportEvent::CredentialUpdate(creds(2))).await;
        wait_until("retried write", || h.store.snapshot(SID) == Some(creds(2))).await;
        assert_eq!(h.store.put_count(), 1);
    }

    #[tokio::test]
    async fn stalled_credential_write_times_out() {
        let h = active(linked(1)).await;
        h.store.set_write_delay(Some(Duration::from_secs(5)));
        h.transport.emit(TransportEvent::CredentialUpdate(creds(2))).await;

        wait_until("timeout", || {
            h.session
                .snapshot()
                .last_error
                .is_some_and(|e| e.contains("exceeded"))
        })
        .await;
        assert_eq!(h.session.snapshot().status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn provisioning_ignored_while_active() {
        let h = active(linked(1)).await;
        h.transport.emit(TransportEvent::Provisioning { token: "late".into() }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = h.session.snapshot();
        assert_eq!(snap.status, SessionStatus::Active);
        assert!(snap.provisioning_token.is_none());
    }

    // ── Recovery ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn transient_loss_reconnects_with_stored_credentials() {
        let h = active(linked(7)).await;
        h.transport
            .emit(TransportEvent::closed(CloseCause::recoverable("connection_lost")))
            .await;

        wait_until("second open", || h.transport.open_count() == 2).await;
        wait_for_status(&h.session, SessionStatus::Active).await;

        assert_eq!(h.transport.credentials_seen(), vec![Some(creds(7)), Some(creds(7))]);
        assert!(h.session.snapshot().provisioning_token.is_none());
        assert_eq!(h.store.snapshot(SID), Some(creds(7)));
        assert_eq!(h.transport.close_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_close_triggers_one_reconnect() {
        let h = active(linked(1)).await;
        let first = h.transport.sink(0).unwrap();
        first
            .emit(TransportEvent::closed(CloseCause::recoverable("a")))
            .await;
        first
            .emit(TransportEvent::closed(CloseCause::recoverable("b")))
            .await;

        wait_until("reconnect", || h.transport.open_count() == 2).await;
        wait_for_status(&h.session, SessionStatus::Active).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.transport.open_count(), 2);

        // The superseded connection can no longer move the session.
        first
            .emit(TransportEvent::Provisioning { token: "stale".into() })
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.session.snapshot().status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn recovering_session_rejects_sends() {
        let h = active(linked(1)).await;
        h.transport.manual_open();
        h.transport
            .emit(TransportEvent::closed(CloseCause::recoverable("connection_lost")))
            .await;
        wait_until("reconnect", || h.transport.open_count() == 2).await;
        assert_eq!(h.session.snapshot().status, SessionStatus::Recovering);

        let err = h.session.send(OutboundRequest::new("1", "x")).await.unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
        assert_eq!(h.transport.send_attempts(), 0);

        // Credentials rejected during recovery: the network asks for a relink.
        h.transport.emit(TransportEvent::Provisioning { token: "T2".into() }).await;
        wait_for_status(&h.session, SessionStatus::AwaitingLink).await;
        assert_eq!(h.session.snapshot().provisioning_token.as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn loss_during_linking_retries_from_scratch() {
        let h = harness(MemoryCredentialStore::new());
        h.session.start().await.unwrap();
        h.transport.emit(TransportEvent::Provisioning { token: "T1".into() }).await;
        wait_until("token", || h.session.snapshot().provisioning_token.is_some()).await;

        h.transport
            .emit(TransportEvent::closed(CloseCause::recoverable("timed_out")))
            .await;
        wait_until("relink", || h.transport.open_count() == 2).await;
        wait_for_status(&h.session, SessionStatus::AwaitingLink).await;

        assert!(h.session.snapshot().provisioning_token.is_none());
        assert_eq!(h.transport.credentials_seen(), vec![None, None]);
    }

    #[tokio::test]
    async fn failed_open_is_retried() {
        let h = harness(linked(1));
        h.transport.auto_open_with_credentials(Some(ME));
        h.transport.fail_next_opens(2);
        h.session.start().await.unwrap();

        wait_for_status(&h.session, SessionStatus::Active).await;
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut config = fast_config();
        config.reconnect.max_attempts = 2;
        let h = harness_with(config, linked(1), None);
        h.transport.fail_next_opens(100);
        h.session.start().await.unwrap();

        wait_for_status(&h.session, SessionStatus::Closed).await;
        assert!(h
            .session
            .snapshot()
            .last_error
            .is_some_and(|e| e.contains("gave up")));
        assert_eq!(h.store.snapshot(SID), Some(creds(1)));
    }

    fn slow_reconnect_config() -> SessionConfig {
        let mut config = fast_config();
        config.reconnect.initial_delay_ms = 200;
        config.reconnect.max_delay_ms = 400;
        config
    }

    #[tokio::test]
    async fn stop_cancels_pending_reconnect() {
        let h = harness_with(slow_reconnect_config(), linked(1), None);
        h.transport.auto_open_with_credentials(Some(ME));
        h.session.start().await.unwrap();
        wait_for_status(&h.session, SessionStatus::Active).await;

        h.transport
            .emit(TransportEvent::closed(CloseCause::recoverable("connection_lost")))
            .await;
        wait_for_status(&h.session, SessionStatus::Recovering).await;

        h.session.stop().await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.session.snapshot().status, SessionStatus::Closed);
        assert_eq!(h.store.snapshot(SID), Some(creds(1)));
    }

    #[tokio::test]
    async fn terminal_close_cancels_pending_reconnect() {
        let h = harness_with(slow_reconnect_config(), linked(1), None);
        h.transport.auto_open_with_credentials(Some(ME));
        h.session.start().await.unwrap();
        wait_for_status(&h.session, SessionStatus::Active).await;

        let sink = h.transport.sink(0).unwrap();
        sink.emit(TransportEvent::closed(CloseCause::recoverable("connection_lost")))
            .await;
        wait_for_status(&h.session, SessionStatus::Recovering).await;

        sink.emit(TransportEvent::closed(CloseCause::terminal("logged_out")))
            .await;
        wait_for_status(&h.session, SessionStatus::Closed).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.session.snapshot().status, SessionStatus::Closed);
        assert!(h.store.snapshot(SID).is_none());
    }

    // ── Termination ──────────────────────────────────────────────────

    #[tokio::test]
    async fn logout_clears_credentials_and_stops() {
        let h = active(linked(1)).await;
        h.transport
            .emit(TransportEvent::closed(CloseCause::terminal("logged_out")))
            .await;

        wait_for_status(&h.session, SessionStatus::Closed).await;
        assert!(h.store.snapshot(SID).is_none());
        assert_eq!(
            h.session.snapshot().last_error.as_deref(),
            Some("session terminated: logged_out")
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.session.snapshot().status, SessionStatus::Closed);
        let err = h.session.send(OutboundRequest::new("1", "x")).await.unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
    }

    #[tokio::test]
    async fn restart_after_logout_links_fresh() {
        let h = active(linked(1)).await;
        h.transport
            .emit(TransportEvent::closed(CloseCause::terminal("logged_out")))
            .await;
        wait_for_status(&h.session, SessionStatus::Closed).await;

        h.session.start().await.unwrap();
        assert_eq!(h.session.snapshot().status, SessionStatus::AwaitingLink);
        assert_eq!(h.transport.credentials_seen().last(), Some(&None));
    }

    #[tokio::test]
    async fn stop_keeps_credentials_and_allows_restart() {
        let h = active(linked(3)).await;
        h.session.stop().await;

        assert_eq!(h.session.snapshot().status, SessionStatus::Closed);
        assert_eq!(h.transport.close_count(), 1);
        assert_eq!(h.store.snapshot(SID), Some(creds(3)));

        h.session.start().await.unwrap();
        wait_for_status(&h.session, SessionStatus::Active).await;
        assert_eq!(h.transport.credentials_seen(), vec![Some(creds(3)), Some(creds(3))]);
    }

    // ── Sending and relay ────────────────────────────────────────────

    #[tokio::test]
    async fn send_requires_active_session() {
        let h = harness(MemoryCredentialStore::new());
        let req = OutboundRequest::new("12345", "hi");
        assert!(matches!(h.session.send(req.clone()).await, Err(Error::NotReady(_))));

        h.session.start().await.unwrap();
        assert!(matches!(h.session.send(req).await, Err(Error::NotReady(_))));
        assert_eq!(h.transport.send_attempts(), 0);
    }

    #[tokio::test]
    async fn send_validates_before_readiness() {
        let h = harness(MemoryCredentialStore::new());
        let err = h.session.send(OutboundRequest::new("", "hi")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn send_delivers_through_active_connection() {
        let h = active(linked(1)).await;
        let receipt = h
            .session
            .send(OutboundRequest::new("12345", "hi"))
            .await
            .unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("msg-0"));
        assert_eq!(h.transport.sent(), vec![OutboundRequest::new("12345", "hi")]);
    }

    #[tokio::test]
    async fn transport_send_failure_is_not_retried() {
        let h = active(linked(1)).await;
        h.transport.fail_sends(true);
        let err = h.session.send(OutboundRequest::new("1", "x")).await.unwrap_err();
        assert!(matches!(err, Error::Dependency(_)));
        assert_eq!(h.transport.send_attempts(), 1);
        assert_eq!(h.session.snapshot().status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn self_echo_never_reaches_handler() {
        let recorder = Arc::new(Recorder::default());
        let h = harness_with(
            fast_config(),
            linked(1),
            Some(recorder.clone() as Arc<dyn MessageHandler>),
        );
        h.transport.auto_open_with_credentials(Some(ME));
        h.session.start().await.unwrap();
        wait_for_status(&h.session, SessionStatus::Active).await;

        h.transport
            .emit(TransportEvent::MessageReceived(InboundMessage::text(
                "111@s.whatsapp.net",
                "echo",
            )))
            .await;
        let mut mine = InboundMessage::text("333@s.whatsapp.net", "typed on phone");
        mine.from_me = true;
        h.transport.emit(TransportEvent::MessageReceived(mine)).await;
        h.transport
            .emit(TransportEvent::MessageReceived(InboundMessage::text(
                "222@s.whatsapp.net",
                "hello",
            )))
            .await;

        wait_until("delivery", || !recorder.seen.lock().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sender, "222@s.whatsapp.net");
    }

    #[tokio::test]
    async fn auto_reply_answers_sender() {
        let h = harness_with(
            fast_config(),
            linked(1),
            Some(Arc::new(AutoReply::new("thanks")) as Arc<dyn MessageHandler>),
        );
        h.transport.auto_open_with_credentials(Some(ME));
        h.session.start().await.unwrap();
        wait_for_status(&h.session, SessionStatus::Active).await;

        h.transport
            .emit(TransportEvent::MessageReceived(InboundMessage::text(
                "555@s.whatsapp.net",
                "hi there",
            )))
            .await;
        wait_until("reply", || !h.transport.sent().is_empty()).await;
        assert_eq!(
            h.transport.sent(),
            vec![OutboundRequest::new("555@s.whatsapp.net", "thanks")]
        );
    }
}
