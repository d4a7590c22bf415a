//! [`Transport`] implementation over the link-service WebSocket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use lb_domain::error::{Error, Result};
use lb_protocol::{DisconnectReason, LinkFrame, UpsertKind, WireMessage, PROTOCOL_VERSION};
use lb_session::{
    CloseCause, Connection, Credentials, EventSink, InboundMessage, MessageBody, OutboundRequest,
    SendReceipt, Transport, TransportEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<SendReceipt>>>>>;

/// Opens connections to the link service.
///
/// Create via [`LinkTransportBuilder`](crate::builder::LinkTransportBuilder).
pub struct LinkTransport {
    pub(crate) url: String,
    pub(crate) token: Option<String>,
    pub(crate) session_id: String,
    pub(crate) client_name: String,
    pub(crate) handshake_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) max_frame_bytes: usize,
    pub(crate) recipient_domain: String,
}

impl LinkTransport {
    pub fn builder() -> crate::builder::LinkTransportBuilder {
        crate::builder::LinkTransportBuilder::new()
    }

    /// Full connection URL with auth params.
    fn build_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| Error::Configuration(format!("invalid link url {:?}: {e}", self.url)))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(token) = &self.token {
                query.append_pair("token", token);
            }
            query.append_pair("session_id", &self.session_id);
        }
        Ok(url)
    }

    async fn handshake(
        &self,
        ws: &mut WsStream,
        credentials: Option<Credentials>,
    ) -> Result<String> {
        let hello = LinkFrame::Hello {
            protocol_version: PROTOCOL_VERSION,
            session_id: self.session_id.clone(),
            client: self.client_name.clone(),
            credentials: credentials.map(Credentials::into_value),
        };
        ws.send(Message::Text(serde_json::to_string(&hello)?))
            .await
            .map_err(|e| Error::TransientConnection(format!("sending hello: {e}")))?;

        let welcome = tokio::time::timeout(self.handshake_timeout, async {
            while let Some(msg) = ws.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Ok(LinkFrame::Welcome { service_version }) = serde_json::from_str(&text) {
                            return Ok(service_version);
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        return Err(Error::TransientConnection(format!("link handshake failed: {e}")))
                    }
                }
            }
            Err(Error::TransientConnection(
                "link service closed the connection before welcome".into(),
            ))
        })
        .await;

        match welcome {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no welcome from link service within {}s",
                self.handshake_timeout.as_secs_f32()
            ))),
        }
    }
}

#[async_trait]
impl Transport for LinkTransport {
    async fn open(
        &self,
        credentials: Option<Credentials>,
        events: EventSink,
    ) -> Result<Arc<dyn Connection>> {
        tracing::info!(
            url = %self.url,
            session_id = %self.session_id,
            generation = events.generation(),
            resumed = credentials.is_some(),
            "connecting to link service"
        );

        let (mut ws, _response) = tokio_tungstenite::connect_async(self.build_url()?.as_str())
            .await
            .map_err(|e| Error::TransientConnection(format!("connecting to link service: {e}")))?;

        let service_version = self.handshake(&mut ws, credentials).await?;
        tracing::info!(
            service_version = %service_version,
            session_id = %self.session_id,
            "link service welcomed us"
        );

        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<LinkFrame>(64);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        tokio::spawn(write_loop(sink, outbound_rx, cancel.clone()));
        tokio::spawn(heartbeat(outbound_tx.clone(), self.heartbeat_interval, cancel.clone()));
        tokio::spawn(read_loop(
            stream,
            events,
            outbound_tx.clone(),
            pending.clone(),
            cancel.clone(),
            self.max_frame_bytes,
        ));

        Ok(Arc::new(LinkConnection {
            outbound: outbound_tx,
            pending,
            cancel,
            recipient_domain: self.recipient_domain.clone(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One live link-service connection.
pub struct LinkConnection {
    outbound: mpsc::Sender<LinkFrame>,
    pending: Pending,
    cancel: CancellationToken,
    recipient_domain: String,
}

/// Removes a pending send when its future is dropped (e.g. on timeout).
struct PendingGuard<'a> {
    pending: &'a Pending,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.request_id);
    }
}

#[async_trait]
impl Connection for LinkConnection {
    async fn send(&self, request: &OutboundRequest) -> Result<SendReceipt> {
        if self.cancel.is_cancelled() {
            return Err(Error::Dependency("link connection is closed".into()));
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: request_id.clone(),
        };

        let frame = LinkFrame::Send {
            request_id: request_id.clone(),
            to: address(&request.to, &self.recipient_domain),
            text: request.text.clone(),
        };
        if self.outbound.send(frame).await.is_err() {
            return Err(Error::Dependency("link connection is closed".into()));
        }
        tracing::debug!(request_id = %request_id, "send frame queued");

        let closed = || {
            Error::Dependency("link connection closed before the send was acknowledged".into())
        };
        tokio::select! {
            biased;
            reply = rx => reply.unwrap_or_else(|_| Err(closed())),
            _ = self.cancel.cancelled() => Err(closed()),
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
    }
}

/// Bare recipient ids (digits, optionally with a leading `+`) get the
/// network domain appended; full addresses pass through.
fn address(to: &str, domain: &str) -> String {
    let to = to.trim();
    if to.contains('@') {
        to.to_string()
    } else {
        format!("{}@{domain}", to.trim_start_matches('+'))
    }
}

fn close_cause(reason: DisconnectReason, message: Option<&str>) -> CloseCause {
    let text = match message {
        Some(m) if !m.is_empty() => format!("{}: {m}", reason.as_str()),
        _ => reason.as_str().to_string(),
    };
    if reason.is_terminal() {
        CloseCause::terminal(text)
    } else {
        CloseCause::recoverable(text)
    }
}

fn inbound(message: WireMessage) -> InboundMessage {
    let received_at = if message.timestamp > 0 {
        DateTime::from_timestamp(message.timestamp, 0).unwrap_or_else(Utc::now)
    } else {
        Utc::now()
    };
    InboundMessage {
        sender: message.remote_jid,
        body: MessageBody::from_text(message.text),
        received_at,
        from_me: message.from_me,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    events: EventSink,
    outbound: mpsc::Sender<LinkFrame>,
    pending: Pending,
    cancel: CancellationToken,
    max_frame_bytes: usize,
) {
    let mut closed_by_service = false;
    let mut abandoned = false;

    'frames: loop {
        let msg = tokio::select! {
            m = stream.next() => m,
            _ = cancel.cancelled() => break,
        };
        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "link stream error");
                break;
            }
        };

        if text.len() > max_frame_bytes {
            tracing::warn!(
                bytes = text.len(),
                max = max_frame_bytes,
                "link frame exceeds max_frame_bytes, dropping"
            );
            continue;
        }

        let frame = match serde_json::from_str::<LinkFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "failed to parse link frame");
                continue;
            }
        };

        let mut batch = Vec::new();
        match frame {
            LinkFrame::Qr { token } => batch.push(TransportEvent::Provisioning { token }),
            LinkFrame::CredsUpdate { credentials } => {
                batch.push(TransportEvent::CredentialUpdate(Credentials::new(credentials)))
            }
            LinkFrame::Open { me } => batch.push(TransportEvent::open(me)),
            LinkFrame::Close { reason, message } => {
                tracing::info!(reason = reason.as_str(), "link service reported close");
                closed_by_service = true;
                batch.push(TransportEvent::closed(close_cause(reason, message.as_deref())));
            }
            LinkFrame::Messages {
                upsert: UpsertKind::Notify,
                messages,
            } => batch.extend(
                messages
                    .into_iter()
                    .map(|m| TransportEvent::MessageReceived(inbound(m))),
            ),
            LinkFrame::Messages {
                upsert: UpsertKind::Append,
                messages,
            } => {
                tracing::debug!(count = messages.len(), "ignoring history batch");
            }
            LinkFrame::SendAck {
                request_id,
                message_id,
            } => {
                if let Some(tx) = pending.lock().remove(&request_id) {
                    let _ = tx.send(Ok(SendReceipt { message_id }));
                }
            }
            LinkFrame::SendFailed { request_id, error } => {
                if let Some(tx) = pending.lock().remove(&request_id) {
                    let _ = tx.send(Err(Error::Dependency(format!(
                        "link service rejected send: {error}"
                    ))));
                }
            }
            LinkFrame::Ping { timestamp } => {
                let _ = outbound.send(LinkFrame::Pong { timestamp }).await;
            }
            LinkFrame::Pong { .. } => tracing::trace!("received pong"),
            LinkFrame::Hello { .. } | LinkFrame::Welcome { .. } | LinkFrame::Send { .. } => {
                tracing::debug!("ignoring unexpected link frame");
            }
        }

        for event in batch {
            if !events.emit(event).await {
                abandoned = true;
                break 'frames;
            }
        }
        if closed_by_service {
            break;
        }
    }

    // Outstanding sends fail with "closed before acknowledged".
    pending.lock().clear();
    cancel.cancel();

    if !closed_by_service && !abandoned {
        let cause = CloseCause::recoverable(DisconnectReason::ConnectionLost.as_str());
        events.emit(TransportEvent::closed(cause)).await;
    }
    tracing::debug!(generation = events.generation(), "link reader stopped");
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<LinkFrame>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            f = rx.recv() => match f {
                Some(f) => f,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };
        let json = match serde_json::to_string(&frame) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize link frame");
                continue;
            }
        };
        if sink.send(Message::Text(json)).await.is_err() {
            break;
        }
    }
    cancel.cancel();
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

async fn heartbeat(tx: mpsc::Sender<LinkFrame>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel.cancelled() => break,
        }
        let ping = LinkFrame::Ping {
            timestamp: Utc::now().timestamp_millis(),
        };
        if tx.send(ping).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(token: Option<&str>, url: &str) -> LinkTransport {
        LinkTransport {
            url: url.into(),
            token: token.map(str::to_string),
            session_id: "default".into(),
            client_name: "linkbridge".into(),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            max_frame_bytes: 1024 * 1024,
            recipient_domain: "s.whatsapp.net".into(),
        }
    }

    fn query(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn build_url_with_token() {
        let t = transport(Some("secret"), "ws://localhost:7861/link");
        assert_eq!(
            t.build_url().unwrap().as_str(),
            "ws://localhost:7861/link?token=secret&session_id=default"
        );
    }

    #[test]
    fn build_url_without_token_keeps_existing_query() {
        let t = transport(None, "ws://localhost:7861/link?region=eu");
        assert_eq!(
            t.build_url().unwrap().as_str(),
            "ws://localhost:7861/link?region=eu&session_id=default"
        );
    }

    #[test]
    fn build_url_encodes_reserved_characters() {
        let mut t = transport(Some("a&b=c#d"), "ws://localhost:7861/link");
        t.session_id = "ops team/1".into();
        let url = t.build_url().unwrap();
        assert!(url.fragment().is_none());

        let reparsed = Url::parse(url.as_str()).unwrap();
        assert_eq!(
            query(&reparsed),
            vec![
                ("token".to_string(), "a&b=c#d".to_string()),
                ("session_id".to_string(), "ops team/1".to_string()),
            ]
        );
    }

    #[test]
    fn build_url_rejects_unparseable_url() {
        let t = transport(None, "ws://");
        assert!(matches!(t.build_url(), Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn cancelled_connection_releases_pending_send() {
        let (outbound, mut frames) = mpsc::channel(8);
        let conn = Arc::new(LinkConnection {
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            recipient_domain: "s.whatsapp.net".into(),
        });

        let sender = Arc::clone(&conn);
        let send = tokio::spawn(async move {
            sender.send(&OutboundRequest::new("12345", "hi")).await
        });
        assert!(matches!(frames.recv().await, Some(LinkFrame::Send { .. })));

        // No reader is draining the pending map; only cancellation can wake the send.
        conn.cancel.cancel();
        let err = tokio::time::timeout(Duration::from_millis(500), send)
            .await
            .expect("send still waiting after cancel")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::Dependency(_)));
        assert!(conn.pending.lock().is_empty());
    }

    #[test]
    fn bare_recipients_get_domain() {
        assert_eq!(address("12345", "s.whatsapp.net"), "12345@s.whatsapp.net");
        assert_eq!(address("+12345", "s.whatsapp.net"), "12345@s.whatsapp.net");
        assert_eq!(address("12345@g.us", "s.whatsapp.net"), "12345@g.us");
    }

    #[test]
    fn close_cause_follows_reason() {
        let cause = close_cause(DisconnectReason::LoggedOut, Some("device removed"));
        assert!(cause.is_terminal());
        assert_eq!(cause.reason, "logged_out: device removed");

        let cause = close_cause(DisconnectReason::RestartRequired, None);
        assert!(!cause.is_terminal());
        assert_eq!(cause.reason, "restart_required");
    }

    #[test]
    fn wire_message_without_text_is_media() {
        let msg = inbound(WireMessage {
            remote_jid: "555@s.whatsapp.net".into(),
            from_me: false,
            text: None,
            timestamp: 1_700_000_000,
        });
        assert_eq!(msg.body, MessageBody::Media);
        assert_eq!(msg.received_at.timestamp(), 1_700_000_000);
    }
}
