//! Cloud API webhook: subscription handshake and message ingestion.
//!
//! `GET /webhook` answers the provider's subscription challenge when the
//! `hub.verify_token` matches the configured secret. `POST /webhook`
//! receives message deliveries; when an app secret is configured the body
//! must carry a valid `X-Hub-Signature-256: sha256=<hex>` signature.
//!
//! Delivered messages go to the relay handler in a spawned task so the
//! provider always gets its `200 EVENT_RECEIVED` promptly. Replies are sent
//! through the cloud API client, not the linked session.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use lb_domain::trace::TraceEvent;
use lb_session::{InboundMessage, MessageBody};

use super::api_error;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Only deliveries for this object type carry messages.
pub const BUSINESS_ACCOUNT_OBJECT: &str = "whatsapp_business_account";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    /// Absent on status-only deliveries.
    #[serde(default)]
    pub messages: Vec<CloudMessage>,
}

#[derive(Debug, Deserialize)]
pub struct CloudMessage {
    #[serde(default)]
    pub from: String,
    /// Unix seconds, as a string.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub text: Option<TextBody>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub body: String,
}

impl CloudMessage {
    fn received_at(&self) -> DateTime<Utc> {
        self.timestamp
            .as_deref()
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now)
    }

    fn into_inbound(self) -> InboundMessage {
        InboundMessage {
            received_at: self.received_at(),
            body: MessageBody::from_text(self.text.map(|t| t.body)),
            sender: self.from,
            from_me: false,
        }
    }
}

impl WebhookPayload {
    /// All messages carried by a business-account delivery, in order.
    pub fn into_messages(self) -> Vec<InboundMessage> {
        if self.object != BUSINESS_ACCOUNT_OBJECT {
            return Vec::new();
        }
        self.entry
            .into_iter()
            .flat_map(|e| e.changes)
            .flat_map(|c| c.value.messages)
            .map(CloudMessage::into_inbound)
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params
        .get(&format!("hub.{name}"))
        .or_else(|| params.get(name))
        .map(String::as_str)
}

/// `GET /webhook?hub.mode=subscribe&hub.verify_token=..&hub.challenge=..`
pub async fn verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(expected) = state.verify_token.as_deref() else {
        tracing::error!(
            env = %state.config.webhook.verify_token_env,
            "webhook verification attempted but no verify token is configured"
        );
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "verify token not configured");
    };

    let (Some(mode), Some(token)) = (param(&params, "mode"), param(&params, "verify_token"))
    else {
        return api_error(StatusCode::BAD_REQUEST, "missing mode or verify_token");
    };

    let token_ok = bool::from(token.as_bytes().ct_eq(expected.as_bytes()));
    if mode == "subscribe" && token_ok {
        tracing::info!("webhook verified");
        let challenge = param(&params, "challenge").unwrap_or_default().to_string();
        return (StatusCode::OK, challenge).into_response();
    }

    tracing::warn!(mode = %mode, "webhook verification rejected");
    api_error(StatusCode::FORBIDDEN, "verification failed")
}

/// Check `X-Hub-Signature-256: sha256=<hex>` against the raw body.
pub fn signature_valid(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let sig_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let sig_hex = sig_header.strip_prefix("sha256=").unwrap_or(sig_header);

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());

    computed.as_bytes().ct_eq(sig_hex.as_bytes()).unwrap_u8() == 1
}

/// `POST /webhook`
pub async fn ingest(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(secret) = state.app_secret.as_deref() {
        if !signature_valid(secret, &headers, &body) {
            tracing::warn!("webhook delivery with invalid signature");
            return api_error(StatusCode::UNAUTHORIZED, "invalid webhook signature");
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "malformed webhook payload");
            return api_error(StatusCode::BAD_REQUEST, format!("malformed payload: {e}"));
        }
    };

    let object = payload.object.clone();
    let messages = payload.into_messages();
    TraceEvent::WebhookReceived {
        object,
        messages: messages.len(),
    }
    .emit();

    for message in messages {
        tracing::info!(sender = %message.sender, body = %message.body, "webhook message");
        let state = state.clone();
        tokio::spawn(async move {
            let Some(reply) = state.handler.handle(&message).await else {
                return;
            };
            match state.cloud.as_ref() {
                Some(cloud) => {
                    if let Err(e) = cloud.send_text(&reply).await {
                        tracing::warn!(error = %e, to = %reply.to, "webhook reply not sent");
                    }
                }
                None => {
                    tracing::debug!(to = %reply.to, "cloud API not configured, reply dropped");
                }
            }
        });
    }

    (StatusCode::OK, "EVENT_RECEIVED").into_response()
}
