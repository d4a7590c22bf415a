//! Session status and provisioning QR code.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use lb_session::SessionStatus;

use super::api_error;
use crate::qr;
use crate::state::AppState;

/// Body of `GET /status` and `GET /qr`.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: SessionStatus,
    /// SVG data URL, present only while awaiting a link.
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// `GET /`
pub async fn banner() -> &'static str {
    "linkbridge is running"
}

/// `GET /status`, `GET /qr`
pub async fn status(State(state): State<AppState>) -> Response {
    let snapshot = state.session.snapshot();

    let qr = match snapshot.provisioning_token.as_deref() {
        Some(token) => match qr::token_to_data_url(token) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::error!(error = %e, "failed to render provisioning QR code");
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
            }
        },
        None => None,
    };

    Json(StatusBody {
        status: snapshot.status,
        qr,
        last_error: snapshot.last_error,
    })
    .into_response()
}
