use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use lb_session::OutboundRequest;

use super::{api_error, error_response};
use crate::state::AppState;

/// `POST /send`
///
/// Sends one text message through the linked session. Answers 503 while
/// the session is not active; the request is never retried.
pub async fn send(
    State(state): State<AppState>,
    body: Result<Json<OutboundRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return api_error(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match state.session.send(request).await {
        Ok(receipt) => {
            tracing::debug!(message_id = ?receipt.message_id, "message sent");
            Json(serde_json::json!({ "success": true })).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "send rejected");
            error_response(&e)
        }
    }
}
