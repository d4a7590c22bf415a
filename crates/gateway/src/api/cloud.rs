use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use lb_domain::error::Error;
use lb_session::OutboundRequest;

use super::{api_error, error_response};
use crate::state::AppState;

/// `POST /cloud/send`
///
/// Delivers through the hosted cloud API instead of the linked session and
/// returns the upstream JSON unchanged.
pub async fn send(
    State(state): State<AppState>,
    body: Result<Json<OutboundRequest>, JsonRejection>,
) -> Response {
    let Some(client) = state.cloud.as_ref() else {
        return error_response(&Error::Configuration(format!(
            "cloud API not configured: set {} and {}",
            state.config.cloud.token_env, state.config.cloud.phone_number_id_env
        )));
    };

    let Json(request) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return api_error(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    match client.send_text(&request).await {
        Ok(upstream) => Json(upstream).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, to = %request.to, "cloud send failed");
            error_response(&e)
        }
    }
}
