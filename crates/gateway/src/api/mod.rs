pub mod auth;
pub mod cloud;
pub mod send;
pub mod status;
pub mod webhook;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use lb_domain::error::Error;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the `LB_API_TOKEN` bearer-token middleware). The webhook
/// routes stay public: the provider authenticates with the verify token
/// and the optional payload signature instead.
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/", get(status::banner))
        .route("/status", get(status::status))
        .route("/qr", get(status::status))
        .route("/webhook", get(webhook::verify).post(webhook::ingest));

    let protected = Router::new()
        .route("/send", post(send::send))
        .route("/cloud/send", post(cloud::send))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// HTTP status for each failure class.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::TerminalSession(_) => StatusCode::CONFLICT,
        Error::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        e if e.is_dependency() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: &Error) -> Response {
    api_error(status_for(err), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classes_map_to_statuses() {
        assert_eq!(status_for(&Error::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&Error::NotReady("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(&Error::TerminalSession("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&Error::Configuration("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for(&Error::Timeout("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&Error::TransientConnection("x".into())),
            StatusCode::BAD_GATEWAY
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(status_for(&Error::Io(io)), StatusCode::BAD_GATEWAY);
    }
}
