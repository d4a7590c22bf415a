use std::sync::Arc;

use lb_domain::config::Config;
use lb_session::{MessageHandler, SessionManager};

use crate::cloud::CloudClient;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Session ───────────────────────────────────────────────────────
    /// The one session this process manages.
    pub session: SessionManager,
    /// Handler for messages arriving through the webhook path.
    pub handler: Arc<dyn MessageHandler>,
    /// `None` when the cloud API token or phone-number id is unset.
    pub cloud: Option<Arc<CloudClient>>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
    /// Shared secret for the webhook subscription handshake.
    pub verify_token: Option<String>,
    /// Enables the `X-Hub-Signature-256` check when set.
    pub app_secret: Option<String>,
}
