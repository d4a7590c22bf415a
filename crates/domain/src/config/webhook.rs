use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook ingestion (push deployment path)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Environment variable holding the shared secret echoed back by the
    /// subscription handshake (`hub.verify_token`).
    #[serde(default = "d_verify_token_env")]
    pub verify_token_env: String,
    /// Environment variable holding the app secret used to check the
    /// `X-Hub-Signature-256` header on deliveries. Unset disables the check.
    #[serde(default = "d_app_secret_env")]
    pub app_secret_env: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            verify_token_env: d_verify_token_env(),
            app_secret_env: d_app_secret_env(),
        }
    }
}

fn d_verify_token_env() -> String {
    "VERIFY_TOKEN".into()
}
fn d_app_secret_env() -> String {
    "WEBHOOK_APP_SECRET".into()
}
