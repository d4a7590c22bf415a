use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cloud messaging API (outbound delivery without a linked session)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudApiConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_api_version")]
    pub api_version: String,
    /// Environment variable holding the bearer token for the API.
    #[serde(default = "d_token_env")]
    pub token_env: String,
    /// Environment variable holding the sending phone-number id.
    #[serde(default = "d_phone_number_id_env")]
    pub phone_number_id_env: String,
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CloudApiConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            api_version: d_api_version(),
            token_env: d_token_env(),
            phone_number_id_env: d_phone_number_id_env(),
            timeout_secs: d_timeout_secs(),
        }
    }
}

impl CloudApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn d_base_url() -> String {
    "https://graph.facebook.com".into()
}
fn d_api_version() -> String {
    "v17.0".into()
}
fn d_token_env() -> String {
    "WHATSAPP_TOKEN".into()
}
fn d_phone_number_id_env() -> String {
    "PHONE_NUMBER_ID".into()
}
fn d_timeout_secs() -> u64 {
    15
}
