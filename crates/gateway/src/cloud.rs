//! Outbound delivery through the hosted cloud messaging API.
//!
//! Used by `POST /cloud/send` and for replies to webhook deliveries. This
//! path does not need a linked session: the phone-number id and bearer
//! token come from the environment.

use lb_domain::config::{secret_from_env, CloudApiConfig};
use lb_domain::error::{Error, Result};
use lb_session::OutboundRequest;

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("cloud API: {e}"))
    } else {
        Error::Dependency(format!("cloud API: {e}"))
    }
}

pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    phone_number_id: String,
    token: String,
}

impl CloudClient {
    /// Build a client from the environment variables named in `cfg`.
    ///
    /// Returns `Ok(None)` when the token or the phone-number id is unset;
    /// sends through the cloud path then fail with a configuration error.
    pub fn from_config(cfg: &CloudApiConfig) -> Result<Option<Self>> {
        let token = secret_from_env(&cfg.token_env);
        let phone_number_id = secret_from_env(&cfg.phone_number_id_env);
        match (token, phone_number_id) {
            (Some(token), Some(phone_number_id)) => {
                Self::new(cfg, token, phone_number_id).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn new(
        cfg: &CloudApiConfig,
        token: impl Into<String>,
        phone_number_id: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_version: cfg.api_version.clone(),
            phone_number_id: phone_number_id.into(),
            token: token.into(),
        })
    }

    pub fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url, self.api_version, self.phone_number_id
        )
    }

    /// Send one text message. Returns the upstream JSON body on success.
    pub async fn send_text(&self, request: &OutboundRequest) -> Result<serde_json::Value> {
        request.validate()?;

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": request.to,
            "text": { "body": request.text },
        });

        let resp = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body_text, "cloud API rejected message");
            return Err(Error::Dependency(format!("cloud API HTTP {status}")));
        }

        resp.json().await.map_err(from_reqwest)
    }
}
