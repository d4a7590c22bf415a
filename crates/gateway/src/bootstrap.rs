//! AppState construction extracted from `main.rs`.
//!
//! Wires the credential store, the link transport and the session manager,
//! then resolves the secrets the HTTP adapters need.

use std::sync::Arc;

use anyhow::Context;

use lb_domain::config::{secret_from_env, Config, ConfigSeverity};
use lb_link::LinkTransportBuilder;
use lb_session::{create_store, handler_from_config, SessionManager};

use crate::api::auth::hash_token;
use crate::cloud::CloudClient;
use crate::state::AppState;

/// Validate config, build the session and every adapter dependency and
/// return a fully-wired [`AppState`]. The session is not started yet.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Credential store ─────────────────────────────────────────────
    let store = create_store(&config.store)
        .await
        .context("initializing credential store")?;
    tracing::info!(backend = store.backend(), "credential store ready");

    // ── Link transport ───────────────────────────────────────────────
    let transport = LinkTransportBuilder::from_config(&config.session.session_id, &config.link)
        .build()
        .context("configuring link transport")?;
    tracing::info!(url = %config.link.url, "link transport ready");

    // ── Session ──────────────────────────────────────────────────────
    let handler = handler_from_config(&config.relay);
    let session = SessionManager::builder(config.session.clone())
        .store(store)
        .transport(Arc::new(transport))
        .handler(handler.clone())
        .build()
        .context("building session manager")?;

    // ── Cloud API client ─────────────────────────────────────────────
    let cloud = CloudClient::from_config(&config.cloud)
        .context("initializing cloud API client")?
        .map(Arc::new);
    if cloud.is_none() {
        tracing::info!(
            token_env = %config.cloud.token_env,
            phone_number_id_env = %config.cloud.phone_number_id_env,
            "cloud API client disabled (credentials not set)"
        );
    }

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = match secret_from_env(&config.server.api_token_env) {
        Some(t) => {
            tracing::info!(env = %config.server.api_token_env, "API bearer-token auth enabled");
            Some(hash_token(&t))
        }
        None => {
            tracing::warn!(
                "API bearer-token auth DISABLED, set the {} env var",
                config.server.api_token_env
            );
            None
        }
    };

    // ── Webhook secrets ──────────────────────────────────────────────
    let verify_token = secret_from_env(&config.webhook.verify_token_env);
    if verify_token.is_none() {
        tracing::warn!(
            env = %config.webhook.verify_token_env,
            "webhook verify token not set; subscription handshakes will fail"
        );
    }
    let app_secret = secret_from_env(&config.webhook.app_secret_env);
    if app_secret.is_none() {
        tracing::info!("webhook signature check disabled (no app secret)");
    }

    Ok(AppState {
        config,
        session,
        handler,
        cloud,
        api_token_hash,
        verify_token,
        app_secret,
    })
}

/// Start the session, turning a failure into a startup error.
pub async fn start_session(state: &AppState) -> anyhow::Result<()> {
    state
        .session
        .start()
        .await
        .with_context(|| format!("starting session {}", state.session.session_id()))?;
    let snapshot = state.session.snapshot();
    tracing::info!(session_id = %state.session.session_id(), status = %snapshot.status, "session started");
    Ok(())
}
