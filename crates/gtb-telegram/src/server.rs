//! Webhook delivery: an axum server exposing the Telegram callback and a
//! health probe.
//!
//! Registering the webhook with Telegram (setWebhook with the secret token)
//! is an operational step outside this process; the server only validates
//! what arrives.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use teloxide::{prelude::*, types::Update};
use tracing::{info, warn};

use crate::{handlers, router::AppState};

const SECRET_TOKEN_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

#[derive(Clone)]
struct WebhookState {
    app: Arc<AppState>,
    bot: Bot,
}

pub async fn run_webhook(bot: Bot, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.cfg.app_host, state.cfg.app_port);
    let router = app_router(WebhookState { app: state, bot });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "webhook_server_listening");
    axum::serve(listener, router).await?;
    Ok(())
}

fn app_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/{secret}", post(webhook))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn webhook(
    Path(secret): Path<String>,
    State(st): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    let header = headers
        .get(SECRET_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    let status = authorize_webhook(
        st.app.cfg.webhook_secret_path.as_deref(),
        st.app.cfg.webhook_secret_token.as_deref(),
        &secret,
        header,
    );
    if status != StatusCode::OK {
        return status;
    }

    // Ack immediately; Telegram retries on slow responses, and a failed
    // turn already produces a user-facing apology.
    let bot = st.bot.clone();
    let app = st.app.clone();
    tokio::spawn(async move {
        handlers::process_update(bot, update, app).await;
    });

    StatusCode::OK
}

fn authorize_webhook(
    expected_path: Option<&str>,
    expected_token: Option<&str>,
    secret: &str,
    header: Option<&str>,
) -> StatusCode {
    // An unknown path is indistinguishable from a missing route.
    let Some(expected_path) = expected_path else {
        return StatusCode::NOT_FOUND;
    };
    if secret != expected_path {
        return StatusCode::NOT_FOUND;
    }
    if expected_token.is_none() || header != expected_token {
        warn!("webhook_secret_mismatch");
        return StatusCode::FORBIDDEN;
    }
    StatusCode::OK
}

async fn healthz(State(st): State<WebhookState>) -> Json<serde_json::Value> {
    let store = match st.app.store.ping().await {
        Ok(()) => "ok",
        Err(_) => "failed",
    };
    let status = if store == "ok" { "ok" } else { "degraded" };
    Json(json!({ "status": status, "store": store }))
}
