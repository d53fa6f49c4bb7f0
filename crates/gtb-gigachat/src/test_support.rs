//! Shared fixtures for the adapter's wiremock tests.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use serde_json::json;
use wiremock::{Request, Respond, ResponseTemplate};

use gtb_core::{
    config::{AppMode, Config, ParseMode},
    domain::ChatMode,
};

/// Config pointed at a mock server, with millisecond backoff so retry tests
/// run fast.
pub(crate) fn test_config(server_uri: &str) -> Config {
    Config {
        telegram_bot_token: "test-token".to_string(),
        allowed_user_ids: HashSet::from([1]),
        admin_user_ids: HashSet::from([1]),
        parse_mode: ParseMode::Html,
        process_edited_messages: false,
        gigachat_base_url: server_uri.to_string(),
        gigachat_auth_url: format!("{server_uri}/oauth"),
        gigachat_client_id: "client-id".to_string(),
        gigachat_client_secret: "client-secret".to_string(),
        gigachat_model: "GigaChat".to_string(),
        gigachat_chat_path: "/chat/completions".to_string(),
        gigachat_scope: "GIGACHAT_API_PERS".to_string(),
        gigachat_verify_ssl: true,
        token_force_refresh_interval: Duration::from_secs(300),
        token_refresh_reserve: Duration::from_secs(60),
        auth_retry_attempts: 2,
        chat_retry_attempts: 2,
        backoff_base: Duration::from_millis(1),
        request_budget: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(1),
        history_turns: 3,
        history_ttl: Duration::from_secs(60),
        history_purge_interval: Duration::from_secs(60),
        default_mode: ChatMode::Friendly,
        base_prompt: None,
        concise_suffix: None,
        app_mode: AppMode::Polling,
        app_host: "127.0.0.1".to_string(),
        app_port: 0,
        webhook_secret_path: None,
        webhook_secret_token: None,
    }
}

pub(crate) fn token_body(token: &str) -> serde_json::Value {
    json!({ "access_token": token, "expires_in": 600 })
}

/// Responds with the templates in order; counts hits so tests can assert
/// exact attempt counts without relying on mock-matching precedence.
pub(crate) struct SeqResponder {
    hits: Arc<AtomicUsize>,
    responses: Vec<ResponseTemplate>,
}

impl SeqResponder {
    pub(crate) fn new(responses: Vec<ResponseTemplate>) -> (Self, Arc<AtomicUsize>) {
        assert!(!responses.is_empty());
        let hits = Arc::new(AtomicUsize::new(0));
        (
            Self {
                hits: hits.clone(),
                responses,
            },
            hits,
        )
    }
}

impl Respond for SeqResponder {
    fn respond(&self, _req: &Request) -> ResponseTemplate {
        let n = self.hits.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(n)
            .or_else(|| self.responses.last())
            .cloned()
            .expect("non-empty response script")
    }
}
