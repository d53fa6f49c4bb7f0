//! Shared fixtures for unit tests.

use std::{collections::HashSet, time::Duration};

use crate::{
    config::{AppMode, Config, ParseMode},
    domain::ChatMode,
};

/// A fully populated config with small, test-friendly values.
///
/// User 1 is the admin, users 1 and 2 are allowed.
pub(crate) fn test_config() -> Config {
    Config {
        telegram_bot_token: "test-token".to_string(),
        allowed_user_ids: HashSet::from([1, 2]),
        admin_user_ids: HashSet::from([1]),
        parse_mode: ParseMode::Html,
        process_edited_messages: false,
        gigachat_base_url: "http://localhost:1".to_string(),
        gigachat_auth_url: "http://localhost:1/oauth".to_string(),
        gigachat_client_id: "id".to_string(),
        gigachat_client_secret: "secret".to_string(),
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
