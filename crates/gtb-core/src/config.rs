use std::{
    collections::HashSet,
    env, fs,
    path::Path,
    time::Duration,
};

use crate::{domain::ChatMode, errors::Error, Result};

/// Telegram parse mode used for outbound replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseMode {
    Html,
    MarkdownV2,
}

impl ParseMode {
    fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "HTML" => Ok(ParseMode::Html),
            "MarkdownV2" => Ok(ParseMode::MarkdownV2),
            other => Err(Error::Config(format!(
                "REPLY_PARSE_MODE must be 'HTML' or 'MarkdownV2', got '{other}'"
            ))),
        }
    }
}

/// How updates are delivered: long polling or an HTTPS webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppMode {
    Polling,
    Webhook,
}

impl AppMode {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "polling" => Ok(AppMode::Polling),
            "webhook" => Ok(AppMode::Webhook),
            other => Err(Error::Config(format!(
                "APP_MODE must be 'polling' or 'webhook', got '{other}'"
            ))),
        }
    }
}

/// Typed configuration, loaded from environment variables (with `.env`
/// support) and validated once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub allowed_user_ids: HashSet<i64>,
    pub admin_user_ids: HashSet<i64>,
    pub parse_mode: ParseMode,
    pub process_edited_messages: bool,

    // GigaChat endpoints + credentials
    pub gigachat_base_url: String,
    pub gigachat_auth_url: String,
    pub gigachat_client_id: String,
    pub gigachat_client_secret: String,
    pub gigachat_model: String,
    pub gigachat_chat_path: String,
    pub gigachat_scope: String,
    pub gigachat_verify_ssl: bool,

    // Token lifecycle
    pub token_force_refresh_interval: Duration,
    pub token_refresh_reserve: Duration,
    pub auth_retry_attempts: u32,

    // Chat retry policy
    pub chat_retry_attempts: u32,
    pub backoff_base: Duration,
    pub request_budget: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,

    // Conversation history
    pub history_turns: usize,
    pub history_ttl: Duration,
    pub history_purge_interval: Duration,

    // Prompts
    pub default_mode: ChatMode,
    pub base_prompt: Option<String>,
    pub concise_suffix: Option<String>,

    // Serving
    pub app_mode: AppMode,
    pub app_host: String,
    pub app_port: u16,
    pub webhook_secret_path: Option<String>,
    pub webhook_secret_token: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let allowed_user_ids = parse_csv_i64(env_str("ALLOWED_USER_IDS"));
        if allowed_user_ids.is_empty() {
            return Err(Error::Config(
                "ALLOWED_USER_IDS environment variable is required".to_string(),
            ));
        }
        let mut admin_user_ids = parse_csv_i64(env_str("ADMIN_USER_IDS"));
        if !admin_user_ids.is_subset(&allowed_user_ids) {
            return Err(Error::Config(
                "ADMIN_USER_IDS must be a subset of ALLOWED_USER_IDS".to_string(),
            ));
        }
        if admin_user_ids.is_empty() {
            admin_user_ids = allowed_user_ids.clone();
        }

        let parse_mode = match env_str("REPLY_PARSE_MODE") {
            Some(s) => ParseMode::parse(&s)?,
            None => ParseMode::Html,
        };
        let process_edited_messages = env_bool("PROCESS_EDITED_MESSAGES").unwrap_or(false);

        // GigaChat surface. All credentials are required; paths and scope have
        // the provider's documented defaults.
        let gigachat_base_url = require("GIGACHAT_BASE_URL")?;
        let gigachat_auth_url = require("GIGACHAT_AUTH_URL")?;
        let gigachat_client_id = require("GIGACHAT_CLIENT_ID")?;
        let gigachat_client_secret = require("GIGACHAT_CLIENT_SECRET")?;
        let gigachat_model = require("LLM_MODEL")?;
        let gigachat_chat_path =
            env_str("GIGACHAT_CHAT_PATH").unwrap_or_else(|| "/chat/completions".to_string());
        let gigachat_scope =
            env_str("GIGACHAT_SCOPE").unwrap_or_else(|| "GIGACHAT_API_PERS".to_string());
        let gigachat_verify_ssl = env_bool("GIGACHAT_VERIFY_SSL").unwrap_or(true);

        let token_force_refresh_interval =
            Duration::from_secs(env_u64("GIGACHAT_TOKEN_FORCE_REFRESH_INTERVAL").unwrap_or(300));
        let token_refresh_reserve =
            Duration::from_secs(env_u64("GIGACHAT_TOKEN_REFRESH_RESERVE").unwrap_or(60));
        let auth_retry_attempts = env_u32("AUTH_RETRY_ATTEMPTS").unwrap_or(3).max(1);

        let chat_retry_attempts = env_u32("CHAT_RETRY_ATTEMPTS").unwrap_or(3).max(1);
        let backoff_base = Duration::from_millis(env_u64("BACKOFF_BASE_MS").unwrap_or(500));
        let request_budget = Duration::from_secs(env_u64("REQUEST_BUDGET_SEC").unwrap_or(90));
        let request_timeout = Duration::from_secs(env_u64("REQUEST_TIMEOUT_SEC").unwrap_or(60));
        let connect_timeout = Duration::from_secs(env_u64("CONNECT_TIMEOUT_SEC").unwrap_or(3));

        let history_turns = env_usize("HISTORY_TURNS").unwrap_or(6);
        if history_turns > 20 {
            return Err(Error::Config(
                "HISTORY_TURNS must be <= 20 to limit context size".to_string(),
            ));
        }
        let history_ttl =
            Duration::from_secs(env_u64("HISTORY_TTL_SEC").unwrap_or(7 * 24 * 60 * 60));
        let history_purge_interval =
            Duration::from_secs(env_u64("HISTORY_PURGE_INTERVAL_SEC").unwrap_or(3600));

        let default_mode = match env_str("DEFAULT_MODE") {
            Some(s) => ChatMode::parse(&s).ok_or_else(|| {
                Error::Config(format!(
                    "DEFAULT_MODE must be 'friendly' or 'concise', got '{s}'"
                ))
            })?,
            None => ChatMode::Friendly,
        };
        let base_prompt = env_str("BASE_PROMPT").and_then(non_empty);
        let concise_suffix = env_str("CONCISE_SUFFIX").and_then(non_empty);

        let app_mode = match env_str("APP_MODE") {
            Some(s) => AppMode::parse(&s)?,
            None => AppMode::Polling,
        };
        let app_host = env_str("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let app_port = parse_port(env_u64("APP_PORT"))?;
        let webhook_secret_path = env_str("WEBHOOK_SECRET_PATH").and_then(non_empty);
        let webhook_secret_token = env_str("WEBHOOK_SECRET_TOKEN").and_then(non_empty);

        if app_mode == AppMode::Webhook
            && (webhook_secret_path.is_none() || webhook_secret_token.is_none())
        {
            return Err(Error::Config(
                "WEBHOOK_SECRET_PATH and WEBHOOK_SECRET_TOKEN are required in webhook mode"
                    .to_string(),
            ));
        }

        Ok(Self {
            telegram_bot_token,
            allowed_user_ids,
            admin_user_ids,
            parse_mode,
            process_edited_messages,
            gigachat_base_url,
            gigachat_auth_url,
            gigachat_client_id,
            gigachat_client_secret,
            gigachat_model,
            gigachat_chat_path,
            gigachat_scope,
            gigachat_verify_ssl,
            token_force_refresh_interval,
            token_refresh_reserve,
            auth_retry_attempts,
            chat_retry_attempts,
            backoff_base,
            request_budget,
            request_timeout,
            connect_timeout,
            history_turns,
            history_ttl,
            history_purge_interval,
            default_mode,
            base_prompt,
            concise_suffix,
            app_mode,
            app_host,
            app_port,
            webhook_secret_path,
            webhook_secret_token,
        })
    }

    /// Maximum number of stored messages per chat (one turn is a user message
    /// plus its assistant reply).
    pub fn max_history_messages(&self) -> usize {
        self.history_turns * 2
    }
}

fn require(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> HashSet<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn parse_port(value: Option<u64>) -> Result<u16> {
    match value {
        None => Ok(8080),
        Some(p) => u16::try_from(p)
            .map_err(|_| Error::Config(format!("APP_PORT must be within 0-65535, got {p}"))),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
