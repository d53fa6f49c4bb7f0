//! Chat-completion client with the retry/refresh state machine.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::warn;

use gtb_core::{
    config::Config,
    llm::{ChatClient, ChatRequest, Completion, TokenUsage},
    Error, Result,
};

use crate::{auth::TokenManager, backoff_delay};

/// GigaChat chat-completion adapter.
///
/// Outcomes are deterministic given (response status, attempt count):
/// 429/5xx and transport errors retry with backoff inside the attempt and
/// time budgets; a 401 triggers exactly one forced token refresh and one
/// immediate retry; any other 4xx and malformed 200 bodies fail fast as
/// `Protocol`.
pub struct GigaChatClient {
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
    chat_url: String,
    model: String,
    max_attempts: u32,
    backoff_base: Duration,
    budget: Duration,
}

impl GigaChatClient {
    pub fn new(cfg: &Config, tokens: Arc<TokenManager>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .connect_timeout(cfg.connect_timeout);
        if !cfg.gigachat_verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("chat http client build failed: {e}")))?;

        Ok(Self {
            http,
            tokens,
            chat_url: format!(
                "{}{}",
                cfg.gigachat_base_url.trim_end_matches('/'),
                cfg.gigachat_chat_path
            ),
            model: cfg.gigachat_model.clone(),
            max_attempts: cfg.chat_retry_attempts,
            backoff_base: cfg.backoff_base,
            budget: cfg.request_budget,
        })
    }

    fn payload(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        json!({ "model": self.model, "messages": messages })
    }
}

#[async_trait]
impl ChatClient for GigaChatClient {
    async fn complete(&self, req: ChatRequest) -> Result<Completion> {
        let payload = self.payload(&req);
        let deadline = Instant::now() + self.budget;

        let mut attempt = 0u32;
        let mut refreshed = false;
        loop {
            let token = self.tokens.bearer().await?;
            let mut call = self
                .http
                .post(&self.chat_url)
                .bearer_auth(token)
                .json(&payload);
            if let Some(tag) = &req.session_tag {
                call = call.header("X-Session-ID", tag);
            }

            let transient = match call.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body: Value = resp.json().await.map_err(|e| {
                            Error::Protocol(format!("response body is not valid json: {e}"))
                        })?;
                        return parse_completion(&body);
                    }
                    match status.as_u16() {
                        401 => {
                            if refreshed {
                                // A freshly issued token was rejected too;
                                // a third attempt cannot do better.
                                return Err(Error::Auth(
                                    "chat endpoint rejected a freshly issued token".to_string(),
                                ));
                            }
                            warn!("gigachat_unauthorized_refresh");
                            refreshed = true;
                            self.tokens.force_refresh().await?;
                            // The single post-refresh retry sits outside the
                            // transient budget and skips backoff.
                            continue;
                        }
                        429 => Error::RateLimited(format!("status {status}")),
                        s if s >= 500 => Error::Server(format!("status {status}")),
                        _ => {
                            let body = resp.text().await.unwrap_or_default();
                            let snippet: String = body.chars().take(200).collect();
                            return Err(Error::Protocol(format!("status {status}: {snippet}")));
                        }
                    }
                }
                Err(e) if e.is_timeout() => Error::Timeout(format!("chat request timed out: {e}")),
                Err(e) => Error::Server(format!("chat request failed: {e}")),
            };

            attempt += 1;
            warn!(attempt, error = %transient, "gigachat_request_retry");
            if attempt >= self.max_attempts {
                return Err(transient);
            }
            let delay = backoff_delay(self.backoff_base, attempt - 1);
            if Instant::now() + delay >= deadline {
                // The next retry cannot fit in the overall budget.
                return Err(transient);
            }
            sleep(delay).await;
        }
    }
}

/// Pull the generated text and usage out of a 200 body. Tolerates `message`
/// or `delta` choice shapes and content as a string or a list of parts.
fn parse_completion(body: &Value) -> Result<Completion> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| Error::Protocol("response has no choices".to_string()))?;
    let message = choice
        .get("message")
        .or_else(|| choice.get("delta"))
        .ok_or_else(|| Error::Protocol("choice has no message".to_string()))?;
    let content = message
        .get("content")
        .ok_or_else(|| Error::Protocol("message has no content".to_string()))?;

    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(s) => s.clone(),
                other => other
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => {
            return Err(Error::Protocol(
                "content is neither text nor a parts list".to_string(),
            ))
        }
    };

    let usage = body
        .get("usage")
        .map(|u| TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64),
            completion_tokens: u.get("completion_tokens").and_then(Value::as_u64),
        })
        .unwrap_or_default();

    Ok(Completion { text, usage })
}
