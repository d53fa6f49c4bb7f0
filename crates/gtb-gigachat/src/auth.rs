//! Access-token lifecycle for the GigaChat API.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use gtb_core::{config::Config, Error, Result};

use crate::backoff_delay;

/// Applied when the token endpoint reports no expiry at all.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(600);

#[derive(Default)]
struct TokenState {
    token: Option<String>,
    issued_at: Option<Instant>,
    expires_at: Option<Instant>,
}

/// Process-wide token state with single-flight refresh.
///
/// The mutex is held across the issuance await, so concurrent [`bearer`]
/// callers hitting an expired token block on the lock and pick up the result
/// of the one in-flight issuance instead of starting their own.
///
/// [`bearer`]: TokenManager::bearer
pub struct TokenManager {
    http: reqwest::Client,
    auth_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    force_refresh_interval: Duration,
    refresh_reserve: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .connect_timeout(cfg.connect_timeout);
        if !cfg.gigachat_verify_ssl {
            warn!("gigachat_ssl_verification_disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("auth http client build failed: {e}")))?;

        Ok(Self {
            http,
            auth_url: cfg.gigachat_auth_url.clone(),
            client_id: cfg.gigachat_client_id.clone(),
            client_secret: cfg.gigachat_client_secret.clone(),
            scope: cfg.gigachat_scope.clone(),
            force_refresh_interval: cfg.token_force_refresh_interval,
            refresh_reserve: cfg.token_refresh_reserve,
            max_attempts: cfg.auth_retry_attempts,
            backoff_base: cfg.backoff_base,
            state: Mutex::new(TokenState::default()),
        })
    }

    /// The current bearer token, issuing or refreshing first when stale.
    pub async fn bearer(&self) -> Result<String> {
        let mut st = self.state.lock().await;
        if !self.is_fresh(&st, Instant::now()) {
            self.issue(&mut st).await?;
        }
        st.token
            .clone()
            .ok_or_else(|| Error::Auth("no token after issuance".to_string()))
    }

    /// Drop the current token and issue a new one. Called by the chat client
    /// on a 401; the held lock guarantees at most one re-issuance before the
    /// triggering call retries.
    pub async fn force_refresh(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        st.token = None;
        st.issued_at = None;
        st.expires_at = None;
        self.issue(&mut st).await
    }

    fn is_fresh(&self, st: &TokenState, now: Instant) -> bool {
        let (Some(_), Some(issued_at)) = (st.token.as_ref(), st.issued_at) else {
            return false;
        };
        if now.duration_since(issued_at) >= self.force_refresh_interval {
            return false;
        }
        if let Some(expires_at) = st.expires_at {
            if now + self.refresh_reserve >= expires_at {
                return false;
            }
        }
        true
    }

    async fn issue(&self, st: &mut TokenState) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.request_token().await {
                Ok((token, expires_at)) => {
                    info!(attempt, "gigachat_token_issued");
                    st.token = Some(token);
                    st.issued_at = Some(Instant::now());
                    st.expires_at = expires_at;
                    return Ok(());
                }
                Err(reason) => {
                    warn!(attempt, error = %reason, "gigachat_token_issuance_failed");
                    if attempt >= self.max_attempts {
                        return Err(Error::Auth(reason));
                    }
                    sleep(backoff_delay(self.backoff_base, attempt - 1)).await;
                }
            }
        }
    }

    async fn request_token(&self) -> std::result::Result<(String, Option<Instant>), String> {
        let resp = self
            .http
            .post(&self.auth_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("RqUID", Uuid::new_v4().to_string())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("scope", self.scope.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(format!("token endpoint returned {status}: {snippet}"));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("token response is not valid json: {e}"))?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or("token response is missing access_token")?
            .to_string();

        Ok((token, Some(Instant::now() + token_ttl(&body))))
    }
}

/// GigaChat reports `expires_at` as unix milliseconds; `expires_in` seconds
/// is honored as a fallback.
fn token_ttl(body: &Value) -> Duration {
    if let Some(expires_at_ms) = body.get("expires_at").and_then(Value::as_i64) {
        let remaining_ms = expires_at_ms.saturating_sub(Utc::now().timestamp_millis());
        return Duration::from_millis(remaining_ms.max(0) as u64);
    }
    if let Some(expires_in) = body.get("expires_in").and_then(Value::as_u64) {
        return Duration::from_secs(expires_in);
    }
    DEFAULT_TOKEN_TTL
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::test_support::{test_config, token_body, SeqResponder};

    async fn manager(server: &MockServer) -> Arc<TokenManager> {
        Arc::new(TokenManager::new(&test_config(&server.uri())).unwrap())
    }

    #[tokio::test]
    async fn concurrent_callers_trigger_exactly_one_issuance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth"))
            .and(header_exists("RqUID"))
            .and(header_exists("Authorization"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("tok-1"))
                    .set_delay(Duration::from_millis(20)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tm = manager(&server).await;
        let (a, b, c, d) = tokio::join!(tm.bearer(), tm.bearer(), tm.bearer(), tm.bearer());
        for token in [a, b, c, d] {
            assert_eq!(token.unwrap(), "tok-1");
        }
    }

    #[tokio::test]
    async fn fresh_token_is_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1")))
            .expect(1)
            .mount(&server)
            .await;

        let tm = manager(&server).await;
        assert_eq!(tm.bearer().await.unwrap(), "tok-1");
        assert_eq!(tm.bearer().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn forced_refresh_interval_reissues() {
        let server = MockServer::start().await;
        let (seq, hits) = SeqResponder::new(vec![
            ResponseTemplate::new(200).set_body_json(token_body("tok-1")),
            ResponseTemplate::new(200).set_body_json(token_body("tok-2")),
        ]);
        Mock::given(method("POST"))
            .and(path("/oauth"))
            .respond_with(seq)
            .mount(&server)
            .await;

        let mut cfg = test_config(&server.uri());
        cfg.token_force_refresh_interval = Duration::ZERO;
        let tm = TokenManager::new(&cfg).unwrap();

        assert_eq!(tm.bearer().await.unwrap(), "tok-1");
        assert_eq!(tm.bearer().await.unwrap(), "tok-2");
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn issuance_retries_past_a_transient_500() {
        let server = MockServer::start().await;
        let (seq, hits) = SeqResponder::new(vec![
            ResponseTemplate::new(500),
            ResponseTemplate::new(200).set_body_json(token_body("tok-1")),
        ]);
        Mock::given(method("POST"))
            .and(path("/oauth"))
            .respond_with(seq)
            .mount(&server)
            .await;

        let tm = manager(&server).await;
        assert_eq!(tm.bearer().await.unwrap(), "tok-1");
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn issuance_gives_up_after_the_attempt_limit() {
        let server = MockServer::start().await;
        let (seq, hits) = SeqResponder::new(vec![ResponseTemplate::new(500)]);
        Mock::given(method("POST"))
            .and(path("/oauth"))
            .respond_with(seq)
            .mount(&server)
            .await;

        let tm = manager(&server).await; // auth_retry_attempts = 2
        let err = tm.bearer().await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)), "got {err:?}");
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn force_refresh_discards_the_current_token() {
        let server = MockServer::start().await;
        let (seq, hits) = SeqResponder::new(vec![
            ResponseTemplate::new(200).set_body_json(token_body("tok-1")),
            ResponseTemplate::new(200).set_body_json(token_body("tok-2")),
        ]);
        Mock::given(method("POST"))
            .and(path("/oauth"))
            .respond_with(seq)
            .mount(&server)
            .await;

        let tm = manager(&server).await;
        assert_eq!(tm.bearer().await.unwrap(), "tok-1");
        tm.force_refresh().await.unwrap();
        assert_eq!(tm.bearer().await.unwrap(), "tok-2");
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_access_token_counts_as_a_failed_attempt() {
        let server = MockServer::start().await;
        let (seq, hits) = SeqResponder::new(vec![
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"detail": "nope"})),
            ResponseTemplate::new(200).set_body_json(token_body("tok-1")),
        ]);
        Mock::given(method("POST"))
            .and(path("/oauth"))
            .respond_with(seq)
            .mount(&server)
            .await;

        let tm = manager(&server).await;
        assert_eq!(tm.bearer().await.unwrap(), "tok-1");
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn expires_at_milliseconds_wins_over_expires_in() {
        let future_ms = Utc::now().timestamp_millis() + 120_000;
        let body = serde_json::json!({ "expires_at": future_ms, "expires_in": 10 });
        let ttl = token_ttl(&body);
        assert!(ttl > Duration::from_secs(100) && ttl <= Duration::from_secs(120));

        let body = serde_json::json!({ "expires_in": 42 });
        assert_eq!(token_ttl(&body), Duration::from_secs(42));

        assert_eq!(token_ttl(&serde_json::json!({})), DEFAULT_TOKEN_TTL);
    }
}
