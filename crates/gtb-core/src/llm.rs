//! Port for the upstream chat-completion backend.

use async_trait::async_trait;

use crate::{domain::ChatMessage, Result};

/// One upstream call: the full ordered message list (system prompt first)
/// plus an opaque per-chat tag the provider can use for request affinity.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub session_tag: Option<String>,
}

/// Token counts as reported by the provider, when it reports them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// Successful upstream response.
#[derive(Clone, Debug)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Hexagonal port for the LLM backend.
///
/// The adapter owns credentials, retries and timeouts; by the time a call
/// returns here the outcome is final. Failures arrive as the shared error
/// taxonomy (`Timeout`, `RateLimited`, `Server`, `Auth`, `Protocol`).
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, req: ChatRequest) -> Result<Completion>;
}
