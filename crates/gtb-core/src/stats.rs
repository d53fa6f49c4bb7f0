//! In-process counters backing the `/stats` command.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
    sync::Mutex,
    time::Duration,
};

use crate::llm::TokenUsage;

/// Process-wide request/error/latency accounting.
///
/// Everything is monotonic since startup; there is no persistence and no
/// export surface beyond the formatted `/stats` snapshot.
#[derive(Default)]
pub struct StatsRegistry {
    requests: AtomicU64,
    exchanges: AtomicU64,
    latency_ms_total: AtomicU64,
    latency_count: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    errors: Mutex<BTreeMap<&'static str, u64>>,
}

#[derive(Clone, Debug)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub exchanges: u64,
    pub errors: BTreeMap<&'static str, u64>,
    pub avg_latency_ms: Option<u64>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One inbound message accepted past the access gate.
    pub fn inc_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// One successful upstream exchange (user turn answered and persisted).
    pub fn inc_exchange(&self) {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_error(&self, stage: &'static str) {
        let mut errors = self.errors.lock().unwrap_or_else(|e| e.into_inner());
        *errors.entry(stage).or_insert(0) += 1;
    }

    pub fn observe_latency(&self, elapsed: Duration) {
        self.latency_ms_total
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tokens(&self, usage: TokenUsage) {
        if let Some(n) = usage.prompt_tokens {
            self.prompt_tokens.fetch_add(n, Ordering::Relaxed);
        }
        if let Some(n) = usage.completion_tokens {
            self.completion_tokens.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let count = self.latency_count.load(Ordering::Relaxed);
        let avg_latency_ms = if count > 0 {
            Some(self.latency_ms_total.load(Ordering::Relaxed) / count)
        } else {
            None
        };
        let errors = self
            .errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            exchanges: self.exchanges.load(Ordering::Relaxed),
            errors,
            avg_latency_ms,
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Plain-text rendering for the `/stats` reply.
    pub fn render(&self) -> String {
        let mut lines = vec![
            "Bot stats:".to_string(),
            format!("- requests: {}", self.requests),
            format!("- successful exchanges: {}", self.exchanges),
        ];

        if self.errors.is_empty() {
            lines.push("- errors: none".to_string());
        } else {
            let parts: Vec<String> = self
                .errors
                .iter()
                .map(|(stage, n)| format!("{stage}={n}"))
                .collect();
            lines.push(format!("- errors: {}", parts.join(", ")));
        }

        match self.avg_latency_ms {
            Some(ms) => lines.push(format!("- avg upstream latency: {ms} ms")),
            None => lines.push("- avg upstream latency: n/a".to_string()),
        }
        lines.push(format!(
            "- tokens: prompt={}, completion={}",
            self.prompt_tokens, self.completion_tokens
        ));

        lines.join("\n")
    }
}
