//! GigaChat HTTP adapter.
//!
//! Implements the `gtb-core` `ChatClient` port over the GigaChat API:
//! OAuth-style token issuance with Basic credentials ([`auth`]) and the
//! chat-completion call with its retry state machine ([`client`]).

use std::time::Duration;

use rand::Rng;

pub mod auth;
pub mod client;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::TokenManager;
pub use client::GigaChatClient;

/// Exponential backoff with jitter: `base * 2^attempt`, half fixed and half
/// random so concurrent retries spread out.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let capped = base.saturating_mul(1u32 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0.0..0.5);
    capped / 2 + capped.mul_f64(jitter)
}
