//! Telegram adapter (teloxide).
//!
//! Thin transport layer: it turns updates into `InboundMessage`s for the
//! core dialogue and sends the reply back, escaped for the configured parse
//! mode and split into Telegram-sized chunks. Both delivery modes (polling
//! in [`router`], webhook in [`server`]) funnel into the same handlers.

use teloxide::{
    prelude::*,
    types::{MessageId, ParseMode},
};

use tokio::time::sleep;
use tracing::error;

use gtb_core::{
    config::{self, Config},
    formatting::{escape_for, split_message, TELEGRAM_SAFE_LIMIT},
};

pub mod handlers;
pub mod router;
pub mod server;

pub use router::{run_polling, AppState, ChatLocks};
pub use server::run_webhook;

fn tg_parse_mode(mode: config::ParseMode) -> ParseMode {
    match mode {
        config::ParseMode::Html => ParseMode::Html,
        config::ParseMode::MarkdownV2 => ParseMode::MarkdownV2,
    }
}

/// Send a reply, escaped and chunked. Failures are logged, never bubbled:
/// a lost reply must not fail the already-processed update.
pub async fn send_reply(
    bot: &Bot,
    cfg: &Config,
    chat: teloxide::types::ChatId,
    reply_to: Option<MessageId>,
    text: &str,
) {
    let escaped = escape_for(cfg.parse_mode, text);
    let parse_mode = tg_parse_mode(cfg.parse_mode);

    for chunk in split_message(&escaped, TELEGRAM_SAFE_LIMIT) {
        let sent = with_retry(|| {
            let mut req = bot.send_message(chat, chunk.clone()).parse_mode(parse_mode);
            if let Some(id) = reply_to {
                req = req.reply_to_message_id(id);
            }
            req
        })
        .await;

        if let Err(e) = sent {
            error!(chat_id = chat.0, error = %e, "telegram_send_failed");
            return;
        }
    }
}

/// Retry once on Telegram's own rate limiting, after the server-suggested
/// delay.
async fn with_retry<T, Fut>(mut op: impl FnMut() -> Fut) -> Result<T, teloxide::RequestError>
where
    Fut: std::future::IntoFuture<Output = Result<T, teloxide::RequestError>>,
    Fut::IntoFuture: Send,
{
    const MAX_RETRIES: usize = 1;
    let mut attempts = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                attempts += 1;
                sleep(d).await;
            }
            Err(other) => return Err(other),
        }
    }
}
