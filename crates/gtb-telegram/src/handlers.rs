//! Update intake shared by the polling dispatcher and the webhook server.

use std::{sync::Arc, time::Duration};

use teloxide::{
    prelude::*,
    types::{ChatAction, Message, UpdateKind},
};
use tracing::{debug, info};

use gtb_core::{
    access::{classify, AccessRole},
    dialogue::{InboundMessage, UNAUTHORIZED_REPLY, UNSUPPORTED_REPLY, VOICE_REPLY},
    domain::{ChatId, UserId},
};

use crate::{router::AppState, send_reply};

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    process_message(&bot, &msg, &state).await;
    Ok(())
}

pub async fn handle_edited_message(
    bot: Bot,
    msg: Message,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    if !state.cfg.process_edited_messages {
        debug!(chat_id = msg.chat.id.0, "edited_message_ignored");
        return Ok(());
    }
    process_message(&bot, &msg, &state).await;
    Ok(())
}

/// Entry point for webhook delivery, where updates arrive raw instead of
/// through the dispatcher.
pub async fn process_update(bot: Bot, update: Update, state: Arc<AppState>) {
    match update.kind {
        UpdateKind::Message(msg) => process_message(&bot, &msg, &state).await,
        UpdateKind::EditedMessage(msg) if state.cfg.process_edited_messages => {
            process_message(&bot, &msg, &state).await
        }
        _ => debug!("update_ignored"),
    }
}

async fn process_message(bot: &Bot, msg: &Message, state: &Arc<AppState>) {
    let Some(user) = msg.from() else {
        debug!(chat_id = msg.chat.id.0, "update_missing_user");
        return;
    };
    let user_id = user.id.0 as i64;
    let chat_id = msg.chat.id.0;
    info!(user_id, chat_id, "incoming_update");

    // One turn at a time per chat; other chats proceed in parallel.
    let _guard = state.chat_locks.lock_chat(chat_id).await;

    if let Some(text) = msg.text() {
        answer_text(bot, msg, state, user_id, text).await;
        return;
    }

    // Non-text content never reaches the core, but the access gate still
    // comes first so canned replies don't leak to strangers.
    if classify(UserId(user_id), &state.cfg) == AccessRole::Unauthorized {
        info!(user_id, "unauthorized_message_rejected");
        send_reply(bot, &state.cfg, msg.chat.id, Some(msg.id), UNAUTHORIZED_REPLY).await;
        return;
    }

    if msg.voice().is_some() {
        send_reply(bot, &state.cfg, msg.chat.id, Some(msg.id), VOICE_REPLY).await;
        return;
    }

    // A photo or document with a caption is answered as a text question.
    if let Some(caption) = msg.caption() {
        if msg.photo().is_some() || msg.document().is_some() {
            answer_text(bot, msg, state, user_id, caption).await;
            return;
        }
    }

    send_reply(bot, &state.cfg, msg.chat.id, Some(msg.id), UNSUPPORTED_REPLY).await;
}

async fn answer_text(bot: &Bot, msg: &Message, state: &Arc<AppState>, user_id: i64, text: &str) {
    // Typing indicator only for LLM-bound turns; commands answer instantly.
    let typing = if text.trim_start().starts_with('/') {
        None
    } else {
        Some(spawn_typing(bot.clone(), msg.chat.id))
    };

    let reply = state
        .dialogue
        .handle(&InboundMessage {
            chat_id: ChatId(msg.chat.id.0),
            user_id: UserId(user_id),
            text: text.to_string(),
        })
        .await;

    if let Some(stop) = typing {
        let _ = stop.send(());
    }

    send_reply(bot, &state.cfg, msg.chat.id, Some(msg.id), &reply).await;
}

/// Best-effort "typing..." loop while the upstream call is in flight.
fn spawn_typing(bot: Bot, chat: teloxide::types::ChatId) -> tokio::sync::oneshot::Sender<()> {
    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let _ = bot.send_chat_action(chat, ChatAction::Typing).await;
                }
                _ = &mut stop_rx => break,
            }
        }
    });
    stop_tx
}
