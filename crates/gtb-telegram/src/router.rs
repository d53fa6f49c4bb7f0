//! Shared adapter state and the long-polling dispatcher.

use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use gtb_core::{config::Config, dialogue::Dialogue, history::HistoryStore};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub dialogue: Arc<Dialogue>,
    pub store: Arc<dyn HistoryStore>,
    pub chat_locks: Arc<ChatLocks>,
}

/// Serializes turns within one chat while chats stay independent. This plus
/// the store's per-key atomicity is the only ordering the system needs.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(bot: Bot, state: Arc<AppState>) -> anyhow::Result<()> {
    if let Ok(me) = bot.get_me().await {
        info!(username = me.username(), "bot_started");
    }
    info!(
        allowed_users = state.cfg.allowed_user_ids.len(),
        admins = state.cfg.admin_user_ids.len(),
        "polling_started"
    );

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_edited_message().endpoint(handlers::handle_edited_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
