use std::sync::Arc;

use teloxide::Bot;
use tracing::{debug, error};

use gtb_core::{
    config::{AppMode, Config},
    dialogue::Dialogue,
    history::{HistoryStore, MemoryHistory},
    stats::StatsRegistry,
};
use gtb_gigachat::{GigaChatClient, TokenManager};
use gtb_telegram::{run_polling, run_webhook, AppState, ChatLocks};

#[tokio::main]
async fn main() -> Result<(), gtb_core::Error> {
    gtb_core::logging::init("gtb");

    let cfg = Arc::new(Config::load()?);

    let store = Arc::new(MemoryHistory::new(
        cfg.max_history_messages(),
        cfg.history_ttl,
        cfg.default_mode,
    ));
    spawn_history_purge(store.clone(), cfg.history_purge_interval);

    let tokens = Arc::new(TokenManager::new(&cfg)?);
    let client = Arc::new(GigaChatClient::new(&cfg, tokens)?);
    let stats = Arc::new(StatsRegistry::new());
    let history: Arc<dyn HistoryStore> = store.clone();
    let dialogue = Arc::new(Dialogue::new(cfg.clone(), history.clone(), client, stats));

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        dialogue,
        store,
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let served = match cfg.app_mode {
        AppMode::Polling => run_polling(bot, state).await,
        AppMode::Webhook => run_webhook(bot, state).await,
    };
    served.map_err(|e| {
        error!(error = %e, "bot_stopped");
        gtb_core::Error::Transport(format!("telegram bot failed: {e}"))
    })
}

fn spawn_history_purge(store: Arc<MemoryHistory>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.tick().await; // the first tick fires immediately
        loop {
            tick.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                debug!(purged, "expired_histories_purged");
            }
        }
    });
}
