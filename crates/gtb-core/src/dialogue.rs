//! Dialogue orchestrator: the per-message state machine.
//!
//! Every inbound text message flows through here: access gate, command
//! routing, history assembly, the upstream call, and persistence of the
//! finished exchange. The orchestrator never retries an upstream failure;
//! one failure yields exactly one user-facing apology.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    access::{classify, AccessRole},
    config::Config,
    domain::{ChatId, ChatMessage, ChatMode, Role, UserId},
    history::HistoryStore,
    llm::{ChatClient, ChatRequest},
    prompt::{build_messages, system_prompt},
    stats::StatsRegistry,
};

/// Longest message we forward upstream, in characters.
pub const MAX_MESSAGE_CHARS: usize = 3500;

pub const UNAUTHORIZED_REPLY: &str =
    "Sorry, this bot is private. Ask the owner for access.";
pub const EMPTY_REPLY: &str = "I only see an empty message so far.";
pub const TOO_LONG_REPLY: &str =
    "That message is too long, try splitting it into a few smaller ones.";
pub const VOICE_REPLY: &str =
    "I can only read text for now. If you can, please type your question.";
pub const UNSUPPORTED_REPLY: &str = "I can only answer text questions for now.";
pub const APOLOGY_REPLY: &str =
    "I can't get an answer right now. Let's try again in a couple of minutes.";
pub const ADMIN_ONLY_REPLY: &str = "This command is for admins only.";

const START_REPLY: &str = "Hi! I answer text questions. Just type what you want to know and \
I'll do my best to reply quickly and to the point.";
const HELP_REPLY: &str = "Write your question as plain text. You can ask follow-ups or new \
questions any time. /reset clears our conversation history. Admin commands: \
/mode friendly|concise, /stats, /health.";
const RESET_REPLY: &str = "Done, I've forgotten our conversation. Ask me anything.";
const UNKNOWN_COMMAND_REPLY: &str =
    "I don't know that command. Just write your question as text.";
const MODE_USAGE_REPLY: &str = "Use /mode friendly or /mode concise.";

/// One inbound text message, already stripped to what the core needs.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub text: String,
}

/// Composes prompt + history + new message, drives the upstream client, and
/// persists successful exchanges. One instance serves the whole process.
pub struct Dialogue {
    cfg: Arc<Config>,
    store: Arc<dyn HistoryStore>,
    client: Arc<dyn ChatClient>,
    stats: Arc<StatsRegistry>,
    // Opaque per-chat tags for provider-side affinity; process lifetime only.
    session_tags: Mutex<HashMap<i64, String>>,
}

impl Dialogue {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<dyn HistoryStore>,
        client: Arc<dyn ChatClient>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            cfg,
            store,
            client,
            stats,
            session_tags: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one inbound message and produce the reply text.
    pub async fn handle(&self, msg: &InboundMessage) -> String {
        let role = classify(msg.user_id, &self.cfg);
        if role == AccessRole::Unauthorized {
            info!(user_id = msg.user_id.0, "unauthorized_message_rejected");
            self.stats.inc_error("unauthorized");
            return UNAUTHORIZED_REPLY.to_string();
        }

        self.stats.inc_request();

        let text = msg.text.trim();
        if text.is_empty() {
            return EMPTY_REPLY.to_string();
        }
        if let Some(stripped) = text.strip_prefix('/') {
            return self.handle_command(stripped, msg.chat_id, role).await;
        }

        self.answer(msg.chat_id, text).await
    }

    async fn handle_command(&self, command: &str, chat: ChatId, role: AccessRole) -> String {
        let (name, args) = parse_command(command);
        info!(chat_id = chat.0, command = %name, "command_received");

        match name.as_str() {
            "start" => START_REPLY.to_string(),
            "help" => HELP_REPLY.to_string(),
            "reset" => {
                if let Err(e) = self.store.reset(chat).await {
                    warn!(chat_id = chat.0, error = %e, "history_reset_failed");
                    self.stats.inc_error(e.stage());
                    return APOLOGY_REPLY.to_string();
                }
                RESET_REPLY.to_string()
            }
            "stats" | "mode" | "health" if role != AccessRole::Admin => {
                ADMIN_ONLY_REPLY.to_string()
            }
            "stats" => self.stats.snapshot().render(),
            "mode" => self.handle_mode(chat, &args).await,
            "health" => self.handle_health().await,
            _ => UNKNOWN_COMMAND_REPLY.to_string(),
        }
    }

    async fn handle_mode(&self, chat: ChatId, args: &str) -> String {
        if args.is_empty() {
            let current = self
                .store
                .mode(chat)
                .await
                .unwrap_or(self.cfg.default_mode);
            return format!(
                "Current mode: {}. Available: friendly, concise.",
                current.as_str()
            );
        }

        let Some(mode) = ChatMode::parse(args) else {
            return MODE_USAGE_REPLY.to_string();
        };
        if let Err(e) = self.store.set_mode(chat, mode).await {
            warn!(chat_id = chat.0, error = %e, "mode_switch_failed");
            self.stats.inc_error(e.stage());
            return APOLOGY_REPLY.to_string();
        }
        info!(chat_id = chat.0, mode = mode.as_str(), "mode_switched");
        format!("Done. Mode switched to {}.", mode.as_str())
    }

    async fn handle_health(&self) -> String {
        let (overall, store) = match self.store.ping().await {
            Ok(()) => ("ok", "ok".to_string()),
            Err(e) => ("degraded", format!("failed ({e})")),
        };
        format!("Service health:\n- overall: {overall}\n- store: {store}")
    }

    /// The LLM-bound path: steps 4-6 of the per-message state machine.
    async fn answer(&self, chat: ChatId, text: &str) -> String {
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return TOO_LONG_REPLY.to_string();
        }

        // A store failure on read degrades to an empty history: losing
        // context is better than failing the turn.
        let history = match self.store.get(chat).await {
            Ok(history) => history,
            Err(e) => {
                warn!(chat_id = chat.0, error = %e, "history_read_failed");
                self.stats.inc_error(e.stage());
                Vec::new()
            }
        };
        let mode = self
            .store
            .mode(chat)
            .await
            .unwrap_or(self.cfg.default_mode);

        let text = augment_follow_up(text, &history);
        let messages = build_messages(&system_prompt(&self.cfg, mode), &history, &text);

        let request = ChatRequest {
            messages,
            session_tag: Some(self.session_tag(chat)),
        };

        let started = Instant::now();
        let completion = match self.client.complete(request).await {
            Ok(completion) => completion,
            Err(e) => {
                error!(chat_id = chat.0, stage = e.stage(), error = %e, "upstream_failed");
                self.stats.inc_error(e.stage());
                // The user turn is not persisted: an unanswered question
                // must not pollute the next exchange's context.
                return APOLOGY_REPLY.to_string();
            }
        };

        self.stats.observe_latency(started.elapsed());
        self.stats.add_tokens(completion.usage);
        self.stats.inc_exchange();

        // Persist the finished exchange. Write failures do not take back the
        // answer we already have.
        for msg in [
            ChatMessage::user(text),
            ChatMessage::assistant(completion.text.clone()),
        ] {
            if let Err(e) = self.store.append(chat, msg).await {
                warn!(chat_id = chat.0, error = %e, "history_write_failed");
                self.stats.inc_error(e.stage());
                break;
            }
        }

        completion.text
    }

    fn session_tag(&self, chat: ChatId) -> String {
        let mut tags = self.session_tags.lock().unwrap_or_else(|e| e.into_inner());
        tags.entry(chat.0)
            .or_insert_with(|| Uuid::new_v4().simple().to_string())
            .clone()
    }
}

/// Telegram may send `/cmd@botname arg1 ...`; the bot-name suffix is noise.
fn parse_command(command: &str) -> (String, String) {
    let mut parts = command.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let name = first.split('@').next().unwrap_or("").to_lowercase();
    (name, rest)
}

/// Expand a bare confirmation ("yes", "ok", ...) with the previous exchange
/// so the model sees what the user is agreeing to.
fn augment_follow_up(text: &str, history: &[ChatMessage]) -> String {
    const CONFIRMATIONS: [&str; 8] = [
        "yes", "yeah", "yep", "ok", "okay", "sure", "go ahead", "please do",
    ];

    let normalized = text.trim().to_lowercase();
    if !CONFIRMATIONS.contains(&normalized.as_str()) {
        return text.to_string();
    }

    let last_assistant = history
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.content.as_str());
    let last_user = history
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str());

    let mut hints = Vec::new();
    if let Some(reply) = last_assistant {
        hints.push(format!("Please continue your previous answer: {reply}"));
    }
    if let Some(question) = last_user {
        hints.push(format!("The request context was: {question}"));
    }

    if hints.is_empty() {
        return text.to_string();
    }
    format!("{text}. {}", hints.join(" "))
}
