//! System-prompt selection and upstream message assembly.

use crate::{
    config::Config,
    domain::{ChatMessage, ChatMode},
};

/// Default prompt for the friendly mode. Deployments usually override this
/// via `BASE_PROMPT`.
pub const DEFAULT_BASE_PROMPT: &str = "You are a friendly assistant. Explain things plainly and \
in simple words, but do not cut useful detail: when someone asks for a recipe or instructions, \
give a complete, clear plan with steps and timing hints. If a question is short and needs no \
detail, answer briefly. If a question is incomplete, ask the single most important follow-up \
and wait for the answer. Never promise what you cannot do; if unsure, say so honestly and \
suggest something safe. Stay warm and respectful.";

/// Appended to the base prompt in concise mode.
pub const DEFAULT_CONCISE_SUFFIX: &str = " Concise mode is on: keep answers clear and shorter \
than usual, with no extra follow-up questions unless the user explicitly asks.";

/// The system prompt for a chat's current mode. Concise is the friendly
/// prompt plus a brevity suffix, so both modes share one voice.
pub fn system_prompt(cfg: &Config, mode: ChatMode) -> String {
    let base = cfg.base_prompt.as_deref().unwrap_or(DEFAULT_BASE_PROMPT);
    match mode {
        ChatMode::Friendly => base.to_string(),
        ChatMode::Concise => {
            let suffix = cfg
                .concise_suffix
                .as_deref()
                .unwrap_or(DEFAULT_CONCISE_SUFFIX);
            format!("{base}{suffix}")
        }
    }
}

/// [system] + stored history + the new user message, in upstream order.
pub fn build_messages(
    system: &str,
    history: &[ChatMessage],
    user_text: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(user_text));
    messages
}
