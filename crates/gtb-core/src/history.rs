//! Per-chat conversation history behind a TTL-keyed store port.
//!
//! Each chat maps to one entry holding its message log and mode. Writes
//! refresh the entry's expiry (sliding TTL); reads do not. Read-modify-write
//! on one chat is atomic via a per-entry lock, and different chats never
//! block each other.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::{ChatId, ChatMessage, ChatMode, Role},
    Result,
};

/// Port for the conversation store.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Ordered message log for a chat (empty when absent or expired).
    async fn get(&self, chat: ChatId) -> Result<Vec<ChatMessage>>;
    /// Append one message, trim to the turn bound, refresh the TTL.
    async fn append(&self, chat: ChatId, msg: ChatMessage) -> Result<()>;
    /// Drop the chat's message log (mode survives).
    async fn reset(&self, chat: ChatId) -> Result<()>;
    /// Current mode for a chat, or the configured default.
    async fn mode(&self, chat: ChatId) -> Result<ChatMode>;
    /// Switch the chat's mode, refreshing the TTL.
    async fn set_mode(&self, chat: ChatId, mode: ChatMode) -> Result<()>;
    /// Health probe.
    async fn ping(&self) -> Result<()>;
}

struct Entry {
    messages: Vec<ChatMessage>,
    mode: Option<ChatMode>,
    expires_at: Instant,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process implementation of [`HistoryStore`].
///
/// Two-level locking: the outer map lock is held only long enough to fetch
/// or create the per-chat entry lock, so concurrent chats proceed in
/// parallel while a single chat's read-modify-write stays serialized.
pub struct MemoryHistory {
    max_messages: usize,
    ttl: Duration,
    default_mode: ChatMode,
    entries: Mutex<HashMap<i64, Arc<Mutex<Entry>>>>,
}

impl MemoryHistory {
    pub fn new(max_messages: usize, ttl: Duration, default_mode: ChatMode) -> Self {
        Self {
            max_messages,
            ttl,
            default_mode,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn entry(&self, chat: ChatId, now: Instant) -> Arc<Mutex<Entry>> {
        let mut map = self.entries.lock().await;
        map.entry(chat.0)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Entry {
                    messages: Vec::new(),
                    mode: None,
                    expires_at: now + self.ttl,
                }))
            })
            .clone()
    }

    /// Drop entries whose TTL has lapsed. Scheduled periodically by the
    /// binary so abandoned chats do not accumulate; expiry is also applied
    /// lazily on access, so correctness does not depend on the sweep.
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now()).await
    }

    pub async fn purge_expired_at(&self, now: Instant) -> usize {
        let mut map = self.entries.lock().await;
        let before = map.len();

        let mut dead = Vec::new();
        for (chat, entry) in map.iter() {
            // The map lock is held, so nobody can fetch a new handle; an
            // entry lock that is busy belongs to an in-flight turn and is
            // not expired from the caller's point of view.
            if let Ok(guard) = entry.try_lock() {
                if guard.expired(now) {
                    dead.push(*chat);
                }
            }
        }
        for chat in &dead {
            map.remove(chat);
        }

        before - map.len()
    }

    pub async fn get_at(&self, chat: ChatId, now: Instant) -> Vec<ChatMessage> {
        let entry = self.entry(chat, now).await;
        let mut guard = entry.lock().await;
        if guard.expired(now) {
            guard.messages.clear();
            guard.mode = None;
        }
        guard.messages.clone()
    }

    pub async fn append_at(&self, chat: ChatId, msg: ChatMessage, now: Instant) {
        let entry = self.entry(chat, now).await;
        let mut guard = entry.lock().await;
        if guard.expired(now) {
            guard.messages.clear();
            guard.mode = None;
        }
        guard.messages.push(msg);
        trim_oldest_turns(&mut guard.messages, self.max_messages);
        guard.expires_at = now + self.ttl;
    }

    pub async fn reset_at(&self, chat: ChatId, now: Instant) {
        let entry = self.entry(chat, now).await;
        let mut guard = entry.lock().await;
        if guard.expired(now) {
            guard.mode = None;
        }
        guard.messages.clear();
        guard.expires_at = now + self.ttl;
    }

    pub async fn mode_at(&self, chat: ChatId, now: Instant) -> ChatMode {
        let entry = self.entry(chat, now).await;
        let mut guard = entry.lock().await;
        if guard.expired(now) {
            guard.messages.clear();
            guard.mode = None;
        }
        guard.mode.unwrap_or(self.default_mode)
    }

    pub async fn set_mode_at(&self, chat: ChatId, mode: ChatMode, now: Instant) {
        let entry = self.entry(chat, now).await;
        let mut guard = entry.lock().await;
        if guard.expired(now) {
            guard.messages.clear();
        }
        guard.mode = Some(mode);
        guard.expires_at = now + self.ttl;
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn get(&self, chat: ChatId) -> Result<Vec<ChatMessage>> {
        Ok(self.get_at(chat, Instant::now()).await)
    }

    async fn append(&self, chat: ChatId, msg: ChatMessage) -> Result<()> {
        self.append_at(chat, msg, Instant::now()).await;
        Ok(())
    }

    async fn reset(&self, chat: ChatId) -> Result<()> {
        self.reset_at(chat, Instant::now()).await;
        Ok(())
    }

    async fn mode(&self, chat: ChatId) -> Result<ChatMode> {
        Ok(self.mode_at(chat, Instant::now()).await)
    }

    async fn set_mode(&self, chat: ChatId, mode: ChatMode) -> Result<()> {
        self.set_mode_at(chat, mode, Instant::now()).await;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// FIFO eviction by whole turns: a leading user message paired with its
/// assistant reply goes as a unit; a leading message without its pair (for
/// example after a failed exchange left an odd-length log) goes alone.
fn trim_oldest_turns(messages: &mut Vec<ChatMessage>, max: usize) {
    while messages.len() > max {
        let take = if messages.len() >= 2
            && messages[0].role == Role::User
            && messages[1].role == Role::Assistant
        {
            2
        } else {
            1
        };
        messages.drain(..take);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAT: ChatId = ChatId(10);

    fn store() -> MemoryHistory {
        // 2 turns = 4 messages, 60s TTL.
        MemoryHistory::new(4, Duration::from_secs(60), ChatMode::Friendly)
    }

    fn turn(store_msgs: &mut Vec<ChatMessage>, n: usize) {
        store_msgs.push(ChatMessage::user(format!("q{n}")));
        store_msgs.push(ChatMessage::assistant(format!("a{n}")));
    }

    #[tokio::test]
    async fn history_is_bounded_and_keeps_most_recent_turns() {
        let s = store();
        let now = Instant::now();

        for n in 1..=5 {
            s.append_at(CHAT, ChatMessage::user(format!("q{n}")), now).await;
            s.append_at(CHAT, ChatMessage::assistant(format!("a{n}")), now)
                .await;
        }

        let msgs = s.get_at(CHAT, now).await;
        assert_eq!(msgs.len(), 4);
        let contents: Vec<&str> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q4", "a4", "q5", "a5"]);
    }

    #[tokio::test]
    async fn trimming_drops_an_unpaired_leading_message_alone() {
        let mut msgs = vec![
            ChatMessage::assistant("orphan"),
            ChatMessage::user("q1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
            ChatMessage::assistant("a2"),
        ];
        trim_oldest_turns(&mut msgs, 4);
        let contents: Vec<&str> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2", "a2"]);
    }

    #[tokio::test]
    async fn trimming_drops_whole_pairs_when_paired() {
        let mut msgs = Vec::new();
        turn(&mut msgs, 1);
        turn(&mut msgs, 2);
        turn(&mut msgs, 3);
        trim_oldest_turns(&mut msgs, 4);
        let contents: Vec<&str> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q2", "a2", "q3", "a3"]);
    }

    #[tokio::test]
    async fn writes_slide_the_ttl_but_reads_do_not() {
        let s = store();
        let t0 = Instant::now();

        s.append_at(CHAT, ChatMessage::user("hello"), t0).await;

        // A write at t0+40s pushes expiry to t0+100s.
        let t1 = t0 + Duration::from_secs(40);
        s.append_at(CHAT, ChatMessage::assistant("hi"), t1).await;

        // Reading at t0+90s (past the original t0+60s deadline) still works.
        let t2 = t0 + Duration::from_secs(90);
        assert_eq!(s.get_at(CHAT, t2).await.len(), 2);

        // The read did not refresh: at t1+60s the entry is gone.
        let t3 = t1 + Duration::from_secs(61);
        assert!(s.get_at(CHAT, t3).await.is_empty());
    }

    #[tokio::test]
    async fn expiry_clears_mode_back_to_default() {
        let s = store();
        let t0 = Instant::now();

        s.set_mode_at(CHAT, ChatMode::Concise, t0).await;
        assert_eq!(s.mode_at(CHAT, t0).await, ChatMode::Concise);

        let later = t0 + Duration::from_secs(61);
        assert_eq!(s.mode_at(CHAT, later).await, ChatMode::Friendly);
    }

    #[tokio::test]
    async fn reset_clears_messages_but_keeps_mode() {
        let s = store();
        let now = Instant::now();

        s.set_mode_at(CHAT, ChatMode::Concise, now).await;
        s.append_at(CHAT, ChatMessage::user("hello"), now).await;
        s.reset_at(CHAT, now).await;

        assert!(s.get_at(CHAT, now).await.is_empty());
        assert_eq!(s.mode_at(CHAT, now).await, ChatMode::Concise);
    }

    #[tokio::test]
    async fn chats_are_independent() {
        let s = store();
        let now = Instant::now();

        s.append_at(ChatId(1), ChatMessage::user("one"), now).await;
        s.append_at(ChatId(2), ChatMessage::user("two"), now).await;

        assert_eq!(s.get_at(ChatId(1), now).await[0].content, "one");
        assert_eq!(s.get_at(ChatId(2), now).await[0].content, "two");
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let s = store();
        let t0 = Instant::now();

        s.append_at(ChatId(1), ChatMessage::user("old"), t0).await;
        let t1 = t0 + Duration::from_secs(50);
        s.append_at(ChatId(2), ChatMessage::user("fresh"), t1).await;

        let purged = s.purge_expired_at(t0 + Duration::from_secs(70)).await;
        assert_eq!(purged, 1);
        assert_eq!(s.get_at(ChatId(2), t1).await.len(), 1);
    }
}
