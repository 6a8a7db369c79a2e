//! Per-session conversation history.
//!
//! Each session owns an ordered window of turns. The window is bounded by
//! count: appending past the limit evicts the oldest turns first.
//!
//! Reads and appends are separate operations, so two requests racing on the
//! same session can interleave between them (last writer wins on ordering).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::provider::Message;

/// Default number of turns kept per session.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Convert to the backend's message vocabulary.
    pub fn to_message(&self) -> Message {
        match self.role {
            Role::Human => Message::user(self.content.clone()),
            Role::Assistant => Message::assistant(self.content.clone()),
        }
    }
}

/// Storage for session histories.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Get the turns of a session, creating an empty session if unseen.
    async fn history(&self, session_id: &str) -> Vec<Turn>;

    /// Append turns in order, then evict the oldest beyond the retention limit.
    async fn append(&self, session_id: &str, turns: Vec<Turn>);

    /// Remove a session. Returns `true` if it existed.
    async fn clear(&self, session_id: &str) -> bool;
}

/// In-process store backed by a shared map.
#[derive(Debug, Clone)]
pub struct MemoryConversationStore {
    sessions: Arc<RwLock<HashMap<String, VecDeque<Turn>>>>,
    limit: usize,
}

impl MemoryConversationStore {
    /// Create a store keeping at most `limit` turns per session.
    pub fn new(limit: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            limit: limit.max(1),
        }
    }

    /// Retention limit per session.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn history(&self, session_id: &str) -> Vec<Turn> {
        if let Some(turns) = self.sessions.read().await.get(session_id) {
            return turns.iter().cloned().collect();
        }

        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .iter()
            .cloned()
            .collect()
    }

    async fn append(&self, session_id: &str, turns: Vec<Turn>) {
        let mut sessions = self.sessions.write().await;
        let history = sessions.entry(session_id.to_string()).or_default();
        history.extend(turns);

        while history.len() > self.limit {
            history.pop_front();
        }
    }

    async fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exchange(store: &MemoryConversationStore, id: &str, n: usize) {
        store
            .append(
                id,
                vec![
                    Turn::human(format!("question {n}")),
                    Turn::assistant(format!("answer {n}")),
                ],
            )
            .await;
    }

    #[tokio::test]
    async fn test_history_creates_session_lazily() {
        let store = MemoryConversationStore::default();
        assert_eq!(store.session_count().await, 0);

        assert!(store.history("s1").await.is_empty());
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_turn_count_is_bounded() {
        let store = MemoryConversationStore::default();

        for n in 1..=3 {
            exchange(&store, "s1", n).await;
        }
        assert_eq!(store.history("s1").await.len(), 6);

        for n in 4..=15 {
            exchange(&store, "s1", n).await;
        }
        let history = store.history("s1").await;
        assert_eq!(history.len(), 20);

        // Oldest five exchanges evicted, order preserved
        assert_eq!(history[0], Turn::human("question 6"));
        assert_eq!(history[1], Turn::assistant("answer 6"));
        assert_eq!(history[19], Turn::assistant("answer 15"));
    }

    #[tokio::test]
    async fn test_custom_limit() {
        let store = MemoryConversationStore::new(3);
        exchange(&store, "s1", 1).await;
        exchange(&store, "s1", 2).await;

        let history = store.history("s1").await;
        assert_eq!(
            history,
            vec![
                Turn::assistant("answer 1"),
                Turn::human("question 2"),
                Turn::assistant("answer 2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryConversationStore::default();
        assert!(!store.clear("missing").await);

        exchange(&store, "s1", 1).await;
        exchange(&store, "s2", 1).await;
        assert!(store.clear("s1").await);
        assert!(!store.clear("s1").await);

        assert!(store.history("s1").await.is_empty());
        assert_eq!(store.history("s2").await.len(), 2);
    }

    #[test]
    fn test_turn_to_message() {
        assert_eq!(Turn::human("hi").to_message(), Message::user("hi"));
        assert_eq!(Turn::assistant("yo").to_message(), Message::assistant("yo"));
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Turn::human("hi")).unwrap();
        assert_eq!(json, r#"{"role":"human","content":"hi"}"#);
    }
}
