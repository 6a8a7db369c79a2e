//! Streaming relay.
//!
//! Turns backend [`StreamEvent`]s into client events. Fragments pass through as
//! they arrive and are concatenated into the assistant turn. History is written
//! once, on `Done`. An error, or a backend that stops without `Done`, ends the
//! relay with an error event and leaves history alone; fragments already sent
//! are not retracted.

use axum::response::sse::Event;
use futures_util::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::provider::{StreamEvent, TokenStream};
use crate::session::{ConversationStore, Turn};

/// Summary carried by stream error events.
pub const STREAM_ERROR: &str = "Streaming failed";

/// Event sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RelayEvent {
    Token {
        token: String,
    },
    Done {
        done: bool,
        #[serde(rename = "sessionId")]
        session_id: String,
        model: String,
    },
    Error {
        error: String,
        details: String,
    },
}

impl RelayEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token { token: text.into() }
    }

    pub fn done(session_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self::Done {
            done: true,
            session_id: session_id.into(),
            model: model.into(),
        }
    }

    pub fn error(details: impl Into<String>) -> Self {
        Self::Error {
            error: STREAM_ERROR.to_string(),
            details: details.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Token { .. })
    }

    /// Encode as one SSE `data:` frame.
    pub fn to_sse(&self) -> Event {
        Event::default().data(serde_json::to_string(self).unwrap_or_default())
    }
}

/// Relay for one streamed exchange.
pub struct StreamRelay {
    store: Arc<dyn ConversationStore>,
    session_id: String,
    model: String,
    /// Original user message, stored as the human turn
    message: String,
}

impl StreamRelay {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        session_id: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            model: model.into(),
            message: message.into(),
        }
    }

    /// Consume backend events and produce client events.
    ///
    /// Dropping the returned stream drops the backend stream with it.
    pub fn relay(self, mut events: TokenStream) -> BoxStream<'static, RelayEvent> {
        let stream = async_stream::stream! {
            let mut reply = String::new();
            let mut fragments = 0usize;

            while let Some(event) = events.next().await {
                match event {
                    StreamEvent::Token(text) => {
                        fragments += 1;
                        reply.push_str(&text);
                        yield RelayEvent::token(text);
                    }
                    StreamEvent::Done => {
                        self.store
                            .append(
                                &self.session_id,
                                vec![Turn::human(self.message.clone()), Turn::assistant(reply)],
                            )
                            .await;
                        info!(
                            session_id = %self.session_id,
                            model = %self.model,
                            fragments,
                            "Stream completed"
                        );
                        yield RelayEvent::done(self.session_id.clone(), self.model.clone());
                        return;
                    }
                    StreamEvent::Error(details) => {
                        warn!(
                            session_id = %self.session_id,
                            model = %self.model,
                            fragments,
                            error = %details,
                            "Stream failed"
                        );
                        yield RelayEvent::error(details);
                        return;
                    }
                }
            }

            warn!(session_id = %self.session_id, fragments, "Backend stream ended without completion");
            yield RelayEvent::error("Backend closed the stream before completion");
        };

        stream.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryConversationStore;
    use futures_util::stream;

    fn scripted(events: Vec<StreamEvent>) -> TokenStream {
        stream::iter(events).boxed()
    }

    #[test]
    fn test_event_wire_shapes() {
        let json = serde_json::to_value(RelayEvent::token("Hel")).unwrap();
        assert_eq!(json, serde_json::json!({"token": "Hel"}));

        let json = serde_json::to_value(RelayEvent::done("s1", "llama3")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"done": true, "sessionId": "s1", "model": "llama3"})
        );

        let json = serde_json::to_value(RelayEvent::error("boom")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"error": "Streaming failed", "details": "boom"})
        );
    }

    #[tokio::test]
    async fn test_done_appends_concatenated_reply() {
        let store = Arc::new(MemoryConversationStore::default());
        let relay = StreamRelay::new(store.clone(), "s1", "llama3", "Say hello");

        let events: Vec<RelayEvent> = relay
            .relay(scripted(vec![
                StreamEvent::Token("Hel".into()),
                StreamEvent::Token("lo".into()),
                StreamEvent::Done,
            ]))
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                RelayEvent::token("Hel"),
                RelayEvent::token("lo"),
                RelayEvent::done("s1", "llama3"),
            ]
        );
        assert_eq!(
            store.history("s1").await,
            vec![Turn::human("Say hello"), Turn::assistant("Hello")]
        );
    }

    #[tokio::test]
    async fn test_error_leaves_history_untouched() {
        let store = Arc::new(MemoryConversationStore::default());
        store
            .append("s1", vec![Turn::human("q"), Turn::assistant("a")])
            .await;

        let relay = StreamRelay::new(store.clone(), "s1", "llama3", "next");
        let events: Vec<RelayEvent> = relay
            .relay(scripted(vec![
                StreamEvent::Token("par".into()),
                StreamEvent::Error("model crashed".into()),
                StreamEvent::Token("ignored".into()),
            ]))
            .collect()
            .await;

        assert_eq!(
            events,
            vec![RelayEvent::token("par"), RelayEvent::error("model crashed")]
        );
        assert_eq!(store.history("s1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_truncated_backend_is_an_error() {
        let store = Arc::new(MemoryConversationStore::default());
        let relay = StreamRelay::new(store.clone(), "s1", "llama3", "hi");

        let events: Vec<RelayEvent> = relay
            .relay(scripted(vec![StreamEvent::Token("half".into())]))
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], RelayEvent::Error { .. }));
        assert!(store.history("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_relay_does_not_append() {
        let store = Arc::new(MemoryConversationStore::default());
        let relay = StreamRelay::new(store.clone(), "s1", "llama3", "hi");

        let mut events = relay.relay(scripted(vec![
            StreamEvent::Token("a".into()),
            StreamEvent::Token("b".into()),
            StreamEvent::Done,
        ]));
        assert_eq!(events.next().await, Some(RelayEvent::token("a")));
        drop(events);

        assert!(store.history("s1").await.is_empty());
    }

    #[test]
    fn test_terminal_events() {
        assert!(!RelayEvent::token("x").is_terminal());
        assert!(RelayEvent::done("s", "m").is_terminal());
        assert!(RelayEvent::error("e").is_terminal());
    }
}
