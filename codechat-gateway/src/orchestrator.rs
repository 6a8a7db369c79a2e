//! Chat orchestration.
//!
//! One exchange: read history, classify, augment, call the backend, then on
//! success persist any extracted code and append the human/assistant pair.
//! A failed backend call changes nothing. A failed artifact write degrades to
//! a text-only answer.

use chrono::{DateTime, Utc};
use codechat_common::util::{format_bytes, truncate_with_ellipsis};
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactStore, CodeArtifact};
use crate::error::GatewayError;
use crate::extract::extract_code;
use crate::intent::{augment_prompt, is_code_request};
use crate::language::resolve_extension;
use crate::provider::{ChatRequest, Message, Provider};
use crate::relay::{RelayEvent, StreamRelay};
use crate::session::{ConversationStore, Turn};

/// Characters of the user message shown in logs.
const PREVIEW_CHARS: usize = 80;

/// One inbound chat turn.
#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    pub message: Option<String>,
    pub session_id: Option<String>,
    pub model: Option<String>,
}

/// Result of a completed synchronous exchange.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub response: String,
    pub session_id: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub code_file: Option<CodeArtifact>,
    pub is_code_response: bool,
}

/// Everything resolved before the backend is called.
struct Exchange {
    message: String,
    session_id: String,
    model: String,
    is_code: bool,
    request: ChatRequest,
}

/// Composes the store, classifier, backend and artifact pipeline.
#[derive(Clone)]
pub struct ChatOrchestrator {
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn Provider>,
    artifacts: Arc<ArtifactStore>,
    default_model: String,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn Provider>,
        artifacts: Arc<ArtifactStore>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            artifacts,
            default_model: default_model.into(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Validate input and build the backend request from current history.
    async fn prepare(&self, input: ChatInput) -> Result<Exchange, GatewayError> {
        let message = input
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| GatewayError::Validation("Message is required".into()))?;

        let session_id = input
            .session_id
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let model = input
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone());

        let history = self.store.history(&session_id).await;
        let is_code = is_code_request(&message);

        let mut messages: Vec<Message> = history.iter().map(Turn::to_message).collect();
        messages.push(Message::user(augment_prompt(&message, is_code)));

        debug!(
            session_id = %session_id,
            model = %model,
            is_code,
            history_turns = history.len(),
            message = %truncate_with_ellipsis(&message, PREVIEW_CHARS),
            "Prepared exchange"
        );

        let request = ChatRequest {
            model: model.clone(),
            messages,
            max_tokens: None,
            temperature: None,
            system: None,
        };

        Ok(Exchange {
            message,
            session_id,
            model,
            is_code,
            request,
        })
    }

    /// Run a full-response exchange.
    pub async fn chat(&self, input: ChatInput) -> Result<ChatOutcome, GatewayError> {
        let exchange = self.prepare(input).await?;

        let response = self.provider.chat(exchange.request).await.map_err(|e| {
            warn!(
                session_id = %exchange.session_id,
                model = %exchange.model,
                error = %e,
                "Backend call failed"
            );
            GatewayError::Backend(e)
        })?;

        info!(
            session_id = %exchange.session_id,
            model = %exchange.model,
            is_code = exchange.is_code,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            latency_ms = response.latency_ms,
            "Backend replied"
        );

        let mut is_code_response = false;
        let mut code_file = None;

        if exchange.is_code {
            if let Some(code) = extract_code(&response.content) {
                is_code_response = true;
                code_file = self
                    .persist_code(&exchange.session_id, &code, &exchange.message)
                    .await;
            }
        }

        self.store
            .append(
                &exchange.session_id,
                vec![
                    Turn::human(exchange.message),
                    Turn::assistant(response.content.clone()),
                ],
            )
            .await;

        Ok(ChatOutcome {
            response: response.content,
            session_id: exchange.session_id,
            model: exchange.model,
            timestamp: Utc::now(),
            code_file,
            is_code_response,
        })
    }

    /// Save extracted code, logging and swallowing failures.
    async fn persist_code(&self, session_id: &str, code: &str, message: &str) -> Option<CodeArtifact> {
        let extension = resolve_extension(code, message);

        match self.artifacts.save(session_id, code, extension).await {
            Ok(artifact) => {
                info!(
                    session_id = %session_id,
                    filename = %artifact.filename,
                    size = %format_bytes(artifact.size),
                    "Saved code artifact"
                );
                Some(artifact)
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to save code artifact");
                None
            }
        }
    }

    /// Run an incremental exchange.
    ///
    /// Validation errors are returned before any event is produced. Backend
    /// failures, including failure to connect, arrive as an error event.
    pub async fn stream(
        &self,
        input: ChatInput,
    ) -> Result<BoxStream<'static, RelayEvent>, GatewayError> {
        let exchange = self.prepare(input).await?;
        let provider = Arc::clone(&self.provider);
        let relay = StreamRelay::new(
            Arc::clone(&self.store),
            exchange.session_id.clone(),
            exchange.model.clone(),
            exchange.message,
        );
        let session_id = exchange.session_id;
        let request = exchange.request;

        let stream = async_stream::stream! {
            let events = match provider.chat_stream(request).await {
                Ok(events) => events,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Backend stream failed to open");
                    yield RelayEvent::error(e.to_string());
                    return;
                }
            };

            let mut relayed = relay.relay(events);
            while let Some(event) = relayed.next().await {
                yield event;
            }
        };

        Ok(stream.boxed())
    }

    /// Drop a session's history. Returns whether a session existed.
    pub async fn clear(&self, session_id: Option<&str>) -> bool {
        match session_id.filter(|s| !s.is_empty()) {
            Some(id) => {
                let existed = self.store.clear(id).await;
                info!(session_id = %id, existed, "Cleared session");
                existed
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, ProviderError, StreamEvent, TokenStream, TokenUsage};
    use crate::session::MemoryConversationStore;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Provider that replays a fixed reply and records requests.
    struct MockProvider {
        reply: Result<String, String>,
        stream: Vec<StreamEvent>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl MockProvider {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                stream: Vec::new(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                stream: Vec::new(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn streaming(events: Vec<StreamEvent>) -> Self {
            Self {
                reply: Ok(String::new()),
                stream: events,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> ChatRequest {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(text) => Ok(ChatResponse {
                    provider: "mock".into(),
                    model: request.model,
                    content: text.clone(),
                    usage: TokenUsage::default(),
                    finish_reason: None,
                    latency_ms: 1,
                }),
                Err(message) => Err(ProviderError::new("mock", request.model, message.clone())),
            }
        }

        async fn chat_stream(&self, request: ChatRequest) -> Result<TokenStream, ProviderError> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(_) => Ok(stream::iter(self.stream.clone()).boxed()),
                Err(message) => Err(ProviderError::new("mock", request.model, message.clone())),
            }
        }

        async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
            Ok(vec!["mock-model".into()])
        }

        async fn pull_model(&self, _model: &str) -> Result<String, ProviderError> {
            Ok("success".into())
        }
    }

    struct Harness {
        orchestrator: ChatOrchestrator,
        store: Arc<MemoryConversationStore>,
        provider: Arc<MockProvider>,
        _dir: TempDir,
    }

    fn harness(provider: MockProvider) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryConversationStore::default());
        let provider = Arc::new(provider);
        let orchestrator = ChatOrchestrator::new(
            store.clone(),
            provider.clone(),
            Arc::new(ArtifactStore::new(dir.path())),
            "llama3",
        );
        Harness {
            orchestrator,
            store,
            provider,
            _dir: dir,
        }
    }

    fn input(message: &str, session_id: &str) -> ChatInput {
        ChatInput {
            message: Some(message.into()),
            session_id: Some(session_id.into()),
            model: None,
        }
    }

    #[tokio::test]
    async fn test_code_request_persists_artifact() {
        let h = harness(MockProvider::replying(
            "Sure:\n```python\ndef sort_list(xs):\n    return sorted(xs)\n```",
        ));

        let outcome = h
            .orchestrator
            .chat(input("Write a function to sort a list", "s1"))
            .await
            .unwrap();

        assert!(outcome.is_code_response);
        let artifact = outcome.code_file.unwrap();
        assert_eq!(artifact.language, "py");
        assert!(artifact.download_url.starts_with("/download/s1/code_"));
        assert_eq!(
            h.orchestrator.artifacts().read("s1", &artifact.filename).await.unwrap(),
            b"def sort_list(xs):\n    return sorted(xs)"
        );

        // Backend saw the augmented prompt, history keeps the original
        let sent = h.provider.last_request();
        assert!(sent.messages[0].content.contains("fenced code block"));
        assert_eq!(
            h.store.history("s1").await[0],
            Turn::human("Write a function to sort a list")
        );
    }

    #[tokio::test]
    async fn test_plain_request_has_no_artifact() {
        let h = harness(MockProvider::replying("It is sunny."));

        let outcome = h
            .orchestrator
            .chat(input("What's the weather like?", "s1"))
            .await
            .unwrap();

        assert!(!outcome.is_code_response);
        assert!(outcome.code_file.is_none());
        assert_eq!(outcome.model, "llama3");
        assert_eq!(h.provider.last_request().messages[0].content, "What's the weather like?");
        assert_eq!(h.store.history("s1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_code_request_without_code_in_reply() {
        let h = harness(MockProvider::replying("no code here"));

        let outcome = h
            .orchestrator
            .chat(input("Write a function to sort a list", "s1"))
            .await
            .unwrap();

        assert!(!outcome.is_code_response);
        assert!(outcome.code_file.is_none());
    }

    #[tokio::test]
    async fn test_history_is_sent_oldest_first() {
        let h = harness(MockProvider::replying("ok"));
        h.orchestrator.chat(input("first", "s1")).await.unwrap();
        h.orchestrator.chat(input("second", "s1")).await.unwrap();

        let sent = h.provider.last_request();
        let roles: Vec<&str> = sent.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(sent.messages[0].content, "first");
        assert_eq!(sent.messages[2].content, "second");
    }

    #[tokio::test]
    async fn test_missing_message_rejected_before_backend() {
        let h = harness(MockProvider::replying("unused"));

        let err = h
            .orchestrator
            .chat(ChatInput {
                message: Some("   ".into()),
                session_id: Some("s1".into()),
                model: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        let err = h.orchestrator.chat(ChatInput::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        assert!(h.provider.seen.lock().unwrap().is_empty());
        assert_eq!(h.store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_backend_failure_leaves_history() {
        let h = harness(MockProvider::failing("connection refused"));
        h.store
            .append("s1", vec![Turn::human("q"), Turn::assistant("a")])
            .await;

        let err = h.orchestrator.chat(input("hello", "s1")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Backend(_)));
        assert_eq!(h.store.history("s1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_session_and_model_defaults() {
        let h = harness(MockProvider::replying("hi"));

        let outcome = h
            .orchestrator
            .chat(ChatInput {
                message: Some("hello".into()),
                session_id: None,
                model: Some("codellama".into()),
            })
            .await
            .unwrap();

        assert!(uuid::Uuid::parse_str(&outcome.session_id).is_ok());
        assert_eq!(outcome.model, "codellama");
        assert_eq!(h.provider.last_request().model, "codellama");
    }

    #[tokio::test]
    async fn test_artifact_failure_degrades_to_text() {
        let h = harness(MockProvider::replying("```js\nconsole.log(1)\n```"));

        // Unusable as a directory name, so the save fails
        let outcome = h
            .orchestrator
            .chat(input("write javascript code", ".."))
            .await
            .unwrap();

        assert_eq!(outcome.response, "```js\nconsole.log(1)\n```");
        assert!(outcome.is_code_response);
        assert!(outcome.code_file.is_none());
        assert_eq!(h.store.history("..").await.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_appends_on_done() {
        let h = harness(MockProvider::streaming(vec![
            StreamEvent::Token("Hi ".into()),
            StreamEvent::Token("there".into()),
            StreamEvent::Done,
        ]));

        let events: Vec<RelayEvent> = h
            .orchestrator
            .stream(input("hello", "s1"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.last(), Some(&RelayEvent::done("s1", "llama3")));
        assert_eq!(
            h.store.history("s1").await,
            vec![Turn::human("hello"), Turn::assistant("Hi there")]
        );
    }

    #[tokio::test]
    async fn test_stream_abort_leaves_history() {
        let h = harness(MockProvider::streaming(vec![
            StreamEvent::Token("Hi".into()),
            StreamEvent::Error("backend went away".into()),
        ]));

        let events: Vec<RelayEvent> = h
            .orchestrator
            .stream(input("hello", "s1"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.last(), Some(&RelayEvent::error("backend went away")));
        assert!(h.store.history("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_stream_unreachable_backend_is_error_event() {
        let h = harness(MockProvider::failing("connection refused"));

        let events: Vec<RelayEvent> = h
            .orchestrator
            .stream(input("hello", "s1"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RelayEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_stream_code_request_is_augmented() {
        let h = harness(MockProvider::streaming(vec![StreamEvent::Done]));

        let _events: Vec<RelayEvent> = h
            .orchestrator
            .stream(input("Write a function to sort a list", "s1"))
            .await
            .unwrap()
            .collect()
            .await;

        assert!(h.provider.last_request().messages[0].content.contains("fenced code block"));
    }

    #[tokio::test]
    async fn test_clear() {
        let h = harness(MockProvider::replying("ok"));
        h.orchestrator.chat(input("hello", "s1")).await.unwrap();

        assert!(h.orchestrator.clear(Some("s1")).await);
        assert!(!h.orchestrator.clear(Some("s1")).await);
        assert!(!h.orchestrator.clear(None).await);
        assert!(h.store.history("s1").await.is_empty());
    }
}
