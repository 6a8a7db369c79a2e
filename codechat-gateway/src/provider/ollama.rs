//! Ollama provider.
//!
//! Connects to a local (or LAN) Ollama instance. Streaming uses Ollama's
//! newline-delimited JSON chat output.

use super::{ChatRequest, ChatResponse, Provider, ProviderError, StreamEvent, TokenStream, TokenUsage};
use async_trait::async_trait;
use codechat_common::config::OllamaConfig;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const PROVIDER_NAME: &str = "ollama";

/// Ollama provider for local models.
pub struct OllamaProvider {
    base_url: String,
    temperature: f64,
    client: Client,
    // No overall timeout: a stream lives as long as the generation does.
    stream_client: Client,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<i64>,
    #[serde(default)]
    eval_count: Option<i64>,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

/// One NDJSON line of a streamed `/api/chat` response.
#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModelTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelTag {
    name: String,
}

#[derive(Debug, Serialize)]
struct OllamaPullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaPullResponse {
    #[serde(default)]
    status: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider.
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (defaults to http://localhost:11434)
    pub fn new(base_url: Option<&str>) -> Self {
        Self::with_settings(base_url, Duration::from_secs(300), 0.7)
    }

    /// Create from the gateway's Ollama configuration.
    pub fn from_config(config: &OllamaConfig) -> Self {
        Self::with_settings(
            Some(&config.base_url),
            Duration::from_secs(config.timeout_secs),
            config.temperature,
        )
    }

    fn with_settings(base_url: Option<&str>, timeout: Duration, temperature: f64) -> Self {
        let connect_timeout = Duration::from_secs(10);
        Self {
            base_url: base_url
                .unwrap_or("http://localhost:11434")
                .trim_end_matches('/')
                .to_string(),
            temperature,
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(connect_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            stream_client: Client::builder()
                .connect_timeout(connect_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn build_request(&self, request: &ChatRequest, stream: bool) -> OllamaChatRequest {
        let mut messages: Vec<OllamaMessage> = Vec::with_capacity(request.messages.len() + 1);

        if let Some(ref system) = request.system {
            messages.push(OllamaMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }

        for msg in &request.messages {
            messages.push(OllamaMessage {
                role: msg.role.clone(),
                content: msg.content.clone(),
            });
        }

        OllamaChatRequest {
            model: request.model.clone(),
            messages,
            stream,
            options: OllamaOptions {
                temperature: request.temperature.unwrap_or(self.temperature),
                num_predict: request.max_tokens,
            },
        }
    }

    fn unreachable(model: &str, e: &reqwest::Error) -> ProviderError {
        ProviderError::new(
            PROVIDER_NAME,
            model,
            format!("Request failed: {}. Is Ollama running? (ollama serve)", e),
        )
    }

    async fn api_error(model: &str, response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        ProviderError {
            provider: PROVIDER_NAME.into(),
            model: model.into(),
            message: format!("API error ({}): {}", status.as_u16(), error_text),
            status_code: Some(status.as_u16()),
        }
    }
}

/// Decode one NDJSON line into zero or more stream events.
fn parse_stream_line(line: &[u8]) -> Vec<StreamEvent> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let chunk: OllamaStreamChunk = match serde_json::from_str(text) {
        Ok(chunk) => chunk,
        Err(e) => return vec![StreamEvent::Error(format!("Failed to parse stream chunk: {}", e))],
    };

    if let Some(error) = chunk.error {
        return vec![StreamEvent::Error(error)];
    }

    let mut events = Vec::with_capacity(2);
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            events.push(StreamEvent::Token(message.content));
        }
    }
    if chunk.done {
        events.push(StreamEvent::Done);
    }
    events
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();
        let ollama_request = self.build_request(&request, false);
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ollama_request)
            .send()
            .await
            .map_err(|e| Self::unreachable(&request.model, &e))?;

        if !response.status().is_success() {
            return Err(Self::api_error(&request.model, response).await);
        }

        let result: OllamaChatResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                PROVIDER_NAME,
                request.model.clone(),
                format!("Failed to parse response: {}", e),
            )
        })?;

        let input_tokens = result.prompt_eval_count.unwrap_or(0);
        let output_tokens = result.eval_count.unwrap_or(0);

        Ok(ChatResponse {
            provider: PROVIDER_NAME.into(),
            model: request.model,
            content: result.message.content,
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
            },
            finish_reason: result.done_reason,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<TokenStream, ProviderError> {
        let ollama_request = self.build_request(&request, true);
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .stream_client
            .post(&url)
            .json(&ollama_request)
            .send()
            .await
            .map_err(|e| Self::unreachable(&request.model, &e))?;

        if !response.status().is_success() {
            return Err(Self::api_error(&request.model, response).await);
        }

        let stream = async_stream::stream! {
            let mut body = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield StreamEvent::Error(format!("Stream interrupted: {}", e));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    for event in parse_stream_line(&line) {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                }
            }

            for event in parse_stream_line(&buffer) {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }

            yield StreamEvent::Error("Backend closed the stream before completion".to_string());
        };

        Ok(stream.boxed())
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unreachable("*", &e))?;

        if !response.status().is_success() {
            return Err(Self::api_error("*", response).await);
        }

        let tags: OllamaTagsResponse = response.json().await.map_err(|e| {
            ProviderError::new(PROVIDER_NAME, "*", format!("Failed to parse model list: {}", e))
        })?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn pull_model(&self, model: &str) -> Result<String, ProviderError> {
        let url = format!("{}/api/pull", self.base_url);

        // Downloads can take much longer than a generation.
        let response = self
            .stream_client
            .post(&url)
            .json(&OllamaPullRequest {
                model,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| Self::unreachable(model, &e))?;

        if !response.status().is_success() {
            return Err(Self::api_error(model, response).await);
        }

        let result: OllamaPullResponse = response.json().await.map_err(|e| {
            ProviderError::new(PROVIDER_NAME, model, format!("Failed to parse pull response: {}", e))
        })?;

        Ok(result.status)
    }
}
