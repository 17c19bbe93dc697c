//! Chat-completion backend.
//!
//! `ChatBackend` abstracts the provider; `OpenAiChatClient` speaks the
//! OpenAI-compatible `POST /chat/completions` API, either returning the whole
//! reply or a stream of content fragments decoded from Server-Sent Events.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ChatConfig;
use crate::models::Message;
use crate::sse::SseDecoder;

/// Content fragments in arrival order. The stream ends when the reply is complete.
pub type FragmentStream = BoxStream<'static, Result<String, ChatError>>;

// ============================================================================
// ChatBackend trait
// ============================================================================

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the conversation and wait for the whole reply.
    async fn complete(&self, messages: &[Message]) -> Result<String, ChatError>;

    /// Send the conversation and receive the reply incrementally.
    async fn stream(&self, messages: &[Message]) -> Result<FragmentStream, ChatError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Response contained no choices")]
    MissingChoice,

    #[error("Missing API key (set {0})")]
    MissingApiKey(String),
}

// ============================================================================
// Config
// ============================================================================

/// Model name and generation parameters sent with every request.
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub timeout: Duration,
}

impl ChatClientConfig {
    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(config: &ChatConfig) -> Result<Self, ChatError> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            return Err(ChatError::MissingApiKey(config.api_key_env.clone()));
        }
        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }
}

// ============================================================================
// Wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    frequency_penalty: f32,
    presence_penalty: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiChatClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    config: ChatClientConfig,
}

impl OpenAiChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self, ChatError> {
        if config.api_key.is_empty() {
            return Err(ChatError::MissingApiKey("api_key".to_string()));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// Create a client against a custom base URL (for testing / self-hosted gateways)
    pub fn with_base_url(mut config: ChatClientConfig, base_url: String) -> Result<Self, ChatError> {
        config.base_url = base_url.trim_end_matches('/').to_string();
        Self::new(config)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn send(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response, ChatError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            frequency_penalty: self.config.frequency_penalty,
            presence_penalty: self.config.presence_penalty,
            stream,
        };

        tracing::debug!(
            model = %self.config.model,
            messages = messages.len(),
            stream,
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(status = status.as_u16(), message = %message, "Chat API error");

            return Err(ChatError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, ChatError> {
        let response = self.send(messages, false).await?;
        let body = response.bytes().await?;
        let completion: CompletionResponse = serde_json::from_slice(&body)?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or(ChatError::MissingChoice)?;
        Ok(choice.message.content.unwrap_or_default())
    }

    async fn stream(&self, messages: &[Message]) -> Result<FragmentStream, ChatError> {
        let response = self.send(messages, true).await?;
        Ok(fragment_stream(response.bytes_stream().boxed()))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// Stream decoding
// ============================================================================

enum ChunkEvent {
    Fragment(String),
    Skip,
    Done,
}

fn parse_chunk(data: &str) -> Result<ChunkEvent, ChatError> {
    if data.trim() == "[DONE]" {
        return Ok(ChunkEvent::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        return Err(ChatError::Api {
            status: 200,
            message: error.message,
        });
    }

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .unwrap_or_default();

    if content.is_empty() {
        Ok(ChunkEvent::Skip)
    } else {
        Ok(ChunkEvent::Fragment(content))
    }
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn an SSE response body into content fragments. Ends at `[DONE]` or at the
/// end of the body; the first error ends the stream after being yielded.
fn fragment_stream(body: BoxStream<'static, reqwest::Result<Bytes>>) -> FragmentStream {
    let state = StreamState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(data) = state.pending.pop_front() {
                match parse_chunk(&data) {
                    Ok(ChunkEvent::Fragment(text)) => return Some((Ok(text), state)),
                    Ok(ChunkEvent::Skip) => continue,
                    Ok(ChunkEvent::Done) => return None,
                    Err(e) => {
                        state.pending.clear();
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.feed(&bytes);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(ChatError::Http(e)), state));
                }
                None => {
                    state.finished = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    })
    .boxed()
}

// ============================================================================
// TESTS
// ============================================================================
