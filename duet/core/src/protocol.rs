//! Upstream Wire Protocol
//!
//! Request and response types for OpenAI-compatible chat completion
//! endpoints, plus the parser that turns one SSE payload into a
//! [`ProviderEvent`].
//!
//! # Design Philosophy
//!
//! The wire layer is deliberately forgiving on input: providers interleave
//! keep-alive noise, wrap errors in at least three different shapes, and
//! occasionally emit frames the JSON parser cannot read. One bad frame is a
//! [`ParseWarning`] to log and skip, never a reason to abort a stream.

use serde::{Deserialize, Serialize};

/// Sentinel payload that terminates an SSE completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Role of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// End-user turn
    User,
    /// Model response
    Assistant,
}

/// One role/content pair in a chat transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored the message
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Model identifier sent upstream
    pub model: String,
    /// Sampling temperature (0.0-2.0)
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

impl ModelParams {
    /// Create parameters for a model with default sampling
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// One streaming chat-completion request.
#[derive(Clone, Debug, Serialize)]
pub struct CompletionRequest {
    /// Ordered transcript sent upstream
    pub messages: Vec<ChatMessage>,
    /// Model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Always true for this crate; the decoder only speaks SSE
    pub stream: bool,
    /// Ask the provider to expose its reasoning channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<bool>,
}

impl CompletionRequest {
    /// Create a streaming request from a transcript and model parameters
    pub fn new(messages: Vec<ChatMessage>, params: &ModelParams) -> Self {
        Self {
            messages,
            model: params.model.clone(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: true,
            reasoning: None,
        }
    }

    /// Request the provider's reasoning channel
    pub fn with_reasoning(mut self, reasoning: bool) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    /// Rebuild this request with a different transcript, keeping parameters
    pub fn with_messages(&self, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..self.clone()
        }
    }
}

/// Why the provider stopped generating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of generation
    Stop,
    /// Provider-imposed length limit; generation was truncated
    Length,
    /// Any other provider-specific reason (content filter, tool call, ...)
    Other(String),
}

impl FinishReason {
    /// Parse a wire `finish_reason` string
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "length" => Self::Length,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this reason signals truncation
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Length)
    }
}

/// One decoded delta frame from the provider.
///
/// A single frame may carry a content delta, a reasoning delta, a finish
/// signal, or any combination. Empty strings are normalized to `None` so
/// downstream code never sees zero-length deltas.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeltaFrame {
    /// Content-channel delta, if present and non-empty
    pub content: Option<String>,
    /// Reasoning-channel delta, if present and non-empty
    pub reasoning: Option<String>,
    /// Finish signal, if present in this frame
    pub finish: Option<FinishReason>,
}

impl DeltaFrame {
    /// True when the frame carries neither deltas nor a finish signal
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.reasoning.is_none() && self.finish.is_none()
    }
}

/// One discrete event decoded from the provider stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    /// Incremental generation data
    Delta(DeltaFrame),
    /// Provider-reported error payload; terminal for the stream
    Error(String),
    /// The `[DONE]` sentinel; terminal for the stream
    Done,
}

/// A malformed SSE payload that was skipped.
///
/// Parse warnings are logged and dropped by the stream reader; they never
/// terminate a session.
#[derive(Clone, Debug)]
pub struct ParseWarning {
    /// Truncated copy of the offending payload
    pub snippet: String,
    /// Parser error text
    pub reason: String,
}

impl ParseWarning {
    const SNIPPET_LIMIT: usize = 120;

    fn new(payload: &str, reason: impl Into<String>) -> Self {
        let snippet = if payload.len() > Self::SNIPPET_LIMIT {
            let cut = floor_char_boundary(payload, Self::SNIPPET_LIMIT);
            format!("{}...", &payload[..cut])
        } else {
            payload.to_string()
        };
        Self {
            snippet,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unparseable frame ({}): {}", self.reason, self.snippet)
    }
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Extract a human-readable message from a provider error payload.
///
/// Providers report errors either as `{"error": {"message": "..."}}` or as
/// `{"error": "..."}`.
fn error_message(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Parse one SSE data payload into a [`ProviderEvent`].
///
/// # Errors
///
/// Returns [`ParseWarning`] for payloads that are not valid JSON and not the
/// `[DONE]` sentinel. Callers log the warning and skip the frame.
pub fn parse_event(payload: &str) -> Result<ProviderEvent, ParseWarning> {
    let trimmed = payload.trim();
    if trimmed == DONE_SENTINEL {
        return Ok(ProviderEvent::Done);
    }

    let chunk: WireChunk = serde_json::from_str(trimmed)
        .map_err(|e| ParseWarning::new(trimmed, e.to_string()))?;

    if let Some(error) = chunk.error {
        return Ok(ProviderEvent::Error(error_message(&error)));
    }

    // Edge proxies wrap caught exceptions as {"text": "Error: ..."}.
    if let Some(text) = &chunk.text {
        if let Some(message) = text.strip_prefix("Error:") {
            return Ok(ProviderEvent::Error(message.trim().to_string()));
        }
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        // Valid JSON without choices (usage frames, pings). Skip silently.
        return Ok(ProviderEvent::Delta(DeltaFrame::default()));
    };

    Ok(ProviderEvent::Delta(DeltaFrame {
        content: non_empty(choice.delta.content),
        reasoning: non_empty(choice.delta.reasoning_content),
        finish: choice.finish_reason.as_deref().map(FinishReason::from_wire),
    }))
}
