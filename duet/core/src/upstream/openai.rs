//! OpenAI-Compatible Backend Implementation
//!
//! Streaming chat-completion client for any endpoint that speaks the
//! OpenAI `/chat/completions` wire format (OpenAI itself, vLLM, DeepSeek,
//! LiteLLM proxies, ...).
//!
//! # Wire Format
//!
//! Requests are JSON-encoded [`CompletionRequest`] bodies POSTed with
//! `stream: true`. Responses arrive as Server-Sent Events; each `data:`
//! payload is decoded by [`SseFrameDecoder`] and parsed into a
//! [`ProviderEvent`] before crossing the channel boundary.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::traits::{CompletionBackend, ProviderStream};
use crate::config::UpstreamConfig;
use crate::error::StreamError;
use crate::protocol::{parse_event, CompletionRequest, ProviderEvent};
use crate::sse::SseFrameDecoder;

/// OpenAI-compatible backend client
#[derive(Clone)]
pub struct OpenAiBackend {
    /// Base URL, e.g. `https://api.openai.com/v1`
    base_url: String,
    /// Bearer token, if the endpoint requires one
    api_key: Option<String>,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a new backend pointed at `base_url`
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Create from [`UpstreamConfig`]
    #[must_use]
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            http_client: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Create from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = std::env::var("DUET_UPSTREAM_URL")
            .or_else(|_| std::env::var("OPENAI_BASE_URL"))
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("DUET_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty());

        Self::new(base_url, api_key)
    }

    /// Get chat completions endpoint URL
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Get models endpoint URL
    fn models_url(&self) -> String {
        format!("{}/models", self.base_url.trim_end_matches('/'))
    }
}

impl Default for OpenAiBackend {
    fn default() -> Self {
        Self::new("https://api.openai.com/v1", None)
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "OpenAI"
    }

    async fn health_check(&self) -> bool {
        let mut request = self
            .http_client
            .get(self.models_url())
            .timeout(Duration::from_secs(5));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn open_stream(&self, request: &CompletionRequest) -> anyhow::Result<ProviderStream> {
        let (tx, rx) = mpsc::channel(100);

        let url = self.completions_url();

        let mut http_request = self.http_client.post(&url).json(request);
        if let Some(ref key) = self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Upstream returned {status}: {body}");
        }

        let mut stream = response.bytes_stream();

        // Spawn task to decode the SSE stream
        tokio::spawn(async move {
            let mut decoder = SseFrameDecoder::new();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        decoder.push(&bytes);
                        while let Some(payload) = decoder.next_payload() {
                            match parse_event(&payload) {
                                Ok(event) => {
                                    let done = matches!(event, ProviderEvent::Done);
                                    if tx.send(Ok(event)).await.is_err() {
                                        // Receiver dropped, stop streaming
                                        return;
                                    }
                                    if done {
                                        return;
                                    }
                                }
                                Err(warning) => {
                                    tracing::warn!(%warning, "Skipping unparseable frame");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(StreamError::TransportRead(e.to_string())))
                            .await;
                        return;
                    }
                }
            }

            // Stream ended without [DONE]; flush any unterminated frame
            if let Some(payload) = decoder.finish() {
                match parse_event(&payload) {
                    Ok(event) => {
                        let _ = tx.send(Ok(event)).await;
                    }
                    Err(warning) => {
                        tracing::warn!(%warning, "Skipping unparseable trailing frame");
                    }
                }
            }
        });

        Ok(rx)
    }
}
