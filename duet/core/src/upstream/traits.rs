//! Completion Backend Traits
//!
//! Trait definitions for streaming completion providers. This abstraction
//! lets the orchestrator drive any OpenAI-compatible endpoint (or a scripted
//! mock in tests) without changing core logic.
//!
//! # Design Philosophy
//!
//! The `CompletionBackend` trait provides a common interface for:
//! - Opening a streaming completion and receiving decoded provider events
//! - Health checking the endpoint
//!
//! Implementations handle provider-specific details (HTTP, auth, SSE
//! framing). Everything past the channel boundary speaks
//! [`ProviderEvent`], never raw bytes.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::protocol::{CompletionRequest, ProviderEvent};

/// Receiver half of an open completion stream.
///
/// Each item is either a decoded provider event or a transport-level read
/// failure. The channel closes when the provider stream ends, a terminal
/// frame arrives, or the receiver is dropped.
pub type ProviderStream = mpsc::Receiver<Result<ProviderEvent, StreamError>>;

/// Streaming completion provider
///
/// Implement this trait to point the orchestrator at a different provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Get the backend name (e.g., "OpenAI")
    fn name(&self) -> &str;

    /// Check if the endpoint is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Open a streaming completion
    ///
    /// Returns a channel receiver that yields decoded events as frames
    /// arrive. An `Err` here means the request never produced a stream
    /// (connection refused, non-success status); errors after the stream
    /// opens are delivered through the channel instead.
    async fn open_stream(&self, request: &CompletionRequest) -> anyhow::Result<ProviderStream>;
}
