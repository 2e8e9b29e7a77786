//! Duet Core - Dual-Model Streaming Completion Orchestration
//!
//! This crate runs one user turn against two OpenAI-compatible streaming
//! completions at once: a reasoning model that thinks out loud, and an
//! answer model that starts as soon as the reasoning is usable instead of
//! waiting for it to finish. It is completely independent of any UI
//! framework and can drive a TUI, a web backend, or run headless.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Host                                  │
//! │     start / cancel / resend / forget            snapshots        │
//! └────────────────┬────────────────────────────────────▲────────────┘
//!                  │                                    │
//! ┌────────────────▼────────────────────────────────────┴────────────┐
//! │                             Duet                                  │
//! │  ┌────────────┐    ┌────────────────────────────────────────┐    │
//! │  │  Exchange  │    │      Orchestrator (one per exchange)    │    │
//! │  │  Registry  │    │  ┌──────────────┐    ┌──────────────┐  │    │
//! │  └────────────┘    │  │  Reasoning   │    │   Answer     │  │    │
//! │  ┌────────────┐    │  │StreamSession │───▶│StreamSession │  │    │
//! │  │  Message   │    │  └──────┬───────┘    └──────┬───────┘  │    │
//! │  │   Store    │    │         │   early handoff   │          │    │
//! │  └────────────┘    └─────────┼───────────────────┼──────────┘    │
//! └──────────────────────────────┼───────────────────┼───────────────┘
//!                                │ SSE               │ SSE
//!                     ┌──────────▼───────────────────▼──────────┐
//!                     │      OpenAI-compatible upstream         │
//!                     └─────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Duet`]: The facade that starts, cancels, resends and forgets exchanges
//! - [`Exchange`] / [`ExchangeSnapshot`]: Dual-stream transcript state and its immutable view
//! - [`Orchestrator`](orchestrator::Orchestrator): Drives one exchange across both model streams
//! - [`StreamSession`](session::StreamSession): One upstream stream with truncation continuation
//! - [`HandoffDetector`](handoff::HandoffDetector): Decides when the answer stream may start
//! - [`CompletionBackend`](upstream::CompletionBackend): Upstream provider abstraction
//!
//! # Quick Start
//!
//! ```ignore
//! use duet_core::store::MemoryStore;
//! use duet_core::upstream::OpenAiBackend;
//! use duet_core::{Duet, DuetConfig, ExchangeId, ExchangeMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     duet_core::logging::init("info");
//!
//!     let duet = Duet::new(
//!         OpenAiBackend::from_env(),
//!         MemoryStore::new(),
//!         DuetConfig::from_env(),
//!     );
//!
//!     let mut snapshots = duet
//!         .start_exchange(
//!             ExchangeId::new("turn-1"),
//!             "How many primes are there below 100?",
//!             None,
//!             ExchangeMode::BothSplit,
//!         )
//!         .await?;
//!
//!     while let Some(snapshot) = snapshots.recv().await {
//!         // Render the merged view; the last snapshot is terminal.
//!         println!("{}", snapshot.merged_content);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: Layered configuration (defaults, TOML file, environment)
//! - [`duet`]: The caller-facing facade
//! - [`error`]: Stream and facade error taxonomy
//! - [`exchange`]: Exchange state, statuses, snapshots and the merged view
//! - [`handoff`]: Handoff signal detection on the reasoning stream
//! - [`logging`]: Tracing subscriber setup helpers
//! - [`orchestrator`]: Per-exchange coordination of both stream sessions
//! - [`protocol`]: Wire types for chat completion requests and stream events
//! - [`registry`]: Live-exchange bookkeeping and concurrency limits
//! - [`session`]: Single-stream driver with continuation and retry
//! - [`sse`]: Byte-level Server-Sent Events frame decoding
//! - [`store`]: Conversation history persistence abstraction
//! - [`upstream`]: HTTP backend for OpenAI-compatible endpoints
//!
//! # No UI Dependencies
//!
//! This crate has **zero** dependencies on any UI framework. It's pure
//! orchestration logic that can be embedded anywhere.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod duet;
pub mod error;
pub mod exchange;
pub mod handoff;
pub mod logging;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod sse;
pub mod store;
pub mod upstream;

// Re-exports for convenience
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigSource,
    DuetConfig, LimitsConfig, UpstreamConfig,
};
pub use duet::Duet;
pub use error::{DuetError, StreamError};
pub use exchange::{
    Exchange, ExchangeId, ExchangeMode, ExchangeSnapshot, SplitLabels, StreamStatus,
};
pub use handoff::{HandoffConfig, HandoffDetector, HandoffSignal};
pub use protocol::{
    ChatMessage, CompletionRequest, DeltaFrame, FinishReason, ModelParams, ProviderEvent, Role,
};
pub use registry::{ExchangeRegistry, RegistryError};
pub use session::{SessionConfig, SessionEvent, SessionResult, StreamSession};
pub use sse::SseFrameDecoder;
pub use store::{MemoryStore, MessageStore};
pub use upstream::{CompletionBackend, OpenAiBackend, ProviderStream};
