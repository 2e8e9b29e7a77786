//! Upstream Provider Integration
//!
//! This module provides abstracted access to streaming completion
//! providers through a common trait interface.
//!
//! # Available Backends
//!
//! - **OpenAI-compatible**: any endpoint speaking the `/chat/completions`
//!   SSE wire format (default)
//!
//! # Usage
//!
//! ```ignore
//! use duet_core::upstream::{OpenAiBackend, CompletionBackend};
//! use duet_core::protocol::{ChatMessage, CompletionRequest, ModelParams};
//!
//! let backend = OpenAiBackend::from_env();
//! let params = ModelParams::new("deepseek-r1");
//! let request = CompletionRequest::new(vec![ChatMessage::user("Hello!")], &params);
//! let rx = backend.open_stream(&request).await?;
//! ```

mod openai;
pub mod testing;
mod traits;

pub use openai::OpenAiBackend;
pub use traits::{CompletionBackend, ProviderStream};
