//! Scripted Backend for Tests
//!
//! A [`CompletionBackend`] that replays pre-scripted event sequences
//! instead of talking to a network. Sessions and orchestrators exercise
//! their full event paths against it, including continuations (each
//! `open_stream` call consumes the next script) and per-model routing
//! (so a reasoning stream and an answer stream can be scripted
//! independently on one backend).
//!
//! Lives outside `#[cfg(test)]` so integration tests and downstream
//! crates can drive the orchestrator without a provider.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{CompletionBackend, ProviderStream};
use crate::error::StreamError;
use crate::protocol::{CompletionRequest, DeltaFrame, FinishReason, ProviderEvent};

/// One step of a scripted stream
#[derive(Clone, Debug)]
pub enum ScriptItem {
    /// Deliver this channel item
    Event(Result<ProviderEvent, StreamError>),
    /// Deliver nothing until the receiver gives up
    Hang,
}

type ScriptQueue = VecDeque<Vec<ScriptItem>>;

/// Scripted [`CompletionBackend`]
#[derive(Clone, Default)]
pub struct MockBackend {
    scripts: Arc<Mutex<ScriptQueue>>,
    scripts_by_model: Arc<Mutex<HashMap<String, ScriptQueue>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    refuse: bool,
    unhealthy: bool,
}

impl MockBackend {
    /// Create a backend with no scripts (streams end immediately)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one stream script, replayed by the next unrouted `open_stream`
    #[must_use]
    pub fn script(self, items: Vec<ScriptItem>) -> Self {
        self.scripts.lock().push_back(items);
        self
    }

    /// Queue one stream script for requests naming `model`
    #[must_use]
    pub fn script_for(self, model: impl Into<String>, items: Vec<ScriptItem>) -> Self {
        self.scripts_by_model
            .lock()
            .entry(model.into())
            .or_default()
            .push_back(items);
        self
    }

    /// Make every `open_stream` fail before producing a stream
    #[must_use]
    pub fn refuse_connections(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Make `health_check` report false
    #[must_use]
    pub fn unhealthy(mut self) -> Self {
        self.unhealthy = true;
        self
    }

    /// Handle to every request passed to `open_stream`, in call order
    #[must_use]
    pub fn requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.requests)
    }

    // -------------------------------------------------------------------------
    // Script item constructors
    // -------------------------------------------------------------------------

    /// Content delta
    #[must_use]
    pub fn content(text: &str) -> ScriptItem {
        ScriptItem::Event(Ok(ProviderEvent::Delta(DeltaFrame {
            content: Some(text.to_string()),
            ..DeltaFrame::default()
        })))
    }

    /// Reasoning delta
    #[must_use]
    pub fn reasoning(text: &str) -> ScriptItem {
        ScriptItem::Event(Ok(ProviderEvent::Delta(DeltaFrame {
            reasoning: Some(text.to_string()),
            ..DeltaFrame::default()
        })))
    }

    /// Arbitrary delta frame (for mixed-channel cases)
    #[must_use]
    pub fn frame(frame: DeltaFrame) -> ScriptItem {
        ScriptItem::Event(Ok(ProviderEvent::Delta(frame)))
    }

    /// `finish_reason: stop`
    #[must_use]
    pub fn finish_stop() -> ScriptItem {
        Self::finish(FinishReason::Stop)
    }

    /// `finish_reason: length`
    #[must_use]
    pub fn finish_length() -> ScriptItem {
        Self::finish(FinishReason::Length)
    }

    /// Any finish signal
    #[must_use]
    pub fn finish(reason: FinishReason) -> ScriptItem {
        ScriptItem::Event(Ok(ProviderEvent::Delta(DeltaFrame {
            finish: Some(reason),
            ..DeltaFrame::default()
        })))
    }

    /// Provider-reported `{error}` frame
    #[must_use]
    pub fn error_frame(message: &str) -> ScriptItem {
        ScriptItem::Event(Ok(ProviderEvent::Error(message.to_string())))
    }

    /// Terminal `[DONE]` sentinel
    #[must_use]
    pub fn done() -> ScriptItem {
        ScriptItem::Event(Ok(ProviderEvent::Done))
    }

    /// Mid-stream transport failure
    #[must_use]
    pub fn transport_error(message: &str) -> ScriptItem {
        ScriptItem::Event(Err(StreamError::TransportRead(message.to_string())))
    }

    /// Stall until the receiver is dropped (for timeout tests)
    #[must_use]
    pub fn hang() -> ScriptItem {
        ScriptItem::Hang
    }

    fn next_script(&self, model: &str) -> Vec<ScriptItem> {
        if let Some(queue) = self.scripts_by_model.lock().get_mut(model) {
            if let Some(items) = queue.pop_front() {
                return items;
            }
        }
        self.scripts.lock().pop_front().unwrap_or_default()
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    fn name(&self) -> &str {
        "Mock"
    }

    async fn health_check(&self) -> bool {
        !self.unhealthy
    }

    async fn open_stream(&self, request: &CompletionRequest) -> anyhow::Result<ProviderStream> {
        self.requests.lock().push(request.clone());

        if self.refuse {
            anyhow::bail!("connection refused (scripted)");
        }

        let items = self.next_script(&request.model);
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(async move {
            for item in items {
                match item {
                    ScriptItem::Event(event) => {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    ScriptItem::Hang => {
                        tx.closed().await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
