//! Stream Session
//!
//! Drives one upstream completion call to a terminal state, including
//! transparent truncation continuation. A session owns exactly one logical
//! generation: when the provider cuts it off with `finish_reason: length`,
//! the session silently issues a follow-up request that resumes the same
//! text, and its accumulation buffers carry straight across the boundary.
//! Callers see one uninterrupted delta stream plus a marker event at each
//! continuation seam.
//!
//! # Accumulation Contract
//!
//! `accumulated content == concatenation of every content delta emitted,
//! in order`, across any number of continuations. The continuation marker
//! is an event, never part of the accumulated text, so a twice-truncated
//! generation finishes byte-identical to an uninterrupted one.
//!
//! # Error Policy
//!
//! - Initial open failure: [`StreamError::Unavailable`], nothing retried.
//! - Mid-stream read failure or inactivity timeout: retried once through
//!   the continuation path if any content has accumulated, otherwise
//!   surfaced as [`StreamError::TransportRead`].
//! - Provider `{error}` frame: terminal [`StreamError::Upstream`].
//! - Truncation past the retry ceiling: [`StreamError::ContinuationExhausted`].
//!
//! Every error preserves the partial content accumulated so far.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::exchange::StreamStatus;
use crate::protocol::{ChatMessage, CompletionRequest, DeltaFrame, FinishReason, ProviderEvent};
use crate::upstream::{CompletionBackend, ProviderStream};

/// Fixed instruction sent as the user turn of a continuation request
pub const CONTINUATION_INSTRUCTION: &str =
    "Continue exactly where you left off. Do not repeat any earlier text, \
     do not add a preamble, just continue.";

// =============================================================================
// Configuration
// =============================================================================

/// Tuning for a single stream session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Truncation-continuation retry ceiling
    pub max_continuations: u32,
    /// No-frame window after which the stream is considered dead
    pub inactivity_timeout: Duration,
    /// Capacity of the session event channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_continuations: 3,
            inactivity_timeout: Duration::from_secs(90),
            event_capacity: 100,
        }
    }
}

// =============================================================================
// Events and Results
// =============================================================================

/// Progress events emitted while a session runs
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// One provider frame worth of deltas. Empty channels are `None`;
    /// a frame is never emitted with both channels empty and no finish.
    Delta(DeltaFrame),
    /// A truncation continuation is being issued
    Continuing {
        /// 1-based continuation attempt number
        attempt: u32,
    },
    /// The session reached a terminal state
    Finished(SessionResult),
}

/// Terminal outcome of a session
#[derive(Clone, Debug)]
pub struct SessionResult {
    /// `Success` or `Error`
    pub status: StreamStatus,
    /// Full accumulated content, continuation-merged
    pub content: String,
    /// Full accumulated reasoning
    pub reasoning: String,
    /// Continuation requests actually issued
    pub continuations: u32,
    /// The terminal error, when `status` is `Error`
    pub error: Option<StreamError>,
}

impl SessionResult {
    fn success(content: String, reasoning: String, continuations: u32) -> Self {
        Self {
            status: StreamStatus::Success,
            content,
            reasoning,
            continuations,
            error: None,
        }
    }

    fn failure(
        content: String,
        reasoning: String,
        continuations: u32,
        error: StreamError,
    ) -> Self {
        Self {
            status: StreamStatus::Error,
            content,
            reasoning,
            continuations,
            error: Some(error),
        }
    }
}

/// What the frame loop decided after one provider event
enum LoopStep {
    /// Keep reading the current stream
    Continue,
    /// Reopen the stream through the continuation path
    Reopen,
    /// Terminal success
    FinishSuccess,
    /// Terminal failure
    FinishError(StreamError),
}

// =============================================================================
// Session
// =============================================================================

/// One upstream generation, truncation continuations included
pub struct StreamSession<B> {
    backend: Arc<B>,
    request: CompletionRequest,
    config: SessionConfig,
    rx: ProviderStream,
    accumulated_content: String,
    accumulated_reasoning: String,
    continuations: u32,
    transport_retried: bool,
}

impl<B: CompletionBackend> StreamSession<B> {
    /// Open the initial upstream request.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Unavailable`] if the connection or handshake
    /// fails before a stream is produced.
    pub async fn open(
        backend: Arc<B>,
        request: CompletionRequest,
        config: SessionConfig,
    ) -> Result<Self, StreamError> {
        let rx = backend
            .open_stream(&request)
            .await
            .map_err(|e| StreamError::Unavailable(e.to_string()))?;

        Ok(Self {
            backend,
            request,
            config,
            rx,
            accumulated_content: String::new(),
            accumulated_reasoning: String::new(),
            continuations: 0,
            transport_retried: false,
        })
    }

    /// Read frames to a terminal state, emitting progress on `events`.
    ///
    /// Always ends by emitting [`SessionEvent::Finished`]; the returned
    /// [`SessionResult`] is a copy of the same terminal state. Dropping
    /// the event receiver cancels the session at its next emission.
    pub async fn run(mut self, events: mpsc::Sender<SessionEvent>) -> SessionResult {
        let result = self.drive(&events).await;
        let _ = events.send(SessionEvent::Finished(result.clone())).await;
        result
    }

    async fn drive(&mut self, events: &mpsc::Sender<SessionEvent>) -> SessionResult {
        loop {
            let step = match tokio::time::timeout(self.config.inactivity_timeout, self.rx.recv())
                .await
            {
                Ok(Some(Ok(event))) => self.handle_event(event, events).await,
                Ok(Some(Err(e))) => self.handle_transport_error(e),
                // Channel closed: upstream EOF without [DONE]. Lenient end.
                Ok(None) => LoopStep::FinishSuccess,
                Err(_) => self.handle_transport_error(StreamError::TransportRead(format!(
                    "no frame received for {}s",
                    self.config.inactivity_timeout.as_secs()
                ))),
            };

            match step {
                LoopStep::Continue => {}
                LoopStep::Reopen => {
                    if let Err(e) = self.reopen(events).await {
                        return self.result_error(e);
                    }
                }
                LoopStep::FinishSuccess => return self.result_success(),
                LoopStep::FinishError(e) => return self.result_error(e),
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: ProviderEvent,
        events: &mpsc::Sender<SessionEvent>,
    ) -> LoopStep {
        match event {
            ProviderEvent::Delta(frame) => {
                if let Some(ref content) = frame.content {
                    self.accumulated_content.push_str(content);
                }
                if let Some(ref reasoning) = frame.reasoning {
                    self.accumulated_reasoning.push_str(reasoning);
                }

                let finish = frame.finish.clone();

                if !frame.is_empty()
                    && events.send(SessionEvent::Delta(frame)).await.is_err()
                {
                    // Receiver dropped, session is cancelled
                    return LoopStep::FinishError(StreamError::TransportRead(
                        "session event receiver dropped".to_string(),
                    ));
                }

                match finish {
                    Some(FinishReason::Length) => LoopStep::Reopen,
                    Some(FinishReason::Stop) => LoopStep::FinishSuccess,
                    Some(FinishReason::Other(reason)) => {
                        tracing::warn!(%reason, "Unrecognized finish_reason, treating as stop");
                        LoopStep::FinishSuccess
                    }
                    None => LoopStep::Continue,
                }
            }
            ProviderEvent::Error(message) => {
                LoopStep::FinishError(StreamError::Upstream(message))
            }
            ProviderEvent::Done => LoopStep::FinishSuccess,
        }
    }

    fn handle_transport_error(&mut self, error: StreamError) -> LoopStep {
        // One transparent retry, and only when there is something to resume.
        if !self.transport_retried && !self.accumulated_content.is_empty() {
            self.transport_retried = true;
            tracing::warn!(error = %error, "Transport failure mid-stream, retrying via continuation");
            return LoopStep::Reopen;
        }
        LoopStep::FinishError(error)
    }

    /// Issue a continuation request and swap in its stream.
    ///
    /// The new message list is the original list plus an assistant turn
    /// holding everything accumulated so far plus a fixed user instruction.
    /// Accumulation buffers are left untouched, so the new stream's deltas
    /// extend the same text.
    async fn reopen(&mut self, events: &mpsc::Sender<SessionEvent>) -> Result<(), StreamError> {
        if self.continuations >= self.config.max_continuations {
            return Err(StreamError::ContinuationExhausted {
                attempts: self.continuations,
            });
        }
        self.continuations += 1;

        let _ = events
            .send(SessionEvent::Continuing {
                attempt: self.continuations,
            })
            .await;

        tracing::info!(
            attempt = self.continuations,
            accumulated_bytes = self.accumulated_content.len(),
            "Continuing truncated stream"
        );

        // Dropping the old receiver stops the previous decode task at its
        // next send, which releases the previous response.
        let request = self.continuation_request();
        self.rx = self
            .backend
            .open_stream(&request)
            .await
            .map_err(|e| StreamError::Unavailable(e.to_string()))?;

        Ok(())
    }

    fn continuation_request(&self) -> CompletionRequest {
        let mut messages = self.request.messages.clone();
        messages.push(ChatMessage::assistant(self.resume_transcript()));
        messages.push(ChatMessage::user(CONTINUATION_INSTRUCTION));
        self.request.with_messages(messages)
    }

    /// The assistant-turn snapshot a continuation resumes from. Falls back
    /// to the reasoning channel when no content has arrived yet, so a
    /// truncation inside the thinking phase still resumes in place.
    fn resume_transcript(&self) -> String {
        if self.accumulated_content.is_empty() {
            self.accumulated_reasoning.clone()
        } else {
            self.accumulated_content.clone()
        }
    }

    fn result_success(&mut self) -> SessionResult {
        SessionResult::success(
            std::mem::take(&mut self.accumulated_content),
            std::mem::take(&mut self.accumulated_reasoning),
            self.continuations,
        )
    }

    fn result_error(&mut self, error: StreamError) -> SessionResult {
        tracing::warn!(error = %error, kind = error.kind(), "Stream session failed");
        SessionResult::failure(
            std::mem::take(&mut self.accumulated_content),
            std::mem::take(&mut self.accumulated_reasoning),
            self.continuations,
            error,
        )
    }
}
