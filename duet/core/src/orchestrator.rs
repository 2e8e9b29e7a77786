//! Per-Exchange Orchestration
//!
//! One [`Orchestrator`] owns one [`Exchange`] for one run: it opens the
//! reasoning stream, watches it through the [`HandoffDetector`], opens the
//! answer stream the moment the detector fires, and settles the exchange
//! once both sides are terminal. All exchange mutation happens on the
//! orchestrator's own task; callers only ever see snapshot copies.
//!
//! # State Machine
//!
//! ```text
//! Idle ──► ReasoningActive ──► BothActive ──► Settling ──► Done
//! ```
//!
//! Transitions are forward-only. A resend never rewinds an orchestrator;
//! it builds a brand-new one for the same exchange id.
//!
//! # Failure Policy
//!
//! A reasoning-side failure never aborts the exchange: it forces a handoff
//! with whatever transcript was captured (possibly none) so the answer
//! stream still runs. An answer-side failure falls back to the reasoning
//! stream's content when that side succeeded. Only a double failure
//! settles the exchange in `Error`, and even then every accumulated byte
//! stays visible.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::config::DuetConfig;
use crate::exchange::{Exchange, ExchangeSnapshot, StreamStatus};
use crate::handoff::{HandoffDetector, HandoffSignal};
use crate::protocol::{ChatMessage, CompletionRequest};
use crate::session::{SessionEvent, SessionResult, StreamSession};
use crate::store::MessageStore;
use crate::upstream::CompletionBackend;

/// Marker appended to the visible buffer while a continuation is issued.
///
/// Rendered only mid-stream; terminal canonicalization replaces the buffer
/// with the session's pure accumulated text.
pub const CONTINUATION_MARKER: &str = "\n\n[continuing...]\n\n";

// =============================================================================
// States and Updates
// =============================================================================

/// Orchestrator lifecycle states, forward-only
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Constructed, nothing opened
    Idle,
    /// Reasoning stream open, answer not yet started
    ReasoningActive,
    /// Handoff fired, both streams live (or the answer alone, after a
    /// reasoning failure)
    BothActive,
    /// Both sessions terminal, exchange being finalized
    Settling,
    /// Final snapshot reported and persisted
    Done,
}

impl OrchestratorState {
    fn rank(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::ReasoningActive => 1,
            Self::BothActive => 2,
            Self::Settling => 3,
            Self::Done => 4,
        }
    }

    /// Stable name for log fields
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ReasoningActive => "reasoning-active",
            Self::BothActive => "both-active",
            Self::Settling => "settling",
            Self::Done => "done",
        }
    }

    /// Whether the transition `self → next` is legal
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which session an update came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// The reasoning stream
    Reasoning,
    /// The answer stream
    Answer,
}

impl Side {
    /// Stable name for log fields
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Answer => "answer",
        }
    }
}

/// One session event tagged with the side it came from
#[derive(Debug)]
struct SessionUpdate {
    side: Side,
    event: SessionEvent,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives one exchange from `Idle` to `Done`
pub struct Orchestrator<B, S> {
    exchange: Exchange,
    backend: Arc<B>,
    store: Arc<S>,
    config: DuetConfig,
    detector: HandoffDetector,
    state: OrchestratorState,
    snapshots: mpsc::Sender<ExchangeSnapshot>,
    started_at: Instant,
    reasoning_done: bool,
    answer_done: bool,
    answer_events: Option<mpsc::Sender<SessionEvent>>,
    session_tasks: Vec<JoinHandle<SessionResult>>,
}

impl<B, S> Orchestrator<B, S>
where
    B: CompletionBackend + 'static,
    S: MessageStore + 'static,
{
    /// Create an orchestrator in `Idle` for one exchange run
    pub fn new(
        exchange: Exchange,
        backend: Arc<B>,
        store: Arc<S>,
        config: DuetConfig,
        snapshots: mpsc::Sender<ExchangeSnapshot>,
    ) -> Self {
        let detector = HandoffDetector::new(config.handoff.clone());
        Self {
            exchange,
            backend,
            store,
            config,
            detector,
            state: OrchestratorState::Idle,
            snapshots,
            started_at: Instant::now(),
            reasoning_done: false,
            answer_done: false,
            answer_events: None,
            session_tasks: Vec::new(),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Run the exchange to completion.
    ///
    /// Returns the final snapshot; the same snapshot is the last item
    /// emitted on the snapshot channel and the one handed to the store.
    /// A signal on `cancel` aborts both sessions immediately and settles
    /// the exchange with `Error` statuses on every unfinished side.
    pub async fn run(mut self, mut cancel: oneshot::Receiver<()>) -> ExchangeSnapshot {
        let capacity = self.config.session.event_capacity;
        let (reasoning_events, reasoning_rx) = mpsc::channel(capacity);
        let (answer_events, answer_rx) = mpsc::channel(capacity);
        self.answer_events = Some(answer_events);

        let mut updates = ReceiverStream::new(reasoning_rx)
            .map(|event| SessionUpdate {
                side: Side::Reasoning,
                event,
            })
            .merge(ReceiverStream::new(answer_rx).map(|event| SessionUpdate {
                side: Side::Answer,
                event,
            }));

        self.start_reasoning(reasoning_events).await;

        let mut cancel_detached = false;
        while !(self.reasoning_done && self.answer_done) {
            tokio::select! {
                result = &mut cancel, if !cancel_detached => {
                    if result.is_ok() {
                        return self.settle_cancelled().await;
                    }
                    // Cancel sender dropped without firing; run detached.
                    cancel_detached = true;
                }
                update = updates.next() => match update {
                    Some(SessionUpdate { side, event }) => {
                        self.handle_update(side, event).await;
                    }
                    None => {
                        // Both senders gone without terminal events. A
                        // session task died abnormally; fail what is left.
                        tracing::error!(
                            exchange_id = %self.exchange.id,
                            "Session channels closed without terminal events"
                        );
                        self.exchange.thinking_status.advance(StreamStatus::Error);
                        self.exchange.reasoning_status.advance(StreamStatus::Error);
                        self.exchange.answer_status.advance(StreamStatus::Error);
                        break;
                    }
                }
            }
        }

        self.settle().await
    }

    // -------------------------------------------------------------------------
    // Startup and handoff
    // -------------------------------------------------------------------------

    async fn start_reasoning(&mut self, events: mpsc::Sender<SessionEvent>) {
        self.advance_state(OrchestratorState::ReasoningActive);
        self.exchange.thinking_status.advance(StreamStatus::Loading);
        self.exchange.reasoning_status.advance(StreamStatus::Loading);
        self.emit_progress();

        let mut messages = self.exchange.history.clone();
        messages.push(ChatMessage::user(&self.exchange.user_content));
        let request =
            CompletionRequest::new(messages, &self.config.reasoning).with_reasoning(true);

        tracing::info!(
            exchange_id = %self.exchange.id,
            model = %self.config.reasoning.model,
            "Opening reasoning stream"
        );

        match StreamSession::open(
            Arc::clone(&self.backend),
            request,
            self.config.session.clone(),
        )
        .await
        {
            Ok(session) => {
                self.session_tasks.push(tokio::spawn(session.run(events)));
            }
            Err(e) => {
                // Reasoning failure never blocks the answer.
                tracing::warn!(
                    exchange_id = %self.exchange.id,
                    error = %e,
                    "Reasoning stream failed to open, forcing handoff"
                );
                self.exchange.thinking_status.advance(StreamStatus::Error);
                self.exchange.reasoning_status.advance(StreamStatus::Error);
                self.reasoning_done = true;
                if let Some(signal) = self.detector.observe_end() {
                    self.do_handoff(signal).await;
                }
                self.emit_progress();
            }
        }
    }

    /// Open the answer stream with the captured reasoning as reference
    /// context. Fires exactly once per run, guarded by the detector latch.
    async fn do_handoff(&mut self, signal: HandoffSignal) {
        self.advance_state(OrchestratorState::BothActive);
        self.exchange.handoff_signal = Some(signal.as_str().to_string());
        if self.exchange.thinking_status.advance(StreamStatus::Success) {
            self.exchange.thinking_elapsed = Some(self.started_at.elapsed());
        }

        let transcript = self.handoff_transcript();
        tracing::info!(
            exchange_id = %self.exchange.id,
            signal = %signal,
            transcript_bytes = transcript.len(),
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "Handoff fired, opening answer stream"
        );

        let mut messages = self.exchange.history.clone();
        messages.push(ChatMessage::user(self.augmented_user_turn(&transcript)));
        let request = CompletionRequest::new(messages, &self.config.answer);

        self.exchange.answer_status.advance(StreamStatus::Loading);

        match StreamSession::open(
            Arc::clone(&self.backend),
            request,
            self.config.session.clone(),
        )
        .await
        {
            Ok(session) => {
                if let Some(events) = self.answer_events.take() {
                    self.session_tasks.push(tokio::spawn(session.run(events)));
                } else {
                    tracing::error!(
                        exchange_id = %self.exchange.id,
                        "Answer event channel already taken"
                    );
                    self.exchange.answer_status.advance(StreamStatus::Error);
                    self.answer_done = true;
                }
            }
            Err(e) => {
                tracing::warn!(
                    exchange_id = %self.exchange.id,
                    error = %e,
                    "Answer stream failed to open"
                );
                self.exchange.answer_status.advance(StreamStatus::Error);
                self.answer_done = true;
            }
        }

        self.emit_progress();
    }

    /// The reasoning text carried across the handoff: the thinking channel
    /// when it produced anything, otherwise the reasoning stream's content.
    /// Continuation markers never travel upstream.
    fn handoff_transcript(&self) -> String {
        let raw = if self.exchange.thinking.is_empty() {
            &self.exchange.reasoning
        } else {
            &self.exchange.thinking
        };
        raw.replace(CONTINUATION_MARKER, "")
    }

    fn augmented_user_turn(&self, transcript: &str) -> String {
        if transcript.is_empty() {
            return self.exchange.user_content.clone();
        }
        format!(
            "{}\n\n---\nReference reasoning from another model (may contain errors, use \
             your own judgement):\n{}",
            self.exchange.user_content, transcript
        )
    }

    // -------------------------------------------------------------------------
    // Event handling
    // -------------------------------------------------------------------------

    async fn handle_update(&mut self, side: Side, event: SessionEvent) {
        match (side, event) {
            (Side::Reasoning, SessionEvent::Delta(frame)) => {
                if let Some(ref thinking) = frame.reasoning {
                    self.exchange.append_thinking(thinking);
                }
                if let Some(ref content) = frame.content {
                    self.exchange.append_reasoning(content);
                }
                if let Some(signal) = self.detector.observe_delta(&frame) {
                    self.do_handoff(signal).await;
                }
                self.emit_progress();
            }
            (Side::Reasoning, SessionEvent::Continuing { attempt }) => {
                self.exchange.reasoning_continuations = attempt;
                // The marker lands where generation is actually resuming.
                if self.exchange.reasoning.is_empty() && !self.exchange.thinking.is_empty() {
                    self.exchange.append_thinking(CONTINUATION_MARKER);
                } else {
                    self.exchange.append_reasoning(CONTINUATION_MARKER);
                }
                self.emit_progress();
            }
            (Side::Reasoning, SessionEvent::Finished(result)) => {
                self.finish_reasoning(result).await;
            }
            (Side::Answer, SessionEvent::Delta(frame)) => {
                if let Some(ref content) = frame.content {
                    self.exchange.append_answer(content);
                }
                if frame.reasoning.is_some() {
                    tracing::debug!(
                        exchange_id = %self.exchange.id,
                        "Ignoring reasoning delta on the answer stream"
                    );
                }
                self.emit_progress();
            }
            (Side::Answer, SessionEvent::Continuing { attempt }) => {
                self.exchange.answer_continuations = attempt;
                self.exchange.append_answer(CONTINUATION_MARKER);
                self.emit_progress();
            }
            (Side::Answer, SessionEvent::Finished(result)) => {
                self.finish_answer(result);
            }
        }
    }

    async fn finish_reasoning(&mut self, result: SessionResult) {
        tracing::info!(
            exchange_id = %self.exchange.id,
            status = ?result.status,
            continuations = result.continuations,
            content_bytes = result.content.len(),
            "Reasoning stream finished"
        );

        self.exchange
            .canonicalize_reasoning(&result.content, &result.reasoning);
        self.exchange.reasoning_continuations = result.continuations;
        self.exchange.reasoning_status.advance(result.status);
        self.exchange.thinking_status.advance(result.status);
        if let Some(ref error) = result.error {
            tracing::warn!(
                exchange_id = %self.exchange.id,
                error = %error,
                kind = error.kind(),
                "Reasoning stream error, content preserved"
            );
        }
        self.reasoning_done = true;

        if let Some(signal) = self.detector.observe_end() {
            self.do_handoff(signal).await;
        }
        self.emit_progress();
    }

    fn finish_answer(&mut self, result: SessionResult) {
        tracing::info!(
            exchange_id = %self.exchange.id,
            status = ?result.status,
            continuations = result.continuations,
            content_bytes = result.content.len(),
            "Answer stream finished"
        );

        self.exchange.canonicalize_answer(&result.content);
        self.exchange.answer_continuations = result.continuations;
        self.exchange.answer_status.advance(result.status);
        if let Some(ref error) = result.error {
            tracing::warn!(
                exchange_id = %self.exchange.id,
                error = %error,
                kind = error.kind(),
                "Answer stream error, falling back if reasoning succeeded"
            );
        }
        self.answer_done = true;
        self.emit_progress();
    }

    // -------------------------------------------------------------------------
    // Settlement
    // -------------------------------------------------------------------------

    async fn settle(mut self) -> ExchangeSnapshot {
        self.advance_state(OrchestratorState::Settling);
        self.finalize().await
    }

    async fn settle_cancelled(mut self) -> ExchangeSnapshot {
        tracing::info!(exchange_id = %self.exchange.id, "Exchange cancelled");

        // Cancelled sessions must not deliver further callbacks.
        for task in &self.session_tasks {
            task.abort();
        }
        self.exchange.thinking_status.advance(StreamStatus::Error);
        self.exchange.reasoning_status.advance(StreamStatus::Error);
        self.exchange.answer_status.advance(StreamStatus::Error);

        self.advance_state(OrchestratorState::Settling);
        self.finalize().await
    }

    async fn finalize(mut self) -> ExchangeSnapshot {
        let snapshot = self.exchange.snapshot();

        tracing::info!(
            exchange_id = %self.exchange.id,
            status = ?snapshot.exchange_status,
            reasoning_status = ?snapshot.reasoning_status,
            answer_status = ?snapshot.answer_status,
            handoff = snapshot.handoff_signal.as_deref().unwrap_or("none"),
            "Exchange settled"
        );

        // Terminal snapshot is delivered reliably, unlike progress ones.
        let _ = self.snapshots.send(snapshot.clone()).await;

        if let Err(e) = self.store.persist(&self.exchange.id, &snapshot).await {
            tracing::error!(
                exchange_id = %self.exchange.id,
                error = %e,
                "Failed to persist settled exchange"
            );
        }

        self.advance_state(OrchestratorState::Done);
        snapshot
    }

    // -------------------------------------------------------------------------
    // Plumbing
    // -------------------------------------------------------------------------

    fn advance_state(&mut self, next: OrchestratorState) {
        if self.state.can_advance_to(next) {
            tracing::debug!(
                exchange_id = %self.exchange.id,
                from = self.state.as_str(),
                to = next.as_str(),
                "Orchestrator state transition"
            );
            self.state = next;
        }
    }

    /// Emit a progress snapshot. Lossy on a full channel: the next update
    /// carries strictly more state, so a dropped intermediate is only a
    /// skipped repaint.
    fn emit_progress(&self) {
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.snapshots.try_send(self.exchange.snapshot())
        {
            tracing::trace!(exchange_id = %self.exchange.id, "Snapshot channel full, coalescing");
        }
    }
}
