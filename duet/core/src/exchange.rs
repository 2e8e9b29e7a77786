//! Exchange Data Model
//!
//! An [`Exchange`] is one user turn paired with its evolving assistant
//! response, spanning the reasoning stream and the answer stream. The
//! orchestrator owns and mutates the exchange on its own task; everything
//! callers see is an immutable [`ExchangeSnapshot`] clone.
//!
//! # Append-Only Buffers
//!
//! `thinking`, `reasoning` and `answer` only ever grow during a run. The
//! single exception is terminal canonicalization: when a session finishes,
//! the exchange adopts the session's canonical accumulated text, which
//! drops synthetic continuation markers from the visible buffer without
//! ever dropping generated text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Opaque identifier for one exchange.
///
/// Caller-assigned; [`generate`](Self::generate) builds one for callers
/// that have no identifier scheme of their own.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeId(pub String);

impl ExchangeId {
    /// Wrap a caller-assigned identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh unique identifier
    pub fn generate() -> Self {
        Self(format!("exch_{}", Uuid::new_v4()))
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExchangeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Which stream's content is authoritative for the merged view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExchangeMode {
    /// Show the reasoning model's own answer
    ReasoningOnly,
    /// Show the answer model's output
    AnswerOnly,
    /// Show a composite of both sides, regenerated on every update
    BothSplit,
}

impl ExchangeMode {
    /// Stable name for log fields
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReasoningOnly => "reasoning-only",
            Self::AnswerOnly => "answer-only",
            Self::BothSplit => "both-split",
        }
    }
}

/// Lifecycle of one stream (and of the exchange as a whole).
///
/// `Pending → Loading → Streaming → Success`, with `Error` reachable from
/// any non-terminal state. `Success` and `Error` are terminal: nothing
/// transitions out of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// Not started yet
    Pending,
    /// Request issued, no delta received
    Loading,
    /// Deltas arriving
    Streaming,
    /// Completed normally
    Success,
    /// Terminated with an error (partial content preserved)
    Error,
}

impl StreamStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Loading => 1,
            Self::Streaming => 2,
            Self::Success | Self::Error => 3,
        }
    }

    /// Whether this status is terminal
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Whether a stream in this status is doing work
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Loading | Self::Streaming)
    }

    /// Whether the transition `self → next` is legal
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Apply a transition if legal; ignore it otherwise.
    ///
    /// Returns whether the status changed. Illegal transitions (anything
    /// leaving a terminal state, or moving backwards) are dropped.
    pub fn advance(&mut self, next: Self) -> bool {
        if self.can_advance_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }

    /// Human-readable description for status surfaces
    pub fn description(self) -> &'static str {
        match self {
            Self::Pending => "waiting to start",
            Self::Loading => "request in flight",
            Self::Streaming => "receiving tokens",
            Self::Success => "completed",
            Self::Error => "failed",
        }
    }
}

/// Section labels for the split merged view, named after the models.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitLabels {
    /// Header for the reasoning side
    pub reasoning: String,
    /// Header for the answer side
    pub answer: String,
}

impl Default for SplitLabels {
    fn default() -> Self {
        Self {
            reasoning: "Reasoning".to_string(),
            answer: "Answer".to_string(),
        }
    }
}

/// One user turn and its evolving dual-stream response.
#[derive(Clone, Debug)]
pub struct Exchange {
    /// Caller-assigned identifier
    pub id: ExchangeId,
    /// The user turn; immutable
    pub user_content: String,
    /// Prior conversation; immutable snapshot taken at start
    pub history: Vec<crate::protocol::ChatMessage>,
    /// Reasoning-channel transcript of the reasoning stream
    pub thinking: String,
    /// Status of the reasoning channel; success once the handoff fires
    pub thinking_status: StreamStatus,
    /// Time from exchange start to handoff
    pub thinking_elapsed: Option<Duration>,
    /// Content channel of the reasoning stream
    pub reasoning: String,
    /// Reasoning stream status
    pub reasoning_status: StreamStatus,
    /// Content channel of the answer stream
    pub answer: String,
    /// Answer stream status
    pub answer_status: StreamStatus,
    /// Merged-view selection
    pub mode: ExchangeMode,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Continuations issued by the reasoning session
    pub reasoning_continuations: u32,
    /// Continuations issued by the answer session
    pub answer_continuations: u32,
    /// Which handoff signal fired, once one has
    pub handoff_signal: Option<String>,
    /// Split-view section labels
    pub labels: SplitLabels,
}

impl Exchange {
    /// Create a fresh exchange in `Pending` state
    pub fn new(
        id: ExchangeId,
        user_content: impl Into<String>,
        history: Vec<crate::protocol::ChatMessage>,
        mode: ExchangeMode,
    ) -> Self {
        Self {
            id,
            user_content: user_content.into(),
            history,
            thinking: String::new(),
            thinking_status: StreamStatus::Pending,
            thinking_elapsed: None,
            reasoning: String::new(),
            reasoning_status: StreamStatus::Pending,
            answer: String::new(),
            answer_status: StreamStatus::Pending,
            mode,
            created_at: Utc::now(),
            reasoning_continuations: 0,
            answer_continuations: 0,
            handoff_signal: None,
            labels: SplitLabels::default(),
        }
    }

    /// Set the split-view labels (typically the configured model names)
    pub fn with_labels(mut self, labels: SplitLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Append to the reasoning-channel transcript
    pub fn append_thinking(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.thinking.push_str(delta);
        self.thinking_status.advance(StreamStatus::Streaming);
    }

    /// Append to the reasoning stream's content
    pub fn append_reasoning(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.reasoning.push_str(delta);
        self.reasoning_status.advance(StreamStatus::Streaming);
    }

    /// Append to the answer stream's content
    pub fn append_answer(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.answer.push_str(delta);
        self.answer_status.advance(StreamStatus::Streaming);
    }

    /// Adopt the reasoning session's canonical buffers at terminal time.
    ///
    /// Sheds continuation markers from the visible text; generated content
    /// is adopted verbatim, never truncated.
    pub fn canonicalize_reasoning(&mut self, content: &str, thinking: &str) {
        self.reasoning = content.to_string();
        self.thinking = thinking.to_string();
    }

    /// Adopt the answer session's canonical buffer at terminal time
    pub fn canonicalize_answer(&mut self, content: &str) {
        self.answer = content.to_string();
    }

    /// The text that stands as the exchange's answer.
    ///
    /// Falls back to the reasoning stream's content when the answer stream
    /// failed but the reasoning stream succeeded.
    #[must_use]
    pub fn effective_answer(&self) -> &str {
        if self.answer_status == StreamStatus::Error
            && self.reasoning_status == StreamStatus::Success
            && !self.reasoning.is_empty()
        {
            &self.reasoning
        } else {
            &self.answer
        }
    }

    /// Overall exchange status derived from both sides.
    #[must_use]
    pub fn exchange_status(&self) -> StreamStatus {
        let r = self.reasoning_status;
        let a = self.answer_status;
        if r.is_terminal() && a.is_terminal() {
            if a == StreamStatus::Success || r == StreamStatus::Success {
                StreamStatus::Success
            } else {
                StreamStatus::Error
            }
        } else if r == StreamStatus::Streaming || a == StreamStatus::Streaming {
            StreamStatus::Streaming
        } else if r.is_active() || a.is_active() || r.is_terminal() || a.is_terminal() {
            // One side done, the other not yet started counts as in-flight.
            StreamStatus::Loading
        } else {
            StreamStatus::Pending
        }
    }

    /// Render the merged content for the current mode.
    ///
    /// `BothSplit` is recomputed from the latest state of both sides on
    /// every call; nothing about the two streams is assumed synchronized.
    #[must_use]
    pub fn merged_content(&self) -> String {
        match self.mode {
            ExchangeMode::ReasoningOnly => self.reasoning.clone(),
            ExchangeMode::AnswerOnly => self.effective_answer().to_string(),
            ExchangeMode::BothSplit => self.render_split(),
        }
    }

    fn render_split(&self) -> String {
        format!(
            "## {}{}\n\n{}\n\n## {}{}\n\n{}",
            self.labels.reasoning,
            split_annotation(self.reasoning_status),
            self.reasoning,
            self.labels.answer,
            split_annotation(self.answer_status),
            self.effective_answer(),
        )
    }

    /// Produce an immutable snapshot for callers
    #[must_use]
    pub fn snapshot(&self) -> ExchangeSnapshot {
        ExchangeSnapshot {
            id: self.id.clone(),
            thinking: self.thinking.clone(),
            thinking_status: self.thinking_status,
            thinking_elapsed_ms: self
                .thinking_elapsed
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            reasoning: self.reasoning.clone(),
            reasoning_status: self.reasoning_status,
            answer: self.answer.clone(),
            answer_status: self.answer_status,
            merged_content: self.merged_content(),
            exchange_status: self.exchange_status(),
            mode: self.mode,
            reasoning_continuations: self.reasoning_continuations,
            answer_continuations: self.answer_continuations,
            handoff_signal: self.handoff_signal.clone(),
            created_at: self.created_at,
        }
    }
}

fn split_annotation(status: StreamStatus) -> &'static str {
    match status {
        StreamStatus::Loading => " (loading...)",
        StreamStatus::Streaming => " (streaming...)",
        StreamStatus::Error => " (error)",
        StreamStatus::Pending | StreamStatus::Success => "",
    }
}

/// Immutable view of an exchange, emitted after every update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSnapshot {
    /// Exchange identifier
    pub id: ExchangeId,
    /// Reasoning-channel transcript so far
    pub thinking: String,
    /// Reasoning-channel status
    pub thinking_status: StreamStatus,
    /// Milliseconds from start to handoff, once fired
    pub thinking_elapsed_ms: Option<u64>,
    /// Reasoning stream content so far
    pub reasoning: String,
    /// Reasoning stream status
    pub reasoning_status: StreamStatus,
    /// Answer stream content so far
    pub answer: String,
    /// Answer stream status
    pub answer_status: StreamStatus,
    /// Mode-dependent merged view
    pub merged_content: String,
    /// Overall exchange status
    pub exchange_status: StreamStatus,
    /// Merged-view selection
    pub mode: ExchangeMode,
    /// Continuations issued by the reasoning session
    pub reasoning_continuations: u32,
    /// Continuations issued by the answer session
    pub answer_continuations: u32,
    /// Handoff signal that fired, if any
    pub handoff_signal: Option<String>,
    /// Exchange creation time
    pub created_at: DateTime<Utc>,
}

impl ExchangeSnapshot {
    /// Whether the exchange has reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.exchange_status.is_terminal()
    }
}
