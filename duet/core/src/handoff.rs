//! Handoff Detection
//!
//! Decides the single moment to start the answer stream while the
//! reasoning stream is still running (or has just finished). Starting the
//! answer early, conditioned on whatever reasoning has accumulated so far,
//! is the latency optimization this crate exists for.
//!
//! # Signals
//!
//! Any one of four signals fires the latch; the first one wins and the
//! rest are ignored for the remainder of the run:
//!
//! 1. **Channel switch**: a frame carries a content delta with no
//!    reasoning delta, after reasoning has been observed at least once.
//!    The model has moved from thinking to answering in its own output.
//! 2. **Reasoning finished**: the reasoning stream reports a
//!    `finish_reason` of `stop` or `length`. Fires even when no reasoning
//!    delta ever arrived, so an immediately-truncated stream still hands
//!    off (with an empty transcript).
//! 3. **End of stream**: the reasoning stream hit EOF with no handoff yet.
//!    Guarantees the latch eventually fires for every terminating stream.
//! 4. **Heuristic** (off by default): for providers that expose no
//!    reasoning/content channel distinction. Fires once accumulated
//!    reasoning is long enough and ends with a conclusion marker, or once
//!    an approximate token count is exceeded. Best-effort only; the
//!    explicit signals above are authoritative.
//!
//! The detector is driven exclusively from its owning orchestrator's task,
//! so the `fired` latch needs no synchronization: concurrent-looking races
//! (a finish and an EOF in the same poll) serialize through `observe_*`
//! calls and exactly one returns a signal.

use crate::protocol::{DeltaFrame, FinishReason};

/// Rolling window of recent reasoning text scanned for conclusion markers
const TAIL_LIMIT: usize = 512;

/// Rough chars-per-token divisor for the heuristic token threshold
const CHARS_PER_TOKEN: usize = 4;

// =============================================================================
// Configuration
// =============================================================================

/// Tuning for the heuristic fallback signal
#[derive(Clone, Debug)]
pub struct HandoffConfig {
    /// Enable the heuristic signal (signal 4). The explicit signals are
    /// always active regardless of this flag.
    pub use_heuristics: bool,
    /// Minimum accumulated reasoning length before a conclusion marker
    /// can fire the heuristic
    pub min_reasoning_chars: usize,
    /// Approximate token count that fires the heuristic on its own
    pub token_threshold: usize,
    /// Conclusion markers, matched case-insensitively against the tail
    /// of the accumulated reasoning
    pub conclusion_markers: Vec<String>,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            use_heuristics: false,
            min_reasoning_chars: 200,
            token_threshold: 600,
            conclusion_markers: default_conclusion_markers(),
        }
    }
}

fn default_conclusion_markers() -> Vec<String> {
    [
        "therefore",
        "in summary",
        "in conclusion",
        "to summarize",
        "the answer is",
        "so the answer",
        "final answer",
        "综上",
        "总结",
        "所以答案",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

// =============================================================================
// Signals
// =============================================================================

/// Which signal fired the handoff latch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffSignal {
    /// Content delta with no reasoning delta, after reasoning was seen
    ChannelSwitch,
    /// Reasoning stream reported `finish_reason` stop or length
    ReasoningFinished,
    /// Reasoning stream reached EOF without any earlier signal
    EndOfStream,
    /// Length/marker heuristic fired
    Heuristic,
}

impl HandoffSignal {
    /// Stable string form, recorded on the exchange for diagnostics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChannelSwitch => "channel-switch",
            Self::ReasoningFinished => "reasoning-finished",
            Self::EndOfStream => "end-of-stream",
            Self::Heuristic => "heuristic",
        }
    }
}

impl std::fmt::Display for HandoffSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Detector
// =============================================================================

/// Single-fire handoff latch
///
/// Feed every reasoning-stream frame through [`observe_delta`] and report
/// EOF through [`observe_end`]. The first call that returns `Some` is the
/// handoff moment; every later call returns `None`.
///
/// [`observe_delta`]: HandoffDetector::observe_delta
/// [`observe_end`]: HandoffDetector::observe_end
#[derive(Debug)]
pub struct HandoffDetector {
    config: HandoffConfig,
    fired: bool,
    reasoning_seen: bool,
    reasoning_chars: usize,
    tail: String,
}

impl HandoffDetector {
    /// Create a detector with the given tuning
    #[must_use]
    pub fn new(config: HandoffConfig) -> Self {
        let config = HandoffConfig {
            conclusion_markers: config
                .conclusion_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            ..config
        };
        Self {
            config,
            fired: false,
            reasoning_seen: false,
            reasoning_chars: 0,
            tail: String::new(),
        }
    }

    /// Whether the latch has fired
    #[must_use]
    pub fn fired(&self) -> bool {
        self.fired
    }

    /// Observe one reasoning-stream frame
    ///
    /// Returns the signal that fired, if this frame fired the latch.
    pub fn observe_delta(&mut self, frame: &DeltaFrame) -> Option<HandoffSignal> {
        if self.fired {
            return None;
        }

        // Signal 1: channel switch. Checked against reasoning seen in
        // earlier frames, before this frame's reasoning is folded in.
        let has_content = frame.content.as_deref().is_some_and(|c| !c.is_empty());
        let has_reasoning = frame.reasoning.as_deref().is_some_and(|r| !r.is_empty());
        if has_content && !has_reasoning && self.reasoning_seen {
            return self.fire(HandoffSignal::ChannelSwitch);
        }

        if has_reasoning {
            self.reasoning_seen = true;
            if let Some(ref reasoning) = frame.reasoning {
                self.reasoning_chars += reasoning.chars().count();
                self.push_tail(reasoning);
            }
        }

        // Signal 2: explicit finish from the provider
        if let Some(ref finish) = frame.finish {
            if matches!(finish, FinishReason::Stop | FinishReason::Length) {
                return self.fire(HandoffSignal::ReasoningFinished);
            }
        }

        // Signal 4: heuristic fallback
        if self.config.use_heuristics && self.heuristic_ready() {
            return self.fire(HandoffSignal::Heuristic);
        }

        None
    }

    /// Observe end-of-stream on the reasoning side
    ///
    /// Returns [`HandoffSignal::EndOfStream`] if nothing fired earlier.
    pub fn observe_end(&mut self) -> Option<HandoffSignal> {
        if self.fired {
            return None;
        }
        self.fire(HandoffSignal::EndOfStream)
    }

    fn fire(&mut self, signal: HandoffSignal) -> Option<HandoffSignal> {
        self.fired = true;
        Some(signal)
    }

    fn heuristic_ready(&self) -> bool {
        let approx_tokens = self.reasoning_chars / CHARS_PER_TOKEN;
        if approx_tokens >= self.config.token_threshold {
            return true;
        }
        self.reasoning_chars >= self.config.min_reasoning_chars
            && self
                .config
                .conclusion_markers
                .iter()
                .any(|marker| self.tail.contains(marker))
    }

    fn push_tail(&mut self, text: &str) {
        self.tail.push_str(&text.to_lowercase());
        if self.tail.len() > TAIL_LIMIT {
            let mut cut = self.tail.len() - TAIL_LIMIT;
            while !self.tail.is_char_boundary(cut) {
                cut += 1;
            }
            self.tail.drain(..cut);
        }
    }
}
