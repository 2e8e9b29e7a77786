//! Error Taxonomy
//!
//! Typed errors for stream sessions and the public facade. The guiding rule
//! everywhere: partial generated content is never discarded on error — each
//! variant travels alongside whatever text was accumulated, and the caller
//! keeps it visible.

use thiserror::Error;

/// Errors surfaced by a stream session.
#[derive(Clone, Debug, Error)]
pub enum StreamError {
    /// Connection or handshake to the upstream provider failed.
    ///
    /// Not retried automatically; surfaced immediately.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// The response body failed mid-stream, or the inactivity timeout
    /// elapsed with no frame received.
    ///
    /// Retried once through the continuation path when content has already
    /// been accumulated, otherwise surfaced.
    #[error("transport read failed: {0}")]
    TransportRead(String),

    /// The truncation-continuation retry ceiling was exceeded.
    ///
    /// All content accumulated across the attempts is preserved.
    #[error("continuation limit reached after {attempts} attempts")]
    ContinuationExhausted {
        /// How many continuation requests were issued
        attempts: u32,
    },

    /// The provider reported an error payload in the stream.
    #[error("upstream reported error: {0}")]
    Upstream(String),
}

impl StreamError {
    /// Short stable tag for structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::TransportRead(_) => "transport_read",
            Self::ContinuationExhausted { .. } => "continuation_exhausted",
            Self::Upstream(_) => "upstream",
        }
    }
}

/// Errors returned by the [`Duet`](crate::duet::Duet) facade.
#[derive(Debug, Error)]
pub enum DuetError {
    /// The exchange registry rejected the operation
    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),

    /// Fetching history from the message store failed
    #[error("history lookup failed: {0}")]
    History(#[source] anyhow::Error),
}
