//! Exchange Registry
//!
//! The only shared mutable structure in the crate: a map from exchange id
//! to its live orchestrator's control handles, plus a record of the inputs
//! each exchange was started with (for resend). Everything else is owned
//! by exactly one task.
//!
//! # Invariants
//!
//! - At most one live orchestrator per exchange id.
//! - At most `max_concurrent` live orchestrators in total.
//! - Insert, lookup and removal are mutually exclusive; no lock is held
//!   across an await point.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::exchange::{ExchangeId, ExchangeMode, ExchangeSnapshot};
use crate::protocol::ChatMessage;

/// Default ceiling on concurrently live orchestrators
pub const DEFAULT_MAX_EXCHANGES: usize = 16;

// =============================================================================
// Error Types
// =============================================================================

/// Errors from registering or addressing exchanges
#[derive(Debug)]
pub enum RegistryError {
    /// An orchestrator for this id is already live
    ExchangeAlreadyActive(ExchangeId),
    /// The concurrent-exchange ceiling was hit
    MaxExchangesReached {
        /// The configured ceiling
        limit: usize,
    },
    /// No live orchestrator or stored record under this id
    UnknownExchange(ExchangeId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExchangeAlreadyActive(id) => {
                write!(f, "Exchange {id} already has a live orchestrator")
            }
            Self::MaxExchangesReached { limit } => {
                write!(f, "Too many live exchanges (max: {limit})")
            }
            Self::UnknownExchange(id) => write!(f, "Unknown exchange {id}"),
        }
    }
}

impl std::error::Error for RegistryError {}

// =============================================================================
// Entries
// =============================================================================

/// Control handles for one live orchestrator
#[derive(Debug)]
pub struct ActiveExchange {
    /// Fires the orchestrator's cancel path
    pub cancel: oneshot::Sender<()>,
    /// The orchestrator task; resolves to the final snapshot
    pub task: JoinHandle<ExchangeSnapshot>,
}

/// The inputs an exchange was started with, kept for resend
#[derive(Clone, Debug)]
pub struct ExchangeRecord {
    /// The user turn
    pub user_content: String,
    /// History snapshot taken at first start
    pub history: Vec<ChatMessage>,
    /// Merged-view selection
    pub mode: ExchangeMode,
}

// =============================================================================
// Registry
// =============================================================================

/// Shared map of live orchestrators and start records
#[derive(Clone)]
pub struct ExchangeRegistry {
    active: Arc<RwLock<HashMap<ExchangeId, ActiveExchange>>>,
    records: Arc<RwLock<HashMap<ExchangeId, ExchangeRecord>>>,
    max_concurrent: usize,
}

impl Default for ExchangeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXCHANGES)
    }
}

impl ExchangeRegistry {
    /// Create a registry with the given concurrency ceiling
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            records: Arc::new(RwLock::new(HashMap::new())),
            max_concurrent,
        }
    }

    /// Register a live orchestrator under `id`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ExchangeAlreadyActive`] when an orchestrator is
    /// already live for `id`; [`RegistryError::MaxExchangesReached`] when
    /// the ceiling is hit. Both checks and the insert happen under one
    /// write lock.
    pub fn register(
        &self,
        id: ExchangeId,
        handles: ActiveExchange,
    ) -> Result<(), RegistryError> {
        let mut active = self.active.write();
        if active.contains_key(&id) {
            return Err(RegistryError::ExchangeAlreadyActive(id));
        }
        if active.len() >= self.max_concurrent {
            return Err(RegistryError::MaxExchangesReached {
                limit: self.max_concurrent,
            });
        }

        tracing::debug!(exchange_id = %id, live = active.len() + 1, "Registered orchestrator");
        active.insert(id, handles);
        Ok(())
    }

    /// Remove and return the live entry for `id`, if any
    pub fn take(&self, id: &ExchangeId) -> Option<ActiveExchange> {
        let taken = self.active.write().remove(id);
        if taken.is_some() {
            tracing::debug!(exchange_id = %id, "Took orchestrator handles");
        }
        taken
    }

    /// Drop the live entry for `id` after its task settled
    pub fn complete(&self, id: &ExchangeId) {
        if self.active.write().remove(id).is_some() {
            tracing::debug!(exchange_id = %id, "Orchestrator completed");
        }
    }

    /// Whether an orchestrator is live for `id`
    #[must_use]
    pub fn is_active(&self, id: &ExchangeId) -> bool {
        self.active.read().contains_key(id)
    }

    /// Number of live orchestrators
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Ids of all live orchestrators
    #[must_use]
    pub fn active_exchanges(&self) -> Vec<ExchangeId> {
        self.active.read().keys().cloned().collect()
    }

    /// Remove and return every live entry (for cancel-all)
    pub fn drain_active(&self) -> Vec<(ExchangeId, ActiveExchange)> {
        self.active.write().drain().collect()
    }

    /// Store the start inputs for `id`, replacing any previous record
    pub fn record_inputs(&self, id: ExchangeId, record: ExchangeRecord) {
        self.records.write().insert(id, record);
    }

    /// The start inputs recorded for `id`
    #[must_use]
    pub fn record(&self, id: &ExchangeId) -> Option<ExchangeRecord> {
        self.records.read().get(id).cloned()
    }

    /// Drop all knowledge of `id`: the start record and any live entry.
    ///
    /// Returns the live entry so the caller can cancel it.
    pub fn forget(&self, id: &ExchangeId) -> Option<ActiveExchange> {
        self.records.write().remove(id);
        self.take(id)
    }
}
