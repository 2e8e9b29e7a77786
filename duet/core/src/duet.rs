//! Duet Facade
//!
//! The caller-facing surface: start an exchange and watch its snapshots,
//! cancel it, resend it, forget it. One [`Duet`] owns one backend, one
//! store and one registry; each started exchange runs as its own
//! orchestrator task.
//!
//! # Usage
//!
//! ```ignore
//! use duet_core::{Duet, DuetConfig, ExchangeId, ExchangeMode};
//! use duet_core::store::MemoryStore;
//! use duet_core::upstream::OpenAiBackend;
//!
//! let duet = Duet::new(OpenAiBackend::from_env(), MemoryStore::new(), DuetConfig::from_env());
//! let mut snapshots = duet
//!     .start_exchange(ExchangeId::new("turn-1"), "2+2?", None, ExchangeMode::BothSplit)
//!     .await?;
//! while let Some(snapshot) = snapshots.recv().await {
//!     println!("{}", snapshot.merged_content);
//! }
//! ```
//!
//! Snapshot channels are bounded: drain them (or drop them) promptly.
//! Intermediate snapshots coalesce when the channel is full; the terminal
//! snapshot is always delivered to a live receiver.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::DuetConfig;
use crate::error::DuetError;
use crate::exchange::{Exchange, ExchangeId, ExchangeMode, ExchangeSnapshot, SplitLabels};
use crate::orchestrator::Orchestrator;
use crate::protocol::ChatMessage;
use crate::registry::{ActiveExchange, ExchangeRecord, ExchangeRegistry, RegistryError};
use crate::store::{MemoryStore, MessageStore};
use crate::upstream::{CompletionBackend, OpenAiBackend};

/// Dual-stream completion orchestrator, one instance per host
pub struct Duet<B, S> {
    backend: Arc<B>,
    store: Arc<S>,
    config: DuetConfig,
    registry: ExchangeRegistry,
}

impl<B, S> Clone for Duet<B, S> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl Duet<OpenAiBackend, MemoryStore> {
    /// Build a Duet from environment variables with an in-memory store
    #[must_use]
    pub fn from_env() -> Self {
        let config = DuetConfig::from_env();
        Self::new(OpenAiBackend::from_config(&config.upstream), MemoryStore::new(), config)
    }
}

impl<B, S> Duet<B, S>
where
    B: CompletionBackend + 'static,
    S: MessageStore + 'static,
{
    /// Create a Duet over `backend` and `store`
    pub fn new(backend: B, store: S, config: DuetConfig) -> Self {
        let registry = ExchangeRegistry::new(config.limits.max_concurrent_exchanges);
        Self {
            backend: Arc::new(backend),
            store: Arc::new(store),
            config,
            registry,
        }
    }

    /// Start an exchange and stream its snapshots.
    ///
    /// Returns immediately; the orchestrator runs on its own task and the
    /// receiver yields a snapshot after every update, ending with the
    /// terminal one. When `history` is `None` it is read from the store.
    ///
    /// # Errors
    ///
    /// [`DuetError::Registry`] when an orchestrator for `id` is already
    /// live or the concurrency ceiling is hit; [`DuetError::History`] when
    /// the store lookup fails.
    pub async fn start_exchange(
        &self,
        id: ExchangeId,
        user_content: impl Into<String>,
        history: Option<Vec<ChatMessage>>,
        mode: ExchangeMode,
    ) -> Result<mpsc::Receiver<ExchangeSnapshot>, DuetError> {
        let history = match history {
            Some(history) => history,
            None => self
                .store
                .history(&id)
                .await
                .map_err(DuetError::History)?,
        };

        self.start_run(id, user_content.into(), history, mode)
    }

    /// Cancel a live exchange.
    ///
    /// Both in-flight upstream requests are aborted immediately; the
    /// exchange settles with `Error` statuses and is persisted with
    /// whatever it accumulated. Returns once settled. Idempotent: a
    /// second call (or a call for an unknown/finished id) returns `false`
    /// and does nothing.
    pub async fn cancel_exchange(&self, id: &ExchangeId) -> bool {
        match self.registry.take(id) {
            Some(active) => {
                let _ = active.cancel.send(());
                let _ = active.task.await;
                true
            }
            None => false,
        }
    }

    /// Restart a known exchange from its original inputs.
    ///
    /// Discards prior reasoning/answer content by building a brand-new
    /// orchestrator for the recorded `user_content`/`history`/`mode`. A
    /// still-live run is cancelled first.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownExchange`] (via [`DuetError::Registry`])
    /// when no start record exists for `id`.
    pub async fn resend_exchange(
        &self,
        id: &ExchangeId,
    ) -> Result<mpsc::Receiver<ExchangeSnapshot>, DuetError> {
        let record = self
            .registry
            .record(id)
            .ok_or_else(|| RegistryError::UnknownExchange(id.clone()))?;

        self.cancel_exchange(id).await;
        self.start_run(id.clone(), record.user_content, record.history, record.mode)
    }

    /// Drop all knowledge of an exchange, cancelling it first if live.
    ///
    /// Returns whether anything was forgotten. The store is not touched;
    /// persisted conversation data belongs to the host.
    pub async fn forget_exchange(&self, id: &ExchangeId) -> bool {
        let had_record = self.registry.record(id).is_some();
        if let Some(active) = self.registry.forget(id) {
            let _ = active.cancel.send(());
            let _ = active.task.await;
            return true;
        }
        had_record
    }

    /// Cancel every live exchange; returns how many were cancelled
    pub async fn cancel_all(&self) -> usize {
        let drained = self.registry.drain_active();
        let mut cancelled = 0;
        for (id, active) in drained {
            tracing::info!(exchange_id = %id, "Cancelling exchange (cancel-all)");
            let _ = active.cancel.send(());
            let _ = active.task.await;
            cancelled += 1;
        }
        cancelled
    }

    /// Ids of all live exchanges
    #[must_use]
    pub fn active_exchanges(&self) -> Vec<ExchangeId> {
        self.registry.active_exchanges()
    }

    /// Number of live exchanges
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registry.active_count()
    }

    /// Whether the upstream endpoint is reachable
    pub async fn health_check(&self) -> bool {
        self.backend.health_check().await
    }

    /// The resolved configuration this instance runs with
    #[must_use]
    pub fn config(&self) -> &DuetConfig {
        &self.config
    }

    fn start_run(
        &self,
        id: ExchangeId,
        user_content: String,
        history: Vec<ChatMessage>,
        mode: ExchangeMode,
    ) -> Result<mpsc::Receiver<ExchangeSnapshot>, DuetError> {
        self.registry.record_inputs(
            id.clone(),
            ExchangeRecord {
                user_content: user_content.clone(),
                history: history.clone(),
                mode,
            },
        );

        let labels = SplitLabels {
            reasoning: self.config.reasoning.model.clone(),
            answer: self.config.answer.model.clone(),
        };
        let exchange = Exchange::new(id.clone(), user_content, history, mode).with_labels(labels);
        let rejection_snapshot = exchange.snapshot();

        let (snapshot_tx, snapshot_rx) = mpsc::channel(self.config.limits.snapshot_capacity);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        let orchestrator = Orchestrator::new(
            exchange,
            Arc::clone(&self.backend),
            Arc::clone(&self.store),
            self.config.clone(),
            snapshot_tx,
        );

        let registry = self.registry.clone();
        let run_id = id.clone();
        let task = tokio::spawn(async move {
            // A failed registration drops the ready sender; the run must
            // never start in that case.
            if ready_rx.await.is_err() {
                return rejection_snapshot;
            }
            let snapshot = orchestrator.run(cancel_rx).await;
            registry.complete(&run_id);
            snapshot
        });

        self.registry.register(
            id.clone(),
            ActiveExchange {
                cancel: cancel_tx,
                task,
            },
        )?;
        let _ = ready_tx.send(());

        tracing::info!(
            exchange_id = %id,
            mode = mode.as_str(),
            live = self.registry.active_count(),
            "Exchange started"
        );

        Ok(snapshot_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::StreamStatus;
    use crate::upstream::testing::MockBackend;
    use pretty_assertions::assert_eq;

    const REASONING_MODEL: &str = "r-model";
    const ANSWER_MODEL: &str = "a-model";

    fn test_config() -> DuetConfig {
        let mut config = DuetConfig::default();
        config.reasoning.model = REASONING_MODEL.to_string();
        config.answer.model = ANSWER_MODEL.to_string();
        config
    }

    fn quick_backend() -> MockBackend {
        MockBackend::new()
            .script_for(
                REASONING_MODEL,
                vec![MockBackend::reasoning("hm"), MockBackend::finish_stop()],
            )
            .script_for(
                ANSWER_MODEL,
                vec![MockBackend::content("done"), MockBackend::finish_stop()],
            )
    }

    fn hanging_backend() -> MockBackend {
        MockBackend::new().script_for(REASONING_MODEL, vec![MockBackend::hang()])
    }

    async fn drain(mut rx: mpsc::Receiver<ExchangeSnapshot>) -> Vec<ExchangeSnapshot> {
        let mut snapshots = Vec::new();
        while let Some(snapshot) = rx.recv().await {
            snapshots.push(snapshot);
        }
        snapshots
    }

    #[tokio::test]
    async fn test_start_streams_to_terminal_snapshot() {
        let duet = Duet::new(quick_backend(), MemoryStore::new(), test_config());
        let rx = duet
            .start_exchange(ExchangeId::new("e1"), "hi", None, ExchangeMode::AnswerOnly)
            .await
            .unwrap();

        let snapshots = drain(rx).await;
        let last = snapshots.last().unwrap();
        assert!(last.is_terminal());
        assert_eq!(last.answer, "done");
        assert_eq!(duet.active_count(), 0);
    }

    #[tokio::test]
    async fn test_history_read_from_store_when_not_supplied() {
        let store = MemoryStore::new();
        let id = ExchangeId::new("e1");
        store.set_history(
            id.clone(),
            vec![
                ChatMessage::user("earlier question"),
                ChatMessage::assistant("earlier answer"),
            ],
        );

        let backend = quick_backend();
        let requests = backend.requests();
        let duet = Duet::new(backend, store, test_config());

        let rx = duet
            .start_exchange(id, "follow-up", None, ExchangeMode::AnswerOnly)
            .await
            .unwrap();
        drain(rx).await;

        let seen = requests.lock().clone();
        let reasoning_request = seen
            .iter()
            .find(|r| r.model == REASONING_MODEL)
            .expect("reasoning request issued");
        assert_eq!(reasoning_request.messages.len(), 3);
        assert_eq!(reasoning_request.messages[0].content, "earlier question");
        assert_eq!(reasoning_request.messages[2].content, "follow-up");
    }

    #[tokio::test]
    async fn test_duplicate_start_rejected_while_live() {
        let duet = Duet::new(hanging_backend(), MemoryStore::new(), test_config());
        let id = ExchangeId::new("e1");

        let _rx = duet
            .start_exchange(id.clone(), "hi", Some(vec![]), ExchangeMode::AnswerOnly)
            .await
            .unwrap();

        let err = duet
            .start_exchange(id.clone(), "hi again", Some(vec![]), ExchangeMode::AnswerOnly)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DuetError::Registry(RegistryError::ExchangeAlreadyActive(_))
        ));

        duet.cancel_exchange(&id).await;
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_enforced() {
        let mut config = test_config();
        config.limits.max_concurrent_exchanges = 1;
        let duet = Duet::new(hanging_backend(), MemoryStore::new(), config);

        let _rx = duet
            .start_exchange(ExchangeId::new("e1"), "hi", Some(vec![]), ExchangeMode::AnswerOnly)
            .await
            .unwrap();

        let err = duet
            .start_exchange(ExchangeId::new("e2"), "hi", Some(vec![]), ExchangeMode::AnswerOnly)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DuetError::Registry(RegistryError::MaxExchangesReached { limit: 1 })
        ));

        duet.cancel_all().await;
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let duet = Duet::new(hanging_backend(), MemoryStore::new(), test_config());
        let id = ExchangeId::new("e1");

        let rx = duet
            .start_exchange(id.clone(), "hi", Some(vec![]), ExchangeMode::AnswerOnly)
            .await
            .unwrap();

        assert!(duet.cancel_exchange(&id).await);
        assert!(!duet.cancel_exchange(&id).await);
        assert!(!duet.cancel_exchange(&ExchangeId::new("missing")).await);

        let snapshots = drain(rx).await;
        assert_eq!(
            snapshots.last().unwrap().exchange_status,
            StreamStatus::Error
        );
        assert_eq!(duet.active_count(), 0);
    }

    #[tokio::test]
    async fn test_resend_runs_fresh_orchestrator() {
        let backend = MockBackend::new()
            .script_for(
                REASONING_MODEL,
                vec![MockBackend::reasoning("hm"), MockBackend::finish_stop()],
            )
            .script_for(
                ANSWER_MODEL,
                vec![MockBackend::content("first run"), MockBackend::finish_stop()],
            )
            .script_for(
                REASONING_MODEL,
                vec![MockBackend::reasoning("hm again"), MockBackend::finish_stop()],
            )
            .script_for(
                ANSWER_MODEL,
                vec![MockBackend::content("second run"), MockBackend::finish_stop()],
            );

        let store = MemoryStore::new();
        let duet = Duet::new(backend, store, test_config());
        let id = ExchangeId::new("e1");

        let rx = duet
            .start_exchange(id.clone(), "hi", Some(vec![]), ExchangeMode::AnswerOnly)
            .await
            .unwrap();
        let first = drain(rx).await;
        assert_eq!(first.last().unwrap().answer, "first run");

        let rx = duet.resend_exchange(&id).await.unwrap();
        let second = drain(rx).await;
        let last = second.last().unwrap();
        assert_eq!(last.answer, "second run");
        // Fresh orchestrator: the first run's content is gone.
        assert_eq!(second.first().unwrap().answer, "");
    }

    #[tokio::test]
    async fn test_resend_unknown_exchange_fails() {
        let duet = Duet::new(quick_backend(), MemoryStore::new(), test_config());
        let err = duet.resend_exchange(&ExchangeId::new("ghost")).await.unwrap_err();
        assert!(matches!(
            err,
            DuetError::Registry(RegistryError::UnknownExchange(_))
        ));
    }

    #[tokio::test]
    async fn test_resend_cancels_live_run_first() {
        let backend = MockBackend::new()
            .script_for(REASONING_MODEL, vec![MockBackend::hang()])
            .script_for(
                REASONING_MODEL,
                vec![MockBackend::reasoning("hm"), MockBackend::finish_stop()],
            )
            .script_for(
                ANSWER_MODEL,
                vec![MockBackend::content("after resend"), MockBackend::finish_stop()],
            );

        let duet = Duet::new(backend, MemoryStore::new(), test_config());
        let id = ExchangeId::new("e1");

        let _rx = duet
            .start_exchange(id.clone(), "hi", Some(vec![]), ExchangeMode::AnswerOnly)
            .await
            .unwrap();

        let rx = duet.resend_exchange(&id).await.unwrap();
        let snapshots = drain(rx).await;
        assert_eq!(snapshots.last().unwrap().answer, "after resend");
        assert_eq!(duet.active_count(), 0);
    }

    #[tokio::test]
    async fn test_forget_exchange() {
        let duet = Duet::new(quick_backend(), MemoryStore::new(), test_config());
        let id = ExchangeId::new("e1");

        let rx = duet
            .start_exchange(id.clone(), "hi", Some(vec![]), ExchangeMode::AnswerOnly)
            .await
            .unwrap();
        drain(rx).await;

        assert!(duet.forget_exchange(&id).await);
        assert!(!duet.forget_exchange(&id).await);
        // Resend has nothing to work from any more.
        assert!(duet.resend_exchange(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_all_reports_count() {
        let backend = MockBackend::new()
            .script_for(REASONING_MODEL, vec![MockBackend::hang()])
            .script_for(REASONING_MODEL, vec![MockBackend::hang()]);
        let duet = Duet::new(backend, MemoryStore::new(), test_config());

        let _rx1 = duet
            .start_exchange(ExchangeId::new("e1"), "a", Some(vec![]), ExchangeMode::AnswerOnly)
            .await
            .unwrap();
        let _rx2 = duet
            .start_exchange(ExchangeId::new("e2"), "b", Some(vec![]), ExchangeMode::AnswerOnly)
            .await
            .unwrap();

        assert_eq!(duet.active_count(), 2);
        assert_eq!(duet.cancel_all().await, 2);
        assert_eq!(duet.active_count(), 0);
        assert_eq!(duet.cancel_all().await, 0);
    }

    #[tokio::test]
    async fn test_health_check_delegates_to_backend() {
        let duet = Duet::new(MockBackend::new(), MemoryStore::new(), test_config());
        assert!(duet.health_check().await);

        let duet = Duet::new(
            MockBackend::new().unhealthy(),
            MemoryStore::new(),
            test_config(),
        );
        assert!(!duet.health_check().await);
    }
}
