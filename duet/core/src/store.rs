//! Message Store Boundary
//!
//! The orchestrator does not own conversation persistence. It reads the
//! history that leads up to an exchange and writes the finalized exchange
//! back out, and nothing else. The [`MessageStore`] trait is that boundary;
//! hosts bring their own implementation (a database, a file, the in-memory
//! store below).
//!
//! Failures here are surfaced but never fail a live stream: a persist
//! error after `Done` is logged, not propagated into the exchange status.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::exchange::{ExchangeId, ExchangeSnapshot};
use crate::protocol::ChatMessage;

/// Conversation history access for the orchestrator
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Read the conversation history leading up to an exchange.
    ///
    /// Returns an empty history for an unknown id; the exchange then runs
    /// as an opening turn.
    async fn history(&self, id: &ExchangeId) -> anyhow::Result<Vec<ChatMessage>>;

    /// Record a finalized exchange.
    ///
    /// Called exactly once per orchestrator run, after the exchange
    /// reaches a terminal status. Replaces any previous record for `id`
    /// (resend overwrites).
    async fn persist(&self, id: &ExchangeId, snapshot: &ExchangeSnapshot) -> anyhow::Result<()>;
}

/// In-memory [`MessageStore`] for tests and embedded use
#[derive(Clone, Default)]
pub struct MemoryStore {
    histories: Arc<RwLock<HashMap<ExchangeId, Vec<ChatMessage>>>>,
    finalized: Arc<RwLock<HashMap<ExchangeId, ExchangeSnapshot>>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the history that [`MessageStore::history`] will return for `id`
    pub fn set_history(&self, id: ExchangeId, history: Vec<ChatMessage>) {
        self.histories.write().insert(id, history);
    }

    /// Get the finalized snapshot for `id`, if one was persisted
    #[must_use]
    pub fn finalized(&self, id: &ExchangeId) -> Option<ExchangeSnapshot> {
        self.finalized.read().get(id).cloned()
    }

    /// Number of finalized exchanges held
    #[must_use]
    pub fn finalized_count(&self) -> usize {
        self.finalized.read().len()
    }

    /// Drop every record for `id` (history and finalized snapshot)
    pub fn remove(&self, id: &ExchangeId) {
        self.histories.write().remove(id);
        self.finalized.write().remove(id);
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn history(&self, id: &ExchangeId) -> anyhow::Result<Vec<ChatMessage>> {
        Ok(self.histories.read().get(id).cloned().unwrap_or_default())
    }

    async fn persist(&self, id: &ExchangeId, snapshot: &ExchangeSnapshot) -> anyhow::Result<()> {
        tracing::debug!(exchange_id = %id, status = ?snapshot.exchange_status, "Persisting exchange");
        self.finalized.write().insert(id.clone(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Exchange, ExchangeMode};

    #[tokio::test]
    async fn test_unknown_id_returns_empty_history() {
        let store = MemoryStore::new();
        let history = store.history(&ExchangeId::from("missing")).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let store = MemoryStore::new();
        let id = ExchangeId::from("exch-1");
        store.set_history(
            id.clone(),
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")],
        );

        let history = store.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test]
    async fn test_persist_replaces_previous_record() {
        let store = MemoryStore::new();
        let id = ExchangeId::from("exch-1");

        let mut exchange = Exchange::new(id.clone(), "question", vec![], ExchangeMode::BothSplit);
        exchange.append_answer("first");
        store.persist(&id, &exchange.snapshot()).await.unwrap();

        exchange.append_answer(" revised");
        store.persist(&id, &exchange.snapshot()).await.unwrap();

        assert_eq!(store.finalized_count(), 1);
        let snapshot = store.finalized(&id).unwrap();
        assert_eq!(snapshot.answer, "first revised");
    }

    #[tokio::test]
    async fn test_remove_clears_both_maps() {
        let store = MemoryStore::new();
        let id = ExchangeId::from("exch-1");
        store.set_history(id.clone(), vec![ChatMessage::user("hi")]);

        let exchange = Exchange::new(id.clone(), "question", vec![], ExchangeMode::AnswerOnly);
        store.persist(&id, &exchange.snapshot()).await.unwrap();

        store.remove(&id);
        assert!(store.history(&id).await.unwrap().is_empty());
        assert!(store.finalized(&id).is_none());
    }
}
