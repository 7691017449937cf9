//! Transfer pipeline
//!
//! Promotes a short-term buffer into a durable memory record. Each
//! attempt walks a fixed state machine:
//!
//! ```text
//! Idle -> Scoring -> (Skipped | Embedding -> DuplicateCheck
//!      -> (Skipped | Persisting -> Done))
//! ```
//!
//! The attempt holds the context's per-key lock from snapshot to
//! outcome, so at most one transfer is ever in flight per context.
//! Idle-timeout triggers give up immediately if the lock is busy;
//! manual triggers wait their turn. A skipped or failed attempt leaves
//! the buffer untouched, so nothing is lost and the caller may retry.

use crate::config::{MemoryAction, SettingsGate};
use crate::decision::{DecisionEngine, MemoryDecision};
use crate::embedding::{EmbeddingGateway, RetryPolicy};
use crate::error::MemoryResult;
use crate::message::{ContextKey, ContextScope, ConversationMessage};
use crate::record::MemoryRecord;
use crate::short_term::ShortTermContextManager;
use crate::store::MemoryStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What initiated a transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferTrigger {
    /// Explicit caller request; waits for the per-key lock and surfaces
    /// persistence failures
    Manual,
    /// Idle-sweep eviction; best-effort, drops if a transfer is already
    /// in flight and abandons on store failure
    IdleTimeout,
}

/// Result of one transfer attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferOutcome {
    /// Nothing was persisted; the buffer is untouched
    Skipped {
        /// Why the attempt was skipped (below threshold, duplicate,
        /// empty buffer, already in flight)
        reasoning: String,
    },
    /// A new memory record was persisted
    Done {
        /// Id of the new record
        record_id: String,
        /// The verdict that approved the save
        decision: MemoryDecision,
    },
}

impl TransferOutcome {
    fn skipped(reasoning: impl Into<String>) -> Self {
        Self::Skipped {
            reasoning: reasoning.into(),
        }
    }

    /// Id of the persisted record, if the attempt completed
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Done { record_id, .. } => Some(record_id),
            Self::Skipped { .. } => None,
        }
    }
}

/// Moves buffered messages into the long-term store
pub struct TransferPipeline {
    gate: SettingsGate,
    short_term: Arc<ShortTermContextManager>,
    decision: Arc<DecisionEngine>,
    embedding: Arc<EmbeddingGateway>,
    store: Arc<dyn MemoryStore>,
    retry: RetryPolicy,
    in_flight: AtomicUsize,
}

impl TransferPipeline {
    /// Wire up a pipeline from its collaborators
    pub fn new(
        gate: SettingsGate,
        short_term: Arc<ShortTermContextManager>,
        decision: Arc<DecisionEngine>,
        embedding: Arc<EmbeddingGateway>,
        store: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            gate,
            short_term,
            decision,
            embedding,
            store,
            retry: RetryPolicy::default(),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Number of transfer attempts currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Run one transfer attempt for a context
    pub async fn transfer(
        &self,
        key: &ContextKey,
        trigger: TransferTrigger,
    ) -> MemoryResult<TransferOutcome> {
        self.gate.check(MemoryAction::Save, Some(&key.id))?;

        let Some(handle) = self.short_term.handle(key) else {
            return Ok(TransferOutcome::skipped("no such context"));
        };

        // Per-key exclusivity: manual triggers queue, idle triggers drop
        let state = match trigger {
            TransferTrigger::Manual => handle.lock().await,
            TransferTrigger::IdleTimeout => match handle.try_lock() {
                Ok(state) => state,
                Err(_) => {
                    debug!(key = %key, "transfer already in flight, dropping idle trigger");
                    return Ok(TransferOutcome::skipped("transfer already in flight"));
                }
            },
        };

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = self
            .run_attempt(key, trigger, state.messages.iter().cloned().collect())
            .await;
        self.in_flight.fetch_sub(1, Ordering::Relaxed);

        // The lock is held until here; the buffer was never mutated
        drop(state);
        result
    }

    async fn run_attempt(
        &self,
        key: &ContextKey,
        trigger: TransferTrigger,
        snapshot: Vec<ConversationMessage>,
    ) -> MemoryResult<TransferOutcome> {
        if snapshot.is_empty() {
            return Ok(TransferOutcome::skipped("buffer is empty"));
        }

        // Scoring
        debug!(key = %key, messages = snapshot.len(), "scoring buffer for transfer");
        let decision = self.decision.score(&snapshot);
        if !decision.should_save {
            debug!(key = %key, reasoning = %decision.reasoning, "transfer skipped by decision engine");
            return Ok(TransferOutcome::skipped(decision.reasoning));
        }

        // Embedding (degrades to deterministic fallback internally)
        let content = render_content(&snapshot);
        let embedding = self.embedding.embed(&content).await?;

        // Duplicate check
        let owner_user = owner_user_of(key);
        if let Some(duplicate) = self
            .decision
            .find_duplicate_of(&embedding, self.store.as_ref(), owner_user)
            .await?
        {
            return Ok(TransferOutcome::skipped(format!(
                "duplicate of memory {} (similarity {:.2})",
                duplicate.record.id, duplicate.similarity
            )));
        }

        // Persisting
        let record = self.build_record(key, &snapshot, &decision, content, embedding);
        let record_id = match trigger {
            TransferTrigger::Manual => self.insert_with_retry(record).await?,
            TransferTrigger::IdleTimeout => match self.store.insert(record).await {
                Ok(id) => id,
                Err(err) if err.is_transient() => {
                    // Context is about to be evicted anyway; abandon
                    warn!(key = %key, error = %err, "abandoning idle-timeout transfer, store unavailable");
                    return Ok(TransferOutcome::skipped("store unavailable"));
                }
                Err(err) => return Err(err),
            },
        };

        info!(
            key = %key,
            record_id = %record_id,
            importance = decision.importance,
            category = %decision.category,
            "transferred buffer to long-term memory"
        );
        Ok(TransferOutcome::Done {
            record_id,
            decision,
        })
    }

    fn build_record(
        &self,
        key: &ContextKey,
        snapshot: &[ConversationMessage],
        decision: &MemoryDecision,
        content: String,
        embedding: crate::embedding::Embedding,
    ) -> MemoryRecord {
        let mut record = MemoryRecord::new(content, embedding)
            .with_importance(decision.importance.max(1))
            .with_category(&decision.category)
            .with_tags(decision.topics.iter().cloned())
            .with_metadata(
                "facts",
                serde_json::json!(decision.facts),
            )
            .with_metadata("sentiment", serde_json::json!(decision.sentiment))
            .with_metadata("message_count", serde_json::json!(snapshot.len()))
            .with_metadata("source_context", serde_json::json!(key.to_string()));

        match key.scope {
            ContextScope::User => record = record.with_owner_user(&key.id),
            ContextScope::Channel => {
                record = record.with_metadata("channel_id", serde_json::json!(key.id));
            }
        }

        record
    }

    async fn insert_with_retry(&self, record: MemoryRecord) -> MemoryResult<String> {
        let mut attempt = 0;
        loop {
            match self.store.insert(record.clone()).await {
                Ok(id) => return Ok(id),
                Err(err) if err.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "store insert failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Flatten a window into the stored content text
fn render_content(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(|m| m.text().trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn owner_user_of(key: &ContextKey) -> Option<&str> {
    match key.scope {
        ContextScope::User => Some(&key.id),
        ContextScope::Channel => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineSettings, Permissions};
    use crate::embedding::HashEmbeddingProvider;
    use crate::error::MemoryError;
    use crate::store::{CountFilter, InMemoryMemoryStore};

    const DIMS: usize = 32;

    fn pipeline_with(settings: EngineSettings) -> (Arc<TransferPipeline>, Arc<ShortTermContextManager>, Arc<InMemoryMemoryStore>) {
        let gate = SettingsGate::new(settings).unwrap();
        let short_term = Arc::new(ShortTermContextManager::new(gate.clone()));
        let gateway = Arc::new(EmbeddingGateway::new(Arc::new(HashEmbeddingProvider::new(
            DIMS,
        ))));
        let decision = Arc::new(DecisionEngine::new(gate.clone(), gateway.clone()));
        let store = Arc::new(InMemoryMemoryStore::new(DIMS));
        let pipeline = Arc::new(TransferPipeline::new(
            gate,
            short_term.clone(),
            decision,
            gateway,
            store.clone(),
        ));
        (pipeline, short_term, store)
    }

    fn pipeline() -> (Arc<TransferPipeline>, Arc<ShortTermContextManager>, Arc<InMemoryMemoryStore>) {
        pipeline_with(EngineSettings::default().with_decision_threshold(4))
    }

    async fn fill(short_term: &ShortTermContextManager, key: &ContextKey, texts: &[&str]) {
        for text in texts {
            short_term
                .append(key, ConversationMessage::user(&key.id, "chan-1", *text))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_transfer_persists_worthy_buffer() {
        let (pipeline, short_term, store) = pipeline();
        let key = ContextKey::user("alice");
        fill(&short_term, &key, &["I prefer dark mode in every editor"]).await;

        let outcome = pipeline.transfer(&key, TransferTrigger::Manual).await.unwrap();

        let record_id = outcome.record_id().expect("should persist").to_string();
        let record = store.get(&record_id).await.unwrap().unwrap();
        assert_eq!(record.category, "user_preference");
        assert_eq!(record.owner_user_id.as_deref(), Some("alice"));
        assert!(record.importance >= 1);
    }

    #[tokio::test]
    async fn test_transfer_skips_unworthy_buffer() {
        let (pipeline, short_term, store) = pipeline();
        let key = ContextKey::user("alice");
        fill(&short_term, &key, &["ok"]).await;

        let outcome = pipeline.transfer(&key, TransferTrigger::Manual).await.unwrap();

        assert!(matches!(outcome, TransferOutcome::Skipped { .. }));
        assert_eq!(store.count(&CountFilter::default()).await.unwrap(), 0);
        // Buffer untouched on skip
        assert_eq!(short_term.buffered_messages(), 1);
    }

    #[tokio::test]
    async fn test_transfer_empty_context_skips() {
        let (pipeline, _short_term, _store) = pipeline();
        let key = ContextKey::user("nobody");

        let outcome = pipeline.transfer(&key, TransferTrigger::Manual).await.unwrap();
        assert!(matches!(outcome, TransferOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_second_transfer_of_same_content_is_duplicate() {
        let (pipeline, short_term, store) = pipeline();
        let key = ContextKey::user("alice");
        fill(&short_term, &key, &["I prefer dark mode in every editor"]).await;

        let first = pipeline.transfer(&key, TransferTrigger::Manual).await.unwrap();
        assert!(first.record_id().is_some());

        // Buffer was not cleared; an identical second attempt embeds to
        // the same vector and is suppressed as a duplicate
        let second = pipeline.transfer(&key, TransferTrigger::Manual).await.unwrap();
        match second {
            TransferOutcome::Skipped { reasoning } => {
                assert!(reasoning.contains("duplicate"), "got: {}", reasoning);
            }
            TransferOutcome::Done { .. } => panic!("duplicate content must not persist twice"),
        }

        assert_eq!(store.count(&CountFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_manual_transfers_persist_once() {
        let (pipeline, short_term, store) = pipeline();
        let key = ContextKey::user("alice");
        fill(&short_term, &key, &["I prefer dark mode in every editor"]).await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pipeline = pipeline.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                pipeline.transfer(&key, TransferTrigger::Manual).await
            }));
        }

        let mut persisted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().record_id().is_some() {
                persisted += 1;
            }
        }

        assert_eq!(persisted, 1);
        assert_eq!(store.count(&CountFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transfer_denied_without_save_permission() {
        let (pipeline, short_term, store) = pipeline_with(
            EngineSettings::default()
                .with_decision_threshold(4)
                .with_permissions(Permissions {
                    allow_save: false,
                    ..Permissions::default()
                }),
        );
        let key = ContextKey::user("alice");
        fill(&short_term, &key, &["I prefer dark mode in every editor"]).await;

        let result = pipeline.transfer(&key, TransferTrigger::Manual).await;
        assert!(matches!(result, Err(MemoryError::NotPermitted { .. })));
        assert_eq!(store.count(&CountFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_owner_bypasses_save_permission() {
        let (pipeline, short_term, _store) = pipeline_with(
            EngineSettings::default()
                .with_decision_threshold(4)
                .with_permissions(Permissions::deny_all())
                .with_owner("alice"),
        );
        let key = ContextKey::user("alice");
        fill(&short_term, &key, &["I prefer dark mode in every editor"]).await;

        let outcome = pipeline.transfer(&key, TransferTrigger::Manual).await.unwrap();
        assert!(outcome.record_id().is_some());
    }

    #[tokio::test]
    async fn test_channel_scope_records_have_no_user_owner() {
        let (pipeline, short_term, store) = pipeline();
        let key = ContextKey::channel("chan-9");
        fill(
            &short_term,
            &key,
            &["We decided to go with Postgres for the storage layer"],
        )
        .await;

        let outcome = pipeline.transfer(&key, TransferTrigger::Manual).await.unwrap();
        let record = store
            .get(outcome.record_id().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(record.owner_user_id.is_none());
        assert_eq!(record.metadata["channel_id"], serde_json::json!("chan-9"));
    }

    /// Store that always reports a transient outage
    struct DownStore {
        inner: InMemoryMemoryStore,
    }

    #[async_trait::async_trait]
    impl MemoryStore for DownStore {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
        async fn insert(&self, _record: MemoryRecord) -> MemoryResult<String> {
            Err(MemoryError::store_unavailable("insert"))
        }
        async fn get(&self, id: &str) -> MemoryResult<Option<MemoryRecord>> {
            self.inner.get(id).await
        }
        async fn update_metadata(
            &self,
            id: &str,
            patch: &crate::record::RecordPatch,
        ) -> MemoryResult<()> {
            self.inner.update_metadata(id, patch).await
        }
        async fn delete(&self, id: &str) -> MemoryResult<bool> {
            self.inner.delete(id).await
        }
        async fn find_similar(
            &self,
            query: &crate::embedding::Embedding,
            options: &crate::store::SimilarityQuery,
        ) -> MemoryResult<Vec<crate::store::SimilarityMatch>> {
            self.inner.find_similar(query, options).await
        }
        async fn count(&self, filter: &CountFilter) -> MemoryResult<usize> {
            self.inner.count(filter).await
        }
        async fn consolidate(&self, winner: &str, losers: &[String]) -> MemoryResult<()> {
            self.inner.consolidate(winner, losers).await
        }
    }

    fn pipeline_with_store(
        store: Arc<dyn MemoryStore>,
    ) -> (Arc<TransferPipeline>, Arc<ShortTermContextManager>) {
        let gate = SettingsGate::new(EngineSettings::default().with_decision_threshold(4)).unwrap();
        let short_term = Arc::new(ShortTermContextManager::new(gate.clone()));
        let gateway = Arc::new(EmbeddingGateway::new(Arc::new(HashEmbeddingProvider::new(
            DIMS,
        ))));
        let decision = Arc::new(DecisionEngine::new(gate.clone(), gateway.clone()));
        let pipeline = Arc::new(TransferPipeline::new(
            gate,
            short_term.clone(),
            decision,
            gateway,
            store,
        ));
        (pipeline, short_term)
    }

    #[tokio::test]
    async fn test_manual_transfer_surfaces_store_failure_and_keeps_buffer() {
        let store = Arc::new(DownStore {
            inner: InMemoryMemoryStore::new(DIMS),
        });
        let (pipeline, short_term) = pipeline_with_store(store);
        let key = ContextKey::user("alice");
        fill(&short_term, &key, &["I prefer dark mode in every editor"]).await;

        let result = pipeline.transfer(&key, TransferTrigger::Manual).await;
        assert!(matches!(result, Err(MemoryError::StoreUnavailable { .. })));

        // Data is not lost; the caller may retry
        assert_eq!(short_term.buffered_messages(), 1);
    }

    #[tokio::test]
    async fn test_idle_transfer_abandons_on_store_failure() {
        let store = Arc::new(DownStore {
            inner: InMemoryMemoryStore::new(DIMS),
        });
        let (pipeline, short_term) = pipeline_with_store(store);
        let key = ContextKey::user("alice");
        fill(&short_term, &key, &["I prefer dark mode in every editor"]).await;

        // Best-effort path: no error, just a logged skip
        let outcome = pipeline
            .transfer(&key, TransferTrigger::IdleTimeout)
            .await
            .unwrap();
        assert!(matches!(outcome, TransferOutcome::Skipped { .. }));
    }
}
