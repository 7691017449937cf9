//! Engine facade
//!
//! [`MemoryEngine`] wires the short-term buffers, decision engine,
//! transfer pipeline, long-term store, and relationship graph behind one
//! surface. Construction is explicit via [`MemoryEngineBuilder`], with
//! every backend injectable; there is no global instance. `init` spawns
//! the background idle sweep and `shutdown` stops it after one final
//! best-effort pass.

use crate::config::{EngineSettings, MemoryAction, SettingsGate};
use crate::decision::DecisionEngine;
use crate::embedding::{EmbeddingGateway, EmbeddingProvider, HashEmbeddingProvider};
use crate::error::{MemoryError, MemoryResult};
use crate::message::{ContextKey, ConversationMessage};
use crate::record::MemoryRecord;
use crate::relationship::{
    ConnectionSuggestion, InMemoryRelationshipStore, MemoryRelationship, RelatedMemory,
    RelatedQuery, RelationshipMapper, RelationshipStore, RelationshipType,
};
use crate::short_term::{HistoryOptions, HistorySource, ShortTermContextManager};
use crate::store::{CountFilter, InMemoryMemoryStore, MemoryStore, SimilarityMatch, SimilarityQuery};
use crate::transfer::{TransferOutcome, TransferPipeline, TransferTrigger};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_DIMENSIONS: usize = 384;

/// Explicit save request
#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
    /// Content to remember
    pub content: String,

    /// Importance override; scored from the content when absent
    pub importance: Option<u8>,

    /// Category override; categorized from the content when absent
    pub category: Option<String>,

    /// Tags for filtered retrieval
    pub tags: Vec<String>,

    /// Owning user, if user-scoped
    pub owner_user_id: Option<String>,

    /// Identity attempting the save, for the permission gate
    pub requester: Option<String>,
}

impl SaveRequest {
    /// Request saving the given content
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Override the importance rating
    pub fn with_importance(mut self, importance: u8) -> Self {
        self.importance = Some(importance);
        self
    }

    /// Override the category label
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Attach tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Scope to a user
    pub fn with_owner_user(mut self, user_id: impl Into<String>) -> Self {
        self.owner_user_id = Some(user_id.into());
        self
    }

    /// Set the requesting identity
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }
}

/// Result of an explicit save
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SaveOutcome {
    /// A new record was persisted
    Saved {
        /// Id of the new record
        record_id: String,
    },
    /// An existing record already covers this content
    Duplicate {
        /// Id of the existing record
        existing_id: String,
        /// Similarity that tripped the duplicate check
        similarity: f32,
    },
}

impl SaveOutcome {
    /// Id of the newly persisted record, if any
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Saved { record_id } => Some(record_id),
            Self::Duplicate { .. } => None,
        }
    }
}

/// Point-in-time engine counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    /// Live short-term contexts
    pub active_contexts: usize,

    /// Messages across all short-term buffers
    pub buffered_messages: usize,

    /// Transfer attempts currently running
    pub in_flight_transfers: usize,

    /// Durable records (consolidated ones excluded)
    pub memory_count: usize,

    /// Edges in the relationship graph
    pub relationship_count: usize,
}

/// Builder for [`MemoryEngine`]
#[derive(Default)]
pub struct MemoryEngineBuilder {
    settings: EngineSettings,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    store: Option<Arc<dyn MemoryStore>>,
    relationships: Option<Arc<dyn RelationshipStore>>,
    history: Option<Arc<dyn HistorySource>>,
}

impl MemoryEngineBuilder {
    /// Start from default settings and in-memory backends
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine settings
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Inject an embedding provider
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Inject a long-term store
    pub fn with_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Inject a relationship store
    pub fn with_relationship_store(mut self, store: Arc<dyn RelationshipStore>) -> Self {
        self.relationships = Some(store);
        self
    }

    /// Inject a platform history source for context seeding
    pub fn with_history_source(mut self, history: Arc<dyn HistorySource>) -> Self {
        self.history = Some(history);
        self
    }

    /// Assemble the engine
    pub fn build(self) -> MemoryResult<MemoryEngine> {
        let gate = SettingsGate::new(self.settings)?;

        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(HashEmbeddingProvider::new(DEFAULT_DIMENSIONS)));
        let embedding = Arc::new(EmbeddingGateway::new(provider));

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryMemoryStore::new(embedding.dimensions())));
        if store.dimensions() != embedding.dimensions() {
            return Err(MemoryError::DimensionMismatch {
                expected: store.dimensions(),
                actual: embedding.dimensions(),
            });
        }

        let relationships = self
            .relationships
            .unwrap_or_else(|| Arc::new(InMemoryRelationshipStore::new()));

        let short_term = Arc::new(match self.history {
            Some(history) => ShortTermContextManager::with_history(gate.clone(), history),
            None => ShortTermContextManager::new(gate.clone()),
        });

        let decision = Arc::new(DecisionEngine::new(gate.clone(), embedding.clone()));
        let pipeline = Arc::new(TransferPipeline::new(
            gate.clone(),
            short_term.clone(),
            decision.clone(),
            embedding.clone(),
            store.clone(),
        ));
        let mapper = RelationshipMapper::new(gate.clone(), relationships.clone(), store.clone());

        Ok(MemoryEngine {
            gate,
            short_term,
            decision,
            embedding,
            store,
            relationships,
            pipeline,
            mapper,
            sweep_task: parking_lot::Mutex::new(None),
        })
    }
}

/// The memory lifecycle engine
pub struct MemoryEngine {
    gate: SettingsGate,
    short_term: Arc<ShortTermContextManager>,
    decision: Arc<DecisionEngine>,
    embedding: Arc<EmbeddingGateway>,
    store: Arc<dyn MemoryStore>,
    relationships: Arc<dyn RelationshipStore>,
    pipeline: Arc<TransferPipeline>,
    mapper: RelationshipMapper,
    sweep_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MemoryEngine {
    /// Builder entry point
    pub fn builder() -> MemoryEngineBuilder {
        MemoryEngineBuilder::new()
    }

    /// Start the background idle sweep
    pub fn init(&self) {
        let mut guard = self.sweep_task.lock();
        if guard.is_some() {
            return;
        }

        let gate = self.gate.clone();
        let short_term = self.short_term.clone();
        let pipeline = self.pipeline.clone();
        let handle = tokio::spawn(async move {
            loop {
                // Re-read each cycle so live settings updates apply
                let interval = gate.snapshot().sweep_interval;
                tokio::time::sleep(interval).await;
                run_sweep(&gate, &short_term, &pipeline).await;
            }
        });
        *guard = Some(handle);
        info!("memory engine sweep started");
    }

    /// Stop the sweep after one final best-effort pass
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweep_task.lock().take() {
            handle.abort();
        }
        self.sweep_once().await;
        info!("memory engine shut down");
    }

    /// One idle-eviction pass over the short-term contexts
    pub async fn sweep_once(&self) {
        run_sweep(&self.gate, &self.short_term, &self.pipeline).await;
    }

    /// Buffer a conversation message
    pub async fn append(&self, key: &ContextKey, message: ConversationMessage) -> MemoryResult<()> {
        self.short_term.append(key, message).await
    }

    /// Snapshot of a context's buffered messages
    pub async fn get_history(
        &self,
        key: &ContextKey,
        options: &HistoryOptions,
    ) -> Vec<ConversationMessage> {
        self.short_term.get_history(key, options).await
    }

    /// Drop a context, optionally promoting its content first
    pub async fn clear(
        &self,
        key: &ContextKey,
        transfer_first: bool,
    ) -> MemoryResult<Vec<ConversationMessage>> {
        if transfer_first {
            // A skip is fine; an error still clears nothing
            self.pipeline.transfer(key, TransferTrigger::Manual).await?;
        }
        Ok(self.short_term.clear(key).await)
    }

    /// Explicitly run the transfer pipeline for a context
    pub async fn transfer(&self, key: &ContextKey) -> MemoryResult<TransferOutcome> {
        self.pipeline.transfer(key, TransferTrigger::Manual).await
    }

    /// Persist content directly, bypassing the worthiness threshold
    ///
    /// The duplicate check still applies: content already covered by an
    /// existing record reports [`SaveOutcome::Duplicate`] instead of
    /// writing a second copy.
    pub async fn save(&self, request: SaveRequest) -> MemoryResult<SaveOutcome> {
        self.gate
            .check(MemoryAction::Save, request.requester.as_deref())?;

        if request.content.trim().is_empty() {
            return Err(MemoryError::validation(
                "content",
                "non-empty text",
                "empty string",
            ));
        }

        let embedding = self.embedding.embed(&request.content).await?;
        if let Some(existing) = self
            .decision
            .find_duplicate_of(&embedding, self.store.as_ref(), request.owner_user_id.as_deref())
            .await?
        {
            return Ok(SaveOutcome::Duplicate {
                existing_id: existing.record.id,
                similarity: existing.similarity,
            });
        }

        // Fill importance and category from the scorer when not given
        let scored = match (&request.importance, &request.category) {
            (Some(_), Some(_)) => None,
            _ => {
                let synthetic = vec![ConversationMessage::user(
                    request.owner_user_id.as_deref().unwrap_or("unknown"),
                    "direct",
                    request.content.as_str(),
                )];
                Some(self.decision.score(&synthetic))
            }
        };

        let importance = request
            .importance
            .or_else(|| scored.as_ref().map(|d| d.importance.max(1)))
            .unwrap_or(5);
        let category = request
            .category
            .or_else(|| scored.as_ref().map(|d| d.category.clone()))
            .unwrap_or_else(|| "context".to_string());

        let mut record = MemoryRecord::new(request.content, embedding)
            .with_importance(importance)
            .with_category(category)
            .with_tags(request.tags);
        if let Some(owner) = request.owner_user_id {
            record = record.with_owner_user(owner);
        }

        let record_id = self.store.insert(record).await?;
        info!(record_id = %record_id, "saved memory directly");
        Ok(SaveOutcome::Saved { record_id })
    }

    /// Similarity search over long-term memory
    ///
    /// A query without an explicit similarity floor uses the configured
    /// `relevance_threshold`.
    pub async fn find_similar(
        &self,
        text: &str,
        mut query: SimilarityQuery,
        requester: Option<&str>,
    ) -> MemoryResult<Vec<SimilarityMatch>> {
        self.gate.check(MemoryAction::Search, requester)?;

        if query.min_similarity.is_none() {
            query.min_similarity = Some(self.gate.snapshot().relevance_threshold);
        }

        let embedding = self.embedding.embed(text).await?;
        self.store.find_similar(&embedding, &query).await
    }

    /// Hard-delete a record
    pub async fn delete(&self, id: &str, requester: Option<&str>) -> MemoryResult<bool> {
        self.gate.check(MemoryAction::Delete, requester)?;
        let existed = self.store.delete(id).await?;
        if existed {
            info!(record_id = %id, "deleted memory record");
        }
        Ok(existed)
    }

    /// Merge duplicate records, soft-marking the losers
    pub async fn consolidate(
        &self,
        winner: &str,
        losers: &[String],
        requester: Option<&str>,
    ) -> MemoryResult<()> {
        self.gate.check(MemoryAction::Consolidate, requester)?;
        self.store.consolidate(winner, losers).await
    }

    /// Create or refresh a relationship edge
    pub async fn create_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relationship_type: RelationshipType,
        strength: f32,
        reasoning: Option<&str>,
        requester: Option<&str>,
    ) -> MemoryResult<MemoryRelationship> {
        self.mapper
            .create_relationship(
                source_id,
                target_id,
                relationship_type,
                strength,
                reasoning,
                requester,
            )
            .await
    }

    /// Memories connected to the given one
    pub async fn find_related(
        &self,
        memory_id: &str,
        query: &RelatedQuery,
        requester: Option<&str>,
    ) -> MemoryResult<Vec<RelatedMemory>> {
        self.mapper.find_related(memory_id, query, requester).await
    }

    /// Propose edges to similar but unconnected memories
    pub async fn suggest_connections(
        &self,
        memory_id: &str,
        max_suggestions: usize,
        requester: Option<&str>,
    ) -> MemoryResult<Vec<ConnectionSuggestion>> {
        self.mapper
            .suggest_connections(memory_id, max_suggestions, requester)
            .await
    }

    /// Apply a settings mutation atomically
    pub fn update_settings<F>(&self, mutate: F) -> MemoryResult<()>
    where
        F: FnOnce(&mut EngineSettings),
    {
        self.gate.update(mutate)
    }

    /// Current settings snapshot
    pub fn settings(&self) -> Arc<EngineSettings> {
        self.gate.snapshot()
    }

    /// Point-in-time counters
    pub async fn get_stats(&self, requester: Option<&str>) -> MemoryResult<EngineStats> {
        self.gate.check(MemoryAction::Analytics, requester)?;

        Ok(EngineStats {
            active_contexts: self.short_term.active_contexts(),
            buffered_messages: self.short_term.buffered_messages(),
            in_flight_transfers: self.pipeline.in_flight(),
            memory_count: self.store.count(&CountFilter::default()).await?,
            relationship_count: self.relationships.count().await?,
        })
    }
}

/// Evict contexts idle past the session timeout, transferring first when
/// automatic transfer is enabled
async fn run_sweep(
    gate: &SettingsGate,
    short_term: &ShortTermContextManager,
    pipeline: &TransferPipeline,
) {
    let settings = gate.snapshot();
    let idle = short_term.idle_keys(settings.session_timeout);
    if idle.is_empty() {
        return;
    }

    debug!(contexts = idle.len(), "sweeping idle contexts");
    for key in idle {
        if settings.auto_transfer {
            match pipeline.transfer(&key, TransferTrigger::IdleTimeout).await {
                Ok(TransferOutcome::Done { record_id, .. }) => {
                    debug!(key = %key, record_id = %record_id, "idle context transferred");
                }
                Ok(TransferOutcome::Skipped { reasoning }) => {
                    debug!(key = %key, reasoning = %reasoning, "idle transfer skipped");
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "idle transfer failed, evicting anyway");
                }
            }
        }
        // Idleness is re-checked under the context's own lock: a message
        // appended since the idle snapshot keeps the context alive
        if short_term
            .evict_if_idle(&key, settings.session_timeout)
            .await
            .is_none()
        {
            debug!(key = %key, "context active again, keeping it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Permissions;
    use std::time::Duration;

    fn engine() -> MemoryEngine {
        MemoryEngine::builder()
            .with_settings(EngineSettings::default().with_decision_threshold(4))
            .build()
            .unwrap()
    }

    fn msg(author: &str, text: &str) -> ConversationMessage {
        ConversationMessage::user(author, "chan-1", text)
    }

    #[tokio::test]
    async fn test_append_transfer_retrieve_roundtrip() {
        let engine = engine();
        let key = ContextKey::user("alice");

        engine
            .append(&key, msg("alice", "I prefer dark mode in every editor"))
            .await
            .unwrap();

        let outcome = engine.transfer(&key).await.unwrap();
        assert!(outcome.record_id().is_some());

        let matches = engine
            .find_similar(
                "I prefer dark mode in every editor",
                SimilarityQuery::top_k(5),
                None,
            )
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].record.category, "user_preference");
    }

    #[tokio::test]
    async fn test_clear_with_transfer_first() {
        let engine = engine();
        let key = ContextKey::user("alice");

        engine
            .append(&key, msg("alice", "We decided to use Postgres for storage"))
            .await
            .unwrap();

        let drained = engine.clear(&key, true).await.unwrap();
        assert_eq!(drained.len(), 1);

        let stats = engine.get_stats(None).await.unwrap();
        assert_eq!(stats.active_contexts, 0);
        assert_eq!(stats.memory_count, 1);
    }

    #[tokio::test]
    async fn test_direct_save_and_duplicate_suppression() {
        let engine = engine();

        let first = engine
            .save(SaveRequest::new("My name is Alice").with_owner_user("alice"))
            .await
            .unwrap();
        let record_id = first.record_id().expect("first save persists").to_string();

        let second = engine
            .save(SaveRequest::new("My name is Alice").with_owner_user("alice"))
            .await
            .unwrap();
        match second {
            SaveOutcome::Duplicate { existing_id, .. } => assert_eq!(existing_id, record_id),
            SaveOutcome::Saved { .. } => panic!("duplicate save must be suppressed"),
        }

        let stats = engine.get_stats(None).await.unwrap();
        assert_eq!(stats.memory_count, 1);
    }

    #[tokio::test]
    async fn test_save_scores_missing_attributes() {
        let engine = engine();

        let outcome = engine
            .save(SaveRequest::new("I prefer tabs over spaces"))
            .await
            .unwrap();
        let id = outcome.record_id().unwrap().to_string();

        let matches = engine
            .find_similar("I prefer tabs over spaces", SimilarityQuery::top_k(1), None)
            .await
            .unwrap();
        assert_eq!(matches[0].record.id, id);
        assert_eq!(matches[0].record.category, "user_preference");
    }

    #[tokio::test]
    async fn test_delete_denied_by_default() {
        let engine = engine();

        let outcome = engine
            .save(SaveRequest::new("My name is Alice"))
            .await
            .unwrap();
        let id = outcome.record_id().unwrap().to_string();

        // Default permissions do not allow deletes
        let result = engine.delete(&id, Some("random-user")).await;
        assert!(matches!(result, Err(MemoryError::NotPermitted { .. })));

        // No side effect
        let stats = engine.get_stats(None).await.unwrap();
        assert_eq!(stats.memory_count, 1);
    }

    #[tokio::test]
    async fn test_owner_can_delete() {
        let engine = MemoryEngine::builder()
            .with_settings(
                EngineSettings::default()
                    .with_decision_threshold(4)
                    .with_owner("admin"),
            )
            .build()
            .unwrap();

        let outcome = engine
            .save(SaveRequest::new("My name is Alice").with_requester("admin"))
            .await
            .unwrap();
        let id = outcome.record_id().unwrap().to_string();

        assert!(engine.delete(&id, Some("admin")).await.unwrap());
    }

    #[tokio::test]
    async fn test_relationships_through_facade() {
        let engine = engine();

        let a = engine
            .save(SaveRequest::new("We decided to use Postgres"))
            .await
            .unwrap();
        let b = engine
            .save(SaveRequest::new("My name is Alice"))
            .await
            .unwrap();
        let a = a.record_id().unwrap().to_string();
        let b = b.record_id().unwrap().to_string();

        engine
            .create_relationship(&a, &b, RelationshipType::Similar, 0.7, None, None)
            .await
            .unwrap();

        let related = engine
            .find_related(&a, &RelatedQuery::default(), None)
            .await
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].memory_id, b);

        let stats = engine.get_stats(None).await.unwrap();
        assert_eq!(stats.relationship_count, 1);
    }

    #[tokio::test]
    async fn test_live_settings_update() {
        let engine = engine();

        engine
            .update_settings(|s| s.decision_threshold = 10)
            .unwrap();
        assert_eq!(engine.settings().decision_threshold, 10);

        // The raised threshold now rejects content that would have saved
        let key = ContextKey::user("alice");
        engine
            .append(&key, msg("alice", "I prefer dark mode in every editor"))
            .await
            .unwrap();
        let outcome = engine.transfer(&key).await.unwrap();
        assert!(matches!(outcome, TransferOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_analytics_denied_without_permission() {
        let engine = MemoryEngine::builder()
            .with_settings(
                EngineSettings::default().with_permissions(Permissions {
                    allow_analytics: false,
                    ..Permissions::default()
                }),
            )
            .build()
            .unwrap();

        let result = engine.get_stats(Some("user-1")).await;
        assert!(matches!(result, Err(MemoryError::NotPermitted { .. })));
    }

    struct SlowStore {
        inner: InMemoryMemoryStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl MemoryStore for SlowStore {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
        async fn insert(&self, record: MemoryRecord) -> MemoryResult<String> {
            tokio::time::sleep(self.delay).await;
            self.inner.insert(record).await
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
            options: &SimilarityQuery,
        ) -> MemoryResult<Vec<SimilarityMatch>> {
            self.inner.find_similar(query, options).await
        }
        async fn count(&self, filter: &CountFilter) -> MemoryResult<usize> {
            self.inner.count(filter).await
        }
        async fn consolidate(&self, winner: &str, losers: &[String]) -> MemoryResult<()> {
            self.inner.consolidate(winner, losers).await
        }
    }

    #[tokio::test]
    async fn test_append_during_sweep_is_not_destroyed() {
        let store = Arc::new(SlowStore {
            inner: InMemoryMemoryStore::new(DEFAULT_DIMENSIONS),
            delay: Duration::from_millis(200),
        });
        let engine = Arc::new(
            MemoryEngine::builder()
                .with_settings(
                    EngineSettings::default()
                        .with_decision_threshold(4)
                        .with_session_timeout(Duration::from_millis(20)),
                )
                .with_store(store)
                .build()
                .unwrap(),
        );

        let key = ContextKey::user("alice");
        engine
            .append(&key, msg("alice", "I prefer dark mode in every editor"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Sweep stalls inside the slow store insert while holding the
        // context lock; a message arriving meanwhile queues behind it
        let sweeper = engine.clone();
        let sweep = tokio::spawn(async move { sweeper.sweep_once().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine
            .append(&key, msg("alice", "and I always use vim bindings"))
            .await
            .unwrap();
        sweep.await.unwrap();

        // The late message kept the context alive instead of being
        // drained into nowhere
        let history = engine.get_history(&key, &HistoryOptions::default()).await;
        let texts: Vec<&str> = history.iter().map(|m| m.text()).collect();
        assert!(texts.contains(&"and I always use vim bindings"));

        let stats = engine.get_stats(None).await.unwrap();
        assert_eq!(stats.memory_count, 1);
        assert_eq!(stats.active_contexts, 1);
    }

    struct FixedProvider;

    #[async_trait::async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed(&self, text: &str) -> MemoryResult<crate::embedding::Embedding> {
            let vector = if text.contains("east") {
                vec![0.0, 1.0]
            } else {
                vec![1.0, 0.0]
            };
            Ok(crate::embedding::Embedding::new(vector, "fixed"))
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_explicit_zero_similarity_floor_is_honored() {
        let engine = MemoryEngine::builder()
            .with_settings(EngineSettings::default())
            .with_embedding_provider(Arc::new(FixedProvider))
            .build()
            .unwrap();

        engine
            .save(SaveRequest::new("the north road is closed"))
            .await
            .unwrap();

        // Unset floor falls back to the relevance threshold, which an
        // orthogonal match cannot clear
        let defaulted = engine
            .find_similar("east gate", SimilarityQuery::top_k(10), None)
            .await
            .unwrap();
        assert!(defaulted.is_empty());

        // An explicit zero floor admits the orthogonal match
        let zero_floor = engine
            .find_similar(
                "east gate",
                SimilarityQuery::top_k(10).min_similarity(0.0),
                None,
            )
            .await
            .unwrap();
        assert_eq!(zero_floor.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_transfers_and_evicts_idle_contexts() {
        let engine = Arc::new(
            MemoryEngine::builder()
                .with_settings(
                    EngineSettings::default()
                        .with_decision_threshold(4)
                        .with_session_timeout(Duration::from_millis(20))
                        .with_sweep_interval(Duration::from_millis(10)),
                )
                .build()
                .unwrap(),
        );
        engine.init();

        let key = ContextKey::user("alice");
        engine
            .append(&key, msg("alice", "I prefer dark mode in every editor"))
            .await
            .unwrap();

        // Wait for the context to go idle and at least one sweep to run
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stats = engine.get_stats(None).await.unwrap();
        assert_eq!(stats.active_contexts, 0);
        assert_eq!(stats.memory_count, 1);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_respects_tool_driven_mode() {
        let engine = Arc::new(
            MemoryEngine::builder()
                .with_settings(
                    EngineSettings::default()
                        .with_decision_threshold(4)
                        .with_session_timeout(Duration::from_millis(20))
                        .with_sweep_interval(Duration::from_millis(10))
                        .tool_driven(),
                )
                .build()
                .unwrap(),
        );
        engine.init();

        let key = ContextKey::user("alice");
        engine
            .append(&key, msg("alice", "I prefer dark mode in every editor"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        // Evicted without transferring
        let stats = engine.get_stats(None).await.unwrap();
        assert_eq!(stats.active_contexts, 0);
        assert_eq!(stats.memory_count, 0);

        engine.shutdown().await;
    }
}
