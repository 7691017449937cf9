//! Long-term memory store
//!
//! The [`MemoryStore`] trait is the engine's view of durable storage:
//! keyed records plus top-K similarity retrieval. The in-memory
//! implementation does a linear cosine scan, which is sufficient for
//! moderate memory counts; a real vector index plugs in behind the same
//! trait.

use crate::embedding::Embedding;
use crate::error::{MemoryError, MemoryResult};
use crate::record::{MemoryRecord, RecordPatch, CONSOLIDATED_INTO_KEY};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, error, info};

/// Filters for similarity queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimilarityQuery {
    /// Maximum results to return
    pub top_k: usize,

    /// Drop results below this cosine similarity; no floor when unset
    pub min_similarity: Option<f32>,

    /// Only records owned by this user
    pub owner_user_id: Option<String>,

    /// Only records owned by this guild
    pub owner_guild_id: Option<String>,

    /// Only records carrying all of these tags
    pub tags: BTreeSet<String>,

    /// Only records at or above this importance
    pub min_importance: Option<u8>,
}

impl SimilarityQuery {
    /// Query returning at most `top_k` results
    pub fn top_k(top_k: usize) -> Self {
        Self {
            top_k,
            ..Default::default()
        }
    }

    /// Set the similarity floor
    pub fn min_similarity(mut self, min: f32) -> Self {
        self.min_similarity = Some(min);
        self
    }

    /// Restrict to one user's records
    pub fn owner_user(mut self, user_id: impl Into<String>) -> Self {
        self.owner_user_id = Some(user_id.into());
        self
    }

    /// Restrict to one guild's records
    pub fn owner_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.owner_guild_id = Some(guild_id.into());
        self
    }

    /// Require a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Set an importance floor
    pub fn min_importance(mut self, importance: u8) -> Self {
        self.min_importance = Some(importance);
        self
    }

    fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(user) = &self.owner_user_id {
            if record.owner_user_id.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        if let Some(guild) = &self.owner_guild_id {
            if record.owner_guild_id.as_deref() != Some(guild.as_str()) {
                return false;
            }
        }
        if !self.tags.is_subset(&record.tags) {
            return false;
        }
        if let Some(min) = self.min_importance {
            if record.importance < min {
                return false;
            }
        }
        true
    }
}

/// Filters for counting records
#[derive(Debug, Clone, Default)]
pub struct CountFilter {
    /// Only records owned by this user
    pub owner_user_id: Option<String>,

    /// Only records in this category
    pub category: Option<String>,

    /// Include records that were consolidated away
    pub include_consolidated: bool,
}

/// A record with its similarity to the query vector
#[derive(Debug, Clone)]
pub struct SimilarityMatch {
    /// The matched record
    pub record: MemoryRecord,

    /// Cosine similarity to the query embedding
    pub similarity: f32,
}

/// Durable keyed record store with similarity retrieval
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Dimension every stored embedding must have
    fn dimensions(&self) -> usize;

    /// Persist a validated record and return its id
    async fn insert(&self, record: MemoryRecord) -> MemoryResult<String>;

    /// Fetch a record by id, bumping its access bookkeeping
    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryRecord>>;

    /// Apply a partial update to a record
    async fn update_metadata(&self, id: &str, patch: &RecordPatch) -> MemoryResult<()>;

    /// Hard-delete a record; returns whether it existed
    async fn delete(&self, id: &str) -> MemoryResult<bool>;

    /// Top-K cosine similarity scan, descending; ties break by higher
    /// importance, then more recent creation. Consolidated and expired
    /// records are excluded.
    async fn find_similar(
        &self,
        query: &Embedding,
        options: &SimilarityQuery,
    ) -> MemoryResult<Vec<SimilarityMatch>>;

    /// Count records matching the filter
    async fn count(&self, filter: &CountFilter) -> MemoryResult<usize>;

    /// Soft-mark `losers` as consolidated into `winner`
    ///
    /// Losing records stay in the store for auditability but disappear
    /// from similarity results.
    async fn consolidate(&self, winner: &str, losers: &[String]) -> MemoryResult<()>;
}

/// In-memory reference store with linear-scan similarity
pub struct InMemoryMemoryStore {
    records: DashMap<String, MemoryRecord>,
    dimensions: usize,
}

impl InMemoryMemoryStore {
    /// Create a store configured for the given embedding dimension
    pub fn new(dimensions: usize) -> Self {
        Self {
            records: DashMap::new(),
            dimensions,
        }
    }

    fn check_dimensions(&self, embedding: &Embedding) -> MemoryResult<()> {
        if embedding.dimensions != self.dimensions {
            error!(
                expected = self.dimensions,
                actual = embedding.dimensions,
                "rejecting embedding with mismatched dimensions"
            );
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.dimensions,
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn insert(&self, record: MemoryRecord) -> MemoryResult<String> {
        record.validate()?;
        self.check_dimensions(&record.embedding)?;

        let id = record.id.clone();
        debug!(id = %id, category = %record.category, importance = record.importance, "inserting memory record");
        self.records.insert(id.clone(), record);
        Ok(id)
    }

    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryRecord>> {
        match self.records.get_mut(id) {
            Some(mut entry) => {
                entry.touch();
                Ok(Some(entry.clone()))
            }
            None => Ok(None),
        }
    }

    async fn update_metadata(&self, id: &str, patch: &RecordPatch) -> MemoryResult<()> {
        match self.records.get_mut(id) {
            Some(mut entry) => patch.apply(&mut entry),
            None => Err(MemoryError::not_found(id)),
        }
    }

    async fn delete(&self, id: &str) -> MemoryResult<bool> {
        Ok(self.records.remove(id).is_some())
    }

    async fn find_similar(
        &self,
        query: &Embedding,
        options: &SimilarityQuery,
    ) -> MemoryResult<Vec<SimilarityMatch>> {
        self.check_dimensions(query)?;

        let mut matches = Vec::new();
        for entry in self.records.iter() {
            let record = entry.value();
            if record.is_consolidated() || record.is_expired() || !options.matches(record) {
                continue;
            }

            let similarity = query.cosine_similarity(&record.embedding)?;
            if options.min_similarity.map_or(true, |floor| similarity >= floor) {
                matches.push(SimilarityMatch {
                    record: record.clone(),
                    similarity,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.record.importance.cmp(&a.record.importance))
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        });
        if options.top_k > 0 {
            matches.truncate(options.top_k);
        }

        // Access bookkeeping for returned records
        for m in &matches {
            if let Some(mut entry) = self.records.get_mut(&m.record.id) {
                entry.touch();
            }
        }

        Ok(matches)
    }

    async fn count(&self, filter: &CountFilter) -> MemoryResult<usize> {
        let count = self
            .records
            .iter()
            .filter(|entry| {
                let record = entry.value();
                if !filter.include_consolidated && record.is_consolidated() {
                    return false;
                }
                if let Some(user) = &filter.owner_user_id {
                    if record.owner_user_id.as_deref() != Some(user.as_str()) {
                        return false;
                    }
                }
                if let Some(category) = &filter.category {
                    if &record.category != category {
                        return false;
                    }
                }
                true
            })
            .count();
        Ok(count)
    }

    async fn consolidate(&self, winner: &str, losers: &[String]) -> MemoryResult<()> {
        if !self.records.contains_key(winner) {
            return Err(MemoryError::not_found(winner));
        }

        for loser in losers {
            match self.records.get_mut(loser) {
                Some(mut entry) => {
                    entry.metadata.insert(
                        CONSOLIDATED_INTO_KEY.to_string(),
                        serde_json::Value::String(winner.to_string()),
                    );
                }
                None => return Err(MemoryError::not_found(loser)),
            }
        }

        info!(winner = %winner, losers = losers.len(), "consolidated memory records");
        Ok(())
    }
}
