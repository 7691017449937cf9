//! Durable memory records
//!
//! A [`MemoryRecord`] is one long-term fact promoted out of a short-term
//! buffer (or saved explicitly). Records carry a fixed-dimension embedding
//! for similarity retrieval, an importance rating, and open metadata.
//! Curation never hard-deletes: consolidation soft-marks the losing
//! records so the audit trail survives.

use crate::embedding::Embedding;
use crate::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Metadata key marking a record as merged into another
pub const CONSOLIDATED_INTO_KEY: &str = "consolidated_into";

/// Metadata key for an optional expiry timestamp (RFC 3339)
pub const EXPIRES_AT_KEY: &str = "expires_at";

/// A durable memory record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier
    pub id: String,

    /// The remembered content
    pub content: String,

    /// Fixed-length embedding vector
    pub embedding: Embedding,

    /// Importance rating, 1 (trivial) to 10 (critical)
    pub importance: u8,

    /// Category label (open vocabulary, e.g. "user_preference", "fact")
    pub category: String,

    /// Tags for filtered retrieval
    pub tags: BTreeSet<String>,

    /// Owning user, if user-scoped
    pub owner_user_id: Option<String>,

    /// Owning guild, if guild-scoped
    pub owner_guild_id: Option<String>,

    /// Open metadata: extracted facts, priority, expiry, provenance
    pub metadata: HashMap<String, serde_json::Value>,

    /// Creation timestamp
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// How many times the record has been retrieved
    pub access_count: u64,

    /// When the record was last retrieved
    pub last_accessed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl MemoryRecord {
    /// Create a record with a generated id and default attributes
    pub fn new(content: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            embedding,
            importance: 5,
            category: "context".to_string(),
            tags: BTreeSet::new(),
            owner_user_id: None,
            owner_guild_id: None,
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
            access_count: 0,
            last_accessed_at: None,
        }
    }

    /// Set importance (validated on insert, see [`MemoryRecord::validate`])
    pub fn with_importance(mut self, importance: u8) -> Self {
        self.importance = importance;
        self
    }

    /// Set the category label
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the owning user
    pub fn with_owner_user(mut self, user_id: impl Into<String>) -> Self {
        self.owner_user_id = Some(user_id.into());
        self
    }

    /// Set the owning guild
    pub fn with_owner_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.owner_guild_id = Some(guild_id.into());
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check range invariants; called by stores before persisting
    pub fn validate(&self) -> MemoryResult<()> {
        if !(1..=10).contains(&self.importance) {
            return Err(MemoryError::validation(
                "importance",
                "1..=10",
                self.importance.to_string(),
            ));
        }
        if self.content.trim().is_empty() {
            return Err(MemoryError::validation(
                "content",
                "non-empty text",
                "empty string",
            ));
        }
        Ok(())
    }

    /// Set an expiry after which the record stops surfacing in retrieval
    pub fn with_expires_at(mut self, when: chrono::DateTime<chrono::Utc>) -> Self {
        self.metadata.insert(
            EXPIRES_AT_KEY.to_string(),
            serde_json::Value::String(when.to_rfc3339()),
        );
        self
    }

    /// Expiry timestamp, if one was set
    pub fn expires_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.metadata
            .get(EXPIRES_AT_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }

    /// Whether the record's expiry has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at()
            .map_or(false, |when| when <= chrono::Utc::now())
    }

    /// Whether this record has been consolidated into another
    pub fn is_consolidated(&self) -> bool {
        self.metadata.contains_key(CONSOLIDATED_INTO_KEY)
    }

    /// Id of the record this one was consolidated into, if any
    pub fn consolidated_into(&self) -> Option<&str> {
        self.metadata
            .get(CONSOLIDATED_INTO_KEY)
            .and_then(|v| v.as_str())
    }

    /// Record a retrieval
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed_at = Some(chrono::Utc::now());
    }
}

/// Partial update applied by `update_metadata`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    /// Replace importance
    pub importance: Option<u8>,

    /// Replace tags
    pub tags: Option<BTreeSet<String>>,

    /// Replace the category label
    pub category: Option<String>,

    /// Merge into metadata (existing keys are overwritten)
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RecordPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set importance
    pub fn importance(mut self, importance: u8) -> Self {
        self.importance = Some(importance);
        self
    }

    /// Set the category
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Add a metadata entry to merge
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Apply the patch to a record, validating ranges
    pub fn apply(&self, record: &mut MemoryRecord) -> MemoryResult<()> {
        if let Some(importance) = self.importance {
            if !(1..=10).contains(&importance) {
                return Err(MemoryError::validation(
                    "importance",
                    "1..=10",
                    importance.to_string(),
                ));
            }
            record.importance = importance;
        }
        if let Some(tags) = &self.tags {
            record.tags = tags.clone();
        }
        if let Some(category) = &self.category {
            record.category = category.clone();
        }
        for (key, value) in &self.metadata {
            record.metadata.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}
