//! Relationship graph between memories
//!
//! Typed, weighted edges connecting memory records. Edges are keyed by
//! (source, target, type); creating the same edge twice updates its
//! strength and metadata instead of duplicating it. Similar and
//! categorical edges are undirected, so the pair is order-normalized
//! before keying. Traversal is bounded breadth-first with strengths
//! multiplied along the path.

use crate::config::{MemoryAction, SettingsGate};
use crate::error::{MemoryError, MemoryResult};
use crate::store::{MemoryStore, SimilarityQuery};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// How two memories relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// Overlapping content
    Similar,
    /// Source led to target
    Causal,
    /// Source happened before target
    Temporal,
    /// The two cannot both hold
    Contradictory,
    /// Target reinforces source
    Supportive,
    /// Same category or theme
    Categorical,
    /// Source is required before target
    Prerequisite,
    /// Target follows from source
    Consequence,
}

impl RelationshipType {
    /// Whether edge direction carries meaning
    pub fn is_directed(&self) -> bool {
        !matches!(self, Self::Similar | Self::Categorical)
    }

    /// Stable label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Similar => "similar",
            Self::Causal => "causal",
            Self::Temporal => "temporal",
            Self::Contradictory => "contradictory",
            Self::Supportive => "supportive",
            Self::Categorical => "categorical",
            Self::Prerequisite => "prerequisite",
            Self::Consequence => "consequence",
        }
    }
}

/// One edge in the relationship graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRelationship {
    /// Unique edge id
    pub id: String,

    /// Source memory id
    pub source_memory_id: String,

    /// Target memory id
    pub target_memory_id: String,

    /// Edge type
    pub relationship_type: RelationshipType,

    /// Connection strength, 0.0 (tenuous) to 1.0 (certain)
    pub strength: f32,

    /// Free-form edge metadata (reasoning, provenance)
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the edge was first created
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl MemoryRelationship {
    /// Create an edge; the pair is normalized for undirected types
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship_type: RelationshipType,
        strength: f32,
    ) -> Self {
        let (source, target) = normalize_pair(source.into(), target.into(), relationship_type);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_memory_id: source,
            target_memory_id: target,
            relationship_type,
            strength,
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check edge invariants
    pub fn validate(&self) -> MemoryResult<()> {
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(MemoryError::validation(
                "strength",
                "0.0..=1.0",
                self.strength.to_string(),
            ));
        }
        if self.source_memory_id == self.target_memory_id {
            return Err(MemoryError::validation(
                "target_memory_id",
                "different from source",
                &self.target_memory_id,
            ));
        }
        Ok(())
    }

    /// The other endpoint of the edge, if `memory_id` is one of them
    pub fn other_end(&self, memory_id: &str) -> Option<&str> {
        if self.source_memory_id == memory_id {
            Some(&self.target_memory_id)
        } else if self.target_memory_id == memory_id && !self.relationship_type.is_directed() {
            Some(&self.source_memory_id)
        } else {
            None
        }
    }
}

/// Order-normalize the endpoint pair for undirected types
fn normalize_pair(
    source: String,
    target: String,
    relationship_type: RelationshipType,
) -> (String, String) {
    if !relationship_type.is_directed() && target < source {
        (target, source)
    } else {
        (source, target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EdgeKey {
    source: String,
    target: String,
    relationship_type: RelationshipType,
}

/// Persistence interface for relationship edges
#[async_trait::async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Insert or update an edge; the (source, target, type) triple is the
    /// identity, so a second upsert refreshes strength and metadata
    async fn upsert(&self, relationship: MemoryRelationship) -> MemoryResult<MemoryRelationship>;

    /// All edges touching a memory (either endpoint)
    async fn edges_of(&self, memory_id: &str) -> MemoryResult<Vec<MemoryRelationship>>;

    /// Remove an edge by id, true if it existed
    async fn delete(&self, id: &str) -> MemoryResult<bool>;

    /// Total number of edges
    async fn count(&self) -> MemoryResult<usize>;
}

/// Map-backed relationship store
#[derive(Default)]
pub struct InMemoryRelationshipStore {
    edges: DashMap<EdgeKey, MemoryRelationship>,
}

impl InMemoryRelationshipStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RelationshipStore for InMemoryRelationshipStore {
    async fn upsert(&self, relationship: MemoryRelationship) -> MemoryResult<MemoryRelationship> {
        relationship.validate()?;

        let key = EdgeKey {
            source: relationship.source_memory_id.clone(),
            target: relationship.target_memory_id.clone(),
            relationship_type: relationship.relationship_type,
        };

        let stored = match self.edges.get(&key) {
            Some(existing) => {
                // Keep the original id and creation time on update
                let mut updated = existing.clone();
                updated.strength = relationship.strength;
                updated.metadata = relationship.metadata;
                updated
            }
            None => relationship,
        };
        self.edges.insert(key, stored.clone());
        Ok(stored)
    }

    async fn edges_of(&self, memory_id: &str) -> MemoryResult<Vec<MemoryRelationship>> {
        Ok(self
            .edges
            .iter()
            .filter(|entry| {
                entry.source_memory_id == memory_id || entry.target_memory_id == memory_id
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn delete(&self, id: &str) -> MemoryResult<bool> {
        let key = self
            .edges
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.key().clone());

        Ok(match key {
            Some(key) => self.edges.remove(&key).is_some(),
            None => false,
        })
    }

    async fn count(&self) -> MemoryResult<usize> {
        Ok(self.edges.len())
    }
}

/// Traversal options for [`RelationshipMapper::find_related`]
#[derive(Debug, Clone)]
pub struct RelatedQuery {
    /// Only edges of these types; empty means all types
    pub types: Vec<RelationshipType>,

    /// Drop results weaker than this
    pub min_strength: f32,

    /// Cap on returned results
    pub max_results: usize,

    /// Follow edges through intermediate memories (bounded depth)
    pub include_indirect: bool,
}

impl Default for RelatedQuery {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            min_strength: 0.0,
            max_results: 10,
            include_indirect: false,
        }
    }
}

impl RelatedQuery {
    /// Restrict to the given edge types
    pub fn with_types(mut self, types: impl IntoIterator<Item = RelationshipType>) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    /// Set the minimum strength
    pub fn min_strength(mut self, strength: f32) -> Self {
        self.min_strength = strength;
        self
    }

    /// Set the result cap
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Enable bounded indirect traversal
    pub fn include_indirect(mut self) -> Self {
        self.include_indirect = true;
        self
    }

    fn wants(&self, relationship_type: RelationshipType) -> bool {
        self.types.is_empty() || self.types.contains(&relationship_type)
    }
}

/// One traversal result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedMemory {
    /// The related memory's id
    pub memory_id: String,

    /// Type of the edge leading here (last hop for indirect paths)
    pub relationship_type: RelationshipType,

    /// Path strength; strengths are multiplied along indirect paths
    pub strength: f32,

    /// Number of hops from the origin (1 = direct edge)
    pub hops: usize,
}

/// A proposed, not-yet-persisted edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSuggestion {
    /// Suggested counterpart memory
    pub memory_id: String,

    /// Suggested edge type
    pub relationship_type: RelationshipType,

    /// Embedding similarity backing the suggestion
    pub similarity: f32,
}

// Indirect traversal never goes deeper than this
const MAX_TRAVERSAL_DEPTH: usize = 2;

/// Graph operations over the relationship store
pub struct RelationshipMapper {
    gate: SettingsGate,
    relationships: Arc<dyn RelationshipStore>,
    memories: Arc<dyn MemoryStore>,
}

impl RelationshipMapper {
    /// Wire up a mapper from its collaborators
    pub fn new(
        gate: SettingsGate,
        relationships: Arc<dyn RelationshipStore>,
        memories: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            gate,
            relationships,
            memories,
        }
    }

    /// Create or refresh an edge between two existing memories
    pub async fn create_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relationship_type: RelationshipType,
        strength: f32,
        reasoning: Option<&str>,
        requester: Option<&str>,
    ) -> MemoryResult<MemoryRelationship> {
        self.gate.check(MemoryAction::Save, requester)?;

        for id in [source_id, target_id] {
            if self.memories.get(id).await?.is_none() {
                return Err(MemoryError::not_found(id));
            }
        }

        let mut relationship =
            MemoryRelationship::new(source_id, target_id, relationship_type, strength);
        if let Some(reasoning) = reasoning {
            relationship = relationship.with_metadata("reasoning", serde_json::json!(reasoning));
        }

        let stored = self.relationships.upsert(relationship).await?;
        debug!(
            edge = %stored.id,
            relationship_type = stored.relationship_type.as_str(),
            strength = stored.strength,
            "relationship upserted"
        );
        Ok(stored)
    }

    /// Memories connected to the given one, strongest first
    ///
    /// Direct edges come back with `hops == 1`. With `include_indirect`
    /// the walk continues breadth-first up to two hops, multiplying
    /// strengths along the path; routes leading back to the origin are
    /// dropped, and only the strongest path per memory is kept.
    pub async fn find_related(
        &self,
        memory_id: &str,
        query: &RelatedQuery,
        requester: Option<&str>,
    ) -> MemoryResult<Vec<RelatedMemory>> {
        self.gate.check(MemoryAction::Search, requester)?;

        let max_depth = if query.include_indirect {
            MAX_TRAVERSAL_DEPTH
        } else {
            1
        };

        // Strongest known path per reached memory
        let mut best: HashMap<String, RelatedMemory> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::from([memory_id.to_string()]);
        let mut frontier: VecDeque<(String, f32, usize)> =
            VecDeque::from([(memory_id.to_string(), 1.0, 0)]);

        while let Some((current, path_strength, depth)) = frontier.pop_front() {
            if depth == max_depth {
                continue;
            }

            for edge in self.relationships.edges_of(&current).await? {
                if !query.wants(edge.relationship_type) {
                    continue;
                }
                let Some(next) = edge.other_end(&current) else {
                    continue;
                };
                if next == memory_id {
                    continue;
                }

                let strength = path_strength * edge.strength;
                if strength < query.min_strength {
                    continue;
                }

                let candidate = RelatedMemory {
                    memory_id: next.to_string(),
                    relationship_type: edge.relationship_type,
                    strength,
                    hops: depth + 1,
                };
                match best.get(next) {
                    Some(known) if known.strength >= strength => {}
                    _ => {
                        best.insert(next.to_string(), candidate);
                    }
                }

                if visited.insert(next.to_string()) {
                    frontier.push_back((next.to_string(), strength, depth + 1));
                }
            }
        }

        let mut results: Vec<RelatedMemory> = best.into_values().collect();
        results.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.memory_id.cmp(&b.memory_id))
        });
        results.truncate(query.max_results);
        Ok(results)
    }

    /// Propose edges to similar but unconnected memories
    ///
    /// Ranks candidates by embedding similarity against the record's own
    /// vector. Nothing is persisted; callers decide which suggestions to
    /// turn into edges.
    pub async fn suggest_connections(
        &self,
        memory_id: &str,
        max_suggestions: usize,
        requester: Option<&str>,
    ) -> MemoryResult<Vec<ConnectionSuggestion>> {
        self.gate.check(MemoryAction::Search, requester)?;

        let record = self
            .memories
            .get(memory_id)
            .await?
            .ok_or_else(|| MemoryError::not_found(memory_id))?;

        let connected: HashSet<String> = self
            .relationships
            .edges_of(memory_id)
            .await?
            .into_iter()
            .flat_map(|edge| [edge.source_memory_id, edge.target_memory_id])
            .collect();

        let settings = self.gate.snapshot();
        let query = SimilarityQuery::top_k(max_suggestions + connected.len() + 1)
            .min_similarity(settings.relevance_threshold);
        let matches = self.memories.find_similar(&record.embedding, &query).await?;

        Ok(matches
            .into_iter()
            .filter(|m| m.record.id != memory_id && !connected.contains(&m.record.id))
            .take(max_suggestions)
            .map(|m| ConnectionSuggestion {
                memory_id: m.record.id,
                relationship_type: RelationshipType::Similar,
                similarity: m.similarity,
            })
            .collect())
    }
}
