//! # Mnemo Engine - Memory Lifecycle for Conversational Assistants
//!
//! Gives a multi-tenant chat assistant a working memory: recent
//! conversation is buffered per context, worthwhile content is promoted
//! into an embedding-indexed long-term store, and related memories are
//! linked into a typed graph.
//!
//! ## Lifecycle
//!
//! - **Short-term**: bounded per-conversation FIFO buffers with idle
//!   expiry ([`ShortTermContextManager`])
//! - **Decision**: heuristic importance scoring, categorization, and
//!   duplicate detection ([`DecisionEngine`])
//! - **Transfer**: promotion of buffered content into durable records
//!   ([`TransferPipeline`])
//! - **Long-term**: cosine-similarity retrieval over stored records
//!   ([`MemoryStore`])
//! - **Relationships**: typed, weighted edges between memories
//!   ([`RelationshipMapper`])
//!
//! All tunables and permissions live behind a live-mutable
//! [`SettingsGate`]; every state-changing operation consults it first.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mnemo_engine::{ContextKey, ConversationMessage, MemoryEngine};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(MemoryEngine::builder().build()?);
//! engine.init();
//!
//! let key = ContextKey::user("alice");
//! engine
//!     .append(&key, ConversationMessage::user("alice", "dm", "I prefer dark mode"))
//!     .await?;
//!
//! // Promote the buffer into long-term memory
//! let outcome = engine.transfer(&key).await?;
//! println!("{:?}", outcome.record_id());
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod decision;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod message;
pub mod record;
pub mod relationship;
pub mod short_term;
pub mod store;
pub mod transfer;

pub use config::{EngineSettings, MemoryAction, Permissions, SettingsGate};
pub use decision::{CategoryRules, DecisionEngine, MemoryDecision, Sentiment};
pub use embedding::{
    Embedding, EmbeddingGateway, EmbeddingProvider, HashEmbeddingProvider, RetryPolicy,
};
pub use engine::{EngineStats, MemoryEngine, MemoryEngineBuilder, SaveOutcome, SaveRequest};
pub use error::{MemoryError, MemoryResult};
pub use message::{ContextKey, ContextScope, ConversationMessage, MessageContent, MessageRole};
pub use record::{MemoryRecord, RecordPatch};
pub use relationship::{
    ConnectionSuggestion, InMemoryRelationshipStore, MemoryRelationship, RelatedMemory,
    RelatedQuery, RelationshipMapper, RelationshipStore, RelationshipType,
};
pub use short_term::{HistoryOptions, HistorySource, ShortTermContextManager};
pub use store::{
    CountFilter, InMemoryMemoryStore, MemoryStore, SimilarityMatch, SimilarityQuery,
};
pub use transfer::{TransferOutcome, TransferPipeline, TransferTrigger};
