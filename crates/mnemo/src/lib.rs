//! # Mnemo - Memory for Conversational Assistants
//!
//! **Mnemo** gives chat assistants a layered memory:
//!
//! - **Short-term**: bounded per-conversation buffers with idle expiry
//! - **Long-term**: embedding-indexed records with similarity retrieval
//! - **Relationships**: a typed, weighted graph between memories
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mnemo::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(MemoryEngine::builder().build()?);
//!     engine.init();
//!
//!     let key = ContextKey::user("alice");
//!     engine
//!         .append(&key, ConversationMessage::user("alice", "dm", "I prefer dark mode"))
//!         .await?;
//!
//!     let outcome = engine.transfer(&key).await?;
//!     println!("saved: {:?}", outcome.record_id());
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! append -> short-term buffer -> decision engine -> transfer pipeline
//!                                                       |
//!                            relationship graph <- long-term store
//! ```

#![doc(html_root_url = "https://docs.rs/mnemo/0.1.0")]
#![warn(missing_docs)]

// Re-export sub-crates
#[cfg(feature = "engine")]
pub use mnemo_engine as engine;

/// Commonly used types and traits
pub mod prelude {
    #[cfg(feature = "engine")]
    pub use crate::engine::{
        ContextKey, ContextScope, ConversationMessage, EngineSettings, EngineStats,
        MemoryEngine, MemoryError, MemoryRecord, MemoryResult, MessageRole, Permissions,
        RelatedQuery, RelationshipType, SaveOutcome, SaveRequest, SimilarityQuery,
        TransferOutcome,
    };
}
