//! Error types for the memory lifecycle engine

use thiserror::Error;

/// Result alias used throughout the engine
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors produced by memory operations
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed input rejected before any side effect
    #[error("validation failed for '{field}': expected {expected}, got {actual}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// What was expected
        expected: String,
        /// What was provided
        actual: String,
    },

    /// Embedding dimensions disagree; fatal to the specific operation
    #[error("embedding dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the store is configured for
        expected: usize,
        /// Dimension of the offending vector
        actual: usize,
    },

    /// The permission gate denied the action
    #[error("action '{action}' is not permitted by current settings")]
    NotPermitted {
        /// The denied action
        action: String,
    },

    /// Transient store failure, surfaced after bounded retries
    #[error("store unavailable during '{operation}'")]
    StoreUnavailable {
        /// Operation that could not reach the store
        operation: String,
    },

    /// Embedding backend failed; the gateway normally degrades instead
    #[error("embedding provider unavailable: {reason}")]
    EmbeddingUnavailable {
        /// Why the provider failed
        reason: String,
    },

    /// Storage backend error with source
    #[error("storage operation '{operation}' failed")]
    Storage {
        /// Operation that failed
        operation: String,
        /// Underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Record or relationship lookup miss
    #[error("no record found with id '{id}'")]
    NotFound {
        /// The missing id
        id: String,
    },
}

impl MemoryError {
    /// Create a validation error
    pub fn validation(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a storage error
    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a store-unavailable error
    pub fn store_unavailable(operation: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            operation: operation.into(),
        }
    }

    /// Create a not-permitted error
    pub fn not_permitted(action: impl Into<String>) -> Self {
        Self::NotPermitted {
            action: action.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Whether the error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::EmbeddingUnavailable { .. }
        )
    }
}
