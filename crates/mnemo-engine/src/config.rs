//! Engine settings and the permission gate
//!
//! All tunables live in one [`EngineSettings`] object. Updates replace the
//! whole object atomically, so concurrent readers always observe a
//! consistent snapshot. Every state-changing operation consults the gate
//! before proceeding; the owner-identity bypass is centralized here
//! instead of being scattered across call sites.

use crate::error::{MemoryError, MemoryResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Memory actions that can be individually permitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryAction {
    /// Persisting new memory records
    Save,
    /// Similarity search over long-term memory
    Search,
    /// Hard-deleting records
    Delete,
    /// Merging duplicate records
    Consolidate,
    /// Reading engine statistics
    Analytics,
}

impl MemoryAction {
    /// Stable label used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Search => "search",
            Self::Delete => "delete",
            Self::Consolidate => "consolidate",
            Self::Analytics => "analytics",
        }
    }
}

/// Which memory actions are currently allowed
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Permissions {
    /// Allow persisting new records
    pub allow_save: bool,
    /// Allow similarity search
    pub allow_search: bool,
    /// Allow hard deletes
    pub allow_delete: bool,
    /// Allow consolidation
    pub allow_consolidate: bool,
    /// Allow statistics reads
    pub allow_analytics: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            allow_save: true,
            allow_search: true,
            allow_delete: false,
            allow_consolidate: true,
            allow_analytics: true,
        }
    }
}

impl Permissions {
    /// Whether the given action is allowed
    pub fn allows(&self, action: MemoryAction) -> bool {
        match action {
            MemoryAction::Save => self.allow_save,
            MemoryAction::Search => self.allow_search,
            MemoryAction::Delete => self.allow_delete,
            MemoryAction::Consolidate => self.allow_consolidate,
            MemoryAction::Analytics => self.allow_analytics,
        }
    }

    /// Allow everything (owner sessions, tests)
    pub fn allow_all() -> Self {
        Self {
            allow_save: true,
            allow_search: true,
            allow_delete: true,
            allow_consolidate: true,
            allow_analytics: true,
        }
    }

    /// Deny everything
    pub fn deny_all() -> Self {
        Self {
            allow_save: false,
            allow_search: false,
            allow_delete: false,
            allow_consolidate: false,
            allow_analytics: false,
        }
    }
}

/// Mutable engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum messages per short-term context
    pub short_term_limit: usize,

    /// Idle duration after which a context is evicted
    pub session_timeout: Duration,

    /// How often the idle sweep runs
    pub sweep_interval: Duration,

    /// Minimum importance for a transfer to persist (0-10)
    pub decision_threshold: u8,

    /// Minimum similarity for retrieval results (0-1)
    pub relevance_threshold: f32,

    /// Similarity above which content counts as a duplicate (0-1)
    pub duplicate_threshold: f32,

    /// Automatic transfer on idle eviction; false = tool-driven mode,
    /// memory actions happen only via explicit calls
    pub auto_transfer: bool,

    /// Seed brand-new contexts from platform history
    pub seed_from_history: bool,

    /// Identity whose requests bypass permission checks
    pub owner_id: Option<String>,

    /// Current permission set
    pub permissions: Permissions,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            short_term_limit: 25,
            session_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            decision_threshold: 6,
            relevance_threshold: 0.5,
            duplicate_threshold: 0.9,
            auto_transfer: true,
            seed_from_history: false,
            owner_id: None,
            permissions: Permissions::default(),
        }
    }
}

impl EngineSettings {
    /// Set the short-term buffer limit
    pub fn with_short_term_limit(mut self, limit: usize) -> Self {
        self.short_term_limit = limit;
        self
    }

    /// Set the idle session timeout
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the save-worthiness threshold
    pub fn with_decision_threshold(mut self, threshold: u8) -> Self {
        self.decision_threshold = threshold;
        self
    }

    /// Set the permission set
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the owner identity
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Disable automatic transfer (tool-driven mode)
    pub fn tool_driven(mut self) -> Self {
        self.auto_transfer = false;
        self
    }

    /// Check range invariants on thresholds
    pub fn validate(&self) -> MemoryResult<()> {
        if self.short_term_limit == 0 {
            return Err(MemoryError::validation("short_term_limit", ">= 1", "0"));
        }
        if self.decision_threshold > 10 {
            return Err(MemoryError::validation(
                "decision_threshold",
                "0..=10",
                self.decision_threshold.to_string(),
            ));
        }
        for (name, value) in [
            ("relevance_threshold", self.relevance_threshold),
            ("duplicate_threshold", self.duplicate_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MemoryError::validation(name, "0.0..=1.0", value.to_string()));
            }
        }
        Ok(())
    }
}

/// Atomically-replaceable settings holder
///
/// Readers take a cheap `Arc` snapshot; writers swap the whole object
/// under the lock, so no reader ever sees a half-applied update.
#[derive(Clone)]
pub struct SettingsGate {
    inner: Arc<RwLock<Arc<EngineSettings>>>,
}

impl SettingsGate {
    /// Create a gate around initial settings
    pub fn new(settings: EngineSettings) -> MemoryResult<Self> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        })
    }

    /// Current settings snapshot
    pub fn snapshot(&self) -> Arc<EngineSettings> {
        self.inner.read().clone()
    }

    /// Replace the settings wholesale
    pub fn replace(&self, settings: EngineSettings) -> MemoryResult<()> {
        settings.validate()?;
        *self.inner.write() = Arc::new(settings);
        Ok(())
    }

    /// Apply a mutation to a copy of the settings, then swap it in
    pub fn update<F>(&self, mutate: F) -> MemoryResult<()>
    where
        F: FnOnce(&mut EngineSettings),
    {
        let mut lock = self.inner.write();
        let mut next = (**lock).clone();
        mutate(&mut next);
        next.validate()?;
        *lock = Arc::new(next);
        Ok(())
    }

    /// Check a permission, honoring the centralized owner bypass
    ///
    /// `requester` is the identity attempting the action; the configured
    /// owner short-circuits the permission set.
    pub fn check(&self, action: MemoryAction, requester: Option<&str>) -> MemoryResult<()> {
        let settings = self.snapshot();

        if let (Some(owner), Some(requester)) = (&settings.owner_id, requester) {
            if owner == requester {
                return Ok(());
            }
        }

        if settings.permissions.allows(action) {
            Ok(())
        } else {
            Err(MemoryError::not_permitted(action.as_str()))
        }
    }
}

impl Default for SettingsGate {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(EngineSettings::default()))),
        }
    }
}
