//! Short-term conversation buffers
//!
//! One bounded FIFO buffer per context key, created lazily on first
//! append and evicted after idle timeout. All mutation of a single
//! context goes through that context's exclusive lock; different keys
//! proceed in parallel. Reads hand out snapshots, never the live buffer.

use crate::config::SettingsGate;
use crate::error::MemoryResult;
use crate::message::{ContextKey, ConversationMessage, MessageRole};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Platform history used to seed a brand-new context
#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    /// Recent messages for a channel, oldest first
    async fn fetch_recent(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> MemoryResult<Vec<ConversationMessage>>;
}

/// Filtering options for history snapshots
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    /// Only messages with this role
    pub role: Option<MessageRole>,

    /// Return at most this many messages (most recent kept)
    pub limit: Option<usize>,
}

/// Mutable state of one context, guarded by its per-key lock
#[derive(Debug)]
pub(crate) struct ContextState {
    pub(crate) messages: VecDeque<ConversationMessage>,
    pub(crate) last_active_at: chrono::DateTime<chrono::Utc>,
    seeded: bool,
    // Tombstone set when the state is drained and dropped from the map;
    // appends queued on the lock restart on a fresh entry instead of
    // writing into a detached buffer
    evicted: bool,
}

impl ContextState {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            last_active_at: chrono::Utc::now(),
            seeded: false,
            evicted: false,
        }
    }
}

/// Per-conversation bounded message buffers with idle expiry
pub struct ShortTermContextManager {
    contexts: DashMap<ContextKey, Arc<Mutex<ContextState>>>,
    gate: SettingsGate,
    history: Option<Arc<dyn HistorySource>>,
}

impl ShortTermContextManager {
    /// Create a manager without history seeding
    pub fn new(gate: SettingsGate) -> Self {
        Self {
            contexts: DashMap::new(),
            gate,
            history: None,
        }
    }

    /// Create a manager that seeds new contexts from platform history
    pub fn with_history(gate: SettingsGate, history: Arc<dyn HistorySource>) -> Self {
        Self {
            contexts: DashMap::new(),
            gate,
            history: Some(history),
        }
    }

    /// Handle to a context's lock, if the context exists
    pub(crate) fn handle(&self, key: &ContextKey) -> Option<Arc<Mutex<ContextState>>> {
        self.contexts.get(key).map(|entry| entry.clone())
    }

    /// Append a message, creating the context if absent
    ///
    /// A brand-new context is optionally seeded by replaying recent
    /// platform history (command invocations and bot echoes excluded).
    /// Beyond `short_term_limit` the oldest message is dropped; this
    /// eviction is a plain drop, never a transfer.
    pub async fn append(&self, key: &ContextKey, message: ConversationMessage) -> MemoryResult<()> {
        let settings = self.gate.snapshot();

        loop {
            let handle = self
                .contexts
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(ContextState::new())))
                .clone();

            let mut state = handle.lock().await;
            if state.evicted {
                // The context we queued on was drained while we waited;
                // start over on a fresh entry
                drop(state);
                continue;
            }

            // Seed under the lock so concurrent first appends seed once
            if !state.seeded && settings.seed_from_history {
                if let Some(history) = &self.history {
                    match history
                        .fetch_recent(&message.channel_id, settings.short_term_limit)
                        .await
                    {
                        Ok(seed) => {
                            for past in seed.into_iter().filter(is_seedable) {
                                state.messages.push_back(past);
                            }
                            debug!(key = %key, seeded = state.messages.len(), "seeded new context from history");
                        }
                        Err(err) => {
                            // Seeding is best-effort; a cold start is fine
                            debug!(key = %key, error = %err, "history seeding failed, starting empty");
                        }
                    }
                }
            }
            state.seeded = true;

            state.messages.push_back(message);
            while state.messages.len() > settings.short_term_limit {
                let evicted = state.messages.pop_front();
                trace!(
                    key = %key,
                    evicted_id = evicted.as_ref().map(|m| m.id.as_str()).unwrap_or(""),
                    "buffer at capacity, dropped oldest message"
                );
            }
            state.last_active_at = chrono::Utc::now();

            return Ok(());
        }
    }

    /// Read-only snapshot of a context's messages
    pub async fn get_history(
        &self,
        key: &ContextKey,
        options: &HistoryOptions,
    ) -> Vec<ConversationMessage> {
        let Some(handle) = self.handle(key) else {
            return Vec::new();
        };

        let state = handle.lock().await;
        let mut snapshot: Vec<ConversationMessage> = state
            .messages
            .iter()
            .filter(|m| options.role.map_or(true, |role| m.role == role))
            .cloned()
            .collect();

        if let Some(limit) = options.limit {
            if snapshot.len() > limit {
                snapshot.drain(..snapshot.len() - limit);
            }
        }

        snapshot
    }

    /// Empty a context and drop it from the map, returning its messages
    ///
    /// Drains and tombstones under the per-key lock before the map entry
    /// goes away, so an append already queued on the lock lands in a
    /// fresh context rather than a detached buffer.
    pub async fn clear(&self, key: &ContextKey) -> Vec<ConversationMessage> {
        let Some(handle) = self.handle(key) else {
            return Vec::new();
        };

        let mut state = handle.lock().await;
        let drained: Vec<ConversationMessage> = state.messages.drain(..).collect();
        state.evicted = true;
        // Only remove the entry we drained; the key may already hold a
        // successor context
        self.contexts
            .remove_if(key, |_, candidate| Arc::ptr_eq(candidate, &handle));
        debug!(key = %key, messages = drained.len(), "cleared context");
        drained
    }

    /// Evict a context only if it is still idle past the timeout
    ///
    /// Re-checks `last_active_at` under the per-key lock, so a message
    /// appended after an idle snapshot keeps its context alive. Returns
    /// the drained messages, or `None` when the context turned out to be
    /// active (or already gone).
    pub async fn evict_if_idle(
        &self,
        key: &ContextKey,
        timeout: std::time::Duration,
    ) -> Option<Vec<ConversationMessage>> {
        let handle = self.handle(key)?;
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());

        let mut state = handle.lock().await;
        if state.evicted || state.last_active_at >= cutoff {
            return None;
        }

        let drained: Vec<ConversationMessage> = state.messages.drain(..).collect();
        state.evicted = true;
        self.contexts
            .remove_if(key, |_, candidate| Arc::ptr_eq(candidate, &handle));
        debug!(key = %key, messages = drained.len(), "evicted idle context");
        Some(drained)
    }

    /// Keys of contexts idle past the given timeout
    pub fn idle_keys(&self, timeout: std::time::Duration) -> Vec<ContextKey> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());

        self.contexts
            .iter()
            .filter_map(|entry| {
                // try_lock: a context busy with an append or transfer is
                // not idle, skip it this sweep
                entry
                    .value()
                    .try_lock()
                    .ok()
                    .filter(|state| state.last_active_at < cutoff)
                    .map(|_| entry.key().clone())
            })
            .collect()
    }

    /// Number of live contexts
    pub fn active_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Total messages across all buffers
    pub fn buffered_messages(&self) -> usize {
        self.contexts
            .iter()
            .filter_map(|entry| entry.value().try_lock().ok().map(|s| s.messages.len()))
            .sum()
    }
}

/// Seed filter: drop command invocations and system noise
fn is_seedable(message: &ConversationMessage) -> bool {
    if message.role == MessageRole::System {
        return false;
    }
    let text = message.text().trim_start();
    !(text.starts_with('/') || text.starts_with('!'))
}
