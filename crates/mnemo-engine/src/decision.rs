//! Save-worthiness decisions
//!
//! Pure heuristic scoring over a window of conversation messages:
//! importance, category, sentiment, topics, and a save/skip verdict.
//! The category comes from a fixed ordered ruleset and the importance
//! from a weighted sum of surface signals, so given the same input the
//! engine always produces the same verdict. The duplicate check is the
//! one impure dependency (it needs an embedding) and is injected, which
//! keeps the scorer independently testable. A regex ruleset is a
//! deliberate design choice here; swapping in a model-based classifier
//! only means replacing this module behind the same types.

use crate::config::SettingsGate;
use crate::embedding::EmbeddingGateway;
use crate::error::MemoryResult;
use crate::message::{ConversationMessage, MessageRole};
use crate::store::{MemoryStore, SimilarityMatch, SimilarityQuery};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Overall tone of the scored window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    /// Predominantly positive language
    Positive,
    /// Predominantly negative language
    Negative,
    /// Neither dominates
    Neutral,
}

/// Verdict for one window of messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDecision {
    /// Worthiness rating, 0 (noise) to 10 (critical)
    pub importance: u8,

    /// First matching category from the ordered ruleset
    pub category: String,

    /// Overall tone
    pub sentiment: Sentiment,

    /// Extracted topic keywords, most frequent first
    pub topics: Vec<String>,

    /// Sentences that look like durable facts
    pub facts: Vec<String>,

    /// Whether the window clears the save threshold
    pub should_save: bool,

    /// Human-readable explanation of the verdict
    pub reasoning: String,
}

/// One category rule: label plus trigger pattern
struct CategoryRule {
    label: &'static str,
    pattern: Regex,
}

/// The fixed, ordered category ruleset
///
/// First match wins; windows matching nothing fall back to `context`.
pub struct CategoryRules {
    rules: Vec<CategoryRule>,
}

impl CategoryRules {
    /// The canonical ruleset
    pub fn standard() -> Self {
        let rules = vec![
            (
                "user_preference",
                r"(?i)\b(i prefer|i like|i love|i hate|i enjoy|my favou?rite|i'?d rather|i usually|i always|i never)\b",
            ),
            (
                "fact",
                r"(?i)\b(my name is|i am|i'?m|i live in|i work (at|as|for)|i was born|years old|my (email|phone|timezone))\b",
            ),
            (
                "decision",
                r"(?i)\b((we|i) (decided|chose|agreed)|let'?s go with|final decision|we('| a)re going (with|to use)|settled on)\b",
            ),
            (
                "relationship",
                r"(?i)\bmy (wife|husband|partner|girlfriend|boyfriend|friend|brother|sister|mom|mother|dad|father|son|daughter|boss|colleague|roommate)\b",
            ),
            (
                "event",
                r"(?i)\b(yesterday|tomorrow|last (week|month|year)|next (week|month|year)|on (monday|tuesday|wednesday|thursday|friday|saturday|sunday)|meeting|appointment|birthday|anniversary|deadline)\b",
            ),
            (
                "knowledge",
                r"(?i)\b(did you know|fun fact|it turns out|apparently|the way (it|this|that) works|til\b)",
            ),
            (
                "reminder",
                r"(?i)\b(remind me|don'?t forget|remember to|make sure (i|to|we))\b",
            ),
            (
                "feedback",
                r"(?i)\b(you should|i wish you|that was (great|terrible|helpful|unhelpful|wrong|perfect)|good bot|bad bot|well done|nice work)\b",
            ),
        ];

        Self {
            rules: rules
                .into_iter()
                .map(|(label, pattern)| CategoryRule {
                    label,
                    // Patterns are static literals, compile cannot fail
                    pattern: Regex::new(pattern).unwrap(),
                })
                .collect(),
        }
    }

    /// First matching category, or `context`
    pub fn categorize(&self, text: &str) -> &'static str {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(text))
            .map(|rule| rule.label)
            .unwrap_or("context")
    }
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self::standard()
    }
}

const POSITIVE_WORDS: &[&str] = &[
    "love", "great", "awesome", "amazing", "excellent", "happy", "excited", "perfect", "thanks",
    "helpful", "wonderful", "enjoy",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "terrible", "awful", "angry", "sad", "frustrated", "annoying", "broken", "wrong",
    "useless", "worst", "horrible",
];

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "because", "before", "being", "below", "between", "could",
    "doing", "during", "every", "having", "other", "really", "should", "since", "still",
    "their", "there", "these", "thing", "things", "think", "though", "through", "today",
    "under", "until", "very", "want", "where", "which", "while", "would", "your",
];

/// Scores conversation windows against the canonical ruleset
pub struct DecisionEngine {
    gate: SettingsGate,
    rules: CategoryRules,
    embedding: Arc<EmbeddingGateway>,
    decision_pattern: Regex,
    preference_pattern: Regex,
    factual_pattern: Regex,
    emotional_pattern: Regex,
}

impl DecisionEngine {
    /// Create an engine reading thresholds from the gate and obtaining
    /// duplicate-check embeddings from the given gateway
    pub fn new(gate: SettingsGate, embedding: Arc<EmbeddingGateway>) -> Self {
        Self {
            gate,
            rules: CategoryRules::standard(),
            embedding,
            decision_pattern: Regex::new(
                r"(?i)\b(decided|decision|agreed|choose|chose|settled|final)\b",
            )
            .unwrap(),
            preference_pattern: Regex::new(
                r"(?i)\b(prefer|like|love|hate|favou?rite|rather|usually|always|never)\b",
            )
            .unwrap(),
            factual_pattern: Regex::new(
                r"(?i)\b(my name|i am|i'?m|i live|i work|i was born|years old)\b",
            )
            .unwrap(),
            emotional_pattern: Regex::new(
                r"(?i)\b(love|hate|amazing|terrible|excited|angry|sad|happy|frustrated|thrilled)\b",
            )
            .unwrap(),
        }
    }

    /// Score a window of messages; pure and deterministic
    pub fn score(&self, messages: &[ConversationMessage]) -> MemoryDecision {
        let settings = self.gate.snapshot();

        let text = messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n");

        let importance = self.importance_of(&text, messages);
        let category = self.rules.categorize(&text).to_string();
        let sentiment = sentiment_of(&text);
        let topics = topics_of(&text);
        let facts = self.facts_of(messages);

        let should_save = importance >= settings.decision_threshold;
        let reasoning = if should_save {
            format!(
                "importance {} meets threshold {} (category: {})",
                importance, settings.decision_threshold, category
            )
        } else {
            format!(
                "importance {} below threshold {}",
                importance, settings.decision_threshold
            )
        };

        MemoryDecision {
            importance,
            category,
            sentiment,
            topics,
            facts,
            should_save,
            reasoning,
        }
    }

    /// Weighted-signal importance, clamped to 0..=10
    fn importance_of(&self, text: &str, messages: &[ConversationMessage]) -> u8 {
        let mut score: i32 = 3;

        // Content length
        if text.len() > 500 {
            score += 2;
        } else if text.len() > 200 {
            score += 1;
        }

        // Language signals
        if self.decision_pattern.is_match(text) {
            score += 3;
        }
        if self.preference_pattern.is_match(text) {
            score += 2;
        }
        if self.factual_pattern.is_match(text) {
            score += 1;
        }
        if text.contains('?') {
            score += 1;
        }
        if self.emotional_pattern.is_match(text) {
            score += 1;
        }

        // Interaction shape
        let authors: std::collections::HashSet<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.author_id.as_str())
            .collect();
        if authors.len() > 1 {
            score += 1;
        }
        if messages.len() >= 5 {
            score += 1;
        }

        score.clamp(0, 10) as u8
    }

    /// Sentences that carry factual language
    fn facts_of(&self, messages: &[ConversationMessage]) -> Vec<String> {
        messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .flat_map(|m| m.text().split(['.', '\n']))
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty() && self.factual_pattern.is_match(sentence))
            .map(String::from)
            .take(5)
            .collect()
    }

    /// Find a stored near-duplicate of the candidate content, if any
    ///
    /// Embeds the content through the gateway and scans the store; a hit
    /// above `duplicate_threshold` means the content is already known.
    pub async fn find_duplicate(
        &self,
        content: &str,
        store: &dyn MemoryStore,
        owner_user_id: Option<&str>,
    ) -> MemoryResult<Option<SimilarityMatch>> {
        let embedding = self.embedding.embed(content).await?;
        self.find_duplicate_of(&embedding, store, owner_user_id)
            .await
    }

    /// Duplicate check against an already-computed embedding
    pub async fn find_duplicate_of(
        &self,
        embedding: &crate::embedding::Embedding,
        store: &dyn MemoryStore,
        owner_user_id: Option<&str>,
    ) -> MemoryResult<Option<SimilarityMatch>> {
        let settings = self.gate.snapshot();

        let mut query = SimilarityQuery::top_k(1).min_similarity(settings.duplicate_threshold);
        if let Some(owner) = owner_user_id {
            query = query.owner_user(owner);
        }

        let mut matches = store.find_similar(embedding, &query).await?;
        if let Some(best) = matches.first() {
            debug!(
                similarity = best.similarity,
                duplicate_of = %best.record.id,
                "candidate content duplicates an existing memory"
            );
        }
        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.remove(0))
        })
    }
}

fn sentiment_of(text: &str) -> Sentiment {
    let lower = text.to_lowercase();
    let positive = POSITIVE_WORDS
        .iter()
        .filter(|word| lower.contains(*word))
        .count();
    let negative = NEGATIVE_WORDS
        .iter()
        .filter(|word| lower.contains(*word))
        .count();

    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

/// Frequency-ranked topic keywords (up to five)
fn topics_of(text: &str) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();

    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.len() < 5 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(5).map(|(word, _)| word).collect()
}
