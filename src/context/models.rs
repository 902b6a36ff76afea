//! Data models for context-window management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Strategy tag for results that needed no reduction
pub const STRATEGY_NONE: &str = "no optimization needed";
/// Strategy tag for the conservative fallback result
pub const STRATEGY_FALLBACK: &str = "minimal fallback";
/// Quality reported for fallback results
pub const FALLBACK_QUALITY: f32 = 0.3;

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A prior conversation turn under consideration for the context window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMessage {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Topical relevance to the current query (0.0-1.0)
    #[serde(default)]
    pub relevance_score: f32,
    /// Demonstrated engagement (0.0-1.0)
    #[serde(default)]
    pub engagement_score: f32,
    /// Keyword/technical overlap with the current query (0.0-1.0)
    #[serde(default)]
    pub technical_overlap: f32,
}

impl CandidateMessage {
    /// Create a message with a fresh id, stamped now, scores clamped
    pub fn new(
        role: MessageRole,
        content: impl Into<String>,
        relevance_score: f32,
        engagement_score: f32,
        technical_overlap: f32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            relevance_score,
            engagement_score,
            technical_overlap,
        }
        .normalized()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Clamp every score into [0, 1]; non-finite scores become 0
    pub fn normalized(mut self) -> Self {
        self.relevance_score = clamp_score(self.relevance_score);
        self.engagement_score = clamp_score(self.engagement_score);
        self.technical_overlap = clamp_score(self.technical_overlap);
        self
    }
}

fn clamp_score(score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Token ceiling and category metadata produced by the classification stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRequirement {
    pub target_tokens: usize,
    #[serde(default = "default_requires_history")]
    pub requires_history: bool,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_requires_history() -> bool {
    true
}

impl BudgetRequirement {
    pub fn new(target_tokens: usize) -> Self {
        Self {
            target_tokens,
            requires_history: true,
            category: None,
        }
    }
}

/// Outcome of one context-window optimisation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextResult {
    /// Surviving messages in their original relative order
    pub messages: Vec<CandidateMessage>,
    pub total_tokens: usize,
    pub original_tokens: usize,
    /// Strategy, or `+`-joined chain of strategies, that produced this result
    pub strategy: String,
    /// Composite quality of `messages` (0.0-1.0)
    pub quality_score: f32,
    /// Relative quality drop against the candidate set; negative when
    /// reduction removed below-average messages
    pub quality_impact: f32,
    pub tokens_removed: usize,
    pub messages_removed: usize,
}

impl ContextResult {
    pub fn is_fallback(&self) -> bool {
        self.strategy == STRATEGY_FALLBACK
    }
}
