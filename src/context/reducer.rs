//! Budget reducer: an ordered chain of reduction strategies
//!
//! Each strategy takes the current message set and shrinks it toward the
//! target. The chain stops as soon as the set fits. Every strategy keeps the
//! surviving messages in their input order; sorting is only used to pick
//! which message goes next.
//!
//! No eviction strategy ever removes the last message, so a non-empty input
//! always yields a non-empty output, possibly above target.

use super::models::CandidateMessage;
use super::quality::QualityScorer;
use super::token_estimator::TokenEstimator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Appended to any message shortened by [`MessageTruncation`]
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Separator between stage names in a strategy chain
pub const STRATEGY_SEPARATOR: &str = "+";

/// Reported when the set is over target but no stage could make progress
pub const STRATEGY_UNREDUCIBLE: &str = "unreducible";

/// Result of running one strategy
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub messages: Vec<CandidateMessage>,
    pub tokens_removed: usize,
    pub messages_removed: usize,
}

/// One reduce-to-target step of the chain
pub trait ReductionStrategy: Send + Sync {
    /// Stable name recorded in the strategy chain
    fn name(&self) -> &'static str;

    /// Whether this strategy could shrink `messages` at all
    fn can_reduce(&self, messages: &[CandidateMessage], _estimator: &dyn TokenEstimator) -> bool {
        messages.len() > 1
    }

    /// Shrink `messages` toward `target_tokens`
    fn reduce(
        &self,
        messages: Vec<CandidateMessage>,
        target_tokens: usize,
        estimator: &dyn TokenEstimator,
    ) -> StageOutcome;
}

/// Drops messages in `victims` order (worst first) until the set fits or a
/// single message is left, then returns the survivors in input order.
fn evict_until_fit(
    messages: Vec<CandidateMessage>,
    mut victims: impl Iterator<Item = usize>,
    target_tokens: usize,
    estimator: &dyn TokenEstimator,
) -> StageOutcome {
    let tokens: Vec<usize> = messages.iter().map(|m| estimator.estimate(&m.content)).collect();
    let mut total: usize = tokens.iter().sum();
    let mut keep = vec![true; messages.len()];
    let mut remaining = messages.len();
    let mut tokens_removed = 0;

    while remaining > 1 && total > target_tokens {
        let Some(idx) = victims.next() else { break };
        keep[idx] = false;
        remaining -= 1;
        total -= tokens[idx];
        tokens_removed += tokens[idx];
    }

    let messages_removed = messages.len() - remaining;
    let messages = messages
        .into_iter()
        .zip(keep)
        .filter_map(|(m, kept)| kept.then_some(m))
        .collect();

    StageOutcome {
        messages,
        tokens_removed,
        messages_removed,
    }
}

/// Indices ordered by relevance, highest first; ties keep input order
fn by_relevance_desc(messages: &[CandidateMessage]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..messages.len()).collect();
    order.sort_by(|&a, &b| {
        messages[b]
            .relevance_score
            .total_cmp(&messages[a].relevance_score)
    });
    order
}

/// Drops the lowest-relevance messages first.
///
/// Among equal relevance the later-positioned message is dropped first.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceFiltering;

impl ReductionStrategy for RelevanceFiltering {
    fn name(&self) -> &'static str {
        "relevance_filtering"
    }

    fn reduce(
        &self,
        messages: Vec<CandidateMessage>,
        target_tokens: usize,
        estimator: &dyn TokenEstimator,
    ) -> StageOutcome {
        let order = by_relevance_desc(&messages);
        evict_until_fit(messages, order.into_iter().rev(), target_tokens, estimator)
    }
}

/// Shortens messages above a per-message cap, proportionally to their size
#[derive(Debug, Clone, Copy)]
pub struct MessageTruncation {
    pub max_tokens_per_message: usize,
}

impl MessageTruncation {
    pub fn new(max_tokens_per_message: usize) -> Self {
        Self {
            max_tokens_per_message,
        }
    }

    /// Truncated copy of `message`, or `None` when that would not shrink it
    fn truncate(
        &self,
        message: &CandidateMessage,
        tokens: usize,
        estimator: &dyn TokenEstimator,
    ) -> Option<(CandidateMessage, usize)> {
        let chars = message.content.chars().count();
        let keep = chars * self.max_tokens_per_message / tokens;

        let mut content: String = message.content.chars().take(keep).collect();
        content.push_str(TRUNCATION_MARKER);

        let new_tokens = estimator.estimate(&content);
        if new_tokens >= tokens {
            return None;
        }

        let truncated = CandidateMessage {
            content,
            ..message.clone()
        };
        Some((truncated, new_tokens))
    }
}

impl Default for MessageTruncation {
    fn default() -> Self {
        Self::new(150)
    }
}

impl ReductionStrategy for MessageTruncation {
    fn name(&self) -> &'static str {
        "message_truncation"
    }

    fn can_reduce(&self, messages: &[CandidateMessage], estimator: &dyn TokenEstimator) -> bool {
        messages
            .iter()
            .any(|m| estimator.estimate(&m.content) > self.max_tokens_per_message)
    }

    fn reduce(
        &self,
        mut messages: Vec<CandidateMessage>,
        target_tokens: usize,
        estimator: &dyn TokenEstimator,
    ) -> StageOutcome {
        let mut total = estimator.estimate_messages(&messages);
        let mut tokens_removed = 0;

        for idx in by_relevance_desc(&messages) {
            if total <= target_tokens {
                break;
            }

            let tokens = estimator.estimate(&messages[idx].content);
            if tokens <= self.max_tokens_per_message {
                continue;
            }

            if let Some((truncated, new_tokens)) =
                self.truncate(&messages[idx], tokens, estimator)
            {
                debug!(
                    "Truncated message {}: {} -> {} tokens",
                    truncated.id, tokens, new_tokens
                );
                messages[idx] = truncated;
                total -= tokens - new_tokens;
                tokens_removed += tokens - new_tokens;
            }
        }

        StageOutcome {
            messages,
            tokens_removed,
            messages_removed: 0,
        }
    }
}

/// Drops the oldest messages first.
///
/// Stable newest-first sort with eviction from the tail, so among equal
/// timestamps the later-positioned message goes first, as in
/// [`RelevanceFiltering`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AgeBasedEviction;

impl ReductionStrategy for AgeBasedEviction {
    fn name(&self) -> &'static str {
        "age_based_eviction"
    }

    fn reduce(
        &self,
        messages: Vec<CandidateMessage>,
        target_tokens: usize,
        estimator: &dyn TokenEstimator,
    ) -> StageOutcome {
        let mut order: Vec<usize> = (0..messages.len()).collect();
        order.sort_by(|&a, &b| messages[b].timestamp.cmp(&messages[a].timestamp));
        evict_until_fit(messages, order.into_iter().rev(), target_tokens, estimator)
    }
}

/// Everything the reducer reports about one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReductionOutcome {
    pub messages: Vec<CandidateMessage>,
    pub original_tokens: usize,
    pub total_tokens: usize,
    pub tokens_removed: usize,
    pub messages_removed: usize,
    /// Names of the stages actually invoked, in order
    pub stages: Vec<String>,
    pub quality_before: f32,
    pub quality_after: f32,
    pub quality_impact: f32,
}

impl ReductionOutcome {
    /// Stage names joined for observability
    pub fn strategy(&self) -> String {
        if self.stages.is_empty() {
            STRATEGY_UNREDUCIBLE.to_string()
        } else {
            self.stages.join(STRATEGY_SEPARATOR)
        }
    }
}

/// Runs the configured strategies in order until the set fits
pub struct BudgetReducer {
    strategies: Vec<Box<dyn ReductionStrategy>>,
    estimator: Arc<dyn TokenEstimator>,
    scorer: QualityScorer,
}

impl BudgetReducer {
    /// Standard chain: relevance filtering, truncation, age-based eviction
    pub fn new(estimator: Arc<dyn TokenEstimator>, max_tokens_per_message: usize) -> Self {
        Self::with_strategies(
            estimator,
            vec![
                Box::new(RelevanceFiltering),
                Box::new(MessageTruncation::new(max_tokens_per_message)),
                Box::new(AgeBasedEviction),
            ],
        )
    }

    /// Custom chain, run in the given order
    pub fn with_strategies(
        estimator: Arc<dyn TokenEstimator>,
        strategies: Vec<Box<dyn ReductionStrategy>>,
    ) -> Self {
        Self {
            strategies,
            estimator,
            scorer: QualityScorer::default(),
        }
    }

    /// Names of the configured strategies, in run order
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Shrink `messages` to fit `target_tokens`
    pub fn reduce(
        &self,
        messages: Vec<CandidateMessage>,
        target_tokens: usize,
    ) -> ReductionOutcome {
        let estimator = self.estimator.as_ref();
        let original_tokens = estimator.estimate_messages(&messages);
        let original_count = messages.len();
        let quality_before = self.scorer.score(&messages);

        let mut current = messages;
        let mut total = original_tokens;
        let mut stages = Vec::new();

        for strategy in &self.strategies {
            if total <= target_tokens {
                break;
            }
            if !strategy.can_reduce(&current, estimator) {
                debug!("Skipping {}: nothing it can reduce", strategy.name());
                continue;
            }

            let outcome = strategy.reduce(current, target_tokens, estimator);
            current = outcome.messages;
            total = estimator.estimate_messages(&current);
            stages.push(strategy.name().to_string());

            debug!(
                "{} removed {} tokens and {} messages, {} tokens left (target {})",
                strategy.name(),
                outcome.tokens_removed,
                outcome.messages_removed,
                total,
                target_tokens
            );
        }

        if total > target_tokens && !current.is_empty() {
            warn!(
                "Context still over budget after reduction: {} > {} with {} message(s)",
                total,
                target_tokens,
                current.len()
            );
        }

        let quality_after = self.scorer.score(&current);
        let quality_impact = self.scorer.impact(quality_before, quality_after);

        ReductionOutcome {
            original_tokens,
            total_tokens: total,
            tokens_removed: original_tokens.saturating_sub(total),
            messages_removed: original_count.saturating_sub(current.len()),
            messages: current,
            stages,
            quality_before,
            quality_after,
            quality_impact,
        }
    }
}
