//! Context-window manager: the public entry point
//!
//! Skips work when the candidates already fit, otherwise runs the budget
//! reducer under the effective target and caches the outcome per session.
//! Internal faults never reach the caller: they are logged and replaced by a
//! minimal fallback holding the single most relevant message.

use super::models::{
    BudgetRequirement, CandidateMessage, ContextResult, FALLBACK_QUALITY, STRATEGY_FALLBACK,
    STRATEGY_NONE,
};
use super::quality::QualityScorer;
use super::reducer::BudgetReducer;
use super::token_budget::TokenBudgetConfig;
use super::token_estimator::{CharRatioEstimator, TokenEstimator};
use super::window_cache::{WindowCache, WindowRecord, WindowStats};
use crate::config::{Config, WindowCacheConfig};
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Context-window manager
pub struct ContextWindowManager {
    budget: TokenBudgetConfig,
    estimator: Arc<dyn TokenEstimator>,
    reducer: BudgetReducer,
    scorer: QualityScorer,
    cache: Arc<WindowCache>,
    sweep_interval: std::time::Duration,
}

impl ContextWindowManager {
    /// Create a manager with the standard reduction chain
    pub fn new(budget: TokenBudgetConfig, cache: Arc<WindowCache>) -> Result<Self> {
        Self::with_estimator(budget, cache, Arc::new(CharRatioEstimator))
    }

    /// Create a manager with a custom estimator shared by every stage
    pub fn with_estimator(
        budget: TokenBudgetConfig,
        cache: Arc<WindowCache>,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Result<Self> {
        budget.validate()?;
        let reducer = BudgetReducer::new(estimator.clone(), budget.max_tokens_per_message);

        Ok(Self {
            budget,
            estimator,
            reducer,
            scorer: QualityScorer::default(),
            cache,
            sweep_interval: WindowCacheConfig::default().sweep_interval(),
        })
    }

    /// Create with default budget and a 30 minute window cache
    pub fn with_defaults() -> Result<Self> {
        Self::from_config(&Config::default())
    }

    /// Create from loaded configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(WindowCache::new(config.window_cache.ttl()?));
        Ok(Self::new(config.token_budget.clone(), cache)?
            .with_sweep_interval(config.window_cache.sweep_interval()))
    }

    /// Period used by [`spawn_sweeper`](Self::spawn_sweeper)
    pub fn with_sweep_interval(mut self, every: std::time::Duration) -> Self {
        self.sweep_interval = every;
        self
    }

    /// Replace the reduction chain
    pub fn with_reducer(mut self, reducer: BudgetReducer) -> Self {
        self.reducer = reducer;
        self
    }

    /// Fit `candidates` into the requirement's token budget.
    ///
    /// Never fails: internal faults yield the minimal fallback.
    pub fn manage(
        &self,
        session_id: &str,
        candidates: Vec<CandidateMessage>,
        requirement: &BudgetRequirement,
    ) -> ContextResult {
        let candidates: Vec<CandidateMessage> =
            candidates.into_iter().map(CandidateMessage::normalized).collect();

        if !requirement.requires_history {
            debug!(
                "Session {} requirement does not need history; managing {} candidates anyway",
                session_id,
                candidates.len()
            );
        }

        let best = most_relevant(&candidates).cloned();
        let candidate_count = candidates.len();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.optimize(session_id, candidates, requirement)
        }));

        let err = match outcome {
            Ok(Ok(result)) => return result,
            Ok(Err(e)) => e,
            Err(payload) => ContextError::Internal(panic_message(payload.as_ref())),
        };

        error!(
            "Context optimization failed for session {}, using minimal fallback: {}",
            session_id, err
        );
        METRICS.record_request("fallback");
        self.minimal_fallback(best, candidate_count)
    }

    fn optimize(
        &self,
        session_id: &str,
        candidates: Vec<CandidateMessage>,
        requirement: &BudgetRequirement,
    ) -> Result<ContextResult> {
        let original_tokens = self.estimator.estimate_messages(&candidates);

        if original_tokens <= requirement.target_tokens {
            debug!(
                "Session {}: {} tokens within target {}, no optimization needed",
                session_id, original_tokens, requirement.target_tokens
            );
            METRICS.record_request("passthrough");
            return Ok(ContextResult {
                quality_score: self.scorer.score(&candidates),
                messages: candidates,
                total_tokens: original_tokens,
                original_tokens,
                strategy: STRATEGY_NONE.to_string(),
                quality_impact: 0.0,
                tokens_removed: 0,
                messages_removed: 0,
            });
        }

        let target = self.budget.effective_target(requirement.target_tokens);
        let candidate_count = candidates.len();
        let outcome = self.reducer.reduce(candidates, target);

        if outcome.total_tokens > outcome.original_tokens
            || outcome.messages.len() > candidate_count
        {
            return Err(ContextError::Reduction(format!(
                "reduction grew the context: {} -> {} tokens, {} -> {} messages",
                outcome.original_tokens,
                outcome.total_tokens,
                candidate_count,
                outcome.messages.len()
            )));
        }
        if candidate_count > 0 && outcome.messages.is_empty() {
            return Err(ContextError::Reduction(
                "reduction removed every message".to_string(),
            ));
        }

        if outcome.messages.len() > self.budget.max_messages {
            debug!(
                "Session {}: {} messages retained, above soft cap of {}",
                session_id,
                outcome.messages.len(),
                self.budget.max_messages
            );
        }
        let below_threshold = outcome
            .messages
            .iter()
            .filter(|m| m.relevance_score < self.budget.priority_threshold)
            .count();
        if below_threshold > 0 {
            debug!(
                "Session {}: {} retained message(s) below priority threshold {}",
                session_id, below_threshold, self.budget.priority_threshold
            );
        }

        METRICS.record_reduction(&outcome.stages, outcome.tokens_removed, outcome.quality_impact);
        METRICS.record_request("reduced");

        let result = ContextResult {
            strategy: outcome.strategy(),
            messages: outcome.messages,
            total_tokens: outcome.total_tokens,
            original_tokens: outcome.original_tokens,
            quality_score: outcome.quality_after,
            quality_impact: outcome.quality_impact,
            tokens_removed: outcome.tokens_removed,
            messages_removed: outcome.messages_removed,
        };

        info!(
            "Session {}: reduced context from {} to {} tokens (target {}) via {}",
            session_id, result.original_tokens, result.total_tokens, target, result.strategy
        );

        self.cache.put(session_id, result.clone(), target);
        Ok(result)
    }

    /// Most relevant candidate alone, or nothing when there were no candidates
    fn minimal_fallback(
        &self,
        best: Option<CandidateMessage>,
        candidate_count: usize,
    ) -> ContextResult {
        let messages: Vec<CandidateMessage> = best.into_iter().collect();
        let total_tokens = messages.iter().map(|m| self.safe_estimate(&m.content)).sum();

        ContextResult {
            messages_removed: candidate_count.saturating_sub(messages.len()),
            messages,
            total_tokens,
            // candidates were not measured; only the survivor is
            original_tokens: total_tokens,
            strategy: STRATEGY_FALLBACK.to_string(),
            quality_score: FALLBACK_QUALITY,
            quality_impact: 0.0,
            tokens_removed: 0,
        }
    }

    fn safe_estimate(&self, text: &str) -> usize {
        panic::catch_unwind(AssertUnwindSafe(|| self.estimator.estimate(text)))
            .unwrap_or_else(|_| CharRatioEstimator.estimate(text))
    }

    /// Live cached window for a session
    pub fn cached(&self, session_id: &str) -> Option<WindowRecord> {
        self.cache.get(session_id)
    }

    /// Drop a session's cached window when the conversation ends
    pub fn end_session(&self, session_id: &str) -> bool {
        self.cache.clear(session_id)
    }

    /// Sweep expired windows on the tokio runtime at the configured interval
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.cache.spawn_sweeper(self.sweep_interval)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        self.sweep_interval
    }

    pub fn stats(&self) -> WindowStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &Arc<WindowCache> {
        &self.cache
    }

    pub fn budget(&self) -> &TokenBudgetConfig {
        &self.budget
    }
}

/// First message with the highest relevance
fn most_relevant(candidates: &[CandidateMessage]) -> Option<&CandidateMessage> {
    candidates.iter().reduce(|best, m| {
        if m.relevance_score > best.relevance_score {
            m
        } else {
            best
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::MessageRole;
    use crate::context::reducer::{ReductionStrategy, StageOutcome};
    use crate::context::window_cache::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    fn msg(id: &str, tokens: usize, relevance: f32) -> CandidateMessage {
        CandidateMessage::new(MessageRole::Assistant, "y".repeat(tokens * 4), relevance, 0.4, 0.2)
            .with_id(id)
    }

    fn manager() -> (ContextWindowManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
        let cache = Arc::new(WindowCache::with_clock(Duration::minutes(30), clock.clone()));
        let manager = ContextWindowManager::new(TokenBudgetConfig::default(), cache).unwrap();
        (manager, clock)
    }

    struct PanickingStrategy;

    impl ReductionStrategy for PanickingStrategy {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn reduce(
            &self,
            _: Vec<CandidateMessage>,
            _: usize,
            _: &dyn TokenEstimator,
        ) -> StageOutcome {
            panic!("strategy blew up");
        }
    }

    struct DuplicatingStrategy;

    impl ReductionStrategy for DuplicatingStrategy {
        fn name(&self) -> &'static str {
            "duplicating"
        }

        fn reduce(
            &self,
            messages: Vec<CandidateMessage>,
            _: usize,
            _: &dyn TokenEstimator,
        ) -> StageOutcome {
            let mut doubled = messages.clone();
            doubled.extend(messages);
            StageOutcome {
                messages: doubled,
                tokens_removed: 0,
                messages_removed: 0,
            }
        }
    }

    #[test]
    fn test_passthrough_returns_input_unchanged() {
        let (manager, _) = manager();
        let candidates = vec![msg("a", 50, 0.3), msg("b", 50, 0.9)];

        let result = manager.manage("s1", candidates.clone(), &BudgetRequirement::new(100));
        assert_eq!(result.strategy, STRATEGY_NONE);
        assert_eq!(result.messages, candidates);
        assert_eq!(result.total_tokens, 100);
        // passthrough is not cached
        assert!(manager.cached("s1").is_none());
    }

    #[test]
    fn test_reduction_is_cached_with_effective_target() {
        let (manager, _) = manager();
        let candidates: Vec<_> =
            (0..6).map(|i| msg(&i.to_string(), 300, i as f32 / 10.0)).collect();

        // requirement above the 1000-token available budget gets capped
        let result = manager.manage("s1", candidates, &BudgetRequirement::new(1500));
        assert!(result.total_tokens <= 1000);
        assert_eq!(result.strategy, "relevance_filtering");
        assert_eq!(result.messages.len(), 3);

        let record = manager.cached("s1").unwrap();
        assert_eq!(record.target_tokens, 1000);
        assert_eq!(record.result, result);
        assert!((record.utilization - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_panic_yields_minimal_fallback() {
        let (manager, _) = manager();
        let manager = manager.with_reducer(BudgetReducer::with_strategies(
            Arc::new(CharRatioEstimator),
            vec![Box::new(PanickingStrategy)],
        ));
        let candidates = vec![msg("a", 500, 0.4), msg("b", 500, 0.9), msg("c", 500, 0.9)];

        let result = manager.manage("s1", candidates, &BudgetRequirement::new(200));
        assert!(result.is_fallback());
        assert_eq!(result.quality_score, FALLBACK_QUALITY);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].id, "b");
        assert_eq!(result.messages_removed, 2);
        assert!(manager.cached("s1").is_none());
    }

    #[test]
    fn test_growing_reduction_is_a_fault() {
        let (manager, _) = manager();
        let manager = manager.with_reducer(BudgetReducer::with_strategies(
            Arc::new(CharRatioEstimator),
            vec![Box::new(DuplicatingStrategy)],
        ));
        let candidates = vec![msg("a", 500, 0.4), msg("b", 500, 0.2)];

        let result = manager.manage("s1", candidates, &BudgetRequirement::new(200));
        assert!(result.is_fallback());
        assert_eq!(result.messages[0].id, "a");
    }

    #[test]
    fn test_fallback_without_candidates_is_empty() {
        let (manager, _) = manager();
        let result = manager.minimal_fallback(None, 0);
        assert!(result.messages.is_empty());
        assert_eq!(result.total_tokens, 0);
        assert_eq!(result.strategy, STRATEGY_FALLBACK);
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        let (manager, _) = manager();
        let mut wild = msg("a", 10, 0.5);
        wild.relevance_score = 7.0;
        wild.engagement_score = f32::NAN;

        let result = manager.manage("s1", vec![wild], &BudgetRequirement::new(100));
        assert_eq!(result.messages[0].relevance_score, 1.0);
        assert_eq!(result.messages[0].engagement_score, 0.0);
        assert!(result.quality_score <= 1.0);
    }

    #[test]
    fn test_end_session_clears_cache() {
        let (manager, clock) = manager();
        let candidates = vec![msg("a", 800, 0.5), msg("b", 800, 0.6)];
        manager.manage("s1", candidates, &BudgetRequirement::new(900));
        assert_eq!(manager.stats().active_count, 1);

        assert!(manager.end_session("s1"));
        assert_eq!(manager.stats().active_count, 0);

        let candidates = vec![msg("a", 800, 0.5), msg("b", 800, 0.6)];
        manager.manage("s2", candidates, &BudgetRequirement::new(900));
        clock.advance(Duration::minutes(31));
        assert!(manager.cached("s2").is_none());
    }

    #[test]
    fn test_oversized_expiration_is_a_configuration_error() {
        let mut config = Config::default();
        config.window_cache.expiration_minutes = 200_000_000_000;
        assert!(matches!(
            ContextWindowManager::from_config(&config),
            Err(ContextError::Configuration(_))
        ));

        config.window_cache.expiration_minutes = crate::config::MAX_EXPIRATION_MINUTES;
        let manager = ContextWindowManager::from_config(&config).unwrap();
        let candidates = vec![msg("a", 500, 0.4), msg("b", 500, 0.9), msg("c", 500, 0.2)];
        let result = manager.manage("s1", candidates, &BudgetRequirement::new(600));
        assert!(!result.is_fallback());
        assert_eq!(result.messages[0].id, "b");
        assert!(manager.cached("s1").is_some());
    }

    #[test]
    fn test_sweep_interval_comes_from_config() {
        let mut config = Config::default();
        config.window_cache.sweep_interval_secs = 42;
        let manager = ContextWindowManager::from_config(&config).unwrap();
        assert_eq!(manager.sweep_interval(), std::time::Duration::from_secs(42));
    }

    #[test]
    fn test_invalid_budget_is_rejected() {
        let cache = Arc::new(WindowCache::new(Duration::minutes(30)));
        let budget = TokenBudgetConfig {
            reserve_tokens: 5000,
            ..Default::default()
        };
        assert!(matches!(
            ContextWindowManager::new(budget, cache),
            Err(ContextError::Budget(_))
        ));
    }
}
