//! Context-window management with token budget enforcement
//!
//! Candidate messages flow through the [`ContextWindowManager`], which skips
//! work when the history already fits, runs the [`BudgetReducer`] chain when it
//! does not, and records the outcome per session in the [`WindowCache`].

pub mod manager;
pub mod models;
pub mod quality;
pub mod reducer;
pub mod token_budget;
pub mod token_estimator;
pub mod window_cache;

pub use manager::ContextWindowManager;
pub use models::{BudgetRequirement, CandidateMessage, ContextResult, MessageRole};
pub use quality::QualityScorer;
pub use reducer::{
    AgeBasedEviction, BudgetReducer, MessageTruncation, ReductionOutcome, ReductionStrategy,
    RelevanceFiltering, StageOutcome,
};
pub use token_budget::{BudgetError, TokenBudgetConfig};
pub use token_estimator::{CharRatioEstimator, TokenEstimator};
pub use window_cache::{Clock, ManualClock, SystemClock, WindowCache, WindowRecord, WindowStats};
