//! Context-window budgeting engine
//!
//! Takes a set of prior conversation turns that an upstream stage has already
//! scored for relevance, and decides which of them (and in what truncated form)
//! fit under a token ceiling. Selection is closed-form and deterministic: no
//! model is consulted, only the scores and string lengths attached to each
//! candidate message.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use context::{
    BudgetRequirement, CandidateMessage, ContextResult, ContextWindowManager, MessageRole,
    WindowCache, WindowStats,
};
pub use error::{ContextError, Result};
