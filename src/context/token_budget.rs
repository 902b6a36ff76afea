//! Token budget configuration for the context window
//!
//! The engine's own ceiling is `max_tokens - reserve_tokens`; the reserve
//! leaves room for system instructions and the model's reply inside the
//! caller's absolute limit. A request's target is never allowed above it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token budget configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    /// Overall ceiling for this engine's output before the reserve
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Tokens held back for instructions and the reply
    #[serde(default = "default_reserve_tokens")]
    pub reserve_tokens: usize,

    /// Soft cap on retained messages; logged, not enforced
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Minimum relevance considered worth keeping; logged, not enforced
    #[serde(default = "default_priority_threshold")]
    pub priority_threshold: f32,

    /// Messages above this size are candidates for truncation
    #[serde(default = "default_max_tokens_per_message")]
    pub max_tokens_per_message: usize,
}

fn default_max_tokens() -> usize {
    1200
}

fn default_reserve_tokens() -> usize {
    200
}

fn default_max_messages() -> usize {
    10
}

fn default_priority_threshold() -> f32 {
    0.3
}

fn default_max_tokens_per_message() -> usize {
    150
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            reserve_tokens: default_reserve_tokens(),
            max_messages: default_max_messages(),
            priority_threshold: default_priority_threshold(),
            max_tokens_per_message: default_max_tokens_per_message(),
        }
    }
}

impl TokenBudgetConfig {
    /// Validate that the budget configuration is consistent
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.reserve_tokens >= self.max_tokens {
            return Err(BudgetError::ConfigurationInvalid {
                reserve: self.reserve_tokens,
                max: self.max_tokens,
            });
        }

        if !(0.0..=1.0).contains(&self.priority_threshold) {
            return Err(BudgetError::InvalidThreshold(self.priority_threshold));
        }

        if self.max_tokens_per_message == 0 {
            return Err(BudgetError::InvalidCap);
        }

        Ok(())
    }

    /// Tokens available to history once the reserve is held back
    pub fn available_tokens(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserve_tokens)
    }

    /// Target actually handed to the reducer for a requested ceiling
    pub fn effective_target(&self, requested: usize) -> usize {
        requested.min(self.available_tokens())
    }
}

/// Token budget errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BudgetError {
    #[error("Configuration invalid: reserve of {reserve} tokens leaves nothing of {max} max")]
    ConfigurationInvalid { reserve: usize, max: usize },

    #[error("Priority threshold {0} outside 0.0-1.0")]
    InvalidThreshold(f32),

    #[error("Per-message token cap must be positive")]
    InvalidCap,
}
