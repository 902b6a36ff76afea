//! Error types for the context-window engine

use crate::context::token_budget::BudgetError;
use thiserror::Error;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    #[error("Reduction fault: {0}")]
    Reduction(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for ContextError {
    fn from(err: config::ConfigError) -> Self {
        ContextError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
