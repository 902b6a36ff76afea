//! Token estimation

use super::models::CandidateMessage;

/// Characters per token assumed by [`CharRatioEstimator`]
pub const CHARS_PER_TOKEN: usize = 4;

/// Token estimator trait for different tokenization strategies
///
/// Budget thresholds are tuned against [`CharRatioEstimator`]; swapping in a
/// real tokenizer changes what every threshold means.
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate the tokens of a whole message set
    fn estimate_messages(&self, messages: &[CandidateMessage]) -> usize {
        messages.iter().map(|m| self.estimate(&m.content)).sum()
    }
}

/// `ceil(chars / 4)` approximation; the estimator used across the pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct CharRatioEstimator;

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}
