//! Composite quality scoring for message sets

use super::models::CandidateMessage;

/// Weighted blend of mean relevance, engagement and technical overlap
#[derive(Debug, Clone, Copy)]
pub struct QualityScorer {
    pub relevance_weight: f32,
    pub engagement_weight: f32,
    pub overlap_weight: f32,
}

impl Default for QualityScorer {
    /// Weights: relevance (50%), engagement (30%), technical overlap (20%)
    fn default() -> Self {
        Self {
            relevance_weight: 0.5,
            engagement_weight: 0.3,
            overlap_weight: 0.2,
        }
    }
}

impl QualityScorer {
    /// Score a message set; 0 for an empty set
    pub fn score(&self, messages: &[CandidateMessage]) -> f32 {
        if messages.is_empty() {
            return 0.0;
        }

        let n = messages.len() as f32;
        let (relevance, engagement, overlap) =
            messages.iter().fold((0.0f32, 0.0f32, 0.0f32), |acc, m| {
                (
                    acc.0 + m.relevance_score,
                    acc.1 + m.engagement_score,
                    acc.2 + m.technical_overlap,
                )
            });

        let total = self.relevance_weight * (relevance / n)
            + self.engagement_weight * (engagement / n)
            + self.overlap_weight * (overlap / n);
        total.clamp(0.0, 1.0)
    }

    /// Relative quality drop `(before - after) / before`; 0 when `before` is 0
    pub fn impact(&self, quality_before: f32, quality_after: f32) -> f32 {
        if quality_before <= 0.0 {
            return 0.0;
        }
        (quality_before - quality_after) / quality_before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::models::MessageRole;

    fn msg(relevance: f32, engagement: f32, overlap: f32) -> CandidateMessage {
        CandidateMessage::new(MessageRole::User, "text", relevance, engagement, overlap)
    }

    #[test]
    fn test_empty_set_scores_zero() {
        assert_eq!(QualityScorer::default().score(&[]), 0.0);
    }

    #[test]
    fn test_weighted_means() {
        let scorer = QualityScorer::default();
        let messages = vec![msg(1.0, 0.0, 0.0), msg(0.0, 1.0, 1.0)];
        // 0.5*0.5 + 0.3*0.5 + 0.2*0.5
        assert!((scorer.score(&messages) - 0.5).abs() < 1e-6);

        let perfect = vec![msg(1.0, 1.0, 1.0)];
        assert!((scorer.score(&perfect) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_impact() {
        let scorer = QualityScorer::default();
        let before = vec![msg(1.0, 1.0, 1.0), msg(0.0, 0.0, 0.0)];
        let after = vec![msg(1.0, 1.0, 1.0)];
        // dropping a zero-score message raises quality: negative impact
        let (q_before, q_after) = (scorer.score(&before), scorer.score(&after));
        assert!(scorer.impact(q_before, q_after) < 0.0);
        assert!((scorer.impact(q_after, q_before) - 0.5).abs() < 1e-6);
        assert_eq!(scorer.impact(0.0, 0.4), 0.0);
    }
}
