// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use super::QUALIFY;
use crate::error::NodeError;
use crate::nurture::config::ScoringWeights;
use crate::nurture::workflow::registry::{NodeContext, NodeHandler};
use crate::nurture::workflow::state::{StateUpdate, WorkflowState};

/// Scores the lead. Whether the score is high enough is the router's call.
pub struct QualifyNode;

/// Weighted mean of fit, compliance urgency and contact completeness,
/// clamped to [0, 1].
pub fn qualification_score(state: &WorkflowState, weights: &ScoringWeights) -> f64 {
    let total = weights.fit + weights.compliance_urgency + weights.contact_completeness;
    if total <= 0.0 {
        return 0.0;
    }
    let weighted = weights.fit * state.lead.fit_score
        + weights.compliance_urgency * state.compliance_urgency_score
        + weights.contact_completeness * state.lead.contact_completeness();
    (weighted / total).clamp(0.0, 1.0)
}

#[async_trait]
impl NodeHandler for QualifyNode {
    fn name(&self) -> &str {
        QUALIFY
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> Result<StateUpdate, NodeError> {
        for (field, value) in [
            ("fit_score", state.lead.fit_score),
            ("compliance_urgency_score", state.compliance_urgency_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(NodeError::validation(format!(
                    "{} = {} is outside [0, 1]",
                    field, value
                )));
            }
        }

        let score = qualification_score(state, &ctx.config.scoring);
        log::info!(
            "Run {}: {} scored {:.3}",
            state.run_id,
            state.lead.company,
            score
        );

        Ok(StateUpdate {
            qualification_score: Some(score),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nurture::workflow::nodes::fixtures;

    #[tokio::test]
    async fn test_score_is_weighted_mean() {
        let state = fixtures::state_at(QUALIFY);
        let update = QualifyNode.run(&state, &fixtures::context()).await.unwrap();

        // 0.6 * 0.85 + 0.3 * 0.7 + 0.1 * 1.0
        let score = update.qualification_score.unwrap();
        assert!((score - 0.82).abs() < 1e-9, "got {}", score);
    }

    #[test]
    fn test_zero_weights_score_zero() {
        let state = fixtures::state_at(QUALIFY);
        let weights = ScoringWeights {
            fit: 0.0,
            compliance_urgency: 0.0,
            contact_completeness: 0.0,
        };
        assert_eq!(qualification_score(&state, &weights), 0.0);
    }

    #[tokio::test]
    async fn test_out_of_range_input_is_validation_error() {
        let mut state = fixtures::state_at(QUALIFY);
        state.lead.fit_score = 1.4;
        let err = QualifyNode.run(&state, &fixtures::context()).await.unwrap_err();
        assert!(matches!(err, NodeError::Validation(msg) if msg.contains("fit_score")));
    }
}
