// SPDX-License-Identifier: MIT

//! Waiting for, classifying and answering replies

use async_trait::async_trait;

use super::{CLASSIFY_RESPONSE, HANDLE_OBJECTION, WAIT_FOR_RESPONSE};
use crate::collab::classifier::ResponseClass;
use crate::error::NodeError;
use crate::nurture::workflow::registry::{NodeContext, NodeHandler};
use crate::nurture::workflow::state::{StateUpdate, WorkflowState};

/// Label recorded when a reply objects without saying why
const UNSPECIFIED_OBJECTION: &str = "unspecified";

/// Checkpoint between delivery and reply. Changes nothing; the router
/// suspends here until a reply or a timeout is recorded.
pub struct WaitForResponseNode;

#[async_trait]
impl NodeHandler for WaitForResponseNode {
    fn name(&self) -> &str {
        WAIT_FOR_RESPONSE
    }

    async fn run(&self, state: &WorkflowState, _ctx: &NodeContext) -> Result<StateUpdate, NodeError> {
        if state.outreach_sent_at.is_none() {
            return Err(NodeError::validation(
                "waiting for a response but nothing was sent",
            ));
        }
        Ok(StateUpdate::default())
    }
}

pub struct ClassifyResponseNode;

#[async_trait]
impl NodeHandler for ClassifyResponseNode {
    fn name(&self) -> &str {
        CLASSIFY_RESPONSE
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> Result<StateUpdate, NodeError> {
        let reply = state
            .last_response
            .as_ref()
            .ok_or_else(|| NodeError::validation("no reply recorded to classify"))?;

        let analysis = ctx.collaborators.classifier.classify(&reply.content).await?;
        if !(0.0..=1.0).contains(&analysis.interest_level) {
            return Err(NodeError::validation(format!(
                "classifier returned interest_level {} outside [0, 1]",
                analysis.interest_level
            )));
        }

        log::info!(
            "Run {}: reply classified as {} (interest {:.2})",
            state.run_id,
            analysis.classification,
            analysis.interest_level
        );

        let mut update = StateUpdate {
            response_classification: Some(analysis.classification),
            ..Default::default()
        };
        if analysis.classification == ResponseClass::Unsubscribe {
            update.unsubscribed = Some(true);
        }
        update.response_analysis = Some(analysis);
        Ok(update)
    }
}

/// Records the objections and asks for a revised draft while the objection
/// budget lasts
pub struct HandleObjectionNode;

#[async_trait]
impl NodeHandler for HandleObjectionNode {
    fn name(&self) -> &str {
        HANDLE_OBJECTION
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> Result<StateUpdate, NodeError> {
        let mut objections = state
            .response_analysis
            .as_ref()
            .map(|a| a.objections.clone())
            .unwrap_or_default();
        if objections.is_empty() {
            objections.push(UNSPECIFIED_OBJECTION.to_string());
        }

        let budget_left = state.objection_handling_count < ctx.config.max_objection_cycles;
        log::info!(
            "Run {}: objection(s) {:?}, {} of {} revisions used",
            state.run_id,
            objections,
            state.objection_handling_count,
            ctx.config.max_objection_cycles
        );

        Ok(StateUpdate {
            objection_history: objections,
            revision_requested: budget_left.then_some(true),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::classifier::{ClassifiedResponse, ResponseClassifier};
    use crate::collab::Collaborators;
    use crate::error::CollaboratorError;
    use crate::nurture::workflow::nodes::fixtures;
    use crate::nurture::workflow::state::InboundReply;
    use chrono::Utc;
    use std::sync::Arc;

    struct OverexcitedClassifier;

    #[async_trait]
    impl ResponseClassifier for OverexcitedClassifier {
        async fn classify(&self, _text: &str) -> Result<ClassifiedResponse, CollaboratorError> {
            Ok(ClassifiedResponse {
                classification: ResponseClass::Positive,
                sentiment: "positive".into(),
                interest_level: 1.7,
                objections: vec![],
            })
        }
    }

    fn with_reply(text: &str) -> WorkflowState {
        let mut state = fixtures::state_at(CLASSIFY_RESPONSE);
        state.response_received = true;
        state.last_response = Some(InboundReply {
            content: text.into(),
            received_at: Utc::now(),
            source: "email".into(),
        });
        state
    }

    #[tokio::test]
    async fn test_wait_requires_sent_outreach() {
        let ctx = fixtures::context();
        let mut state = fixtures::state_at(WAIT_FOR_RESPONSE);
        assert!(WaitForResponseNode.run(&state, &ctx).await.is_err());

        state.outreach_sent_at = Some(Utc::now());
        assert!(WaitForResponseNode.run(&state, &ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_classify_positive_reply() {
        let update = ClassifyResponseNode
            .run(&with_reply("Sounds good, let's talk Tuesday"), &fixtures::context())
            .await
            .unwrap();
        assert_eq!(update.response_classification, Some(ResponseClass::Positive));
        assert_eq!(update.unsubscribed, None);
    }

    #[tokio::test]
    async fn test_classify_unsubscribe_sets_flag() {
        let update = ClassifyResponseNode
            .run(&with_reply("Please remove me from your list"), &fixtures::context())
            .await
            .unwrap();
        assert_eq!(update.response_classification, Some(ResponseClass::Unsubscribe));
        assert_eq!(update.unsubscribed, Some(true));
    }

    #[tokio::test]
    async fn test_out_of_range_interest_is_rejected() {
        let ctx = fixtures::context_with(
            Collaborators::builtin().with_classifier(Arc::new(OverexcitedClassifier)),
        );
        let err = ClassifyResponseNode
            .run(&with_reply("yes"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_objection_requests_revision_within_budget() {
        let ctx = fixtures::context();
        let mut state = fixtures::state_at(HANDLE_OBJECTION);
        state.response_analysis = Some(ClassifiedResponse {
            classification: ResponseClass::Objection,
            sentiment: "negative".into(),
            interest_level: 0.3,
            objections: vec!["price".into()],
        });

        let update = HandleObjectionNode.run(&state, &ctx).await.unwrap();
        assert_eq!(update.objection_history, vec!["price".to_string()]);
        assert_eq!(update.revision_requested, Some(true));

        state.objection_handling_count = ctx.config.max_objection_cycles;
        let update = HandleObjectionNode.run(&state, &ctx).await.unwrap();
        assert_eq!(update.revision_requested, None);
        assert_eq!(update.objection_history.len(), 1);
    }

    #[tokio::test]
    async fn test_objection_without_reason() {
        let update = HandleObjectionNode
            .run(&fixtures::state_at(HANDLE_OBJECTION), &fixtures::context())
            .await
            .unwrap();
        assert_eq!(update.objection_history, vec![UNSPECIFIED_OBJECTION.to_string()]);
    }
}
