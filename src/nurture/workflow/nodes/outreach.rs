// SPDX-License-Identifier: MIT

//! Drafting, review and delivery of outreach messages

use async_trait::async_trait;
use futures::future::try_join_all;

use super::{DRAFT_OUTREACH, FOLLOW_UP, HUMAN_REVIEW, SEND_OUTREACH};
use crate::collab::draft::{Draft, DraftContext, OutreachKind};
use crate::collab::research::ResearchFindings;
use crate::collab::sender::Channel;
use crate::error::NodeError;
use crate::nurture::workflow::registry::{NodeContext, NodeHandler};
use crate::nurture::workflow::state::{OutreachRecord, StateUpdate, WorkflowState};

fn draft_context(state: &WorkflowState, kind: OutreachKind, research: ResearchFindings) -> DraftContext {
    DraftContext {
        tenant_id: state.tenant_id.clone(),
        company: state.lead.company.clone(),
        contact_name: state.lead.contact_name.clone(),
        industry: state.lead.industry.clone(),
        kind,
        research,
        objections: state.objection_history.clone(),
        followup_number: state.followup_count + 1,
        previous_subject: state.outreach_draft.as_ref().map(|d| d.subject.clone()),
    }
}

/// Email when we have an address, SMS when we only have a phone number
fn pick_channel(state: &WorkflowState) -> Option<Channel> {
    if state.lead.email.is_some() {
        Some(Channel::Email)
    } else if state.lead.phone.is_some() {
        Some(Channel::Sms)
    } else {
        None
    }
}

/// Writes the first message, or a revision after an objection
pub struct DraftOutreachNode;

impl DraftOutreachNode {
    /// Look up every subject concurrently and fold the findings together
    async fn research(
        state: &WorkflowState,
        ctx: &NodeContext,
    ) -> Result<ResearchFindings, NodeError> {
        let mut subjects = vec![state.lead.company.clone()];
        if let Some(industry) = &state.lead.industry {
            subjects.push(industry.clone());
        }

        let lookups = subjects
            .iter()
            .map(|subject| ctx.collaborators.research.lookup(subject));
        let results = try_join_all(lookups).await?;

        let mut findings = ResearchFindings::default();
        for result in results {
            findings.absorb(result);
        }
        Ok(findings)
    }
}

#[async_trait]
impl NodeHandler for DraftOutreachNode {
    fn name(&self) -> &str {
        DRAFT_OUTREACH
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> Result<StateUpdate, NodeError> {
        let channel = pick_channel(state)
            .ok_or_else(|| NodeError::validation("lead has neither email nor phone"))?;

        let mut update = StateUpdate::default();
        let research = match &state.research {
            Some(findings) => findings.clone(),
            None => {
                let findings = Self::research(state, ctx).await?;
                update.research = Some(findings.clone());
                findings
            }
        };

        let kind = if state.revision_requested {
            OutreachKind::Revision
        } else {
            OutreachKind::Initial
        };
        let generated = ctx
            .collaborators
            .drafts
            .generate(&draft_context(state, kind, research))
            .await?;

        log::info!(
            "Run {}: drafted {:?} outreach '{}'",
            state.run_id,
            kind,
            generated.subject
        );

        if kind == OutreachKind::Revision {
            update.revision_requested = Some(false);
            update.objection_handling_count = Some(state.objection_handling_count + 1);
        }
        update.outreach_draft = Some(Draft {
            subject: generated.subject,
            body: generated.body,
            kind,
        });
        update.outreach_channel = Some(channel);
        Ok(update)
    }
}

/// Decides whether the draft may go out without a human
pub struct HumanReviewNode;

#[async_trait]
impl NodeHandler for HumanReviewNode {
    fn name(&self) -> &str {
        HUMAN_REVIEW
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> Result<StateUpdate, NodeError> {
        if state.outreach_draft.is_none() {
            return Err(NodeError::validation("nothing to review: no outreach draft"));
        }
        let score = state.qualification_score.unwrap_or(0.0);
        let auto_approved = score >= ctx.config.auto_approve_threshold;
        if !auto_approved && state.human_approved.is_none() {
            log::info!(
                "Run {}: score {:.3} below auto-approve threshold, waiting for review",
                state.run_id,
                score
            );
        }
        Ok(StateUpdate {
            auto_approved: Some(auto_approved),
            ..Default::default()
        })
    }
}

/// Hands the current draft to the sender and opens a new wait cycle
pub struct SendOutreachNode;

#[async_trait]
impl NodeHandler for SendOutreachNode {
    fn name(&self) -> &str {
        SEND_OUTREACH
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> Result<StateUpdate, NodeError> {
        let draft = state
            .outreach_draft
            .as_ref()
            .ok_or_else(|| NodeError::validation("no outreach draft to send"))?;
        let channel = state
            .outreach_channel
            .ok_or_else(|| NodeError::validation("no outreach channel selected"))?;
        let recipient = state.recipient_for(channel).ok_or_else(|| {
            NodeError::validation(format!("lead has no recipient address for {}", channel))
        })?;

        let receipt = ctx
            .collaborators
            .sender
            .send(channel, draft, recipient)
            .await?;
        let sent_at = ctx.clock.now();

        log::info!(
            "Run {}: sent {:?} outreach via {} ({})",
            state.run_id,
            draft.kind,
            channel,
            receipt.external_id
        );

        let mut update = StateUpdate {
            outreach_sent_at: Some(sent_at),
            outreach_external_id: Some(receipt.external_id.clone()),
            start_wait_cycle: true,
            outreach_record: Some(OutreachRecord {
                run_id: state.run_id.clone(),
                kind: draft.kind,
                channel,
                subject: draft.subject.clone(),
                body: draft.body.clone(),
                recipient: recipient.to_string(),
                sent_at,
                external_id: receipt.external_id,
            }),
            ..Default::default()
        };
        if draft.kind == OutreachKind::FollowUp {
            update.followup_count = Some(state.followup_count + 1);
        }
        Ok(update)
    }
}

/// Prepares the next follow-up while the follow-up budget lasts
pub struct FollowUpNode;

#[async_trait]
impl NodeHandler for FollowUpNode {
    fn name(&self) -> &str {
        FOLLOW_UP
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> Result<StateUpdate, NodeError> {
        if state.unsubscribed || state.followup_count >= ctx.config.max_followup_attempts {
            return Ok(StateUpdate::default());
        }

        let research = state.research.clone().unwrap_or_default();
        let generated = ctx
            .collaborators
            .drafts
            .generate(&draft_context(state, OutreachKind::FollowUp, research))
            .await?;

        log::info!(
            "Run {}: prepared follow-up {} of {}",
            state.run_id,
            state.followup_count + 1,
            ctx.config.max_followup_attempts
        );

        Ok(StateUpdate {
            outreach_draft: Some(Draft {
                subject: generated.subject,
                body: generated.body,
                kind: OutreachKind::FollowUp,
            }),
            ..Default::default()
        })
    }
}
