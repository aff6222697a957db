// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use super::PREPARE_BOOKING;
use crate::collab::crm::BookingPayload;
use crate::error::NodeError;
use crate::nurture::workflow::registry::{NodeContext, NodeHandler};
use crate::nurture::workflow::state::{StateUpdate, WorkflowState};

/// Builds the CRM handoff for an interested lead and submits it
pub struct PrepareBookingNode;

fn summary(state: &WorkflowState) -> String {
    let mut summary = format!(
        "{} replied positively after {} follow-up(s)",
        state.lead.company, state.followup_count
    );
    if !state.objection_history.is_empty() {
        summary.push_str(&format!(
            " and {} revision(s) addressing: {}",
            state.objection_handling_count,
            state.objection_history.join(", ")
        ));
    }
    if let Some(reply) = &state.last_response {
        summary.push_str(&format!(". Last reply: \"{}\"", reply.content.trim()));
    }
    summary
}

#[async_trait]
impl NodeHandler for PrepareBookingNode {
    fn name(&self) -> &str {
        PREPARE_BOOKING
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> Result<StateUpdate, NodeError> {
        let qualification_score = state
            .qualification_score
            .ok_or_else(|| NodeError::validation("cannot book an unscored lead"))?;

        let analysis = state.response_analysis.as_ref();
        let payload = BookingPayload {
            run_id: state.run_id.clone(),
            tenant_id: state.tenant_id.clone(),
            lead_id: state.lead_id.clone(),
            company: state.lead.company.clone(),
            contact_name: state.lead.contact_name.clone(),
            email: state.lead.email.clone(),
            phone: state.lead.phone.clone(),
            qualification_score,
            interest_level: analysis.map(|a| a.interest_level),
            sentiment: analysis.map(|a| a.sentiment.clone()),
            summary: summary(state),
            prepared_at: ctx.clock.now(),
        };

        let receipt = ctx.collaborators.crm.create_booking(&payload).await?;
        log::info!(
            "Run {}: booking handed to CRM ({})",
            state.run_id,
            receipt.status
        );

        Ok(StateUpdate {
            booking_payload: Some(payload),
            crm_status: Some(receipt.status),
            ..Default::default()
        })
    }
}
