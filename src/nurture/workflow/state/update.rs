// SPDX-License-Identifier: MIT

//! Partial state updates returned by node handlers

use chrono::{DateTime, Utc};

use super::schema::{OutreachRecord, WorkflowState, WorkflowStatus};
use crate::collab::classifier::{ClassifiedResponse, ResponseClass};
use crate::collab::crm::BookingPayload;
use crate::collab::draft::Draft;
use crate::collab::research::ResearchFindings;
use crate::collab::sender::Channel;
use crate::nurture::config::NurtureConfig;

/// Fields a handler wants to change. `None` / `false` means "leave as is".
///
/// Merge rules per field:
/// - scalars and options overwrite
/// - `objection_history` appends
/// - `start_wait_cycle` clears the previous cycle's response fields before
///   anything else is applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub qualification_score: Option<f64>,
    pub research: Option<ResearchFindings>,
    pub auto_approved: Option<bool>,

    pub outreach_draft: Option<Draft>,
    pub outreach_channel: Option<Channel>,
    pub outreach_sent_at: Option<DateTime<Utc>>,
    pub outreach_external_id: Option<String>,

    pub start_wait_cycle: bool,
    pub response_classification: Option<ResponseClass>,
    pub response_analysis: Option<ClassifiedResponse>,

    pub revision_requested: Option<bool>,
    pub objection_history: Vec<String>,
    pub followup_count: Option<u32>,
    pub objection_handling_count: Option<u32>,
    pub unsubscribed: Option<bool>,

    pub booking_payload: Option<BookingPayload>,
    pub crm_status: Option<String>,

    /// Appended to the run's outreach log by the engine, not stored in state
    pub outreach_record: Option<OutreachRecord>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl WorkflowState {
    /// Return a copy of this state with `update` merged in.
    pub fn merged(&self, update: &StateUpdate) -> WorkflowState {
        let mut next = self.clone();

        if update.start_wait_cycle {
            next.response_received = false;
            next.response_timeout = false;
            next.last_response = None;
            next.response_classification = None;
            next.response_analysis = None;
        }

        if let Some(score) = update.qualification_score {
            next.qualification_score = Some(score);
        }
        if let Some(research) = &update.research {
            next.research = Some(research.clone());
        }
        if let Some(auto) = update.auto_approved {
            next.auto_approved = auto;
        }
        if let Some(draft) = &update.outreach_draft {
            next.outreach_draft = Some(draft.clone());
        }
        if let Some(channel) = update.outreach_channel {
            next.outreach_channel = Some(channel);
        }
        if let Some(sent_at) = update.outreach_sent_at {
            next.outreach_sent_at = Some(sent_at);
        }
        if let Some(id) = &update.outreach_external_id {
            next.outreach_external_id = Some(id.clone());
        }
        if let Some(class) = update.response_classification {
            next.response_classification = Some(class);
        }
        if let Some(analysis) = &update.response_analysis {
            next.response_analysis = Some(analysis.clone());
        }
        if let Some(flag) = update.revision_requested {
            next.revision_requested = flag;
        }
        next.objection_history.extend(update.objection_history.iter().cloned());
        if let Some(count) = update.followup_count {
            next.followup_count = count;
        }
        if let Some(count) = update.objection_handling_count {
            next.objection_handling_count = count;
        }
        if let Some(flag) = update.unsubscribed {
            next.unsubscribed = flag;
        }
        if let Some(payload) = &update.booking_payload {
            next.booking_payload = Some(payload.clone());
        }
        if let Some(status) = &update.crm_status {
            next.crm_status = Some(status.clone());
        }

        next
    }

    /// Check the invariants that must hold after every node, comparing
    /// against the state the node started from.
    pub fn check_invariants(
        &self,
        previous: &WorkflowState,
        config: &NurtureConfig,
    ) -> Result<(), String> {
        if let Some(score) = self.qualification_score {
            check_unit_interval("qualification_score", score)?;
        }
        check_unit_interval("compliance_urgency_score", self.compliance_urgency_score)?;

        match (previous.qualification_score, self.qualification_score) {
            (Some(before), Some(after)) if after < before => {
                return Err(format!(
                    "qualification_score decreased from {} to {}",
                    before, after
                ));
            }
            (Some(_), None) => return Err("qualification_score was cleared".to_string()),
            _ => {}
        }

        if self.followup_count < previous.followup_count
            || self.objection_handling_count < previous.objection_handling_count
        {
            return Err("cycle counters must not decrease".to_string());
        }
        if self.followup_count > config.max_followup_attempts {
            return Err(format!(
                "followup_count {} exceeds max_followup_attempts {}",
                self.followup_count, config.max_followup_attempts
            ));
        }
        if self.objection_handling_count > config.max_objection_cycles {
            return Err(format!(
                "objection_handling_count {} exceeds max_objection_cycles {}",
                self.objection_handling_count, config.max_objection_cycles
            ));
        }

        if self.outreach_sent_at.is_some()
            && (self.outreach_draft.is_none() || self.outreach_channel.is_none())
        {
            return Err("outreach_sent_at set without a draft and channel".to_string());
        }
        if self.response_received && self.response_timeout {
            return Err("response_received and response_timeout are both set".to_string());
        }
        if self.booking_payload.is_some()
            && self
                .workflow_status
                .is_some_and(|s| s != WorkflowStatus::BookingReady)
        {
            return Err("booking_payload present on a run that is not booking_ready".to_string());
        }

        if let Some(analysis) = &self.response_analysis {
            check_unit_interval("interest_level", analysis.interest_level)?;
        }

        Ok(())
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} = {} is outside [0, 1]", field, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::draft::OutreachKind;
    use crate::nurture::workflow::state::schema::{LeadProfile, NewLead};

    fn base_state() -> WorkflowState {
        WorkflowState::new(
            "r1".into(),
            NewLead {
                tenant_id: "t1".into(),
                lead_id: "l1".into(),
                compliance_urgency_score: 0.2,
                profile: LeadProfile {
                    company: "Acme".into(),
                    email: Some("ops@acme.test".into()),
                    ..Default::default()
                },
            },
            "qualify",
            Utc::now(),
        )
    }

    fn draft() -> Draft {
        Draft {
            subject: "Hello".into(),
            body: "Body".into(),
            kind: OutreachKind::Initial,
        }
    }

    #[test]
    fn test_empty_update_is_noop() {
        let state = base_state();
        let update = StateUpdate::default();
        assert!(update.is_empty());
        assert_eq!(state.merged(&update), state);
    }

    #[test]
    fn test_merge_overwrites_and_appends() {
        let mut state = base_state();
        state.objection_history = vec!["price".into()];

        let update = StateUpdate {
            qualification_score: Some(0.7),
            objection_history: vec!["timing".into()],
            followup_count: Some(1),
            ..Default::default()
        };
        let next = state.merged(&update);

        assert_eq!(next.qualification_score, Some(0.7));
        assert_eq!(next.objection_history, vec!["price", "timing"]);
        assert_eq!(next.followup_count, 1);
        // input untouched
        assert!(state.qualification_score.is_none());
    }

    #[test]
    fn test_start_wait_cycle_resets_response_fields() {
        let mut state = base_state();
        state.response_received = true;
        state.response_classification = Some(ResponseClass::Objection);

        let next = state.merged(&StateUpdate {
            start_wait_cycle: true,
            ..Default::default()
        });
        assert!(!next.response_received);
        assert!(next.response_classification.is_none());
    }

    #[test]
    fn test_score_out_of_range_rejected() {
        let state = base_state();
        let config = NurtureConfig::default();
        let next = state.merged(&StateUpdate {
            qualification_score: Some(1.2),
            ..Default::default()
        });
        let err = next.check_invariants(&state, &config).unwrap_err();
        assert!(err.contains("outside [0, 1]"));

        let next = state.merged(&StateUpdate {
            qualification_score: Some(f64::NAN),
            ..Default::default()
        });
        assert!(next.check_invariants(&state, &config).is_err());
    }

    #[test]
    fn test_score_never_decreases() {
        let mut state = base_state();
        state.qualification_score = Some(0.8);
        let config = NurtureConfig::default();

        let next = state.merged(&StateUpdate {
            qualification_score: Some(0.6),
            ..Default::default()
        });
        assert!(next.check_invariants(&state, &config).is_err());

        let next = state.merged(&StateUpdate {
            qualification_score: Some(0.9),
            ..Default::default()
        });
        assert!(next.check_invariants(&state, &config).is_ok());
    }

    #[test]
    fn test_counter_caps() {
        let state = base_state();
        let config = NurtureConfig {
            max_followup_attempts: 2,
            ..Default::default()
        };
        let next = state.merged(&StateUpdate {
            followup_count: Some(3),
            ..Default::default()
        });
        assert!(next.check_invariants(&state, &config).is_err());
    }

    #[test]
    fn test_sent_at_requires_draft() {
        let state = base_state();
        let config = NurtureConfig::default();
        let next = state.merged(&StateUpdate {
            outreach_sent_at: Some(Utc::now()),
            ..Default::default()
        });
        assert!(next.check_invariants(&state, &config).is_err());

        let next = state.merged(&StateUpdate {
            outreach_draft: Some(draft()),
            outreach_channel: Some(Channel::Email),
            outreach_sent_at: Some(Utc::now()),
            ..Default::default()
        });
        assert!(next.check_invariants(&state, &config).is_ok());
    }
}
