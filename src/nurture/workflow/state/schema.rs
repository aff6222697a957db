// SPDX-License-Identifier: MIT

//! Persisted run schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::collab::classifier::{ClassifiedResponse, ResponseClass};
use crate::collab::crm::BookingPayload;
use crate::collab::draft::{Draft, OutreachKind};
use crate::collab::research::ResearchFindings;
use crate::collab::sender::Channel;

/// Version of the persisted record layout. Bump whenever a field changes
/// meaning so older records are rejected instead of misread.
pub const SCHEMA_VERSION: u32 = 1;

/// Marker stored in `current_node` once a run is complete
pub const END_NODE: &str = "__end__";

/// Enriched lead snapshot a run is created from
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct LeadProfile {
    pub company: String,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    /// Upstream fit estimate in [0,1]
    #[serde(default)]
    pub fit_score: f64,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl LeadProfile {
    /// Fraction of contact fields present (name, email, phone)
    pub fn contact_completeness(&self) -> f64 {
        let present = [
            self.contact_name.is_some(),
            self.email.is_some(),
            self.phone.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        present as f64 / 3.0
    }
}

/// Trigger payload for a new run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewLead {
    pub tenant_id: String,
    pub lead_id: String,
    #[serde(default)]
    pub compliance_urgency_score: f64,
    pub profile: LeadProfile,
}

/// Reply delivered through the inbound webhook
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InboundReply {
    pub content: String,
    pub received_at: DateTime<Utc>,
    pub source: String,
}

/// Why a run returned control to its caller
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    AwaitingApproval,
    AwaitingResponse,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingApproval => write!(f, "awaiting_approval"),
            Self::AwaitingResponse => write!(f, "awaiting_response"),
        }
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    BookingReady,
    NoResponse,
    Disqualified,
    ObjectionLoopMax,
    Rejected,
    Unsubscribed,
    Cancelled,
    Error,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingReady => "booking_ready",
            Self::NoResponse => "no_response",
            Self::Disqualified => "disqualified",
            Self::ObjectionLoopMax => "objection_loop_max",
            Self::Rejected => "rejected",
            Self::Unsubscribed => "unsubscribed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lead's run through the nurturing workflow
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WorkflowState {
    pub run_id: String,
    pub tenant_id: String,
    pub lead_id: String,
    /// Bumped by the store on every successful put
    pub version: u64,
    pub current_node: String,
    pub lead: LeadProfile,

    pub qualification_score: Option<f64>,
    pub compliance_urgency_score: f64,
    pub research: Option<ResearchFindings>,

    pub auto_approved: bool,
    pub human_approved: Option<bool>,

    pub outreach_draft: Option<Draft>,
    pub outreach_channel: Option<Channel>,
    pub outreach_sent_at: Option<DateTime<Utc>>,
    pub outreach_external_id: Option<String>,

    pub response_received: bool,
    pub response_timeout: bool,
    pub last_response: Option<InboundReply>,
    pub response_classification: Option<ResponseClass>,
    pub response_analysis: Option<ClassifiedResponse>,

    pub revision_requested: bool,
    #[serde(default)]
    pub objection_history: Vec<String>,
    pub followup_count: u32,
    pub objection_handling_count: u32,
    pub unsubscribed: bool,

    pub suspended: Option<SuspendReason>,
    pub workflow_complete: bool,
    pub workflow_status: Option<WorkflowStatus>,
    pub error: Option<String>,
    pub booking_payload: Option<BookingPayload>,
    pub crm_status: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Create the initial state for a new run positioned at `entry_node`
    pub fn new(run_id: String, lead: NewLead, entry_node: &str, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            tenant_id: lead.tenant_id,
            lead_id: lead.lead_id,
            version: 0,
            current_node: entry_node.to_string(),
            lead: lead.profile,
            qualification_score: None,
            compliance_urgency_score: lead.compliance_urgency_score,
            research: None,
            auto_approved: false,
            human_approved: None,
            outreach_draft: None,
            outreach_channel: None,
            outreach_sent_at: None,
            outreach_external_id: None,
            response_received: false,
            response_timeout: false,
            last_response: None,
            response_classification: None,
            response_analysis: None,
            revision_requested: false,
            objection_history: Vec::new(),
            followup_count: 0,
            objection_handling_count: 0,
            unsubscribed: false,
            suspended: None,
            workflow_complete: false,
            workflow_status: None,
            error: None,
            booking_payload: None,
            crm_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the run complete. `current_node` moves to the end marker.
    pub fn complete(&mut self, status: WorkflowStatus, now: DateTime<Utc>) {
        self.workflow_complete = true;
        self.workflow_status = Some(status);
        self.suspended = None;
        self.current_node = END_NODE.to_string();
        self.updated_at = now;
    }

    /// Recipient address for `channel`, if known
    pub fn recipient_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Email => self.lead.email.as_deref(),
            Channel::Sms | Channel::Voice => self.lead.phone.as_deref(),
        }
    }

    /// Human-readable one-line state summary for logs and the CLI
    pub fn describe(&self) -> String {
        match (self.workflow_status, self.suspended) {
            (Some(status), _) => format!("terminated ({})", status),
            (None, Some(reason)) => format!("suspended ({}) at {}", reason, self.current_node),
            (None, None) => format!("pending at {}", self.current_node),
        }
    }
}

/// A message handed to the sender
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OutreachRecord {
    pub run_id: String,
    pub kind: OutreachKind,
    pub channel: Channel,
    pub subject: String,
    pub body: String,
    pub recipient: String,
    pub sent_at: DateTime<Utc>,
    pub external_id: String,
}

/// An inbound reply as it arrived, whether or not it resumed the run
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResponseRecord {
    pub run_id: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
    pub source: String,
    pub applied: bool,
}

/// Everything persisted for one run
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RunRecord {
    pub schema_version: u32,
    pub state: WorkflowState,
    #[serde(default)]
    pub outreach: Vec<OutreachRecord>,
    #[serde(default)]
    pub responses: Vec<ResponseRecord>,
}

impl RunRecord {
    pub fn new(state: WorkflowState) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            state,
            outreach: Vec::new(),
            responses: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_lead() -> NewLead {
        NewLead {
            tenant_id: "t1".to_string(),
            lead_id: "l1".to_string(),
            compliance_urgency_score: 0.4,
            profile: LeadProfile {
                company: "Acme Dental".to_string(),
                contact_name: Some("Dana".to_string()),
                email: Some("dana@acme.test".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_new_state_defaults() {
        let state = WorkflowState::new("r1".into(), new_lead(), "qualify", Utc::now());
        assert_eq!(state.current_node, "qualify");
        assert_eq!(state.version, 0);
        assert_eq!(state.compliance_urgency_score, 0.4);
        assert!(state.qualification_score.is_none());
        assert!(!state.workflow_complete);
        assert_eq!(state.describe(), "pending at qualify");
    }

    #[test]
    fn test_complete_moves_to_end_marker() {
        let mut state = WorkflowState::new("r1".into(), new_lead(), "qualify", Utc::now());
        state.suspended = Some(SuspendReason::AwaitingApproval);
        state.complete(WorkflowStatus::Rejected, Utc::now());

        assert!(state.workflow_complete);
        assert_eq!(state.current_node, END_NODE);
        assert!(state.suspended.is_none());
        assert_eq!(state.describe(), "terminated (rejected)");
    }

    #[test]
    fn test_contact_completeness() {
        let lead = new_lead();
        let completeness = lead.profile.contact_completeness();
        assert!((completeness - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(LeadProfile::default().contact_completeness(), 0.0);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_value(SuspendReason::AwaitingApproval).unwrap(),
            json!("awaiting_approval")
        );
        assert_eq!(
            serde_json::to_value(WorkflowStatus::ObjectionLoopMax).unwrap(),
            json!("objection_loop_max")
        );
        assert_eq!(
            serde_json::to_value(OutreachKind::FollowUp).unwrap(),
            json!("follow_up")
        );
        assert!(serde_json::from_value::<WorkflowStatus>(json!("maybe_later")).is_err());
    }

    #[test]
    fn test_new_lead_deserialize() {
        let lead: NewLead = serde_json::from_value(json!({
            "tenant_id": "t1",
            "lead_id": "l9",
            "profile": { "company": "Beta Clinics", "fit_score": 0.7 }
        }))
        .unwrap();
        assert_eq!(lead.compliance_urgency_score, 0.0);
        assert_eq!(lead.profile.fit_score, 0.7);
        assert!(lead.profile.email.is_none());
    }
}
