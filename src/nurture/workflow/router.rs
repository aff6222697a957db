// SPDX-License-Identifier: MIT

//! Routing decisions
//!
//! A router is a pure function of the merged state and the configuration.
//! Loop caps are checked here, before another iteration can start.

use std::fmt;

use crate::collab::classifier::ResponseClass;
use crate::error::UnknownNode;
use crate::nurture::config::NurtureConfig;
use crate::nurture::workflow::nodes::{
    CLASSIFY_RESPONSE, DRAFT_OUTREACH, FOLLOW_UP, HANDLE_OBJECTION, HUMAN_REVIEW,
    PREPARE_BOOKING, QUALIFY, SEND_OUTREACH, WAIT_FOR_RESPONSE,
};
use crate::nurture::workflow::state::{SuspendReason, WorkflowState, WorkflowStatus};

/// Where the run goes after a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Next(String),
    Suspend(SuspendReason),
    Terminate(WorkflowStatus),
}

impl Route {
    fn next(node: &str) -> Self {
        Self::Next(node.to_string())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Next(node) => write!(f, "-> {}", node),
            Route::Suspend(reason) => write!(f, "suspend ({})", reason),
            Route::Terminate(status) => write!(f, "terminate ({})", status),
        }
    }
}

/// Decide the next step after `node` ran and its update was merged into `state`.
pub fn route(node: &str, state: &WorkflowState, config: &NurtureConfig) -> Result<Route, UnknownNode> {
    let route = match node {
        QUALIFY => {
            let score = state.qualification_score.unwrap_or(0.0);
            if score < config.qualification_threshold {
                Route::Terminate(WorkflowStatus::Disqualified)
            } else {
                Route::next(DRAFT_OUTREACH)
            }
        }
        DRAFT_OUTREACH => Route::next(HUMAN_REVIEW),
        HUMAN_REVIEW => {
            if state.auto_approved {
                Route::next(SEND_OUTREACH)
            } else {
                match state.human_approved {
                    Some(true) => Route::next(SEND_OUTREACH),
                    Some(false) => Route::Terminate(WorkflowStatus::Rejected),
                    None => Route::Suspend(SuspendReason::AwaitingApproval),
                }
            }
        }
        SEND_OUTREACH => Route::next(WAIT_FOR_RESPONSE),
        WAIT_FOR_RESPONSE => {
            if state.response_received {
                Route::next(CLASSIFY_RESPONSE)
            } else if state.response_timeout {
                Route::next(FOLLOW_UP)
            } else {
                Route::Suspend(SuspendReason::AwaitingResponse)
            }
        }
        CLASSIFY_RESPONSE => match state.response_classification {
            Some(ResponseClass::Positive) => Route::next(PREPARE_BOOKING),
            Some(ResponseClass::Objection) => Route::next(HANDLE_OBJECTION),
            Some(ResponseClass::NoResponse) | Some(ResponseClass::Unsubscribe) | None => {
                Route::next(FOLLOW_UP)
            }
        },
        FOLLOW_UP => {
            if state.unsubscribed {
                Route::Terminate(WorkflowStatus::Unsubscribed)
            } else if state.followup_count >= config.max_followup_attempts {
                Route::Terminate(WorkflowStatus::NoResponse)
            } else {
                Route::next(SEND_OUTREACH)
            }
        }
        HANDLE_OBJECTION => {
            if state.objection_handling_count >= config.max_objection_cycles {
                Route::Terminate(WorkflowStatus::ObjectionLoopMax)
            } else {
                Route::next(DRAFT_OUTREACH)
            }
        }
        PREPARE_BOOKING => Route::Terminate(WorkflowStatus::BookingReady),
        other => return Err(UnknownNode(other.to_string())),
    };
    Ok(route)
}
