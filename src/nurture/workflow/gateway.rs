// SPDX-License-Identifier: MIT

//! Entry and re-entry points for runs
//!
//! New leads come in through `start`; approvals, inbound replies, timeouts
//! and cancellations come back through `resume`. A resume event is applied
//! only when the run is suspended waiting for exactly that kind of event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::WorkflowError;
use crate::nurture::workflow::engine::{Engine, EngineEvent, RunOutcome};
use crate::nurture::workflow::nodes::ENTRY_NODE;
use crate::nurture::workflow::state::{
    InboundReply, NewLead, ResponseRecord, RunRecord, SuspendReason, WorkflowState,
    WorkflowStatus,
};

/// Something from outside the engine that a suspended run may be waiting on
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResumeEvent {
    Approval { approved: bool },
    InboundReply(InboundReply),
    TimeoutFired,
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ResumeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ResumeEvent::Approval { .. } => "approval",
            ResumeEvent::InboundReply(_) => "inbound_reply",
            ResumeEvent::TimeoutFired => "timeout_fired",
            ResumeEvent::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedRun {
    pub run_id: String,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

/// Result of firing a timeout on one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimedOutRun {
    pub run_id: String,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

/// Whether `state` has waited for a reply longer than `timeout` at `now`
pub fn is_timed_out(state: &WorkflowState, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
    state.suspended == Some(SuspendReason::AwaitingResponse)
        && state
            .outreach_sent_at
            .is_some_and(|sent_at| now - sent_at > timeout)
}

#[derive(Clone)]
pub struct Gateway {
    engine: Arc<Engine>,
}

impl Gateway {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Create a run for `lead` at the entry node and advance it.
    ///
    /// The run exists once this returns, even on error; the run id is part of
    /// every `WorkflowError` the engine raises.
    pub async fn start(&self, lead: NewLead) -> Result<StartedRun, WorkflowError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let now = self.engine.context().clock.now();
        let state = WorkflowState::new(run_id.clone(), lead, ENTRY_NODE, now);

        self.engine.store().create(RunRecord::new(state)).await?;
        log::info!("Run {}: started", run_id);
        self.engine.emit(EngineEvent::RunStarted {
            run_id: run_id.clone(),
        });

        let outcome = self.engine.advance(&run_id).await?;
        Ok(StartedRun { run_id, outcome })
    }

    pub async fn resume(&self, run_id: &str, event: ResumeEvent) -> Result<RunOutcome, WorkflowError> {
        let _guard = self.engine.lock(run_id).await;
        let state = self.engine.load(run_id).await?;
        self.apply(state, event).await
    }

    /// Fire `timeout_fired` on every run whose reply window closed before `now`
    pub async fn check_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<TimedOutRun>, WorkflowError> {
        let timeout = self.engine.context().config.response_timeout();
        let candidates: Vec<String> = self
            .engine
            .store()
            .list()
            .await?
            .into_iter()
            .filter(|state| is_timed_out(state, now, timeout))
            .map(|state| state.run_id)
            .collect();

        let mut fired = Vec::new();
        for run_id in candidates {
            let _guard = self.engine.lock(&run_id).await;
            let state = match self.engine.load(&run_id).await {
                Ok(state) => state,
                Err(e) => {
                    log::warn!("Run {}: skipping timeout check: {}", run_id, e);
                    continue;
                }
            };
            // may have been resumed since the scan
            if !is_timed_out(&state, now, timeout) {
                continue;
            }
            match self.apply(state, ResumeEvent::TimeoutFired).await {
                Ok(outcome) => fired.push(TimedOutRun { run_id, outcome }),
                Err(e) => log::warn!("Run {}: timeout could not be applied: {}", run_id, e),
            }
        }

        if !fired.is_empty() {
            log::info!("Timeout sweep fired {} run(s)", fired.len());
        }
        Ok(fired)
    }

    /// Apply `event` to `state` and drive the run; the caller holds the lock.
    async fn apply(&self, state: WorkflowState, event: ResumeEvent) -> Result<RunOutcome, WorkflowError> {
        let run_id = state.run_id.clone();
        let now = self.engine.context().clock.now();

        if state.workflow_complete {
            log::info!(
                "Run {}: ignoring {} event, already {}",
                run_id,
                event.kind(),
                state.describe()
            );
            self.log_reply(&event, &run_id, false).await?;
            return Ok(RunOutcome::of(&state));
        }

        let mut next = state.clone();
        match (&event, state.suspended) {
            (ResumeEvent::Cancel { reason }, _) => {
                next.complete(WorkflowStatus::Cancelled, now);
                self.engine.persist(next, &state).await?;
                log::info!(
                    "Run {}: cancelled ({})",
                    run_id,
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.engine.emit(EngineEvent::RunTerminated {
                    run_id,
                    status: WorkflowStatus::Cancelled,
                });
                return Ok(RunOutcome::Terminated {
                    status: WorkflowStatus::Cancelled,
                });
            }
            (ResumeEvent::Approval { approved }, Some(SuspendReason::AwaitingApproval)) => {
                next.human_approved = Some(*approved);
            }
            (ResumeEvent::InboundReply(reply), Some(SuspendReason::AwaitingResponse)) => {
                next.response_received = true;
                next.last_response = Some(reply.clone());
            }
            (ResumeEvent::TimeoutFired, Some(SuspendReason::AwaitingResponse)) => {
                next.response_timeout = true;
            }
            (_, actual) => {
                log::warn!(
                    "Run {}: {} event does not match, run is {}",
                    run_id,
                    event.kind(),
                    state.describe()
                );
                self.log_reply(&event, &run_id, false).await?;
                return Err(WorkflowError::invalid_resume(run_id, event.kind(), actual));
            }
        }

        next.suspended = None;
        next.updated_at = now;
        if let Err(e) = self.engine.persist(next, &state).await {
            if let Err(log_err) = self.log_reply(&event, &run_id, false).await {
                log::warn!("Run {}: reply not logged: {}", run_id, log_err);
            }
            return Err(e);
        }
        self.log_reply(&event, &run_id, true).await?;
        log::info!("Run {}: {} event applied, resuming", run_id, event.kind());

        self.engine.drive(&run_id).await
    }

    /// Inbound replies go to the response log whether or not they resume the run
    async fn log_reply(&self, event: &ResumeEvent, run_id: &str, applied: bool) -> Result<(), WorkflowError> {
        if let ResumeEvent::InboundReply(reply) = event {
            let record = ResponseRecord {
                run_id: run_id.to_string(),
                content: reply.content.clone(),
                received_at: reply.received_at,
                source: reply.source.clone(),
                applied,
            };
            self.engine.store().append_response(run_id, record).await?;
        }
        Ok(())
    }
}
