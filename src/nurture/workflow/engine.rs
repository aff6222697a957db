// SPDX-License-Identifier: MIT

//! Run driver
//!
//! `advance` moves one run forward until it suspends, terminates, or uses up
//! its step budget. Every node transition is persisted as a single
//! compare-and-swap of the merged state plus its routing decision, so a crash
//! between steps leaves the run on the last completed node.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

use crate::error::{NodeError, StoreError, WorkflowError};
use crate::nurture::workflow::locks::KeyedLocks;
use crate::nurture::workflow::registry::{NodeContext, NodeRegistry};
use crate::nurture::workflow::router::{self, Route};
use crate::nurture::workflow::state::{
    StateStore, SuspendReason, WorkflowState, WorkflowStatus,
};

/// Where a run stands after an `advance` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Step budget used up; call `advance` again to keep going
    Continued { current_node: String, steps: u32 },
    Suspended { reason: SuspendReason },
    Terminated { status: WorkflowStatus },
}

impl RunOutcome {
    /// Outcome describing a stored state without running anything
    pub fn of(state: &WorkflowState) -> Self {
        if state.workflow_complete {
            RunOutcome::Terminated {
                status: state.workflow_status.unwrap_or(WorkflowStatus::Error),
            }
        } else if let Some(reason) = state.suspended {
            RunOutcome::Suspended { reason }
        } else {
            RunOutcome::Continued {
                current_node: state.current_node.clone(),
                steps: 0,
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunOutcome::Terminated { .. })
    }
}

/// Things the engine reports as they happen
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    RunStarted {
        run_id: String,
    },
    NodeFinished {
        run_id: String,
        node: String,
        duration: Duration,
        /// `None` on success, otherwise the failure kind
        error_kind: Option<String>,
        at: DateTime<Utc>,
    },
    RunSuspended {
        run_id: String,
        reason: SuspendReason,
    },
    RunTerminated {
        run_id: String,
        status: WorkflowStatus,
    },
}

/// Receives engine events. Handlers and routers never see observers.
pub trait EngineObserver: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

pub struct Engine {
    store: Arc<dyn StateStore>,
    registry: NodeRegistry,
    context: NodeContext,
    observers: Vec<Arc<dyn EngineObserver>>,
    locks: KeyedLocks,
}

impl Engine {
    pub fn new(store: Arc<dyn StateStore>, registry: NodeRegistry, context: NodeContext) -> Self {
        Self {
            store,
            registry,
            context,
            observers: Vec::new(),
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn EngineObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    /// Drive `run_id` forward. Calls for the same run are serialized.
    pub async fn advance(&self, run_id: &str) -> Result<RunOutcome, WorkflowError> {
        let _guard = self.lock(run_id).await;
        self.drive(run_id).await
    }

    /// Exclusive access to a run for the duration of the guard
    pub(crate) async fn lock(&self, run_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(run_id).await
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    pub(crate) async fn load(&self, run_id: &str) -> Result<WorkflowState, WorkflowError> {
        match self.store.get_state(run_id).await {
            Ok(state) => Ok(state),
            Err(StoreError::NotFound(_)) => Err(WorkflowError::RunNotFound(run_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `next` over `previous` and return it with its new version
    pub(crate) async fn persist(
        &self,
        mut next: WorkflowState,
        previous: &WorkflowState,
    ) -> Result<WorkflowState, WorkflowError> {
        next.version = self.store.put(&next, previous.version).await?;
        Ok(next)
    }

    /// Body of `advance`; the caller must hold the run's lock.
    pub(crate) async fn drive(&self, run_id: &str) -> Result<RunOutcome, WorkflowError> {
        let mut state = self.load(run_id).await?;
        if state.workflow_complete || state.suspended.is_some() {
            log::debug!("Run {}: nothing to do, {}", run_id, state.describe());
            return Ok(RunOutcome::of(&state));
        }

        let config = self.context.config.clone();
        let max_steps = config.max_steps_per_advance.max(1);

        for step in 1..=max_steps {
            let node = state.current_node.clone();
            let handler = self.registry.resolve(&node).await.map_err(|e| {
                log::error!("Run {}: {}", run_id, e);
                WorkflowError::UnknownNode {
                    run_id: run_id.to_string(),
                    node: e.0,
                }
            })?;

            log::info!("Run {}: step {} executing node {}", run_id, step, node);
            let started = Instant::now();
            let result = handler.run(&state, &self.context).await;
            let elapsed = started.elapsed();

            let update = match result {
                Ok(update) => update,
                Err(NodeError::Transient(source)) => {
                    log::warn!("Run {}: node {} failed transiently: {}", run_id, node, source);
                    self.node_finished(run_id, &node, elapsed, Some("transient"));
                    return Err(WorkflowError::Transient {
                        run_id: run_id.to_string(),
                        node,
                        source,
                    });
                }
                Err(NodeError::Validation(message)) => {
                    self.node_finished(run_id, &node, elapsed, Some("validation"));
                    return self.fail(state, node, message).await;
                }
            };

            let mut next = state.merged(&update);
            let route = router::route(&node, &next, &config).map_err(|e| {
                WorkflowError::UnknownNode {
                    run_id: run_id.to_string(),
                    node: e.0,
                }
            })?;

            let now = self.context.clock.now();
            next.updated_at = now;
            match &route {
                Route::Next(target) => next.current_node = target.clone(),
                Route::Suspend(reason) => next.suspended = Some(*reason),
                Route::Terminate(status) => next.complete(*status, now),
            }

            if let Err(message) = next.check_invariants(&state, &config) {
                self.node_finished(run_id, &node, elapsed, Some("validation"));
                return self.fail(state, node, message).await;
            }
            self.node_finished(run_id, &node, elapsed, None);

            if let Some(record) = update.outreach_record {
                self.store.append_outreach(run_id, record).await?;
            }
            state = self.persist(next, &state).await?;
            log::info!("Run {}: {} {}", run_id, node, route);

            match route {
                Route::Next(_) => continue,
                Route::Suspend(reason) => {
                    self.emit(EngineEvent::RunSuspended {
                        run_id: run_id.to_string(),
                        reason,
                    });
                    return Ok(RunOutcome::Suspended { reason });
                }
                Route::Terminate(status) => {
                    self.emit(EngineEvent::RunTerminated {
                        run_id: run_id.to_string(),
                        status,
                    });
                    return Ok(RunOutcome::Terminated { status });
                }
            }
        }

        log::warn!(
            "Run {}: step budget of {} used up at node {}",
            run_id,
            max_steps,
            state.current_node
        );
        Ok(RunOutcome::Continued {
            current_node: state.current_node,
            steps: max_steps,
        })
    }

    fn node_finished(&self, run_id: &str, node: &str, duration: Duration, error_kind: Option<&str>) {
        self.emit(EngineEvent::NodeFinished {
            run_id: run_id.to_string(),
            node: node.to_string(),
            duration,
            error_kind: error_kind.map(str::to_string),
            at: self.context.clock.now(),
        });
    }

    /// Terminate the run with status `error`, keeping every field the failed
    /// node would have changed untouched.
    async fn fail(
        &self,
        state: WorkflowState,
        node: String,
        message: String,
    ) -> Result<RunOutcome, WorkflowError> {
        log::error!("Run {}: node {} failed validation: {}", state.run_id, node, message);

        let mut failed = state.clone();
        failed.error = Some(format!("{}: {}", node, message));
        failed.complete(WorkflowStatus::Error, self.context.clock.now());
        self.persist(failed, &state).await?;

        self.emit(EngineEvent::RunTerminated {
            run_id: state.run_id.clone(),
            status: WorkflowStatus::Error,
        });
        Err(WorkflowError::Validation {
            run_id: state.run_id,
            node,
            message,
        })
    }
}
