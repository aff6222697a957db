// SPDX-License-Identifier: MIT

//! Typed error handling for leadflow-rs
//!
//! Errors are split by the layer that raises them. Collaborators fail with
//! `CollaboratorError`, node handlers with `NodeError`, the state store with
//! `StoreError`, and the engine boundary turns all of them into a
//! `WorkflowError` that tells the caller whether the run is still resumable.

use thiserror::Error;

use crate::nurture::workflow::state::SuspendReason;

/// Top-level error type for leadflow-rs
#[derive(Debug, Error)]
pub enum LeadflowError {
    /// Errors raised at the engine / gateway boundary
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// State store errors outside of an engine call
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Collaborator errors outside of an engine call
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Configuration errors (invalid thresholds, bad URLs, unreadable files)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl LeadflowError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Errors surfaced by `Engine::advance` and `Gateway::resume`.
///
/// Only `Validation` is fatal for the run (it is persisted as a terminal
/// `error` status). Every other variant leaves the persisted state untouched,
/// so the caller can retry the same call later.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A collaborator failed for a retriable reason; the run stays on `node`
    #[error("Run {run_id}: node '{node}' failed transiently: {source}")]
    Transient {
        run_id: String,
        node: String,
        #[source]
        source: CollaboratorError,
    },

    /// A handler produced an update violating a state invariant
    #[error("Run {run_id}: node '{node}' produced an invalid update: {message}")]
    Validation {
        run_id: String,
        node: String,
        message: String,
    },

    /// Persisted `current_node` has no registered handler or router
    #[error("Run {run_id}: unknown node '{node}'")]
    UnknownNode { run_id: String, node: String },

    /// A resume event arrived for a run not waiting on it
    #[error("Run {run_id}: cannot apply {event} event, run is {actual}")]
    InvalidResume {
        run_id: String,
        event: String,
        actual: String,
    },

    /// No record exists for the run
    #[error("Run {0} not found")]
    RunNotFound(String),

    /// Persistence failed underneath the engine
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Short, stable name of the error kind, used in metrics and API bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Validation { .. } => "validation",
            Self::UnknownNode { .. } => "unknown_node",
            Self::InvalidResume { .. } => "invalid_resume",
            Self::RunNotFound(_) => "run_not_found",
            Self::Store(StoreError::ConcurrentConflict { .. }) => "concurrent_conflict",
            Self::Store(_) => "store",
        }
    }

    /// Whether repeating the same call later may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Store(StoreError::ConcurrentConflict { .. })
        )
    }

    pub(crate) fn invalid_resume(
        run_id: impl Into<String>,
        event: impl Into<String>,
        actual: Option<SuspendReason>,
    ) -> Self {
        let actual = match actual {
            Some(reason) => format!("suspended ({})", reason),
            None => "not suspended".to_string(),
        };
        Self::InvalidResume {
            run_id: run_id.into(),
            event: event.into(),
            actual,
        }
    }
}

/// A node name with no registered handler
#[derive(Debug, Clone, Error, PartialEq)]
#[error("unknown node '{0}'")]
pub struct UnknownNode(pub String);

/// Errors raised by `StateStore` implementations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Compare-and-swap failed: another writer persisted the run first
    #[error("concurrent conflict on run {run_id}: expected version {expected_version}, found {actual_version}")]
    ConcurrentConflict {
        run_id: String,
        expected_version: u64,
        actual_version: u64,
    },

    /// No record with the given run id
    #[error("run not found: {0}")]
    NotFound(String),

    /// `create` was called for a run id that already exists
    #[error("run already exists: {0}")]
    AlreadyExists(String),

    /// Persisted record was written by an incompatible schema version
    #[error("run {run_id} has schema version {found}, expected {expected}")]
    IncompatibleSchema {
        run_id: String,
        found: u32,
        expected: u32,
    },

    /// Backend-specific failure (filesystem, serialization)
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Errors returned by collaborator services (research, drafting, sending...)
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// Network failure, timeout, 5xx: retry later
    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        collaborator: String,
        message: String,
    },

    /// Rate limit exceeded
    #[error("{collaborator} rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        collaborator: String,
        retry_after_secs: Option<u64>,
    },

    /// The collaborator answered with something we can't interpret
    #[error("invalid response from {collaborator}: {message}")]
    InvalidResponse {
        collaborator: String,
        message: String,
    },
}

impl CollaboratorError {
    /// Create an unavailable error
    pub fn unavailable(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Create an invalid response error
    pub fn invalid_response(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by a node handler.
///
/// Handlers never decide to end a run. They either report a collaborator
/// failure (transient) or that their inputs make the step impossible
/// (validation); the engine maps these onto `WorkflowError`.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Transient(#[from] CollaboratorError),

    #[error("{0}")]
    Validation(String),
}

impl NodeError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
