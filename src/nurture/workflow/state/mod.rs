// SPDX-License-Identifier: MIT

//! State management for lead runs
//!
//! This module provides:
//! - `WorkflowState` - the persisted per-run state and its record types
//! - `StateUpdate` - partial updates returned by node handlers, and merging
//! - `StateStore` - durable storage with compare-and-swap puts

mod schema;
mod store;
mod update;

pub use schema::{
    InboundReply, LeadProfile, NewLead, OutreachRecord, ResponseRecord, RunRecord, SuspendReason,
    WorkflowState, WorkflowStatus, END_NODE, SCHEMA_VERSION,
};
pub use store::{FileStateStore, InMemoryStateStore, StateStore};
pub use update::StateUpdate;
