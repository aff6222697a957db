// SPDX-License-Identifier: MIT

//! Lead-nurturing workflow engine
//!
//! Runs leads through qualification, outreach, reply handling and booking as
//! a persisted, resumable state machine.

pub mod collab;
pub mod error;
pub mod nurture;
