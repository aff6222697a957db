// SPDX-License-Identifier: MIT

pub mod builder;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod server;
pub mod workflow;
