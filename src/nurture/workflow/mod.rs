// SPDX-License-Identifier: MIT

pub mod engine;
pub mod gateway;
pub mod locks;
pub mod nodes;
pub mod registry;
pub mod router;
pub mod state;
