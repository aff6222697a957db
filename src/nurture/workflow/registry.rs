// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::collab::Collaborators;
use crate::error::{NodeError, UnknownNode};
use crate::nurture::clock::Clock;
use crate::nurture::config::NurtureConfig;
use crate::nurture::workflow::state::{StateUpdate, WorkflowState};

/// What a handler gets besides the state: the collaborator bundle, the
/// configuration and the clock. Passed explicitly on every call.
#[derive(Clone)]
pub struct NodeContext {
    pub collaborators: Collaborators,
    pub config: Arc<NurtureConfig>,
    pub clock: Arc<dyn Clock>,
}

/// One unit of work in the workflow.
///
/// Handlers read the state and return only the fields they change. They must
/// not decide where the run goes next; that is the router's job.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Registry key (must be unique)
    fn name(&self) -> &str;

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext)
        -> Result<StateUpdate, NodeError>;
}

#[derive(Clone)]
pub struct NodeRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn NodeHandler>>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, handler: Arc<dyn NodeHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.insert(handler.name().to_string(), handler);
    }

    pub async fn resolve(&self, name: &str) -> Result<Arc<dyn NodeHandler>, UnknownNode> {
        let handlers = self.handlers.read().await;
        handlers
            .get(name)
            .cloned()
            .ok_or_else(|| UnknownNode(name.to_string()))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }

    /// Registered node names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
