// SPDX-License-Identifier: MIT

//! Runtime assembly
//!
//! Turns a `NurtureConfig` into a ready gateway: picks the store, wires the
//! collaborators and attaches the metrics collector to the engine. A file
//! store gets a metrics journal in the same directory.

use std::sync::Arc;

use crate::collab::crm::HttpCrmClient;
use crate::collab::Collaborators;
use crate::error::LeadflowError;
use crate::nurture::clock::{Clock, SystemClock};
use crate::nurture::config::{NurtureConfig, StoreConfig};
use crate::nurture::metrics::MetricsCollector;
use crate::nurture::workflow::engine::Engine;
use crate::nurture::workflow::gateway::Gateway;
use crate::nurture::workflow::nodes;
use crate::nurture::workflow::registry::NodeContext;
use crate::nurture::workflow::state::{FileStateStore, InMemoryStateStore, StateStore};

/// Metrics journal file name inside a file store's directory
pub const METRICS_JOURNAL: &str = "metrics.jsonl";

/// Everything a caller needs to drive runs
#[derive(Clone)]
pub struct Runtime {
    pub gateway: Gateway,
    pub metrics: Arc<MetricsCollector>,
    pub config: Arc<NurtureConfig>,
}

pub struct Builder {
    config: NurtureConfig,
    collaborators: Option<Collaborators>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn StateStore>>,
}

impl Builder {
    pub fn new(config: NurtureConfig) -> Self {
        Self {
            config,
            collaborators: None,
            clock: Arc::new(SystemClock),
            store: None,
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `store` instead of the one named in the config
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> Result<Runtime, LeadflowError> {
        self.config.validate()?;

        // a store passed in by the caller keeps its metrics in memory
        let (store, metrics): (Arc<dyn StateStore>, MetricsCollector) = match self.store {
            Some(store) => (store, MetricsCollector::new()),
            None => match &self.config.store {
                StoreConfig::Memory => {
                    (Arc::new(InMemoryStateStore::new()), MetricsCollector::new())
                }
                StoreConfig::File { dir } => {
                    log::info!("Using file store at {:?}", dir);
                    let store = FileStateStore::open(dir).await?;
                    let journal = store.dir().join(METRICS_JOURNAL);
                    let metrics = MetricsCollector::open_journal(journal)?;
                    (Arc::new(store), metrics)
                }
            },
        };

        let collaborators = match self.collaborators {
            Some(collaborators) => collaborators,
            None => default_collaborators(&self.config)?,
        };

        let registry = nodes::default_registry().await;

        let config = Arc::new(self.config);
        let context = NodeContext {
            collaborators,
            config: config.clone(),
            clock: self.clock,
        };
        let metrics = Arc::new(metrics);
        let engine = Engine::new(store, registry, context).with_observer(metrics.clone());

        Ok(Runtime {
            gateway: Gateway::new(Arc::new(engine)),
            metrics,
            config,
        })
    }
}

/// Bundled collaborators, with the HTTP CRM client when an endpoint is set
fn default_collaborators(config: &NurtureConfig) -> Result<Collaborators, LeadflowError> {
    let collaborators = Collaborators::builtin();
    match &config.crm_endpoint {
        Some(endpoint) => {
            let url = url::Url::parse(endpoint)
                .map_err(|e| LeadflowError::config(format!("invalid crm_endpoint: {}", e)))?;
            log::info!("Booking handoffs go to {}", url);
            Ok(collaborators.with_crm(Arc::new(HttpCrmClient::from_env(url)?)))
        }
        None => Ok(collaborators),
    }
}
