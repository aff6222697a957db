// SPDX-License-Identifier: MIT

//! Collaborator contracts consumed by node handlers
//!
//! Every external service the workflow touches sits behind one trait here and
//! fails with `CollaboratorError`, whatever the provider underneath.

pub mod classifier;
pub mod crm;
pub mod draft;
pub mod research;
pub mod sender;

use std::sync::Arc;

use classifier::{KeywordClassifier, ResponseClassifier};
use crm::{CrmClient, LogCrmClient};
use draft::{DraftGenerator, TemplateDraftGenerator};
use research::{ResearchLookup, StaticResearch};
use sender::{LogSender, Sender};

/// The services a node handler may call
#[derive(Clone)]
pub struct Collaborators {
    pub research: Arc<dyn ResearchLookup>,
    pub drafts: Arc<dyn DraftGenerator>,
    pub classifier: Arc<dyn ResponseClassifier>,
    pub sender: Arc<dyn Sender>,
    pub crm: Arc<dyn CrmClient>,
}

impl Collaborators {
    /// Bundled implementations that need no external service
    pub fn builtin() -> Self {
        Self {
            research: Arc::new(StaticResearch::new()),
            drafts: Arc::new(TemplateDraftGenerator::default()),
            classifier: Arc::new(KeywordClassifier::new()),
            sender: Arc::new(LogSender::new()),
            crm: Arc::new(LogCrmClient),
        }
    }

    pub fn with_research(mut self, research: Arc<dyn ResearchLookup>) -> Self {
        self.research = research;
        self
    }

    pub fn with_drafts(mut self, drafts: Arc<dyn DraftGenerator>) -> Self {
        self.drafts = drafts;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ResponseClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_crm(mut self, crm: Arc<dyn CrmClient>) -> Self {
        self.crm = crm;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::builtin()
    }
}
