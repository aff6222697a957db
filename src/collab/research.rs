// SPDX-License-Identifier: MIT

//! Research lookup contract and a static rule catalog

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CollaboratorError;

/// What a research lookup knows about a subject
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct ResearchFindings {
    #[serde(default)]
    pub applicable_rules: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub similar_cases: Vec<String>,
}

impl ResearchFindings {
    /// Fold `other` into `self`, skipping entries already present
    pub fn absorb(&mut self, other: ResearchFindings) {
        fn extend_unique(into: &mut Vec<String>, from: Vec<String>) {
            for item in from {
                if !into.contains(&item) {
                    into.push(item);
                }
            }
        }
        extend_unique(&mut self.applicable_rules, other.applicable_rules);
        extend_unique(&mut self.gaps, other.gaps);
        extend_unique(&mut self.similar_cases, other.similar_cases);
    }

    pub fn is_empty(&self) -> bool {
        self.applicable_rules.is_empty() && self.gaps.is_empty() && self.similar_cases.is_empty()
    }
}

#[async_trait]
pub trait ResearchLookup: Send + Sync {
    async fn lookup(&self, subject: &str) -> Result<ResearchFindings, CollaboratorError>;
}

/// Catalog keyed by keyword; a subject matches every entry whose keyword it
/// contains (case-insensitive).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StaticResearch {
    #[serde(flatten)]
    catalog: HashMap<String, ResearchFindings>,
}

impl StaticResearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, keyword: &str, findings: ResearchFindings) -> Self {
        self.catalog.insert(keyword.to_lowercase(), findings);
        self
    }

    /// Parse a catalog from YAML, one mapping per keyword
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let parsed: StaticResearch = serde_yaml::from_str(content)?;
        Ok(Self {
            catalog: parsed
                .catalog
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        })
    }
}

#[async_trait]
impl ResearchLookup for StaticResearch {
    async fn lookup(&self, subject: &str) -> Result<ResearchFindings, CollaboratorError> {
        let subject = subject.to_lowercase();
        let mut keys: Vec<&String> = self
            .catalog
            .keys()
            .filter(|k| subject.contains(k.as_str()))
            .collect();
        keys.sort();

        let mut findings = ResearchFindings::default();
        for key in keys {
            findings.absorb(self.catalog[key].clone());
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_dedupes() {
        let mut a = ResearchFindings {
            applicable_rules: vec!["HIPAA".into()],
            ..Default::default()
        };
        a.absorb(ResearchFindings {
            applicable_rules: vec!["HIPAA".into(), "OSHA".into()],
            gaps: vec!["no DPO".into()],
            similar_cases: vec![],
        });
        assert_eq!(a.applicable_rules, vec!["HIPAA", "OSHA"]);
        assert_eq!(a.gaps, vec!["no DPO"]);
        assert!(!a.is_empty());
    }

    #[tokio::test]
    async fn test_static_lookup_matches_keywords() {
        let yaml = r#"
            dental:
              applicable_rules: [HIPAA]
              similar_cases: ["Bright Smiles audit"]
            clinic:
              gaps: ["no breach response plan"]
        "#;
        let research = StaticResearch::from_yaml(yaml).unwrap();

        let found = research.lookup("Acme Dental Clinic").await.unwrap();
        assert_eq!(found.applicable_rules, vec!["HIPAA"]);
        assert_eq!(found.gaps, vec!["no breach response plan"]);

        let none = research.lookup("Logistics").await.unwrap();
        assert!(none.is_empty());
    }
}
