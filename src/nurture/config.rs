// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Loaded from YAML, then overridden from `LEADFLOW_*` environment variables:
//!
//! ```yaml
//! qualification_threshold: 0.5
//! auto_approve_threshold: 0.8
//! max_followup_attempts: 3
//! max_objection_cycles: 2
//! response_timeout_duration: 72h
//! store:
//!   kind: file
//!   dir: ./runs
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::LeadflowError;

/// Weights of the qualification score. Normalised by their sum, so only the
/// ratios matter.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    pub fit: f64,
    pub compliance_urgency: f64,
    pub contact_completeness: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            fit: 0.6,
            compliance_urgency: 0.3,
            contact_completeness: 0.1,
        }
    }
}

/// Run directory used when the configuration names none
pub const DEFAULT_STORE_DIR: &str = ".leadflow/runs";

/// Where run records live. `memory` loses every run on exit and has to be
/// asked for.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    Memory,
    File {
        dir: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            dir: PathBuf::from(DEFAULT_STORE_DIR),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NurtureConfig {
    pub qualification_threshold: f64,
    pub auto_approve_threshold: f64,
    pub max_followup_attempts: u32,
    pub max_objection_cycles: u32,
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub response_timeout_duration: Duration,
    pub scoring: ScoringWeights,
    /// Nodes a single `advance` call may run before handing back `continued`
    pub max_steps_per_advance: u32,
    pub store: StoreConfig,
    /// Booking endpoint for the HTTP CRM client; the logging client is used
    /// when absent
    pub crm_endpoint: Option<String>,
    /// Interval of the server's timeout sweep, 0 disables it
    pub timeout_sweep_secs: u64,
}

impl Default for NurtureConfig {
    fn default() -> Self {
        Self {
            qualification_threshold: 0.5,
            auto_approve_threshold: 0.8,
            max_followup_attempts: 3,
            max_objection_cycles: 2,
            response_timeout_duration: Duration::from_secs(72 * 3600),
            scoring: ScoringWeights::default(),
            max_steps_per_advance: 64,
            store: StoreConfig::default(),
            crm_endpoint: None,
            timeout_sweep_secs: 0,
        }
    }
}

impl NurtureConfig {
    /// Load from a YAML file, apply env overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LeadflowError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            LeadflowError::config(format!("cannot read {:?}: {}", path.as_ref(), e))
        })?;
        let mut config = Self::parse_yaml(&content)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus env overrides, validated
    pub fn from_env() -> Result<Self, LeadflowError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, LeadflowError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply overrides from a variable lookup (the environment in practice)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), LeadflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Result<T, LeadflowError> {
            value
                .trim()
                .parse()
                .map_err(|_| LeadflowError::config(format!("{} has invalid value '{}'", key, value)))
        }

        if let Some(v) = lookup("LEADFLOW_QUALIFICATION_THRESHOLD") {
            self.qualification_threshold = parsed("LEADFLOW_QUALIFICATION_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("LEADFLOW_AUTO_APPROVE_THRESHOLD") {
            self.auto_approve_threshold = parsed("LEADFLOW_AUTO_APPROVE_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("LEADFLOW_MAX_FOLLOWUP_ATTEMPTS") {
            self.max_followup_attempts = parsed("LEADFLOW_MAX_FOLLOWUP_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("LEADFLOW_MAX_OBJECTION_CYCLES") {
            self.max_objection_cycles = parsed("LEADFLOW_MAX_OBJECTION_CYCLES", v)?;
        }
        if let Some(v) = lookup("LEADFLOW_RESPONSE_TIMEOUT") {
            self.response_timeout_duration = parse_duration(&v).map_err(LeadflowError::config)?;
        }
        if let Some(v) = lookup("LEADFLOW_STORE_DIR") {
            self.store = StoreConfig::File { dir: v.into() };
        }
        if let Some(v) = lookup("LEADFLOW_CRM_ENDPOINT") {
            self.crm_endpoint = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), LeadflowError> {
        for (name, value) in [
            ("qualification_threshold", self.qualification_threshold),
            ("auto_approve_threshold", self.auto_approve_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(LeadflowError::config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        let weights = &self.scoring;
        let all = [weights.fit, weights.compliance_urgency, weights.contact_completeness];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) || all.iter().sum::<f64>() <= 0.0 {
            return Err(LeadflowError::config(
                "scoring weights must be non-negative with a positive sum",
            ));
        }
        if self.response_timeout_duration.is_zero() {
            return Err(LeadflowError::config("response_timeout_duration must be positive"));
        }
        if self.max_steps_per_advance == 0 {
            return Err(LeadflowError::config("max_steps_per_advance must be positive"));
        }
        if let Some(endpoint) = &self.crm_endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                LeadflowError::config(format!("crm_endpoint '{}' is not a URL: {}", endpoint, e))
            })?;
        }
        if self.auto_approve_threshold < self.qualification_threshold {
            log::warn!(
                "auto_approve_threshold {} is below qualification_threshold {}: every qualified lead is auto-approved",
                self.auto_approve_threshold,
                self.qualification_threshold
            );
        }
        Ok(())
    }

    /// Response timeout as a chrono duration, for comparisons with timestamps
    pub fn response_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.response_timeout_duration)
            .unwrap_or_else(|_| chrono::Duration::MAX)
    }
}

/// Parse `"90s"`, `"15m"`, `"72h"`, `"3d"` or a bare number of seconds
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", input))?;
    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        other => return Err(format!("unknown duration unit '{}' in '{}'", other, input)),
    };
    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", input))
}

fn serialize_duration<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{}s", d.as_secs()))
}

fn deserialize_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }
    match Raw::deserialize(d)? {
        Raw::Seconds(s) => Ok(Duration::from_secs(s)),
        Raw::Text(t) => parse_duration(&t).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = NurtureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.response_timeout(), chrono::Duration::hours(72));
        assert_eq!(
            config.store,
            StoreConfig::File {
                dir: PathBuf::from(DEFAULT_STORE_DIR)
            }
        );
    }

    #[test]
    fn test_memory_store_is_opt_in() {
        let config = NurtureConfig::parse_yaml("qualification_threshold: 0.4").unwrap();
        assert!(matches!(config.store, StoreConfig::File { .. }));

        let config = NurtureConfig::parse_yaml("store:\n  kind: memory\n").unwrap();
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
            qualification_threshold: 0.4
            max_followup_attempts: 2
            response_timeout_duration: 3d
            scoring:
              fit: 1.0
            store:
              kind: file
              dir: /tmp/runs
        "#;
        let config = NurtureConfig::parse_yaml(yaml).unwrap();
        assert_eq!(config.qualification_threshold, 0.4);
        assert_eq!(config.auto_approve_threshold, 0.8);
        assert_eq!(config.max_followup_attempts, 2);
        assert_eq!(config.response_timeout_duration, Duration::from_secs(3 * 86_400));
        assert_eq!(config.scoring.fit, 1.0);
        // unspecified weights keep their defaults
        assert_eq!(config.scoring.compliance_urgency, 0.3);
        assert_eq!(
            config.store,
            StoreConfig::File {
                dir: PathBuf::from("/tmp/runs")
            }
        );
    }

    #[test]
    fn test_numeric_timeout_is_seconds() {
        let config = NurtureConfig::parse_yaml("response_timeout_duration: 120").unwrap();
        assert_eq!(config.response_timeout_duration, Duration::from_secs(120));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LEADFLOW_QUALIFICATION_THRESHOLD", "0.65"),
            ("LEADFLOW_MAX_OBJECTION_CYCLES", "5"),
            ("LEADFLOW_RESPONSE_TIMEOUT", "48h"),
            ("LEADFLOW_STORE_DIR", "/var/lib/leadflow"),
        ]
        .into_iter()
        .collect();

        let mut config = NurtureConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.qualification_threshold, 0.65);
        assert_eq!(config.max_objection_cycles, 5);
        assert_eq!(config.response_timeout_duration, Duration::from_secs(48 * 3600));
        assert_eq!(
            config.store,
            StoreConfig::File {
                dir: PathBuf::from("/var/lib/leadflow")
            }
        );
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = NurtureConfig::default();
        let err = config
            .apply_env(|k| (k == "LEADFLOW_MAX_FOLLOWUP_ATTEMPTS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("LEADFLOW_MAX_FOLLOWUP_ATTEMPTS"));
    }

    #[test]
    fn test_validation() {
        let config = NurtureConfig {
            qualification_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NurtureConfig {
            crm_endpoint: Some("not a url".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NurtureConfig {
            scoring: ScoringWeights {
                fit: 0.0,
                compliance_urgency: 0.0,
                contact_completeness: 0.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("3w").is_err());
        assert!(parse_duration("h").is_err());
    }
}
