// SPDX-License-Identifier: MIT

//! Response classification contract and a keyword classifier

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CollaboratorError;

/// How a reply is routed
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseClass {
    Positive,
    Objection,
    NoResponse,
    Unsubscribe,
}

impl fmt::Display for ResponseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Positive => "positive",
            Self::Objection => "objection",
            Self::NoResponse => "no_response",
            Self::Unsubscribe => "unsubscribe",
        };
        f.write_str(s)
    }
}

impl FromStr for ResponseClass {
    type Err = String;

    /// Lenient about case and separators, strict about the value set
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "positive" | "interested" => Ok(Self::Positive),
            "objection" => Ok(Self::Objection),
            "no_response" | "none" => Ok(Self::NoResponse),
            "unsubscribe" | "opt_out" => Ok(Self::Unsubscribe),
            other => Err(format!("unknown response classification '{}'", other)),
        }
    }
}

/// Classifier output
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClassifiedResponse {
    pub classification: ResponseClass,
    pub sentiment: String,
    /// In [0,1]
    pub interest_level: f64,
    #[serde(default)]
    pub objections: Vec<String>,
}

#[async_trait]
pub trait ResponseClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ClassifiedResponse, CollaboratorError>;
}

static UNSUBSCRIBE_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "unsubscribe",
        "remove me",
        "stop emailing",
        "do not contact",
        "don't contact",
        "opt out",
    ]
});

static AUTO_REPLY_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "out of office",
        "out of the office",
        "automatic reply",
        "auto-reply",
        "on vacation",
    ]
});

/// (phrase, objection label)
static OBJECTION_PHRASES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("too expensive", "price"),
        ("price", "price"),
        ("budget", "budget"),
        ("not now", "timing"),
        ("next quarter", "timing"),
        ("already have", "incumbent vendor"),
        ("already use", "incumbent vendor"),
        ("not interested", "no need"),
        ("don't need", "no need"),
    ]
});

static POSITIVE_PHRASES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "interested",
        "let's talk",
        "lets talk",
        "schedule",
        "book a",
        "sounds good",
        "call me",
        "set up a call",
        "tell me more",
    ]
});

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| text.contains(p))
}

/// Phrase-table classifier. Order of precedence: unsubscribe, auto-reply,
/// objection, positive; anything else counts as no response.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResponseClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<ClassifiedResponse, CollaboratorError> {
        let lower = text.to_lowercase();

        if contains_any(&lower, &UNSUBSCRIBE_PHRASES) {
            return Ok(ClassifiedResponse {
                classification: ResponseClass::Unsubscribe,
                sentiment: "negative".to_string(),
                interest_level: 0.0,
                objections: vec![],
            });
        }
        if lower.trim().is_empty() || contains_any(&lower, &AUTO_REPLY_PHRASES) {
            return Ok(ClassifiedResponse {
                classification: ResponseClass::NoResponse,
                sentiment: "neutral".to_string(),
                interest_level: 0.0,
                objections: vec![],
            });
        }

        let mut objections: Vec<String> = Vec::new();
        for (phrase, label) in OBJECTION_PHRASES.iter() {
            if lower.contains(phrase) && !objections.iter().any(|o| o == label) {
                objections.push(label.to_string());
            }
        }
        if !objections.is_empty() {
            return Ok(ClassifiedResponse {
                classification: ResponseClass::Objection,
                sentiment: "negative".to_string(),
                interest_level: 0.3,
                objections,
            });
        }

        if contains_any(&lower, &POSITIVE_PHRASES) {
            return Ok(ClassifiedResponse {
                classification: ResponseClass::Positive,
                sentiment: "positive".to_string(),
                interest_level: 0.8,
                objections: vec![],
            });
        }

        Ok(ClassifiedResponse {
            classification: ResponseClass::NoResponse,
            sentiment: "neutral".to_string(),
            interest_level: 0.1,
            objections: vec![],
        })
    }
}
