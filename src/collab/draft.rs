// SPDX-License-Identifier: MIT

//! Draft generation contract and a template-based generator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::research::ResearchFindings;
use crate::error::CollaboratorError;

/// What kind of message a draft is
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutreachKind {
    Initial,
    FollowUp,
    Revision,
}

/// A drafted message waiting to be sent
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Draft {
    pub subject: String,
    pub body: String,
    pub kind: OutreachKind,
}

/// Everything a generator may use to write a message. Calling `generate`
/// again with an updated context (new objections, next follow-up number)
/// yields the revised message.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftContext {
    pub tenant_id: String,
    pub company: String,
    pub contact_name: Option<String>,
    pub industry: Option<String>,
    pub kind: OutreachKind,
    pub research: ResearchFindings,
    pub objections: Vec<String>,
    /// 1-based follow-up number when `kind` is `FollowUp`
    pub followup_number: u32,
    pub previous_subject: Option<String>,
}

/// Generator output
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GeneratedDraft {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait DraftGenerator: Send + Sync {
    async fn generate(&self, context: &DraftContext) -> Result<GeneratedDraft, CollaboratorError>;
}

/// Deterministic generator that fills fixed templates. Same context, same
/// message.
#[derive(Debug, Clone, Default)]
pub struct TemplateDraftGenerator {
    sender_name: String,
}

impl TemplateDraftGenerator {
    pub fn new(sender_name: impl Into<String>) -> Self {
        Self {
            sender_name: sender_name.into(),
        }
    }

    fn greeting(context: &DraftContext) -> String {
        match &context.contact_name {
            Some(name) => format!("Hi {},", name),
            None => format!("Hello {} team,", context.company),
        }
    }

    fn signature(&self) -> String {
        if self.sender_name.is_empty() {
            "Best regards".to_string()
        } else {
            format!("Best regards,\n{}", self.sender_name)
        }
    }
}

#[async_trait]
impl DraftGenerator for TemplateDraftGenerator {
    async fn generate(&self, context: &DraftContext) -> Result<GeneratedDraft, CollaboratorError> {
        let greeting = Self::greeting(context);
        let (subject, middle) = match context.kind {
            OutreachKind::Initial => {
                let focus = match context.research.applicable_rules.as_slice() {
                    [] => "your compliance program".to_string(),
                    rules => rules.join(", "),
                };
                let mut middle = format!(
                    "Teams like {} are spending more time than ever on {}.",
                    context.company, focus
                );
                if let Some(case) = context.research.similar_cases.first() {
                    middle.push_str(&format!(" We recently helped with {}.", case));
                }
                if let Some(gap) = context.research.gaps.first() {
                    middle.push_str(&format!(" One common gap we see: {}.", gap));
                }
                (format!("Compliance support for {}", context.company), middle)
            }
            OutreachKind::FollowUp => {
                let base = context
                    .previous_subject
                    .clone()
                    .unwrap_or_else(|| format!("Compliance support for {}", context.company));
                let subject = if base.starts_with("Re: ") {
                    base
                } else {
                    format!("Re: {}", base)
                };
                (
                    subject,
                    format!(
                        "Following up on my earlier note (follow-up {}). Would a short call next week work?",
                        context.followup_number
                    ),
                )
            }
            OutreachKind::Revision => {
                let concerns = match context.objections.as_slice() {
                    [] => "the points you raised".to_string(),
                    list => list.join("; "),
                };
                (
                    format!("Your questions about {}", concerns),
                    format!(
                        "Thanks for the candid reply. On {}: we scope the work to what {} actually needs, so there is no long commitment up front.",
                        concerns, context.company
                    ),
                )
            }
        };

        Ok(GeneratedDraft {
            subject,
            body: format!("{}\n\n{}\n\n{}", greeting, middle, self.signature()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(kind: OutreachKind) -> DraftContext {
        DraftContext {
            tenant_id: "t1".into(),
            company: "Acme Dental".into(),
            contact_name: Some("Dana".into()),
            industry: Some("dental".into()),
            kind,
            research: ResearchFindings {
                applicable_rules: vec!["HIPAA".into()],
                gaps: vec![],
                similar_cases: vec!["Bright Smiles".into()],
            },
            objections: vec![],
            followup_number: 0,
            previous_subject: None,
        }
    }

    #[tokio::test]
    async fn test_initial_uses_research() {
        let generator = TemplateDraftGenerator::new("Sam");
        let draft = generator.generate(&context(OutreachKind::Initial)).await.unwrap();
        assert_eq!(draft.subject, "Compliance support for Acme Dental");
        assert!(draft.body.starts_with("Hi Dana,"));
        assert!(draft.body.contains("HIPAA"));
        assert!(draft.body.contains("Bright Smiles"));
        assert!(draft.body.ends_with("Sam"));
    }

    #[tokio::test]
    async fn test_deterministic() {
        let generator = TemplateDraftGenerator::default();
        let ctx = context(OutreachKind::Initial);
        assert_eq!(
            generator.generate(&ctx).await.unwrap(),
            generator.generate(&ctx).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_revision_mentions_objections() {
        let generator = TemplateDraftGenerator::default();
        let mut ctx = context(OutreachKind::Revision);
        ctx.objections = vec!["price".into()];
        let draft = generator.generate(&ctx).await.unwrap();
        assert_eq!(draft.subject, "Your questions about price");
    }

    #[tokio::test]
    async fn test_follow_up_threads_subject() {
        let generator = TemplateDraftGenerator::default();
        let mut ctx = context(OutreachKind::FollowUp);
        ctx.followup_number = 2;
        ctx.previous_subject = Some("Hello".into());
        let draft = generator.generate(&ctx).await.unwrap();
        assert_eq!(draft.subject, "Re: Hello");
        assert!(draft.body.contains("follow-up 2"));
    }
}
