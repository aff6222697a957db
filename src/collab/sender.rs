// SPDX-License-Identifier: MIT

//! Outbound transport contract and a logging sender

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

use super::draft::Draft;
use crate::error::CollaboratorError;

/// Outbound channel
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Voice,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Voice => "voice",
        };
        f.write_str(s)
    }
}

/// Proof that a message left
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SendReceipt {
    pub sent_at: DateTime<Utc>,
    pub external_id: String,
}

#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(
        &self,
        channel: Channel,
        draft: &Draft,
        recipient: &str,
    ) -> Result<SendReceipt, CollaboratorError>;
}

/// A message the logging sender accepted
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel: Channel,
    pub recipient: String,
    pub subject: String,
    pub external_id: String,
}

/// Logs each message instead of delivering it, and keeps a copy for
/// inspection.
#[derive(Debug, Default)]
pub struct LogSender {
    sent: Mutex<Vec<SentMessage>>,
}

impl LogSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages accepted so far
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sender for LogSender {
    async fn send(
        &self,
        channel: Channel,
        draft: &Draft,
        recipient: &str,
    ) -> Result<SendReceipt, CollaboratorError> {
        let external_id = format!("log-{}", uuid::Uuid::new_v4());
        log::info!(
            "Sending {} via {} to {} (subject: '{}')",
            external_id,
            channel,
            recipient,
            draft.subject
        );
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentMessage {
                channel,
                recipient: recipient.to_string(),
                subject: draft.subject.clone(),
                external_id: external_id.clone(),
            });
        }
        Ok(SendReceipt {
            sent_at: Utc::now(),
            external_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::draft::OutreachKind;

    #[tokio::test]
    async fn test_log_sender_records_messages() {
        let sender = LogSender::new();
        let draft = Draft {
            subject: "Hello".into(),
            body: "Body".into(),
            kind: OutreachKind::Initial,
        };
        let receipt = sender
            .send(Channel::Email, &draft, "dana@acme.test")
            .await
            .unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].external_id, receipt.external_id);
        assert_eq!(sent[0].recipient, "dana@acme.test");
        assert!(receipt.external_id.starts_with("log-"));
    }

    #[test]
    fn test_channel_display() {
        assert_eq!(Channel::Sms.to_string(), "sms");
        assert_eq!(
            serde_json::to_value(Channel::Voice).unwrap(),
            serde_json::json!("voice")
        );
    }
}
