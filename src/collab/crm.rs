// SPDX-License-Identifier: MIT

//! CRM handoff contract, a logging client and a generic HTTP client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CollaboratorError;

const COLLABORATOR: &str = "crm";

/// Handoff payload for the CRM; present only on `booking_ready` runs
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BookingPayload {
    pub run_id: String,
    pub tenant_id: String,
    pub lead_id: String,
    pub company: String,
    pub contact_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub qualification_score: f64,
    pub interest_level: Option<f64>,
    pub sentiment: Option<String>,
    pub summary: String,
    pub prepared_at: DateTime<Utc>,
}

/// CRM acknowledgement
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CrmReceipt {
    pub status: String,
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn create_booking(&self, payload: &BookingPayload)
        -> Result<CrmReceipt, CollaboratorError>;
}

/// Logs the payload and acknowledges it
#[derive(Debug, Clone, Default)]
pub struct LogCrmClient;

#[async_trait]
impl CrmClient for LogCrmClient {
    async fn create_booking(
        &self,
        payload: &BookingPayload,
    ) -> Result<CrmReceipt, CollaboratorError> {
        log::info!(
            "CRM handoff for run {} ({}, lead {})",
            payload.run_id,
            payload.company,
            payload.lead_id
        );
        Ok(CrmReceipt {
            status: "logged".to_string(),
        })
    }
}

/// Posts the booking payload as JSON to a fixed endpoint and expects
/// `{"status": "..."}` back.
pub struct HttpCrmClient {
    client: reqwest::Client,
    endpoint: url::Url,
    api_key: Option<String>,
}

impl HttpCrmClient {
    pub fn new(endpoint: url::Url, api_key: Option<String>) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CollaboratorError::unavailable(COLLABORATOR, e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    /// Build from `CRM_API_KEY` in the environment
    pub fn from_env(endpoint: url::Url) -> Result<Self, CollaboratorError> {
        Self::new(endpoint, std::env::var("CRM_API_KEY").ok())
    }
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn create_booking(
        &self,
        payload: &BookingPayload,
    ) -> Result<CrmReceipt, CollaboratorError> {
        let mut request = self.client.post(self.endpoint.clone()).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CollaboratorError::unavailable(COLLABORATOR, e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(CollaboratorError::RateLimited {
                collaborator: COLLABORATOR.to_string(),
                retry_after_secs,
            });
        }
        if status.is_server_error() {
            return Err(CollaboratorError::unavailable(
                COLLABORATOR,
                format!("HTTP {}", status),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::invalid_response(
                COLLABORATOR,
                format!("HTTP {}: {}", status, body),
            ));
        }

        response
            .json::<CrmReceipt>()
            .await
            .map_err(|e| CollaboratorError::invalid_response(COLLABORATOR, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> BookingPayload {
        BookingPayload {
            run_id: "r1".into(),
            tenant_id: "t1".into(),
            lead_id: "l1".into(),
            company: "Acme".into(),
            contact_name: None,
            email: Some("a@acme.test".into()),
            phone: None,
            qualification_score: 0.9,
            interest_level: Some(0.8),
            sentiment: Some("positive".into()),
            summary: "wants a call".into(),
            prepared_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_log_client_acknowledges() {
        let receipt = LogCrmClient.create_booking(&payload()).await.unwrap();
        assert_eq!(receipt.status, "logged");
    }

    #[tokio::test]
    async fn test_http_client_unreachable_is_unavailable() {
        // nothing listens on port 9 locally
        let endpoint = url::Url::parse("http://127.0.0.1:9/bookings").unwrap();
        let client = HttpCrmClient::new(endpoint, None).unwrap();
        let err = client.create_booking(&payload()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable { .. }));
    }
}
