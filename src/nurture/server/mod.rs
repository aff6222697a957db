// SPDX-License-Identifier: MIT

//! HTTP surface: lead intake, reply webhook, approvals and metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::{StoreError, WorkflowError};
use crate::nurture::builder::Runtime;
use crate::nurture::workflow::engine::RunOutcome;
use crate::nurture::workflow::gateway::{Gateway, ResumeEvent, StartedRun, TimedOutRun};
use crate::nurture::workflow::state::{InboundReply, NewLead, RunRecord};

pub async fn serve(
    runtime: Runtime,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // `log` already goes to env_logger; this only picks up tower-http spans
    let _ = tracing::subscriber::set_global_default(tracing_subscriber::fmt().finish());

    if runtime.config.timeout_sweep_secs > 0 {
        spawn_timeout_sweep(
            runtime.gateway.clone(),
            Duration::from_secs(runtime.config.timeout_sweep_secs),
        );
    }

    let app = router(runtime);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(runtime: Runtime) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/leads", post(create_lead))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/advance", post(advance_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/webhooks/reply", post(reply_webhook))
        .route("/api/approvals", post(approve))
        .route("/api/timeouts/check", post(check_timeouts))
        .route("/api/metrics", get(metrics))
        .route("/api/metrics/nodes/{name}", get(node_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(runtime)
}

/// Periodically fire timeouts for runs waiting too long on a reply
pub fn spawn_timeout_sweep(gateway: Gateway, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let now = gateway.engine().context().clock.now();
            if let Err(e) = gateway.check_timeouts(now).await {
                log::warn!("Timeout sweep failed: {}", e);
            }
        }
    })
}

/// `WorkflowError` rendered as an HTTP response
pub struct ApiError(WorkflowError);

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            WorkflowError::RunNotFound(_) | WorkflowError::Store(StoreError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            WorkflowError::InvalidResume { .. }
            | WorkflowError::Store(StoreError::ConcurrentConflict { .. }) => StatusCode::CONFLICT,
            WorkflowError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            WorkflowError::Transient { .. } => StatusCode::SERVICE_UNAVAILABLE,
            WorkflowError::UnknownNode { .. } | WorkflowError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
            "retriable": self.0.is_retriable(),
        });
        (self.status(), Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_lead(
    State(runtime): State<Runtime>,
    Json(lead): Json<NewLead>,
) -> ApiResult<StartedRun> {
    Ok(Json(runtime.gateway.start(lead).await?))
}

async fn get_run(State(runtime): State<Runtime>, Path(id): Path<String>) -> ApiResult<RunRecord> {
    let record = runtime
        .gateway
        .engine()
        .store()
        .get(&id)
        .await
        .map_err(WorkflowError::from)?;
    Ok(Json(record))
}

async fn advance_run(
    State(runtime): State<Runtime>,
    Path(id): Path<String>,
) -> ApiResult<RunOutcome> {
    Ok(Json(runtime.gateway.engine().advance(&id).await?))
}

#[derive(Deserialize)]
struct CancelRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn cancel_run(
    State(runtime): State<Runtime>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<RunOutcome> {
    let event = ResumeEvent::Cancel {
        reason: request.reason,
    };
    Ok(Json(runtime.gateway.resume(&id, event).await?))
}

#[derive(Deserialize)]
struct ReplyWebhook {
    run_id: String,
    content: String,
    #[serde(default)]
    received_at: Option<DateTime<Utc>>,
    #[serde(default = "default_source")]
    source: String,
}

fn default_source() -> String {
    "webhook".to_string()
}

async fn reply_webhook(
    State(runtime): State<Runtime>,
    Json(payload): Json<ReplyWebhook>,
) -> ApiResult<RunOutcome> {
    let received_at = payload
        .received_at
        .unwrap_or_else(|| runtime.gateway.engine().context().clock.now());
    let event = ResumeEvent::InboundReply(InboundReply {
        content: payload.content,
        received_at,
        source: payload.source,
    });
    Ok(Json(runtime.gateway.resume(&payload.run_id, event).await?))
}

#[derive(Deserialize)]
struct ApprovalRequest {
    run_id: String,
    approved: bool,
}

async fn approve(
    State(runtime): State<Runtime>,
    Json(request): Json<ApprovalRequest>,
) -> ApiResult<RunOutcome> {
    let event = ResumeEvent::Approval {
        approved: request.approved,
    };
    Ok(Json(runtime.gateway.resume(&request.run_id, event).await?))
}

async fn check_timeouts(State(runtime): State<Runtime>) -> ApiResult<Vec<TimedOutRun>> {
    let now = runtime.gateway.engine().context().clock.now();
    Ok(Json(runtime.gateway.check_timeouts(now).await?))
}

async fn metrics(State(runtime): State<Runtime>) -> Json<Value> {
    Json(json!({
        "runs": runtime.metrics.run_stats(),
        "nodes": runtime.metrics.all_node_stats(),
    }))
}

async fn node_metrics(State(runtime): State<Runtime>, Path(name): Path<String>) -> Response {
    match runtime.metrics.node_stats(&name) {
        Some(stats) => Json(stats).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no executions recorded for node '{}'", name) })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (WorkflowError::RunNotFound("r".into()), StatusCode::NOT_FOUND),
            (
                WorkflowError::invalid_resume("r", "approval", None),
                StatusCode::CONFLICT,
            ),
            (
                WorkflowError::Transient {
                    run_id: "r".into(),
                    node: "send_outreach".into(),
                    source: CollaboratorError::unavailable("sender", "down"),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                WorkflowError::Validation {
                    run_id: "r".into(),
                    node: "qualify".into(),
                    message: "bad".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                WorkflowError::UnknownNode {
                    run_id: "r".into(),
                    node: "x".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_reply_webhook_defaults() {
        let payload: ReplyWebhook =
            serde_json::from_str(r#"{"run_id": "r1", "content": "sounds good"}"#).unwrap();
        assert_eq!(payload.source, "webhook");
        assert!(payload.received_at.is_none());
    }
}
