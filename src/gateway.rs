//! HTTP gateway: start a workflow over HTTP and poll its status.
//!
//! The start endpoint answers immediately with 202 and a status URL; the
//! caller polls that URL until the status is terminal. Workflow failures are
//! data, not HTTP errors: a failed instance reports 200 with status
//! `Failed`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{Client, ClientError};
use crate::runtime::status::WorkflowStatus;

#[derive(Clone)]
struct AppState {
    client: Client,
}

pub fn router(client: Client) -> Router {
    Router::new()
        .route("/v1/workflows/:name/instances", post(start_workflow))
        .route("/v1/instances/:id", get(instance_status))
        .route("/v1/instances/:id/terminate", post(terminate_instance))
        .with_state(AppState { client })
}

#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    instance_id: Option<String>,
    input: Option<Value>,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    instance_id: String,
    status_url: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    instance_id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TerminateRequest {
    reason: Option<String>,
}

/// JSON string inputs pass through verbatim; structured inputs are handed to
/// the workflow as their JSON text.
fn input_text(input: Option<Value>) -> String {
    match input {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn map_client_error(err: ClientError) -> Response {
    match err {
        ClientError::DuplicateInstance(id) => (
            StatusCode::CONFLICT,
            format!("instance already exists: {id}"),
        )
            .into_response(),
        ClientError::NotFound(id) => {
            (StatusCode::NOT_FOUND, format!("unknown instance: {id}")).into_response()
        }
        ClientError::Storage(e) => {
            (StatusCode::SERVICE_UNAVAILABLE, format!("storage error: {e}")).into_response()
        }
    }
}

async fn start_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<StartRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let input = input_text(req.input);
    let result = match req.instance_id {
        Some(id) => state
            .client
            .start_with_id(&id, &name, &input)
            .await
            .map(|_| id),
        None => state.client.start(&name, &input).await,
    };
    match result {
        Ok(instance_id) => {
            let body = StartResponse {
                status_url: format!("/v1/instances/{instance_id}"),
                instance_id,
            };
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        Err(e) => map_client_error(e),
    }
}

async fn instance_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let status = state.client.status(&id).await;
    if matches!(status, WorkflowStatus::NotFound) {
        return (StatusCode::NOT_FOUND, format!("unknown instance: {id}")).into_response();
    }
    let (output, error) = match &status {
        WorkflowStatus::Completed { output } => (Some(output.clone()), None),
        WorkflowStatus::Failed { error } => (None, Some(error.clone())),
        WorkflowStatus::Terminated { reason } => (None, Some(reason.clone())),
        _ => (None, None),
    };
    Json(StatusResponse {
        instance_id: id,
        status: status.label(),
        output,
        error,
    })
    .into_response()
}

async fn terminate_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<TerminateRequest>>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let reason = req.reason.unwrap_or_else(|| "terminated via API".to_string());
    match state.client.terminate(&id, &reason).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => map_client_error(e),
    }
}
