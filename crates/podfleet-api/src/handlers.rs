//! REST API handlers.
//!
//! Each handler calls into the `Scheduler` and returns JSON in the
//! `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use podfleet_scheduler::SchedulerError;
use podfleet_state::RequestStatus;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn parse_request_id(raw: &str) -> Result<Uuid, axum::response::Response> {
    Uuid::parse_str(raw).map_err(|_| {
        error_response(&format!("invalid request id: {raw}"), StatusCode::BAD_REQUEST)
            .into_response()
    })
}

// ── Requests ───────────────────────────────────────────────────

/// Enqueue request body.
#[derive(serde::Deserialize)]
pub struct EnqueueRequest {
    pub workflow_name: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Accepted request, returned from enqueue.
#[derive(serde::Serialize)]
pub struct EnqueueAccepted {
    pub request_id: Uuid,
    pub status: RequestStatus,
}

/// POST /api/v1/requests
pub async fn enqueue_request(
    State(state): State<ApiState>,
    Json(req): Json<EnqueueRequest>,
) -> impl IntoResponse {
    match state
        .scheduler
        .enqueue(&req.workflow_name, req.parameters)
        .await
    {
        Ok(request_id) => {
            debug!(%request_id, workflow = %req.workflow_name, "request accepted");
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(EnqueueAccepted {
                    request_id,
                    status: RequestStatus::Pending,
                }),
            )
                .into_response()
        }
        Err(e @ SchedulerError::InvalidRequest(_)) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/requests/{id}
pub async fn get_request(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match parse_request_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.scheduler.get_request(&id) {
        Some(request) => ApiResponse::ok(request).into_response(),
        None => error_response("request not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Queue ──────────────────────────────────────────────────────

/// GET /api/v1/status
pub async fn queue_status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.scheduler.queue_status().await)
}

// ── Pods ───────────────────────────────────────────────────────

/// GET /api/v1/pods
pub async fn list_pods(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.scheduler.list_pods().await)
}

/// GET /api/v1/pods/{id}
pub async fn get_pod(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.scheduler.get_pod(&id).await {
        Some(pod) => ApiResponse::ok(pod).into_response(),
        None => error_response("pod not found", StatusCode::NOT_FOUND).into_response(),
    }
}
