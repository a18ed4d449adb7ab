//! API handlers.
//!
//! Each handler translates one logical scheduler operation to JSON. Benign
//! races keep their scheduler semantics: removing an unknown application or
//! allocating for a finished one succeeds with an empty result.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use stratus_core::{
    ApplicationId, Container, ContainerId, ContainerReport, NodeId, Priority, ResourceRequest,
    Resources,
};
use stratus_launcher::MasterCommand;
use stratus_scheduler::SchedulerError;

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

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn scheduler_error(err: &SchedulerError) -> axum::response::Response {
    let status = match err {
        SchedulerError::UnknownQueue(_) => StatusCode::NOT_FOUND,
        SchedulerError::NotLeafQueue(_) => StatusCode::BAD_REQUEST,
        SchedulerError::AccessDenied { .. } => StatusCode::FORBIDDEN,
        SchedulerError::ApplicationExists(_) => StatusCode::CONFLICT,
        SchedulerError::InvalidTree(_) | SchedulerError::TopologyChanged(_) => {
            StatusCode::BAD_REQUEST
        }
        SchedulerError::Node(e) => match e {
            stratus_cluster::TrackerError::UnknownNode(_) => StatusCode::NOT_FOUND,
            stratus_cluster::TrackerError::NodeAlreadyRegistered(_) => StatusCode::CONFLICT,
        },
    };
    error_response(&err.to_string(), status)
}

fn parse_app_id(raw: &str) -> Result<ApplicationId, axum::response::Response> {
    raw.parse()
        .map_err(|e: stratus_core::ParseIdError| error_response(&e.to_string(), StatusCode::BAD_REQUEST))
}

// ── Applications ───────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct AddApplicationRequest {
    pub app_id: ApplicationId,
    pub user: String,
    pub queue: String,
    #[serde(default)]
    pub priority: Priority,
}

/// POST /api/v1/applications
pub async fn add_application(
    State(state): State<ApiState>,
    Json(req): Json<AddApplicationRequest>,
) -> impl IntoResponse {
    match state
        .scheduler
        .add_application(req.app_id, &req.user, &req.queue, req.priority)
    {
        Ok(()) => {
            if let Some(launcher) = &state.launcher {
                launcher.submit(MasterCommand::Launch {
                    app_id: req.app_id,
                    user: req.user.clone(),
                    queue: req.queue.clone(),
                });
            }
            (StatusCode::CREATED, ApiResponse::ok(req.app_id.to_string())).into_response()
        }
        Err(e) => scheduler_error(&e),
    }
}

/// DELETE /api/v1/applications/{id}
///
/// Idempotent by contract; an unknown id still answers 200.
pub async fn remove_application(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let app_id = match parse_app_id(&id) {
        Ok(app_id) => app_id,
        Err(resp) => return resp,
    };
    state.scheduler.remove_application(app_id);
    if let Some(launcher) = &state.launcher {
        launcher.submit(MasterCommand::Cleanup { app_id });
    }
    ApiResponse::ok("removed").into_response()
}

#[derive(serde::Deserialize)]
pub struct AllocateRequest {
    #[serde(default)]
    pub asks: Vec<ResourceRequest>,
    #[serde(default)]
    pub releases: Vec<ContainerId>,
}

#[derive(serde::Serialize)]
pub struct AllocateResponse {
    pub containers: Vec<Container>,
}

/// POST /api/v1/applications/{id}/allocate
pub async fn allocate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<AllocateRequest>,
) -> impl IntoResponse {
    let app_id = match parse_app_id(&id) {
        Ok(app_id) => app_id,
        Err(resp) => return resp,
    };
    let containers = state.scheduler.allocate(app_id, req.asks, &req.releases);
    ApiResponse::ok(AllocateResponse { containers }).into_response()
}

// ── Queues ─────────────────────────────────────────────────────

/// GET /api/v1/queues
pub async fn list_queues(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.scheduler.queue_snapshots())
}

// ── Nodes ──────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct AddNodeRequest {
    pub node_id: NodeId,
    pub hostname: String,
    pub capability: Resources,
}

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.scheduler.node_snapshots())
}

/// POST /api/v1/nodes
pub async fn add_node(
    State(state): State<ApiState>,
    Json(req): Json<AddNodeRequest>,
) -> impl IntoResponse {
    match state
        .scheduler
        .add_node(req.node_id, &req.hostname, req.capability)
    {
        Ok(snapshot) => (StatusCode::CREATED, ApiResponse::ok(snapshot)).into_response(),
        Err(e) => scheduler_error(&e),
    }
}

/// DELETE /api/v1/nodes/{id}
pub async fn remove_node(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.scheduler.remove_node(&NodeId::from(id)) {
        Ok(()) => ApiResponse::ok("removed").into_response(),
        Err(e) => scheduler_error(&e),
    }
}

#[derive(serde::Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub reports: Vec<ContainerReport>,
}

#[derive(serde::Serialize)]
pub struct HeartbeatResponse {
    pub completed: Vec<ContainerId>,
}

/// POST /api/v1/nodes/{id}/heartbeat
pub async fn node_heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    let completed = state.scheduler.node_update(&NodeId::from(id), &req.reports);
    ApiResponse::ok(HeartbeatResponse { completed })
}
