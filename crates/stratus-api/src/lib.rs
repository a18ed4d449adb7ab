//! stratus-api — HTTP surface for the capacity scheduler.
//!
//! Thin marshalling only: handlers translate JSON to scheduler calls and
//! scheduler errors to status codes. No scheduling decisions are made here.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/applications` | Submit an application to a leaf queue |
//! | DELETE | `/api/v1/applications/{id}` | Remove an application (idempotent) |
//! | POST | `/api/v1/applications/{id}/allocate` | Allocate protocol round-trip |
//! | GET | `/api/v1/queues` | Queue tree snapshot |
//! | GET | `/api/v1/nodes` | Node inventory snapshot |
//! | POST | `/api/v1/nodes` | Register a node |
//! | DELETE | `/api/v1/nodes/{id}` | Deregister a node |
//! | POST | `/api/v1/nodes/{id}/heartbeat` | Node heartbeat |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use stratus_launcher::LauncherHandle;
use stratus_scheduler::CapacityScheduler;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<CapacityScheduler>,
    /// Intake for master launch/cleanup work; absent in embedded setups
    /// that drive launching themselves.
    pub launcher: Option<LauncherHandle>,
}

/// Build the API router.
pub fn build_router(scheduler: Arc<CapacityScheduler>, launcher: Option<LauncherHandle>) -> Router {
    let state = ApiState { scheduler, launcher };

    let api_routes = Router::new()
        .route("/applications", post(handlers::add_application))
        .route("/applications/{id}", axum::routing::delete(handlers::remove_application))
        .route("/applications/{id}/allocate", post(handlers::allocate))
        .route("/queues", get(handlers::list_queues))
        .route("/nodes", get(handlers::list_nodes).post(handlers::add_node))
        .route(
            "/nodes/{id}",
            axum::routing::delete(handlers::remove_node),
        )
        .route("/nodes/{id}/heartbeat", post(handlers::node_heartbeat))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
