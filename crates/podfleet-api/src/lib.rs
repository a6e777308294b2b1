//! podfleet-api — REST API for podfleet.
//!
//! Thin axum layer over [`Scheduler`]: callers submit workflow requests,
//! poll them by id, and inspect queue depth and pods.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/requests` | Enqueue a workflow request |
//! | GET | `/api/v1/requests/{id}` | Get a request and its result |
//! | GET | `/api/v1/status` | Queue depth, active pods, driver state |
//! | GET | `/api/v1/pods` | List tracked pods |
//! | GET | `/api/v1/pods/{id}` | Get one pod |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use podfleet_scheduler::Scheduler;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
}

/// Build the complete API router.
pub fn build_router(scheduler: Arc<Scheduler>) -> Router {
    let api_state = ApiState { scheduler };

    let api_routes = Router::new()
        .route("/requests", post(handlers::enqueue_request))
        .route("/requests/{id}", get(handlers::get_request))
        .route("/status", get(handlers::queue_status))
        .route("/pods", get(handlers::list_pods))
        .route("/pods/{id}", get(handlers::get_pod))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
