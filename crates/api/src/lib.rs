//! `api` crate: HTTP REST surface over the orchestrator.
//!
//! Exposes:
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/{id}
//!   POST   /api/v1/workflows/{id}/run
//!   POST   /api/v1/workflows/{id}/cancel
//!   GET    /api/v1/tasks/{id}
//!   POST   /api/v1/tasks/{id}/run
//!   GET    /api/v1/engines
//!   POST   /api/v1/engines
//!   POST   /api/v1/engines/{id}/deactivate
//!   POST   /api/v1/engines/{id}/activate
//!   POST   /api/v1/engines/{id}/heartbeat
//!
//! Workflow and task routes require the `x-tenant-scope` header.

pub mod error;
pub mod handlers;
pub mod tenant;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use queue::QueueRouter;

pub use error::ApiError;
pub use tenant::{Tenant, TENANT_HEADER};

use handlers::{engines, tasks, workflows};

#[derive(Clone)]
pub struct AppState {
    pub router: QueueRouter,
}

impl AppState {
    pub fn new(router: QueueRouter) -> Self {
        Self { router }
    }
}

/// Build the axum application.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows", post(workflows::create))
        .route("/api/v1/workflows/:id", get(workflows::get))
        .route("/api/v1/workflows/:id/run", post(workflows::run))
        .route("/api/v1/workflows/:id/cancel", post(workflows::cancel))
        .route("/api/v1/tasks/:id", get(tasks::get))
        .route("/api/v1/tasks/:id/run", post(tasks::run))
        .route("/api/v1/engines", get(engines::list).post(engines::register))
        .route("/api/v1/engines/:id/deactivate", post(engines::deactivate))
        .route("/api/v1/engines/:id/activate", post(engines::activate))
        .route("/api/v1/engines/:id/heartbeat", post(engines::heartbeat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("api listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state)).await
}
