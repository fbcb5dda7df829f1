//! `api` crate — HTTP REST layer over the engine facade.
//!
//! Exposes:
//!   POST   /api/v1/workspaces/{ws}/workflows
//!   GET    /api/v1/workspaces/{ws}/workflows
//!   GET    /api/v1/workspaces/{ws}/workflows/{id}
//!   PATCH  /api/v1/workspaces/{ws}/workflows/{id}
//!   DELETE /api/v1/workspaces/{ws}/workflows/{id}
//!   POST   /api/v1/workspaces/{ws}/workflows/{id}/pause
//!   POST   /api/v1/workspaces/{ws}/workflows/{id}/resume
//!   POST   /api/v1/workspaces/{ws}/workflows/{id}/execute
//!   GET    /api/v1/workspaces/{ws}/executions
//!   GET    /api/v1/workspaces/{ws}/executions/{id}
//!   POST   /api/v1/workspaces/{ws}/events
//!   POST   /api/v1/scheduler/tick

pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use handlers::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/workspaces/:ws/workflows",
            get(handlers::workflows::list).post(handlers::workflows::create),
        )
        .route(
            "/api/v1/workspaces/:ws/workflows/:id",
            get(handlers::workflows::get_one)
                .patch(handlers::workflows::update)
                .delete(handlers::workflows::delete),
        )
        .route(
            "/api/v1/workspaces/:ws/workflows/:id/pause",
            post(handlers::workflows::pause),
        )
        .route(
            "/api/v1/workspaces/:ws/workflows/:id/resume",
            post(handlers::workflows::resume),
        )
        .route(
            "/api/v1/workspaces/:ws/workflows/:id/execute",
            post(handlers::executions::execute),
        )
        .route(
            "/api/v1/workspaces/:ws/executions",
            get(handlers::executions::list),
        )
        .route(
            "/api/v1/workspaces/:ws/executions/:id",
            get(handlers::executions::get_one),
        )
        .route(
            "/api/v1/workspaces/:ws/events",
            post(handlers::executions::publish_event),
        )
        .route("/api/v1/scheduler/tick", post(handlers::executions::tick))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the API until the process is stopped.
pub async fn serve(bind: &str, state: AppState) -> Result<(), std::io::Error> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("API listening on {bind}");
    axum::serve(listener, app).await
}
