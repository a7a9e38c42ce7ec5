mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::engine::Engine;

pub fn create_router(engine: Engine) -> Router {
    let api = Router::new()
        // Library
        .route("/library", get(handlers::list_library))
        // Projects
        .route("/projects", get(handlers::list_projects))
        .route("/projects/{name}/files", get(handlers::list_project_files))
        .route(
            "/projects/{name}/files/{filename}",
            delete(handlers::remove_file),
        )
        .route("/projects/{name}/clear", post(handlers::clear_project))
        .route("/projects/{name}/heartbeat", post(handlers::record_heartbeat))
        // Assignment
        .route("/assign", post(handlers::assign))
        .route("/stop_all", post(handlers::stop_all))
        // Backups
        .route("/undo", post(handlers::undo))
        .route(
            "/snapshots",
            get(handlers::list_snapshots).post(handlers::create_snapshot),
        )
        .route("/snapshots/{name}/restore", post(handlers::restore_snapshot))
        // Health
        .route("/health", get(handlers::health_summary))
        .route("/health/projects", get(handlers::health_report))
        // Events
        .route("/events", get(handlers::recent_events));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine)
}
