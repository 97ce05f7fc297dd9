//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::analyze::analyze_video;
use crate::handlers::health::health;
use crate::handlers::jobs::{cancel_job, get_job_events, get_job_result, get_job_status};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/analyze", post(analyze_video))
        .route("/status/:job_id", get(get_job_status))
        .route("/result/:job_id", get(get_job_result))
        .route("/events/:job_id", get(get_job_events))
        .route("/jobs/:job_id/cancel", post(cancel_job));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(parsed)
    }
}
