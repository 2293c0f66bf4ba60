//! Route table.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the application router with all routes.
pub fn build_router(state: AppState) -> Router {
    // The dashboard is served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::api_health))
        .with_state(state.clone());

    let run_routes = Router::new()
        .route("/api/run", post(handlers::run::run))
        .route("/api/stop", post(handlers::run::stop))
        .route("/api/status", get(handlers::run::status))
        .with_state(state.clone());

    let expression_routes = Router::new()
        .route("/api/expressions", get(handlers::expressions::list))
        .route(
            "/api/expressions/reload",
            post(handlers::expressions::reload),
        )
        .route(
            "/api/expressions/{id}",
            get(handlers::expressions::get).put(handlers::expressions::update),
        )
        .with_state(state.clone());

    let source_routes = Router::new()
        .route("/api/sources", get(handlers::sources::list))
        .route(
            "/api/sources/{name}/check",
            post(handlers::sources::check),
        )
        .with_state(state);

    Router::new()
        .merge(health_routes)
        .merge(run_routes)
        .merge(expression_routes)
        .merge(source_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
