//! Axum router setup.

use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{log, passes, registrations};
use crate::state::AppState;

pub fn build_router(state: AppState, max_payload_size: usize) -> Router {
    Router::new()
        .route(
            "/v1/devices/{device}/registrations/{pass_type}/{serial}",
            post(registrations::register).delete(registrations::unregister),
        )
        .route(
            "/v1/devices/{device}/registrations/{pass_type}",
            get(registrations::list_serials),
        )
        .route("/v1/passes/{pass_type}/{serial}", get(passes::latest))
        .route("/v1/log", post(log::submit))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_payload_size))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
