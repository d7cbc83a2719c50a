//! HTTP API handlers and routing.

mod health;
mod sync;

use axum::{
    http::{header, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

pub use sync::{ApiResponse, SyncStatusData, SyncVmsRequest};

/// Create the API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .merge(health::routes())
        .nest("/sync", sync::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
