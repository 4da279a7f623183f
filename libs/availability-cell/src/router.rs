use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn availability_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        // Slot resolution
        .route("/{practitioner_id}/slots", get(handlers::get_practitioner_slots))
        .route("/batch", post(handlers::batch_availability))
        // Recurring pattern management
        .route("/patterns", get(handlers::list_patterns))
        .route("/patterns", post(handlers::create_pattern))
        .route("/patterns/{pattern_id}", put(handlers::update_pattern))
        .route("/patterns/{pattern_id}", delete(handlers::delete_pattern))
        // Date exception management
        .route("/exceptions", get(handlers::list_exceptions))
        .route("/exceptions", post(handlers::create_exceptions))
        .route("/exceptions/{exception_id}", delete(handlers::delete_exception))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
