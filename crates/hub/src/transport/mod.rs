// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the hub.

pub mod auth;
pub mod http;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::HubState;

/// Build the axum `Router` with all hub routes.
pub fn build_router(state: Arc<HubState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Binding
        .route("/api/v1/bind", post(http::bind))
        .route("/api/v1/bind/webhook", post(http::bind_webhook))
        .route("/api/v1/route/{platform}/{user_id}", get(http::route_lookup))
        // Delivery
        .route("/api/v1/relay", post(http::relay))
        .route("/api/v1/tasks", post(http::start_task))
        .route("/api/v1/tasks/{id}", get(http::task_status))
        .route("/api/v1/tasks/{id}/stop", post(http::stop_task))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
