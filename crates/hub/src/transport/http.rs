// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the hub.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::binding::BindError;
use crate::delivery::{LogSink, PackMode, TaskError, TaskStatus};
use crate::error::HubError;
use crate::model::{AssetRef, Identity, Platform};
use crate::relay::{BindOutcome, RelayError};
use crate::state::HubState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_tasks: usize,
}

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub platform: Platform,
    pub user_id: String,
    /// Absent or blank issues a token; otherwise the code to consume.
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookBindRequest {
    pub platform: Platform,
    pub user_id: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BindResponse {
    Issued { code: String, expires_at: u64, reply: String },
    Bound { mode: String, destination: String, reply: String },
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub bound: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub platform: Platform,
    pub user_id: String,
    pub item: AssetRef,
}

#[derive(Debug, Serialize)]
pub struct RelayResponse {
    pub mode: String,
    pub destination: String,
}

#[derive(Debug, Deserialize)]
pub struct StartTaskRequest {
    pub platform: Platform,
    pub user_id: String,
    /// `individual` (default), `image_group` or `zip`.
    #[serde(default)]
    pub mode: PackMode,
    pub items: Vec<AssetRef>,
}

#[derive(Debug, Serialize)]
pub struct StartTaskResponse {
    pub task_id: String,
    pub mode: PackMode,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct StopTaskResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

// -- Error mapping ------------------------------------------------------------

fn bind_error(e: &BindError) -> Response {
    e.hub_error().to_http_response_with_code(e.as_str(), e.to_string()).into_response()
}

fn relay_error(e: &RelayError) -> Response {
    e.hub_error().to_http_response_with_code(e.as_str(), e.to_string()).into_response()
}

fn task_error(e: &TaskError) -> Response {
    e.hub_error().to_http_response_with_code(e.as_str(), e.to_string()).into_response()
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<HubState>>) -> impl IntoResponse {
    let active_tasks = s.delivery.active_count().await;
    Json(HealthResponse { status: "running".to_owned(), active_tasks })
}

/// `POST /api/v1/bind`: issue a token, or consume one when `code` is set.
pub async fn bind(
    State(s): State<Arc<HubState>>,
    Json(req): Json<BindRequest>,
) -> impl IntoResponse {
    let identity = Identity::new(req.platform, req.user_id);
    match s.relay.bind_command(&identity, req.code.as_deref()).await {
        Ok(outcome) => {
            let reply = outcome.reply_text();
            let body = match outcome {
                BindOutcome::Issued(token) => {
                    BindResponse::Issued { code: token.code, expires_at: token.expires_at, reply }
                }
                BindOutcome::Bound(binding) => BindResponse::Bound {
                    mode: binding.destination.mode().to_owned(),
                    destination: binding.destination.masked(),
                    reply,
                },
            };
            Json(body).into_response()
        }
        Err(e) => {
            tracing::info!(identity = %identity, code = e.as_str(), "bind rejected");
            bind_error(&e)
        }
    }
}

/// `POST /api/v1/bind/webhook`
pub async fn bind_webhook(
    State(s): State<Arc<HubState>>,
    Json(req): Json<WebhookBindRequest>,
) -> impl IntoResponse {
    let identity = Identity::new(req.platform, req.user_id);
    match s.relay.bind_webhook(&identity, &req.url).await {
        Ok(binding) => Json(BindResponse::Bound {
            mode: binding.destination.mode().to_owned(),
            destination: binding.destination.masked(),
            reply: "Binding complete: your assets now go to the Feishu webhook".to_owned(),
        })
        .into_response(),
        Err(e) => {
            tracing::info!(identity = %identity, code = e.as_str(), "webhook bind rejected");
            bind_error(&e)
        }
    }
}

/// `GET /api/v1/route/{platform}/{user_id}`
pub async fn route_lookup(
    State(s): State<Arc<HubState>>,
    Path((platform, user_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let platform = match platform.parse::<Platform>() {
        Ok(p) => p,
        Err(e) => return HubError::BadRequest.to_http_response(e.to_string()).into_response(),
    };
    let source = Identity::new(platform, user_id);
    let body = match s.relay.resolver().resolve(&source).await {
        Some(destination) => RouteResponse {
            bound: true,
            mode: Some(destination.mode().to_owned()),
            destination: Some(destination.masked()),
        },
        None => RouteResponse { bound: false, mode: None, destination: None },
    };
    Json(body).into_response()
}

/// `POST /api/v1/relay`: fetch one asset and forward it right away.
pub async fn relay(
    State(s): State<Arc<HubState>>,
    Json(req): Json<RelayRequest>,
) -> impl IntoResponse {
    let owner = Identity::new(req.platform, req.user_id);
    match s.relay.relay_item(&owner, &req.item).await {
        Ok(destination) => Json(RelayResponse {
            mode: destination.mode().to_owned(),
            destination: destination.masked(),
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(owner = %owner, item_id = %req.item.id, err = %e, "relay failed");
            relay_error(&e)
        }
    }
}

/// `POST /api/v1/tasks`: start a pack delivery in the background.
pub async fn start_task(
    State(s): State<Arc<HubState>>,
    Json(req): Json<StartTaskRequest>,
) -> impl IntoResponse {
    let owner = Identity::new(req.platform, req.user_id);
    let total = req.items.len();
    match s.relay.start_pack(&owner, req.mode, req.items, Arc::new(LogSink)).await {
        Ok(handle) => {
            let body = StartTaskResponse { task_id: handle.id, mode: req.mode, total };
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        Err(e) => relay_error(&e),
    }
}

/// `GET /api/v1/tasks/{id}`
pub async fn task_status(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.delivery.get_status(&id).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => task_error(&e),
    }
}

/// `POST /api/v1/tasks/{id}/stop`
pub async fn stop_task(
    State(s): State<Arc<HubState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.delivery.request_stop(&id).await {
        Ok(status) => Json(StopTaskResponse { task_id: id, status }).into_response(),
        Err(e) => task_error(&e),
    }
}
