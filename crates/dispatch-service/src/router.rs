//! The HTTP surface: `/tasks`, `/tasks/:id`, `/health`, and `/admin/*`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

use crate::dispatcher::{CancelOutcome, Dispatcher, SubmitRejection};
use crate::domain::config::DispatchConfig;
use crate::domain::error::ErrorBody;
use crate::domain::types::{HealthResponse, SubmitTaskRequest, SubmitTaskResponse, TaskSnapshot};
use crate::middleware::MiddlewareStack;
use crate::ports::{CallbackTransport, TokenProvider, WorkspaceManager};
use dispatch_core::NonceCache;

/// Shared application state for every handler.
pub struct AppState<W, T, C> {
    /// The composition root owning every live task.
    pub dispatcher: Arc<Dispatcher<W, T, C>>,
}

impl<W, T, C> Clone for AppState<W, T, C> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

/// Build the full router: tracing and a body-size limit apply everywhere,
/// signed-request authentication applies only to `/tasks` (POST) and
/// `/admin/*`. `/tasks/:id` (GET/DELETE) and `/health` are unauthenticated
/// per the external-interface table.
pub fn build_router<W, T, C>(
    config: &DispatchConfig,
    dispatcher: Arc<Dispatcher<W, T, C>>,
    nonce_cache: Arc<NonceCache>,
) -> Router
where
    W: WorkspaceManager + Send + Sync + 'static,
    T: TokenProvider + Send + Sync + 'static,
    C: CallbackTransport + Send + Sync + 'static,
{
    let state = AppState { dispatcher };
    let stack = MiddlewareStack::from_config(config, nonce_cache);

    let authenticated = Router::new()
        .route("/tasks", post(submit_task::<W, T, C>))
        .route("/admin/refresh-token", post(refresh_token::<W, T, C>))
        .route("/admin/shutdown", post(begin_shutdown::<W, T, C>))
        .layer(stack.auth.clone());

    let open = Router::new()
        .route("/tasks/:id", get(get_task::<W, T, C>))
        .route("/tasks/:id", delete(cancel_task::<W, T, C>))
        .route("/health", get(health::<W, T, C>));

    authenticated
        .merge(open)
        .layer(
            ServiceBuilder::new()
                .layer(stack.tracing)
                .layer(stack.timeout)
                .layer(RequestBodyLimitLayer::new(config.http.max_body_bytes)),
        )
        .with_state(state)
}

async fn submit_task<W, T, C>(
    State(state): State<AppState<W, T, C>>,
    Json(request): Json<SubmitTaskRequest>,
) -> impl IntoResponse
where
    W: WorkspaceManager + Send + Sync + 'static,
    T: TokenProvider + Send + Sync + 'static,
    C: CallbackTransport + Send + Sync + 'static,
{
    let task_id = request.task_id.clone();
    match state.dispatcher.submit(request) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(SubmitTaskResponse { task_id, status: "queued" }),
        )
            .into_response(),
        Err(SubmitRejection::Duplicate) => {
            (StatusCode::CONFLICT, Json(ErrorBody { error: "duplicate_task" })).into_response()
        }
        Err(SubmitRejection::AtCapacity) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorBody { error: "at_capacity" })).into_response()
        }
        Err(SubmitRejection::InvalidRequest(_)) => {
            (StatusCode::BAD_REQUEST, Json(ErrorBody { error: "invalid_request" })).into_response()
        }
    }
}

async fn get_task<W, T, C>(State(state): State<AppState<W, T, C>>, Path(task_id): Path<String>) -> impl IntoResponse
where
    W: WorkspaceManager + Send + Sync + 'static,
    T: TokenProvider + Send + Sync + 'static,
    C: CallbackTransport + Send + Sync + 'static,
{
    match state.dispatcher.lookup(&task_id).await {
        Some(record) => (StatusCode::OK, Json(to_snapshot(record))).into_response(),
        None => (StatusCode::NOT_FOUND, Json(ErrorBody { error: "not_found" })).into_response(),
    }
}

async fn cancel_task<W, T, C>(State(state): State<AppState<W, T, C>>, Path(task_id): Path<String>) -> impl IntoResponse
where
    W: WorkspaceManager + Send + Sync + 'static,
    T: TokenProvider + Send + Sync + 'static,
    C: CallbackTransport + Send + Sync + 'static,
{
    match state.dispatcher.cancel(&task_id).await {
        CancelOutcome::Accepted => StatusCode::ACCEPTED.into_response(),
        CancelOutcome::NotFound => (StatusCode::NOT_FOUND, Json(ErrorBody { error: "not_found" })).into_response(),
        CancelOutcome::AlreadyTerminal => {
            (StatusCode::CONFLICT, Json(ErrorBody { error: "already_terminal" })).into_response()
        }
    }
}

async fn health<W, T, C>(State(state): State<AppState<W, T, C>>) -> impl IntoResponse
where
    W: WorkspaceManager + Send + Sync + 'static,
    T: TokenProvider + Send + Sync + 'static,
    C: CallbackTransport + Send + Sync + 'static,
{
    let status = state.dispatcher.status().await;
    Json(HealthResponse {
        status: if status.draining { "draining" } else { "ready" },
        capacity: status.capacity,
        running: status.running,
        available: status.available,
        token_expires_at: status.token_expires_at,
    })
}

#[derive(serde::Serialize)]
struct RefreshTokenResponse {
    expires_at: u64,
}

async fn refresh_token<W, T, C>(State(state): State<AppState<W, T, C>>) -> impl IntoResponse
where
    W: WorkspaceManager + Send + Sync + 'static,
    T: TokenProvider + Send + Sync + 'static,
    C: CallbackTransport + Send + Sync + 'static,
{
    match state.dispatcher.refresh_token().await {
        Ok(expires_at) => (StatusCode::OK, Json(RefreshTokenResponse { expires_at })).into_response(),
        Err(_) => (StatusCode::BAD_GATEWAY, Json(ErrorBody { error: "token_unavailable" })).into_response(),
    }
}

async fn begin_shutdown<W, T, C>(State(state): State<AppState<W, T, C>>) -> impl IntoResponse
where
    W: WorkspaceManager + Send + Sync + 'static,
    T: TokenProvider + Send + Sync + 'static,
    C: CallbackTransport + Send + Sync + 'static,
{
    state.dispatcher.begin_draining();
    StatusCode::ACCEPTED
}

fn to_snapshot(record: dispatch_core::TaskRecord) -> TaskSnapshot {
    TaskSnapshot {
        task_id: record.task_id,
        status: record.status,
        worker_type: record.worker_type,
        created_at: record.created_at,
        started_at: record.started_at,
        ended_at: record.ended_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_carries_the_lifecycle_timestamps() {
        let record = dispatch_core::TaskRecord::new("t-1", "echo", "hi", "https://cb.test", "s".repeat(32), 10);
        let snapshot = to_snapshot(record);
        assert_eq!(snapshot.task_id, "t-1");
        assert_eq!(snapshot.created_at, 10);
        assert!(snapshot.started_at.is_none());
    }
}
