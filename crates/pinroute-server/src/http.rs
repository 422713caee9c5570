// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API surface.
//!
//! Every stateful operation is declared here as an ordinary axum handler
//! plus a [`RoutingDirective`] layered onto its route. The handlers are
//! strictly node-local; the middleware in [`crate::router`] decides whether
//! they run at all. Creation endpoints sit outside the middleware because
//! the resource does not exist yet; they create locally and then claim.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::{MethodRouter, delete, get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pinroute_core::directive::{IdAccessor, ResourceId, ResourceKind, RoutingDirective};
use pinroute_core::error::RouteError;
use pinroute_core::registry::OwnershipRecord;

use crate::error::ApiError;
use crate::router::route_stateful;
use crate::state::AppState;

/// Build the node's full router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v2/datasources/{datasourceId}/sessions",
            post(create_session),
        )
        .route(
            "/api/v2/sessions/{sessionId}/status",
            stateful(
                &state,
                RoutingDirective::single(
                    ResourceKind::DbSession,
                    IdAccessor::PathParam("sessionId"),
                ),
                get(session_status),
            ),
        )
        .route(
            "/api/v2/sessions/{sessionId}/execute",
            stateful(
                &state,
                RoutingDirective::single(
                    ResourceKind::DbSession,
                    IdAccessor::PathParam("sessionId"),
                ),
                post(execute_statement),
            ),
        )
        .route(
            "/api/v2/sessions/{sessionId}/results",
            stateful(
                &state,
                RoutingDirective::single(
                    ResourceKind::DbSession,
                    IdAccessor::PathParam("sessionId"),
                ),
                get(statement_results),
            ),
        )
        .route(
            "/api/v2/sessions/{sessionId}",
            stateful(
                &state,
                RoutingDirective::single(
                    ResourceKind::DbSession,
                    IdAccessor::PathParam("sessionId"),
                ),
                delete(close_session),
            ),
        )
        .route(
            "/api/v2/sessions",
            stateful(
                &state,
                RoutingDirective::multi(
                    ResourceKind::DbSession,
                    IdAccessor::BodyList("sessionIds"),
                    "session-close",
                ),
                delete(close_sessions),
            ),
        )
        .route(
            "/api/v2/sessions/{sessionId}/export",
            stateful(
                &state,
                RoutingDirective::single(
                    ResourceKind::DbSession,
                    IdAccessor::PathParam("sessionId"),
                ),
                post(create_export),
            ),
        )
        .route(
            "/api/v2/exports/{taskId}",
            stateful(
                &state,
                RoutingDirective::single(
                    ResourceKind::ExportTask,
                    IdAccessor::PathParam("taskId"),
                ),
                get(export_status),
            ),
        )
        .route("/internal/ownership", get(ownership))
        .route("/internal/health", get(health))
        .with_state(state)
}

/// Attach the routing middleware and its directive to one operation.
///
/// The directive extension is layered outermost so it is present in the
/// request by the time the middleware runs.
fn stateful(
    state: &AppState,
    directive: RoutingDirective,
    method_router: MethodRouter<AppState>,
) -> MethodRouter<AppState> {
    method_router
        .layer::<_, std::convert::Infallible>(from_fn_with_state(state.clone(), route_stateful))
        .layer(Extension(Arc::new(directive)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: String,
    datasource_id: i64,
    node: String,
}

/// Open a session against a datasource on this node and claim ownership.
///
/// The session id is node-generated, so a claim conflict means the cluster
/// already holds a resource under an id we just minted. One retry with a
/// fresh id absorbs the collision; a second conflict propagates.
async fn create_session(
    State(state): State<AppState>,
    Path(datasource_id): Path<i64>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let mut session_id = state.store().create_session(datasource_id);
    if let Err(err) = state
        .claim_created(ResourceKind::DbSession, &session_id)
        .await
    {
        match err {
            RouteError::ResourceAlreadyExists { .. } => {
                warn!(
                    session_id = %session_id,
                    "Generated session id collided, retrying with a fresh one"
                );
                session_id = state.store().create_session(datasource_id);
                state
                    .claim_created(ResourceKind::DbSession, &session_id)
                    .await?;
            }
            other => return Err(other.into()),
        }
    }

    info!(session_id = %session_id, datasource_id, "Opened session");
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session_id.to_string(),
            datasource_id,
            node: state.node().to_string(),
        }),
    ))
}

async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<crate::store::SessionStatus>, ApiError> {
    let id = ResourceId::from(session_id);
    Ok(Json(state.store().session_status(&id)?))
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    sql: String,
}

async fn execute_statement(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<crate::store::StatementRecord>, ApiError> {
    let id = ResourceId::from(session_id);
    Ok(Json(state.store().execute_statement(&id, &request.sql)?))
}

#[derive(Debug, Serialize)]
struct StatementResults {
    statements: Vec<crate::store::StatementRecord>,
}

async fn statement_results(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatementResults>, ApiError> {
    let id = ResourceId::from(session_id);
    Ok(Json(StatementResults {
        statements: state.store().statement_results(&id)?,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CloseSessionResponse {
    closed_session_ids: Vec<String>,
}

async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<CloseSessionResponse>, ApiError> {
    let id = ResourceId::from(session_id);
    close_one(&state, &id).await?;
    info!(session_id = %id, "Closed session");
    Ok(Json(CloseSessionResponse {
        closed_session_ids: vec![id.to_string()],
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseSessionsRequest {
    session_ids: Vec<String>,
}

/// The local leg of the multi-close fan-out. By the time this handler runs
/// the body lists only sessions this node owns; closing an already-gone
/// session is treated as done.
async fn close_sessions(
    State(state): State<AppState>,
    Json(request): Json<CloseSessionsRequest>,
) -> Result<Json<CloseSessionResponse>, ApiError> {
    let mut closed = Vec::with_capacity(request.session_ids.len());
    for session_id in request.session_ids {
        let id = ResourceId::from(session_id);
        match close_one(&state, &id).await {
            Ok(()) => closed.push(id.to_string()),
            Err(RouteError::ResourceExpiredOrUnknown { .. }) => closed.push(id.to_string()),
            Err(err) => return Err(err.into()),
        }
    }
    info!(count = closed.len(), "Closed sessions");
    Ok(Json(CloseSessionResponse {
        closed_session_ids: closed,
    }))
}

async fn close_one(state: &AppState, id: &ResourceId) -> Result<(), RouteError> {
    use pinroute_core::store::ResourceStore;
    state.store().destroy(ResourceKind::DbSession, id).await?;
    state.release(ResourceKind::DbSession, id).await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateExportResponse {
    task_id: String,
    session_id: String,
    status: &'static str,
    node: String,
}

/// Snapshot a session into an export task. Runs on the session's owner, so
/// the new task is claimed for this node too.
async fn create_export(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<CreateExportResponse>), ApiError> {
    let session_id = ResourceId::from(session_id);
    let mut task_id = state.store().create_export(&session_id)?;
    if let Err(err) = state.claim_created(ResourceKind::ExportTask, &task_id).await {
        match err {
            RouteError::ResourceAlreadyExists { .. } => {
                warn!(
                    task_id = %task_id,
                    "Generated export task id collided, retrying with a fresh one"
                );
                task_id = state.store().create_export(&session_id)?;
                state
                    .claim_created(ResourceKind::ExportTask, &task_id)
                    .await?;
            }
            other => return Err(other.into()),
        }
    }

    info!(task_id = %task_id, session_id = %session_id, "Created export task");
    Ok((
        StatusCode::CREATED,
        Json(CreateExportResponse {
            task_id: task_id.to_string(),
            session_id: session_id.to_string(),
            status: "completed",
            node: state.node().to_string(),
        }),
    ))
}

async fn export_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<crate::store::ExportStatus>, ApiError> {
    let id = ResourceId::from(task_id);
    Ok(Json(state.store().export_status(&id)?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OwnershipResponse {
    node: String,
    records: Vec<OwnershipRecord>,
}

/// Diagnostics: the registry's live ownership table as this node sees it.
async fn ownership(State(state): State<AppState>) -> Result<Json<OwnershipResponse>, ApiError> {
    let records = state.registry().list().await?;
    Ok(Json(OwnershipResponse {
        node: state.node().to_string(),
        records,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    node: String,
    started_at: chrono::DateTime<chrono::Utc>,
    local_resources: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        node: state.node().to_string(),
        started_at: state.started_at(),
        local_resources: state.store().len(),
    })
}
