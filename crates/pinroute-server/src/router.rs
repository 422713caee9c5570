// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The stateful-routing middleware.
//!
//! Applied per route, with that route's [`RoutingDirective`] attached as an
//! extension. On every call it resolves the target resource id(s), asks the
//! registry who owns them, and either dispatches to the local handler
//! (under the per-resource lock, with a lease renewal on success) or
//! replays the request against the owning node. Handlers behind this
//! middleware are plain node-local code; nothing in them knows the cluster
//! exists.
//!
//! A request carrying a hop header was already routed by a peer, so it is
//! dispatched locally without consulting the registry again. The hop
//! counter caps transitive forwarding at one hop; a higher value means two
//! registries disagreed about ownership and the request would otherwise
//! bounce forever.

use std::sync::Arc;

use axum::Extension;
use axum::body::{Body, Bytes};
use axum::extract::{RawPathParams, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Response};
use axum::middleware::Next;
use axum::response::IntoResponse;
use tracing::debug;

use pinroute_core::directive::{
    RequestParams, ResolvedIds, ResourceId, RoutingDirective,
};
use pinroute_core::error::{Result, RouteError};

use crate::error::ApiError;
use crate::forwarder::{ROUTE_HOP_HEADER, ROUTE_ID_HEADER};
use crate::state::AppState;
use crate::strategy::DEFAULT_STRATEGY;

/// Largest request body the router will buffer for resolution/forwarding.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Middleware entry point, layered per routed operation.
pub async fn route_stateful(
    State(state): State<AppState>,
    Extension(directive): Extension<Arc<RoutingDirective>>,
    raw_params: RawPathParams,
    req: Request,
    next: Next,
) -> Response<Body> {
    match dispatch(state, directive, raw_params, req, next).await {
        Ok(response) => response,
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn dispatch(
    state: AppState,
    directive: Arc<RoutingDirective>,
    raw_params: RawPathParams,
    req: Request,
    next: Next,
) -> Result<Response<Body>> {
    if let Some(hop) = hop_count(req.headers())? {
        return dispatch_forwarded(state, &directive, hop, req, next).await;
    }

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|err| RouteError::InvalidRequest {
            detail: format!("failed to read request body: {}", err),
        })?;

    let params = build_params(&directive, &raw_params, &parts, &body)?;
    match directive.resolve(&params)? {
        ResolvedIds::Single(id) => {
            route_single(state, &directive, id, parts, body, next).await
        }
        ResolvedIds::Many(ids) => {
            let name = directive.strategy.unwrap_or(DEFAULT_STRATEGY);
            let strategy = state
                .strategy(name)
                .ok_or_else(|| RouteError::MalformedDirective {
                    detail: format!("strategy '{}' is not registered", name),
                })?;
            strategy
                .execute(&directive, ids, parts, body, &state, next)
                .await
        }
    }
}

/// A peer already resolved ownership for this request; honor its decision
/// and dispatch locally.
async fn dispatch_forwarded(
    state: AppState,
    directive: &RoutingDirective,
    hop: u32,
    req: Request,
    next: Next,
) -> Result<Response<Body>> {
    if hop > 1 {
        return Err(RouteError::ForwardLoop { hop });
    }

    let ids = forwarded_ids(req.headers())?;
    debug!(
        kind = %directive.kind,
        ids = ids.len(),
        "Dispatching forwarded request locally"
    );

    let mut guards = Vec::with_capacity(ids.len());
    for id in &ids {
        let guard = state.locks().try_acquire(directive.kind, id).ok_or_else(|| {
            RouteError::Busy {
                kind: directive.kind,
                resource_id: id.clone(),
            }
        })?;
        guards.push(guard);
    }

    let response = next.run(req).await;
    drop(guards);

    if response.status().is_success() {
        for id in &ids {
            state.renew_after_access(directive.kind, id).await;
        }
    }
    Ok(response)
}

async fn route_single(
    state: AppState,
    directive: &RoutingDirective,
    id: ResourceId,
    parts: Parts,
    body: Bytes,
    next: Next,
) -> Result<Response<Body>> {
    let kind = directive.kind;
    let record = state
        .lookup(kind, &id)
        .await?
        .ok_or_else(|| RouteError::ResourceExpiredOrUnknown {
            kind,
            resource_id: id.clone(),
        })?;

    if record.owner == *state.node() {
        return execute_local(&state, directive, &id, parts, body, next).await;
    }

    let first_owner = record.owner;
    let first_attempt = state
        .forwarder()
        .forward(
            &first_owner,
            parts.method.clone(),
            &parts.uri,
            &parts.headers,
            body.clone(),
            kind,
            std::slice::from_ref(&id),
            1,
        )
        .await;

    let err = match first_attempt {
        Ok(response) => return Ok(response),
        Err(err @ (RouteError::Unreachable { .. } | RouteError::Timeout { .. })) => err,
        Err(err) => return Err(err),
    };

    // The owner may have crashed and the resource re-registered elsewhere
    // while we were dialing. One fresh lookup; a still-unchanged record
    // makes the transport error terminal.
    debug!(
        kind = %kind,
        resource_id = %id,
        failed_node = %first_owner,
        "Forward failed, re-checking ownership once"
    );
    match state.lookup(kind, &id).await? {
        Some(record) if record.owner == *state.node() => {
            execute_local(&state, directive, &id, parts, body, next).await
        }
        Some(record) if record.owner != first_owner => {
            state
                .forwarder()
                .forward(
                    &record.owner,
                    parts.method.clone(),
                    &parts.uri,
                    &parts.headers,
                    body,
                    kind,
                    std::slice::from_ref(&id),
                    1,
                )
                .await
        }
        _ => Err(err),
    }
}

async fn execute_local(
    state: &AppState,
    directive: &RoutingDirective,
    id: &ResourceId,
    parts: Parts,
    body: Bytes,
    next: Next,
) -> Result<Response<Body>> {
    let guard = state
        .locks()
        .try_acquire(directive.kind, id)
        .ok_or_else(|| RouteError::Busy {
            kind: directive.kind,
            resource_id: id.clone(),
        })?;

    let request = Request::from_parts(parts, Body::from(body));
    let response = next.run(request).await;
    drop(guard);

    if response.status().is_success() {
        state.renew_after_access(directive.kind, id).await;
    }
    Ok(response)
}

fn hop_count(headers: &HeaderMap) -> Result<Option<u32>> {
    let Some(value) = headers.get(ROUTE_HOP_HEADER) else {
        return Ok(None);
    };
    let hop = value
        .to_str()
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| RouteError::InvalidRequest {
            detail: format!("routing header '{}' is not a number", ROUTE_HOP_HEADER),
        })?;
    Ok(Some(hop))
}

fn forwarded_ids(headers: &HeaderMap) -> Result<Vec<ResourceId>> {
    let value = headers
        .get(ROUTE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RouteError::InvalidRequest {
            detail: format!("forwarded request is missing header '{}'", ROUTE_ID_HEADER),
        })?;
    let ids: Vec<ResourceId> = value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(ResourceId::from)
        .collect();
    if ids.is_empty() {
        return Err(RouteError::InvalidRequest {
            detail: format!("routing header '{}' names no ids", ROUTE_ID_HEADER),
        });
    }
    Ok(ids)
}

fn build_params(
    directive: &RoutingDirective,
    raw_params: &RawPathParams,
    parts: &Parts,
    body: &Bytes,
) -> Result<RequestParams> {
    let path = raw_params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let query = parts
        .uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let body = if directive.needs_body() && !body.is_empty() {
        Some(serde_json::from_slice(body)?)
    } else {
        None
    };

    Ok(RequestParams { path, query, body })
}
