// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multi-id fan-out strategies.
//!
//! A multi-id operation names resources that may be pinned to several
//! different nodes. A strategy partitions the resolved ids by owner, runs
//! the local subset through the operation's own handler, forwards one
//! rewritten request per remote owner, and aggregates per-id outcomes into
//! a single response. Partial failure is first-class: one crashed owner
//! fails its ids and nobody else's.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use axum::Json;
use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use axum::http::{Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use pinroute_core::directive::{IdAccessor, ResourceId, RoutingDirective};
use pinroute_core::error::{Result, RouteError};
use pinroute_core::registry::NodeAddress;

use crate::state::AppState;

/// Strategy name used when a multi-id directive does not pick one.
pub const DEFAULT_STRATEGY: &str = "fan-out";

/// Largest aggregated per-node response body the fan-out will buffer.
const MAX_AGGREGATED_BODY: usize = 1024 * 1024;

/// Pluggable handler for multi-id operations.
#[async_trait]
pub trait RouteStrategy: Send + Sync {
    /// Execute the operation across every resolved id and aggregate the
    /// per-id outcomes into one response.
    async fn execute(
        &self,
        directive: &RoutingDirective,
        ids: Vec<ResourceId>,
        parts: Parts,
        body: Bytes,
        state: &AppState,
        next: Next,
    ) -> Result<Response<Body>>;
}

/// Per-id outcome in the aggregated response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdOutcome {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IdOutcome {
    fn ok(node: &NodeAddress) -> Self {
        Self {
            ok: true,
            node: Some(node.to_string()),
            code: None,
            message: None,
        }
    }

    fn failed(node: Option<&NodeAddress>, err: &RouteError) -> Self {
        Self {
            ok: false,
            node: node.map(NodeAddress::to_string),
            code: Some(err.error_code().to_string()),
            message: Some(err.to_string()),
        }
    }
}

/// Aggregated multi-id response body.
#[derive(Debug, Serialize)]
struct AggregatedResponse {
    results: BTreeMap<String, IdOutcome>,
}

/// The default strategy: partition by owner, dispatch everywhere, aggregate.
///
/// The session-close operation registers this same behavior under its own
/// name; closing is idempotent per id, so plain fan-out is exactly what it
/// needs.
pub struct FanoutStrategy;

#[async_trait]
impl RouteStrategy for FanoutStrategy {
    async fn execute(
        &self,
        directive: &RoutingDirective,
        ids: Vec<ResourceId>,
        parts: Parts,
        body: Bytes,
        state: &AppState,
        next: Next,
    ) -> Result<Response<Body>> {
        let template: Option<Value> = if body.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&body)?)
        };

        let mut outcomes: BTreeMap<String, IdOutcome> = BTreeMap::new();
        let mut local: Vec<ResourceId> = Vec::new();
        let mut remote: HashMap<NodeAddress, Vec<ResourceId>> = HashMap::new();

        for id in ids {
            match state.lookup(directive.kind, &id).await? {
                None => {
                    let err = RouteError::ResourceExpiredOrUnknown {
                        kind: directive.kind,
                        resource_id: id.clone(),
                    };
                    outcomes.insert(id.to_string(), IdOutcome::failed(None, &err));
                }
                Some(record) if record.owner == *state.node() => local.push(id),
                Some(record) => remote.entry(record.owner).or_default().push(id),
            }
        }

        debug!(
            kind = %directive.kind,
            local = local.len(),
            remote_nodes = remote.len(),
            "Fanning out multi-id operation"
        );

        // Take the per-resource locks before dispatching anything local.
        // A contended id is reported busy and excluded from the local run.
        let mut guards = Vec::new();
        let mut runnable: Vec<ResourceId> = Vec::new();
        for id in local {
            match state.locks().try_acquire(directive.kind, &id) {
                Some(guard) => {
                    guards.push(guard);
                    runnable.push(id);
                }
                None => {
                    let err = RouteError::Busy {
                        kind: directive.kind,
                        resource_id: id.clone(),
                    };
                    outcomes.insert(id.to_string(), IdOutcome::failed(Some(state.node()), &err));
                }
            }
        }

        // The original parts are consumed by the local dispatch; keep what
        // the remote forwards need.
        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let headers = parts.headers.clone();

        let remote_calls = remote.into_iter().map(|(owner, subset)| {
            let subset_body = body_for_subset(&template, directive, &subset, &body);
            let forwarder = state.forwarder();
            let method = method.clone();
            let uri = uri.clone();
            let headers = headers.clone();
            async move {
                let result = match subset_body {
                    Ok(subset_body) => {
                        forwarder
                            .forward(
                                &owner,
                                method,
                                &uri,
                                &headers,
                                subset_body,
                                directive.kind,
                                &subset,
                                1,
                            )
                            .await
                    }
                    Err(err) => Err(err),
                };
                (owner, subset, result)
            }
        });
        let remote_results = futures::future::join_all(remote_calls);

        let local_run = async {
            if runnable.is_empty() {
                return None;
            }
            let subset_body = match body_for_subset(&template, directive, &runnable, &body) {
                Ok(bytes) => bytes,
                Err(err) => return Some(Err(err)),
            };
            let request = Request::from_parts(parts, Body::from(subset_body));
            Some(Ok(next.run(request).await))
        };

        let (remote_results, local_result) = tokio::join!(remote_results, local_run);

        match local_result {
            None => {}
            Some(Err(err)) => {
                for id in &runnable {
                    outcomes.insert(id.to_string(), IdOutcome::failed(Some(state.node()), &err));
                }
            }
            Some(Ok(response)) => {
                let outcome = node_outcome(state.node(), response).await;
                let succeeded = outcome.ok;
                for id in &runnable {
                    outcomes.insert(id.to_string(), clone_outcome(&outcome));
                }
                drop(guards);
                if succeeded {
                    for id in &runnable {
                        state.renew_after_access(directive.kind, id).await;
                    }
                }
            }
        }

        for (owner, subset, result) in remote_results {
            match result {
                Ok(response) => {
                    let outcome = node_outcome(&owner, response).await;
                    for id in subset {
                        outcomes.insert(id.to_string(), clone_outcome(&outcome));
                    }
                }
                Err(err) => {
                    warn!(
                        target_node = %owner,
                        error = %err,
                        "Fan-out leg failed for an entire node"
                    );
                    for id in subset {
                        outcomes.insert(id.to_string(), IdOutcome::failed(Some(&owner), &err));
                    }
                }
            }
        }

        Ok(Json(AggregatedResponse { results: outcomes }).into_response())
    }
}

fn clone_outcome(outcome: &IdOutcome) -> IdOutcome {
    IdOutcome {
        ok: outcome.ok,
        node: outcome.node.clone(),
        code: outcome.code.clone(),
        message: outcome.message.clone(),
    }
}

/// Rewrite the request body so the dispatched leg sees only its own subset
/// of ids. Requests whose ids did not come from a body list are passed
/// through unchanged.
fn body_for_subset(
    template: &Option<Value>,
    directive: &RoutingDirective,
    subset: &[ResourceId],
    original: &Bytes,
) -> Result<Bytes> {
    let list_field = directive.accessors.iter().find_map(|a| match a {
        IdAccessor::BodyList(name) => Some(*name),
        _ => None,
    });

    let (Some(field), Some(template)) = (list_field, template) else {
        return Ok(original.clone());
    };

    let mut rewritten = template.clone();
    let object = rewritten
        .as_object_mut()
        .ok_or_else(|| RouteError::InvalidRequest {
            detail: "request body must be a JSON object".to_string(),
        })?;
    object.insert(
        field.to_string(),
        Value::Array(
            subset
                .iter()
                .map(|id| Value::String(id.to_string()))
                .collect(),
        ),
    );
    let bytes = serde_json::to_vec(&rewritten).map_err(RouteError::from)?;
    Ok(Bytes::from(bytes))
}

/// Fold one node's whole-response into a per-id outcome. Failure bodies are
/// buffered so their error code and message survive aggregation.
async fn node_outcome(node: &NodeAddress, response: Response<Body>) -> IdOutcome {
    let status = response.status();
    if status.is_success() {
        return IdOutcome::ok(node);
    }

    let (code, message) = match axum::body::to_bytes(response.into_body(), MAX_AGGREGATED_BODY).await
    {
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(body) => (
                body.get("code")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                body.get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            Err(_) => (None, None),
        },
        Err(_) => (None, None),
    };

    IdOutcome {
        ok: false,
        node: Some(node.to_string()),
        code: Some(code.unwrap_or_else(|| fallback_code(status).to_string())),
        message,
    }
}

fn fallback_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::NOT_FOUND => "RESOURCE_EXPIRED_OR_UNKNOWN",
        StatusCode::TOO_MANY_REQUESTS => "RESOURCE_BUSY",
        _ => "REMOTE_ERROR",
    }
}
