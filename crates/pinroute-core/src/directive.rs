// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Routing directives and directive resolution.
//!
//! A [`RoutingDirective`] is declared once per routed operation at startup
//! and never changes afterwards. It names the resource kind the operation
//! targets and one or more [`IdAccessor`]s that pull the concrete resource
//! id(s) out of the inbound request. Resolution is a pure function over the
//! request's parameters: it has no side effects and is safe to evaluate more
//! than once per request (e.g. once for routing and once for audit logging).
//!
//! An accessor that cannot locate its referenced parameter is a deployment
//! defect (the directive names a parameter the operation does not declare),
//! so resolution fails fast with [`RouteError::MalformedDirective`] instead
//! of silently defaulting.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouteError};

/// Closed set of pinned, stateful resource categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Interactive database session with live protocol state.
    DbSession,
    /// PL debugging context attached to a session.
    PlDebug,
    /// Long-running batch compile job.
    BatchCompile,
    /// Long-running export/import task.
    ExportTask,
}

impl ResourceKind {
    /// Stable string form, used in registry rows and routing headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DbSession => "db_session",
            Self::PlDebug => "pl_debug",
            Self::BatchCompile => "batch_compile",
            Self::ExportTask => "export_task",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "db_session" => Ok(Self::DbSession),
            "pl_debug" => Ok(Self::PlDebug),
            "batch_compile" => Ok(Self::BatchCompile),
            "export_task" => Ok(Self::ExportTask),
            other => Err(RouteError::InvalidRequest {
                detail: format!("unknown resource kind '{}'", other),
            }),
        }
    }
}

/// Opaque, comparable, hashable resource identifier.
///
/// Interactive sessions use the compound form `sid:<datasourceId>-<n>`;
/// jobs and tasks use plain UUIDs. The router never interprets the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A pure accessor pulling resource id(s) out of an inbound request.
///
/// Accessors are total over well-formed requests: a missing referenced
/// parameter is reported as [`RouteError::MalformedDirective`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdAccessor {
    /// A path parameter of the routed operation, e.g. `sessionId` in
    /// `/sessions/{sessionId}/status`.
    PathParam(&'static str),
    /// A query-string parameter.
    QueryParam(&'static str),
    /// A top-level string field of the JSON request body.
    BodyField(&'static str),
    /// A top-level array-of-strings field of the JSON request body. Yields
    /// every element, in order.
    BodyList(&'static str),
}

impl IdAccessor {
    fn name(&self) -> &'static str {
        match self {
            Self::PathParam(n) | Self::QueryParam(n) | Self::BodyField(n) | Self::BodyList(n) => n,
        }
    }

    /// Whether evaluating this accessor requires the request body.
    pub fn needs_body(&self) -> bool {
        matches!(self, Self::BodyField(_) | Self::BodyList(_))
    }
}

/// The declarative routing metadata attached to one operation.
#[derive(Debug, Clone)]
pub struct RoutingDirective {
    /// The resource kind this operation targets.
    pub kind: ResourceKind,
    /// Accessors evaluated in order; their yields are concatenated.
    pub accessors: Vec<IdAccessor>,
    /// Whether the operation may target more than one resource id.
    pub multi_id: bool,
    /// Named strategy plugin for `multi_id` operations. `None` selects the
    /// default fan-out behavior.
    pub strategy: Option<&'static str>,
}

impl RoutingDirective {
    /// Directive for the common single-id case.
    pub fn single(kind: ResourceKind, accessor: IdAccessor) -> Self {
        Self {
            kind,
            accessors: vec![accessor],
            multi_id: false,
            strategy: None,
        }
    }

    /// Directive for a multi-id operation handled by a named strategy.
    pub fn multi(kind: ResourceKind, accessor: IdAccessor, strategy: &'static str) -> Self {
        Self {
            kind,
            accessors: vec![accessor],
            multi_id: true,
            strategy: Some(strategy),
        }
    }

    /// Whether resolving this directive requires the request body.
    pub fn needs_body(&self) -> bool {
        self.accessors.iter().any(IdAccessor::needs_body)
    }

    /// Resolve the directive against the request's parameters.
    ///
    /// Returns exactly one id for single-id directives and a non-empty
    /// ordered set (duplicates removed, first occurrence wins) for multi-id
    /// directives.
    pub fn resolve(&self, params: &RequestParams) -> Result<ResolvedIds> {
        let mut ids: Vec<ResourceId> = Vec::new();
        for accessor in &self.accessors {
            for id in evaluate(accessor, params)? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        if self.multi_id {
            if ids.is_empty() {
                return Err(RouteError::InvalidRequest {
                    detail: "no resource ids supplied for multi-id operation".to_string(),
                });
            }
            return Ok(ResolvedIds::Many(ids));
        }

        match ids.len() {
            1 => Ok(ResolvedIds::Single(ids.remove(0))),
            n => Err(RouteError::MalformedDirective {
                detail: format!(
                    "single-id directive for {} resolved {} ids",
                    self.kind, n
                ),
            }),
        }
    }
}

/// Evaluate one accessor. A missing referenced parameter is a directive
/// defect; a present-but-wrongly-typed body field is a client error.
fn evaluate(accessor: &IdAccessor, params: &RequestParams) -> Result<Vec<ResourceId>> {
    let missing = || RouteError::MalformedDirective {
        detail: format!("accessor references absent parameter '{}'", accessor.name()),
    };

    match accessor {
        IdAccessor::PathParam(name) => {
            let value = params.path.get(*name).ok_or_else(missing)?;
            Ok(vec![ResourceId::from(value.as_str())])
        }
        IdAccessor::QueryParam(name) => {
            let value = params.query.get(*name).ok_or_else(missing)?;
            Ok(vec![ResourceId::from(value.as_str())])
        }
        IdAccessor::BodyField(name) => {
            let body = params.body.as_ref().ok_or_else(missing)?;
            let value = body.get(*name).ok_or_else(missing)?;
            Ok(vec![scalar_id(name, value)?])
        }
        IdAccessor::BodyList(name) => {
            let body = params.body.as_ref().ok_or_else(missing)?;
            let value = body.get(*name).ok_or_else(missing)?;
            let items = value.as_array().ok_or_else(|| RouteError::InvalidRequest {
                detail: format!("body field '{}' must be an array", name),
            })?;
            items.iter().map(|v| scalar_id(name, v)).collect()
        }
    }
}

fn scalar_id(name: &str, value: &serde_json::Value) -> Result<ResourceId> {
    match value {
        serde_json::Value::String(s) => Ok(ResourceId::from(s.as_str())),
        serde_json::Value::Number(n) => Ok(ResourceId::from(n.to_string())),
        _ => Err(RouteError::InvalidRequest {
            detail: format!("body field '{}' must be a string or number", name),
        }),
    }
}

/// The parameters of one inbound call, as seen by the resolver.
///
/// Built by the HTTP layer from matched path parameters, the query string,
/// and (only when some accessor needs it) the buffered JSON body.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    /// Matched path parameters.
    pub path: HashMap<String, String>,
    /// Query-string parameters.
    pub query: HashMap<String, String>,
    /// Parsed JSON body, if buffered.
    pub body: Option<serde_json::Value>,
}

/// The outcome of directive resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedIds {
    /// The common case: the operation targets one resource.
    Single(ResourceId),
    /// A multi-id operation; non-empty and ordered.
    Many(Vec<ResourceId>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params_with_path(pairs: &[(&str, &str)]) -> RequestParams {
        RequestParams {
            path: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_single_path_param() {
        let directive =
            RoutingDirective::single(ResourceKind::DbSession, IdAccessor::PathParam("sessionId"));
        let params = params_with_path(&[("sessionId", "sid:7-1")]);

        let resolved = directive.resolve(&params).unwrap();
        assert_eq!(resolved, ResolvedIds::Single(ResourceId::from("sid:7-1")));
    }

    #[test]
    fn test_resolve_missing_path_param_is_directive_defect() {
        let directive =
            RoutingDirective::single(ResourceKind::DbSession, IdAccessor::PathParam("sessionId"));
        let params = params_with_path(&[("taskId", "t-1")]);

        let err = directive.resolve(&params).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_DIRECTIVE");
        assert!(err.to_string().contains("sessionId"));
    }

    #[test]
    fn test_resolve_is_repeatable() {
        // Resolution is side-effect free; a second evaluation must agree.
        let directive =
            RoutingDirective::single(ResourceKind::ExportTask, IdAccessor::PathParam("taskId"));
        let params = params_with_path(&[("taskId", "e3b0c442")]);

        let first = directive.resolve(&params).unwrap();
        let second = directive.resolve(&params).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_query_param() {
        let directive =
            RoutingDirective::single(ResourceKind::BatchCompile, IdAccessor::QueryParam("jobId"));
        let params = RequestParams {
            query: [("jobId".to_string(), "j-42".to_string())].into(),
            ..Default::default()
        };

        let resolved = directive.resolve(&params).unwrap();
        assert_eq!(resolved, ResolvedIds::Single(ResourceId::from("j-42")));
    }

    #[test]
    fn test_resolve_body_list_preserves_order_and_dedups() {
        let directive = RoutingDirective::multi(
            ResourceKind::DbSession,
            IdAccessor::BodyList("sessionIds"),
            "session-close",
        );
        let params = RequestParams {
            body: Some(json!({"sessionIds": ["sid:1-2", "sid:1-1", "sid:1-2"]})),
            ..Default::default()
        };

        let resolved = directive.resolve(&params).unwrap();
        assert_eq!(
            resolved,
            ResolvedIds::Many(vec![
                ResourceId::from("sid:1-2"),
                ResourceId::from("sid:1-1"),
            ])
        );
    }

    #[test]
    fn test_resolve_empty_body_list_is_client_error() {
        let directive = RoutingDirective::multi(
            ResourceKind::DbSession,
            IdAccessor::BodyList("sessionIds"),
            "session-close",
        );
        let params = RequestParams {
            body: Some(json!({"sessionIds": []})),
            ..Default::default()
        };

        let err = directive.resolve(&params).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");
    }

    #[test]
    fn test_resolve_body_list_wrong_type_is_client_error() {
        let directive = RoutingDirective::multi(
            ResourceKind::DbSession,
            IdAccessor::BodyList("sessionIds"),
            "session-close",
        );
        let params = RequestParams {
            body: Some(json!({"sessionIds": "sid:1-1"})),
            ..Default::default()
        };

        let err = directive.resolve(&params).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUEST");
    }

    #[test]
    fn test_resolve_body_field_number_coerces_to_string() {
        let directive =
            RoutingDirective::single(ResourceKind::BatchCompile, IdAccessor::BodyField("jobId"));
        let params = RequestParams {
            body: Some(json!({"jobId": 42})),
            ..Default::default()
        };

        let resolved = directive.resolve(&params).unwrap();
        assert_eq!(resolved, ResolvedIds::Single(ResourceId::from("42")));
    }

    #[test]
    fn test_single_directive_rejects_multiple_ids() {
        let directive = RoutingDirective {
            kind: ResourceKind::DbSession,
            accessors: vec![
                IdAccessor::PathParam("sessionId"),
                IdAccessor::QueryParam("sessionId"),
            ],
            multi_id: false,
            strategy: None,
        };
        let params = RequestParams {
            path: [("sessionId".to_string(), "sid:1-1".to_string())].into(),
            query: [("sessionId".to_string(), "sid:1-2".to_string())].into(),
            body: None,
        };

        let err = directive.resolve(&params).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_DIRECTIVE");
    }

    #[test]
    fn test_needs_body() {
        let path_only =
            RoutingDirective::single(ResourceKind::DbSession, IdAccessor::PathParam("sessionId"));
        assert!(!path_only.needs_body());

        let body_list = RoutingDirective::multi(
            ResourceKind::DbSession,
            IdAccessor::BodyList("sessionIds"),
            "session-close",
        );
        assert!(body_list.needs_body());
    }

    #[test]
    fn test_resource_kind_round_trip() {
        for kind in [
            ResourceKind::DbSession,
            ResourceKind::PlDebug,
            ResourceKind::BatchCompile,
            ResourceKind::ExportTask,
        ] {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("no_such_kind".parse::<ResourceKind>().is_err());
    }
}
