// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP mapping of the routing error taxonomy.
//!
//! Expired or unknown resources are an expected part of normal operation
//! (sessions time out), so they map to a clear 404-class response with a
//! stable code rather than a generic server error. Retryable transport
//! conditions map to 429/502/504 so callers can back off.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use pinroute_core::error::RouteError;

/// Response wrapper for [`RouteError`].
#[derive(Debug)]
pub struct ApiError(pub RouteError);

impl From<RouteError> for ApiError {
    fn from(err: RouteError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RouteError::MalformedDirective { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RouteError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            RouteError::ResourceAlreadyExists { .. } => StatusCode::CONFLICT,
            RouteError::ResourceExpiredOrUnknown { .. } => StatusCode::NOT_FOUND,
            RouteError::Busy { .. } => StatusCode::TOO_MANY_REQUESTS,
            RouteError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
            RouteError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RouteError::ForwardLoop { .. } => StatusCode::LOOP_DETECTED,
            RouteError::OwnershipConflict { .. } | RouteError::Registry { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.0.error_code(),
            "message": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinroute_core::directive::{ResourceId, ResourceKind};

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (
                RouteError::ResourceExpiredOrUnknown {
                    kind: ResourceKind::DbSession,
                    resource_id: ResourceId::from("sid:1-1"),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                RouteError::Busy {
                    kind: ResourceKind::DbSession,
                    resource_id: ResourceId::from("sid:1-1"),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                RouteError::Unreachable {
                    node: "a:8990".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                RouteError::Timeout {
                    node: "a:8990".to_string(),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (RouteError::ForwardLoop { hop: 2 }, StatusCode::LOOP_DETECTED),
            (
                RouteError::InvalidRequest {
                    detail: "x".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                RouteError::MalformedDirective {
                    detail: "x".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError(error).status(), status);
        }
    }
}
