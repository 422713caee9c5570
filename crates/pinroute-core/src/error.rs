// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for pinroute.
//!
//! Provides a unified error type with stable machine-readable codes that the
//! HTTP layer maps onto response statuses.

use std::fmt;

use crate::directive::{ResourceId, ResourceKind};

/// Result type using RouteError
pub type Result<T> = std::result::Result<T, RouteError>;

/// Routing errors that can occur while resolving, claiming, or forwarding.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RouteError {
    /// A directive referenced a parameter the request does not carry, or a
    /// named strategy is not registered. This is a deployment/programming
    /// defect, not a user error.
    MalformedDirective {
        /// What is wrong with the directive.
        detail: String,
    },

    /// The inbound request itself is malformed (unparseable body, bad
    /// routing header).
    InvalidRequest {
        /// What is wrong with the request.
        detail: String,
    },

    /// A creation operation raced another node and lost the claim.
    ResourceAlreadyExists {
        /// Resource kind.
        kind: ResourceKind,
        /// The contested resource id.
        resource_id: ResourceId,
    },

    /// No live ownership record exists for the resource. Surfaced to the
    /// caller as "your session/job is no longer available", an expected
    /// lifecycle event rather than a server fault.
    ResourceExpiredOrUnknown {
        /// Resource kind.
        kind: ResourceKind,
        /// The resource id that was not found.
        resource_id: ResourceId,
    },

    /// Another operation is in flight for the same resource id on this node.
    Busy {
        /// Resource kind.
        kind: ResourceKind,
        /// The contended resource id.
        resource_id: ResourceId,
    },

    /// The owning node could not be reached.
    Unreachable {
        /// The node that did not respond.
        node: String,
    },

    /// The forwarded call did not complete within its deadline.
    Timeout {
        /// The node that timed out.
        node: String,
    },

    /// Registry compare-and-swap failed: the expected version is stale.
    /// Internal signal; never surfaced verbatim to callers.
    OwnershipConflict {
        /// Resource kind.
        kind: ResourceKind,
        /// The resource id whose record moved underneath us.
        resource_id: ResourceId,
    },

    /// A request arrived with a hop count above one. Forwarding is
    /// single-hop in a correct deployment; anything else means the registry
    /// state is inconsistent.
    ForwardLoop {
        /// The offending hop count.
        hop: u32,
    },

    /// The registry backend failed or timed out.
    Registry {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl RouteError {
    /// Get the stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedDirective { .. } => "MALFORMED_DIRECTIVE",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::ResourceAlreadyExists { .. } => "RESOURCE_ALREADY_EXISTS",
            Self::ResourceExpiredOrUnknown { .. } => "RESOURCE_EXPIRED_OR_UNKNOWN",
            Self::Busy { .. } => "RESOURCE_BUSY",
            Self::Unreachable { .. } => "NODE_UNREACHABLE",
            Self::Timeout { .. } => "FORWARD_TIMEOUT",
            Self::OwnershipConflict { .. } => "OWNERSHIP_CONFLICT",
            Self::ForwardLoop { .. } => "FORWARD_LOOP",
            Self::Registry { .. } => "REGISTRY_ERROR",
        }
    }

    /// Whether the caller may meaningfully retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. } | Self::Unreachable { .. } | Self::Timeout { .. }
        )
    }
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedDirective { detail } => {
                write!(f, "Malformed routing directive: {}", detail)
            }
            Self::InvalidRequest { detail } => {
                write!(f, "Invalid request: {}", detail)
            }
            Self::ResourceAlreadyExists { kind, resource_id } => {
                write!(f, "{} '{}' already exists", kind, resource_id)
            }
            Self::ResourceExpiredOrUnknown { kind, resource_id } => {
                write!(f, "{} '{}' has expired or does not exist", kind, resource_id)
            }
            Self::Busy { kind, resource_id } => {
                write!(
                    f,
                    "{} '{}' has another operation in flight",
                    kind, resource_id
                )
            }
            Self::Unreachable { node } => {
                write!(f, "Owning node '{}' is unreachable", node)
            }
            Self::Timeout { node } => {
                write!(f, "Forwarded call to node '{}' timed out", node)
            }
            Self::OwnershipConflict { kind, resource_id } => {
                write!(
                    f,
                    "Ownership of {} '{}' is held by another node",
                    kind, resource_id
                )
            }
            Self::ForwardLoop { hop } => {
                write!(f, "Forwarding loop detected: hop count {}", hop)
            }
            Self::Registry { operation, details } => {
                write!(f, "Registry error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for RouteError {}

impl From<sqlx::Error> for RouteError {
    fn from(err: sqlx::Error) -> Self {
        RouteError::Registry {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RouteError {
    fn from(err: serde_json::Error) -> Self {
        RouteError::InvalidRequest {
            detail: format!("body is not valid JSON: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> ResourceId {
        ResourceId::from(s)
    }

    #[test]
    fn test_error_codes() {
        let cases = vec![
            (
                RouteError::MalformedDirective {
                    detail: "missing parameter 'sessionId'".to_string(),
                },
                "MALFORMED_DIRECTIVE",
            ),
            (
                RouteError::ResourceAlreadyExists {
                    kind: ResourceKind::DbSession,
                    resource_id: sid("sid:1-1"),
                },
                "RESOURCE_ALREADY_EXISTS",
            ),
            (
                RouteError::ResourceExpiredOrUnknown {
                    kind: ResourceKind::DbSession,
                    resource_id: sid("sid:1-1"),
                },
                "RESOURCE_EXPIRED_OR_UNKNOWN",
            ),
            (
                RouteError::Busy {
                    kind: ResourceKind::ExportTask,
                    resource_id: sid("t-1"),
                },
                "RESOURCE_BUSY",
            ),
            (
                RouteError::Unreachable {
                    node: "10.0.0.2:8990".to_string(),
                },
                "NODE_UNREACHABLE",
            ),
            (
                RouteError::Timeout {
                    node: "10.0.0.2:8990".to_string(),
                },
                "FORWARD_TIMEOUT",
            ),
            (
                RouteError::OwnershipConflict {
                    kind: ResourceKind::DbSession,
                    resource_id: sid("sid:1-1"),
                },
                "OWNERSHIP_CONFLICT",
            ),
            (RouteError::ForwardLoop { hop: 2 }, "FORWARD_LOOP"),
            (
                RouteError::Registry {
                    operation: "claim".to_string(),
                    details: "connection refused".to_string(),
                },
                "REGISTRY_ERROR",
            ),
        ];

        for (error, expected_code) in cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(
            RouteError::Unreachable {
                node: "a:1".to_string()
            }
            .is_retryable()
        );
        assert!(
            RouteError::Busy {
                kind: ResourceKind::DbSession,
                resource_id: sid("sid:1-1"),
            }
            .is_retryable()
        );
        assert!(
            !RouteError::MalformedDirective {
                detail: "x".to_string()
            }
            .is_retryable()
        );
        assert!(
            !RouteError::ResourceExpiredOrUnknown {
                kind: ResourceKind::DbSession,
                resource_id: sid("sid:1-1"),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_display_messages() {
        let err = RouteError::ResourceExpiredOrUnknown {
            kind: ResourceKind::DbSession,
            resource_id: sid("sid:3-7"),
        };
        assert_eq!(
            err.to_string(),
            "db_session 'sid:3-7' has expired or does not exist"
        );

        let err = RouteError::ForwardLoop { hop: 2 };
        assert_eq!(err.to_string(), "Forwarding loop detected: hop count 2");

        let err = RouteError::Registry {
            operation: "renew".to_string(),
            details: "connection reset".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Registry error during 'renew': connection reset"
        );
    }
}
