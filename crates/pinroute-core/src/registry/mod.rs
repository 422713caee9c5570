// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Location registry interfaces and backends.
//!
//! The registry is the single, cluster-visible source of truth for which
//! node currently owns which pinned resource. Ownership is a lease: a record
//! that is not renewed before `lease_expires_at` is treated as gone by
//! `lookup` and physically removed by the periodic sweep. The `version`
//! column is a compare-and-swap token; it increments on every
//! re-registration so that a node whose resource was re-claimed elsewhere
//! (for example after a crash/restart race) observes a conflict instead of
//! silently renewing a record it no longer owns.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryRegistry;
pub use self::postgres::PostgresRegistry;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::directive::{ResourceId, ResourceKind};
use crate::error::{Result, RouteError};

/// A reachable peer node, advertised as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name or IP address.
    pub host: String,
    /// HTTP port.
    pub port: u16,
}

impl NodeAddress {
    /// Create a node address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| RouteError::InvalidRequest {
            detail: format!("node address '{}' is not host:port", s),
        })?;
        let port: u16 = port.parse().map_err(|_| RouteError::InvalidRequest {
            detail: format!("node address '{}' has an invalid port", s),
        })?;
        if host.is_empty() {
            return Err(RouteError::InvalidRequest {
                detail: format!("node address '{}' has an empty host", s),
            });
        }
        Ok(Self::new(host, port))
    }
}

/// One ownership record: `(kind, id)` is pinned to `owner` until
/// `lease_expires_at`, unless renewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource id.
    pub resource_id: ResourceId,
    /// The node currently hosting the resource.
    pub owner: NodeAddress,
    /// When the lease runs out if not renewed.
    pub lease_expires_at: DateTime<Utc>,
    /// CAS token; increments on every re-registration.
    pub version: i64,
}

impl OwnershipRecord {
    /// Whether the lease has run out as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at <= now
    }
}

/// Compute a lease expiry timestamp.
pub(crate) fn lease_expiry(now: DateTime<Utc>, lease: Duration) -> Result<DateTime<Utc>> {
    let lease = chrono::Duration::from_std(lease).map_err(|e| RouteError::Registry {
        operation: "lease".to_string(),
        details: format!("invalid lease duration: {}", e),
    })?;
    Ok(now + lease)
}

/// Cluster-visible mapping from `(kind, id)` to owning node and lease.
///
/// Contract:
/// - `claim` is linearizable with respect to `lookup`/`renew`/`evict` for
///   the same `(kind, id)`: of N concurrent claims by different nodes,
///   exactly one succeeds and the rest observe
///   [`RouteError::OwnershipConflict`]. A claim over an expired record, or a
///   re-claim by the current owner, succeeds and bumps `version`.
/// - `lookup` never returns an expired record; an expired or just-evicted
///   record reads as `None`.
/// - `renew` and `evict` are CAS operations on `version`; a stale version
///   means the caller no longer owns the resource.
/// - `evict` of a record that is already gone is an idempotent success.
#[async_trait]
pub trait LocationRegistry: Send + Sync {
    /// Atomically create (or take over an expired) ownership record.
    async fn claim(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        node: &NodeAddress,
        lease: Duration,
    ) -> Result<OwnershipRecord>;

    /// Find the live ownership record for a resource, if any.
    async fn lookup(&self, kind: ResourceKind, id: &ResourceId) -> Result<Option<OwnershipRecord>>;

    /// Extend the lease of a record this node believes it owns.
    async fn renew(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        node: &NodeAddress,
        expected_version: i64,
        lease: Duration,
    ) -> Result<OwnershipRecord>;

    /// Explicitly release a record, e.g. on session close.
    async fn evict(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        node: &NodeAddress,
        expected_version: i64,
    ) -> Result<()>;

    /// Remove every record whose lease expired at or before `now`.
    /// Returns the number of records removed.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Snapshot of all live records, for the diagnostics surface.
    async fn list(&self) -> Result<Vec<OwnershipRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_address_display_round_trip() {
        let addr = NodeAddress::new("10.0.0.7", 8990);
        assert_eq!(addr.to_string(), "10.0.0.7:8990");
        assert_eq!(addr.to_string().parse::<NodeAddress>().unwrap(), addr);
    }

    #[test]
    fn test_node_address_parse_errors() {
        assert!("no-port".parse::<NodeAddress>().is_err());
        assert!("host:notaport".parse::<NodeAddress>().is_err());
        assert!(":8990".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn test_record_expiry() {
        let now = Utc::now();
        let record = OwnershipRecord {
            kind: ResourceKind::DbSession,
            resource_id: ResourceId::from("sid:1-1"),
            owner: NodeAddress::new("a", 1),
            lease_expires_at: now,
            version: 1,
        };
        assert!(record.is_expired(now));
        assert!(!record.is_expired(now - chrono::Duration::seconds(1)));
    }
}
