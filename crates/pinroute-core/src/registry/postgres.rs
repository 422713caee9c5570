// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed location registry.
//!
//! Each registry operation is a single statement, so the per-row atomicity
//! of the `ownership_records` primary key gives the linearizable
//! claim/renew/evict contract without explicit locking:
//!
//! - `claim` is an `INSERT ... ON CONFLICT DO UPDATE` that only overwrites a
//!   row whose lease has expired (or that this node already owns); a
//!   conflicting live row makes the statement return no row, which reads as
//!   a lost race.
//! - `renew` and `evict` compare-and-swap on `version` in the `WHERE`
//!   clause.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::directive::{ResourceId, ResourceKind};
use crate::error::{Result, RouteError};

use super::{LocationRegistry, NodeAddress, OwnershipRecord, lease_expiry};

/// PostgreSQL-backed registry over the `ownership_records` table.
#[derive(Clone)]
pub struct PostgresRegistry {
    pool: PgPool,
}

impl PostgresRegistry {
    /// Create a registry over an existing connection pool. The schema must
    /// already be in place; see [`crate::migrations`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OwnershipRow {
    kind: String,
    resource_id: String,
    owner_host: String,
    owner_port: i32,
    lease_expires_at: DateTime<Utc>,
    version: i64,
}

impl OwnershipRow {
    fn into_record(self) -> Result<OwnershipRecord> {
        Ok(OwnershipRecord {
            kind: self.kind.parse().map_err(|_| RouteError::Registry {
                operation: "decode".to_string(),
                details: format!("unknown kind '{}' in ownership_records", self.kind),
            })?,
            resource_id: ResourceId::from(self.resource_id),
            owner: NodeAddress::new(self.owner_host, self.owner_port as u16),
            lease_expires_at: self.lease_expires_at,
            version: self.version,
        })
    }
}

#[async_trait]
impl LocationRegistry for PostgresRegistry {
    async fn claim(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        node: &NodeAddress,
        lease: Duration,
    ) -> Result<OwnershipRecord> {
        let now = Utc::now();
        let expires = lease_expiry(now, lease)?;

        let row = sqlx::query_as::<_, OwnershipRow>(
            r#"
            INSERT INTO ownership_records
                (kind, resource_id, owner_host, owner_port, lease_expires_at, version)
            VALUES ($1, $2, $3, $4, $5, 1)
            ON CONFLICT (kind, resource_id) DO UPDATE
            SET owner_host = EXCLUDED.owner_host,
                owner_port = EXCLUDED.owner_port,
                lease_expires_at = EXCLUDED.lease_expires_at,
                version = ownership_records.version + 1
            WHERE ownership_records.lease_expires_at <= $6
               OR (ownership_records.owner_host = EXCLUDED.owner_host
                   AND ownership_records.owner_port = EXCLUDED.owner_port)
            RETURNING kind, resource_id, owner_host, owner_port, lease_expires_at, version
            "#,
        )
        .bind(kind.as_str())
        .bind(id.as_str())
        .bind(&node.host)
        .bind(node.port as i32)
        .bind(expires)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_record(),
            // The conditional update matched nothing: a live record with a
            // different owner already exists.
            None => Err(RouteError::OwnershipConflict {
                kind,
                resource_id: id.clone(),
            }),
        }
    }

    async fn lookup(&self, kind: ResourceKind, id: &ResourceId) -> Result<Option<OwnershipRecord>> {
        let row = sqlx::query_as::<_, OwnershipRow>(
            r#"
            SELECT kind, resource_id, owner_host, owner_port, lease_expires_at, version
            FROM ownership_records
            WHERE kind = $1 AND resource_id = $2 AND lease_expires_at > $3
            "#,
        )
        .bind(kind.as_str())
        .bind(id.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(OwnershipRow::into_record).transpose()
    }

    async fn renew(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        node: &NodeAddress,
        expected_version: i64,
        lease: Duration,
    ) -> Result<OwnershipRecord> {
        let now = Utc::now();
        let expires = lease_expiry(now, lease)?;

        let row = sqlx::query_as::<_, OwnershipRow>(
            r#"
            UPDATE ownership_records
            SET lease_expires_at = $5
            WHERE kind = $1 AND resource_id = $2
              AND owner_host = $3 AND owner_port = $4
              AND version = $6
              AND lease_expires_at > $7
            RETURNING kind, resource_id, owner_host, owner_port, lease_expires_at, version
            "#,
        )
        .bind(kind.as_str())
        .bind(id.as_str())
        .bind(&node.host)
        .bind(node.port as i32)
        .bind(expires)
        .bind(expected_version)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_record(),
            None => Err(RouteError::OwnershipConflict {
                kind,
                resource_id: id.clone(),
            }),
        }
    }

    async fn evict(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        node: &NodeAddress,
        expected_version: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM ownership_records
            WHERE kind = $1 AND resource_id = $2
              AND owner_host = $3 AND owner_port = $4
              AND version = $5
            "#,
        )
        .bind(kind.as_str())
        .bind(id.as_str())
        .bind(&node.host)
        .bind(node.port as i32)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Nothing matched: either the record is already gone (idempotent
        // success, e.g. the sweep won a race with this close) or somebody
        // else holds it now.
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ownership_records WHERE kind = $1 AND resource_id = $2",
        )
        .bind(kind.as_str())
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await?;

        if exists == 0 {
            Ok(())
        } else {
            Err(RouteError::OwnershipConflict {
                kind,
                resource_id: id.clone(),
            })
        }
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ownership_records WHERE lease_expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list(&self) -> Result<Vec<OwnershipRecord>> {
        let rows = sqlx::query_as::<_, OwnershipRow>(
            r#"
            SELECT kind, resource_id, owner_host, owner_port, lease_expires_at, version
            FROM ownership_records
            WHERE lease_expires_at > $1
            ORDER BY kind, resource_id
            "#,
        )
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OwnershipRow::into_record).collect()
    }
}
