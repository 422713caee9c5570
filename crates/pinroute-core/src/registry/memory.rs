// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory location registry.
//!
//! Backs single-node deployments and tests. All operations for all keys go
//! through one mutex, which makes `claim` trivially linearizable with
//! respect to `lookup`/`renew`/`evict`. The map is keyed by
//! `(kind, resource_id)`; expired records are replaced on claim and removed
//! by `sweep`, and `lookup` filters them out in the meantime.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::directive::{ResourceId, ResourceKind};
use crate::error::{Result, RouteError};

use super::{LocationRegistry, NodeAddress, OwnershipRecord, lease_expiry};

/// Mutex-guarded map of ownership records.
#[derive(Default)]
pub struct MemoryRegistry {
    records: Mutex<HashMap<(ResourceKind, ResourceId), OwnershipRecord>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut HashMap<(ResourceKind, ResourceId), OwnershipRecord>) -> T,
    ) -> T {
        // The closure never panics while holding the lock; a poisoned mutex
        // here would mean a bug in this module itself.
        let mut guard = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl LocationRegistry for MemoryRegistry {
    async fn claim(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        node: &NodeAddress,
        lease: Duration,
    ) -> Result<OwnershipRecord> {
        let now = Utc::now();
        let expires = lease_expiry(now, lease)?;
        self.with_records(|records| {
            let key = (kind, id.clone());
            match records.get(&key) {
                Some(existing) if !existing.is_expired(now) && existing.owner != *node => {
                    Err(RouteError::OwnershipConflict {
                        kind,
                        resource_id: id.clone(),
                    })
                }
                existing => {
                    let version = existing.map(|r| r.version + 1).unwrap_or(1);
                    let record = OwnershipRecord {
                        kind,
                        resource_id: id.clone(),
                        owner: node.clone(),
                        lease_expires_at: expires,
                        version,
                    };
                    records.insert(key, record.clone());
                    Ok(record)
                }
            }
        })
    }

    async fn lookup(&self, kind: ResourceKind, id: &ResourceId) -> Result<Option<OwnershipRecord>> {
        let now = Utc::now();
        Ok(self.with_records(|records| {
            records
                .get(&(kind, id.clone()))
                .filter(|r| !r.is_expired(now))
                .cloned()
        }))
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
        self.with_records(|records| {
            let key = (kind, id.clone());
            match records.get_mut(&key) {
                Some(record)
                    if record.owner == *node
                        && record.version == expected_version
                        && !record.is_expired(now) =>
                {
                    record.lease_expires_at = expires;
                    Ok(record.clone())
                }
                _ => Err(RouteError::OwnershipConflict {
                    kind,
                    resource_id: id.clone(),
                }),
            }
        })
    }

    async fn evict(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        node: &NodeAddress,
        expected_version: i64,
    ) -> Result<()> {
        self.with_records(|records| {
            let key = (kind, id.clone());
            match records.get(&key) {
                None => Ok(()),
                Some(record) if record.owner == *node && record.version == expected_version => {
                    records.remove(&key);
                    Ok(())
                }
                Some(_) => Err(RouteError::OwnershipConflict {
                    kind,
                    resource_id: id.clone(),
                }),
            }
        })
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.with_records(|records| {
            let before = records.len();
            records.retain(|_, record| !record.is_expired(now));
            (before - records.len()) as u64
        }))
    }

    async fn list(&self) -> Result<Vec<OwnershipRecord>> {
        let now = Utc::now();
        Ok(self.with_records(|records| {
            let mut all: Vec<OwnershipRecord> = records
                .values()
                .filter(|r| !r.is_expired(now))
                .cloned()
                .collect();
            all.sort_by(|a, b| {
                (a.kind.as_str(), &a.resource_id).cmp(&(b.kind.as_str(), &b.resource_id))
            });
            all
        }))
    }
}
