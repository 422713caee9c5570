// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared application state and registry helpers.
//!
//! Every registry call made on the request path goes through the helpers
//! here so that the registry deadline is applied uniformly and the
//! bookkeeping around claims (destroy-on-lost-claim, lock table cleanup on
//! release) cannot be forgotten by a handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use pinroute_core::directive::{ResourceId, ResourceKind};
use pinroute_core::error::{Result, RouteError};
use pinroute_core::locks::ResourceLocks;
use pinroute_core::registry::{LocationRegistry, NodeAddress, OwnershipRecord};
use pinroute_core::store::ResourceStore;

use crate::forwarder::Forwarder;
use crate::store::SessionStore;
use crate::strategy::RouteStrategy;

/// Shared per-node state, cheap to clone into handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

struct StateInner {
    node: NodeAddress,
    registry: Arc<dyn LocationRegistry>,
    store: Arc<SessionStore>,
    locks: ResourceLocks,
    forwarder: Forwarder,
    strategies: HashMap<&'static str, Arc<dyn RouteStrategy>>,
    lease: Duration,
    registry_timeout: Duration,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Assemble the shared state for one node.
    pub fn new(
        node: NodeAddress,
        registry: Arc<dyn LocationRegistry>,
        store: Arc<SessionStore>,
        forwarder: Forwarder,
        strategies: HashMap<&'static str, Arc<dyn RouteStrategy>>,
        lease: Duration,
        registry_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(StateInner {
                node,
                registry,
                store,
                locks: ResourceLocks::new(),
                forwarder,
                strategies,
                lease,
                registry_timeout,
                started_at: Utc::now(),
            }),
        }
    }

    /// This node's advertised address.
    pub fn node(&self) -> &NodeAddress {
        &self.inner.node
    }

    /// The node-local resource store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    /// The per-resource lock table.
    pub fn locks(&self) -> &ResourceLocks {
        &self.inner.locks
    }

    /// The node-to-node forwarding client.
    pub fn forwarder(&self) -> &Forwarder {
        &self.inner.forwarder
    }

    /// The shared location registry.
    pub fn registry(&self) -> &Arc<dyn LocationRegistry> {
        &self.inner.registry
    }

    /// The ownership lease duration.
    pub fn lease(&self) -> Duration {
        self.inner.lease
    }

    /// When this node started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Look up a registered strategy by name.
    pub fn strategy(&self, name: &str) -> Option<Arc<dyn RouteStrategy>> {
        self.inner.strategies.get(name).cloned()
    }

    async fn with_deadline<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.inner.registry_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RouteError::Registry {
                operation: operation.to_string(),
                details: format!(
                    "registry did not answer within {:?}",
                    self.inner.registry_timeout
                ),
            }),
        }
    }

    /// Find the live owner of a resource.
    pub async fn lookup(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
    ) -> Result<Option<OwnershipRecord>> {
        self.with_deadline("lookup", self.inner.registry.lookup(kind, id))
            .await
    }

    /// Claim ownership of a freshly-created local resource.
    ///
    /// If the claim is lost to another node, the local resource is torn down
    /// before the error propagates, so a lost race never leaves an orphan in
    /// memory. The caller maps the conflict onto its creation-time error.
    pub async fn claim_created(&self, kind: ResourceKind, id: &ResourceId) -> Result<OwnershipRecord> {
        let claim = self
            .with_deadline(
                "claim",
                self.inner
                    .registry
                    .claim(kind, id, &self.inner.node, self.inner.lease),
            )
            .await;

        match claim {
            Ok(record) => Ok(record),
            Err(err) => {
                warn!(
                    kind = %kind,
                    resource_id = %id,
                    error = %err,
                    "Claim for newly created resource failed, destroying local copy"
                );
                if let Err(destroy_err) = self.inner.store.destroy(kind, id).await {
                    debug!(
                        kind = %kind,
                        resource_id = %id,
                        error = %destroy_err,
                        "Local copy was already gone"
                    );
                }
                self.inner.locks.remove(kind, id);
                match err {
                    RouteError::OwnershipConflict { kind, resource_id } => {
                        Err(RouteError::ResourceAlreadyExists { kind, resource_id })
                    }
                    other => Err(other),
                }
            }
        }
    }

    /// Extend the lease after a successful local access.
    ///
    /// Renewal is best-effort: the request already succeeded, so a failed
    /// renewal is logged and swallowed. A version conflict here means the
    /// record was re-claimed underneath a resource we still hold, which is
    /// an anomaly worth a warning.
    pub async fn renew_after_access(&self, kind: ResourceKind, id: &ResourceId) {
        let record = match self.lookup(kind, id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(kind = %kind, resource_id = %id, "Skipping renewal, record is gone");
                return;
            }
            Err(err) => {
                warn!(kind = %kind, resource_id = %id, error = %err, "Renewal lookup failed");
                return;
            }
        };
        if record.owner != self.inner.node {
            warn!(
                kind = %kind,
                resource_id = %id,
                recorded_owner = %record.owner,
                "Resource served locally but registry names another owner"
            );
            return;
        }

        let renewed = self
            .with_deadline(
                "renew",
                self.inner.registry.renew(
                    kind,
                    id,
                    &self.inner.node,
                    record.version,
                    self.inner.lease,
                ),
            )
            .await;
        match renewed {
            Ok(_) => {}
            Err(RouteError::OwnershipConflict { .. }) => {
                warn!(
                    kind = %kind,
                    resource_id = %id,
                    "Lease renewal lost a version race, ownership may have moved"
                );
            }
            Err(err) => {
                warn!(kind = %kind, resource_id = %id, error = %err, "Lease renewal failed");
            }
        }
    }

    /// Release ownership after a resource is closed locally.
    ///
    /// Eviction of an already-gone record is an idempotent success; a
    /// version conflict means another node took the record over, in which
    /// case the local teardown already happened and there is nothing left
    /// to release.
    pub async fn release(&self, kind: ResourceKind, id: &ResourceId) -> Result<()> {
        let result = match self.lookup(kind, id).await? {
            Some(record) if record.owner == self.inner.node => {
                self.with_deadline(
                    "evict",
                    self.inner
                        .registry
                        .evict(kind, id, &self.inner.node, record.version),
                )
                .await
            }
            Some(record) => {
                warn!(
                    kind = %kind,
                    resource_id = %id,
                    recorded_owner = %record.owner,
                    "Skipping eviction, registry names another owner"
                );
                Ok(())
            }
            None => Ok(()),
        };
        self.inner.locks.remove(kind, id);
        result
    }
}
