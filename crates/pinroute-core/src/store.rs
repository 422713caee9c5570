// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capability interface onto the node-local resource store.
//!
//! The router treats the actual resource behavior (what a DB session or a
//! debug context does) as an external collaborator. It needs only enough
//! surface to check presence, refresh access time, and tear a resource down
//! when a creation claim is lost or a close operation runs. "Invoke" is not
//! part of this trait: invoking a resource is running the operation's own
//! local handler, which talks to the concrete store directly.

use async_trait::async_trait;

use crate::directive::{ResourceId, ResourceKind};
use crate::error::Result;

/// Minimal capability surface the router requires from a resource store.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Whether this node currently holds the resource in memory.
    async fn exists(&self, kind: ResourceKind, id: &ResourceId) -> bool;

    /// Record an access, for idle-time accounting.
    async fn touch(&self, kind: ResourceKind, id: &ResourceId);

    /// Destroy the in-memory resource. Destroying a resource that is
    /// already gone is an error of kind `RESOURCE_EXPIRED_OR_UNKNOWN`.
    async fn destroy(&self, kind: ResourceKind, id: &ResourceId) -> Result<()>;
}
