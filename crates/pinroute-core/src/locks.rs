// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-resource mutual exclusion.
//!
//! Two requests racing on the same in-memory resource (a live DB session, a
//! debug context) would corrupt its protocol state, so the router permits at
//! most one in-flight local operation per `(kind, id)`. Contention is
//! rejected with `Busy` rather than queued, which keeps the failure mode
//! visible and retryable instead of building invisible backlog behind a
//! slow statement.
//!
//! The guard is held only around the local invoke, never across registry
//! calls.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::directive::{ResourceId, ResourceKind};

/// Table of per-resource locks, shared by all requests on one node.
#[derive(Default)]
pub struct ResourceLocks {
    locks: DashMap<(ResourceKind, ResourceId), Arc<Mutex<()>>>,
}

/// Held while a local operation for one resource is in flight.
pub struct ResourceGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ResourceLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the in-flight slot for a resource. `None` means another
    /// operation for the same id is currently running on this node.
    pub fn try_acquire(&self, kind: ResourceKind, id: &ResourceId) -> Option<ResourceGuard> {
        let lock = self
            .locks
            .entry((kind, id.clone()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match lock.try_lock_owned() {
            Ok(guard) => Some(ResourceGuard { _guard: guard }),
            Err(_) => None,
        }
    }

    /// Drop the lock entry for a destroyed resource.
    pub fn remove(&self, kind: ResourceKind, id: &ResourceId) {
        self.locks.remove(&(kind, id.clone()));
    }

    /// Number of tracked resources (diagnostics only).
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no resources are tracked.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn sid(s: &str) -> ResourceId {
        ResourceId::from(s)
    }

    #[tokio::test]
    async fn test_second_acquire_is_rejected_while_held() {
        let locks = ResourceLocks::new();

        let guard = locks.try_acquire(ResourceKind::DbSession, &sid("sid:1-1"));
        assert!(guard.is_some());

        assert!(
            locks
                .try_acquire(ResourceKind::DbSession, &sid("sid:1-1"))
                .is_none()
        );

        drop(guard);
        assert!(
            locks
                .try_acquire(ResourceKind::DbSession, &sid("sid:1-1"))
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_different_ids_do_not_contend() {
        let locks = ResourceLocks::new();

        let _a = locks
            .try_acquire(ResourceKind::DbSession, &sid("sid:1-1"))
            .unwrap();
        let _b = locks
            .try_acquire(ResourceKind::DbSession, &sid("sid:1-2"))
            .unwrap();
        let _c = locks
            .try_acquire(ResourceKind::ExportTask, &sid("sid:1-1"))
            .unwrap();
    }

    /// The no-double-dispatch property: under concurrent identical requests
    /// for the same id, an in-progress counter must never exceed one.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_double_dispatch() {
        let locks = Arc::new(ResourceLocks::new());
        let in_progress = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let dispatched = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let locks = locks.clone();
            let in_progress = in_progress.clone();
            let max_seen = max_seen.clone();
            let dispatched = dispatched.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..20 {
                    if let Some(guard) = locks.try_acquire(ResourceKind::DbSession, &sid("sid:1-1"))
                    {
                        let now = in_progress.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_micros(50)).await;
                        in_progress.fetch_sub(1, Ordering::SeqCst);
                        dispatched.fetch_add(1, Ordering::SeqCst);
                        drop(guard);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(dispatched.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_remove_clears_entry() {
        let locks = ResourceLocks::new();
        drop(locks.try_acquire(ResourceKind::DbSession, &sid("sid:1-1")));
        assert_eq!(locks.len(), 1);

        locks.remove(ResourceKind::DbSession, &sid("sid:1-1"));
        assert!(locks.is_empty());
    }
}
