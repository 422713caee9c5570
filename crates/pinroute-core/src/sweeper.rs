// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that evicts expired ownership records.
//!
//! Leases bound the blast radius of a crashed node: a record whose owner
//! stopped renewing self-expires, and this worker physically removes it so
//! that a subsequent `lookup` reads not-found within `lease + interval`.
//! The in-memory resource on the dead node is unrecoverable and destroyed
//! in place, not migrated; the sweep only cleans the bookkeeping.
//!
//! Every node runs a sweeper; the delete is idempotent, so overlapping
//! sweeps from several nodes are harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::registry::LocationRegistry;

/// Configuration for the sweep worker.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often to scan for expired records.
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Background worker that periodically removes expired ownership records.
pub struct SweepWorker {
    registry: Arc<dyn LocationRegistry>,
    config: SweepConfig,
    shutdown: Arc<Notify>,
}

impl SweepWorker {
    /// Create a new sweep worker over the shared registry.
    pub fn new(registry: Arc<dyn LocationRegistry>, config: SweepConfig) -> Self {
        Self {
            registry,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Ownership sweep worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Ownership sweep worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    match self.registry.sweep(Utc::now()).await {
                        Ok(0) => debug!("No expired ownership records"),
                        Ok(evicted) => info!(evicted, "Swept expired ownership records"),
                        Err(e) => error!(error = %e, "Ownership sweep failed"),
                    }
                }
            }
        }

        info!("Ownership sweep worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::{ResourceId, ResourceKind};
    use crate::registry::{MemoryRegistry, NodeAddress};

    #[test]
    fn test_config_default() {
        let config = SweepConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_sweeps_expired_records() {
        let registry = Arc::new(MemoryRegistry::new());
        let node = NodeAddress::new("a", 1);
        registry
            .claim(
                ResourceKind::DbSession,
                &ResourceId::from("sid:1-1"),
                &node,
                Duration::from_millis(20),
            )
            .await
            .unwrap();

        let worker = SweepWorker::new(
            registry.clone(),
            SweepConfig {
                interval: Duration::from_millis(10),
            },
        );
        let shutdown = worker.shutdown_handle();
        let handle = tokio::spawn(async move { worker.run().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.notify_one();
        handle.await.unwrap();

        let remaining = registry.list().await.unwrap();
        assert!(remaining.is_empty());
    }
}
