// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory pinned resource store.
//!
//! Holds the node-local, non-migratable resources this fleet pins:
//! interactive DB sessions and the export tasks spawned from them. The
//! store is deliberately protocol-light (it records executed statements
//! instead of talking to a real database engine); the routing layer treats
//! it purely through the [`ResourceStore`] capability interface plus the
//! concrete accessors the handlers use.
//!
//! Sessions use the compound id form `sid:<datasourceId>-<n>`; export tasks
//! use plain UUIDs.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use pinroute_core::directive::{ResourceId, ResourceKind};
use pinroute_core::error::{Result, RouteError};
use pinroute_core::store::ResourceStore;

/// One executed statement inside a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementRecord {
    /// Id of the statement within its session (`stmt-<n>`).
    pub statement_id: String,
    /// The submitted SQL text.
    pub sql: String,
    /// Execution status; always `executed` in this store.
    pub status: &'static str,
}

/// Session status as returned by the status operation.
///
/// Deliberately excludes volatile fields (last access time), so the same
/// session reads byte-identically whether served locally or forwarded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Session id.
    pub session_id: String,
    /// Datasource the session was opened against.
    pub datasource_id: i64,
    /// Number of executed statements.
    pub statement_count: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Export task status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStatus {
    /// Task id.
    pub task_id: String,
    /// The session the export was taken from.
    pub session_id: String,
    /// Task state; this store completes exports synchronously.
    pub status: &'static str,
    /// Number of statements captured in the export.
    pub statement_count: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

enum Pinned {
    DbSession {
        datasource_id: i64,
        created_at: DateTime<Utc>,
        last_accessed: DateTime<Utc>,
        statements: Vec<StatementRecord>,
    },
    ExportTask {
        session_id: ResourceId,
        created_at: DateTime<Utc>,
        statement_count: usize,
    },
}

/// Node-local store of pinned resources.
#[derive(Default)]
pub struct SessionStore {
    resources: DashMap<(ResourceKind, ResourceId), Pinned>,
    next_seq: AtomicU64,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn missing(kind: ResourceKind, id: &ResourceId) -> RouteError {
        RouteError::ResourceExpiredOrUnknown {
            kind,
            resource_id: id.clone(),
        }
    }

    /// Open a new session against a datasource and return its id.
    pub fn create_session(&self, datasource_id: i64) -> ResourceId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let id = ResourceId::from(format!("sid:{}-{}", datasource_id, seq));
        let now = Utc::now();
        self.resources.insert(
            (ResourceKind::DbSession, id.clone()),
            Pinned::DbSession {
                datasource_id,
                created_at: now,
                last_accessed: now,
                statements: Vec::new(),
            },
        );
        id
    }

    /// Current status of a session.
    pub fn session_status(&self, id: &ResourceId) -> Result<SessionStatus> {
        let entry = self
            .resources
            .get(&(ResourceKind::DbSession, id.clone()))
            .ok_or_else(|| Self::missing(ResourceKind::DbSession, id))?;
        match entry.value() {
            Pinned::DbSession {
                datasource_id,
                created_at,
                statements,
                ..
            } => Ok(SessionStatus {
                session_id: id.to_string(),
                datasource_id: *datasource_id,
                statement_count: statements.len(),
                created_at: *created_at,
            }),
            Pinned::ExportTask { .. } => Err(Self::missing(ResourceKind::DbSession, id)),
        }
    }

    /// Execute a statement in a session.
    pub fn execute_statement(&self, id: &ResourceId, sql: &str) -> Result<StatementRecord> {
        let mut entry = self
            .resources
            .get_mut(&(ResourceKind::DbSession, id.clone()))
            .ok_or_else(|| Self::missing(ResourceKind::DbSession, id))?;
        match entry.value_mut() {
            Pinned::DbSession {
                statements,
                last_accessed,
                ..
            } => {
                let record = StatementRecord {
                    statement_id: format!("stmt-{}", statements.len() + 1),
                    sql: sql.to_string(),
                    status: "executed",
                };
                statements.push(record.clone());
                *last_accessed = Utc::now();
                Ok(record)
            }
            Pinned::ExportTask { .. } => Err(Self::missing(ResourceKind::DbSession, id)),
        }
    }

    /// All statements executed in a session so far, oldest first.
    pub fn statement_results(&self, id: &ResourceId) -> Result<Vec<StatementRecord>> {
        let entry = self
            .resources
            .get(&(ResourceKind::DbSession, id.clone()))
            .ok_or_else(|| Self::missing(ResourceKind::DbSession, id))?;
        match entry.value() {
            Pinned::DbSession { statements, .. } => Ok(statements.clone()),
            Pinned::ExportTask { .. } => Err(Self::missing(ResourceKind::DbSession, id)),
        }
    }

    /// Snapshot a session into a new export task and return the task id.
    ///
    /// The source session must live on this node; this store completes the
    /// export synchronously.
    pub fn create_export(&self, session_id: &ResourceId) -> Result<ResourceId> {
        let statement_count = {
            let entry = self
                .resources
                .get(&(ResourceKind::DbSession, session_id.clone()))
                .ok_or_else(|| Self::missing(ResourceKind::DbSession, session_id))?;
            match entry.value() {
                Pinned::DbSession { statements, .. } => statements.len(),
                Pinned::ExportTask { .. } => {
                    return Err(Self::missing(ResourceKind::DbSession, session_id));
                }
            }
        };

        let task_id = ResourceId::from(Uuid::new_v4().to_string());
        self.resources.insert(
            (ResourceKind::ExportTask, task_id.clone()),
            Pinned::ExportTask {
                session_id: session_id.clone(),
                created_at: Utc::now(),
                statement_count,
            },
        );
        Ok(task_id)
    }

    /// Status of an export task.
    pub fn export_status(&self, task_id: &ResourceId) -> Result<ExportStatus> {
        let entry = self
            .resources
            .get(&(ResourceKind::ExportTask, task_id.clone()))
            .ok_or_else(|| Self::missing(ResourceKind::ExportTask, task_id))?;
        match entry.value() {
            Pinned::ExportTask {
                session_id,
                created_at,
                statement_count,
            } => Ok(ExportStatus {
                task_id: task_id.to_string(),
                session_id: session_id.to_string(),
                status: "completed",
                statement_count: *statement_count,
                created_at: *created_at,
            }),
            Pinned::DbSession { .. } => Err(Self::missing(ResourceKind::ExportTask, task_id)),
        }
    }

    /// Number of resources held (diagnostics only).
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[async_trait]
impl ResourceStore for SessionStore {
    async fn exists(&self, kind: ResourceKind, id: &ResourceId) -> bool {
        self.resources.contains_key(&(kind, id.clone()))
    }

    async fn touch(&self, kind: ResourceKind, id: &ResourceId) {
        if let Some(mut entry) = self.resources.get_mut(&(kind, id.clone())) {
            if let Pinned::DbSession { last_accessed, .. } = entry.value_mut() {
                *last_accessed = Utc::now();
            }
        }
    }

    async fn destroy(&self, kind: ResourceKind, id: &ResourceId) -> Result<()> {
        self.resources
            .remove(&(kind, id.clone()))
            .map(|_| ())
            .ok_or_else(|| Self::missing(kind, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = SessionStore::new();
        let id = store.create_session(7);
        assert!(id.as_str().starts_with("sid:7-"));
        assert!(store.exists(ResourceKind::DbSession, &id).await);

        store.execute_statement(&id, "select 1").unwrap();
        store.execute_statement(&id, "select 2").unwrap();

        let status = store.session_status(&id).unwrap();
        assert_eq!(status.datasource_id, 7);
        assert_eq!(status.statement_count, 2);

        let results = store.statement_results(&id).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].statement_id, "stmt-1");
        assert_eq!(results[1].sql, "select 2");

        store.destroy(ResourceKind::DbSession, &id).await.unwrap();
        assert!(!store.exists(ResourceKind::DbSession, &id).await);
    }

    #[tokio::test]
    async fn test_session_ids_are_unique_per_node() {
        let store = SessionStore::new();
        let a = store.create_session(1);
        let b = store.create_session(1);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_missing_session_is_expired_or_unknown() {
        let store = SessionStore::new();
        let err = store
            .session_status(&ResourceId::from("sid:9-9"))
            .unwrap_err();
        assert_eq!(err.error_code(), "RESOURCE_EXPIRED_OR_UNKNOWN");

        let err = store
            .destroy(ResourceKind::DbSession, &ResourceId::from("sid:9-9"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "RESOURCE_EXPIRED_OR_UNKNOWN");
    }

    #[tokio::test]
    async fn test_export_snapshot() {
        let store = SessionStore::new();
        let session = store.create_session(3);
        store.execute_statement(&session, "select 1").unwrap();

        let task = store.create_export(&session).unwrap();
        let status = store.export_status(&task).unwrap();
        assert_eq!(status.session_id, session.to_string());
        assert_eq!(status.status, "completed");
        assert_eq!(status.statement_count, 1);

        // Statements executed after the snapshot do not change the export.
        store.execute_statement(&session, "select 2").unwrap();
        assert_eq!(store.export_status(&task).unwrap().statement_count, 1);
    }

    #[tokio::test]
    async fn test_export_for_missing_session_fails() {
        let store = SessionStore::new();
        let err = store
            .create_export(&ResourceId::from("sid:1-1"))
            .unwrap_err();
        assert_eq!(err.error_code(), "RESOURCE_EXPIRED_OR_UNKNOWN");
    }
}
