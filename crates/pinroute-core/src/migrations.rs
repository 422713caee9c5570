// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registry schema migrations.
//!
//! This module exposes embedded migrations that can be run programmatically
//! by any binary that selects the PostgreSQL registry backend.
//!
//! # Example
//!
//! ```ignore
//! use sqlx::PgPool;
//! use pinroute_core::migrations;
//!
//! let pool = PgPool::connect(&registry_url).await?;
//! migrations::run_postgres(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// PostgreSQL migrator with the registry schema embedded.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// Run PostgreSQL migrations.
///
/// Applies all pending migrations to the database. Safe to call multiple
/// times; already-applied migrations are skipped.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}
