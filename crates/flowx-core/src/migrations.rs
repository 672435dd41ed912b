// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for flowx-core.
//!
//! Embedders that manage their own pool can apply the schema with
//! [`run_sqlite`] before handing the pool to
//! [`SqlitePersistence::new`](crate::persistence::SqlitePersistence::new).
//!
//! # Example
//!
//! ```ignore
//! use sqlx::SqlitePool;
//! use flowx_core::migrations;
//!
//! let pool = SqlitePool::connect("sqlite:.data/flowx.db?mode=rwc").await?;
//! migrations::run_sqlite(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// SQLite migrator with all flowx migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run SQLite migrations.
///
/// Already-applied migrations are skipped, so this is safe to call on every start.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
