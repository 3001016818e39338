// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::CoreError;

use super::{InstanceRecord, Persistence};

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS instances (
        instance_id   TEXT PRIMARY KEY NOT NULL,
        instance_type TEXT NOT NULL,
        document      TEXT NOT NULL,
        updated_at    TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS topology (
        id         INTEGER PRIMARY KEY CHECK (id = 1),
        document   TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
];

#[derive(sqlx::FromRow)]
struct InstanceRow {
    instance_id: String,
    instance_type: String,
    document: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InstanceRow> for InstanceRecord {
    type Error = CoreError;

    fn try_from(row: InstanceRow) -> Result<Self, CoreError> {
        Ok(InstanceRecord {
            instance_id: row.instance_id,
            instance_type: row.instance_type,
            document: serde_json::from_str(&row.document)?,
            updated_at: row.updated_at,
        })
    }
}

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The schema is not touched; call [`SqlitePersistence::init_schema`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite URL (`sqlite::memory:`, `sqlite:data.db?mode=rwc`)
    /// and create the schema.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        // In-memory databases are per-connection.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        let persistence = Self { pool };
        persistence.init_schema().await?;
        Ok(persistence)
    }

    /// Create and initialize a SQLite database at a file path.
    ///
    /// Parent directories and the file itself are created when missing.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    /// Create tables if they do not exist.
    pub async fn init_schema(&self) -> Result<(), CoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::DatabaseError {
                    operation: "init_schema".to_string(),
                    details: e.to_string(),
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn save_instance(
        &self,
        instance_id: &str,
        instance_type: &str,
        document: &Value,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO instances (instance_id, instance_type, document, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(instance_id) DO UPDATE SET
                instance_type = excluded.instance_type,
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(instance_id)
        .bind(instance_type)
        .bind(serde_json::to_string(document)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError> {
        let row = sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT instance_id, instance_type, document, updated_at
            FROM instances
            WHERE instance_id = ?
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(InstanceRecord::try_from).transpose()
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM instances WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_instance_ids(&self) -> Result<Vec<String>, CoreError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT instance_id FROM instances ORDER BY instance_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn save_topology(&self, document: &Value) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO topology (id, document, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(serde_json::to_string(document)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_topology(&self) -> Result<Option<Value>, CoreError> {
        let document =
            sqlx::query_scalar::<_, String>("SELECT document FROM topology WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        document
            .map(|d| serde_json::from_str(&d).map_err(CoreError::from))
            .transpose()
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
