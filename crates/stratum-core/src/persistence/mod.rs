// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for stratum-core.
//!
//! The store is a document store: every instance is one JSON document keyed
//! by instance id, and the topology is a single JSON document. Writes replace
//! the whole document atomically.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::CoreError;

/// Stored instance document.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    /// Unique identifier for the instance.
    pub instance_id: String,
    /// Blueprint type tag.
    pub instance_type: String,
    /// Full instance document.
    pub document: Value,
    /// When the document was last written.
    pub updated_at: DateTime<Utc>,
}

/// Persistence interface used by the topology and the instance manager.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert or replace an instance document.
    async fn save_instance(
        &self,
        instance_id: &str,
        instance_type: &str,
        document: &Value,
    ) -> Result<(), CoreError>;

    /// Load an instance document.
    async fn load_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError>;

    /// Delete an instance document. Returns whether it existed.
    async fn delete_instance(&self, instance_id: &str) -> Result<bool, CoreError>;

    /// Ids of every stored instance, sorted.
    async fn list_instance_ids(&self) -> Result<Vec<String>, CoreError>;

    /// Replace the topology document.
    async fn save_topology(&self, document: &Value) -> Result<(), CoreError>;

    /// Load the topology document, if one was ever saved.
    async fn load_topology(&self) -> Result<Option<Value>, CoreError>;

    /// Check whether the backend is reachable.
    async fn health_check_db(&self) -> Result<bool, CoreError> {
        Ok(true)
    }
}
