// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory persistence for tests and local runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::CoreError;

use super::{InstanceRecord, Persistence};

/// Persistence that keeps every document in process memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    instances: RwLock<BTreeMap<String, InstanceRecord>>,
    topology: RwLock<Option<Value>>,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn save_instance(
        &self,
        instance_id: &str,
        instance_type: &str,
        document: &Value,
    ) -> Result<(), CoreError> {
        let record = InstanceRecord {
            instance_id: instance_id.to_string(),
            instance_type: instance_type.to_string(),
            document: document.clone(),
            updated_at: Utc::now(),
        };
        self.instances
            .write()
            .await
            .insert(instance_id.to_string(), record);
        Ok(())
    }

    async fn load_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, CoreError> {
        Ok(self.instances.read().await.get(instance_id).cloned())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<bool, CoreError> {
        Ok(self.instances.write().await.remove(instance_id).is_some())
    }

    async fn list_instance_ids(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.instances.read().await.keys().cloned().collect())
    }

    async fn save_topology(&self, document: &Value) -> Result<(), CoreError> {
        *self.topology.write().await = Some(document.clone());
        Ok(())
    }

    async fn load_topology(&self) -> Result<Option<Value>, CoreError> {
        Ok(self.topology.read().await.clone())
    }
}
