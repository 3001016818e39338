// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for stratum-engine.
//!
//! [`EngineRuntime`] wires the topology, instance manager and task executor
//! together so the engine can run inside an existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratum_core::SqlitePersistence;
//! use stratum_engine::provider::{MockProviderFactory, ProviderRegistry};
//! use stratum_engine::runtime::EngineRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = Arc::new(SqlitePersistence::from_path(".data/stratum.db").await?);
//!
//!     let runtime = EngineRuntime::builder()
//!         .persistence(persistence)
//!         .blueprints(my_blueprints())
//!         .providers(ProviderRegistry::new().with("mock", Arc::new(MockProviderFactory::new())))
//!         .workers(8)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let task_id = runtime.submit_create("slice", serde_json::json!({}), None).await?;
//!     // ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use stratum_core::{AddressRangeAllocator, DEFAULT_RESERVED_HEAD, Persistence, ReferenceCodec, Topology};
use tracing::info;

use crate::blueprint::BlueprintRegistry;
use crate::config::Config;
use crate::manager::InstanceManager;
use crate::provider::ProviderRegistry;
use crate::task_executor::{TaskExecutor, TaskStatus};

/// Builder for creating an [`EngineRuntime`].
pub struct EngineRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    blueprints: BlueprintRegistry,
    providers: ProviderRegistry,
    codec: Option<ReferenceCodec>,
    workers: usize,
    reserved_head: u32,
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        let config = Config::default();
        Self {
            persistence: None,
            blueprints: BlueprintRegistry::new(),
            providers: ProviderRegistry::new(),
            codec: None,
            workers: config.workers,
            reserved_head: DEFAULT_RESERVED_HEAD,
        }
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the instance and topology store (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the blueprints instances can be created from.
    pub fn blueprints(mut self, blueprints: BlueprintRegistry) -> Self {
        self.blueprints = blueprints;
        self
    }

    /// Set the provider factories, keyed by back-end kind.
    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Use a codec with extra resource types.
    ///
    /// Default: [`ReferenceCodec::builtin`]
    pub fn codec(mut self, codec: ReferenceCodec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Set the number of task workers.
    ///
    /// Default: 4
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the number of addresses kept free at the start of every prefix.
    ///
    /// Default: 10
    pub fn reserved_head(mut self, reserved_head: u32) -> Self {
        self.reserved_head = reserved_head;
        self
    }

    /// Apply worker count and reserved head from a loaded [`Config`].
    pub fn config(self, config: &Config) -> Self {
        self.workers(config.workers)
            .reserved_head(config.reserved_head)
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }

        Ok(EngineRuntimeConfig {
            persistence,
            blueprints: Arc::new(self.blueprints),
            providers: Arc::new(self.providers),
            codec: self.codec.unwrap_or_else(ReferenceCodec::builtin),
            workers: self.workers,
            reserved_head: self.reserved_head,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    persistence: Arc<dyn Persistence>,
    blueprints: Arc<BlueprintRegistry>,
    providers: Arc<ProviderRegistry>,
    codec: ReferenceCodec,
    workers: usize,
    reserved_head: u32,
}

impl EngineRuntimeConfig {
    /// Load the topology, restore stored instances and start the workers.
    pub async fn start(self) -> Result<EngineRuntime> {
        let topology = Arc::new(
            Topology::load(
                self.persistence.clone(),
                AddressRangeAllocator::new(self.reserved_head),
            )
            .await?,
        );

        let manager = InstanceManager::new(
            self.persistence,
            topology.clone(),
            self.blueprints.clone(),
            self.providers.clone(),
            self.codec,
        );
        let restored = manager.restore_all().await?;

        let executor = Arc::new(TaskExecutor::new(self.workers));

        info!(
            workers = self.workers,
            reserved_head = self.reserved_head,
            restored,
            blueprints = ?self.blueprints.types(),
            providers = ?self.providers.kinds(),
            "EngineRuntime started"
        );

        Ok(EngineRuntime {
            topology,
            manager,
            executor,
        })
    }
}

/// A running engine.
///
/// Lifecycle operations can be called directly on [`manager`](Self::manager)
/// or queued on the task executor with the `submit_*` methods, which return
/// a task id to poll with [`task_status`](Self::task_status).
pub struct EngineRuntime {
    topology: Arc<Topology>,
    manager: InstanceManager,
    executor: Arc<TaskExecutor>,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn manager(&self) -> &InstanceManager {
        &self.manager
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Queue an instance creation. The task result is the new instance id.
    pub async fn submit_create(
        &self,
        blueprint_type: &str,
        message: Value,
        parent_id: Option<&str>,
    ) -> Result<String> {
        let manager = self.manager.clone();
        let blueprint_type = blueprint_type.to_string();
        let parent_id = parent_id.map(str::to_string);
        Ok(self
            .executor
            .add_task(
                async move {
                    let id = manager
                        .create(&blueprint_type, message, parent_id.as_deref())
                        .await?;
                    Ok(Value::String(id))
                },
                None,
            )
            .await?)
    }

    /// Queue a day-2 operation. The task result is the operation's output.
    pub async fn submit_update(
        &self,
        instance_id: &str,
        operation: &str,
        message: Value,
    ) -> Result<String> {
        let manager = self.manager.clone();
        let instance_id = instance_id.to_string();
        let operation = operation.to_string();
        Ok(self
            .executor
            .add_task(
                async move { manager.update(&instance_id, &operation, message).await },
                None,
            )
            .await?)
    }

    /// Queue an instance deletion.
    pub async fn submit_delete(&self, instance_id: &str) -> Result<String> {
        let manager = self.manager.clone();
        let instance_id = instance_id.to_string();
        Ok(self
            .executor
            .add_task(
                async move {
                    manager.delete(&instance_id).await?;
                    Ok(Value::Null)
                },
                None,
            )
            .await?)
    }

    /// Run a day-2 operation on a worker and wait for it.
    pub async fn update_sync(
        &self,
        instance_id: &str,
        operation: &str,
        message: Value,
    ) -> Result<TaskStatus> {
        let manager = self.manager.clone();
        let instance_id = instance_id.to_string();
        let operation = operation.to_string();
        Ok(self
            .executor
            .add_task_sync(
                async move { manager.update(&instance_id, &operation, message).await },
                None,
            )
            .await?)
    }

    /// Status of a queued task.
    pub async fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.executor.get_task_status(task_id).await
    }

    /// Gracefully shut down the runtime.
    ///
    /// Queued tasks are drained before the workers stop.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");
        self.executor.shutdown().await;
        info!("EngineRuntime shutdown complete");
        Ok(())
    }
}
