// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider trait definitions.
//!
//! Defines the abstract interface for back-end providers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use stratum_core::{ConfigurationHandle, CoreError, DeployableHandle, Topology};
use thiserror::Error;

/// Errors from provider operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Provider could not be initialized.
    #[error("Provider init failed: {0}")]
    Init(String),

    /// Compute operation failed on the back-end.
    #[error("Compute operation failed: {0}")]
    Compute(String),

    /// Workload operation failed on the back-end.
    #[error("Workload operation failed: {0}")]
    Workload(String),

    /// The resource variant cannot be handled by this provider.
    #[error("{provider_type} provider cannot {operation} a {resource_type}")]
    Unsupported {
        /// Provider kind.
        provider_type: String,
        /// Requested operation.
        operation: &'static str,
        /// Resource discriminator.
        resource_type: String,
    },

    /// The resource is not managed by this provider.
    #[error("Resource {0} is not managed by this provider")]
    UnknownResource(String),

    /// Topology lookup or address reservation failed.
    #[error("Topology error: {0}")]
    Topology(#[from] CoreError),

    /// Provider data could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// What a provider knows about its caller.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Owning instance id. Address reservations are made in its name.
    pub instance_id: String,
    /// Area served by the provider.
    pub area: u32,
    /// Back-end kind resolved from the topology.
    pub kind: String,
    /// Shared topology.
    pub topology: Arc<Topology>,
}

/// Trait for back-end providers.
///
/// Providers must not hold resource guards across `.await` points: read the
/// handle, drop the guard, then talk to the back-end.
///
/// No method is retried by the caller. Operations should be safe to retry
/// by hand.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Back-end kind (e.g. "openstack", "kubernetes", "mock").
    fn provider_type(&self) -> &str;

    /// Discriminator of the persisted private data.
    fn provider_data_type(&self) -> &'static str;

    /// Private data to persist with the instance.
    fn provider_data(&self) -> Result<Value>;

    /// Side-effecting first-time setup. Never called on restore.
    async fn init(&mut self) -> Result<()>;

    /// Create a compute resource (VM or device handle).
    async fn create_compute(&mut self, resource: &DeployableHandle) -> Result<()>;

    /// Apply a configuration to a compute resource.
    async fn configure_compute(&mut self, configuration: &ConfigurationHandle) -> Result<()>;

    /// Destroy a compute resource.
    async fn destroy_compute(&mut self, resource: &DeployableHandle) -> Result<()>;

    /// Install a workload (Helm release).
    async fn install_workload(&mut self, resource: &DeployableHandle) -> Result<()>;

    /// Apply new values to an installed workload.
    async fn update_workload_values(&mut self, configuration: &ConfigurationHandle) -> Result<()>;

    /// Uninstall a workload.
    async fn uninstall_workload(&mut self, resource: &DeployableHandle) -> Result<()>;

    /// Release everything the provider still holds for the instance.
    async fn final_cleanup(&mut self) -> Result<()>;
}
