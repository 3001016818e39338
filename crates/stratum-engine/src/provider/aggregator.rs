// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-instance provider dispatch.
//!
//! Routes every operation to the provider serving the resource's area. The
//! provider is created on first use from the factory registered for the
//! area's back-end kind, initialized once, then cached for the lifetime of
//! the instance. Its private data travels with the instance document.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratum_core::{ConfigurationHandle, DeployableHandle, Topology};
use tracing::{info, warn};

use super::registry::ProviderRegistry;
use super::traits::{Provider, ProviderContext};
use crate::error::{Error, Result};

/// Persisted form of one area's provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderBinding {
    pub provider_type: String,
    pub provider_data_type: String,
    pub provider_data: Value,
}

/// One provider per area, for one instance.
pub struct ProviderAggregator {
    instance_id: String,
    topology: Arc<Topology>,
    registry: Arc<ProviderRegistry>,
    providers: BTreeMap<u32, Box<dyn Provider>>,
}

impl std::fmt::Debug for ProviderAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAggregator")
            .field("instance_id", &self.instance_id)
            .field("areas", &self.areas())
            .finish()
    }
}

impl ProviderAggregator {
    /// Aggregator with no provider instantiated yet.
    pub fn new(
        instance_id: impl Into<String>,
        topology: Arc<Topology>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            topology,
            registry,
            providers: BTreeMap::new(),
        }
    }

    /// Areas with an instantiated provider.
    pub fn areas(&self) -> Vec<u32> {
        self.providers.keys().copied().collect()
    }

    fn context(&self, area: u32, kind: String) -> ProviderContext {
        ProviderContext {
            instance_id: self.instance_id.clone(),
            area,
            kind,
            topology: self.topology.clone(),
        }
    }

    /// Provider for `area`, created and initialized on first use.
    pub async fn provider(&mut self, area: u32) -> Result<&mut Box<dyn Provider>> {
        if !self.providers.contains_key(&area) {
            let kind = self.topology.backend_kind(area).await?;
            let factory = self.registry.get(&kind)?;
            let mut provider = factory.create(self.context(area, kind.clone()));
            provider.init().await?;
            info!(
                instance_id = %self.instance_id,
                area,
                provider_type = %kind,
                "Provider initialized"
            );
            self.providers.insert(area, provider);
        }
        self.providers
            .get_mut(&area)
            .ok_or_else(|| Error::operation(format!("provider for area {} vanished", area)))
    }

    pub async fn create_compute(&mut self, resource: &DeployableHandle) -> Result<()> {
        let area = resource.read().area;
        Ok(self.provider(area).await?.create_compute(resource).await?)
    }

    pub async fn configure_compute(&mut self, configuration: &ConfigurationHandle) -> Result<()> {
        let area = target_area(configuration);
        Ok(self
            .provider(area)
            .await?
            .configure_compute(configuration)
            .await?)
    }

    pub async fn destroy_compute(&mut self, resource: &DeployableHandle) -> Result<()> {
        let area = resource.read().area;
        Ok(self.provider(area).await?.destroy_compute(resource).await?)
    }

    pub async fn install_workload(&mut self, resource: &DeployableHandle) -> Result<()> {
        let area = resource.read().area;
        Ok(self.provider(area).await?.install_workload(resource).await?)
    }

    pub async fn update_workload_values(
        &mut self,
        configuration: &ConfigurationHandle,
    ) -> Result<()> {
        let area = target_area(configuration);
        Ok(self
            .provider(area)
            .await?
            .update_workload_values(configuration)
            .await?)
    }

    pub async fn uninstall_workload(&mut self, resource: &DeployableHandle) -> Result<()> {
        let area = resource.read().area;
        Ok(self
            .provider(area)
            .await?
            .uninstall_workload(resource)
            .await?)
    }

    /// Run cleanup on every instantiated provider.
    ///
    /// Every provider gets its cleanup call; the first failure is returned.
    pub async fn final_cleanup(&mut self) -> Result<()> {
        let mut first_error = None;
        for (area, provider) in self.providers.iter_mut() {
            if let Err(e) = provider.final_cleanup().await {
                warn!(
                    instance_id = %self.instance_id,
                    area = *area,
                    error = %e,
                    "Provider cleanup failed"
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Persisted bindings, keyed by area.
    pub fn to_document(&self) -> Result<BTreeMap<u32, ProviderBinding>> {
        self.providers
            .iter()
            .map(|(area, provider)| -> Result<(u32, ProviderBinding)> {
                Ok((
                    *area,
                    ProviderBinding {
                        provider_type: provider.provider_type().to_string(),
                        provider_data_type: provider.provider_data_type().to_string(),
                        provider_data: provider.provider_data()?,
                    },
                ))
            })
            .collect()
    }

    /// Rebuild providers from persisted bindings without running `init`.
    pub fn restore(&mut self, bindings: BTreeMap<u32, ProviderBinding>) -> Result<()> {
        for (area, binding) in bindings {
            let factory = self.registry.get(&binding.provider_type)?;
            let provider = factory.restore(
                self.context(area, binding.provider_type.clone()),
                &binding.provider_data_type,
                binding.provider_data,
            )?;
            self.providers.insert(area, provider);
        }
        Ok(())
    }
}

fn target_area(configuration: &ConfigurationHandle) -> u32 {
    configuration.read().target.read().area
}
