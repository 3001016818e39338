// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock provider for testing and local runs.
//!
//! Simulates a back-end in memory. Every call is appended to a journal shared
//! by all providers built from the same factory, so tests can assert on what
//! reached the back-end and in which order.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratum_core::{AddressRange, ConfigurationHandle, DeployableHandle, DeployableSpec};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::registry::ProviderFactory;
use super::traits::*;

/// Discriminator of [`MockProviderData`].
pub const MOCK_PROVIDER_DATA_TYPE: &str = "MockProviderData";

/// One call that reached a mock back-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCall {
    pub instance_id: String,
    pub area: u32,
    pub operation: String,
    /// Resource or configuration id, when the call has one.
    pub target: Option<String>,
}

/// Persisted private state of a mock provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockProviderData {
    pub initialized_at: Option<DateTime<Utc>>,
    /// Resource id to back-end id.
    pub computes: BTreeMap<String, String>,
    /// Resource id to release name.
    pub workloads: BTreeMap<String, String>,
    /// Applied configuration ids, oldest first.
    pub configurations: Vec<String>,
    /// Management addresses taken from the topology.
    pub reserved: Vec<AddressRange>,
}

type Journal = Arc<Mutex<Vec<ProviderCall>>>;

/// In-memory provider.
pub struct MockProvider {
    ctx: ProviderContext,
    data: MockProviderData,
    journal: Journal,
    fail_on: Option<&'static str>,
}

impl MockProvider {
    /// Private state, for inspection.
    pub fn data(&self) -> &MockProviderData {
        &self.data
    }

    async fn record(&self, operation: &'static str, target: Option<&str>) -> Result<()> {
        self.journal.lock().await.push(ProviderCall {
            instance_id: self.ctx.instance_id.clone(),
            area: self.ctx.area,
            operation: operation.to_string(),
            target: target.map(str::to_string),
        });
        if self.fail_on == Some(operation) {
            return Err(ProviderError::Other(format!(
                "injected failure in {}",
                operation
            )));
        }
        Ok(())
    }

    fn unsupported(&self, operation: &'static str, resource_type: &str) -> ProviderError {
        ProviderError::Unsupported {
            provider_type: self.ctx.kind.clone(),
            operation,
            resource_type: resource_type.to_string(),
        }
    }
}

fn resource_id(resource: &DeployableHandle) -> Result<String> {
    resource
        .read()
        .id
        .clone()
        .ok_or_else(|| ProviderError::UnknownResource("<unregistered>".to_string()))
}

fn configuration_ids(configuration: &ConfigurationHandle) -> Result<(String, String)> {
    let configuration = configuration.read();
    let id = configuration
        .id
        .clone()
        .ok_or_else(|| ProviderError::UnknownResource("<unregistered>".to_string()))?;
    let target_id = configuration
        .target
        .read()
        .id
        .clone()
        .ok_or_else(|| ProviderError::UnknownResource("<unregistered>".to_string()))?;
    Ok((id, target_id))
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[async_trait]
impl Provider for MockProvider {
    fn provider_type(&self) -> &str {
        &self.ctx.kind
    }

    fn provider_data_type(&self) -> &'static str {
        MOCK_PROVIDER_DATA_TYPE
    }

    fn provider_data(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.data)?)
    }

    async fn init(&mut self) -> Result<()> {
        self.record("init", None).await?;
        self.data.initialized_at = Some(Utc::now());
        Ok(())
    }

    async fn create_compute(&mut self, resource: &DeployableHandle) -> Result<()> {
        let id = resource_id(resource)?;
        self.record("create_compute", Some(&id)).await?;

        let management_network = {
            let resource = resource.read();
            match &resource.spec {
                DeployableSpec::Vm(vm) => vm.management_network.clone(),
                DeployableSpec::Device(_) => None,
                DeployableSpec::HelmChart(_) => {
                    return Err(self.unsupported("create_compute", resource.spec.type_name()));
                }
            }
        };

        let address = match management_network {
            Some(network) => {
                let range = self
                    .ctx
                    .topology
                    .reserve_range(&network, 1, &self.ctx.instance_id)
                    .await?;
                self.data.reserved.push(range);
                Some(range.start)
            }
            None => None,
        };

        let backend_id = format!("{}-{}", self.ctx.kind, short_id());
        {
            let mut resource = resource.write();
            match &mut resource.spec {
                DeployableSpec::Vm(vm) => {
                    vm.backend_id = Some(backend_id.clone());
                    vm.management_address = address;
                }
                DeployableSpec::Device(device) => {
                    if device.management_address.is_none() {
                        device.management_address = address;
                    }
                }
                DeployableSpec::HelmChart(_) => {}
            }
        }
        self.data.computes.insert(id, backend_id);
        Ok(())
    }

    async fn configure_compute(&mut self, configuration: &ConfigurationHandle) -> Result<()> {
        let (id, target_id) = configuration_ids(configuration)?;
        self.record("configure_compute", Some(&id)).await?;
        if !self.data.computes.contains_key(&target_id) {
            return Err(ProviderError::UnknownResource(target_id));
        }
        self.data.configurations.push(id);
        Ok(())
    }

    async fn destroy_compute(&mut self, resource: &DeployableHandle) -> Result<()> {
        let id = resource_id(resource)?;
        self.record("destroy_compute", Some(&id)).await?;
        self.data
            .computes
            .remove(&id)
            .map(|_| ())
            .ok_or(ProviderError::UnknownResource(id))
    }

    async fn install_workload(&mut self, resource: &DeployableHandle) -> Result<()> {
        let id = resource_id(resource)?;
        self.record("install_workload", Some(&id)).await?;

        let release = {
            let mut resource = resource.write();
            let name = resource.name.clone();
            let type_name = resource.spec.type_name();
            match &mut resource.spec {
                DeployableSpec::HelmChart(chart) => {
                    let release = format!("{}-{}", name, short_id());
                    chart.release = Some(release.clone());
                    release
                }
                _ => return Err(self.unsupported("install_workload", type_name)),
            }
        };
        self.data.workloads.insert(id, release);
        Ok(())
    }

    async fn update_workload_values(&mut self, configuration: &ConfigurationHandle) -> Result<()> {
        let (id, target_id) = configuration_ids(configuration)?;
        self.record("update_workload_values", Some(&id)).await?;
        if !self.data.workloads.contains_key(&target_id) {
            return Err(ProviderError::UnknownResource(target_id));
        }
        self.data.configurations.push(id);
        Ok(())
    }

    async fn uninstall_workload(&mut self, resource: &DeployableHandle) -> Result<()> {
        let id = resource_id(resource)?;
        self.record("uninstall_workload", Some(&id)).await?;
        self.data
            .workloads
            .remove(&id)
            .map(|_| ())
            .ok_or(ProviderError::UnknownResource(id))
    }

    async fn final_cleanup(&mut self) -> Result<()> {
        self.record("final_cleanup", None).await?;
        self.ctx
            .topology
            .release_ranges(&self.ctx.instance_id)
            .await?;
        self.data.reserved.clear();
        self.data.computes.clear();
        self.data.workloads.clear();
        Ok(())
    }
}

/// Factory for [`MockProvider`]s sharing one journal.
#[derive(Default)]
pub struct MockProviderFactory {
    journal: Journal,
    fail_on: Option<&'static str>,
}

impl MockProviderFactory {
    /// Factory whose providers always succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose providers fail every call to `operation`.
    pub fn failing_on(operation: &'static str) -> Self {
        Self {
            journal: Journal::default(),
            fail_on: Some(operation),
        }
    }

    /// Every call made so far, oldest first.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.journal.lock().await.clone()
    }

    /// Operation names of the calls made for `instance_id`.
    pub async fn operations_for(&self, instance_id: &str) -> Vec<String> {
        self.journal
            .lock()
            .await
            .iter()
            .filter(|c| c.instance_id == instance_id)
            .map(|c| c.operation.clone())
            .collect()
    }

    fn build(&self, ctx: ProviderContext, data: MockProviderData) -> MockProvider {
        MockProvider {
            ctx,
            data,
            journal: self.journal.clone(),
            fail_on: self.fail_on,
        }
    }
}

impl ProviderFactory for MockProviderFactory {
    fn create(&self, ctx: ProviderContext) -> Box<dyn Provider> {
        Box::new(self.build(ctx, MockProviderData::default()))
    }

    fn restore(
        &self,
        ctx: ProviderContext,
        data_type: &str,
        data: Value,
    ) -> Result<Box<dyn Provider>> {
        if data_type != MOCK_PROVIDER_DATA_TYPE {
            return Err(ProviderError::Other(format!(
                "cannot restore mock provider from {}",
                data_type
            )));
        }
        let data: MockProviderData = serde_json::from_value(data)?;
        Ok(Box::new(self.build(ctx, data)))
    }
}
