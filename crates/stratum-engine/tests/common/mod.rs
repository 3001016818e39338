// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for stratum-engine integration tests.
//!
//! Provides a [`TestContext`] over a seeded topology and two blueprints:
//! `vnf` (one VM plus its configuration) and `service` (a helm release
//! plus `vnf` children).

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use stratum_core::{
    AddressRange, AddressRangeAllocator, ConfigurationHandle, ConfigurationResource,
    ConfigurationSpec, DeployableHandle, DeployableResource, DeployableSpec, HelmChartSpec,
    CoreError, InstanceRecord, KubernetesCluster, MemoryPersistence, Network, Persistence,
    ReferenceCodec, Topology, Vim, VmSpec,
};
use stratum_engine::blueprint::{Blueprint, BlueprintRegistry};
use stratum_engine::error::{Error, Result};
use stratum_engine::instance::InstanceContext;
use stratum_engine::manager::InstanceManager;
use stratum_engine::provider::{MockProviderFactory, ProviderRegistry};

pub const VIM_AREA: u32 = 1;
pub const K8S_AREA: u32 = 2;
pub const MGMT_NETWORK: &str = "mgmt";

/// Tracks how many `increment` operations run at the same time.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VnfState {
    pub vm: Option<DeployableHandle>,
    pub config: Option<ConfigurationHandle>,
    pub management: Option<AddressRange>,
    pub counter: u64,
    /// Held without being registered on the instance.
    #[serde(default)]
    pub stray: Option<DeployableHandle>,
}

/// One VM in the VIM area, configured by a playbook.
pub struct VnfBlueprint {
    pub gauge: Arc<Gauge>,
}

#[async_trait]
impl Blueprint for VnfBlueprint {
    const TYPE: &'static str = "vnf";
    const STATE_TYPE: &'static str = "VnfState";
    type State = VnfState;

    async fn create(
        &self,
        ctx: &mut InstanceContext<'_>,
        state: &mut VnfState,
        message: Value,
    ) -> Result<()> {
        if message["fail"].as_bool().unwrap_or(false) {
            return Err(Error::operation("create refused"));
        }
        let area = message["area"].as_u64().unwrap_or(VIM_AREA as u64) as u32;

        let vm = DeployableResource::new(
            area,
            "vnf-vm",
            DeployableSpec::Vm(VmSpec {
                image: "vnf:1.0".to_string(),
                cpus: 2,
                memory_mb: 2048,
                networks: vec![MGMT_NETWORK.to_string()],
                management_network: Some(MGMT_NETWORK.to_string()),
                management_address: None,
                backend_id: None,
            }),
        )
        .into_handle();
        ctx.register_resource(vm.clone()).await?;
        ctx.providers().create_compute(&vm).await?;

        let config = ConfigurationResource::new(
            &vm,
            ConfigurationSpec::Vm {
                playbook: "day0.yml".to_string(),
                variables: json!({"hostname": "vnf"}),
            },
        )
        .into_handle();
        ctx.register_resource(config.clone()).await?;
        ctx.providers().configure_compute(&config).await?;

        state.management = Some(ctx.reserve_range(MGMT_NETWORK, 2).await?);
        state.vm = Some(vm);
        state.config = Some(config);
        Ok(())
    }

    async fn run_operation(
        &self,
        ctx: &mut InstanceContext<'_>,
        state: &mut VnfState,
        operation: &str,
        message: Value,
    ) -> Result<Value> {
        match operation {
            "increment" => {
                self.gauge.enter();
                tokio::time::sleep(Duration::from_millis(20)).await;
                state.counter += 1;
                self.gauge.leave();
                Ok(json!(state.counter))
            }
            "reconfigure" => {
                let config = state
                    .config
                    .as_ref()
                    .ok_or_else(|| Error::operation("not configured"))?;
                if let ConfigurationSpec::Vm { playbook, .. } = &mut config.write().spec {
                    *playbook = message["playbook"].as_str().unwrap_or("day1.yml").to_string();
                }
                ctx.providers().configure_compute(config).await?;
                Ok(Value::Null)
            }
            "inspect" => {
                let shared = match (&state.vm, &state.config) {
                    (Some(vm), Some(config)) => config.read().target.ptr_eq(vm),
                    _ => false,
                };
                let registered = state
                    .vm
                    .as_ref()
                    .and_then(|vm| vm.read().id.clone())
                    .and_then(|id| ctx.resources().deployable(&id).cloned())
                    .zip(state.vm.as_ref())
                    .map(|(live, held)| live.ptr_eq(held))
                    .unwrap_or(false);
                Ok(json!({
                    "counter": state.counter,
                    "targetShared": shared,
                    "registryShared": registered,
                }))
            }
            "fail" => Err(Error::operation("requested failure")),
            "hold_unregistered" => {
                let stray = DeployableResource::new(
                    VIM_AREA,
                    "stray-vm",
                    DeployableSpec::Vm(VmSpec {
                        image: "stray:1.0".to_string(),
                        cpus: 1,
                        memory_mb: 512,
                        networks: vec![],
                        management_network: None,
                        management_address: None,
                        backend_id: None,
                    }),
                )
                .into_handle();
                stray.write().id = Some("stray-vm".to_string());
                state.stray = Some(stray);
                state.counter += 1;
                Ok(json!(state.counter))
            }
            other => Err(Error::UnknownOperation {
                blueprint: Self::TYPE.to_string(),
                operation: other.to_string(),
            }),
        }
    }

    async fn destroy(&self, ctx: &mut InstanceContext<'_>, state: &mut VnfState) -> Result<()> {
        if let Some(config) = state.config.take() {
            ctx.deregister_resource(config)?;
        }
        if let Some(vm) = state.vm.take() {
            ctx.providers().destroy_compute(&vm).await?;
            ctx.deregister_resource(vm)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServiceState {
    pub release: Option<DeployableHandle>,
    pub children: Vec<String>,
}

/// A helm release in the Kubernetes area plus `vnf` children.
pub struct ServiceBlueprint;

#[async_trait]
impl Blueprint for ServiceBlueprint {
    const TYPE: &'static str = "service";
    type State = ServiceState;

    async fn create(
        &self,
        ctx: &mut InstanceContext<'_>,
        state: &mut ServiceState,
        message: Value,
    ) -> Result<()> {
        let release = DeployableResource::new(
            K8S_AREA,
            "core",
            DeployableSpec::HelmChart(HelmChartSpec {
                chart: "charts/core".to_string(),
                version: Some("1.2.0".to_string()),
                namespace: "core".to_string(),
                values: json!({}),
                release: None,
            }),
        )
        .into_handle();
        ctx.register_resource(release.clone()).await?;
        ctx.providers().install_workload(&release).await?;
        state.release = Some(release);

        let children = message["children"].as_u64().unwrap_or(0);
        for _ in 0..children {
            let child = ctx.create_child("vnf", json!({"area": VIM_AREA})).await?;
            state.children.push(child);
        }
        Ok(())
    }

    async fn run_operation(
        &self,
        ctx: &mut InstanceContext<'_>,
        state: &mut ServiceState,
        operation: &str,
        _message: Value,
    ) -> Result<Value> {
        match operation {
            "increment_all" => {
                let mut results = Vec::new();
                for child in state.children.clone() {
                    results.push(ctx.call_child(&child, "increment", Value::Null).await?);
                }
                Ok(Value::Array(results))
            }
            "drop_child" => {
                let child = state
                    .children
                    .pop()
                    .ok_or_else(|| Error::operation("no children left"))?;
                ctx.delete_child(&child).await?;
                Ok(json!(child))
            }
            other => Err(Error::UnknownOperation {
                blueprint: Self::TYPE.to_string(),
                operation: other.to_string(),
            }),
        }
    }

    async fn destroy(&self, ctx: &mut InstanceContext<'_>, state: &mut ServiceState) -> Result<()> {
        state.children.clear();
        if let Some(release) = state.release.take() {
            ctx.providers().uninstall_workload(&release).await?;
            ctx.deregister_resource(release)?;
        }
        Ok(())
    }
}

/// In-memory store whose writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryPersistence,
    fail_saves: AtomicBool,
    fail_next_delete: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every instance save until called again with `false`.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Fail the next instance delete only.
    pub fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }

    fn disk_full(operation: &str) -> CoreError {
        CoreError::DatabaseError {
            operation: operation.to_string(),
            details: "disk full".to_string(),
        }
    }
}

#[async_trait]
impl Persistence for FlakyStore {
    async fn save_instance(
        &self,
        instance_id: &str,
        instance_type: &str,
        document: &Value,
    ) -> std::result::Result<(), CoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Self::disk_full("save_instance"));
        }
        self.inner
            .save_instance(instance_id, instance_type, document)
            .await
    }

    async fn load_instance(
        &self,
        instance_id: &str,
    ) -> std::result::Result<Option<InstanceRecord>, CoreError> {
        self.inner.load_instance(instance_id).await
    }

    async fn delete_instance(&self, instance_id: &str) -> std::result::Result<bool, CoreError> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(Self::disk_full("delete_instance"));
        }
        self.inner.delete_instance(instance_id).await
    }

    async fn list_instance_ids(&self) -> std::result::Result<Vec<String>, CoreError> {
        self.inner.list_instance_ids().await
    }

    async fn save_topology(&self, document: &Value) -> std::result::Result<(), CoreError> {
        self.inner.save_topology(document).await
    }

    async fn load_topology(&self) -> std::result::Result<Option<Value>, CoreError> {
        self.inner.load_topology().await
    }
}

/// Engine wired over a seeded topology.
pub struct TestContext {
    pub persistence: Arc<dyn Persistence>,
    pub providers: Arc<MockProviderFactory>,
    pub gauge: Arc<Gauge>,
    pub topology: Arc<Topology>,
    pub manager: InstanceManager,
}

impl TestContext {
    /// In-memory store with a fresh topology.
    pub async fn new() -> Self {
        Self::with_providers(
            Arc::new(MemoryPersistence::new()),
            Arc::new(MockProviderFactory::new()),
        )
        .await
    }

    /// Seed the topology if the store has none, then build the engine.
    pub async fn with_providers(
        persistence: Arc<dyn Persistence>,
        providers: Arc<MockProviderFactory>,
    ) -> Self {
        let fresh = persistence
            .load_topology()
            .await
            .expect("Failed to read topology")
            .is_none();
        let ctx = Self::build(persistence, providers).await;
        if fresh {
            ctx.seed_topology().await;
        }
        ctx
    }

    /// A second engine over the same store, as after a process restart.
    pub async fn restart(&self) -> Self {
        let ctx = Self::build(self.persistence.clone(), self.providers.clone()).await;
        ctx.manager
            .restore_all()
            .await
            .expect("Failed to restore instances");
        ctx
    }

    async fn build(persistence: Arc<dyn Persistence>, providers: Arc<MockProviderFactory>) -> Self {
        let topology = Arc::new(
            Topology::load(persistence.clone(), AddressRangeAllocator::default())
                .await
                .expect("Failed to load topology"),
        );
        let gauge = Arc::new(Gauge::default());
        let blueprints = BlueprintRegistry::new()
            .with(VnfBlueprint {
                gauge: gauge.clone(),
            })
            .with(ServiceBlueprint);
        let registry = ProviderRegistry::new()
            .with("mock", providers.clone())
            .with("kubernetes", providers.clone());
        let manager = InstanceManager::new(
            persistence.clone(),
            topology.clone(),
            Arc::new(blueprints),
            Arc::new(registry),
            ReferenceCodec::builtin(),
        );
        Self {
            persistence,
            providers,
            gauge,
            topology,
            manager,
        }
    }

    async fn seed_topology(&self) {
        self.topology
            .add_vim(Vim {
                name: "vim-1".to_string(),
                area: VIM_AREA,
                vim_type: "mock".to_string(),
                url: None,
                networks: vec![MGMT_NETWORK.to_string()],
            })
            .await
            .expect("Failed to add VIM");
        self.topology
            .add_kubernetes(KubernetesCluster {
                name: "k8s-1".to_string(),
                area: K8S_AREA,
                endpoint: None,
            })
            .await
            .expect("Failed to add cluster");
        self.topology
            .add_network(Network::new(
                MGMT_NETWORK,
                "10.0.0.0/24".parse().expect("valid prefix"),
            ))
            .await
            .expect("Failed to add network");
    }

    /// Ranges currently held on the management network.
    pub async fn reserved(&self) -> usize {
        self.topology
            .reservations(MGMT_NETWORK)
            .await
            .expect("Failed to list reservations")
            .len()
    }
}
