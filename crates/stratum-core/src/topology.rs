// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Site topology: compute back-ends, clusters, networks and devices.
//!
//! Every mutating method runs under one process-wide lock. Mutations are
//! applied to a copy of the state, persisted, and only then committed, so a
//! failed write leaves the in-memory view untouched and two callers can
//! never compute overlapping address ranges from the same snapshot.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::allocator::{AddressRange, AddressRangeAllocator};
use crate::error::{CoreError, Result};
use crate::persistence::Persistence;

/// Back-end kind reported for areas served by a Kubernetes cluster.
pub const KUBERNETES_KIND: &str = "kubernetes";

/// A compute back-end serving one area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vim {
    pub name: String,
    pub area: u32,
    /// Back-end kind used to pick a provider (`openstack`, `proxmox`, `mock`).
    pub vim_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub networks: Vec<String>,
}

/// A Kubernetes cluster serving one area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesCluster {
    pub name: String,
    pub area: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// A range handed out to an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub range: AddressRange,
    /// Owning instance id.
    pub owner: String,
}

/// An IPv4 network and the ranges already carved out of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub name: String,
    pub prefix: Ipv4Net,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

impl Network {
    /// Network without reservations.
    pub fn new(name: impl Into<String>, prefix: Ipv4Net) -> Self {
        Self {
            name: name.into(),
            prefix,
            gateway: None,
            reservations: Vec::new(),
        }
    }
}

/// A physical router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub name: String,
    pub area: u32,
    pub management_address: Ipv4Addr,
}

/// A power distribution unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pdu {
    pub name: String,
    pub area: u32,
    pub management_address: Ipv4Addr,
    #[serde(default)]
    pub outlets: u32,
}

/// Serializable topology snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyState {
    #[serde(default)]
    pub vims: BTreeMap<String, Vim>,
    #[serde(default)]
    pub kubernetes: BTreeMap<String, KubernetesCluster>,
    #[serde(default)]
    pub networks: BTreeMap<String, Network>,
    #[serde(default)]
    pub routers: BTreeMap<String, Router>,
    #[serde(default)]
    pub pdus: BTreeMap<String, Pdu>,
}

impl TopologyState {
    /// Whether any site entry lives in `area`.
    pub fn has_area(&self, area: u32) -> bool {
        self.vims.values().any(|v| v.area == area)
            || self.kubernetes.values().any(|k| k.area == area)
            || self.routers.values().any(|r| r.area == area)
            || self.pdus.values().any(|p| p.area == area)
    }

    /// Back-end kind of `area`: the VIM type, or `kubernetes`.
    pub fn backend_kind(&self, area: u32) -> Option<String> {
        if let Some(vim) = self.vims.values().find(|v| v.area == area) {
            return Some(vim.vim_type.clone());
        }
        self.kubernetes
            .values()
            .any(|k| k.area == area)
            .then(|| KUBERNETES_KIND.to_string())
    }
}

fn insert_unique<T>(
    map: &mut BTreeMap<String, T>,
    kind: &'static str,
    name: String,
    value: T,
) -> Result<()> {
    if map.contains_key(&name) {
        return Err(CoreError::TopologyConflict { kind, name });
    }
    map.insert(name, value);
    Ok(())
}

fn remove_existing<T>(map: &mut BTreeMap<String, T>, kind: &'static str, name: &str) -> Result<T> {
    map.remove(name).ok_or_else(|| CoreError::TopologyEntryNotFound {
        kind,
        name: name.to_string(),
    })
}

/// Process-wide topology registry.
pub struct Topology {
    state: Mutex<TopologyState>,
    persistence: Arc<dyn Persistence>,
    allocator: AddressRangeAllocator,
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("allocator", &self.allocator)
            .finish_non_exhaustive()
    }
}

impl Topology {
    /// Load the persisted topology, or start empty.
    pub async fn load(
        persistence: Arc<dyn Persistence>,
        allocator: AddressRangeAllocator,
    ) -> Result<Self> {
        let state = match persistence.load_topology().await? {
            Some(document) => serde_json::from_value(document)?,
            None => TopologyState::default(),
        };
        info!(
            vims = state.vims.len(),
            networks = state.networks.len(),
            "Topology loaded"
        );
        Ok(Self {
            state: Mutex::new(state),
            persistence,
            allocator,
        })
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> TopologyState {
        self.state.lock().await.clone()
    }

    /// Whether `area` resolves to a known site.
    pub async fn has_area(&self, area: u32) -> bool {
        self.state.lock().await.has_area(area)
    }

    /// Back-end kind serving `area`.
    pub async fn backend_kind(&self, area: u32) -> Result<String> {
        self.state
            .lock()
            .await
            .backend_kind(area)
            .ok_or(CoreError::UnknownArea { area })
    }

    /// Apply `f` to a copy of the state, persist it, then commit.
    async fn mutate<R>(&self, f: impl FnOnce(&mut TopologyState) -> Result<R>) -> Result<R> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persistence
            .save_topology(&serde_json::to_value(&next)?)
            .await?;
        *guard = next;
        Ok(out)
    }

    pub async fn add_vim(&self, vim: Vim) -> Result<()> {
        debug!(name = %vim.name, area = vim.area, "Adding VIM");
        self.mutate(|s| insert_unique(&mut s.vims, "vim", vim.name.clone(), vim))
            .await
    }

    pub async fn remove_vim(&self, name: &str) -> Result<Vim> {
        self.mutate(|s| remove_existing(&mut s.vims, "vim", name))
            .await
    }

    pub async fn add_kubernetes(&self, cluster: KubernetesCluster) -> Result<()> {
        debug!(name = %cluster.name, area = cluster.area, "Adding Kubernetes cluster");
        self.mutate(|s| {
            insert_unique(&mut s.kubernetes, "kubernetes", cluster.name.clone(), cluster)
        })
        .await
    }

    pub async fn remove_kubernetes(&self, name: &str) -> Result<KubernetesCluster> {
        self.mutate(|s| remove_existing(&mut s.kubernetes, "kubernetes", name))
            .await
    }

    /// Add a network. Reservations it already carries must fit its prefix.
    pub async fn add_network(&self, network: Network) -> Result<()> {
        let ranges: Vec<_> = network.reservations.iter().map(|r| r.range).collect();
        self.allocator.free_ranges(network.prefix, &ranges)?;
        debug!(name = %network.name, prefix = %network.prefix, "Adding network");
        self.mutate(|s| insert_unique(&mut s.networks, "network", network.name.clone(), network))
            .await
    }

    pub async fn remove_network(&self, name: &str) -> Result<Network> {
        self.mutate(|s| remove_existing(&mut s.networks, "network", name))
            .await
    }

    pub async fn add_router(&self, router: Router) -> Result<()> {
        self.mutate(|s| insert_unique(&mut s.routers, "router", router.name.clone(), router))
            .await
    }

    pub async fn remove_router(&self, name: &str) -> Result<Router> {
        self.mutate(|s| remove_existing(&mut s.routers, "router", name))
            .await
    }

    pub async fn add_pdu(&self, pdu: Pdu) -> Result<()> {
        self.mutate(|s| insert_unique(&mut s.pdus, "pdu", pdu.name.clone(), pdu))
            .await
    }

    pub async fn remove_pdu(&self, name: &str) -> Result<Pdu> {
        self.mutate(|s| remove_existing(&mut s.pdus, "pdu", name))
            .await
    }

    /// Reserve `length` addresses of `network` for `owner`.
    ///
    /// The reservation is persisted before the lock is released. A failed
    /// allocation reserves nothing.
    pub async fn reserve_range(&self, network: &str, length: u32, owner: &str) -> Result<AddressRange> {
        let allocator = self.allocator;
        let range = self
            .mutate(|s| {
                let net = s.networks.get_mut(network).ok_or_else(|| {
                    CoreError::TopologyEntryNotFound {
                        kind: "network",
                        name: network.to_string(),
                    }
                })?;
                let taken: Vec<_> = net.reservations.iter().map(|r| r.range).collect();
                let range = allocator.allocate(net.prefix, &taken, length)?;
                net.reservations.push(Reservation {
                    range,
                    owner: owner.to_string(),
                });
                Ok(range)
            })
            .await?;
        info!(network, owner, %range, "Reserved address range");
        Ok(range)
    }

    /// Release every range held by `owner`. Returns how many were released.
    pub async fn release_ranges(&self, owner: &str) -> Result<usize> {
        let released = self
            .mutate(|s| {
                let mut released = 0;
                for net in s.networks.values_mut() {
                    let before = net.reservations.len();
                    net.reservations.retain(|r| r.owner != owner);
                    released += before - net.reservations.len();
                }
                Ok(released)
            })
            .await?;
        if released > 0 {
            info!(owner, released, "Released address ranges");
        }
        Ok(released)
    }

    /// Ranges currently reserved in `network`.
    pub async fn reservations(&self, network: &str) -> Result<Vec<Reservation>> {
        self.state
            .lock()
            .await
            .networks
            .get(network)
            .map(|n| n.reservations.clone())
            .ok_or_else(|| CoreError::TopologyEntryNotFound {
                kind: "network",
                name: network.to_string(),
            })
    }
}
