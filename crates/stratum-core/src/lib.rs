// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stratum Core - resource graph and site model
//!
//! This crate holds the parts of the stratum control plane that do not
//! depend on blueprints or providers:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      stratum-engine                           │
//! │     (Instances, Providers, Lifecycle Manager, Task Pool)      │
//! └───────────────────────────────────────────────────────────────┘
//!                │                      │
//!                ▼                      ▼
//! ┌──────────────────────────┐  ┌──────────────────────────────┐
//! │  resource + codec        │  │  topology + allocator        │
//! │  Handles, registries,    │  │  VIMs, clusters, networks,   │
//! │  REF=<id> documents      │  │  address reservations        │
//! └──────────────────────────┘  └──────────────────────────────┘
//!                │                      │
//!                └──────────┬───────────┘
//!                           ▼
//!              ┌──────────────────────────┐
//!              │       persistence        │
//!              │  Memory / SQLite (sqlx)  │
//!              └──────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`resource`] | Shared resource handles, resource variants, registries |
//! | [`codec`] | `REF=<id>` encoding of resource graphs |
//! | [`allocator`] | Address range carving over an IPv4 prefix |
//! | [`topology`] | Process-wide site registry and address reservations |
//! | [`persistence`] | Document store abstraction and backends |
//! | [`error`] | [`CoreError`] and its stable error codes |

pub mod allocator;
pub mod codec;
pub mod error;
pub mod persistence;
pub mod resource;
pub mod topology;

pub use allocator::{AddressRange, AddressRangeAllocator, DEFAULT_RESERVED_HEAD};
pub use codec::ReferenceCodec;
pub use error::{CoreError, Result};
pub use persistence::{InstanceRecord, MemoryPersistence, Persistence, SqlitePersistence};
pub use resource::{
    ConfigurationHandle, ConfigurationResource, ConfigurationSpec, DeployableHandle,
    DeployableResource, DeployableSpec, DeviceSpec, Handle, HelmChartSpec, Resource,
    ResourceClass, ResourceRegistry, ResourceTypeRegistry, VmSpec,
};
pub use topology::{KubernetesCluster, Network, Pdu, Reservation, Router, Topology, Vim};
