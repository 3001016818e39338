// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stratum Engine - Instance Lifecycle Management
//!
//! This crate drives orchestrated instances through their lifecycle. Each
//! instance is created from a registered [`Blueprint`], owns a set of
//! resources, talks to back-ends through one provider per area, and may
//! own child instances.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            EngineRuntime                             │
//! │  ┌──────────────┐    ┌─────────────────┐    ┌────────────────────┐   │
//! │  │ TaskExecutor │───►│ InstanceManager │───►│ Instance (locked)  │   │
//! │  │  (workers)   │    │ create/update/  │    │  Blueprint + state │   │
//! │  └──────────────┘    │ delete/restore  │    │  ResourceRegistry  │   │
//! │                      └────────┬────────┘    │  ProviderAggregator│   │
//! │                               │             └─────────┬──────────┘   │
//! └───────────────────────────────┼───────────────────────┼──────────────┘
//!                                 ▼                       ▼
//!                     ┌──────────────────────┐   ┌──────────────────┐
//!                     │ stratum-core         │   │ Providers        │
//!                     │ codec, topology,     │   │ (one per area)   │
//!                     │ allocator, store     │   └──────────────────┘
//!                     └──────────────────────┘
//! ```
//!
//! # Instance Status State Machine
//!
//! ```text
//!   create ─► DEPLOYING ──► IDLE ◄──────────────┐
//!                  │          │ update          │
//!                  │          ▼                 │
//!                  │    RUNNING_DAY2_OP ────────┤
//!                  │          │                 │
//!                  └────►   ERROR  ◄────────────┘
//!                             │ delete (also from IDLE)
//!                             ▼
//!                        DESTROYING ──► removed
//! ```
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `STRATUM_DATABASE_URL` | No | - | SQLite URL or file path; in-memory store when unset |
//! | `STRATUM_WORKERS` | No | `4` | Task executor workers |
//! | `STRATUM_RESERVED_HEAD` | No | `10` | Addresses skipped at the start of every prefix |
//!
//! # Modules
//!
//! - [`blueprint`]: Blueprint trait and registry
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types
//! - [`instance`]: Instance data, status and blueprint context
//! - [`manager`]: Lifecycle operations and locking
//! - [`provider`]: Provider trait, registry, per-area dispatch and the mock back-end
//! - [`runtime`]: Embeddable runtime
//! - [`task_executor`]: Worker pool for queued operations

pub mod blueprint;
pub mod config;
pub mod error;
pub mod instance;
pub mod manager;
pub mod provider;
pub mod runtime;
pub mod task_executor;

pub use blueprint::{Blueprint, BlueprintRegistry};
pub use config::Config;
pub use error::{Error, Result};
pub use instance::{InstanceContext, InstanceStatus, InstanceSummary};
pub use manager::InstanceManager;
pub use runtime::EngineRuntime;
pub use task_executor::{TaskExecutor, TaskState, TaskStatus};
