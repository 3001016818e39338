// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle status.
//!
//! ```text
//!             create                 update                 delete
//!   (new) ──► Deploying ─┐   Idle ─► RunningDay2Op ─┐   Idle ─► Destroying ─► (removed)
//!                        │   Error ┘                │   Error ┘     │
//!                        ▼                          ▼               ▼
//!                   Idle | Error               Idle | Error       Error
//! ```
//!
//! `Error` is not terminal: update and delete may start from it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Detail recorded when a transient status is found on reload.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

/// Lifecycle status of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum InstanceStatus {
    Idle,
    Deploying,
    RunningDay2Op,
    Destroying,
    Error(String),
}

/// A mutating operation that moves an instance through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Update,
    Delete,
}

impl Operation {
    /// Short verb used in errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Status held while the operation runs.
    pub fn running_status(&self) -> InstanceStatus {
        match self {
            Operation::Update => InstanceStatus::RunningDay2Op,
            Operation::Delete => InstanceStatus::Destroying,
        }
    }
}

impl InstanceStatus {
    /// True while an operation is in flight.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Deploying | InstanceStatus::RunningDay2Op | InstanceStatus::Destroying
        )
    }

    /// Whether a new operation may start from this status.
    pub fn can_start(&self) -> bool {
        matches!(self, InstanceStatus::Idle | InstanceStatus::Error(_))
    }

    /// Status to use when the instance is loaded after a restart.
    pub fn after_restart(self) -> InstanceStatus {
        if self.is_transient() {
            InstanceStatus::Error(INTERRUPTED_BY_RESTART.to_string())
        } else {
            self
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Idle => write!(f, "idle"),
            InstanceStatus::Deploying => write!(f, "deploying"),
            InstanceStatus::RunningDay2Op => write!(f, "running_day2_op"),
            InstanceStatus::Destroying => write!(f, "destroying"),
            InstanceStatus::Error(detail) => write!(f, "error ({})", detail),
        }
    }
}
