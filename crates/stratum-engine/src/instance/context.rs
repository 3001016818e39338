// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! What a running blueprint sees of its instance and the engine.

use std::sync::Arc;

use serde_json::Value;
use stratum_core::{AddressRange, Resource, ResourceRegistry, Topology};
use tracing::debug;

use super::InstanceCore;
use crate::error::{Error, Result};
use crate::manager::InstanceManager;
use crate::provider::ProviderAggregator;

/// Handed to blueprint methods while the instance lock is held.
///
/// Calls into children go through the manager and lock only the child, so
/// a parent can drive its children while it is itself mid-operation.
pub struct InstanceContext<'a> {
    core: &'a mut InstanceCore,
    manager: InstanceManager,
}

impl<'a> InstanceContext<'a> {
    pub(crate) fn new(core: &'a mut InstanceCore, manager: InstanceManager) -> Self {
        Self { core, manager }
    }

    pub fn instance_id(&self) -> &str {
        self.core.id()
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.core.parent_id()
    }

    pub fn core(&self) -> &InstanceCore {
        &*self.core
    }

    pub fn resources(&self) -> &ResourceRegistry {
        self.core.resources()
    }

    pub async fn register_resource(&mut self, resource: impl Into<Resource>) -> Result<String> {
        self.core.register_resource(resource.into()).await
    }

    pub fn deregister_resource(&mut self, resource: impl Into<Resource>) -> Result<()> {
        self.core.deregister_resource(&resource.into())
    }

    pub fn providers(&mut self) -> &mut ProviderAggregator {
        self.core.providers()
    }

    pub fn topology(&self) -> Arc<Topology> {
        self.manager.topology().clone()
    }

    /// Reserve `length` addresses on `network`, owned by this instance.
    ///
    /// Released together with the instance's other reservations on delete.
    pub async fn reserve_range(&self, network: &str, length: u32) -> Result<AddressRange> {
        let range = self
            .manager
            .topology()
            .reserve_range(network, length, self.core.id())
            .await?;
        debug!(instance_id = %self.core.id(), network, %range, "Address range reserved");
        Ok(range)
    }

    /// Create a child instance of `blueprint_type`.
    ///
    /// The child is registered on this instance even when its create step
    /// fails, since it exists in `Error` and must be deleted with us.
    pub async fn create_child(&mut self, blueprint_type: &str, message: Value) -> Result<String> {
        let outcome = self
            .manager
            .create_for_parent(blueprint_type, message, self.core.id())
            .await?;
        self.core.register_child(&outcome.id)?;
        outcome.result.map(|_| outcome.id)
    }

    /// Run `operation` on one of our children.
    pub async fn call_child(
        &mut self,
        child_id: &str,
        operation: &str,
        message: Value,
    ) -> Result<Value> {
        if !self.core.child_ids().contains(child_id) {
            return Err(Error::ChildNotFound {
                parent: self.core.id().to_string(),
                child: child_id.to_string(),
            });
        }
        self.manager.update(child_id, operation, message).await
    }

    /// Delete one of our children, cascading to its own children.
    pub async fn delete_child(&mut self, child_id: &str) -> Result<()> {
        if !self.core.child_ids().contains(child_id) {
            return Err(Error::ChildNotFound {
                parent: self.core.id().to_string(),
                child: child_id.to_string(),
            });
        }
        self.manager.delete_detached(child_id).await?;
        self.core.deregister_child(child_id)
    }

    /// Run `operation` on an unrelated instance.
    pub async fn call_instance(
        &self,
        instance_id: &str,
        operation: &str,
        message: Value,
    ) -> Result<Value> {
        if instance_id == self.core.id() {
            return Err(Error::operation(format!(
                "instance {} cannot call itself",
                instance_id
            )));
        }
        self.manager.update(instance_id, operation, message).await
    }
}
