// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestrated instances.
//!
//! An [`Instance`] pairs the engine-owned data ([`InstanceCore`]: status,
//! resources, providers, parent/child links) with the blueprint bound to
//! its typed state. The two halves are separate fields so a running
//! blueprint can be handed a mutable view of the core while it mutates its
//! own state.
//!
//! # Persisted document
//!
//! ```json
//! {
//!   "id": "…", "type": "…", "status": {"state": "idle"},
//!   "parentId": null, "childIds": [],
//!   "registeredResources": {"<id>": {"type": "VmResource", "value": {…}}},
//!   "stateType": "…", "state": {…},
//!   "providers": {"1": {"providerType": "…", "providerDataType": "…", "providerData": {…}}},
//!   "protected": false, "corrupted": false,
//!   "createdAt": "…", "updatedAt": "…"
//! }
//! ```

mod context;
pub mod status;

pub use context::InstanceContext;
pub use status::{INTERRUPTED_BY_RESTART, InstanceStatus, Operation};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratum_core::{
    CoreError, ReferenceCodec, Resource, ResourceClass, ResourceRegistry, Topology,
};
use tracing::error;

use crate::blueprint::{BlueprintRegistry, BoundBlueprint};
use crate::error::{Error, Result};
use crate::provider::{ProviderAggregator, ProviderBinding, ProviderRegistry};

/// A registered resource as stored in the instance document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub value: Value,
}

/// Persisted instance document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default)]
    pub registered_resources: BTreeMap<String, StoredResource>,
    pub state_type: String,
    #[serde(default)]
    pub state: Value,
    #[serde(default)]
    pub providers: BTreeMap<u32, ProviderBinding>,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub corrupted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only view of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub instance_type: String,
    pub status: InstanceStatus,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub resource_count: usize,
    pub provider_areas: Vec<u32>,
    pub protected: bool,
    pub corrupted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Collaborators needed to build or rebuild an instance.
#[derive(Clone)]
pub(crate) struct InstanceDeps {
    pub topology: Arc<Topology>,
    pub blueprints: Arc<BlueprintRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub codec: ReferenceCodec,
}

/// Engine-owned part of an instance.
#[derive(Debug)]
pub struct InstanceCore {
    id: String,
    instance_type: String,
    status: InstanceStatus,
    parent_id: Option<String>,
    child_ids: BTreeSet<String>,
    resources: ResourceRegistry,
    providers: ProviderAggregator,
    protected: bool,
    corrupted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    topology: Arc<Topology>,
    pub(crate) removed: bool,
}

impl InstanceCore {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instance_type(&self) -> &str {
        &self.instance_type
    }

    pub fn status(&self) -> &InstanceStatus {
        &self.status
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn child_ids(&self) -> &BTreeSet<String> {
        &self.child_ids
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn providers(&mut self) -> &mut ProviderAggregator {
        &mut self.providers
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    pub(crate) fn set_protected(&mut self, protected: bool) {
        self.protected = protected;
    }

    pub(crate) fn mark_corrupted(&mut self) {
        self.corrupted = true;
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Register a resource, assigning an id if it has none.
    ///
    /// Deployables must live in an area the topology knows.
    pub async fn register_resource(&mut self, resource: Resource) -> Result<String> {
        if let Resource::Deployable(handle) = &resource {
            let area = handle.read().area;
            if !self.topology.has_area(area).await {
                return Err(CoreError::UnknownArea { area }.into());
            }
        }
        self.resources.register(resource).map_err(Error::Core)
    }

    /// Remove a resource from the registry.
    ///
    /// Registry violations, a missing id included, surface as
    /// [`Error::Core`] rather than as codec failures.
    pub fn deregister_resource(&mut self, resource: &Resource) -> Result<()> {
        self.resources.deregister(resource).map_err(Error::Core)?;
        Ok(())
    }

    /// Record `child_id` as a child.
    pub fn register_child(&mut self, child_id: &str) -> Result<()> {
        if !self.child_ids.insert(child_id.to_string()) {
            return Err(Error::AlreadyChild {
                parent: self.id.clone(),
                child: child_id.to_string(),
            });
        }
        Ok(())
    }

    /// Forget `child_id`.
    pub fn deregister_child(&mut self, child_id: &str) -> Result<()> {
        if !self.child_ids.remove(child_id) {
            return Err(Error::ChildNotFound {
                parent: self.id.clone(),
                child: child_id.to_string(),
            });
        }
        Ok(())
    }

    /// Enter the running status of `operation`.
    pub(crate) fn begin(&mut self, operation: Operation) -> Result<()> {
        if !self.status.can_start() {
            return Err(Error::InvalidTransition {
                instance_id: self.id.clone(),
                operation: operation.as_str(),
                status: self.status.to_string(),
            });
        }
        self.status = operation.running_status();
        Ok(())
    }

    /// Leave the running status according to the outcome.
    pub(crate) fn finish<T>(&mut self, outcome: &Result<T>) {
        self.status = match outcome {
            Ok(_) => InstanceStatus::Idle,
            Err(e) => InstanceStatus::Error(e.to_string()),
        };
    }

    pub(crate) fn fail(&mut self, detail: String) {
        self.status = InstanceStatus::Error(detail);
    }
}

/// An instance: engine data plus the bound blueprint.
pub struct Instance {
    pub(crate) core: InstanceCore,
    pub(crate) blueprint: Box<dyn BoundBlueprint>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("core", &self.core)
            .field("state_type", &self.blueprint.state_type())
            .finish()
    }
}

impl Instance {
    /// New instance in `Deploying`, with empty registries.
    pub(crate) fn new(
        id: String,
        blueprint: Box<dyn BoundBlueprint>,
        parent_id: Option<String>,
        deps: &InstanceDeps,
    ) -> Self {
        let now = Utc::now();
        let providers =
            ProviderAggregator::new(id.clone(), deps.topology.clone(), deps.providers.clone());
        Self {
            core: InstanceCore {
                instance_type: blueprint.blueprint_type().to_string(),
                id,
                status: InstanceStatus::Deploying,
                parent_id,
                child_ids: BTreeSet::new(),
                resources: ResourceRegistry::new(),
                providers,
                protected: false,
                corrupted: false,
                created_at: now,
                updated_at: now,
                topology: deps.topology.clone(),
                removed: false,
            },
            blueprint,
        }
    }

    pub fn core(&self) -> &InstanceCore {
        &self.core
    }

    /// Read-only view.
    pub fn summary(&self) -> InstanceSummary {
        let core = &self.core;
        InstanceSummary {
            id: core.id.clone(),
            instance_type: core.instance_type.clone(),
            status: core.status.clone(),
            parent_id: core.parent_id.clone(),
            child_ids: core.child_ids.iter().cloned().collect(),
            resource_count: core.resources.len(),
            provider_areas: core.providers.areas(),
            protected: core.protected,
            corrupted: core.corrupted,
            created_at: core.created_at,
            updated_at: core.updated_at,
        }
    }

    /// Encode the instance into its persisted document.
    pub fn to_document(&self, codec: &ReferenceCodec) -> Result<Value> {
        let core = &self.core;
        let mut registered = BTreeMap::new();
        for (id, resource) in core.resources.iter() {
            if resource.id().as_deref() != Some(id.as_str()) {
                return Err(CoreError::Serialization {
                    details: format!("resource registered as '{}' changed its id", id),
                }
                .into());
            }
            registered.insert(
                id.clone(),
                StoredResource {
                    resource_type: resource.resource_type().to_string(),
                    value: codec.encode_resource(resource, &core.resources)?,
                },
            );
        }

        let document = InstanceDocument {
            id: core.id.clone(),
            instance_type: core.instance_type.clone(),
            status: core.status.clone(),
            parent_id: core.parent_id.clone(),
            child_ids: core.child_ids.iter().cloned().collect(),
            registered_resources: registered,
            state_type: self.blueprint.state_type().to_string(),
            state: self.blueprint.encode_state(codec, &core.resources)?,
            providers: core.providers.to_document()?,
            protected: core.protected,
            corrupted: core.corrupted,
            created_at: core.created_at,
            updated_at: core.updated_at,
        };
        Ok(serde_json::to_value(document)?)
    }

    /// Rebuild an instance from its persisted document.
    ///
    /// Providers come back from their bindings without `init`. Deployables
    /// are hydrated before configurations, and the state last. A resource
    /// graph that cannot be rebuilt marks the instance corrupted instead of
    /// failing the load. Returns whether the stored status was transient.
    pub(crate) fn from_document(document: Value, deps: &InstanceDeps) -> Result<(Self, bool)> {
        let document: InstanceDocument = serde_json::from_value(document)?;
        let blueprint = deps.blueprints.instantiate(&document.instance_type)?;

        let mut providers = ProviderAggregator::new(
            document.id.clone(),
            deps.topology.clone(),
            deps.providers.clone(),
        );
        providers.restore(document.providers)?;

        let interrupted = document.status.is_transient();
        let mut instance = Instance {
            core: InstanceCore {
                id: document.id,
                instance_type: document.instance_type,
                status: document.status.after_restart(),
                parent_id: document.parent_id,
                child_ids: document.child_ids.into_iter().collect(),
                resources: ResourceRegistry::new(),
                providers,
                protected: document.protected,
                corrupted: document.corrupted,
                created_at: document.created_at,
                updated_at: document.updated_at,
                topology: deps.topology.clone(),
                removed: false,
            },
            blueprint,
        };

        if let Err(e) = instance.hydrate(
            &deps.codec,
            &document.registered_resources,
            &document.state_type,
            &document.state,
        ) {
            error!(
                instance_id = %instance.core.id,
                error = %e,
                "Instance could not be rehydrated, marking corrupted"
            );
            instance.core.corrupted = true;
        }

        Ok((instance, interrupted))
    }

    fn hydrate(
        &mut self,
        codec: &ReferenceCodec,
        resources: &BTreeMap<String, StoredResource>,
        state_type: &str,
        state: &Value,
    ) -> stratum_core::Result<()> {
        for stored in resources.values() {
            if codec.types().class_of(&stored.resource_type).is_none() {
                return Err(CoreError::UnknownResourceType {
                    resource_type: stored.resource_type.clone(),
                });
            }
        }

        for class in [ResourceClass::Deployable, ResourceClass::Configuration] {
            for (id, stored) in resources {
                if codec.types().class_of(&stored.resource_type) != Some(class) {
                    continue;
                }
                let resource =
                    codec.decode_resource(&stored.resource_type, &stored.value, &self.core.resources)?;
                if resource.id().as_deref() != Some(id.as_str()) {
                    return Err(CoreError::Serialization {
                        details: format!("stored resource '{}' carries another id", id),
                    });
                }
                self.core.resources.register(resource)?;
            }
        }

        self.blueprint
            .decode_state(codec, state_type, state, &self.core.resources)
    }
}
