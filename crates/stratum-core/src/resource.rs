// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource graph types.
//!
//! A blueprint instance owns two classes of resources:
//!
//! - [`DeployableResource`]: something an external back-end materializes
//!   (a VM, a Helm release, a device handle). It lives in one area.
//! - [`ConfigurationResource`]: a configuration action bound to exactly one
//!   deployable resource through a shared [`Handle`].
//!
//! Resources are shared through [`Handle`]s so that the instance registry,
//! the blueprint state and any configuration action all see the same
//! writable copy. The discriminator of every concrete variant is the `type`
//! field of its serialized form; [`ResourceTypeRegistry`] maps it back to a
//! factory when a document is loaded.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::codec::scope;
use crate::error::{CoreError, Result};

// ============================================================================
// Shared handles
// ============================================================================

/// Shared, writable handle to a resource.
///
/// Cloning a handle clones the pointer, not the resource. Two handles are
/// the same resource when [`Handle::ptr_eq`] holds.
pub struct Handle<T>(Arc<RwLock<T>>);

impl<T> Handle<T> {
    /// Wrap a resource in a new handle.
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Shared read access.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when both handles point at the same resource.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&*self.read()).finish()
    }
}

impl<T: PartialEq> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || *self.read() == *other.read()
    }
}

impl<T: Serialize> Serialize for Handle<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.read().serialize(serializer)
    }
}

/// Resources that can be swapped for the live registry copy while a
/// document is being decoded.
pub trait Resolve: Sized {
    /// Id of the resource, if assigned.
    fn resource_id(&self) -> Option<&str>;

    /// Look up the live handle for `id` in the active decoding scope.
    fn resolve_live(id: &str) -> Option<Handle<Self>>;
}

impl<'de, T> Deserialize<'de> for Handle<T>
where
    T: Deserialize<'de> + Resolve,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = T::deserialize(deserializer)?;
        if let Some(live) = value.resource_id().and_then(T::resolve_live) {
            return Ok(live);
        }
        Ok(Handle::new(value))
    }
}

/// Handle to a deployable resource.
pub type DeployableHandle = Handle<DeployableResource>;

/// Handle to a configuration resource.
pub type ConfigurationHandle = Handle<ConfigurationResource>;

// ============================================================================
// Deployable resources
// ============================================================================

/// Something an external back-end materializes in one area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployableResource {
    /// Unique id, assigned on first registration when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Area (site) hosting the resource.
    pub area: u32,
    /// Human-readable name, unique within the owning instance by convention.
    pub name: String,
    /// Variant payload; carries the `type` discriminator.
    #[serde(flatten)]
    pub spec: DeployableSpec,
}

impl DeployableResource {
    /// Create an unregistered deployable resource.
    pub fn new(area: u32, name: impl Into<String>, spec: DeployableSpec) -> Self {
        Self {
            id: None,
            area,
            name: name.into(),
            spec,
        }
    }

    /// Wrap into a shared handle.
    pub fn into_handle(self) -> DeployableHandle {
        Handle::new(self)
    }
}

impl Resolve for DeployableResource {
    fn resource_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn resolve_live(id: &str) -> Option<Handle<Self>> {
        match scope::lookup(id)? {
            Resource::Deployable(handle) => Some(handle),
            Resource::Configuration(_) => None,
        }
    }
}

/// Concrete deployable variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeployableSpec {
    /// A virtual machine on a compute back-end.
    #[serde(rename = "VmResource")]
    Vm(VmSpec),
    /// A Helm chart release on a Kubernetes cluster.
    #[serde(rename = "HelmChartResource")]
    HelmChart(HelmChartSpec),
    /// A physical device reachable through a management address.
    #[serde(rename = "DeviceResource")]
    Device(DeviceSpec),
}

impl DeployableSpec {
    /// Discriminator of this variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Vm(_) => "VmResource",
            Self::HelmChart(_) => "HelmChartResource",
            Self::Device(_) => "DeviceResource",
        }
    }
}

/// Virtual machine request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSpec {
    pub image: String,
    pub cpus: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_network: Option<String>,
    /// Set by the provider once the VM exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_address: Option<Ipv4Addr>,
    /// Set by the provider once the VM exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,
}

/// Helm release request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmChartSpec {
    pub chart: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub namespace: String,
    #[serde(default)]
    pub values: Value,
    /// Set by the provider once the release exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

/// Physical device handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub device_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_address: Option<Ipv4Addr>,
}

// ============================================================================
// Configuration resources
// ============================================================================

/// A configuration action applied to exactly one deployable resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationResource {
    /// Unique id, assigned on first registration when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The configured resource. Shared, never copied.
    pub target: DeployableHandle,
    /// Variant payload; carries the `type` discriminator.
    #[serde(flatten)]
    pub spec: ConfigurationSpec,
}

impl ConfigurationResource {
    /// Create an unregistered configuration bound to `target`.
    pub fn new(target: &DeployableHandle, spec: ConfigurationSpec) -> Self {
        Self {
            id: None,
            target: target.clone(),
            spec,
        }
    }

    /// Wrap into a shared handle.
    pub fn into_handle(self) -> ConfigurationHandle {
        Handle::new(self)
    }
}

impl Resolve for ConfigurationResource {
    fn resource_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn resolve_live(id: &str) -> Option<Handle<Self>> {
        match scope::lookup(id)? {
            Resource::Configuration(handle) => Some(handle),
            Resource::Deployable(_) => None,
        }
    }
}

/// Concrete configuration variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConfigurationSpec {
    /// Playbook run against a VM.
    #[serde(rename = "VmConfiguration")]
    Vm {
        playbook: String,
        #[serde(default)]
        variables: Value,
    },
    /// Values overlay applied to a Helm release.
    #[serde(rename = "WorkloadValuesConfiguration")]
    WorkloadValues { values: Value },
    /// Raw payload pushed to a device.
    #[serde(rename = "DeviceConfiguration")]
    Device { payload: Value },
}

impl ConfigurationSpec {
    /// Discriminator of this variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Vm { .. } => "VmConfiguration",
            Self::WorkloadValues { .. } => "WorkloadValuesConfiguration",
            Self::Device { .. } => "DeviceConfiguration",
        }
    }
}

// ============================================================================
// Type-erased resource
// ============================================================================

/// Resource class, used to order hydration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Hydrated first.
    Deployable,
    /// Hydrated after every deployable is available.
    Configuration,
}

/// Any registered resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Deployable(DeployableHandle),
    Configuration(ConfigurationHandle),
}

impl Resource {
    /// Current id, if assigned.
    pub fn id(&self) -> Option<String> {
        match self {
            Self::Deployable(h) => h.read().id.clone(),
            Self::Configuration(h) => h.read().id.clone(),
        }
    }

    /// Discriminator of the concrete variant.
    pub fn resource_type(&self) -> &'static str {
        match self {
            Self::Deployable(h) => h.read().spec.type_name(),
            Self::Configuration(h) => h.read().spec.type_name(),
        }
    }

    /// Class of the resource.
    pub fn class(&self) -> ResourceClass {
        match self {
            Self::Deployable(_) => ResourceClass::Deployable,
            Self::Configuration(_) => ResourceClass::Configuration,
        }
    }

    /// Return the id, assigning a fresh one first if absent.
    pub fn ensure_id(&self) -> String {
        fn assign(id: &mut Option<String>) -> String {
            id.get_or_insert_with(|| Uuid::new_v4().to_string()).clone()
        }
        match self {
            Self::Deployable(h) => assign(&mut h.write().id),
            Self::Configuration(h) => assign(&mut h.write().id),
        }
    }

    /// Fully expanded serialized form.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::Deployable(h) => serde_json::to_value(h)?,
            Self::Configuration(h) => serde_json::to_value(h)?,
        };
        Ok(value)
    }

    /// Deployable handle, if this is one.
    pub fn as_deployable(&self) -> Option<&DeployableHandle> {
        match self {
            Self::Deployable(h) => Some(h),
            Self::Configuration(_) => None,
        }
    }

    /// Configuration handle, if this is one.
    pub fn as_configuration(&self) -> Option<&ConfigurationHandle> {
        match self {
            Self::Configuration(h) => Some(h),
            Self::Deployable(_) => None,
        }
    }
}

impl From<DeployableHandle> for Resource {
    fn from(handle: DeployableHandle) -> Self {
        Self::Deployable(handle)
    }
}

impl From<ConfigurationHandle> for Resource {
    fn from(handle: ConfigurationHandle) -> Self {
        Self::Configuration(handle)
    }
}

// ============================================================================
// Discriminator registry
// ============================================================================

/// Builds a resource from its reference-free serialized form.
pub type ResourceFactory = fn(Value) -> Result<Resource>;

#[derive(Clone, Copy)]
struct ResourceTypeEntry {
    class: ResourceClass,
    factory: ResourceFactory,
}

/// Maps `type` discriminators to resource factories.
///
/// Populated once at startup; the codec consults it to recognize resource
/// nodes inside arbitrary documents.
#[derive(Clone, Default)]
pub struct ResourceTypeRegistry {
    entries: HashMap<String, ResourceTypeEntry>,
}

impl fmt::Debug for ResourceTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("ResourceTypeRegistry")
            .field("types", &names)
            .finish()
    }
}

fn deployable_factory(value: Value) -> Result<Resource> {
    let resource: DeployableHandle = serde_json::from_value(value)?;
    Ok(Resource::Deployable(resource))
}

fn configuration_factory(value: Value) -> Result<Resource> {
    let resource: ConfigurationHandle = serde_json::from_value(value)?;
    Ok(Resource::Configuration(resource))
}

impl ResourceTypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in variant.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for name in ["VmResource", "HelmChartResource", "DeviceResource"] {
            registry.register(name, ResourceClass::Deployable, deployable_factory);
        }
        for name in [
            "VmConfiguration",
            "WorkloadValuesConfiguration",
            "DeviceConfiguration",
        ] {
            registry.register(name, ResourceClass::Configuration, configuration_factory);
        }
        registry
    }

    /// Register a discriminator. Re-registering replaces the factory.
    pub fn register(
        &mut self,
        resource_type: impl Into<String>,
        class: ResourceClass,
        factory: ResourceFactory,
    ) {
        self.entries
            .insert(resource_type.into(), ResourceTypeEntry { class, factory });
    }

    /// Class of a discriminator, if known.
    pub fn class_of(&self, resource_type: &str) -> Option<ResourceClass> {
        self.entries.get(resource_type).map(|e| e.class)
    }

    /// Build a resource from its reference-free serialized form.
    ///
    /// Handles nested in `value` resolve to live copies only when called
    /// inside a decoding scope (see [`crate::codec::ReferenceCodec`]).
    pub fn build(&self, resource_type: &str, value: Value) -> Result<Resource> {
        let entry = self
            .entries
            .get(resource_type)
            .ok_or_else(|| CoreError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            })?;
        (entry.factory)(value)
    }
}

// ============================================================================
// Per-instance registry
// ============================================================================

/// Registered resources of one instance, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    entries: HashMap<String, Resource>,
}

impl ResourceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource, assigning an id if it has none.
    ///
    /// A configuration can only be registered once its target is.
    pub fn register(&mut self, resource: Resource) -> Result<String> {
        if let Some(id) = resource.id()
            && self.entries.contains_key(&id)
        {
            return Err(CoreError::DuplicateResource { id });
        }
        if let Resource::Configuration(config) = &resource {
            let target_id = config.read().target.read().id.clone();
            match target_id {
                Some(target_id) if self.entries.contains_key(&target_id) => {}
                Some(target_id) => {
                    return Err(CoreError::ResourceNotRegistered { id: target_id });
                }
                None => {
                    return Err(CoreError::MissingResourceId {
                        resource_type: config.read().target.read().spec.type_name().to_string(),
                    });
                }
            }
        }
        let id = resource.ensure_id();
        self.entries.insert(id.clone(), resource);
        Ok(id)
    }

    /// Remove a resource.
    ///
    /// A deployable still targeted by a registered configuration stays.
    pub fn deregister(&mut self, resource: &Resource) -> Result<Resource> {
        let id = resource.id().ok_or_else(|| CoreError::MissingResourceId {
            resource_type: resource.resource_type().to_string(),
        })?;
        if !self.entries.contains_key(&id) {
            return Err(CoreError::ResourceNotRegistered { id });
        }
        if resource.class() == ResourceClass::Deployable {
            if let Some(configuration_id) = self.configuration_targeting(&id) {
                return Err(CoreError::ResourceInUse {
                    id,
                    configuration_id,
                });
            }
        }
        self.entries
            .remove(&id)
            .ok_or(CoreError::ResourceNotRegistered { id })
    }

    fn configuration_targeting(&self, deployable_id: &str) -> Option<String> {
        self.configurations().find_map(|config| {
            let config = config.read();
            let target_id = config.target.read().id.clone();
            (target_id.as_deref() == Some(deployable_id))
                .then(|| config.id.clone().unwrap_or_default())
        })
    }

    /// Look up a resource by id.
    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.entries.get(id)
    }

    /// Look up a deployable resource by id.
    pub fn deployable(&self, id: &str) -> Option<&DeployableHandle> {
        self.get(id).and_then(Resource::as_deployable)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(id, resource)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Resource)> {
        self.entries.iter()
    }

    /// Every registered deployable.
    pub fn deployables(&self) -> impl Iterator<Item = &DeployableHandle> {
        self.entries.values().filter_map(Resource::as_deployable)
    }

    /// Every registered configuration.
    pub fn configurations(&self) -> impl Iterator<Item = &ConfigurationHandle> {
        self.entries.values().filter_map(Resource::as_configuration)
    }

    pub(crate) fn snapshot(&self) -> HashMap<String, Resource> {
        self.entries.clone()
    }
}

/// Deserialize a reference-free value outside any decoding scope.
///
/// Handles come back as fresh, unshared copies.
pub fn detached<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}
