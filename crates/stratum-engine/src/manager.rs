// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance manager.
//!
//! Owns the live instance map and drives every lifecycle operation:
//!
//! 1. Look the instance up (loading it from the store on a miss).
//! 2. Take its lock. Operations on one instance never interleave.
//! 3. Move it to the running status and persist.
//! 4. Run the blueprint step with an [`InstanceContext`].
//! 5. Move it to `Idle` or `Error` and persist again.
//!
//! The map lock is never held while waiting on an instance lock, and an
//! instance never waits on its own parent, so parents can drive children
//! mid-operation without deadlocking.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use stratum_core::{Persistence, ReferenceCodec, Topology};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::blueprint::{BlueprintRegistry, BoundBlueprint};
use crate::error::{Error, Result};
use crate::instance::{Instance, InstanceContext, InstanceDeps, InstanceSummary, Operation};
use crate::provider::ProviderRegistry;

type InstanceHandle = Arc<Mutex<Instance>>;

/// Result of creating an instance that was actually allocated.
///
/// `result` carries the outcome of the blueprint's create step; the
/// instance exists (possibly in `Error`) either way.
pub(crate) struct CreateOutcome {
    pub id: String,
    pub result: Result<()>,
}

struct ManagerInner {
    live: Mutex<HashMap<String, InstanceHandle>>,
    persistence: Arc<dyn Persistence>,
    deps: InstanceDeps,
}

/// Lifecycle operations over all instances. Cheap to clone.
#[derive(Clone)]
pub struct InstanceManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for InstanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceManager")
            .field("blueprints", &self.inner.deps.blueprints)
            .finish()
    }
}

impl InstanceManager {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        topology: Arc<Topology>,
        blueprints: Arc<BlueprintRegistry>,
        providers: Arc<ProviderRegistry>,
        codec: ReferenceCodec,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                live: Mutex::new(HashMap::new()),
                persistence,
                deps: InstanceDeps {
                    topology,
                    blueprints,
                    providers,
                    codec,
                },
            }),
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.inner.deps.topology
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.inner.persistence
    }

    pub fn codec(&self) -> &ReferenceCodec {
        &self.inner.deps.codec
    }

    /// Create an instance of `blueprint_type` and run its create step.
    ///
    /// With `parent_id`, the parent must exist and records the new child
    /// before the child is deployed. Returns the new id, or the create
    /// step's error (the instance then exists in `Error`).
    #[instrument(skip(self, message))]
    pub async fn create(
        &self,
        blueprint_type: &str,
        message: Value,
        parent_id: Option<&str>,
    ) -> Result<String> {
        let blueprint = self.inner.deps.blueprints.instantiate(blueprint_type)?;
        let id = self.fresh_id().await?;

        if let Some(parent_id) = parent_id {
            let parent = self.instance(parent_id).await?;
            let mut parent = parent.lock().await;
            self.ensure_usable(&parent)?;
            parent.core.register_child(&id)?;
            self.persist(&mut parent).await?;
        }

        let outcome = self
            .deploy(id, blueprint, parent_id.map(str::to_string), message)
            .await?;
        outcome.result.map(|_| outcome.id)
    }

    /// Create a child on behalf of a parent that is mid-operation.
    ///
    /// The caller holds the parent's lock and records the child itself.
    pub(crate) async fn create_for_parent(
        &self,
        blueprint_type: &str,
        message: Value,
        parent_id: &str,
    ) -> Result<CreateOutcome> {
        let blueprint = self.inner.deps.blueprints.instantiate(blueprint_type)?;
        let id = self.fresh_id().await?;
        self.deploy(id, blueprint, Some(parent_id.to_string()), message)
            .await
    }

    async fn deploy(
        &self,
        id: String,
        blueprint: Box<dyn BoundBlueprint>,
        parent_id: Option<String>,
        message: Value,
    ) -> Result<CreateOutcome> {
        let instance = Instance::new(id.clone(), blueprint, parent_id, &self.inner.deps);
        let handle = Arc::new(Mutex::new(instance));
        let mut guard = handle.clone().lock_owned().await;
        {
            let mut live = self.inner.live.lock().await;
            if live.contains_key(&id) {
                return Err(Error::InstanceAlreadyExists(id));
            }
            live.insert(id.clone(), handle);
        }

        if let Err(e) = self.persist(&mut guard).await {
            self.inner.live.lock().await.remove(&id);
            return Err(e);
        }
        info!(instance_id = %id, "Instance created, deploying");

        let instance = &mut *guard;
        let outcome = async {
            let result = {
                let mut ctx = InstanceContext::new(&mut instance.core, self.clone());
                instance.blueprint.create(&mut ctx, message).await
            };
            instance.core.finish(&result);
            self.persist(instance).await?;
            Ok::<_, Error>(result)
        }
        .await;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.abandon(instance, &e).await;
                Err(e)
            }
        };

        match &result {
            Ok(()) => info!(instance_id = %id, "Instance deployed"),
            Err(e) => warn!(instance_id = %id, error = %e, "Instance deployment failed"),
        }
        Ok(CreateOutcome { id, result })
    }

    /// Run a day-2 `operation` on an instance.
    #[instrument(skip(self, message))]
    pub async fn update(&self, instance_id: &str, operation: &str, message: Value) -> Result<Value> {
        self.run_operation(instance_id, None, operation, message)
            .await
    }

    /// Run `operation` on `child_id`, which must be a child of `parent_id`.
    ///
    /// Only the child is locked; the relationship is checked on the child.
    #[instrument(skip(self, message))]
    pub async fn call_child_function(
        &self,
        parent_id: &str,
        child_id: &str,
        operation: &str,
        message: Value,
    ) -> Result<Value> {
        self.run_operation(child_id, Some(parent_id), operation, message)
            .await
    }

    async fn run_operation(
        &self,
        instance_id: &str,
        expected_parent: Option<&str>,
        operation: &str,
        message: Value,
    ) -> Result<Value> {
        let handle = self.instance(instance_id).await?;
        let mut guard = handle.lock().await;
        self.ensure_usable(&guard)?;
        if let Some(parent) = expected_parent
            && guard.core.parent_id() != Some(parent)
        {
            return Err(Error::ChildNotFound {
                parent: parent.to_string(),
                child: instance_id.to_string(),
            });
        }

        guard.core.begin(Operation::Update)?;
        let instance = &mut *guard;
        let outcome = async {
            self.persist(instance).await?;
            debug!(instance_id, operation, "Running operation");
            let result = {
                let mut ctx = InstanceContext::new(&mut instance.core, self.clone());
                instance
                    .blueprint
                    .run_operation(&mut ctx, operation, message)
                    .await
            };
            instance.core.finish(&result);
            self.persist(instance).await?;
            Ok::<_, Error>(result)
        }
        .await;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.abandon(instance, &e).await;
                Err(e)
            }
        };

        match &result {
            Ok(_) => info!(instance_id, operation, "Operation completed"),
            Err(e) => warn!(instance_id, operation, error = %e, "Operation failed"),
        }
        result
    }

    /// Delete an instance and, first, all of its children.
    ///
    /// A protected instance is left untouched. The cascade stops at the first
    /// child that cannot be deleted; the instance then moves to `Error` and
    /// keeps the children that survived.
    #[instrument(skip(self))]
    pub async fn delete(&self, instance_id: &str) -> Result<()> {
        self.delete_instance(instance_id.to_string(), true).await
    }

    /// Delete without detaching from the parent; the caller holds the
    /// parent's lock and updates its child set itself.
    pub(crate) async fn delete_detached(&self, instance_id: &str) -> Result<()> {
        self.delete_instance(instance_id.to_string(), false).await
    }

    fn delete_instance(&self, instance_id: String, detach: bool) -> BoxFuture<'static, Result<()>> {
        let this = self.clone();
        async move {
            let handle = this.instance(&instance_id).await?;
            let mut guard = handle.lock().await;
            if guard.core.removed {
                return Err(Error::InstanceNotFound(instance_id));
            }
            if guard.core.is_protected() {
                return Err(Error::ProtectedInstance(instance_id));
            }
            if guard.core.is_corrupted() {
                return Err(Error::CorruptedInstance(instance_id));
            }

            guard.core.begin(Operation::Delete)?;
            let instance = &mut *guard;
            let outcome = async {
                this.persist(instance).await?;
                info!(instance_id = %instance_id, "Deleting instance");

                let children: Vec<String> = instance.core.child_ids().iter().cloned().collect();
                for child_id in children {
                    match this.delete_instance(child_id.clone(), false).await {
                        Ok(()) => {}
                        Err(Error::InstanceNotFound(_)) => {
                            warn!(instance_id = %instance_id, child_id = %child_id, "Child already gone");
                        }
                        Err(e) => {
                            error!(
                                instance_id = %instance_id,
                                child_id = %child_id,
                                error = %e,
                                "Cascade delete aborted"
                            );
                            return Err(e);
                        }
                    }
                    instance.core.deregister_child(&child_id)?;
                }

                {
                    let mut ctx = InstanceContext::new(&mut instance.core, this.clone());
                    instance.blueprint.destroy(&mut ctx).await?;
                }
                instance.core.providers().final_cleanup().await?;
                // Ranges reserved by the blueprint itself, outside any provider
                this.topology().release_ranges(&instance_id).await?;
                this.inner.persistence.delete_instance(&instance_id).await?;
                Ok::<_, Error>(())
            }
            .await;
            if let Err(e) = outcome {
                this.abandon(instance, &e).await;
                warn!(instance_id = %instance_id, error = %e, "Instance delete failed");
                return Err(e);
            }

            this.inner.live.lock().await.remove(&instance_id);
            instance.core.removed = true;
            let parent_id = instance.core.parent_id().map(str::to_string);
            drop(guard);
            info!(instance_id = %instance_id, "Instance deleted");

            if detach && let Some(parent_id) = parent_id {
                this.detach_from_parent(&parent_id, &instance_id).await;
            }
            Ok(())
        }
        .boxed()
    }

    async fn detach_from_parent(&self, parent_id: &str, child_id: &str) {
        let parent = match self.instance(parent_id).await {
            Ok(parent) => parent,
            Err(e) => {
                warn!(parent_id, child_id, error = %e, "Parent not available to detach child");
                return;
            }
        };
        let mut parent = parent.lock().await;
        if parent.core.removed || parent.core.deregister_child(child_id).is_err() {
            return;
        }
        if let Err(e) = self.persist(&mut parent).await {
            warn!(parent_id, child_id, error = %e, "Failed to persist parent after detaching child");
        }
    }

    /// Summary of one instance.
    pub async fn get_summary(&self, instance_id: &str) -> Result<InstanceSummary> {
        let handle = self.instance(instance_id).await?;
        let guard = handle.lock().await;
        if guard.core.removed {
            return Err(Error::InstanceNotFound(instance_id.to_string()));
        }
        Ok(guard.summary())
    }

    /// Summaries of every known instance, ordered by id.
    pub async fn list_summaries(&self) -> Result<Vec<InstanceSummary>> {
        let mut ids: BTreeSet<String> = self
            .inner
            .persistence
            .list_instance_ids()
            .await?
            .into_iter()
            .collect();
        ids.extend(self.inner.live.lock().await.keys().cloned());

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_summary(&id).await {
                Ok(summary) => summaries.push(summary),
                Err(Error::InstanceNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }

    /// Persisted document of one instance, as it would be stored now.
    pub async fn document(&self, instance_id: &str) -> Result<Value> {
        let handle = self.instance(instance_id).await?;
        let guard = handle.lock().await;
        if guard.core.removed {
            return Err(Error::InstanceNotFound(instance_id.to_string()));
        }
        guard.to_document(self.codec())
    }

    /// Protect an instance against deletion, or lift the protection.
    pub async fn set_protected(&self, instance_id: &str, protected: bool) -> Result<()> {
        let handle = self.instance(instance_id).await?;
        let mut guard = handle.lock().await;
        self.ensure_usable(&guard)?;
        guard.core.set_protected(protected);
        self.persist(&mut guard).await?;
        info!(instance_id, protected, "Instance protection changed");
        Ok(())
    }

    /// Load every stored instance into memory.
    ///
    /// Instances that cannot be loaded are logged and skipped. Children that
    /// their parent does not list (a crash between the two writes) are
    /// re-linked.
    pub async fn restore_all(&self) -> Result<usize> {
        let ids = self.inner.persistence.list_instance_ids().await?;
        let mut restored = 0;
        for id in &ids {
            match self.instance(id).await {
                Ok(_) => restored += 1,
                Err(e) => error!(instance_id = %id, error = %e, "Failed to restore instance"),
            }
        }
        self.relink_children().await;
        info!(restored, stored = ids.len(), "Instances restored");
        Ok(restored)
    }

    async fn relink_children(&self) {
        let handles: Vec<(String, InstanceHandle)> = self
            .inner
            .live
            .lock()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        let mut links = Vec::new();
        for (id, handle) in &handles {
            if let Some(parent_id) = handle.lock().await.core.parent_id() {
                links.push((parent_id.to_string(), id.clone()));
            }
        }

        for (parent_id, child_id) in links {
            let Some((_, parent)) = handles.iter().find(|(id, _)| *id == parent_id) else {
                warn!(parent_id = %parent_id, child_id = %child_id, "Child references a missing parent");
                continue;
            };
            let mut parent = parent.lock().await;
            if parent.core.child_ids().contains(&child_id) {
                continue;
            }
            if parent.core.register_child(&child_id).is_ok() {
                warn!(parent_id = %parent_id, child_id = %child_id, "Re-linked child to parent");
                if let Err(e) = self.persist(&mut parent).await {
                    warn!(parent_id = %parent_id, error = %e, "Failed to persist re-linked parent");
                }
            }
        }
    }

    /// Live handle of an instance, loading it from the store on a miss.
    async fn instance(&self, instance_id: &str) -> Result<InstanceHandle> {
        let mut live = self.inner.live.lock().await;
        if let Some(handle) = live.get(instance_id) {
            return Ok(handle.clone());
        }

        let record = self
            .inner
            .persistence
            .load_instance(instance_id)
            .await?
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;
        let (mut instance, interrupted) =
            Instance::from_document(record.document, &self.inner.deps)?;
        if interrupted {
            warn!(
                instance_id,
                status = %instance.core.status(),
                "Instance was interrupted by a restart"
            );
            self.persist(&mut instance).await?;
        }
        debug!(instance_id, "Instance loaded from store");

        let handle = Arc::new(Mutex::new(instance));
        live.insert(instance_id.to_string(), handle.clone());
        Ok(handle)
    }

    async fn fresh_id(&self) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        if self.inner.live.lock().await.contains_key(&id)
            || self.inner.persistence.load_instance(&id).await?.is_some()
        {
            return Err(Error::InstanceAlreadyExists(id));
        }
        Ok(id)
    }

    fn ensure_usable(&self, instance: &Instance) -> Result<()> {
        if instance.core.removed {
            return Err(Error::InstanceNotFound(instance.core.id().to_string()));
        }
        if instance.core.is_corrupted() {
            return Err(Error::CorruptedInstance(instance.core.id().to_string()));
        }
        Ok(())
    }

    /// Settle an instance whose operation failed after it started.
    ///
    /// The status leaves its transient value even if the store stays
    /// unreachable; the in-memory `Error` is what a retry checks.
    async fn abandon(&self, instance: &mut Instance, cause: &Error) {
        instance.core.fail(cause.to_string());
        if let Err(e) = self.persist(instance).await {
            error!(
                instance_id = %instance.core.id(),
                error = %e,
                "Failed to persist error status"
            );
        }
    }

    /// Write the instance document.
    ///
    /// A document that cannot be encoded marks the instance corrupted and
    /// is not written, so the last good copy stays in the store.
    async fn persist(&self, instance: &mut Instance) -> Result<()> {
        if instance.core.is_corrupted() {
            debug!(instance_id = %instance.core.id(), "Skipping persist of corrupted instance");
            return Ok(());
        }
        instance.core.touch();
        match instance.to_document(self.codec()) {
            Ok(document) => {
                self.inner
                    .persistence
                    .save_instance(instance.core.id(), instance.core.instance_type(), &document)
                    .await?;
                Ok(())
            }
            Err(Error::Codec(e)) => {
                instance.core.mark_corrupted();
                error!(
                    instance_id = %instance.core.id(),
                    error = %e,
                    "Instance state could not be encoded, marking corrupted"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
