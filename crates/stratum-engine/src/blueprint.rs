// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Blueprint trait and registry.
//!
//! A blueprint is the type-specific logic of one kind of instance: what to
//! deploy on create, which day-2 operations exist, what to tear down on
//! delete. The engine knows nothing else about it. Its typed state may hold
//! resource handles anywhere; the reference codec persists them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use stratum_core::{CoreError, ReferenceCodec, ResourceRegistry};

use crate::error::{Error, Result};
use crate::instance::InstanceContext;

/// Type-specific instance logic.
///
/// All methods run under the instance lock. A blueprint may create, call
/// or delete its own children through the context; it must never call back
/// into an instance that is already in its call chain.
#[async_trait]
pub trait Blueprint: Send + Sync + 'static {
    /// Type tag stored on every instance of this blueprint.
    const TYPE: &'static str;

    /// Tag persisted as `stateType` and checked on reload. Change it only
    /// together with a migration of stored states.
    const STATE_TYPE: &'static str = Self::TYPE;

    /// Blueprint state. Persisted with the reference codec after every step.
    type State: Serialize + DeserializeOwned + Default + Send + Sync + 'static;

    /// Deploy a new instance.
    async fn create(
        &self,
        ctx: &mut InstanceContext<'_>,
        state: &mut Self::State,
        message: Value,
    ) -> Result<()>;

    /// Run a named day-2 operation.
    async fn run_operation(
        &self,
        ctx: &mut InstanceContext<'_>,
        state: &mut Self::State,
        operation: &str,
        message: Value,
    ) -> Result<Value>;

    /// Release type-specific resources before the providers are cleaned up.
    async fn destroy(&self, ctx: &mut InstanceContext<'_>, state: &mut Self::State) -> Result<()> {
        let _ = (ctx, state);
        Ok(())
    }
}

/// Object-safe view of a blueprint bound to its state.
#[async_trait]
pub(crate) trait BoundBlueprint: Send + Sync {
    fn blueprint_type(&self) -> &'static str;

    fn state_type(&self) -> &'static str;

    fn encode_state(&self, codec: &ReferenceCodec, registry: &ResourceRegistry) -> stratum_core::Result<Value>;

    fn decode_state(
        &mut self,
        codec: &ReferenceCodec,
        state_type: &str,
        document: &Value,
        registry: &ResourceRegistry,
    ) -> stratum_core::Result<()>;

    async fn create(&mut self, ctx: &mut InstanceContext<'_>, message: Value) -> Result<()>;

    async fn run_operation(
        &mut self,
        ctx: &mut InstanceContext<'_>,
        operation: &str,
        message: Value,
    ) -> Result<Value>;

    async fn destroy(&mut self, ctx: &mut InstanceContext<'_>) -> Result<()>;
}

struct Bound<B: Blueprint> {
    blueprint: Arc<B>,
    state: B::State,
}

#[async_trait]
impl<B: Blueprint> BoundBlueprint for Bound<B> {
    fn blueprint_type(&self) -> &'static str {
        B::TYPE
    }

    fn state_type(&self) -> &'static str {
        B::STATE_TYPE
    }

    fn encode_state(&self, codec: &ReferenceCodec, registry: &ResourceRegistry) -> stratum_core::Result<Value> {
        codec.encode(&self.state, registry)
    }

    fn decode_state(
        &mut self,
        codec: &ReferenceCodec,
        state_type: &str,
        document: &Value,
        registry: &ResourceRegistry,
    ) -> stratum_core::Result<()> {
        if state_type != self.state_type() {
            return Err(CoreError::Serialization {
                details: format!(
                    "stored state type {} does not match {}",
                    state_type,
                    self.state_type()
                ),
            });
        }
        self.state = codec.decode(document, registry)?;
        Ok(())
    }

    async fn create(&mut self, ctx: &mut InstanceContext<'_>, message: Value) -> Result<()> {
        self.blueprint.create(ctx, &mut self.state, message).await
    }

    async fn run_operation(
        &mut self,
        ctx: &mut InstanceContext<'_>,
        operation: &str,
        message: Value,
    ) -> Result<Value> {
        self.blueprint
            .run_operation(ctx, &mut self.state, operation, message)
            .await
    }

    async fn destroy(&mut self, ctx: &mut InstanceContext<'_>) -> Result<()> {
        self.blueprint.destroy(ctx, &mut self.state).await
    }
}

type BlueprintFactory = Arc<dyn Fn() -> Box<dyn BoundBlueprint> + Send + Sync>;

/// Registry of blueprints keyed by type tag.
#[derive(Default, Clone)]
pub struct BlueprintRegistry {
    factories: HashMap<&'static str, BlueprintFactory>,
}

impl fmt::Debug for BlueprintRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlueprintRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl BlueprintRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blueprint under [`Blueprint::TYPE`], replacing any previous one.
    pub fn register<B: Blueprint>(&mut self, blueprint: B) {
        let blueprint = Arc::new(blueprint);
        self.factories.insert(
            B::TYPE,
            Arc::new(move || {
                Box::new(Bound {
                    blueprint: blueprint.clone(),
                    state: B::State::default(),
                }) as Box<dyn BoundBlueprint>
            }),
        );
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<B: Blueprint>(mut self, blueprint: B) -> Self {
        self.register(blueprint);
        self
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort();
        types
    }

    /// Whether `blueprint_type` is registered.
    pub fn contains(&self, blueprint_type: &str) -> bool {
        self.factories.contains_key(blueprint_type)
    }

    pub(crate) fn instantiate(&self, blueprint_type: &str) -> Result<Box<dyn BoundBlueprint>> {
        self.factories
            .get(blueprint_type)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownBlueprintType(blueprint_type.to_string()))
    }
}
