// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Back-end kind to provider factory map.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::traits::{Provider, ProviderContext, Result};
use crate::error::Error;

/// Builds providers of one back-end kind.
pub trait ProviderFactory: Send + Sync {
    /// Fresh provider. The caller runs [`Provider::init`] next.
    fn create(&self, ctx: ProviderContext) -> Box<dyn Provider>;

    /// Provider rebuilt from persisted private data, without `init`.
    fn restore(&self, ctx: ProviderContext, data_type: &str, data: Value)
    -> Result<Box<dyn Provider>>;
}

/// Registry of provider factories keyed by back-end kind.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: impl Into<String>, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(kind.into(), factory);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, kind: impl Into<String>, factory: Arc<dyn ProviderFactory>) -> Self {
        self.register(kind, factory);
        self
    }

    /// Factory for `kind`.
    pub fn get(&self, kind: &str) -> std::result::Result<Arc<dyn ProviderFactory>, Error> {
        self.factories
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownProviderType(kind.to_string()))
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}
