// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reference codec for resource graphs.
//!
//! Blueprint state is an arbitrary serde tree that may hold resource handles
//! anywhere: in fields, in lists, or nested inside other resources. Storing
//! the tree verbatim would duplicate every shared resource and lose identity
//! on reload. The codec instead:
//!
//! 1. serializes the root to a [`serde_json::Value`],
//! 2. records the path of every resource node below the root (an object
//!    whose `type` is a registered discriminator),
//! 3. replaces each of those paths with the token `REF=<id>`.
//!
//! Decoding reverses the process and deserializes inside a resolution scope,
//! so every handle whose id is registered comes back as the live shared
//! handle held by the [`ResourceRegistry`].
//!
//! Replacement is always applied longest path first. A resource nested
//! inside another resource has a longer path than its container; replacing
//! the container first would remove the inner path from the document.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::resource::{Resource, ResourceRegistry, ResourceTypeRegistry};

/// Prefix of a reference token.
pub const REFERENCE_PREFIX: &str = "REF=";

/// One step into a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object key.
    Key(String),
    /// Array index.
    Index(usize),
}

/// Location of a node inside a document, root first.
pub type DocumentPath = Vec<PathSegment>;

/// Render a path as a JSON pointer (`/vm/networks/0`).
pub fn render_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                let _ = write!(out, "/{}", key.replace('~', "~0").replace('/', "~1"));
            }
            PathSegment::Index(index) => {
                let _ = write!(out, "/{}", index);
            }
        }
    }
    out
}

/// Format a reference token for `id`.
pub fn reference_token(id: &str) -> String {
    format!("{}{}", REFERENCE_PREFIX, id)
}

/// Encodes and decodes resource graphs against an instance registry.
#[derive(Debug, Clone)]
pub struct ReferenceCodec {
    types: Arc<ResourceTypeRegistry>,
}

impl ReferenceCodec {
    /// Create a codec recognizing the discriminators in `types`.
    pub fn new(types: Arc<ResourceTypeRegistry>) -> Self {
        Self { types }
    }

    /// Codec over the built-in resource variants.
    pub fn builtin() -> Self {
        Self::new(Arc::new(ResourceTypeRegistry::builtin()))
    }

    /// The discriminator registry in use.
    pub fn types(&self) -> &ResourceTypeRegistry {
        &self.types
    }

    /// Serialize `root` and replace every nested resource with a reference.
    pub fn encode<T>(&self, root: &T, registry: &ResourceRegistry) -> Result<Value>
    where
        T: Serialize + ?Sized,
    {
        let document = serde_json::to_value(root)?;
        self.encode_value(document, registry)
    }

    /// Replace every nested resource of an already serialized document.
    pub fn encode_value(&self, mut document: Value, registry: &ResourceRegistry) -> Result<Value> {
        let mut found = Vec::new();
        self.collect_resources(&document, &mut Vec::new(), registry, &mut found)?;

        let replacements = found
            .into_iter()
            .map(|(path, id)| (path, Value::String(reference_token(&id))))
            .collect();
        replace_longest_first(&mut document, replacements)?;
        Ok(document)
    }

    /// Encode a registered resource for the `registeredResources` map.
    ///
    /// The resource itself stays inline; resources nested in it (such as a
    /// configuration target) become references.
    pub fn encode_resource(&self, resource: &Resource, registry: &ResourceRegistry) -> Result<Value> {
        self.encode_value(resource.to_value()?, registry)
    }

    /// Expand every reference in `document` and deserialize the result.
    ///
    /// Handles whose id is registered resolve to the live registry copy.
    pub fn decode<T>(&self, document: &Value, registry: &ResourceRegistry) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let expanded = self.expand(document, registry)?;
        scope::with_scope(registry, || Ok(serde_json::from_value(expanded)?))
    }

    /// Decode a resource stored under discriminator `resource_type`.
    pub fn decode_resource(
        &self,
        resource_type: &str,
        document: &Value,
        registry: &ResourceRegistry,
    ) -> Result<Resource> {
        if self.types.class_of(resource_type).is_none() {
            return Err(CoreError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            });
        }
        let expanded = self.expand(document, registry)?;
        scope::with_scope(registry, || self.types.build(resource_type, expanded))
    }

    fn expand(&self, document: &Value, registry: &ResourceRegistry) -> Result<Value> {
        let mut tokens = Vec::new();
        collect_references(document, &mut Vec::new(), &mut tokens);

        let mut replacements = Vec::with_capacity(tokens.len());
        for (path, id) in tokens {
            let resource = registry
                .get(&id)
                .ok_or_else(|| CoreError::UnresolvedReference {
                    id: id.clone(),
                    path: render_path(&path),
                })?;
            replacements.push((path, resource.to_value()?));
        }

        let mut expanded = document.clone();
        replace_longest_first(&mut expanded, replacements)?;
        Ok(expanded)
    }

    fn collect_resources(
        &self,
        value: &Value,
        path: &mut DocumentPath,
        registry: &ResourceRegistry,
        found: &mut Vec<(DocumentPath, String)>,
    ) -> Result<()> {
        match value {
            Value::Object(map) => {
                if !path.is_empty() {
                    if let Some(resource_type) = self.resource_type_of(map) {
                        let id = map.get("id").and_then(Value::as_str).ok_or_else(|| {
                            CoreError::MissingResourceId {
                                resource_type: resource_type.to_string(),
                            }
                        })?;
                        if !registry.contains(id) {
                            return Err(CoreError::UnregisteredResource {
                                id: id.to_string(),
                                path: render_path(path),
                            });
                        }
                        found.push((path.clone(), id.to_string()));
                    }
                }
                for (key, child) in map {
                    path.push(PathSegment::Key(key.clone()));
                    let result = self.collect_resources(child, path, registry, found);
                    path.pop();
                    result?;
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    path.push(PathSegment::Index(index));
                    let result = self.collect_resources(child, path, registry, found);
                    path.pop();
                    result?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn resource_type_of<'a>(&self, map: &'a serde_json::Map<String, Value>) -> Option<&'a str> {
        let resource_type = map.get("type")?.as_str()?;
        self.types.class_of(resource_type).map(|_| resource_type)
    }
}

fn collect_references(value: &Value, path: &mut DocumentPath, found: &mut Vec<(DocumentPath, String)>) {
    match value {
        Value::String(s) => {
            if let Some(id) = s.strip_prefix(REFERENCE_PREFIX) {
                found.push((path.clone(), id.to_string()));
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                path.push(PathSegment::Key(key.clone()));
                collect_references(child, path, found);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(PathSegment::Index(index));
                collect_references(child, path, found);
                path.pop();
            }
        }
        _ => {}
    }
}

fn replace_longest_first(document: &mut Value, mut replacements: Vec<(DocumentPath, Value)>) -> Result<()> {
    // Stable: equal-length paths keep document order.
    replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    for (path, value) in replacements {
        replace_at(document, &path, value)?;
    }
    Ok(())
}

fn replace_at(document: &mut Value, path: &[PathSegment], value: Value) -> Result<()> {
    let mut node = document;
    for segment in path {
        let next = match segment {
            PathSegment::Key(key) => node.get_mut(key.as_str()),
            PathSegment::Index(index) => node.get_mut(*index),
        };
        node = next.ok_or_else(|| CoreError::Serialization {
            details: format!("path '{}' vanished during replacement", render_path(path)),
        })?;
    }
    *node = value;
    Ok(())
}

/// Thread-local resolution scope consulted by handle deserialization.
pub(crate) mod scope {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use crate::resource::{Resource, ResourceRegistry};

    thread_local! {
        static ACTIVE: RefCell<Vec<HashMap<String, Resource>>> = const { RefCell::new(Vec::new()) };
    }

    struct ScopeGuard;

    impl Drop for ScopeGuard {
        fn drop(&mut self) {
            ACTIVE.with(|active| {
                active.borrow_mut().pop();
            });
        }
    }

    /// Run `f` with `registry` as the innermost resolution scope.
    pub(crate) fn with_scope<R>(registry: &ResourceRegistry, f: impl FnOnce() -> R) -> R {
        ACTIVE.with(|active| active.borrow_mut().push(registry.snapshot()));
        let _guard = ScopeGuard;
        f()
    }

    /// Live resource for `id` in the innermost scope.
    pub(crate) fn lookup(id: &str) -> Option<Resource> {
        ACTIVE.with(|active| active.borrow().last().and_then(|scope| scope.get(id).cloned()))
    }
}
