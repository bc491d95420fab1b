//! Display-name resolution for flow endpoints
//!
//! Names are attached to entity references on read and never persisted on
//! the flow itself. Only kinds that support resolution are looked up.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

use super::entity::{EntityKind, EntityReference};

/// Looks up display names for entity references
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve the display name for `reference`, if one is known
    async fn resolve(&self, reference: &EntityReference) -> Result<Option<String>>;
}

/// Resolver that never knows any names
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNameResolver;

#[async_trait]
impl NameResolver for NoNameResolver {
    async fn resolve(&self, _reference: &EntityReference) -> Result<Option<String>> {
        Ok(None)
    }
}

/// In-memory resolver backed by a fixed map
#[derive(Debug, Clone, Default)]
pub struct StaticNameResolver {
    names: HashMap<(EntityKind, i64), String>,
}

impl StaticNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, kind: EntityKind, id: i64, name: impl Into<String>) -> Self {
        self.insert(kind, id, name);
        self
    }

    pub fn insert(&mut self, kind: EntityKind, id: i64, name: impl Into<String>) {
        self.names.insert((kind, id), name.into());
    }
}

#[async_trait]
impl NameResolver for StaticNameResolver {
    async fn resolve(&self, reference: &EntityReference) -> Result<Option<String>> {
        Ok(self.names.get(&(reference.kind, reference.id)).cloned())
    }
}

/// Attach a display name to `reference` when its kind supports resolution
pub async fn resolve_name(
    resolver: &dyn NameResolver,
    reference: EntityReference,
) -> Result<EntityReference> {
    if !reference.kind.supports_name_resolution() {
        return Ok(reference);
    }
    let name = resolver.resolve(&reference).await?;
    Ok(EntityReference { name, ..reference })
}
