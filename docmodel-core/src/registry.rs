//! Process-wide registry of entity types.
//!
//! Types register themselves when built. Fields that name their target by string
//! (recursive references, generic references, generic embedded documents) resolve it
//! here on first use.

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    error::{ModelError, ModelResult},
    field::reference::DeletePolicy,
    schema::EntityType,
};

static REGISTRY: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::default);

/// Returns the global type registry.
pub fn registry() -> &'static TypeRegistry {
    &REGISTRY
}

/// A reference field that must be consulted when a target document is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRule {
    /// Type declaring the reference.
    pub source_type: String,
    /// Collection of the declaring type.
    pub source_collection: String,
    /// Attribute name of the reference field.
    pub field: String,
    /// Storage key of the reference field.
    pub db_field: String,
    pub policy: DeletePolicy,
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<EntityType>>>,
}

impl TypeRegistry {
    /// Registers a type under its name, replacing any previous registration.
    pub fn register(&self, ty: Arc<EntityType>) {
        let previous = self.types.write().insert(ty.name().to_string(), ty.clone());
        if previous.is_some() {
            debug!(type_name = ty.name(), "replaced registered entity type");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityType>> {
        self.types.read().get(name).cloned()
    }

    /// Resolves a type named only by string at declaration time.
    pub fn resolve_type_by_name(&self, name: &str) -> ModelResult<Arc<EntityType>> {
        self.get(name)
            .ok_or_else(|| ModelError::UnknownType(name.to_string()))
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<EntityType>> {
        self.types.write().remove(name)
    }

    /// Reference fields across all registered types that target `target` with a
    /// policy other than [`DeletePolicy::DoNothing`].
    pub fn delete_rules(&self, target: &str) -> Vec<DeleteRule> {
        let types = self.types.read();
        let mut rules = types
            .values()
            .filter_map(|ty| Some((ty, ty.collection()?)))
            .flat_map(|(ty, collection)| {
                ty.fields().filter_map(move |(name, field)| {
                    let (target_type, policy) = field.delete_rule()?;
                    (target_type == target && policy != DeletePolicy::DoNothing).then(|| {
                        DeleteRule {
                            source_type: ty.name().to_string(),
                            source_collection: collection.to_string(),
                            field: name.to_string(),
                            db_field: field.core().db_field().to_string(),
                            policy,
                        }
                    })
                })
            })
            .collect::<Vec<_>>();

        rules.sort_by(|a, b| (&a.source_type, &a.field).cmp(&(&b.source_type, &b.field)));
        rules
    }
}
