//! Persistence and store-aware attribute access for entities.
//!
//! Plain [`Entity::get`] and [`Entity::set`] never touch the store. The store types
//! here add the operations that do:
//!
//! - [`DocumentStore`] - store bound to a concrete backend type
//! - [`DynDocumentStore`] - owned store over a boxed backend, chosen at runtime
//! - [`DynDocumentStoreRef`] - borrowed store over any backend, which implements
//!   every operation
//!
//! # Example
//!
//! ```ignore
//! use docmodel::store::DocumentStore;
//!
//! let store = DocumentStore::new(backend);
//! let mut post = Entity::with_values(&post_type, [("title", "Hello")])?;
//! let id = store.save(&mut post).await?;
//!
//! // Dereferences the author handle on first access.
//! let author = store.get_field_value(&mut post, "author").await?;
//! ```

use std::{collections::BTreeMap, sync::Arc};

use bson::{Bson, Uuid};
use tracing::{debug, warn};

use crate::{
    backend::{DynStoreBackend, StoreBackend},
    entity::{ChangeTracker, Entity},
    error::{ModelError, ModelResult},
    field::{FieldContext, Resolved, file::BlobSlot, sequence::SequenceField, validate_field},
    schema::EntityType,
    value::Value,
};

fn require_collection(ty: &EntityType) -> ModelResult<&str> {
    ty.collection().ok_or_else(|| {
        ModelError::Configuration(format!(
            "{} is an embedded type and has no collection",
            ty.name()
        ))
    })
}

/// A document store borrowing any backend through dynamic dispatch.
#[derive(Debug, Clone, Copy)]
pub struct DynDocumentStoreRef<'a> {
    backend: &'a dyn DynStoreBackend,
}

impl<'a> DynDocumentStoreRef<'a> {
    pub fn new(backend: &'a dyn DynStoreBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &'a dyn DynStoreBackend {
        self.backend
    }

    fn context(&self, entity: &Entity) -> FieldContext<'a> {
        FieldContext {
            backend: self.backend,
            initialised: entity.is_initialised(),
        }
    }

    /// Runs synchronous validation, then every field's I/O checks.
    pub async fn validate(&self, entity: &Entity) -> ModelResult<()> {
        entity.validate()?;

        let mut errors = BTreeMap::new();
        for (name, field) in entity.entity_type().fields() {
            let value = entity.get(name)?;
            if value.is_null() {
                continue;
            }
            if let Err(err) = field.verify(value).await {
                errors.insert(name.to_string(), err.with_field(name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(entity.failure(errors).into())
        }
    }

    /// Validates and persists an entity, assigning an identifier on first save.
    pub async fn save(&self, entity: &mut Entity) -> ModelResult<Uuid> {
        let ty = entity.entity_type().clone();
        let collection = require_collection(&ty)?;

        self.validate(entity).await?;

        let (id, created) = match entity.id() {
            Some(id) => (id, false),
            None => {
                let id = Uuid::new();
                entity.set_id(id);
                (id, true)
            }
        };
        let document = Bson::Document(entity.to_storage()?);

        if created {
            self.backend
                .insert_documents(vec![(id, document)], collection)
                .await?;
        } else {
            match self
                .backend
                .update_documents(vec![(id, document.clone())], collection)
                .await
            {
                Err(ModelError::DocumentNotFound(..) | ModelError::CollectionNotFound(_)) => {
                    self.backend
                        .insert_documents(vec![(id, document)], collection)
                        .await?
                }
                result => result?,
            }
        }

        debug!(collection, %id, created, "saved entity");
        entity.clear_changed();

        Ok(id)
    }

    /// Loads an entity by identifier, `None` when it does not exist.
    pub async fn load(&self, ty: &Arc<EntityType>, id: Uuid) -> ModelResult<Option<Entity>> {
        let collection = require_collection(ty)?;

        let mut documents = self.backend.get_documents(vec![id], collection).await?;
        match documents.pop() {
            Some(Bson::Document(document)) => {
                debug!(collection, %id, "loaded entity");
                Ok(Some(Entity::from_storage(ty, document)?))
            }
            Some(other) => Err(ModelError::Serialization(format!(
                "expected a document in {collection}, got {:?}",
                other.element_type()
            ))),
            None => Ok(None),
        }
    }

    /// Removes a persisted entity. Referencing documents are left untouched; see
    /// [`TypeRegistry::delete_rules`](crate::registry::TypeRegistry::delete_rules).
    pub async fn delete(&self, entity: &Entity) -> ModelResult<()> {
        let collection = require_collection(entity.entity_type())?;
        let id = entity.id().ok_or_else(|| {
            ModelError::DocumentNotFound("None".to_string(), collection.to_string())
        })?;

        self.backend.delete_documents(vec![id], collection).await?;
        debug!(collection, %id, "deleted entity");

        Ok(())
    }

    /// Reads an attribute through its field's read hook.
    ///
    /// References are dereferenced in place, sequences allocated on first read. A handle
    /// that cannot be dereferenced reads as `Value::Null`.
    pub async fn get_field_value(&self, entity: &mut Entity, name: &str) -> ModelResult<Value> {
        let field = entity.entity_type().require_field(name)?;
        let ctx = self.context(entity);

        let slot = entity.slot_mut(name)?;
        let outcome = field.resolve(slot, &ctx).await?;
        let value = match outcome {
            Resolved::Missing => Value::Null,
            _ => slot.clone(),
        };

        if outcome == Resolved::Generated {
            entity.mark_changed(name);
        }

        Ok(value)
    }

    /// Writes an attribute through its field's write hook, then validates it.
    ///
    /// Raw bytes assigned to a blob field replace its content; `Value::Null` assigned
    /// to a sequence field allocates the next value.
    pub async fn set_field_value(
        &self,
        entity: &mut Entity,
        name: &str,
        value: impl Into<Value>,
    ) -> ModelResult<()> {
        let field = entity.entity_type().require_field(name)?;
        let ctx = self.context(entity);

        let mut slot = entity.get(name)?.clone();
        field.assign(&mut slot, value.into(), &ctx).await?;
        if !slot.is_null() {
            validate_field(field.as_ref(), &slot)?;
        }

        *entity.slot_mut(name)? = slot;
        entity.mark_changed(name);

        Ok(())
    }

    /// Content access for a blob attribute.
    pub fn blob<'e>(&self, entity: &'e mut Entity, name: &str) -> ModelResult<BlobSlot<'e>>
    where
        'a: 'e,
    {
        BlobSlot::new(entity, name, self.backend)
    }

    /// Allocates the next value of a sequence field without touching any entity.
    pub async fn generate_sequence_value(&self, ty: &EntityType, name: &str) -> ModelResult<i64> {
        let field = ty.require_field(name)?;
        let Some(sequence) = field.downcast_ref::<SequenceField>() else {
            warn!(type_name = ty.name(), field = name, "not a sequence field");
            return Err(ModelError::Configuration(format!(
                "{}.{name} is not a sequence field",
                ty.name()
            )));
        };

        sequence.generate_new_value(self.backend).await
    }
}

/// A document store bound to a specific backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend + 'static> DocumentStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Borrows this store for dynamic dispatch.
    pub fn as_dyn(&self) -> DynDocumentStoreRef<'_> {
        DynDocumentStoreRef::new(&self.backend)
    }

    pub async fn validate(&self, entity: &Entity) -> ModelResult<()> {
        self.as_dyn().validate(entity).await
    }

    pub async fn save(&self, entity: &mut Entity) -> ModelResult<Uuid> {
        self.as_dyn().save(entity).await
    }

    pub async fn load(&self, ty: &Arc<EntityType>, id: Uuid) -> ModelResult<Option<Entity>> {
        self.as_dyn().load(ty, id).await
    }

    pub async fn delete(&self, entity: &Entity) -> ModelResult<()> {
        self.as_dyn().delete(entity).await
    }

    pub async fn get_field_value(&self, entity: &mut Entity, name: &str) -> ModelResult<Value> {
        self.as_dyn().get_field_value(entity, name).await
    }

    pub async fn set_field_value(
        &self,
        entity: &mut Entity,
        name: &str,
        value: impl Into<Value>,
    ) -> ModelResult<()> {
        self.as_dyn().set_field_value(entity, name, value).await
    }

    pub fn blob<'e>(&'e self, entity: &'e mut Entity, name: &str) -> ModelResult<BlobSlot<'e>> {
        BlobSlot::new(entity, name, &self.backend)
    }

    pub async fn generate_sequence_value(&self, ty: &EntityType, name: &str) -> ModelResult<i64> {
        self.as_dyn().generate_sequence_value(ty, name).await
    }

    /// Shuts down the store and releases backend resources.
    pub async fn shutdown(self) -> ModelResult<()> {
        self.backend.shutdown().await
    }
}

/// A document store owning a backend chosen at runtime.
#[derive(Debug)]
pub struct DynDocumentStore {
    backend: Box<dyn DynStoreBackend>,
}

impl DynDocumentStore {
    pub fn new(backend: Box<dyn DynStoreBackend>) -> Self {
        Self { backend }
    }

    pub fn as_dyn(&self) -> DynDocumentStoreRef<'_> {
        DynDocumentStoreRef::new(&*self.backend)
    }

    pub async fn shutdown(self) -> ModelResult<()> {
        self.backend.shutdown_boxed().await
    }
}
