//! Reference fields: pointers to documents in other collections.
//!
//! A reference is stored as a handle and dereferenced lazily through the read hook the
//! first time it is accessed through a [`DocumentStore`](crate::store::DocumentStore).
//! A handle that cannot be dereferenced (target deleted, store unavailable) reads as
//! `Value::Null`; the stored handle itself is kept so a later save writes it back.

use std::{any::Any, sync::Arc};

use async_trait::async_trait;
use bson::Bson;
use tracing::{debug, warn};

use crate::{
    backend::DynStoreBackend,
    entity::Entity,
    error::{ModelError, ModelResult, ValidationError},
    field::{Field, FieldContext, FieldCore, FieldOptions, FieldOwner, Resolved, prepare_each},
    query::QueryOp,
    registry::registry,
    schema::{EntityType, RECURSIVE_REFERENCE, TypeHandle},
    value::{DocumentRef, GenericRef, Value},
};

/// What happens to referencing documents when a referenced document is deleted.
///
/// The policy is declarative: [`TypeRegistry::delete_rules`](crate::registry::TypeRegistry::delete_rules)
/// reports it, executing it is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    #[default]
    DoNothing,
    /// Unset the reference in referencing documents.
    Nullify,
    /// Delete referencing documents too.
    Cascade,
    /// Refuse the delete while referencing documents exist.
    Deny,
}

async fn fetch(
    ty: &Arc<EntityType>,
    reference: &DocumentRef,
    backend: &dyn DynStoreBackend,
) -> ModelResult<Option<Entity>> {
    let mut documents = backend
        .get_documents(vec![reference.id], &reference.collection)
        .await?;

    match documents.pop() {
        Some(Bson::Document(document)) => Ok(Some(Entity::from_storage(ty, document)?)),
        Some(other) => Err(ModelError::Serialization(format!(
            "expected a document in {}, got {:?}",
            reference.collection,
            other.element_type()
        ))),
        None => Ok(None),
    }
}

/// Replaces `slot` with the referenced entity. Every failure degrades to
/// [`Resolved::Missing`] and leaves the handle in place.
async fn dereference(
    slot: &mut Value,
    ty: ModelResult<Arc<EntityType>>,
    reference: DocumentRef,
    ctx: &FieldContext<'_>,
) -> Resolved {
    let ty = match ty {
        Ok(ty) => ty,
        Err(err) => {
            warn!(error = %err, collection = %reference.collection, "cannot resolve reference target type");
            return Resolved::Missing;
        }
    };

    match fetch(&ty, &reference, ctx.backend).await {
        Ok(Some(entity)) => {
            debug!(collection = %reference.collection, id = %reference.id, "dereferenced document");
            *slot = Value::Entity(Box::new(entity));
            Resolved::Cached
        }
        Ok(None) => {
            warn!(collection = %reference.collection, id = %reference.id, "dangling reference");
            Resolved::Missing
        }
        Err(err) => {
            warn!(error = %err, collection = %reference.collection, id = %reference.id, "failed to dereference document");
            Resolved::Missing
        }
    }
}

/// Dereferences a type-tagged handle found in an untyped container.
pub(crate) async fn resolve_untyped(
    slot: &mut Value,
    ctx: &FieldContext<'_>,
) -> ModelResult<Resolved> {
    let Value::GenericRef(generic) = slot else {
        return Ok(Resolved::Unchanged);
    };
    let GenericRef {
        type_name,
        reference,
    } = generic.clone();

    Ok(dereference(slot, registry().resolve_type_by_name(&type_name), reference, ctx).await)
}

/// A reference to a document of one fixed type.
#[derive(Debug)]
pub struct ReferenceField {
    core: FieldCore,
    target: TypeHandle,
    policy: DeletePolicy,
}

impl ReferenceField {
    /// References documents of the named type. Pass `"self"` for the declaring type.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            core: FieldCore::new(FieldOptions::default()),
            target: TypeHandle::new(target),
            policy: DeletePolicy::DoNothing,
        }
    }

    /// References documents of the declaring type.
    pub fn to_self() -> Self {
        Self::new(RECURSIVE_REFERENCE)
    }

    pub fn on_delete(mut self, policy: DeletePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> DeletePolicy {
        self.policy
    }

    pub fn target_type(&self) -> ModelResult<Arc<EntityType>> {
        self.target.resolve(self.core.owner())
    }

    fn target_name(&self) -> &str {
        self.target.target_name(self.core.owner())
    }

    fn handle(&self, value: &Value) -> ModelResult<Option<DocumentRef>> {
        match value {
            Value::Null => Ok(None),
            Value::Ref(reference) => Ok(Some(reference.clone())),
            Value::Entity(entity) => DocumentRef::for_entity(entity)
                .map(Some)
                .map_err(|err| self.core.attribute(err).into()),
            Value::Uuid(id) => {
                let ty = self.target_type()?;
                let collection = ty.collection().ok_or_else(|| {
                    ModelError::Configuration(format!("{} has no collection", ty.name()))
                })?;
                Ok(Some(DocumentRef::new(
                    collection,
                    bson::Uuid::from_bytes(id.into_bytes()),
                )))
            }
            _ => Err(self
                .core
                .error("A ReferenceField only accepts DBRef or documents")
                .into()),
        }
    }
}

#[async_trait]
impl Field for ReferenceField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "ReferenceField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::Ref(_) => Ok(()),
            Value::Entity(entity) => {
                let target = self.target_name();
                if entity.entity_type().name() != target {
                    return Err(self.core.error(format!(
                        "A ReferenceField only accepts documents of type {target}"
                    )));
                }
                DocumentRef::for_entity(entity)
                    .map(|_| ())
                    .map_err(|err| self.core.attribute(err))
            }
            _ => Err(self
                .core
                .error("A ReferenceField only accepts DBRef or documents")),
        }
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        Ok(self
            .handle(value)?
            .map(|reference| reference.to_bson())
            .unwrap_or(Bson::Null))
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(value)
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_each(op, value, |item| self.to_storage(item))
    }

    fn lookup_member(&self, name: &str) -> Option<Arc<dyn Field>> {
        self.target_type().ok()?.field(name).cloned()
    }

    fn bind(&self, owner: &FieldOwner, name: &str) -> ModelResult<()> {
        self.core.bind(owner, name)?;
        if self.policy != DeletePolicy::DoNothing && owner.collection.is_none() {
            return Err(ModelError::Configuration(format!(
                "Reverse delete rules are not supported for embedded types (field: {}.{name})",
                owner.type_name
            )));
        }
        Ok(())
    }

    fn delete_rule(&self) -> Option<(String, DeletePolicy)> {
        Some((self.target_name().to_string(), self.policy))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn resolve(&self, slot: &mut Value, ctx: &FieldContext<'_>) -> ModelResult<Resolved> {
        let Value::Ref(reference) = slot else {
            return Ok(Resolved::Unchanged);
        };
        let reference = reference.clone();

        Ok(dereference(slot, self.target_type(), reference, ctx).await)
    }
}

/// A reference to a document of any registered type.
///
/// Stored as `{"_cls": <type name>, "_ref": {"$ref", "$id"}}` so the target type can be
/// recovered through the registry.
#[derive(Debug, Default)]
pub struct GenericReferenceField {
    core: FieldCore,
}

impl GenericReferenceField {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Field for GenericReferenceField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "GenericReferenceField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::GenericRef(_) => Ok(()),
            Value::Entity(entity) => GenericRef::for_entity(entity)
                .map(|_| ())
                .map_err(|err| self.core.attribute(err)),
            _ => Err(self
                .core
                .error("GenericReferences can only contain documents")),
        }
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::Null => Ok(Bson::Null),
            Value::GenericRef(reference) => Ok(reference.to_bson()),
            Value::Entity(entity) => GenericRef::for_entity(entity)
                .map(|reference| reference.to_bson())
                .map_err(|err| self.core.attribute(err).into()),
            _ => Err(self
                .core
                .error("GenericReferences can only contain documents")
                .into()),
        }
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(value)
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_each(op, value, |item| self.to_storage(item))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn resolve(&self, slot: &mut Value, ctx: &FieldContext<'_>) -> ModelResult<Resolved> {
        resolve_untyped(slot, ctx).await
    }
}
