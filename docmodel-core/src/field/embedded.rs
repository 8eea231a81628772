//! Embedded documents: entities of a collection-less type stored inline.

use std::{any::Any, sync::Arc};

use async_trait::async_trait;
use bson::Bson;

use crate::{
    entity::Entity,
    error::{ModelError, ModelResult, ValidationError},
    field::{Field, FieldCore, FieldOptions, prepare_each},
    query::QueryOp,
    schema::{EntityType, RECURSIVE_REFERENCE, TypeHandle},
    value::Value,
};

fn map_to_entity(ty: &Arc<EntityType>, value: Value) -> ModelResult<Entity> {
    match value.to_bson()? {
        Bson::Document(document) => Entity::from_storage(ty, document),
        other => Err(ModelError::Serialization(format!(
            "expected a document for {}, got {:?}",
            ty.name(),
            other.element_type()
        ))),
    }
}

/// An inline document of one fixed embedded type.
#[derive(Debug)]
pub struct EmbeddedDocumentField {
    core: FieldCore,
    target: TypeHandle,
}

impl EmbeddedDocumentField {
    /// Embeds documents of the named type. Pass `"self"` for the declaring type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            core: FieldCore::new(FieldOptions::default()),
            target: TypeHandle::new(type_name),
        }
    }

    pub fn to_self() -> Self {
        Self::new(RECURSIVE_REFERENCE)
    }

    pub fn document_type(&self) -> ModelResult<Arc<EntityType>> {
        self.target.resolve(self.core.owner())
    }
}

#[async_trait]
impl Field for EmbeddedDocumentField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "EmbeddedDocumentField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::Entity(entity)
                if entity.entity_type().name() == self.target.target_name(self.core.owner()) =>
            {
                entity.validate()
            }
            _ => Err(self
                .core
                .error("Invalid embedded document instance provided to an EmbeddedDocumentField")),
        }
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::Null => Ok(Bson::Null),
            Value::Entity(entity) => Ok(Bson::Document(entity.to_storage()?)),
            Value::Map(_) => value.to_bson(),
            _ => Err(self
                .core
                .error("Invalid embedded document instance provided to an EmbeddedDocumentField")
                .into()),
        }
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        match value {
            value @ Value::Map(_) => Ok(Value::from(map_to_entity(&self.document_type()?, value)?)),
            other => Ok(other),
        }
    }

    fn from_storage(&self, bson: Bson) -> ModelResult<Value> {
        match bson {
            Bson::Document(document) => Ok(Value::from(Entity::from_storage(
                &self.document_type()?,
                document,
            )?)),
            other => Ok(Value::from(other)),
        }
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_each(op, value, |item| self.to_storage(item))
    }

    fn lookup_member(&self, name: &str) -> Option<Arc<dyn Field>> {
        self.document_type().ok()?.field(name).cloned()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An inline document of any registered embedded type, tagged with `_cls`.
#[derive(Debug, Default)]
pub struct GenericEmbeddedDocumentField {
    core: FieldCore,
}

impl GenericEmbeddedDocumentField {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Field for GenericEmbeddedDocumentField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "GenericEmbeddedDocumentField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::Entity(entity) if entity.entity_type().is_embedded() => entity.validate(),
            _ => Err(self.core.error(
                "Invalid embedded document instance provided to a GenericEmbeddedDocumentField",
            )),
        }
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::Null | Value::Map(_) => value.to_bson(),
            Value::Entity(entity) if entity.entity_type().is_embedded() => value.to_bson(),
            _ => Err(self
                .core
                .error("Invalid embedded document instance provided to a GenericEmbeddedDocumentField")
                .into()),
        }
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        value.resolve_untyped()
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_each(op, value, |item| self.to_storage(item))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::field::{FieldExt, number::IntField, string::StringField};

    fn comment_type(name: &str) -> Arc<EntityType> {
        EntityType::builder(name)
            .field("body", StringField::new().required())
            .field("votes", IntField::new().db_field("v"))
            .build()
            .unwrap()
    }

    #[test]
    fn validates_the_embedded_entity() {
        let ty = comment_type("EmbeddedValidateComment");
        let field = EmbeddedDocumentField::new("EmbeddedValidateComment");

        let empty = Entity::new(&ty);
        let err = field.validate(&Value::from(empty)).unwrap_err();
        assert_eq!(err.get("body").unwrap().message, "Field is required");

        assert!(field.validate(&Value::map([("body", "x")])).is_err());
    }

    #[test]
    fn storage_is_the_inline_document() {
        let ty = comment_type("EmbeddedStorageComment");
        let field = EmbeddedDocumentField::new("EmbeddedStorageComment");

        let comment =
            Entity::with_values(&ty, [("body", Value::from("hi")), ("votes", Value::Int(2))])
                .unwrap();
        let stored = field.to_storage(&Value::from(comment.clone())).unwrap();
        assert_eq!(stored, Bson::Document(doc! { "body": "hi", "v": 2_i64 }));
        assert_eq!(field.from_storage(stored).unwrap(), Value::from(comment));
    }

    #[test]
    fn generic_embedded_tags_and_restores_the_type() {
        let ty = comment_type("EmbeddedGenericComment");
        let field = GenericEmbeddedDocumentField::new();

        let comment = Entity::with_values(&ty, [("body", "tagged")]).unwrap();
        let stored = field.to_storage(&Value::from(comment.clone())).unwrap();
        assert_eq!(
            stored.as_document().unwrap().get_str("_cls").unwrap(),
            "EmbeddedGenericComment"
        );
        assert_eq!(field.from_storage(stored).unwrap(), Value::from(comment));
    }
}
