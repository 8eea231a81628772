//! Entity types: named, ordered sets of bound fields.
//!
//! An [`EntityType`] either owns a collection (a document type) or has none (an
//! embedded type). Building one binds every field to it and registers it in the
//! global [`registry`](crate::registry::registry).
//!
//! ```ignore
//! let post = EntityType::builder("BlogPost")
//!     .collection("posts")
//!     .field("title", StringField::new().required())
//!     .field("tags", ListField::of(StringField::new()))
//!     .build()?;
//!
//! let (path, operand) = post.prepare_filter("tags", QueryOp::In, &Value::list(["rust"]))?;
//! ```

use std::{
    collections::HashSet,
    sync::{Arc, OnceLock, Weak},
};

use bson::{Bson, ser::serialize_to_bson};
use serde::Serialize;

use crate::{
    entity::Entity,
    error::{ModelError, ModelResult},
    field::{Field, FieldOwner},
    query::QueryOp,
    registry::registry,
    value::Value,
};

/// Target name that refers to the declaring type itself.
pub const RECURSIVE_REFERENCE: &str = "self";

/// Storage keys with a fixed meaning in every document.
const RESERVED_KEYS: [&str; 2] = ["_id", "_cls"];

#[derive(Debug)]
pub struct EntityType {
    name: String,
    collection: Option<String>,
    fields: Vec<(String, Arc<dyn Field>)>,
}

impl EntityType {
    /// Starts declaring an embedded type; call
    /// [`collection`](EntityTypeBuilder::collection) to make it a document type.
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            name: name.into(),
            collection: None,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection holding documents of this type, `None` for embedded types.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn is_embedded(&self) -> bool {
        self.collection.is_none()
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Arc<dyn Field>)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn field(&self, name: &str) -> Option<&Arc<dyn Field>> {
        self.fields
            .iter()
            .find(|(field_name, _)| field_name == name)
            .map(|(_, field)| field)
    }

    /// Looks a field up by attribute name, failing with [`ModelError::UnknownField`].
    pub fn require_field(&self, name: &str) -> ModelResult<Arc<dyn Field>> {
        self.field(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownField(name.to_string(), self.name.clone()))
    }

    /// Resolves a dotted attribute path to the chain of fields governing each segment.
    pub fn lookup_path(&self, path: &str) -> ModelResult<Vec<Arc<dyn Field>>> {
        let mut segments = path.split('.');
        let first = segments.next().unwrap_or_default();
        let mut chain = vec![self.require_field(first)?];

        for segment in segments {
            let member = chain
                .last()
                .and_then(|field| field.lookup_member(segment))
                .ok_or_else(|| ModelError::UnknownField(path.to_string(), self.name.clone()))?;
            chain.push(member);
        }

        Ok(chain)
    }

    /// Translates an attribute path and filter value into a storage path and query operand.
    pub fn prepare_filter(
        &self,
        path: &str,
        op: QueryOp,
        value: &Value,
    ) -> ModelResult<(String, Bson)> {
        let chain = self.lookup_path(path)?;

        let db_path = path
            .split('.')
            .zip(&chain)
            .enumerate()
            .map(|(depth, (segment, field))| {
                let core = field.core();
                if depth == 0 || core.name() == Some(segment) {
                    core.db_field().to_string()
                } else {
                    segment.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(".");

        let operand = match chain.last() {
            Some(field) => field.prepare_query_value(op, value)?,
            None => value.to_bson()?,
        };

        Ok((db_path, operand))
    }

    /// Builds an entity from any serializable value.
    ///
    /// The serialized keys are read as storage keys, the same way a loaded document is.
    pub fn encode<T: Serialize>(self: &Arc<Self>, value: &T) -> ModelResult<Entity> {
        match serialize_to_bson(value)? {
            Bson::Document(document) => Entity::from_storage(self, document),
            other => Err(ModelError::Serialization(format!(
                "{} must serialize to a document, got {:?}",
                self.name,
                other.element_type()
            ))),
        }
    }
}

pub struct EntityTypeBuilder {
    name: String,
    collection: Option<String>,
    fields: Vec<(String, Arc<dyn Field>)>,
}

impl EntityTypeBuilder {
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: impl Field) -> Self {
        self.fields.push((name.into(), Arc::new(field)));
        self
    }

    /// Binds every field, checks the declaration and registers the type.
    pub fn build(self) -> ModelResult<Arc<EntityType>> {
        if self.name.is_empty() {
            return Err(ModelError::Configuration("entity type name is empty".to_string()));
        }

        let owner = FieldOwner {
            type_name: self.name.clone(),
            collection: self.collection.clone(),
        };

        self.bind_fields(&owner)?;

        let ty = Arc::new(EntityType {
            name: self.name,
            collection: self.collection,
            fields: self.fields,
        });
        registry().register(ty.clone());

        Ok(ty)
    }

    fn bind_fields(&self, owner: &FieldOwner) -> ModelResult<()> {
        let mut names = HashSet::new();
        let mut keys = HashSet::new();

        for (name, field) in &self.fields {
            if name.is_empty() || name.contains('.') || name.starts_with('$') {
                return Err(ModelError::Configuration(format!(
                    "invalid field name {name:?} on {}",
                    self.name
                )));
            }
            if !names.insert(name.as_str()) {
                return Err(ModelError::Configuration(format!(
                    "field {name} declared twice on {}",
                    self.name
                )));
            }

            field.bind(owner, name)?;

            let key = field.core().db_field();
            if RESERVED_KEYS.contains(&key) || !keys.insert(key.to_string()) {
                return Err(ModelError::Configuration(format!(
                    "storage key {key:?} of {}.{name} is reserved or already used",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

/// A type named by string, resolved through the registry on first use.
#[derive(Debug)]
pub(crate) struct TypeHandle {
    name: String,
    resolved: OnceLock<Weak<EntityType>>,
}

impl TypeHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolved: OnceLock::new(),
        }
    }

    /// The concrete type name, substituting the owner for a recursive reference.
    pub(crate) fn target_name<'a>(&'a self, owner: Option<&'a FieldOwner>) -> &'a str {
        match (self.name.as_str(), owner) {
            (RECURSIVE_REFERENCE, Some(owner)) => &owner.type_name,
            (name, _) => name,
        }
    }

    pub(crate) fn resolve(&self, owner: Option<&FieldOwner>) -> ModelResult<Arc<EntityType>> {
        if let Some(ty) = self.resolved.get().and_then(Weak::upgrade) {
            return Ok(ty);
        }
        if self.name == RECURSIVE_REFERENCE && owner.is_none() {
            return Err(ModelError::Configuration(
                "a recursive reference must be bound to an owner before use".to_string(),
            ));
        }

        let ty = registry().resolve_type_by_name(self.target_name(owner))?;
        let _ = self.resolved.set(Arc::downgrade(&ty));

        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::field::{
        FieldExt,
        composite::{DictField, ListField},
        number::IntField,
        string::StringField,
    };

    #[test]
    fn build_binds_fields_and_registers() {
        let ty = EntityType::builder("SchemaBindPost")
            .collection("schema_bind_posts")
            .field("title", StringField::new().db_field("t"))
            .build()
            .unwrap();

        let title = ty.field("title").unwrap();
        assert_eq!(title.core().name(), Some("title"));
        assert_eq!(title.core().db_field(), "t");
        assert!(Arc::ptr_eq(&registry().get("SchemaBindPost").unwrap(), &ty));
    }

    #[test]
    fn duplicate_and_reserved_keys_are_rejected() {
        let twice = EntityType::builder("SchemaTwice")
            .field("a", IntField::new())
            .field("a", IntField::new())
            .build();
        assert!(matches!(twice, Err(ModelError::Configuration(_))));

        let reserved = EntityType::builder("SchemaReserved")
            .field("a", IntField::new().db_field("_id"))
            .build();
        assert!(matches!(reserved, Err(ModelError::Configuration(_))));
    }

    #[test]
    fn prepare_filter_walks_members() {
        let ty = EntityType::builder("SchemaFilterPost")
            .collection("schema_filter_posts")
            .field("title", StringField::new().db_field("t"))
            .field("tags", ListField::of(StringField::new()))
            .field("meta", DictField::new())
            .build()
            .unwrap();

        assert_eq!(
            ty.prepare_filter("title", QueryOp::IStartsWith, &Value::from("ru"))
                .unwrap(),
            ("t".to_string(), Bson::Document(doc! { "$regex": "^ru", "$options": "i" }))
        );
        assert_eq!(
            ty.prepare_filter("meta.author.name", QueryOp::Eq, &Value::from("ross"))
                .unwrap(),
            ("meta.author.name".to_string(), Bson::String("ross".to_string()))
        );
        assert!(matches!(
            ty.prepare_filter("title.nope", QueryOp::Eq, &Value::Null),
            Err(ModelError::UnknownField(..))
        ));
    }

    #[derive(Serialize)]
    struct Counter {
        label: String,
        count: i64,
    }

    #[test]
    fn encode_reads_serialized_keys() {
        let ty = EntityType::builder("SchemaEncodeCounter")
            .field("label", StringField::new())
            .field("count", IntField::new())
            .build()
            .unwrap();

        let entity = ty
            .encode(&Counter {
                label: "hits".to_string(),
                count: 3,
            })
            .unwrap();

        assert_eq!(entity.get("label").unwrap(), &Value::from("hits"));
        assert_eq!(entity.get("count").unwrap(), &Value::Int(3));
    }
}
