//! Entity instances: typed attribute values plus change tracking.
//!
//! [`Entity`] holds native values keyed by attribute name. Plain [`get`](Entity::get)
//! and [`set`](Entity::set) are synchronous and never touch the store; attribute
//! access that needs the store (dereferencing, sequence allocation, blob replacement)
//! goes through [`DocumentStore`](crate::store::DocumentStore).

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use bson::{Bson, Document, Uuid, de::deserialize_from_bson};
use serde::de::DeserializeOwned;

use crate::{
    error::{ModelError, ModelResult, ValidationError},
    field::validate_field,
    schema::EntityType,
    value::{Value, uuid_from_bson, uuid_to_bson},
};

/// Receives notice that an attribute changed and must be re-persisted.
pub trait ChangeTracker {
    fn mark_changed(&mut self, field: &str);
}

#[derive(Debug, Clone)]
pub struct Entity {
    ty: Arc<EntityType>,
    id: Option<Uuid>,
    data: BTreeMap<String, Value>,
    changed: BTreeSet<String>,
    initialised: bool,
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ty.name() == other.ty.name() && self.id == other.id && self.data == other.data
    }
}

impl Entity {
    /// Creates an entity with every field set to its default.
    pub fn new(ty: &Arc<EntityType>) -> Self {
        let data = ty
            .fields()
            .map(|(name, field)| {
                (
                    name.to_string(),
                    field.core().default_value().unwrap_or_default(),
                )
            })
            .collect();

        Self {
            ty: ty.clone(),
            id: None,
            data,
            changed: BTreeSet::new(),
            initialised: true,
        }
    }

    /// Creates an entity and assigns the given attributes.
    pub fn with_values<I, K, V>(ty: &Arc<EntityType>, values: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut entity = Self::new(ty);
        for (name, value) in values {
            entity.set(name.as_ref(), value)?;
        }
        Ok(entity)
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.ty
    }

    /// Persisted identifier, `None` until saved. Always `None` for embedded entities.
    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn set_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    /// Whether construction finished. Lazy generators only run on initialised entities.
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// The stored value of an attribute, without running any read hook.
    pub fn get(&self, name: &str) -> ModelResult<&Value> {
        self.ty.require_field(name)?;
        Ok(self.data.get(name).unwrap_or(&Value::Null))
    }

    /// Converts, validates and stores an attribute, marking it changed.
    ///
    /// `Value::Null` unsets the attribute; required fields are checked by
    /// [`Entity::validate`].
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> ModelResult<()> {
        let field = self.ty.require_field(name)?;
        let value = field.to_native(value.into())?;

        if !value.is_null() {
            validate_field(field.as_ref(), &value)?;
        }

        self.data.insert(name.to_string(), value);
        self.mark_changed(name);

        Ok(())
    }

    pub(crate) fn slot_mut(&mut self, name: &str) -> ModelResult<&mut Value> {
        self.ty.require_field(name)?;
        Ok(self.data.entry(name.to_string()).or_default())
    }

    /// Validates every field, collecting failures keyed by attribute name.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let errors = self
            .ty
            .fields()
            .filter_map(|(name, field)| {
                let value = self.data.get(name).unwrap_or(&Value::Null);
                validate_field(field.as_ref(), value)
                    .err()
                    .map(|err| (name.to_string(), err))
            })
            .collect::<BTreeMap<_, _>>();

        if errors.is_empty() {
            return Ok(());
        }
        Err(self.failure(errors))
    }

    /// Summarises per-field failures into one error naming the entity.
    pub(crate) fn failure(&self, errors: BTreeMap<String, ValidationError>) -> ValidationError {
        let id = self
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "None".to_string());
        ValidationError::new(format!(
            "ValidationError ({}:{id}) ({})",
            self.ty.name(),
            errors.keys().cloned().collect::<Vec<_>>().join(", ")
        ))
        .with_errors(errors)
    }

    /// Converts every set attribute to storage form, keyed by storage key.
    pub fn to_storage(&self) -> ModelResult<Document> {
        let mut document = Document::new();

        if let Some(id) = &self.id {
            document.insert("_id", uuid_to_bson(id));
        }

        for (name, field) in self.ty.fields() {
            let Some(value) = self.data.get(name).filter(|value| !value.is_null()) else {
                continue;
            };
            let stored = field.to_storage(value).map_err(|err| match err {
                ModelError::Validation(err) => ModelError::Validation(err.with_field(name)),
                other => other,
            })?;
            if stored != Bson::Null {
                document.insert(field.core().db_field(), stored);
            }
        }

        Ok(document)
    }

    /// Rebuilds an entity from a stored document. Missing keys take their defaults.
    pub fn from_storage(ty: &Arc<EntityType>, mut document: Document) -> ModelResult<Self> {
        let mut entity = Self::new(ty);
        entity.initialised = false;
        entity.id = document.get("_id").and_then(uuid_from_bson);

        for (name, field) in ty.fields() {
            if let Some(stored) = document.remove(field.core().db_field()) {
                let value = field.from_storage(stored)?;
                entity.data.insert(name.to_string(), value);
            }
        }

        entity.changed.clear();
        entity.initialised = true;

        Ok(entity)
    }

    /// Deserializes the storage form into any `DeserializeOwned` type.
    pub fn decode<T: DeserializeOwned>(&self) -> ModelResult<T> {
        Ok(deserialize_from_bson(Bson::Document(self.to_storage()?))?)
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.contains(name)
    }

    /// Attribute names changed since load or the last save.
    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    pub fn clear_changed(&mut self) {
        self.changed.clear();
    }
}

impl ChangeTracker for Entity {
    fn mark_changed(&mut self, field: &str) {
        self.changed.insert(field.to_string());
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use serde::Deserialize;

    use super::*;
    use crate::field::{
        FieldExt,
        composite::ListField,
        number::IntField,
        string::StringField,
    };

    fn note_type(name: &str) -> Arc<EntityType> {
        EntityType::builder(name)
            .collection("notes")
            .field("title", StringField::new().required().max_length(10))
            .field("views", IntField::new().with_default(0).db_field("v"))
            .field("tags", ListField::of(StringField::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn new_entities_start_from_defaults() {
        let entity = Entity::new(&note_type("EntityDefaultsNote"));

        assert_eq!(entity.get("views").unwrap(), &Value::Int(0));
        assert_eq!(entity.get("tags").unwrap(), &Value::List(vec![]));
        assert_eq!(entity.get("title").unwrap(), &Value::Null);
        assert!(entity.changed_fields().next().is_none());
    }

    #[test]
    fn set_validates_and_marks_changed() {
        let mut entity = Entity::new(&note_type("EntitySetNote"));

        entity.set("title", "hello").unwrap();
        assert!(entity.is_changed("title"));

        let err = entity.set("title", "far too long a title").unwrap_err();
        assert_eq!(err.as_validation().unwrap().field.as_deref(), Some("title"));
        assert!(matches!(
            entity.set("missing", 1),
            Err(ModelError::UnknownField(..))
        ));
    }

    #[test]
    fn validate_collects_per_field_errors() {
        let entity = Entity::new(&note_type("EntityValidateNote"));

        let err = entity.validate().unwrap_err();
        assert_eq!(err.get("title").unwrap().message, "Field is required");
        assert!(err.get("views").is_none());
    }

    #[test]
    fn storage_round_trip_uses_storage_keys() {
        let ty = note_type("EntityRoundTripNote");
        let mut entity = Entity::with_values(&ty, [("title", Value::from("hi")), ("views", Value::Int(3))])
            .unwrap();
        entity.set_id(Uuid::new());

        let document = entity.to_storage().unwrap();
        assert_eq!(document.get("v"), Some(&Bson::Int64(3)));
        assert!(document.get("views").is_none());

        let loaded = Entity::from_storage(&ty, document).unwrap();
        assert_eq!(loaded, entity);
        assert!(loaded.changed_fields().next().is_none());
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct NoteView {
        title: String,
        v: i64,
    }

    #[test]
    fn decode_reads_the_storage_form() {
        let ty = note_type("EntityDecodeNote");
        let entity = Entity::from_storage(&ty, doc! { "title": "x", "v": 9_i64 }).unwrap();

        assert_eq!(
            entity.decode::<NoteView>().unwrap(),
            NoteView {
                title: "x".to_string(),
                v: 9
            }
        );
    }
}
