//! Native value model and the generic conversions between native and storage form.
//!
//! [`Value`] is what application code reads from and writes to an [`Entity`]. Storage
//! form is plain [`Bson`]. Every field defines its own three-way mapping on top of the
//! generic conversions here; fields without a declared element type (untyped lists and
//! dictionaries) fall back to [`Value::to_bson`] and [`Value::from`].

use std::collections::BTreeMap;

use bson::{Binary, Bson, Document, Uuid, doc, oid::ObjectId, spec::BinarySubtype};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;

use crate::{
    entity::Entity,
    error::{ModelResult, ValidationError},
    field::file::BlobProxy,
    registry::registry,
};

/// In-memory, application-facing representation of a field value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision fixed-point number.
    Decimal(Decimal),
    String(String),
    /// Naive (zone-less) timestamp with microsecond precision.
    DateTime(NaiveDateTime),
    Uuid(uuid::Uuid),
    Bytes(Vec<u8>),
    /// Raw object identifier as found in storage (blob handles).
    ObjectId(ObjectId),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Unresolved reference handle.
    Ref(DocumentRef),
    /// Unresolved reference handle tagged with its concrete type name.
    GenericRef(GenericRef),
    /// A resolved document or an embedded document.
    Entity(Box<Entity>),
    /// Proxy over out-of-band binary content.
    Blob(BlobProxy),
}

impl Value {
    /// Builds a list value from anything convertible into values.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds a map value from key/value pairs.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null and empty containers count as "not set" for required checks.
    pub fn is_unset(&self) -> bool {
        match self {
            Value::Null => true,
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            Value::Blob(proxy) => !proxy.has_content(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BlobProxy> {
        match self {
            Value::Blob(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Uuid(_) => "uuid",
            Value::Bytes(_) => "bytes",
            Value::ObjectId(_) => "objectid",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Ref(_) => "reference",
            Value::GenericRef(_) => "generic reference",
            Value::Entity(_) => "entity",
            Value::Blob(_) => "blob",
        }
    }

    /// Renders scalar values as text, the way a string field coerces them.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Decimal(d) => Some(d.to_string()),
            Value::Uuid(u) => Some(u.to_string()),
            Value::ObjectId(oid) => Some(oid.to_hex()),
            Value::DateTime(dt) => Some(dt.to_string()),
            _ => None,
        }
    }

    /// Converts a value to storage form without a governing field.
    ///
    /// Documents become generic reference records (they must already be persisted),
    /// embedded entities become documents tagged with `_cls`.
    pub fn to_bson(&self) -> ModelResult<Bson> {
        Ok(match self {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int(i) => Bson::Int64(*i),
            Value::Float(f) => Bson::Double(*f),
            Value::Decimal(d) => Bson::String(d.to_string()),
            Value::String(s) => Bson::String(s.clone()),
            Value::DateTime(dt) => datetime_to_bson(dt),
            Value::Uuid(u) => Bson::String(u.hyphenated().to_string()),
            Value::Bytes(bytes) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: bytes.clone(),
            }),
            Value::ObjectId(oid) => Bson::ObjectId(*oid),
            Value::List(items) => Bson::Array(
                items
                    .iter()
                    .map(Value::to_bson)
                    .collect::<ModelResult<Vec<_>>>()?,
            ),
            Value::Map(entries) => {
                let mut document = Document::new();
                for (key, value) in entries {
                    document.insert(key.clone(), value.to_bson()?);
                }
                Bson::Document(document)
            }
            Value::Ref(reference) => reference.to_bson(),
            Value::GenericRef(reference) => reference.to_bson(),
            Value::Entity(entity) => match entity.entity_type().collection() {
                Some(_) => GenericRef::for_entity(entity)?.to_bson(),
                None => {
                    let mut document = entity.to_storage()?;
                    document.insert("_cls", entity.entity_type().name());
                    Bson::Document(document)
                }
            },
            Value::Blob(proxy) => proxy
                .handle()
                .map(Bson::ObjectId)
                .unwrap_or(Bson::Null),
        })
    }

    /// Generic storage-to-native conversion that also rebuilds tagged embedded
    /// entities through the type registry.
    pub fn from_bson_untyped(bson: Bson) -> ModelResult<Value> {
        Value::from(bson).resolve_untyped()
    }

    /// Turns `_cls`-tagged maps into embedded entities, recursively.
    pub(crate) fn resolve_untyped(self) -> ModelResult<Value> {
        match self {
            Value::Map(entries) => {
                if let Some(Value::String(type_name)) = entries.get("_cls") {
                    if let Some(ty) = registry().get(type_name) {
                        if ty.is_embedded() {
                            let document = Value::Map(entries.clone()).to_bson()?;
                            if let Bson::Document(document) = document {
                                return Ok(Value::Entity(Box::new(Entity::from_storage(
                                    &ty, document,
                                )?)));
                            }
                        }
                    }
                }
                Ok(Value::Map(
                    entries
                        .into_iter()
                        .map(|(k, v)| Ok((k, v.resolve_untyped()?)))
                        .collect::<ModelResult<BTreeMap<_, _>>>()?,
                ))
            }
            Value::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(Value::resolve_untyped)
                    .collect::<ModelResult<Vec<_>>>()?,
            )),
            other => Ok(other),
        }
    }
}

impl From<Bson> for Value {
    fn from(bson: Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::Boolean(b) => Value::Bool(b),
            Bson::Int32(i) => Value::Int(i as i64),
            Bson::Int64(i) => Value::Int(i),
            Bson::Double(f) => Value::Float(f),
            Bson::String(s) => Value::String(s),
            Bson::DateTime(dt) => millis_to_datetime(dt.timestamp_millis())
                .map(Value::DateTime)
                .unwrap_or(Value::Null),
            Bson::Binary(binary) => Value::Bytes(binary.bytes),
            Bson::ObjectId(oid) => Value::ObjectId(oid),
            Bson::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Bson::Document(document) => {
                if let Some(reference) = GenericRef::from_document(&document) {
                    Value::GenericRef(reference)
                } else if let Some(reference) = DocumentRef::from_document(&document) {
                    Value::Ref(reference)
                } else {
                    Value::Map(
                        document
                            .into_iter()
                            .map(|(k, v)| (k, Value::from(v)))
                            .collect(),
                    )
                }
            }
            _ => Value::Null,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<uuid::Uuid> for Value {
    fn from(value: uuid::Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<Entity> for Value {
    fn from(value: Entity) -> Self {
        Value::Entity(Box::new(value))
    }
}

impl From<DocumentRef> for Value {
    fn from(value: DocumentRef) -> Self {
        Value::Ref(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(value: Option<V>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An opaque `(collection, id)` pointer to another document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRef {
    pub collection: String,
    pub id: Uuid,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: Uuid) -> Self {
        Self {
            collection: collection.into(),
            id,
        }
    }

    /// Storage form: `{"$ref": collection, "$id": id}`.
    pub fn to_bson(&self) -> Bson {
        Bson::Document(doc! {
            "$ref": self.collection.clone(),
            "$id": uuid_to_bson(&self.id),
        })
    }

    /// Parses the storage form, returning `None` when the document is not a handle.
    pub fn from_document(document: &Document) -> Option<Self> {
        if document.len() != 2 {
            return None;
        }
        let collection = document.get("$ref")?.as_str()?;
        let id = uuid_from_bson(document.get("$id")?)?;

        Some(Self::new(collection, id))
    }
}

/// A reference handle that also records the concrete type it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericRef {
    pub type_name: String,
    pub reference: DocumentRef,
}

impl GenericRef {
    pub fn new(type_name: impl Into<String>, reference: DocumentRef) -> Self {
        Self {
            type_name: type_name.into(),
            reference,
        }
    }

    /// Builds a handle for a persisted document entity.
    pub fn for_entity(entity: &Entity) -> Result<Self, ValidationError> {
        Ok(Self::new(entity.entity_type().name(), DocumentRef::for_entity(entity)?))
    }

    /// Storage form: `{"_cls": type, "_ref": {"$ref", "$id"}}`.
    pub fn to_bson(&self) -> Bson {
        Bson::Document(doc! {
            "_cls": self.type_name.clone(),
            "_ref": self.reference.to_bson(),
        })
    }

    pub fn from_document(document: &Document) -> Option<Self> {
        if document.len() != 2 {
            return None;
        }
        let type_name = document.get("_cls")?.as_str()?;
        let reference = DocumentRef::from_document(document.get("_ref")?.as_document()?)?;

        Some(Self::new(type_name, reference))
    }
}

impl DocumentRef {
    /// Builds a handle for a persisted document entity.
    ///
    /// Fails when the entity has no identifier yet or has no collection.
    pub fn for_entity(entity: &Entity) -> Result<Self, ValidationError> {
        let collection = entity.entity_type().collection().ok_or_else(|| {
            ValidationError::new(format!(
                "{} is an embedded type and cannot be referenced",
                entity.entity_type().name()
            ))
        })?;
        let id = entity.id().ok_or_else(unsaved_reference_error)?;

        Ok(Self::new(collection, id))
    }
}

pub(crate) fn unsaved_reference_error() -> ValidationError {
    ValidationError::new(
        "You can only reference documents once they have been saved to the database",
    )
}

/// Encodes a document identifier as a BSON UUID binary.
pub fn uuid_to_bson(id: &Uuid) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.bytes().to_vec(),
    })
}

/// Decodes a document identifier from a UUID binary or its string rendering.
pub fn uuid_from_bson(bson: &Bson) -> Option<Uuid> {
    match bson {
        Bson::Binary(binary) if binary.bytes.len() == 16 => {
            let bytes: [u8; 16] = binary.bytes.as_slice().try_into().ok()?;
            Some(Uuid::from_bytes(bytes))
        }
        Bson::String(s) => Uuid::parse_str(s).ok(),
        _ => None,
    }
}

/// Encodes a naive timestamp as a BSON datetime (millisecond precision).
pub(crate) fn datetime_to_bson(dt: &NaiveDateTime) -> Bson {
    Bson::DateTime(bson::DateTime::from_millis(dt.and_utc().timestamp_millis()))
}

pub(crate) fn millis_to_datetime(millis: i64) -> Option<NaiveDateTime> {
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}
