//! Convenient re-exports of commonly used types from docmodel.
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - Entity types, entities and the value model
//! - Every field family and the field builder extensions
//! - Store backends, builders and document stores
//! - Query operators and error types

pub use docmodel_core::{
    backend::{DynStoreBackend, StoreBackend, StoreBackendBuilder, StoredBlob},
    entity::{ChangeTracker, Entity},
    error::{ModelError, ModelResult, ValidationError},
    field::{
        Field, FieldExt,
        composite::{DictField, ListField, MapField, SortedListField},
        datetime::{ComplexDateTimeField, DateTimeField},
        embedded::{EmbeddedDocumentField, GenericEmbeddedDocumentField},
        file::{BlobProxy, BlobSlot, FileField},
        image::{ImageCodec, ImageField, ImageInfo, ImageSize},
        number::{DecimalField, FloatField, IntField},
        reference::{DeletePolicy, GenericReferenceField, ReferenceField},
        scalar::{BinaryField, BooleanField, GeoPointField, UuidField},
        sequence::SequenceField,
        string::{EmailField, StringField, UrlField},
    },
    query::QueryOp,
    registry::{DeleteRule, registry},
    schema::EntityType,
    store::{DocumentStore, DynDocumentStore, DynDocumentStoreRef},
    value::{DocumentRef, GenericRef, Value},
};
