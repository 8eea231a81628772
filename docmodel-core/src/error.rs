//! Error types and result types for field and document operations.
//!
//! Two layers of errors exist:
//!
//! - [`ValidationError`] - a value failed a field's semantic contract. Always attributable
//!   to a field path and always recoverable by correcting the value.
//! - [`ModelError`] - everything else (configuration mistakes, store failures, blob misuse),
//!   with validation failures folded in through [`ModelError::Validation`].
//!
//! Use [`ModelResult<T>`] as the return type for fallible operations.

use std::collections::BTreeMap;

use bson::error::Error as BsonError;
use thiserror::Error;

/// A value failed validation against a field.
///
/// `field` is the path of the offending field once known; `errors` carries nested
/// failures keyed by sub-path (list index, dictionary key or embedded field name).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}{}", render_field(.field))]
pub struct ValidationError {
    /// Human-readable description of the failure.
    pub message: String,
    /// Path of the field that failed, if known.
    pub field: Option<String>,
    /// Nested failures keyed by sub-path.
    pub errors: BTreeMap<String, ValidationError>,
}

fn render_field(field: &Option<String>) -> String {
    match field {
        Some(field) => format!(" (field: {field})"),
        None => String::new(),
    }
}

impl ValidationError {
    /// Creates a validation error with no field attribution.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
            errors: BTreeMap::new(),
        }
    }

    /// Attributes this error to a field, keeping an existing attribution.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        if self.field.is_none() {
            self.field = Some(field.into());
        }
        self
    }

    /// Attaches nested per-path errors.
    pub fn with_errors(mut self, errors: BTreeMap<String, ValidationError>) -> Self {
        self.errors = errors;
        self
    }

    /// Returns the nested error recorded for `path`, if any.
    pub fn get(&self, path: &str) -> Option<&ValidationError> {
        self.errors.get(path)
    }
}

/// Represents all possible errors raised by the field subsystem and its store collaborators.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A value failed a field's contract.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A field or entity type was declared with unsatisfiable options.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A type name could not be resolved through the type registry.
    #[error("Unknown document type: {0}")]
    UnknownType(String),
    /// A field name is not declared on the entity type.
    /// The first argument is the field name, the second the type name.
    #[error("Unknown field {0} on {1}")]
    UnknownField(String, String),
    /// Conversion between native, storage or serde representations failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// Misuse of a blob proxy (double put, disabled stream writes, missing content).
    #[error("Blob error: {0}")]
    Blob(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for field and document operations.
pub type ModelResult<T> = Result<T, ModelError>;

impl From<BsonError> for ModelError {
    fn from(err: BsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl ModelError {
    /// Returns the wrapped validation error, if this is one.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            ModelError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_field_path() {
        let err = ValidationError::new("String value is too long").with_field("title");
        assert_eq!(err.to_string(), "String value is too long (field: title)");
    }

    #[test]
    fn with_field_keeps_innermost_attribution() {
        let err = ValidationError::new("bad").with_field("inner").with_field("outer");
        assert_eq!(err.field.as_deref(), Some("inner"));
    }
}
