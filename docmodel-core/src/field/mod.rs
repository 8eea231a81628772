//! The field contract and every concrete field family.
//!
//! A [`Field`] governs one named attribute of an entity type. It defines a three-way
//! mapping between the native [`Value`] held by application code, the storage form
//! ([`Bson`]) written to the document store, and the query form embedded in filter
//! predicates:
//!
//! | operation | direction |
//! |---|---|
//! | [`Field::validate`] | checks a native value, pure |
//! | [`Field::to_storage`] | native to storage, total over validated values |
//! | [`Field::to_native`] | storage (or already native) to native, idempotent |
//! | [`Field::prepare_query_value`] | user filter value to query form, operator sensitive |
//! | [`Field::lookup_member`] | dotted sub-path to the field governing it |
//!
//! Fields that need the store (lazy dereference, sequence allocation, blob replacement)
//! do so through the async [`Field::resolve`] and [`Field::assign`] hooks, which
//! [`DocumentStore`](crate::store::DocumentStore) runs when reading and writing
//! entity attributes.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::field::{FieldExt, string::StringField, number::IntField};
//!
//! let title = StringField::new().max_length(120).required();
//! let views = IntField::new().min_value(0).with_default(0);
//! ```

pub mod composite;
pub mod datetime;
pub mod embedded;
pub mod file;
pub mod image;
pub mod number;
pub mod reference;
pub mod scalar;
pub mod sequence;
pub mod string;

use std::{
    any::Any,
    fmt::{self, Debug},
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use bson::Bson;

use crate::{
    backend::DynStoreBackend,
    error::{ModelError, ModelResult, ValidationError},
    query::QueryOp,
    value::Value,
};

use self::{file::BlobField, reference::DeletePolicy};

/// Produces a field's default value.
#[derive(Clone)]
pub enum DefaultValue {
    /// A fixed value, cloned for every new entity.
    Value(Value),
    /// A factory invoked for every new entity.
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(value) => value.clone(),
            DefaultValue::Factory(factory) => factory(),
        }
    }
}

impl Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Declaration options shared by every field kind.
#[derive(Debug, Clone, Default)]
pub struct FieldOptions {
    /// Storage key, when it differs from the attribute name.
    pub db_field: Option<String>,
    /// Unset values (null, empty list, empty map) fail validation.
    pub required: bool,
    pub default: Option<DefaultValue>,
    /// Enumerated set of accepted values.
    pub choices: Option<Vec<Value>>,
    /// Advisory flag for index builders.
    pub unique: bool,
}

/// The entity type a field is declared on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOwner {
    pub type_name: String,
    /// `None` for embedded types.
    pub collection: Option<String>,
}

/// State every field carries: its options and, once bound, its name and owner.
#[derive(Debug, Default)]
pub struct FieldCore {
    options: FieldOptions,
    name: OnceLock<String>,
    owner: OnceLock<FieldOwner>,
}

impl FieldCore {
    pub fn new(options: FieldOptions) -> Self {
        Self {
            options,
            name: OnceLock::new(),
            owner: OnceLock::new(),
        }
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut FieldOptions {
        &mut self.options
    }

    /// Attribute name, once bound to an owner.
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    pub fn owner(&self) -> Option<&FieldOwner> {
        self.owner.get()
    }

    /// Storage key: the explicit `db_field`, else the attribute name.
    pub fn db_field(&self) -> &str {
        self.options
            .db_field
            .as_deref()
            .or_else(|| self.name())
            .unwrap_or_default()
    }

    pub fn is_required(&self) -> bool {
        self.options.required
    }

    pub fn default_value(&self) -> Option<Value> {
        self.options.default.as_ref().map(DefaultValue::produce)
    }

    /// Records the owner and attribute name. Binding again to the same slot is a no-op.
    pub fn bind(&self, owner: &FieldOwner, name: &str) -> ModelResult<()> {
        let bound_name = self.name.get_or_init(|| name.to_string());
        let bound_owner = self.owner.get_or_init(|| owner.clone());

        if bound_name != name || bound_owner != owner {
            return Err(ModelError::Configuration(format!(
                "field {}.{} is already bound to {}.{}",
                owner.type_name, name, bound_owner.type_name, bound_name
            )));
        }

        Ok(())
    }

    /// Builds a validation error attributed to this field.
    pub fn error(&self, message: impl Into<String>) -> ValidationError {
        self.attribute(ValidationError::new(message))
    }

    /// Attributes an error raised elsewhere to this field, keeping any inner attribution.
    pub fn attribute(&self, error: ValidationError) -> ValidationError {
        match self.name() {
            Some(name) => error.with_field(name),
            None => error,
        }
    }
}

/// What a read hook did to the stored slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// The slot was returned as is.
    Unchanged,
    /// A handle was replaced by the fetched value. Not a semantic change.
    Cached,
    /// A new value was produced and must be persisted.
    Generated,
    /// Resolution failed; readers see `Value::Null` while the slot keeps its handle.
    Missing,
}

impl Resolved {
    /// Combines element outcomes of a container. Failed elements keep their handles.
    pub(crate) fn merge(self, other: Resolved) -> Resolved {
        match (self, other) {
            (Resolved::Generated, _) | (_, Resolved::Generated) => Resolved::Generated,
            (Resolved::Cached, _) | (_, Resolved::Cached) => Resolved::Cached,
            _ => Resolved::Unchanged,
        }
    }
}

/// Store access and entity state handed to the async hooks.
#[derive(Clone, Copy)]
pub struct FieldContext<'a> {
    pub backend: &'a dyn DynStoreBackend,
    /// Whether the owning entity finished construction.
    pub initialised: bool,
}

impl Debug for FieldContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldContext")
            .field("initialised", &self.initialised)
            .finish_non_exhaustive()
    }
}

/// A typed accessor governing conversion and validation for one entity attribute.
#[async_trait]
pub trait Field: Send + Sync + Debug + 'static {
    fn core(&self) -> &FieldCore;

    fn core_mut(&mut self) -> &mut FieldCore;

    /// Name of the field kind, used in error messages.
    fn type_name(&self) -> &'static str;

    /// Checks a native value against the field's contract. Must not touch the store.
    fn validate(&self, value: &Value) -> Result<(), ValidationError>;

    /// Converts a validated native value to storage form.
    fn to_storage(&self, value: &Value) -> ModelResult<Bson>;

    /// Converts storage-form or already-native input to native form.
    fn to_native(&self, value: Value) -> ModelResult<Value>;

    /// Converts a filter value for `op` into the form the query builder embeds.
    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson>;

    /// Resolves a sub-path of a composite value to the field governing it.
    fn lookup_member(&self, _name: &str) -> Option<Arc<dyn Field>> {
        None
    }

    /// Binds the field (and any child fields) to its owner.
    fn bind(&self, owner: &FieldOwner, name: &str) -> ModelResult<()> {
        self.core().bind(owner, name)
    }

    /// Target type name and deletion policy, for reference fields.
    fn delete_rule(&self) -> Option<(String, DeletePolicy)> {
        None
    }

    /// Blob-backed fields expose their proxy operations through this.
    fn as_blob_field(&self) -> Option<&dyn BlobField> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    /// Converts a raw storage value straight to native form.
    fn from_storage(&self, bson: Bson) -> ModelResult<Value> {
        self.to_native(Value::from(bson))
    }

    /// Checks that require I/O, run before persistence after [`Field::validate`] passed.
    async fn verify(&self, _value: &Value) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Read hook: may replace the slot (dereference) or fill it (sequence allocation).
    async fn resolve(&self, _slot: &mut Value, _ctx: &FieldContext<'_>) -> ModelResult<Resolved> {
        Ok(Resolved::Unchanged)
    }

    /// Write hook: stores `value` into the slot, possibly touching the store first.
    async fn assign(&self, slot: &mut Value, value: Value, _ctx: &FieldContext<'_>) -> ModelResult<()> {
        *slot = self.to_native(value)?;
        Ok(())
    }
}

impl dyn Field {
    /// Attempts to downcast to a concrete field type.
    pub fn downcast_ref<F: Field>(&self) -> Option<&F> {
        self.as_any().downcast_ref::<F>()
    }
}

/// Builder methods for the options every field shares.
pub trait FieldExt: Field + Sized {
    /// Unset values fail validation.
    fn required(mut self) -> Self {
        self.core_mut().options_mut().required = true;
        self
    }

    /// Stores the field under `name` instead of its attribute name.
    fn db_field(mut self, name: impl Into<String>) -> Self {
        self.core_mut().options_mut().db_field = Some(name.into());
        self
    }

    fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.core_mut().options_mut().default = Some(DefaultValue::Value(value.into()));
        self
    }

    fn with_default_fn<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.core_mut().options_mut().default = Some(DefaultValue::Factory(Arc::new(factory)));
        self
    }

    /// Restricts accepted values to the given set.
    fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.core_mut().options_mut().choices =
            Some(choices.into_iter().map(Into::into).collect());
        self
    }

    fn unique(mut self) -> Self {
        self.core_mut().options_mut().unique = true;
        self
    }
}

impl<F: Field> FieldExt for F {}

/// Full validation of an assigned value: required/unset handling, choices, then the
/// field's own contract. Errors are attributed to the field's name.
pub fn validate_field(field: &dyn Field, value: &Value) -> Result<(), ValidationError> {
    let core = field.core();

    if value.is_unset() {
        if core.is_required() {
            return Err(core.error("Field is required"));
        }
        if value.is_null() {
            return Ok(());
        }
    }

    if let Some(choices) = &core.options().choices {
        if !choices.contains(value) {
            return Err(core.error(format!(
                "Value must be one of {}",
                choices
                    .iter()
                    .map(|choice| choice.to_text().unwrap_or_else(|| format!("{choice:?}")))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
    }

    field.validate(value).map_err(|err| core.attribute(err))
}

/// Applies `convert` to each element when `op` takes a list of candidates.
pub(crate) fn prepare_each<F>(op: QueryOp, value: &Value, convert: F) -> ModelResult<Bson>
where
    F: Fn(&Value) -> ModelResult<Bson>,
{
    match value {
        Value::List(items) if op.takes_list() => Ok(Bson::Array(
            items
                .iter()
                .map(&convert)
                .collect::<ModelResult<Vec<_>>>()?,
        )),
        Value::Null => Ok(Bson::Null),
        other => convert(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{number::IntField, string::StringField};

    fn owner() -> FieldOwner {
        FieldOwner {
            type_name: "Post".to_string(),
            collection: Some("posts".to_string()),
        }
    }

    #[test]
    fn db_field_falls_back_to_bound_name() {
        let field = StringField::new();
        assert_eq!(field.core().db_field(), "");

        field.bind(&owner(), "title").unwrap();
        assert_eq!(field.core().db_field(), "title");

        let renamed = StringField::new().db_field("t");
        renamed.bind(&owner(), "title").unwrap();
        assert_eq!(renamed.core().db_field(), "t");
    }

    #[test]
    fn rebinding_to_another_slot_is_a_configuration_error() {
        let field = IntField::new();
        field.bind(&owner(), "views").unwrap();
        field.bind(&owner(), "views").unwrap();

        assert!(matches!(
            field.bind(&owner(), "likes"),
            Err(ModelError::Configuration(_))
        ));
    }

    #[test]
    fn required_rejects_unset_values() {
        let field = StringField::new().required();
        field.bind(&owner(), "title").unwrap();

        let err = validate_field(&field, &Value::Null).unwrap_err();
        assert_eq!(err.message, "Field is required");
        assert_eq!(err.field.as_deref(), Some("title"));
        assert!(validate_field(&field, &Value::from("hello")).is_ok());
    }

    #[test]
    fn choices_restrict_values() {
        let field = StringField::new().choices(["draft", "published"]);

        assert!(validate_field(&field, &Value::from("draft")).is_ok());
        assert!(validate_field(&field, &Value::from("deleted")).is_err());
        assert!(validate_field(&field, &Value::Null).is_ok());
    }

    #[test]
    fn default_factories_run_per_call() {
        let field = IntField::new().with_default_fn(|| Value::Int(7));
        assert_eq!(field.core().default_value(), Some(Value::Int(7)));
        assert_eq!(IntField::new().core().default_value(), None);
    }
}
