//! Sequence fields: integers allocated from an atomic counter record in the store.
//!
//! Counter records live in an auxiliary collection (`odm.counters` by default) with
//! the layout `{_id: "<collection>.<field>", next: <integer>}`. Allocation happens in
//! the read and write hooks, never in [`Field::to_native`]: an unset slot read from an
//! initialised entity, or an explicit `Value::Null` assigned to one, draws the next value.

use std::any::Any;

use async_trait::async_trait;
use bson::Bson;
use tracing::debug;

use crate::{
    backend::DynStoreBackend,
    error::{ModelError, ModelResult, ValidationError},
    field::{Field, FieldContext, FieldCore, FieldOwner, Resolved, number::IntField},
    query::QueryOp,
    value::Value,
};

/// Collection holding counter records unless configured otherwise.
pub const DEFAULT_COUNTER_COLLECTION: &str = "odm.counters";

/// An auto-incrementing integer.
#[derive(Debug)]
pub struct SequenceField {
    int: IntField,
    collection: String,
}

impl Default for SequenceField {
    fn default() -> Self {
        Self {
            int: IntField::new(),
            collection: DEFAULT_COUNTER_COLLECTION.to_string(),
        }
    }
}

impl SequenceField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps counter records in `collection` instead of `odm.counters`.
    pub fn counter_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Counter key: the owner's collection (or type name, for embedded owners) and the
    /// field name.
    pub fn sequence_key(&self) -> ModelResult<String> {
        let (Some(owner), Some(name)) = (self.int.core().owner(), self.int.core().name()) else {
            return Err(ModelError::Configuration(
                "a sequence field must be bound before it can allocate values".to_string(),
            ));
        };
        let FieldOwner {
            type_name,
            collection,
        } = owner;

        Ok(format!("{}.{name}", collection.as_deref().unwrap_or(type_name)))
    }

    /// Atomically increments the counter and returns the post-increment value.
    pub async fn generate_new_value(&self, backend: &dyn DynStoreBackend) -> ModelResult<i64> {
        let key = self.sequence_key()?;
        let next = backend.increment_counter(&self.collection, &key).await?;
        debug!(collection = %self.collection, key, next, "allocated sequence value");

        Ok(next)
    }
}

#[async_trait]
impl Field for SequenceField {
    fn core(&self) -> &FieldCore {
        self.int.core()
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        self.int.core_mut()
    }

    fn type_name(&self) -> &'static str {
        "SequenceField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.int.validate(value)
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        self.int.to_storage(value)
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        self.int.to_native(value)
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        self.int.prepare_query_value(op, value)
    }

    fn bind(&self, owner: &FieldOwner, name: &str) -> ModelResult<()> {
        self.int.bind(owner, name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn resolve(&self, slot: &mut Value, ctx: &FieldContext<'_>) -> ModelResult<Resolved> {
        if !is_unallocated(slot) || !ctx.initialised {
            return Ok(Resolved::Unchanged);
        }

        *slot = Value::Int(self.generate_new_value(ctx.backend).await?);
        Ok(Resolved::Generated)
    }

    async fn assign(&self, slot: &mut Value, value: Value, ctx: &FieldContext<'_>) -> ModelResult<()> {
        *slot = match value {
            value if ctx.initialised && is_unallocated(&value) => {
                Value::Int(self.generate_new_value(ctx.backend).await?)
            }
            other => self.int.to_native(other)?,
        };
        Ok(())
    }
}

/// Counters start at one, so zero marks a value that was never allocated.
fn is_unallocated(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Int(0))
}
