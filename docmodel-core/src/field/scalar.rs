//! Remaining scalar fields: booleans, UUIDs, raw bytes and geo points.

use std::any::Any;

use async_trait::async_trait;
use bson::{Binary, Bson, spec::BinarySubtype};

use crate::{
    error::{ModelResult, ValidationError},
    field::{Field, FieldCore, prepare_each},
    query::QueryOp,
    value::Value,
};

/// A strict boolean. Validation does not coerce truthy or falsy values.
#[derive(Debug, Default)]
pub struct BooleanField {
    core: FieldCore,
}

impl BooleanField {
    pub fn new() -> Self {
        Self::default()
    }
}

fn truthiness(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int(i) => Some(*i != 0),
        Value::Float(f) => Some(*f != 0.0),
        Value::String(s) => Some(!s.is_empty()),
        Value::List(items) => Some(!items.is_empty()),
        Value::Map(entries) => Some(!entries.is_empty()),
        _ => None,
    }
}

#[async_trait]
impl Field for BooleanField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "BooleanField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::Bool(_) => Ok(()),
            _ => Err(self.core.error("BooleanField only accepts boolean values")),
        }
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::Null => Ok(Bson::Null),
            other => truthiness(other)
                .map(Bson::Boolean)
                .ok_or_else(|| self.core.error("BooleanField only accepts boolean values").into()),
        }
    }

    /// Non-boolean input is passed through so that validation rejects it.
    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(value)
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_each(op, value, |item| self.to_storage(item))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Stored documents written by other clients may hold numbers or strings.
    fn from_storage(&self, bson: Bson) -> ModelResult<Value> {
        let value = Value::from(bson);
        Ok(truthiness(&value).map(Value::Bool).unwrap_or(value))
    }
}

/// A 128-bit UUID, stored as its hyphenated string.
#[derive(Debug, Default)]
pub struct UuidField {
    core: FieldCore,
}

impl UuidField {
    pub fn new() -> Self {
        Self::default()
    }

    fn convert(&self, value: &Value) -> Result<uuid::Uuid, ValidationError> {
        match value {
            Value::Uuid(id) => Ok(*id),
            Value::String(s) => uuid::Uuid::parse_str(s)
                .map_err(|e| self.core.error(format!("Could not convert to UUID: {e}"))),
            other => Err(self.core.error(format!(
                "Could not convert to UUID: unsupported {} value",
                other.type_label()
            ))),
        }
    }

    fn storage_value(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::Null => Ok(Bson::Null),
            other => Ok(Bson::String(self.convert(other)?.hyphenated().to_string())),
        }
    }
}

#[async_trait]
impl Field for UuidField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "UUIDField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.convert(value).map(|_| ())
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        self.storage_value(value)
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        match value {
            Value::String(_) => Ok(Value::Uuid(self.convert(&value)?)),
            other => Ok(other),
        }
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_each(op, value, |item| self.storage_value(item))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Raw bytes with an optional size limit.
#[derive(Debug, Default)]
pub struct BinaryField {
    core: FieldCore,
    max_bytes: Option<usize>,
}

impl BinaryField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}

#[async_trait]
impl Field for BinaryField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "BinaryField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let Value::Bytes(bytes) = value else {
            return Err(self.core.error("BinaryField only accepts binary values"));
        };
        if self.max_bytes.is_some_and(|max| bytes.len() > max) {
            return Err(self.core.error("Binary value is too long"));
        }
        Ok(())
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::Bytes(bytes) => Ok(Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: bytes.clone(),
            })),
            Value::Null => Ok(Bson::Null),
            _ => Err(self.core.error("BinaryField only accepts binary values").into()),
        }
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(match value {
            Value::String(s) => Value::Bytes(s.into_bytes()),
            other => other,
        })
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_each(op, value, |item| self.to_storage(item))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A two-dimensional `[x, y]` point.
#[derive(Debug, Default)]
pub struct GeoPointField {
    core: FieldCore,
}

impl GeoPointField {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Field for GeoPointField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "GeoPointField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let Value::List(point) = value else {
            return Err(self
                .core
                .error("GeoPointField can only accept tuples or lists of (x, y)"));
        };
        if point.len() != 2 {
            return Err(self.core.error("Value must be a two-dimensional point"));
        }
        if point.iter().any(|coordinate| coordinate.as_f64().is_none()) {
            return Err(self.core.error("Both values in point must be float or int"));
        }
        Ok(())
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        value.to_bson()
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(value)
    }

    fn prepare_query_value(&self, _op: QueryOp, value: &Value) -> ModelResult<Bson> {
        value.to_bson()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entity::Entity, schema::EntityType};

    #[test]
    fn boolean_validation_is_strict() {
        let field = BooleanField::new();

        assert!(field.validate(&Value::Bool(false)).is_ok());
        assert!(field.validate(&Value::Int(1)).is_err());
        assert!(field.validate(&Value::from("true")).is_err());
        assert_eq!(field.to_native(Value::Int(0)).unwrap(), Value::Int(0));
        assert_eq!(field.from_storage(Bson::Int32(0)).unwrap(), Value::Bool(false));
        assert_eq!(
            field.from_storage(field.to_storage(&Value::Bool(true)).unwrap()).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn boolean_assignment_rejects_truthy_values() {
        let ty = EntityType::builder("StrictFlagHolder")
            .field("flag", BooleanField::new())
            .build()
            .unwrap();
        let mut entity = Entity::new(&ty);

        for value in [Value::Int(1), Value::from("true"), Value::from("false"), Value::list([1])] {
            let err = entity.set("flag", value).unwrap_err();
            assert_eq!(
                err.as_validation().unwrap().message,
                "BooleanField only accepts boolean values"
            );
        }
        assert_eq!(entity.get("flag").unwrap(), &Value::Null);

        entity.set("flag", false).unwrap();
        assert_eq!(entity.get("flag").unwrap(), &Value::Bool(false));
        assert!(entity.validate().is_ok());
    }

    #[test]
    fn uuid_accepts_strings_and_stores_hyphenated() {
        let field = UuidField::new();
        let id = uuid::Uuid::new_v4();

        assert!(field.validate(&Value::from(id.to_string())).is_ok());
        assert!(field.validate(&Value::from("not-a-uuid")).is_err());

        let stored = field.to_storage(&Value::Uuid(id)).unwrap();
        assert_eq!(stored, Bson::String(id.hyphenated().to_string()));
        assert_eq!(field.from_storage(stored).unwrap(), Value::Uuid(id));
    }

    #[test]
    fn binary_size_limit() {
        let field = BinaryField::new().max_bytes(3);

        assert!(field.validate(&Value::Bytes(vec![1, 2, 3])).is_ok());
        assert_eq!(
            field.validate(&Value::Bytes(vec![1, 2, 3, 4])).unwrap_err().message,
            "Binary value is too long"
        );
        assert!(field.validate(&Value::from("abc")).is_err());

        let value = Value::Bytes(vec![0, 255]);
        assert_eq!(
            field.from_storage(field.to_storage(&value).unwrap()).unwrap(),
            value
        );
    }

    #[test]
    fn geo_point_shape() {
        let field = GeoPointField::new();

        assert!(field.validate(&Value::list([1.5, 2.0])).is_ok());
        assert!(field.validate(&Value::list([Value::Int(1), Value::Float(2.0)])).is_ok());
        assert!(field.validate(&Value::list([1.0])).is_err());
        assert!(field.validate(&Value::list(["a", "b"])).is_err());
        assert!(field.validate(&Value::Float(1.0)).is_err());
    }
}
