//! Numeric fields: 64-bit integers, doubles and fixed-point decimals.

use std::{any::Any, str::FromStr};

use async_trait::async_trait;
use bson::Bson;
use rust_decimal::{Decimal, prelude::FromPrimitive};

use crate::{
    error::{ModelResult, ValidationError},
    field::{Field, FieldCore, prepare_each},
    query::QueryOp,
    value::Value,
};

/// Integer parse, truncating floats the way a numeric cast does.
fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Decimal(d) => d.trunc().to_string().parse().ok(),
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_decimal(value: &Value) -> Result<Decimal, String> {
    match value {
        Value::Decimal(d) => Ok(*d),
        Value::Int(i) => Ok(Decimal::from(*i)),
        Value::Float(f) => Decimal::from_f64(*f).ok_or_else(|| format!("{f} is not representable")),
        Value::String(s) => Decimal::from_str(s.trim()).map_err(|e| e.to_string()),
        other => Err(format!("{} is not a number", other.type_label())),
    }
}

/// Passes the operand through untouched for operators that do not compare values.
fn structural_operand(op: QueryOp, value: &Value) -> Option<ModelResult<Bson>> {
    matches!(op, QueryOp::Exists | QueryOp::Size).then(|| value.to_bson())
}

/// A 64-bit signed integer with optional bounds.
#[derive(Debug, Default)]
pub struct IntField {
    core: FieldCore,
    min_value: Option<i64>,
    max_value: Option<i64>,
}

impl IntField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_value(mut self, min_value: i64) -> Self {
        self.min_value = Some(min_value);
        self
    }

    pub fn max_value(mut self, max_value: i64) -> Self {
        self.max_value = Some(max_value);
        self
    }

    fn convert(&self, value: &Value) -> Result<i64, ValidationError> {
        coerce_int(value).ok_or_else(|| {
            self.core.error(format!(
                "{} could not be converted to int",
                value.to_text().unwrap_or_else(|| value.type_label().to_string())
            ))
        })
    }
}

#[async_trait]
impl Field for IntField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "IntField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let number = self.convert(value)?;

        if self.min_value.is_some_and(|min| number < min) {
            return Err(self.core.error("Integer value is too small"));
        }
        if self.max_value.is_some_and(|max| number > max) {
            return Err(self.core.error("Integer value is too large"));
        }

        Ok(())
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::Null => Ok(Bson::Null),
            other => Ok(Bson::Int64(self.convert(other)?)),
        }
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(coerce_int(&value).map(Value::Int).unwrap_or(value))
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        if let Some(operand) = structural_operand(op, value) {
            return operand;
        }
        prepare_each(op, value, |item| Ok(Bson::Int64(self.convert(item)?)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A double-precision float with optional bounds. Integers widen implicitly.
#[derive(Debug, Default)]
pub struct FloatField {
    core: FieldCore,
    min_value: Option<f64>,
    max_value: Option<f64>,
}

impl FloatField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_value(mut self, min_value: f64) -> Self {
        self.min_value = Some(min_value);
        self
    }

    pub fn max_value(mut self, max_value: f64) -> Self {
        self.max_value = Some(max_value);
        self
    }

    fn convert(&self, value: &Value) -> Result<f64, ValidationError> {
        value
            .as_f64()
            .ok_or_else(|| self.core.error("FloatField only accepts float values"))
    }
}

#[async_trait]
impl Field for FloatField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "FloatField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let number = self.convert(value)?;

        if self.min_value.is_some_and(|min| number < min) {
            return Err(self.core.error("Float value is too small"));
        }
        if self.max_value.is_some_and(|max| number > max) {
            return Err(self.core.error("Float value is too large"));
        }

        Ok(())
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::Null => Ok(Bson::Null),
            other => Ok(Bson::Double(self.convert(other)?)),
        }
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(coerce_float(&value).map(Value::Float).unwrap_or(value))
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        if let Some(operand) = structural_operand(op, value) {
            return operand;
        }
        prepare_each(op, value, |item| {
            coerce_float(item)
                .map(Bson::Double)
                .ok_or_else(|| self.core.error("FloatField only accepts float values").into())
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A fixed-point decimal, stored as its canonical string rendering.
#[derive(Debug, Default)]
pub struct DecimalField {
    core: FieldCore,
    min_value: Option<Decimal>,
    max_value: Option<Decimal>,
}

impl DecimalField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_value(mut self, min_value: Decimal) -> Self {
        self.min_value = Some(min_value);
        self
    }

    pub fn max_value(mut self, max_value: Decimal) -> Self {
        self.max_value = Some(max_value);
        self
    }

    fn convert(&self, value: &Value) -> Result<Decimal, ValidationError> {
        coerce_decimal(value).map_err(|reason| {
            self.core
                .error(format!("Could not convert value to decimal: {reason}"))
        })
    }
}

#[async_trait]
impl Field for DecimalField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "DecimalField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let number = self.convert(value)?;

        if self.min_value.is_some_and(|min| number < min) {
            return Err(self.core.error("Decimal value is too small"));
        }
        if self.max_value.is_some_and(|max| number > max) {
            return Err(self.core.error("Decimal value is too large"));
        }

        Ok(())
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::Null => Ok(Bson::Null),
            other => Ok(Bson::String(self.convert(other)?.to_string())),
        }
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            other => Ok(Value::Decimal(self.convert(&other)?)),
        }
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        if let Some(operand) = structural_operand(op, value) {
            return operand;
        }
        prepare_each(op, value, |item| Ok(Bson::String(self.convert(item)?.to_string())))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;

    #[test]
    fn int_truncates_floats_and_parses_strings() {
        let field = IntField::new();

        assert_eq!(field.to_native(Value::Float(3.9)).unwrap(), Value::Int(3));
        assert_eq!(field.to_native(Value::from("42")).unwrap(), Value::Int(42));
        assert!(field.validate(&Value::from("4.2")).is_err());
        assert!(field.validate(&Value::from("nope")).is_err());
    }

    #[test]
    fn int_bounds() {
        let field = IntField::new().min_value(0).max_value(10);

        assert!(field.validate(&Value::Int(10)).is_ok());
        assert_eq!(
            field.validate(&Value::Int(-1)).unwrap_err().message,
            "Integer value is too small"
        );
        assert_eq!(
            field.validate(&Value::Int(11)).unwrap_err().message,
            "Integer value is too large"
        );
    }

    #[test]
    fn int_round_trip_and_query_lists() {
        let field = IntField::new();
        let stored = field.to_storage(&Value::Int(7)).unwrap();

        assert_eq!(stored, Bson::Int64(7));
        assert_eq!(field.from_storage(stored).unwrap(), Value::Int(7));
        assert_eq!(field.from_storage(Bson::Int32(7)).unwrap(), Value::Int(7));
        assert_eq!(
            field
                .prepare_query_value(QueryOp::In, &Value::list(["1", "2"]))
                .unwrap(),
            Bson::Array(vec![Bson::Int64(1), Bson::Int64(2)])
        );
    }

    #[test]
    fn float_widens_integers() {
        let field = FloatField::new().max_value(1.5);

        assert!(field.validate(&Value::Int(1)).is_ok());
        assert!(field.validate(&Value::Int(2)).is_err());
        assert!(field.validate(&Value::from("1.0")).is_err());
        assert_eq!(field.to_native(Value::Int(1)).unwrap(), Value::Float(1.0));
        assert_eq!(field.to_storage(&Value::Int(1)).unwrap(), Bson::Double(1.0));
    }

    #[test]
    fn decimal_is_stored_as_canonical_string() {
        let field = DecimalField::new();
        let value = Value::Decimal(Decimal::from_str("12.50").unwrap());

        let stored = field.to_storage(&value).unwrap();
        assert_eq!(stored, Bson::String("12.50".to_string()));
        assert_eq!(field.from_storage(stored).unwrap(), value);
        assert_eq!(
            field.prepare_query_value(QueryOp::Gte, &Value::Int(3)).unwrap(),
            Bson::String("3".to_string())
        );
    }

    #[test]
    fn malformed_decimal_is_a_validation_error() {
        let field = DecimalField::new().min_value(Decimal::ZERO);

        let err = field.validate(&Value::from("1.2.3")).unwrap_err();
        assert!(err.message.starts_with("Could not convert value to decimal"));
        assert!(matches!(
            field.to_native(Value::from("abc")),
            Err(ModelError::Validation(_))
        ));
        assert_eq!(
            field.validate(&Value::from("-0.01")).unwrap_err().message,
            "Decimal value is too small"
        );
    }
}
