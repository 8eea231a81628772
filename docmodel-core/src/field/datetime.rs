//! Timestamp fields.
//!
//! [`DateTimeField`] uses the store's native datetime type, which keeps millisecond
//! precision only. [`ComplexDateTimeField`] keeps full microsecond precision in a
//! fixed-width string whose lexicographic order matches chronological order, so
//! range queries on it stay exact.

use std::any::Any;

use async_trait::async_trait;
use bson::Bson;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::{
    error::{ModelResult, ValidationError},
    field::{Field, FieldCore, prepare_each},
    query::QueryOp,
    value::{Value, datetime_to_bson},
};

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parses `YYYY-MM-DD[ HH:MM[:SS]][.micros]`.
///
/// The fractional suffix is read as an integer count of microseconds. Anything that
/// does not parse yields `None`.
pub fn parse_datetime(input: &str) -> Option<NaiveDateTime> {
    let (stamp, micros) = match input.split_once('.') {
        Some((stamp, fraction)) => (stamp, fraction.parse::<u32>().ok()?),
        None => (input, 0),
    };
    if micros > 999_999 {
        return None;
    }

    let parsed = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(stamp, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(stamp, "%Y-%m-%d")
                .ok()?
                .and_hms_opt(0, 0, 0)
        })?;

    parsed.with_nanosecond(micros * 1_000)
}

/// A timestamp stored natively. Sub-millisecond precision is lost on storage.
#[derive(Debug, Default)]
pub struct DateTimeField {
    core: FieldCore,
}

impl DateTimeField {
    pub fn new() -> Self {
        Self::default()
    }

    fn storage_value(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::DateTime(dt) => Ok(datetime_to_bson(dt)),
            Value::String(s) => Ok(parse_datetime(s)
                .map(|dt| datetime_to_bson(&dt))
                .unwrap_or(Bson::Null)),
            Value::Null => Ok(Bson::Null),
            other => Err(self.core.error(format!("cannot parse date \"{other:?}\"")).into()),
        }
    }
}

#[async_trait]
impl Field for DateTimeField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "DateTimeField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::DateTime(_) => Ok(()),
            other => Err(self.core.error(format!(
                "cannot parse date \"{}\"",
                other.to_text().unwrap_or_else(|| other.type_label().to_string())
            ))),
        }
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        self.storage_value(value)
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(match value {
            Value::String(s) => parse_datetime(&s).map(Value::DateTime).unwrap_or(Value::Null),
            other => other,
        })
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        if op == QueryOp::Exists {
            return value.to_bson();
        }
        prepare_each(op, value, |item| self.storage_value(item))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A timestamp stored as `YYYY,MM,DD,HH,MM,SS,NNNNNN`.
///
/// Every component is zero-padded to the width of its largest value, so comparing two
/// stored strings orders them chronologically.
#[derive(Debug)]
pub struct ComplexDateTimeField {
    core: FieldCore,
    separator: String,
}

impl Default for ComplexDateTimeField {
    fn default() -> Self {
        Self {
            core: FieldCore::default(),
            separator: ",".to_string(),
        }
    }
}

impl ComplexDateTimeField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Renders a timestamp in the order-preserving storage layout.
    pub fn format(&self, dt: &NaiveDateTime) -> String {
        let sep = &self.separator;
        format!(
            "{:04}{sep}{:02}{sep}{:02}{sep}{:02}{sep}{:02}{sep}{:02}{sep}{:06}",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            dt.nanosecond() / 1_000 % 1_000_000,
        )
    }

    /// Parses the storage layout back into a timestamp.
    pub fn parse(&self, data: &str) -> Result<NaiveDateTime, ValidationError> {
        let invalid = || {
            self.core
                .error(format!("Could not parse \"{data}\" as a complex datetime"))
        };

        let parts = data
            .split(self.separator.as_str())
            .map(|part| part.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let [year, month, day, hour, minute, second, micros] = parts[..] else {
            return Err(invalid());
        };

        NaiveDate::from_ymd_opt(year as i32, month, day)
            .and_then(|date| date.and_hms_micro_opt(hour, minute, second, micros))
            .ok_or_else(invalid)
    }

    fn storage_value(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::DateTime(dt) => Ok(Bson::String(self.format(dt))),
            Value::String(s) => Ok(Bson::String(s.clone())),
            Value::Null => Ok(Bson::Null),
            _ => Err(self
                .core
                .error("Only datetime objects may used in a ComplexDateTimeField")
                .into()),
        }
    }
}

#[async_trait]
impl Field for ComplexDateTimeField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "ComplexDateTimeField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::DateTime(_) => Ok(()),
            _ => Err(self
                .core
                .error("Only datetime objects may used in a ComplexDateTimeField")),
        }
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        self.storage_value(value)
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        match value {
            Value::String(s) => Ok(Value::DateTime(self.parse(&s)?)),
            other => Ok(other),
        }
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        if op == QueryOp::Exists {
            return value.to_bson();
        }
        prepare_each(op, value, |item| self.storage_value(item))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(micros: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 6, 8)
            .unwrap()
            .and_hms_micro_opt(20, 26, 24, micros)
            .unwrap()
    }

    #[test]
    fn string_inputs_are_parsed_in_order_of_precision() {
        assert_eq!(parse_datetime("2011-06-08 20:26:24"), Some(at(0)));
        assert_eq!(parse_datetime("2011-06-08 20:26:24.192284"), Some(at(192_284)));
        assert_eq!(
            parse_datetime("2011-06-08 20:26"),
            NaiveDate::from_ymd_opt(2011, 6, 8).unwrap().and_hms_opt(20, 26, 0)
        );
        assert_eq!(
            parse_datetime("2011-06-08"),
            NaiveDate::from_ymd_opt(2011, 6, 8).unwrap().and_hms_opt(0, 0, 0)
        );
    }

    #[test]
    fn unparsable_strings_become_null() {
        let field = DateTimeField::new();

        assert_eq!(parse_datetime("yesterday"), None);
        assert_eq!(parse_datetime("2011-06-08 20:26:24.1.2"), None);
        assert_eq!(field.to_native(Value::from("garbage")).unwrap(), Value::Null);
        assert_eq!(field.to_storage(&Value::from("garbage")).unwrap(), Bson::Null);
    }

    #[test]
    fn storage_truncates_to_milliseconds() {
        let field = DateTimeField::new();
        let original = Value::DateTime(at(192_284));

        let loaded = field
            .from_storage(field.to_storage(&original).unwrap())
            .unwrap();

        assert_ne!(loaded, original);
        assert_eq!(loaded, Value::DateTime(at(192_000)));

        let whole_millis = Value::DateTime(at(192_000));
        assert_eq!(
            field
                .from_storage(field.to_storage(&whole_millis).unwrap())
                .unwrap(),
            whole_millis
        );
    }

    #[test]
    fn complex_storage_orders_lexicographically() {
        let field = ComplexDateTimeField::new();
        let (a, b) = (at(192), at(192_284));
        assert!(a < b);

        let (sa, sb) = (field.format(&a), field.format(&b));
        assert_eq!(sa, "2011,06,08,20,26,24,000192");
        assert_eq!(sb, "2011,06,08,20,26,24,192284");
        assert!(sa < sb);
    }

    #[test]
    fn complex_round_trip_keeps_microseconds() {
        let field = ComplexDateTimeField::new().separator("-");
        let value = Value::DateTime(at(192_284));

        let stored = field.to_storage(&value).unwrap();
        assert_eq!(stored, Bson::String("2011-06-08-20-26-24-192284".to_string()));
        assert_eq!(field.from_storage(stored).unwrap(), value);
        assert!(field.to_native(Value::from("2011,06")).is_err());
    }
}
