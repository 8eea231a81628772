//! Text fields: free-form strings, URLs and e-mail addresses.

use std::{any::Any, time::Duration};

use async_trait::async_trait;
use bson::Bson;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::{
    error::{ModelError, ModelResult, ValidationError},
    field::{Field, FieldCore},
    query::QueryOp,
    value::Value,
};

/// Timeout applied to URL reachability checks unless overridden.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^https?://",
        r"(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+[A-Z]{2,6}\.?|",
        r"localhost|",
        r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
        r"(?::\d+)?",
        r"(?:/?|[/?]\S+)$",
    ))
    .expect("URL pattern compiles")
});

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)(^[-!#$%&'*+/=?^_`{}|~0-9A-Z]+(\.[-!#$%&'*+/=?^_`{}|~0-9A-Z]+)*",
        r#"|^"([\x01-\x08\x0B\x0C\x0E-\x1F!#-\[\]-\x7F]|\\[\x01-\x09\x0B\x0C\x0E-\x7F])*""#,
        r")@(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+[A-Z]{2,6}\.?$",
    ))
    .expect("e-mail pattern compiles")
});

/// A unicode string with optional length bounds and pattern constraint.
#[derive(Debug, Default)]
pub struct StringField {
    core: FieldCore,
    regex: Option<Regex>,
    max_length: Option<usize>,
    min_length: Option<usize>,
}

impl StringField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    /// Requires values to match `pattern` from their first character.
    ///
    /// Only the start is anchored; add `$` to the pattern to anchor the end.
    pub fn regex(mut self, pattern: &str) -> ModelResult<Self> {
        let compiled = Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
            ModelError::Configuration(format!("invalid validation regex {pattern:?}: {e}"))
        })?;
        self.regex = Some(compiled);
        Ok(self)
    }

    fn check(&self, value: &Value) -> Result<(), ValidationError> {
        let Value::String(s) = value else {
            return Err(self.core.error("StringField only accepts string values"));
        };

        let length = s.chars().count();
        if self.max_length.is_some_and(|max| length > max) {
            return Err(self.core.error("String value is too long"));
        }
        if self.min_length.is_some_and(|min| length < min) {
            return Err(self.core.error("String value is too short"));
        }
        if let Some(regex) = &self.regex {
            if !regex.is_match(s) {
                return Err(self.core.error("String value did not match validation regex"));
            }
        }

        Ok(())
    }
}

/// Shared by every text field: pattern operators become escaped regular expressions.
pub(crate) fn prepare_text_query(op: QueryOp, value: &Value) -> ModelResult<Bson> {
    if let (true, Value::String(literal)) = (op.is_match(), value) {
        if let Some(pattern) = op.pattern(literal) {
            return Ok(pattern);
        }
    }
    value.to_bson()
}

fn text_to_native(value: Value) -> Value {
    match value {
        Value::String(_) | Value::Null => value,
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Value::String(s),
            Err(err) => Value::Bytes(err.into_bytes()),
        },
        other => other.to_text().map(Value::String).unwrap_or(other),
    }
}

#[async_trait]
impl Field for StringField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "StringField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.check(value)
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        value.to_bson()
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(text_to_native(value))
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_text_query(op, value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A string that must be an `http(s)` URL, optionally checked for reachability.
#[derive(Debug)]
pub struct UrlField {
    inner: StringField,
    verify_exists: bool,
    verify_timeout: Duration,
}

impl Default for UrlField {
    fn default() -> Self {
        Self {
            inner: StringField::default(),
            verify_exists: false,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }
}

impl UrlField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.inner = self.inner.max_length(max_length);
        self
    }

    /// Issue a request during validation; failures and non-2xx answers are invalid.
    pub fn verify_exists(mut self) -> Self {
        self.verify_exists = true;
        self
    }

    pub fn verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }
}

#[async_trait]
impl Field for UrlField {
    fn core(&self) -> &FieldCore {
        &self.inner.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.inner.core
    }

    fn type_name(&self) -> &'static str {
        "URLField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.inner.check(value)?;
        match value.as_str() {
            Some(url) if URL_REGEX.is_match(url) => Ok(()),
            Some(url) => Err(self.inner.core.error(format!("Invalid URL: {url}"))),
            None => Err(self.inner.core.error("StringField only accepts string values")),
        }
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        value.to_bson()
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(text_to_native(value))
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_text_query(op, value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn verify(&self, value: &Value) -> Result<(), ValidationError> {
        let (true, Some(url)) = (self.verify_exists, value.as_str()) else {
            return Ok(());
        };

        let broken = |reason: String| {
            self.inner
                .core
                .error(format!("This URL appears to be a broken link: {reason}"))
        };

        let client = reqwest::Client::builder()
            .timeout(self.verify_timeout)
            .build()
            .map_err(|e| broken(e.to_string()))?;

        debug!(url, "checking URL reachability");
        let response = client.get(url).send().await.map_err(|e| broken(e.to_string()))?;

        if !response.status().is_success() {
            return Err(broken(format!("HTTP status {}", response.status())));
        }

        Ok(())
    }
}

/// A string that must be an e-mail address.
#[derive(Debug, Default)]
pub struct EmailField {
    inner: StringField,
}

impl EmailField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.inner = self.inner.max_length(max_length);
        self
    }
}

#[async_trait]
impl Field for EmailField {
    fn core(&self) -> &FieldCore {
        &self.inner.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.inner.core
    }

    fn type_name(&self) -> &'static str {
        "EmailField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.inner.check(value)?;
        match value.as_str() {
            Some(address) if EMAIL_REGEX.is_match(address) => Ok(()),
            Some(address) => Err(self.inner.core.error(format!("Invalid Mail-address: {address}"))),
            None => Err(self.inner.core.error("StringField only accepts string values")),
        }
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        value.to_bson()
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(text_to_native(value))
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_text_query(op, value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn length_bounds_are_enforced() {
        let field = StringField::new().min_length(2).max_length(4);

        assert!(field.validate(&Value::from("abc")).is_ok());
        assert_eq!(
            field.validate(&Value::from("abcde")).unwrap_err().message,
            "String value is too long"
        );
        assert_eq!(
            field.validate(&Value::from("a")).unwrap_err().message,
            "String value is too short"
        );
        assert!(field.validate(&Value::Int(3)).is_err());
    }

    #[test]
    fn regex_anchors_only_the_start() {
        let field = StringField::new().regex(r"\d+").unwrap();
        assert!(field.validate(&Value::from("123abc")).is_ok());
        assert!(field.validate(&Value::from("abc123")).is_err());

        let anchored = StringField::new().regex(r"\d+$").unwrap();
        assert!(anchored.validate(&Value::from("123abc")).is_err());
    }

    #[test]
    fn invalid_regex_is_a_configuration_error() {
        assert!(matches!(
            StringField::new().regex("(unclosed"),
            Err(ModelError::Configuration(_))
        ));
    }

    #[test]
    fn pattern_operators_escape_the_literal() {
        let field = StringField::new();

        assert_eq!(
            field
                .prepare_query_value(QueryOp::StartsWith, &Value::from("abc"))
                .unwrap(),
            Bson::Document(doc! { "$regex": "^abc" })
        );
        assert_eq!(
            field
                .prepare_query_value(QueryOp::IEndsWith, &Value::from("X.Y"))
                .unwrap(),
            Bson::Document(doc! { "$regex": r"X\.Y$", "$options": "i" })
        );
        assert_eq!(
            field.prepare_query_value(QueryOp::Eq, &Value::from("a.b")).unwrap(),
            Bson::String("a.b".to_string())
        );
    }

    #[test]
    fn to_native_coerces_scalars_to_text() {
        let field = StringField::new();
        assert_eq!(field.to_native(Value::Int(5)).unwrap(), Value::from("5"));
        assert_eq!(
            field.to_native(Value::from("same")).unwrap(),
            Value::from("same")
        );
    }

    #[test]
    fn url_grammar() {
        let field = UrlField::new();

        for url in [
            "http://example.com",
            "https://sub.example.co.uk:8080/path?q=1",
            "http://localhost/",
            "http://127.0.0.1:27017",
        ] {
            assert!(field.validate(&Value::from(url)).is_ok(), "{url}");
        }
        for url in ["ftp://example.com", "example.com", "http://exa mple.com"] {
            assert!(field.validate(&Value::from(url)).is_err(), "{url}");
        }
    }

    #[test]
    fn email_grammar() {
        let field = EmailField::new();

        for address in ["ross@example.com", "first.last+tag@mail.example.org", "\"odd.name\"@example.com"] {
            assert!(field.validate(&Value::from(address)).is_ok(), "{address}");
        }
        for address in ["ross", "ross@", "@example.com", "ross@example"] {
            let err = field.validate(&Value::from(address)).unwrap_err();
            assert!(err.message.starts_with("Invalid Mail-address"), "{address}");
        }
    }

    #[tokio::test]
    async fn verification_is_skipped_unless_enabled() {
        let field = UrlField::new();
        assert!(field.verify(&Value::from("http://localhost:1/")).await.is_ok());
    }
}
