//! Container fields: lists, sorted lists, dictionaries and typed maps.
//!
//! Each container optionally wraps a child field that governs its elements. Without a
//! child, elements are converted generically and only entities are checked (embedded
//! ones are validated, documents must already be saved).

use std::{any::Any, cmp::Ordering, collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::{
    error::{ModelError, ModelResult, ValidationError},
    field::{
        DefaultValue, Field, FieldContext, FieldCore, FieldExt, FieldOptions, FieldOwner,
        Resolved, reference::{self, DeletePolicy}, string::prepare_text_query, validate_field,
    },
    query::QueryOp,
    value::{Value, unsaved_reference_error},
};

fn validate_untyped(value: &Value) -> Result<(), ValidationError> {
    match value {
        Value::Entity(entity) if entity.entity_type().is_embedded() => entity.validate(),
        Value::Entity(entity) if entity.id().is_none() => Err(unsaved_reference_error()),
        _ => Ok(()),
    }
}

fn validate_element(child: Option<&Arc<dyn Field>>, value: &Value) -> Result<(), ValidationError> {
    match child {
        Some(child) => validate_field(child.as_ref(), value),
        None => validate_untyped(value),
    }
}

fn element_to_storage(child: Option<&Arc<dyn Field>>, value: &Value) -> ModelResult<Bson> {
    match child {
        Some(child) => child.to_storage(value),
        None => value.to_bson(),
    }
}

fn element_to_native(child: Option<&Arc<dyn Field>>, value: Value) -> ModelResult<Value> {
    match child {
        Some(child) => child.to_native(value),
        None => value.resolve_untyped(),
    }
}

async fn resolve_element(
    child: Option<&Arc<dyn Field>>,
    slot: &mut Value,
    ctx: &FieldContext<'_>,
) -> ModelResult<Resolved> {
    match child {
        Some(child) => child.resolve(slot, ctx).await,
        None => reference::resolve_untyped(slot, ctx).await,
    }
}

fn invalid_items(
    core: &FieldCore,
    type_name: &str,
    errors: BTreeMap<String, ValidationError>,
) -> Result<(), ValidationError> {
    if errors.is_empty() {
        return Ok(());
    }
    let keys = errors.keys().cloned().collect::<Vec<_>>().join(", ");
    Err(core
        .error(format!("Invalid {type_name} item ({keys})"))
        .with_errors(errors))
}

/// An ordered sequence of values, optionally typed by a child field.
///
/// Defaults to an empty list; a required list must not be empty.
#[derive(Debug)]
pub struct ListField {
    core: FieldCore,
    child: Option<Arc<dyn Field>>,
}

impl Default for ListField {
    fn default() -> Self {
        Self {
            core: FieldCore::new(FieldOptions {
                default: Some(DefaultValue::Value(Value::List(Vec::new()))),
                ..FieldOptions::default()
            }),
            child: None,
        }
    }
}

impl ListField {
    /// An untyped list.
    pub fn new() -> Self {
        Self::default()
    }

    /// A list whose elements are governed by `child`.
    pub fn of(child: impl Field) -> Self {
        Self {
            child: Some(Arc::new(child)),
            ..Self::default()
        }
    }

    pub fn child(&self) -> Option<&Arc<dyn Field>> {
        self.child.as_ref()
    }

    fn check(&self, type_name: &str, value: &Value) -> Result<(), ValidationError> {
        let Value::List(items) = value else {
            return Err(self
                .core
                .error("Only lists and tuples may be used in a list field"));
        };

        let errors = items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                validate_element(self.child.as_ref(), item)
                    .err()
                    .map(|err| (index.to_string(), err))
            })
            .collect();

        invalid_items(&self.core, type_name, errors)
    }

    fn storage_items(&self, value: &Value) -> ModelResult<Option<Vec<Bson>>> {
        match value {
            Value::List(items) => Ok(Some(
                items
                    .iter()
                    .map(|item| element_to_storage(self.child.as_ref(), item))
                    .collect::<ModelResult<Vec<_>>>()?,
            )),
            Value::Null => Ok(None),
            _ => Err(self
                .core
                .error("Only lists and tuples may be used in a list field")
                .into()),
        }
    }

    fn prepare_element(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        match &self.child {
            Some(child) => child.prepare_query_value(op, value),
            None => value.to_bson(),
        }
    }
}

#[async_trait]
impl Field for ListField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "ListField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.check(self.type_name(), value)
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        Ok(self
            .storage_items(value)?
            .map(Bson::Array)
            .unwrap_or(Bson::Null))
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        match value {
            Value::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(|item| element_to_native(self.child.as_ref(), item))
                    .collect::<ModelResult<Vec<_>>>()?,
            )),
            other => Ok(other),
        }
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        match (op, value) {
            (QueryOp::Size | QueryOp::Exists, _) => value.to_bson(),
            (op, Value::List(items)) if op.is_update() || op.takes_list() => Ok(Bson::Array(
                items
                    .iter()
                    .map(|item| self.prepare_element(QueryOp::Eq, item))
                    .collect::<ModelResult<Vec<_>>>()?,
            )),
            (op, value) => self.prepare_element(op, value),
        }
    }

    fn lookup_member(&self, name: &str) -> Option<Arc<dyn Field>> {
        let child = self.child.as_ref()?;
        if name.parse::<usize>().is_ok() {
            return Some(child.clone());
        }
        child.lookup_member(name)
    }

    fn bind(&self, owner: &FieldOwner, name: &str) -> ModelResult<()> {
        self.core.bind(owner, name)?;
        match &self.child {
            Some(child) => child.bind(owner, name),
            None => Ok(()),
        }
    }

    fn delete_rule(&self) -> Option<(String, DeletePolicy)> {
        self.child.as_ref()?.delete_rule()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn verify(&self, value: &Value) -> Result<(), ValidationError> {
        if let (Some(child), Value::List(items)) = (&self.child, value) {
            for item in items {
                child.verify(item).await?;
            }
        }
        Ok(())
    }

    async fn resolve(&self, slot: &mut Value, ctx: &FieldContext<'_>) -> ModelResult<Resolved> {
        let Value::List(items) = slot else {
            return Ok(Resolved::Unchanged);
        };

        let mut outcome = Resolved::Unchanged;
        for item in items.iter_mut() {
            outcome = outcome.merge(resolve_element(self.child.as_ref(), item, ctx).await?);
        }
        Ok(outcome)
    }
}

/// Sort key adapter over storage values.
///
/// Numbers of any width compare numerically. Values of different kinds order by kind,
/// so every pair of elements has a defined order.
enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    String(&'a str),
    DateTime(bson::DateTime),
    Array(Vec<Comparable<'a>>),
    Other,
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            _ => Comparable::Other,
        }
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Array(_) => 3,
            Comparable::Bool(_) => 4,
            Comparable::DateTime(_) => 5,
            Comparable::Other => 6,
        }
    }

    fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.total_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.cmp(b),
            (Comparable::Array(a), Comparable::Array(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.total_cmp(y))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// A list whose storage form is sorted on every write.
///
/// Elements are ordered by the `ordering` key of each stored document when set,
/// otherwise by their own value. The in-memory order is left as assigned.
#[derive(Debug)]
pub struct SortedListField {
    list: ListField,
    ordering: Option<String>,
    reverse: bool,
}

impl SortedListField {
    pub fn of(child: impl Field) -> Self {
        Self {
            list: ListField::of(child),
            ordering: None,
            reverse: false,
        }
    }

    /// Sorts elements by this key of their stored document.
    pub fn ordering(mut self, key: impl Into<String>) -> Self {
        self.ordering = Some(key.into());
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    fn sort(&self, items: &mut [Bson]) {
        let key = |item: &Bson| -> Bson {
            match &self.ordering {
                Some(ordering) => item
                    .as_document()
                    .and_then(|document| document.get(ordering))
                    .cloned()
                    .unwrap_or(Bson::Null),
                None => item.clone(),
            }
        };

        items.sort_by(|a, b| {
            let (ka, kb) = (key(a), key(b));
            let ordering = Comparable::from(&ka).total_cmp(&Comparable::from(&kb));
            if self.reverse {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

#[async_trait]
impl Field for SortedListField {
    fn core(&self) -> &FieldCore {
        &self.list.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.list.core
    }

    fn type_name(&self) -> &'static str {
        "SortedListField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.list.check(self.type_name(), value)
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        let Some(mut items) = self.list.storage_items(value)? else {
            return Ok(Bson::Null);
        };
        self.sort(&mut items);
        Ok(Bson::Array(items))
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        self.list.to_native(value)
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        self.list.prepare_query_value(op, value)
    }

    fn lookup_member(&self, name: &str) -> Option<Arc<dyn Field>> {
        self.list.lookup_member(name)
    }

    fn bind(&self, owner: &FieldOwner, name: &str) -> ModelResult<()> {
        self.list.bind(owner, name)
    }

    fn delete_rule(&self) -> Option<(String, DeletePolicy)> {
        self.list.delete_rule()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn verify(&self, value: &Value) -> Result<(), ValidationError> {
        self.list.verify(value).await
    }

    async fn resolve(&self, slot: &mut Value, ctx: &FieldContext<'_>) -> ModelResult<Resolved> {
        self.list.resolve(slot, ctx).await
    }
}

/// A string-keyed mapping. Keys may not contain `.` or `$`.
///
/// Without a child field values are heterogeneous and converted generically.
#[derive(Debug)]
pub struct DictField {
    core: FieldCore,
    child: Option<Arc<dyn Field>>,
}

impl Default for DictField {
    fn default() -> Self {
        Self {
            core: FieldCore::new(FieldOptions {
                default: Some(DefaultValue::Value(Value::Map(BTreeMap::new()))),
                ..FieldOptions::default()
            }),
            child: None,
        }
    }
}

impl DictField {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dictionary whose values are governed by `child`.
    pub fn of(child: impl Field) -> Self {
        Self::with_child(Arc::new(child))
    }

    fn with_child(child: Arc<dyn Field>) -> Self {
        Self {
            child: Some(child),
            ..Self::default()
        }
    }

    fn check(&self, type_name: &str, value: &Value) -> Result<(), ValidationError> {
        let Value::Map(entries) = value else {
            return Err(self
                .core
                .error(format!("Only dictionaries may be used in a {type_name}")));
        };

        if entries.keys().any(|key| key.contains('.') || key.contains('$')) {
            return Err(self.core.error(
                "Invalid dictionary key name - keys may not contain \".\" or \"$\" characters",
            ));
        }

        let errors = entries
            .iter()
            .filter_map(|(key, item)| {
                validate_element(self.child.as_ref(), item)
                    .err()
                    .map(|err| (key.clone(), err))
            })
            .collect();

        invalid_items(&self.core, type_name, errors)
    }

    fn bind_child(&self, type_name: &str, owner: &FieldOwner, name: &str) -> ModelResult<()> {
        self.core.bind(owner, name)?;
        let Some(child) = &self.child else {
            return Ok(());
        };

        if let Some((_, policy)) = child.delete_rule() {
            if policy != DeletePolicy::DoNothing {
                return Err(ModelError::Configuration(format!(
                    "Reverse delete rules are not supported for {type_name} (field: {name})"
                )));
            }
        }
        child.bind(owner, name)
    }
}

#[async_trait]
impl Field for DictField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "DictField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.check(self.type_name(), value)
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        match value {
            Value::Map(entries) => {
                let mut document = Document::new();
                for (key, item) in entries {
                    document.insert(key.clone(), element_to_storage(self.child.as_ref(), item)?);
                }
                Ok(Bson::Document(document))
            }
            Value::Null => Ok(Bson::Null),
            _ => Err(self
                .core
                .error(format!("Only dictionaries may be used in a {}", self.type_name()))
                .into()),
        }
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        match value {
            Value::Map(entries) => Ok(Value::Map(
                entries
                    .into_iter()
                    .map(|(key, item)| Ok((key, element_to_native(self.child.as_ref(), item)?)))
                    .collect::<ModelResult<BTreeMap<_, _>>>()?,
            )),
            other => Ok(other),
        }
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        if op.is_match() && value.as_str().is_some() {
            return prepare_text_query(op, value);
        }
        match &self.child {
            Some(child) => child.prepare_query_value(op, value),
            None => value.to_bson(),
        }
    }

    fn lookup_member(&self, name: &str) -> Option<Arc<dyn Field>> {
        Some(Arc::new(DictField::new().db_field(name)))
    }

    fn bind(&self, owner: &FieldOwner, name: &str) -> ModelResult<()> {
        self.bind_child(self.type_name(), owner, name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn verify(&self, value: &Value) -> Result<(), ValidationError> {
        if let (Some(child), Value::Map(entries)) = (&self.child, value) {
            for item in entries.values() {
                child.verify(item).await?;
            }
        }
        Ok(())
    }

    async fn resolve(&self, slot: &mut Value, ctx: &FieldContext<'_>) -> ModelResult<Resolved> {
        let Value::Map(entries) = slot else {
            return Ok(Resolved::Unchanged);
        };

        let mut outcome = Resolved::Unchanged;
        for item in entries.values_mut() {
            outcome = outcome.merge(resolve_element(self.child.as_ref(), item, ctx).await?);
        }
        Ok(outcome)
    }
}

/// A dictionary whose every value must satisfy one child field.
#[derive(Debug)]
pub struct MapField {
    dict: DictField,
    child: Arc<dyn Field>,
}

impl MapField {
    pub fn of(child: impl Field) -> Self {
        let child: Arc<dyn Field> = Arc::new(child);
        Self {
            dict: DictField::with_child(child.clone()),
            child,
        }
    }

    pub fn child(&self) -> &Arc<dyn Field> {
        &self.child
    }
}

#[async_trait]
impl Field for MapField {
    fn core(&self) -> &FieldCore {
        &self.dict.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.dict.core
    }

    fn type_name(&self) -> &'static str {
        "MapField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.dict.check(self.type_name(), value)
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        self.dict.to_storage(value)
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        self.dict.to_native(value)
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        self.dict.prepare_query_value(op, value)
    }

    /// Members of a map are governed by its child field.
    fn lookup_member(&self, _name: &str) -> Option<Arc<dyn Field>> {
        Some(self.child.clone())
    }

    fn bind(&self, owner: &FieldOwner, name: &str) -> ModelResult<()> {
        self.dict.bind_child(self.type_name(), owner, name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn verify(&self, value: &Value) -> Result<(), ValidationError> {
        self.dict.verify(value).await
    }

    async fn resolve(&self, slot: &mut Value, ctx: &FieldContext<'_>) -> ModelResult<Resolved> {
        self.dict.resolve(slot, ctx).await
    }
}
