//! Typed field validation and value conversion for document databases.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Value model** ([`value`]) - Native values and their generic storage conversions
//! - **Fields** ([`field`]) - The [`Field`](field::Field) contract and every field family
//! - **Entity types** ([`schema`]) - Named, ordered sets of bound fields
//! - **Entities** ([`entity`]) - Typed attribute values with change tracking
//! - **Type registry** ([`registry`]) - Resolution of types named by string
//! - **Query operators** ([`query`]) - Operators consumed by field query conversion
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Document store** ([`store`]) - Persistence and store-aware attribute access
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmodel_core::{
//!     entity::Entity,
//!     field::{FieldExt, composite::ListField, number::IntField, string::StringField},
//!     schema::EntityType,
//! };
//!
//! let post = EntityType::builder("BlogPost")
//!     .collection("posts")
//!     .field("title", StringField::new().max_length(120).required())
//!     .field("views", IntField::new().min_value(0).with_default(0))
//!     .field("tags", ListField::of(StringField::new()))
//!     .build()?;
//!
//! let mut entity = Entity::new(&post);
//! entity.set("title", "Hello")?;
//! entity.validate()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod entity;
pub mod error;
pub mod field;
pub mod query;
pub mod registry;
pub mod schema;
pub mod store;
pub mod value;
