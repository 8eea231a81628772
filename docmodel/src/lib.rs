//! Main docmodel crate: typed fields for document databases.
//!
//! This crate is the primary entry point. It re-exports the field subsystem from
//! `docmodel-core` together with the storage backends.
//!
//! # Features
//!
//! - **Typed fields** - Strings, numbers, dates, identifiers, geo points, binary data
//! - **Composites** - Lists, sorted lists, dictionaries and typed maps with per-element errors
//! - **Embedded documents and references** - Lazy dereferencing with memoization
//! - **Out-of-band content** - File and image fields backed by blob buckets
//! - **Sequences** - Atomic counters allocated through the store
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let author = EntityType::builder("Author")
//!         .collection("authors")
//!         .field("name", StringField::new().required())
//!         .build()?;
//!     let post = EntityType::builder("Post")
//!         .collection("posts")
//!         .field("title", StringField::new().max_length(120))
//!         .field("author", ReferenceField::new("Author"))
//!         .field("number", SequenceField::new())
//!         .build()?;
//!
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!
//!     let mut alice = Entity::with_values(&author, [("name", "Alice")])?;
//!     store.save(&mut alice).await?;
//!
//!     let mut entry = Entity::with_values(&post, [("title", "Hello")])?;
//!     entry.set("author", alice)?;
//!     store.save(&mut entry).await?;
//!
//!     // Dereferenced on first access, then memoized on the entity.
//!     let author = store.get_field_value(&mut entry, "author").await?;
//!     println!("{author:?}");
//!
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Dynamic Dispatch
//!
//! When the backend is only known at runtime, box it into a [`DynDocumentStore`]
//! and work through [`DynDocumentStore::as_dyn`]:
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//!
//! let store = DynDocumentStore::new(Box::new(InMemoryStore::new()));
//! let id = store.as_dyn().save(&mut entity).await?;
//! store.shutdown().await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)
//!
//! [`DynDocumentStore`]: store::DynDocumentStore
//! [`DynDocumentStore::as_dyn`]: store::DynDocumentStore::as_dyn

pub mod prelude;

pub use docmodel_core::{backend, entity, error, field, query, registry, schema, store, value};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
