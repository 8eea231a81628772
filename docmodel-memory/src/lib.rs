//! In-memory storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend`
//! trait: documents, atomic counters and out-of-band blobs. It uses async-aware
//! read-write locks and is meant for development and tests.
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{DocumentStore, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let store = DocumentStore::new(backend);
//!
//!     let mut post = Entity::with_values(&post_type, [("title", "Hello")])?;
//!     store.save(&mut post).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
