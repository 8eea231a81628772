//! Store-access collaborator consumed by the field subsystem.
//!
//! Fields never talk to a database directly. Everything that needs storage access
//! (dereferencing a handle, allocating a sequence number, storing binary content out of
//! band) goes through the [`StoreBackend`] trait defined here.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`DynStoreBackend`]: A trait for dynamic dispatch over backend implementations
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::StoreBackend;
//! use bson::{Uuid, Bson, doc};
//!
//! let backend = MyBackendImpl::new();
//!
//! let uuid = Uuid::new();
//! let doc = Bson::Document(doc! { "name": "Alice", "age": 30 });
//! backend.insert_documents(vec![(uuid, doc)], "users").await?;
//!
//! let next = backend.increment_counter("odm.counters", "users.number").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document, Uuid, oid::ObjectId};
use std::{any::Any, fmt::Debug};

use crate::error::ModelResult;

/// Binary content stored out of band, together with its metadata attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    /// Handle of the stored content.
    pub id: ObjectId,
    /// The content itself.
    pub data: Vec<u8>,
    /// Arbitrary attributes recorded at upload time.
    pub metadata: Document,
}

impl StoredBlob {
    /// Length of the content in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks.
///
/// # Atomicity
///
/// [`StoreBackend::increment_counter`] must be a single server-side read-modify-write.
/// The sequence field relies on it for uniqueness under concurrent callers and does no
/// locking of its own.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts new documents into a collection.
    ///
    /// # Arguments
    ///
    /// * `documents` - A vector of (UUID, BSON document) pairs to insert
    /// * `collection` - The name of the collection to insert into. Created automatically if it doesn't exist.
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> ModelResult<()>;

    /// Replaces existing documents in a collection.
    async fn update_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> ModelResult<()>;

    /// Deletes documents from a collection by their IDs.
    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> ModelResult<()>;

    /// Retrieves documents from a collection by their IDs.
    ///
    /// Missing IDs are omitted from the result. Reference fields dereference handles
    /// through this method with a single ID.
    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> ModelResult<Vec<Bson>>;

    /// Atomically increments the counter record `key` in `collection` and returns the new value.
    ///
    /// The record is created with an initial increment when absent. Its persisted layout is
    /// `{_id: key, next: <integer>}`.
    async fn increment_counter(&self, collection: &str, key: &str) -> ModelResult<i64>;

    /// Stores binary content with metadata in `bucket` and returns its handle.
    async fn put_blob(&self, bucket: &str, data: Vec<u8>, metadata: Document)
    -> ModelResult<ObjectId>;

    /// Fetches stored content, or `None` when the handle does not exist.
    async fn get_blob(&self, bucket: &str, id: ObjectId) -> ModelResult<Option<StoredBlob>>;

    /// Removes stored content. Deleting a missing handle is not an error.
    async fn delete_blob(&self, bucket: &str, id: ObjectId) -> ModelResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    async fn shutdown(self) -> ModelResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Object-safe mirror of [`StoreBackend`], used by field hooks.
#[async_trait]
pub trait DynStoreBackend: Send + Sync + Debug {
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> ModelResult<()>;
    async fn update_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> ModelResult<()>;
    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> ModelResult<()>;
    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> ModelResult<Vec<Bson>>;
    async fn increment_counter(&self, collection: &str, key: &str) -> ModelResult<i64>;
    async fn put_blob(&self, bucket: &str, data: Vec<u8>, metadata: Document)
    -> ModelResult<ObjectId>;
    async fn get_blob(&self, bucket: &str, id: ObjectId) -> ModelResult<Option<StoredBlob>>;
    async fn delete_blob(&self, bucket: &str, id: ObjectId) -> ModelResult<()>;
    async fn shutdown_boxed(self: Box<Self>) -> ModelResult<()>;

    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
impl<B: StoreBackend + Send + Sync + 'static> DynStoreBackend for B {
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> ModelResult<()> {
        StoreBackend::insert_documents(self, documents, collection).await
    }

    async fn update_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> ModelResult<()> {
        StoreBackend::update_documents(self, documents, collection).await
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> ModelResult<()> {
        StoreBackend::delete_documents(self, ids, collection).await
    }

    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> ModelResult<Vec<Bson>> {
        StoreBackend::get_documents(self, ids, collection).await
    }

    async fn increment_counter(&self, collection: &str, key: &str) -> ModelResult<i64> {
        StoreBackend::increment_counter(self, collection, key).await
    }

    async fn put_blob(
        &self,
        bucket: &str,
        data: Vec<u8>,
        metadata: Document,
    ) -> ModelResult<ObjectId> {
        StoreBackend::put_blob(self, bucket, data, metadata).await
    }

    async fn get_blob(&self, bucket: &str, id: ObjectId) -> ModelResult<Option<StoredBlob>> {
        StoreBackend::get_blob(self, bucket, id).await
    }

    async fn delete_blob(&self, bucket: &str, id: ObjectId) -> ModelResult<()> {
        StoreBackend::delete_blob(self, bucket, id).await
    }

    async fn shutdown_boxed(self: Box<Self>) -> ModelResult<()> {
        StoreBackend::shutdown(*self).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> ModelResult<Self::Backend>;
}
