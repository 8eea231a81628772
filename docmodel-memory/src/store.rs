//! In-memory storage implementation of the store collaborator.
//!
//! Documents are kept as BSON values in HashMaps, blobs in a separate per-bucket map.
//! Everything sits behind async-safe read-write locks.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, Uuid, doc, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::debug;

use docmodel_core::{
    backend::{StoreBackend, StoreBackendBuilder, StoredBlob},
    error::{ModelError, ModelResult},
};

type CollectionMap = HashMap<String, Bson>;
type StoreMap = HashMap<String, CollectionMap>;
type BucketMap = HashMap<String, HashMap<ObjectId, StoredBlob>>;

/// Thread-safe in-memory storage backend.
///
/// `InMemoryStore` is cloneable and uses `Arc`-wrapped internal state. Clones share the
/// same documents, counters and blobs, so two clones behave like two clients of one
/// server.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackend;
///
/// let store = InMemoryStore::new();
/// let other_client = store.clone();
///
/// assert_eq!(store.increment_counter("odm.counters", "posts.number").await?, 1);
/// assert_eq!(other_client.increment_counter("odm.counters", "posts.number").await?, 2);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> (document id -> document). Counter records live here too.
    store: Arc<RwLock<StoreMap>>,
    /// bucket name -> (blob id -> blob)
    blobs: Arc<RwLock<BucketMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
            blobs: Arc::new(RwLock::new(BucketMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Number of blobs currently held in `bucket`.
    pub async fn blob_count(&self, bucket: &str) -> usize {
        self.blobs
            .read()
            .await
            .get(bucket)
            .map_or(0, HashMap::len)
    }

    /// The raw counter record for `key`, as a server would persist it.
    pub async fn counter_record(&self, collection: &str, key: &str) -> Option<Bson> {
        self.store
            .read()
            .await
            .get(collection)
            .and_then(|records| records.get(key))
            .cloned()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> ModelResult<()> {
        let mut store = self.store.write().await;
        let collection_map = store.entry(collection.to_string()).or_default();

        for (id, document) in documents {
            let key = id.to_string();

            if collection_map.contains_key(&key) {
                return Err(ModelError::DocumentAlreadyExists(key, collection.to_string()));
            }

            collection_map.insert(key, document);
        }

        Ok(())
    }

    async fn update_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> ModelResult<()> {
        let mut store = self.store.write().await;
        let Some(collection_map) = store.get_mut(collection) else {
            return Err(ModelError::CollectionNotFound(collection.to_string()));
        };

        for (id, document) in documents {
            let key = id.to_string();

            if !collection_map.contains_key(&key) {
                return Err(ModelError::DocumentNotFound(key, collection.to_string()));
            }

            collection_map.insert(key, document);
        }

        Ok(())
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> ModelResult<()> {
        let mut store = self.store.write().await;
        let Some(collection_map) = store.get_mut(collection) else {
            return Err(ModelError::CollectionNotFound(collection.to_string()));
        };

        for id in ids {
            let key = id.to_string();

            if collection_map.remove(&key).is_none() {
                return Err(ModelError::DocumentNotFound(key, collection.to_string()));
            }
        }

        Ok(())
    }

    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> ModelResult<Vec<Bson>> {
        let store = self.store.read().await;
        let Some(collection_map) = store.get(collection) else {
            return Ok(vec![]);
        };

        Ok(ids
            .into_iter()
            .filter_map(|id| collection_map.get(&id.to_string()).cloned())
            .collect())
    }

    async fn increment_counter(&self, collection: &str, key: &str) -> ModelResult<i64> {
        // The write lock makes the read-modify-write a single step for every clone.
        let mut store = self.store.write().await;
        let record = store
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| Bson::Document(doc! { "_id": key, "next": 0_i64 }));

        let Some(document) = record.as_document_mut() else {
            return Err(ModelError::Backend(format!(
                "counter record {key} in {collection} is not a document"
            )));
        };
        let next = match document.get("next") {
            Some(Bson::Int64(value)) => value + 1,
            Some(Bson::Int32(value)) => *value as i64 + 1,
            _ => 1,
        };
        document.insert("next", next);

        Ok(next)
    }

    async fn put_blob(
        &self,
        bucket: &str,
        data: Vec<u8>,
        metadata: Document,
    ) -> ModelResult<ObjectId> {
        let id = ObjectId::new();
        debug!(bucket, %id, length = data.len(), "storing blob in memory");

        self.blobs
            .write()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(id, StoredBlob { id, data, metadata });

        Ok(id)
    }

    async fn get_blob(&self, bucket: &str, id: ObjectId) -> ModelResult<Option<StoredBlob>> {
        Ok(self
            .blobs
            .read()
            .await
            .get(bucket)
            .and_then(|blobs| blobs.get(&id))
            .cloned())
    }

    async fn delete_blob(&self, bucket: &str, id: ObjectId) -> ModelResult<()> {
        if let Some(blobs) = self.blobs.write().await.get_mut(bucket) {
            blobs.remove(&id);
        }
        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> ModelResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_persist_their_record_layout() {
        let store = InMemoryStore::new();

        assert_eq!(store.increment_counter("odm.counters", "posts.number").await.unwrap(), 1);
        assert_eq!(store.increment_counter("odm.counters", "posts.number").await.unwrap(), 2);
        assert_eq!(
            store.counter_record("odm.counters", "posts.number").await,
            Some(Bson::Document(doc! { "_id": "posts.number", "next": 2_i64 }))
        );
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = InMemoryStore::new();
        let other = store.clone();

        let id = store.put_blob("fs", b"abc".to_vec(), doc! {}).await.unwrap();
        assert_eq!(other.get_blob("fs", id).await.unwrap().unwrap().data, b"abc");

        other.delete_blob("fs", id).await.unwrap();
        assert!(store.get_blob("fs", id).await.unwrap().is_none());
        assert_eq!(store.blob_count("fs").await, 0);
    }

    #[tokio::test]
    async fn update_requires_an_existing_document() {
        let store = InMemoryStore::new();
        let id = Uuid::new();

        store
            .insert_documents(vec![(id, Bson::Document(doc! { "a": 1 }))], "things")
            .await
            .unwrap();
        assert!(matches!(
            store
                .update_documents(vec![(Uuid::new(), Bson::Document(doc! {}))], "things")
                .await,
            Err(ModelError::DocumentNotFound(..))
        ));
        assert_eq!(store.get_documents(vec![id], "things").await.unwrap().len(), 1);
    }
}
