use async_trait::async_trait;
use bson::{Bson, Document, Uuid, doc, oid::ObjectId};
use futures::{
    AsyncReadExt, AsyncWriteExt, TryStreamExt,
    stream::{StreamExt, iter},
};
use mongodb::{
    Client, Collection as MongoCollection,
    gridfs::GridFsBucket,
    options::{ClientOptions, GridFsBucketOptions, ReturnDocument},
};
use tracing::debug;

use docmodel_core::{
    backend::{StoreBackend, StoreBackendBuilder, StoredBlob},
    error::{ModelError, ModelResult},
};

fn backend_error(err: mongodb::error::Error) -> ModelError {
    ModelError::Backend(err.to_string())
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    fn get_bucket(&self, bucket: &str) -> GridFsBucket {
        self.client.database(&self.database).gridfs_bucket(
            GridFsBucketOptions::builder()
                .bucket_name(bucket.to_string())
                .build(),
        )
    }

    fn prepare_document(&self, id: &Uuid, document: &Bson) -> ModelResult<Document> {
        let mut document = document
            .as_document()
            .cloned()
            .ok_or_else(|| ModelError::Serialization("Expected document".into()))?;
        document.insert("_id", *id);

        Ok(document)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> ModelResult<()> {
        self.get_collection(collection)
            .insert_many(
                documents
                    .iter()
                    .map(|(id, document)| self.prepare_document(id, document))
                    .collect::<ModelResult<Vec<Document>>>()?,
            )
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn update_documents(
        &self,
        documents: Vec<(Uuid, Bson)>,
        collection: &str,
    ) -> ModelResult<()> {
        iter(documents)
            .then(async |(id, document)| {
                let result = self
                    .get_collection(collection)
                    .replace_one(doc! { "_id": id }, self.prepare_document(&id, &document)?)
                    .await
                    .map_err(backend_error)?;

                if result.matched_count == 0 {
                    return Err(ModelError::DocumentNotFound(
                        id.to_string(),
                        collection.to_string(),
                    ));
                }
                Ok(())
            })
            .try_collect::<Vec<_>>()
            .await?;

        Ok(())
    }

    async fn delete_documents(&self, ids: Vec<Uuid>, collection: &str) -> ModelResult<()> {
        self.get_collection(collection)
            .delete_many(doc! { "_id": { "$in": ids } })
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn get_documents(&self, ids: Vec<Uuid>, collection: &str) -> ModelResult<Vec<Bson>> {
        Ok(self
            .get_collection(collection)
            .find(doc! { "_id": { "$in": ids } })
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)?
            .into_iter()
            .map(Bson::Document)
            .collect())
    }

    async fn increment_counter(&self, collection: &str, key: &str) -> ModelResult<i64> {
        let record = self
            .get_collection(collection)
            .find_one_and_update(doc! { "_id": key }, doc! { "$inc": { "next": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(backend_error)?
            .ok_or_else(|| {
                ModelError::Backend(format!("counter {key} in {collection} was not upserted"))
            })?;

        match record.get("next") {
            Some(Bson::Int64(next)) => Ok(*next),
            Some(Bson::Int32(next)) => Ok(*next as i64),
            other => Err(ModelError::Backend(format!(
                "counter {key} in {collection} holds {other:?}"
            ))),
        }
    }

    async fn put_blob(
        &self,
        bucket: &str,
        data: Vec<u8>,
        metadata: Document,
    ) -> ModelResult<ObjectId> {
        let id = ObjectId::new();
        let mut upload = self
            .get_bucket(bucket)
            .open_upload_stream(id.to_hex())
            .id(Bson::ObjectId(id))
            .metadata(metadata)
            .await
            .map_err(backend_error)?;

        upload
            .write_all(&data)
            .await
            .map_err(|e| ModelError::Backend(e.to_string()))?;
        upload
            .close()
            .await
            .map_err(|e| ModelError::Backend(e.to_string()))?;
        debug!(bucket, %id, length = data.len(), "uploaded blob to GridFS");

        Ok(id)
    }

    async fn get_blob(&self, bucket: &str, id: ObjectId) -> ModelResult<Option<StoredBlob>> {
        let gridfs = self.get_bucket(bucket);
        let Some(file) = gridfs
            .find_one(doc! { "_id": id })
            .await
            .map_err(backend_error)?
        else {
            return Ok(None);
        };

        let mut download = gridfs
            .open_download_stream(Bson::ObjectId(id))
            .await
            .map_err(backend_error)?;
        let mut data = Vec::new();
        download
            .read_to_end(&mut data)
            .await
            .map_err(|e| ModelError::Backend(e.to_string()))?;

        Ok(Some(StoredBlob {
            id,
            data,
            metadata: file.metadata.unwrap_or_default(),
        }))
    }

    async fn delete_blob(&self, bucket: &str, id: ObjectId) -> ModelResult<()> {
        let gridfs = self.get_bucket(bucket);
        let exists = gridfs
            .find_one(doc! { "_id": id })
            .await
            .map_err(backend_error)?
            .is_some();

        if exists {
            gridfs
                .delete(Bson::ObjectId(id))
                .await
                .map_err(backend_error)?;
        }

        Ok(())
    }

    async fn shutdown(self) -> ModelResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> ModelResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(ClientOptions::parse(&self.dsn).await.map_err(backend_error)?)
                .map_err(backend_error)?,
            self.database,
        ))
    }
}
