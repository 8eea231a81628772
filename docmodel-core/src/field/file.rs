//! Blob-backed fields: binary content stored out of band, referenced by handle.
//!
//! The entity slot holds a [`BlobProxy`]. Content operations need the store and go
//! through a [`BlobSlot`], obtained from
//! [`DocumentStore::blob`](crate::store::DocumentStore::blob). Every mutation made
//! through the slot marks the attribute changed on the owning entity.
//!
//! ```ignore
//! let mut slot = store.blob(&mut entity, "attachment")?;
//! slot.put(b"hello".to_vec(), doc! { "content_type": "text/plain" }).await?;
//! assert_eq!(slot.read(None).await?, Some(b"hello".to_vec()));
//! ```

use std::{any::Any, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use tracing::{debug, warn};

use crate::{
    backend::{DynStoreBackend, StoredBlob},
    entity::{ChangeTracker, Entity},
    error::{ModelError, ModelResult, ValidationError},
    field::{Field, FieldContext, FieldCore, FieldOptions, prepare_each},
    query::QueryOp,
    value::Value,
};

/// Bucket used by [`FileField`] unless configured otherwise.
pub const DEFAULT_BUCKET: &str = "fs";

/// In-entity state of a blob attribute.
///
/// Equality only considers the content handle.
#[derive(Debug, Clone, Default)]
pub struct BlobProxy {
    handle: Option<ObjectId>,
    pending: Option<Vec<u8>>,
    cached: Option<StoredBlob>,
    position: usize,
}

impl PartialEq for BlobProxy {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl BlobProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(handle: ObjectId) -> Self {
        Self {
            handle: Some(handle),
            ..Self::default()
        }
    }

    pub fn handle(&self) -> Option<ObjectId> {
        self.handle
    }

    pub fn has_content(&self) -> bool {
        self.handle.is_some()
    }

    /// True while a buffered stream write has not been closed.
    pub fn is_writing(&self) -> bool {
        self.pending.is_some()
    }

    /// Content fetched by an earlier read, if any.
    pub fn cached(&self) -> Option<&StoredBlob> {
        self.cached.as_ref()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

pub(crate) fn already_has_content() -> ModelError {
    ModelError::Blob(
        "This document already has a file. Either delete it or call replace to overwrite it"
            .to_string(),
    )
}

/// Stores `data` and records its handle on the proxy.
pub(crate) async fn store_content(
    bucket: &str,
    proxy: &mut BlobProxy,
    data: Vec<u8>,
    metadata: Document,
    backend: &dyn DynStoreBackend,
) -> ModelResult<()> {
    if proxy.has_content() {
        return Err(already_has_content());
    }

    let length = data.len();
    let id = backend.put_blob(bucket, data, metadata).await?;
    debug!(bucket, %id, length, "stored blob");

    proxy.handle = Some(id);
    proxy.cached = None;
    proxy.position = 0;

    Ok(())
}

/// Removes the proxy's content, if any, and clears all proxy state.
pub(crate) async fn remove_content(
    bucket: &str,
    proxy: &mut BlobProxy,
    backend: &dyn DynStoreBackend,
) -> ModelResult<()> {
    if let Some(id) = proxy.handle {
        backend.delete_blob(bucket, id).await?;
        debug!(bucket, %id, "deleted blob");
    }
    proxy.reset();

    Ok(())
}

/// Fetches the proxy's content, caching it on the proxy. Fetch failures read as `None`.
pub(crate) async fn fetch_content(
    bucket: &str,
    proxy: &mut BlobProxy,
    backend: &dyn DynStoreBackend,
) -> Option<StoredBlob> {
    if let Some(cached) = &proxy.cached {
        return Some(cached.clone());
    }
    let id = proxy.handle?;

    match backend.get_blob(bucket, id).await {
        Ok(Some(blob)) => {
            proxy.cached = Some(blob.clone());
            Some(blob)
        }
        Ok(None) => {
            warn!(bucket, %id, "blob content is missing");
            None
        }
        Err(err) => {
            warn!(bucket, %id, error = %err, "failed to fetch blob");
            None
        }
    }
}

/// Content operations of a blob-backed field.
#[async_trait]
pub trait BlobField: Send + Sync {
    /// Bucket the content is stored in.
    fn bucket(&self) -> &str;

    /// Whether `write`/`writelines` may bypass [`BlobField::put`].
    fn allows_stream_writes(&self) -> bool {
        true
    }

    /// Stores new content. Fails when the proxy already holds content.
    async fn put(
        &self,
        proxy: &mut BlobProxy,
        data: Vec<u8>,
        metadata: Document,
        backend: &dyn DynStoreBackend,
    ) -> ModelResult<()>;

    /// Removes stored content and clears the proxy.
    async fn delete(&self, proxy: &mut BlobProxy, backend: &dyn DynStoreBackend)
    -> ModelResult<()>;
}

/// Write hook shared by blob fields: raw bytes replace any existing content.
pub(crate) async fn assign_content(
    field: &dyn BlobField,
    slot: &mut Value,
    data: Vec<u8>,
    backend: &dyn DynStoreBackend,
) -> ModelResult<()> {
    let mut proxy = match std::mem::take(slot) {
        Value::Blob(proxy) => proxy,
        _ => BlobProxy::new(),
    };

    if proxy.has_content() {
        if let Err(err) = field.delete(&mut proxy, backend).await {
            warn!(bucket = field.bucket(), error = %err, "failed to delete replaced blob");
            proxy.reset();
        }
    }

    let result = field.put(&mut proxy, data, Document::new(), backend).await;
    *slot = Value::Blob(proxy);
    result
}

pub(crate) fn blob_to_native(value: Value) -> Value {
    match value {
        Value::ObjectId(id) => Value::Blob(BlobProxy::with_handle(id)),
        other => other,
    }
}

pub(crate) fn blob_to_storage(value: &Value) -> Bson {
    match value {
        Value::Blob(proxy) => proxy.handle().map(Bson::ObjectId).unwrap_or(Bson::Null),
        Value::ObjectId(id) => Bson::ObjectId(*id),
        _ => Bson::Null,
    }
}

/// Binary content stored in a bucket of the blob store.
#[derive(Debug)]
pub struct FileField {
    core: FieldCore,
    bucket: String,
}

impl Default for FileField {
    fn default() -> Self {
        Self {
            core: FieldCore::new(FieldOptions::default()),
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }
}

impl FileField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }
}

#[async_trait]
impl Field for FileField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "FileField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::Blob(_) => Ok(()),
            _ => Err(self.core.error("FileField only accepts blob proxy values")),
        }
    }

    fn to_storage(&self, value: &Value) -> ModelResult<Bson> {
        Ok(blob_to_storage(value))
    }

    fn to_native(&self, value: Value) -> ModelResult<Value> {
        Ok(blob_to_native(value))
    }

    fn prepare_query_value(&self, op: QueryOp, value: &Value) -> ModelResult<Bson> {
        prepare_each(op, value, |item| Ok(blob_to_storage(item)))
    }

    fn as_blob_field(&self) -> Option<&dyn BlobField> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn assign(&self, slot: &mut Value, value: Value, ctx: &FieldContext<'_>) -> ModelResult<()> {
        match value {
            Value::Bytes(data) => assign_content(self, slot, data, ctx.backend).await,
            other => {
                *slot = blob_to_native(other);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BlobField for FileField {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(
        &self,
        proxy: &mut BlobProxy,
        data: Vec<u8>,
        metadata: Document,
        backend: &dyn DynStoreBackend,
    ) -> ModelResult<()> {
        store_content(&self.bucket, proxy, data, metadata, backend).await
    }

    async fn delete(
        &self,
        proxy: &mut BlobProxy,
        backend: &dyn DynStoreBackend,
    ) -> ModelResult<()> {
        remove_content(&self.bucket, proxy, backend).await
    }
}

/// Content access to one blob attribute of an entity.
pub struct BlobSlot<'a> {
    entity: &'a mut Entity,
    name: String,
    field: Arc<dyn Field>,
    backend: &'a dyn DynStoreBackend,
}

impl<'a> BlobSlot<'a> {
    pub(crate) fn new(
        entity: &'a mut Entity,
        name: &str,
        backend: &'a dyn DynStoreBackend,
    ) -> ModelResult<Self> {
        let field = entity.entity_type().require_field(name)?;
        if field.as_blob_field().is_none() {
            return Err(ModelError::Configuration(format!(
                "{}.{name} is not a blob field",
                entity.entity_type().name()
            )));
        }

        Ok(Self {
            entity,
            name: name.to_string(),
            field,
            backend,
        })
    }

    fn blob_field(&self) -> ModelResult<&dyn BlobField> {
        self.field.as_blob_field().ok_or_else(|| {
            ModelError::Configuration(format!("{} is not a blob field", self.name))
        })
    }

    fn proxy_mut(&mut self) -> ModelResult<&mut BlobProxy> {
        let slot = self.entity.slot_mut(&self.name)?;
        if !matches!(slot, Value::Blob(_)) {
            *slot = Value::Blob(BlobProxy::new());
        }
        match slot {
            Value::Blob(proxy) => Ok(proxy),
            _ => Err(ModelError::Blob(format!("{} holds no blob proxy", self.name))),
        }
    }

    /// The current proxy state.
    pub fn proxy(&self) -> Option<&BlobProxy> {
        self.entity.get(&self.name).ok()?.as_blob()
    }

    /// Stores new content with metadata. Fails when content already exists.
    pub async fn put(&mut self, data: Vec<u8>, metadata: Document) -> ModelResult<()> {
        let field = self.field.clone();
        let blob = field
            .as_blob_field()
            .ok_or_else(|| ModelError::Configuration(format!("{} is not a blob field", self.name)))?;
        let backend = self.backend;

        let proxy = self.proxy_mut()?;
        let result = blob.put(proxy, data, metadata, backend).await;
        self.entity.mark_changed(&self.name);
        result
    }

    /// Appends to a buffered new file, stored on [`close`](BlobSlot::close).
    pub async fn write(&mut self, data: &[u8]) -> ModelResult<()> {
        if !self.blob_field()?.allows_stream_writes() {
            return Err(ModelError::Blob("Please use \"put\" method instead".to_string()));
        }

        let proxy = self.proxy_mut()?;
        if proxy.has_content() && !proxy.is_writing() {
            return Err(already_has_content());
        }
        proxy
            .pending
            .get_or_insert_with(Vec::new)
            .extend_from_slice(data);
        self.entity.mark_changed(&self.name);

        Ok(())
    }

    pub async fn writelines<I, L>(&mut self, lines: I) -> ModelResult<()>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        if !self.blob_field()?.allows_stream_writes() {
            return Err(ModelError::Blob("Please use \"put\" method instead".to_string()));
        }

        for line in lines {
            self.write(line.as_ref()).await?;
        }
        Ok(())
    }

    /// Stores the buffered stream writes, if any.
    pub async fn close(&mut self) -> ModelResult<()> {
        let Some(data) = self.proxy_mut()?.pending.take() else {
            return Ok(());
        };
        self.put(data, Document::new()).await
    }

    /// Fetches the stored content, `None` when absent or unreachable.
    pub async fn get(&mut self) -> ModelResult<Option<StoredBlob>> {
        let bucket = self.blob_field()?.bucket().to_string();
        let backend = self.backend;
        let proxy = self.proxy_mut()?;

        Ok(fetch_content(&bucket, proxy, backend).await)
    }

    /// Reads up to `size` bytes from the current position, or everything left.
    pub async fn read(&mut self, size: Option<usize>) -> ModelResult<Option<Vec<u8>>> {
        let Some(blob) = self.get().await? else {
            return Ok(None);
        };

        let proxy = self.proxy_mut()?;
        let start = proxy.position.min(blob.len());
        let end = size.map_or(blob.len(), |size| start.saturating_add(size).min(blob.len()));
        proxy.position = end;

        Ok(Some(blob.data[start..end].to_vec()))
    }

    /// Removes the stored content. The attribute remains, holding an empty proxy.
    pub async fn delete(&mut self) -> ModelResult<()> {
        let field = self.field.clone();
        let blob = field
            .as_blob_field()
            .ok_or_else(|| ModelError::Configuration(format!("{} is not a blob field", self.name)))?;
        let backend = self.backend;

        let proxy = self.proxy_mut()?;
        let result = blob.delete(proxy, backend).await;
        self.entity.mark_changed(&self.name);
        result
    }

    /// Deletes then stores; not atomic.
    pub async fn replace(&mut self, data: Vec<u8>, metadata: Document) -> ModelResult<()> {
        self.delete().await?;
        self.put(data, metadata).await
    }

    /// Metadata recorded when the content was stored.
    pub async fn metadata(&mut self) -> ModelResult<Option<Document>> {
        Ok(self.get().await?.map(|blob| blob.metadata))
    }

    /// Width and height recorded by an image field.
    pub async fn dimensions(&mut self) -> ModelResult<Option<(u32, u32)>> {
        let Some(metadata) = self.metadata().await? else {
            return Ok(None);
        };
        let dimension = |key: &str| {
            metadata
                .get(key)
                .and_then(Bson::as_i64)
                .and_then(|value| u32::try_from(value).ok())
        };

        Ok(dimension("width").zip(dimension("height")))
    }

    /// Image format name (`PNG`, `JPEG`, ...) recorded by an image field.
    pub async fn format(&mut self) -> ModelResult<Option<String>> {
        Ok(self
            .metadata()
            .await?
            .and_then(|metadata| metadata.get_str("format").ok().map(str::to_string)))
    }

    /// The derived thumbnail rendition recorded by an image field.
    pub async fn thumbnail(&mut self) -> ModelResult<Option<StoredBlob>> {
        let Some(thumbnail_id) = self
            .metadata()
            .await?
            .and_then(|metadata| metadata.get_object_id("thumbnail_id").ok())
        else {
            return Ok(None);
        };
        let bucket = self.blob_field()?.bucket().to_string();

        match self.backend.get_blob(&bucket, thumbnail_id).await {
            Ok(blob) => Ok(blob),
            Err(err) => {
                warn!(bucket, id = %thumbnail_id, error = %err, "failed to fetch thumbnail");
                Ok(None)
            }
        }
    }
}
