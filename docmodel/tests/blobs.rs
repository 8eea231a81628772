use std::sync::Arc;

use bson::{Bson, doc};
use docmodel::{memory::InMemoryStore, prelude::*};

/// Encodes images as `FORMAT:WIDTHxHEIGHT`.
#[derive(Debug)]
struct TextCodec;

impl ImageCodec for TextCodec {
    fn probe(&self, data: &[u8]) -> Result<ImageInfo, ValidationError> {
        let invalid = || ValidationError::new("Invalid image");
        let text = std::str::from_utf8(data).map_err(|_| invalid())?;
        let (format, dimensions) = text.split_once(':').ok_or_else(invalid)?;
        let (width, height) = dimensions.split_once('x').ok_or_else(invalid)?;

        Ok(ImageInfo {
            width: width.parse().map_err(|_| invalid())?,
            height: height.parse().map_err(|_| invalid())?,
            format: format.to_string(),
        })
    }

    fn resize(&self, data: &[u8], size: ImageSize) -> ModelResult<Vec<u8>> {
        let info = self.probe(data)?;
        let (width, height) = if size.force {
            (size.width, size.height)
        } else {
            let scale = f64::min(
                size.width as f64 / info.width as f64,
                size.height as f64 / info.height as f64,
            )
            .min(1.0);
            (
                (info.width as f64 * scale).round() as u32,
                (info.height as f64 * scale).round() as u32,
            )
        };

        Ok(format!("{}:{width}x{height}", info.format).into_bytes())
    }
}

#[tokio::test]
async fn test_put_twice_fails_until_content_is_deleted() {
    let attachment = EntityType::builder("BlobAttachment")
        .collection("blob_attachments")
        .field("file", FileField::new())
        .build()
        .unwrap();
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(backend.clone());

    let mut entity = Entity::new(&attachment);
    {
        let mut blob = store.blob(&mut entity, "file").unwrap();
        blob.put(b"hello".to_vec(), doc! { "content_type": "text/plain" })
            .await
            .unwrap();

        let err = blob.put(b"again".to_vec(), doc! {}).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Blob error: This document already has a file. Either delete it or call replace to overwrite it"
        );

        blob.delete().await.unwrap();
        assert!(!blob.proxy().unwrap().has_content());

        blob.put(b"again".to_vec(), doc! {}).await.unwrap();
        assert_eq!(blob.read(Some(2)).await.unwrap().unwrap(), b"ag");
        assert_eq!(blob.read(None).await.unwrap().unwrap(), b"ain");
    }

    assert_eq!(backend.blob_count("fs").await, 1);
    assert!(entity.is_changed("file"));

    let id = store.save(&mut entity).await.unwrap();
    let mut loaded = store.load(&attachment, id).await.unwrap().unwrap();
    let mut blob = store.blob(&mut loaded, "file").unwrap();
    assert_eq!(blob.get().await.unwrap().unwrap().data, b"again");
}

#[tokio::test]
async fn test_reads_are_clamped_to_the_blob_length() {
    let attachment = EntityType::builder("BlobClampedAttachment")
        .collection("blob_clamped_attachments")
        .field("file", FileField::new())
        .build()
        .unwrap();
    let store = DocumentStore::new(InMemoryStore::new());

    let mut entity = Entity::new(&attachment);
    let mut blob = store.blob(&mut entity, "file").unwrap();
    blob.put(b"hello".to_vec(), doc! {}).await.unwrap();

    assert_eq!(blob.read(Some(0)).await.unwrap().unwrap(), b"");
    assert_eq!(blob.read(Some(2)).await.unwrap().unwrap(), b"he");
    assert_eq!(blob.read(Some(usize::MAX)).await.unwrap().unwrap(), b"llo");

    // Past the end every read is empty, whatever the requested size.
    assert_eq!(blob.read(Some(usize::MAX)).await.unwrap().unwrap(), b"");
    assert_eq!(blob.read(None).await.unwrap().unwrap(), b"");
}

#[tokio::test]
async fn test_stream_writes_are_stored_on_close() {
    let log = EntityType::builder("BlobLog")
        .collection("blob_logs")
        .field("content", FileField::new().with_bucket("logs"))
        .build()
        .unwrap();
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(backend.clone());

    let mut entity = Entity::new(&log);
    let mut blob = store.blob(&mut entity, "content").unwrap();
    blob.write(b"first ").await.unwrap();
    blob.writelines(["second ", "third"]).await.unwrap();
    assert!(blob.proxy().unwrap().is_writing());
    assert_eq!(backend.blob_count("logs").await, 0);

    blob.close().await.unwrap();
    assert_eq!(backend.blob_count("logs").await, 1);
    assert_eq!(
        blob.get().await.unwrap().unwrap().data,
        b"first second third"
    );
}

#[tokio::test]
async fn test_assigning_bytes_replaces_existing_content() {
    let attachment = EntityType::builder("BlobReplacedAttachment")
        .collection("blob_replaced_attachments")
        .field("file", FileField::new())
        .build()
        .unwrap();
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(backend.clone());

    let mut entity = Entity::new(&attachment);
    store
        .set_field_value(&mut entity, "file", b"first".to_vec())
        .await
        .unwrap();
    let first = entity.get("file").unwrap().as_blob().unwrap().handle();

    store
        .set_field_value(&mut entity, "file", b"second".to_vec())
        .await
        .unwrap();
    let second = entity.get("file").unwrap().as_blob().unwrap().handle();

    assert_ne!(first, second);
    assert_eq!(backend.blob_count("fs").await, 1);

    let mut blob = store.blob(&mut entity, "file").unwrap();
    assert_eq!(blob.get().await.unwrap().unwrap().data, b"second");
}

#[tokio::test]
async fn test_image_uploads_are_resized_with_a_thumbnail() {
    let profile = EntityType::builder("BlobProfile")
        .collection("blob_profiles")
        .field(
            "avatar",
            ImageField::with_codec(Arc::new(TextCodec))
                .size(ImageSize::new(400, 300))
                .thumbnail_size(ImageSize::forced(50, 50)),
        )
        .build()
        .unwrap();
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(backend.clone());

    let mut entity = Entity::new(&profile);
    let mut blob = store.blob(&mut entity, "avatar").unwrap();
    blob.put(b"PNG:800x400".to_vec(), doc! { "title": "me" })
        .await
        .unwrap();

    assert_eq!(backend.blob_count("images").await, 2);
    assert_eq!(blob.get().await.unwrap().unwrap().data, b"PNG:400x200");
    assert_eq!(blob.dimensions().await.unwrap(), Some((400, 200)));
    assert_eq!(blob.format().await.unwrap().as_deref(), Some("PNG"));

    let metadata = blob.metadata().await.unwrap().unwrap();
    assert_eq!(metadata.get_str("title").unwrap(), "me");
    assert!(matches!(metadata.get("thumbnail_id"), Some(Bson::ObjectId(_))));

    let thumbnail = blob.thumbnail().await.unwrap().unwrap();
    assert_eq!(thumbnail.data, b"PNG:50x50");
    assert_eq!(thumbnail.metadata.get_i64("width").unwrap(), 50);

    let err = blob.write(b"raw").await.unwrap_err();
    assert_eq!(err.to_string(), "Blob error: Please use \"put\" method instead");

    blob.delete().await.unwrap();
    assert_eq!(backend.blob_count("images").await, 0);
}

#[tokio::test]
async fn test_small_images_are_stored_as_given() {
    let gallery = EntityType::builder("BlobGallery")
        .collection("blob_galleries")
        .field(
            "cover",
            ImageField::with_codec(Arc::new(TextCodec)).size(ImageSize::new(400, 300)),
        )
        .build()
        .unwrap();
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(backend.clone());

    let mut entity = Entity::new(&gallery);
    let mut blob = store.blob(&mut entity, "cover").unwrap();
    blob.put(b"JPEG:200x100".to_vec(), doc! {}).await.unwrap();

    assert_eq!(backend.blob_count("images").await, 1);
    assert_eq!(blob.get().await.unwrap().unwrap().data, b"JPEG:200x100");
    assert_eq!(
        blob.metadata().await.unwrap().unwrap().get("thumbnail_id"),
        Some(&Bson::Null)
    );
    assert_eq!(blob.thumbnail().await.unwrap(), None);
}

#[tokio::test]
async fn test_undecodable_images_are_rejected_before_storing() {
    let profile = EntityType::builder("BlobInvalidProfile")
        .collection("blob_invalid_profiles")
        .field(
            "avatar",
            ImageField::with_codec(Arc::new(TextCodec)).thumbnail_size(ImageSize::new(10, 10)),
        )
        .build()
        .unwrap();
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(backend.clone());

    let mut entity = Entity::new(&profile);
    let mut blob = store.blob(&mut entity, "avatar").unwrap();
    let err = blob.put(b"garbage".to_vec(), doc! {}).await.unwrap_err();

    let err = err.as_validation().unwrap();
    assert_eq!(err.message, "Invalid image");
    assert_eq!(err.field.as_deref(), Some("avatar"));
    assert_eq!(backend.blob_count("images").await, 0);
}

#[test]
fn test_blob_access_requires_a_blob_field() {
    let note = EntityType::builder("BlobNote")
        .collection("blob_notes")
        .field("text", StringField::new())
        .build()
        .unwrap();
    let store = DocumentStore::new(InMemoryStore::new());

    let mut entity = Entity::new(&note);
    assert!(matches!(
        store.blob(&mut entity, "text"),
        Err(ModelError::Configuration(_))
    ));
}
