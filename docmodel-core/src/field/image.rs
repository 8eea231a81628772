//! Image fields: blob content run through a resize and thumbnail pipeline on `put`.
//!
//! Decoding and scaling are delegated to an [`ImageCodec`]. With the `image` cargo
//! feature enabled, [`ImageField::new`] uses [`RasterCodec`]; without it, an image
//! field can only be declared with an explicit codec through
//! [`ImageField::with_codec`].
//!
//! Stored metadata of the primary content: `width`, `height`, `format` and
//! `thumbnail_id` (the thumbnail's handle, or null).

use std::{any::Any, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use tracing::{debug, warn};

use crate::{
    backend::DynStoreBackend,
    error::{ModelResult, ValidationError},
    field::{
        Field, FieldContext, FieldCore, FieldOptions, prepare_each,
        file::{
            BlobField, BlobProxy, already_has_content, assign_content, blob_to_native,
            blob_to_storage, fetch_content, remove_content, store_content,
        },
    },
    query::QueryOp,
    value::Value,
};

/// Bucket used by [`ImageField`] unless configured otherwise.
pub const DEFAULT_IMAGE_BUCKET: &str = "images";

/// A bounding box. With `force`, images are cropped to fill it exactly; otherwise
/// they are scaled down proportionally to fit inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
    pub force: bool,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            force: false,
        }
    }

    pub fn forced(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            force: true,
        }
    }

    fn is_exceeded_by(&self, info: &ImageInfo) -> bool {
        info.width > self.width || info.height > self.height
    }
}

/// What a codec found in an encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Upper-case format name such as `PNG` or `JPEG`.
    pub format: String,
}

impl ImageInfo {
    fn metadata(&self) -> Document {
        doc! {
            "width": self.width as i64,
            "height": self.height as i64,
            "format": self.format.clone(),
        }
    }
}

/// Decodes and rescales encoded images. Output keeps the input's format.
pub trait ImageCodec: Send + Sync + Debug {
    /// Inspects an encoded image; undecodable input is a validation failure.
    fn probe(&self, data: &[u8]) -> Result<ImageInfo, ValidationError>;

    /// Rescales an encoded image into `size`.
    fn resize(&self, data: &[u8], size: ImageSize) -> ModelResult<Vec<u8>>;
}

/// Image content with an optional maximum size and derived thumbnail.
#[derive(Debug)]
pub struct ImageField {
    core: FieldCore,
    bucket: String,
    size: Option<ImageSize>,
    thumbnail_size: Option<ImageSize>,
    codec: Arc<dyn ImageCodec>,
}

impl ImageField {
    /// An image field backed by the raster codec.
    ///
    /// Fails with a configuration error when the crate was built without the `image`
    /// feature.
    pub fn new() -> ModelResult<Self> {
        #[cfg(feature = "image")]
        {
            Ok(Self::with_codec(Arc::new(RasterCodec)))
        }
        #[cfg(not(feature = "image"))]
        {
            Err(crate::error::ModelError::Configuration(
                "ImageField requires the `image` feature or an explicit codec".to_string(),
            ))
        }
    }

    pub fn with_codec(codec: Arc<dyn ImageCodec>) -> Self {
        Self {
            core: FieldCore::new(FieldOptions::default()),
            bucket: DEFAULT_IMAGE_BUCKET.to_string(),
            size: None,
            thumbnail_size: None,
            codec,
        }
    }

    /// Images larger than `size` are rescaled before being stored.
    pub fn size(mut self, size: ImageSize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn thumbnail_size(mut self, size: ImageSize) -> Self {
        self.thumbnail_size = Some(size);
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    fn probe(&self, data: &[u8]) -> ModelResult<ImageInfo> {
        self.codec
            .probe(data)
            .map_err(|err| self.core.attribute(err).into())
    }
}

#[async_trait]
impl Field for ImageField {
    fn core(&self) -> &FieldCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FieldCore {
        &mut self.core
    }

    fn type_name(&self) -> &'static str {
        "ImageField"
    }

    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::Blob(_) => Ok(()),
            _ => Err(self.core.error("ImageField only accepts blob proxy values")),
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
impl BlobField for ImageField {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn allows_stream_writes(&self) -> bool {
        false
    }

    async fn put(
        &self,
        proxy: &mut BlobProxy,
        data: Vec<u8>,
        metadata: Document,
        backend: &dyn DynStoreBackend,
    ) -> ModelResult<()> {
        if proxy.has_content() {
            return Err(already_has_content());
        }

        let info = self.probe(&data)?;
        let (data, info) = match self.size {
            Some(size) if size.is_exceeded_by(&info) => {
                let resized = self.codec.resize(&data, size)?;
                let info = self.probe(&resized)?;
                debug!(width = info.width, height = info.height, "resized image");
                (resized, info)
            }
            _ => (data, info),
        };

        let thumbnail_id = match self.thumbnail_size {
            Some(size) => {
                let thumbnail = self.codec.resize(&data, size)?;
                let thumbnail_info = self.probe(&thumbnail)?;
                let id = backend
                    .put_blob(&self.bucket, thumbnail, thumbnail_info.metadata())
                    .await?;
                Bson::ObjectId(id)
            }
            None => Bson::Null,
        };

        let mut metadata = metadata;
        for (key, value) in info.metadata() {
            metadata.insert(key, value);
        }
        metadata.insert("thumbnail_id", thumbnail_id);

        store_content(&self.bucket, proxy, data, metadata, backend).await
    }

    /// Removes the thumbnail first, then the primary content.
    async fn delete(
        &self,
        proxy: &mut BlobProxy,
        backend: &dyn DynStoreBackend,
    ) -> ModelResult<()> {
        let thumbnail_id = fetch_content(&self.bucket, proxy, backend)
            .await
            .and_then(|blob| blob.metadata.get_object_id("thumbnail_id").ok());

        if let Some(id) = thumbnail_id {
            backend.delete_blob(&self.bucket, id).await.inspect_err(|err| {
                warn!(bucket = %self.bucket, %id, error = %err, "failed to delete thumbnail");
            })?;
        }

        remove_content(&self.bucket, proxy, backend).await
    }
}

#[cfg(feature = "image")]
pub use self::raster::RasterCodec;

#[cfg(feature = "image")]
mod raster {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, imageops::FilterType};

    use super::{ImageCodec, ImageInfo, ImageSize};
    use crate::error::{ModelError, ModelResult, ValidationError};

    fn invalid_image() -> ValidationError {
        ValidationError::new("Invalid image")
    }

    /// [`ImageCodec`] backed by the `image` crate.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct RasterCodec;

    fn decode(data: &[u8]) -> Result<(DynamicImage, ImageFormat), ValidationError> {
        let format = image::guess_format(data).map_err(|_| invalid_image())?;
        let image =
            image::load_from_memory_with_format(data, format).map_err(|_| invalid_image())?;
        Ok((image, format))
    }

    fn format_name(format: ImageFormat) -> String {
        format!("{format:?}").to_uppercase()
    }

    impl ImageCodec for RasterCodec {
        fn probe(&self, data: &[u8]) -> Result<ImageInfo, ValidationError> {
            let (image, format) = decode(data)?;
            Ok(ImageInfo {
                width: image.width(),
                height: image.height(),
                format: format_name(format),
            })
        }

        fn resize(&self, data: &[u8], size: ImageSize) -> ModelResult<Vec<u8>> {
            let (image, format) = decode(data)?;

            let resized = if size.force {
                image.resize_to_fill(size.width, size.height, FilterType::Lanczos3)
            } else if image.width() > size.width || image.height() > size.height {
                image.thumbnail(size.width, size.height)
            } else {
                image
            };
            // JPEG has no alpha channel.
            let resized = match format {
                ImageFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
                _ => resized,
            };

            let mut encoded = Cursor::new(Vec::new());
            resized
                .write_to(&mut encoded, format)
                .map_err(|err| ModelError::Serialization(err.to_string()))?;

            Ok(encoded.into_inner())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullCodec;

    impl ImageCodec for NullCodec {
        fn probe(&self, _data: &[u8]) -> Result<ImageInfo, ValidationError> {
            Err(ValidationError::new("Invalid image"))
        }

        fn resize(&self, data: &[u8], _size: ImageSize) -> ModelResult<Vec<u8>> {
            Ok(data.to_vec())
        }
    }

    #[test]
    fn stream_writes_are_disabled() {
        let field = ImageField::with_codec(Arc::new(NullCodec));
        assert!(!field.allows_stream_writes());
        assert_eq!(BlobField::bucket(&field), DEFAULT_IMAGE_BUCKET);
    }

    #[cfg(not(feature = "image"))]
    #[test]
    fn missing_codec_is_a_configuration_error() {
        assert!(matches!(
            ImageField::new(),
            Err(crate::error::ModelError::Configuration(_))
        ));
    }

    #[test]
    fn size_limits_compare_both_dimensions() {
        let info = ImageInfo {
            width: 800,
            height: 200,
            format: "PNG".to_string(),
        };
        assert!(ImageSize::new(640, 480).is_exceeded_by(&info));
        assert!(!ImageSize::new(800, 480).is_exceeded_by(&info));
    }
}
