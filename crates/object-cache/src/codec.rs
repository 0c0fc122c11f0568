//! Byte/object codecs used by typed caches
//!
//! [`ImageCodec`] fully decodes PNG, JPEG and WebP data with the `image`
//! crate, so truncated or corrupt bytes are rejected rather than cached as
//! images. An [`Image`] keeps the bytes it was decoded from, so encoding is
//! lossless.

use crate::error::{CacheError, Result};
use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageReader};
use serde::Serialize;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

/// Converts between a typed value and the bytes stored on disk
pub trait Codec: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Fails with [`CacheError::Encode`]
    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>>;

    /// Fails with [`CacheError::Decode`]
    fn decode(&self, data: &[u8]) -> Result<Self::Value>;
}

/// Encodings accepted by [`ImageCodec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    WebP,
}

impl ImageFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::WebP => "image/webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.content_type())
    }
}

impl TryFrom<image::ImageFormat> for ImageFormat {
    type Error = CacheError;

    fn try_from(format: image::ImageFormat) -> Result<Self> {
        match format {
            image::ImageFormat::Png => Ok(ImageFormat::Png),
            image::ImageFormat::Jpeg => Ok(ImageFormat::Jpeg),
            image::ImageFormat::WebP => Ok(ImageFormat::WebP),
            other => Err(CacheError::Decode(format!(
                "unsupported image format: {:?}",
                other
            ))),
        }
    }
}

/// A decoded image together with its original encoded bytes
#[derive(Clone, PartialEq)]
pub struct Image {
    format: ImageFormat,
    pixels: Arc<DynamicImage>,
    data: Bytes,
}

impl Image {
    /// Decode an encoded image, keeping `data` for lossless re-encoding
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let reader = ImageReader::new(Cursor::new(data.as_ref()))
            .with_guessed_format()
            .map_err(|e| CacheError::Decode(e.to_string()))?;

        let format = reader
            .format()
            .ok_or_else(|| CacheError::Decode("unrecognised image format".to_string()))?;
        let format = ImageFormat::try_from(format)?;
        let pixels = reader.decode()?;

        Ok(Self {
            format,
            pixels: Arc::new(pixels),
            data,
        })
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.pixels.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.pixels.dimensions().1
    }

    /// Decoded pixel data
    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    /// Encoded bytes exactly as decoded
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("format", &self.format)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("size", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl Codec for ImageCodec {
    type Value = Image;

    fn encode(&self, value: &Image) -> Result<Vec<u8>> {
        Ok(value.data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Image> {
        Image::from_bytes(Bytes::copy_from_slice(data))
    }
}
