//! Image validation, perceptual hashing and thumbnail generation.


use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::fetcher::{FetchedResponse, Fetcher, Session};
use crate::CaptureError;
use crate::fingerprint::PerceptualHash;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Payloads smaller than this are rejected before decoding
    pub min_bytes: usize,
    /// Longest side of a stored thumbnail, in pixels
    pub thumbnail_max_side: u32,
    /// JPEG quality of stored thumbnails (1-100)
    pub thumbnail_quality: u8,
}

impl Default for ImageConfig {
    #[inline]
    fn default() -> Self {
        Self {
            min_bytes: 100,
            thumbnail_max_side: 320,
            thumbnail_quality: 85,
        }
    }
}

/// Why a fetched payload was not accepted as an image
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Content type '{0}' is not an image")]
    ContentType(String),

    #[error("Payload of {size} bytes is below the {min} byte minimum")]
    TooSmall { size: usize, min: usize },

    #[error("Image data could not be decoded: {0}")]
    Undecodable(String),
}

/// An image that passed validation, ready to be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub url: Url,
    pub phash: PerceptualHash,
    /// JPEG thumbnail; `None` when encoding failed after hashing
    pub thumbnail: Option<Vec<u8>>,
}

/// Check a response before trusting it as image data and decode it.
#[inline]
pub fn validate_response(
    response: &FetchedResponse,
    config: &ImageConfig,
) -> Result<DynamicImage, ValidationError> {
    if !(200..300).contains(&response.status) {
        return Err(ValidationError::Status(response.status));
    }

    if let Some(content_type) = response
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        if !content_type.to_ascii_lowercase().starts_with("image/") {
            return Err(ValidationError::ContentType(content_type.to_string()));
        }
    }

    if response.body.len() < config.min_bytes {
        return Err(ValidationError::TooSmall {
            size: response.body.len(),
            min: config.min_bytes,
        });
    }

    decode_image(&response.body)
}

/// Decode raw bytes into an image, guessing the format from its signature
#[inline]
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ValidationError> {
    image::load_from_memory(bytes).map_err(|e| ValidationError::Undecodable(e.to_string()))
}

/// Shrink an image so its longest side fits `thumbnail_max_side` and encode
/// it as JPEG. Images already within bounds keep their size.
#[inline]
pub fn render_thumbnail(
    image: &DynamicImage,
    config: &ImageConfig,
) -> Result<Vec<u8>, image::ImageError> {
    let max_side = config.thumbnail_max_side;
    let resized = if image.width() > max_side || image.height() > max_side {
        image.thumbnail(max_side, max_side)
    } else {
        image.clone()
    };

    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut buffer = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(
        &mut buffer,
        config.thumbnail_quality,
    ))?;
    Ok(buffer)
}

/// Validate, hash and thumbnail one fetched payload
#[inline]
pub fn analyze(
    url: Url,
    response: &FetchedResponse,
    config: &ImageConfig,
) -> Result<ProcessedImage, ValidationError> {
    let image = validate_response(response, config)?;
    let phash = PerceptualHash::from_image(&image);

    let thumbnail = match render_thumbnail(&image, config) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("Thumbnail encoding failed for {}: {}", url, e);
            None
        }
    };

    Ok(ProcessedImage {
        url,
        phash,
        thumbnail,
    })
}

/// Fetches candidate images and turns the valid ones into [`ProcessedImage`]s
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    fetcher: Fetcher,
    config: ImageConfig,
}

impl ImageProcessor {
    #[inline]
    pub fn new(fetcher: Fetcher, config: ImageConfig) -> Self {
        Self { fetcher, config }
    }

    /// Fetch `url` through the page's session and process it.
    ///
    /// Any error means the image should be skipped; the caller decides what to
    /// log.
    #[inline]
    pub async fn process(
        &self,
        url: &Url,
        referer: &Url,
        session: &Session,
    ) -> crate::Result<ProcessedImage> {
        let response = self.fetcher.fetch_image(session, url, referer).await?;

        let url = url.clone();
        let config = self.config.clone();
        let processed = tokio::task::spawn_blocking(move || analyze(url, &response, &config))
            .await
            .map_err(|e| CaptureError::Other(anyhow::anyhow!("image task failed: {e}")))??;

        debug!(
            "Processed image {} (phash {})",
            processed.url, processed.phash
        );
        Ok(processed)
    }
}
