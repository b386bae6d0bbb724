//! Small JPEG previews for image uploads, returned as data URLs.
//!
//! Generation is best-effort: unreadable or undecodable files yield `None`
//! and never fail the upload that requested them.

use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dropzone_transfer::{FileContents, FileDescriptor};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

/// Longest edge of a generated thumbnail, in pixels.
pub const MAX_THUMBNAIL_SIZE: u32 = 100;

/// JPEG quality used for thumbnails.
pub const JPEG_QUALITY: u8 = 80;

/// Failures while producing a thumbnail. Never surfaced to callers of
/// [`ThumbnailSource::thumbnail`].
#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("no readable contents")]
    NoContents,

    #[error("decode task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Produces an optional preview for a file.
pub trait ThumbnailSource: Send + Sync {
    fn thumbnail(
        &self,
        file: FileDescriptor,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;
}

/// Decodes images and re-encodes them as downscaled JPEG data URLs.
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    max_size: u32,
    quality: u8,
}

impl Default for ThumbnailGenerator {
    fn default() -> Self {
        Self {
            max_size: MAX_THUMBNAIL_SIZE,
            quality: JPEG_QUALITY,
        }
    }
}

impl ThumbnailGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a `data:image/jpeg;base64,...` URL, or `None` for non-image
    /// files and any read or decode failure.
    pub async fn generate(&self, file: &FileDescriptor) -> Option<String> {
        if !file.is_image() {
            return None;
        }
        match self.try_generate(file).await {
            Ok(url) => Some(url),
            Err(e) => {
                debug!(file = %file.name, error = %e, "thumbnail generation skipped");
                None
            }
        }
    }

    async fn try_generate(&self, file: &FileDescriptor) -> Result<String, ThumbnailError> {
        let bytes: Arc<[u8]> = match &file.contents {
            FileContents::Path(path) => tokio::fs::read(path).await?.into(),
            FileContents::Memory(bytes) => Arc::clone(bytes),
            FileContents::Detached => return Err(ThumbnailError::NoContents),
        };

        let (max_size, quality) = (self.max_size, self.quality);
        let jpeg =
            tokio::task::spawn_blocking(move || render_jpeg(&bytes, max_size, quality)).await??;

        Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg)))
    }
}

impl ThumbnailSource for ThumbnailGenerator {
    fn thumbnail(
        &self,
        file: FileDescriptor,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async move { self.generate(&file).await })
    }
}

/// Scales `(width, height)` to fit a `max x max` box, keeping aspect ratio.
///
/// Images already inside the box keep their size. Fractional results
/// truncate, with a floor of one pixel.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    let (w, h) = (u64::from(width), u64::from(height));
    let max64 = u64::from(max);
    let (w, h) = if w > h {
        if w > max64 { (max64, h * max64 / w) } else { (w, h) }
    } else if h > max64 {
        (w * max64 / h, max64)
    } else {
        (w, h)
    };
    ((w as u32).max(1), (h as u32).max(1))
}

fn render_jpeg(bytes: &[u8], max_size: u32, quality: u8) -> Result<Vec<u8>, ThumbnailError> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = img.dimensions();
    let (tw, th) = fit_within(w, h, max_size);
    let resized = if (tw, th) == (w, h) {
        img
    } else {
        img.resize_exact(tw, th, FilterType::Triangle)
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
    Ok(out.into_inner())
}
