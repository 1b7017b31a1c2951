//! Raw photograph of an answer sheet

use image::DynamicImage;
use std::path::PathBuf;
use std::time::Instant;

/// An uploaded sheet photo, alive for one submission only
#[derive(Debug)]
pub struct RawImage {
    /// Decoded pixels, arbitrary orientation and size
    pub image: DynamicImage,
    /// Where the photo came from (for logs)
    pub source: PathBuf,
    /// When the photo was loaded
    pub loaded_at: Instant,
}

impl RawImage {
    /// Wrap decoded pixels
    pub fn new(image: DynamicImage, source: impl Into<PathBuf>) -> Self {
        Self {
            image,
            source: source.into(),
            loaded_at: Instant::now(),
        }
    }

    /// Get image dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}
