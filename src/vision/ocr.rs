//! OCR (Optical Character Recognition) backends
//!
//! Two seams: [`Recognizer`] reads one line of text from a small region,
//! [`InstructionExtractor`] asks an external service to pull a specific
//! value out of a region following a natural-language instruction.

use image::{ImageFormat, RgbImage};
use leptess::{LepTess, Variable};
use std::cell::RefCell;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Failures talking to a recognition backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to encode region image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("tesseract: {0}")]
    Tesseract(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),
}

/// Channel order a backend expects its pixels in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Reads a single line of printed or handwritten text
pub trait Recognizer {
    fn name(&self) -> &str;

    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb
    }

    /// Best-effort text for one cropped region
    fn recognize(&self, region: &RgbImage) -> Result<String, BackendError>;
}

/// Extracts a value from a region as instructed, subject to an external rate limit
pub trait InstructionExtractor {
    fn name(&self) -> &str;

    fn extract(&self, region: &RgbImage, instruction: &str) -> Result<String, BackendError>;
}

/// Reorder channels of an RGB crop for a backend
pub fn to_channel_order(mut region: RgbImage, order: ChannelOrder) -> RgbImage {
    if order == ChannelOrder::Bgr {
        for pixel in region.pixels_mut() {
            pixel.0.swap(0, 2);
        }
    }
    region
}

/// Encode a region as PNG bytes
pub fn encode_png(region: &RgbImage) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    region.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Recognizer backed by an in-process Tesseract engine
///
/// The engine is initialized once and reused for every region.
pub struct TesseractRecognizer {
    engine: RefCell<LepTess>,
    language: String,
}

impl fmt::Debug for TesseractRecognizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TesseractRecognizer")
            .field("language", &self.language)
            .finish()
    }
}

impl TesseractRecognizer {
    /// Load `language` from `datapath` (or the system tessdata) in the given page segmentation mode
    pub fn new(datapath: Option<&Path>, language: &str, page_seg_mode: u8) -> Result<Self, BackendError> {
        let datapath = datapath.map(|p| p.to_string_lossy().into_owned());
        let mut engine = LepTess::new(datapath.as_deref(), language).map_err(|e| {
            BackendError::Tesseract(format!("failed to initialize tesseract for '{}': {}", language, e))
        })?;
        engine
            .set_variable(Variable::TesseditPagesegMode, &page_seg_mode.to_string())
            .map_err(|e| BackendError::Tesseract(format!("failed to set page segmentation mode: {}", e)))?;

        Ok(Self {
            engine: RefCell::new(engine),
            language: language.to_string(),
        })
    }
}

impl Recognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, region: &RgbImage) -> Result<String, BackendError> {
        let png = encode_png(region)?;
        let mut engine = self.engine.borrow_mut();

        engine
            .set_image_from_mem(&png)
            .map_err(|e| BackendError::Tesseract(format!("failed to load region: {}", e)))?;
        // Must follow set_image
        engine.set_source_resolution(300);

        let text = engine
            .get_utf8_text()
            .map_err(|e| BackendError::Tesseract(format!("failed to read text: {}", e)))?;
        debug!("tesseract read {:?} from {}x{} region", text.trim(), region.width(), region.height());
        Ok(text)
    }
}
