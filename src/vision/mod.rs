//! Vision Layer
//!
//! Turns a photographed answer sheet into recognized field text:
//! perspective normalization, region cropping and the recognition
//! backends. Supported backends:
//! - Tesseract command-line tool (names and score cells)
//! - Gemini generative language API (student number, optionally every field)

pub mod extract;
pub mod gemini;
pub mod normalize;
pub mod ocr;
pub mod regions;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{BackendSettings, RecognizerKind};

pub use extract::FieldExtractor;
pub use gemini::GeminiBackend;
pub use normalize::{SheetBoundary, SheetNormalizer};
pub use ocr::{BackendError, InstructionExtractor, Recognizer, TesseractRecognizer};
pub use regions::RegionTable;

/// Build the field extractor for the configured backends
///
/// Handles are created once here and reused for every sheet.
pub fn build_field_extractor(settings: &BackendSettings) -> Result<FieldExtractor> {
    let gemini = GeminiBackend::from_settings(settings)
        .context("Student number extraction needs the Gemini backend")?;

    let recognizer: Box<dyn Recognizer> = match settings.recognizer {
        RecognizerKind::Tesseract => Box::new(
            TesseractRecognizer::new(
                settings.tesseract_datapath.as_deref(),
                &settings.tesseract_language,
                settings.tesseract_psm,
            )
            .context("Failed to start the Tesseract recognizer")?,
        ),
        RecognizerKind::Gemini => Box::new(gemini.clone()),
    };

    info!(
        "Recognition backends: {} for text, {} for student numbers",
        recognizer.name(),
        InstructionExtractor::name(&gemini)
    );

    Ok(FieldExtractor::new(
        recognizer,
        Box::new(gemini),
        settings.identifier_instruction.clone(),
    ))
}
