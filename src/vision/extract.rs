//! Field extraction from the canonical sheet
//!
//! Crops each template region and reads it through the matching backend:
//! the student number goes through the instruction-driven pathway, every
//! other field through the line recognizer.

use image::{imageops, RgbImage};
use tracing::debug;

use super::ocr::{to_channel_order, BackendError, InstructionExtractor, Recognizer};
use super::regions::{FieldRole, RegionSpec, RegionTable};

/// Text read from one region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedField {
    pub name: String,
    pub role: FieldRole,
    pub text: String,
}

/// Raw recognized text per field, in template order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    fields: Vec<ExtractedField>,
}

impl ExtractedFields {
    pub fn new(fields: Vec<ExtractedField>) -> Self {
        Self { fields }
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.text.as_str())
    }

    /// Text of the first field with `role`, empty when the template lacks it
    pub fn by_role(&self, role: FieldRole) -> &str {
        self.fields
            .iter()
            .find(|f| f.role == role)
            .map(|f| f.text.as_str())
            .unwrap_or("")
    }

    /// Score item fields in template order
    pub fn scores(&self) -> impl Iterator<Item = &ExtractedField> {
        self.fields.iter().filter(|f| f.role == FieldRole::Score)
    }
}

/// Keep only the digits of a score cell; nothing numeric reads as "0"
pub fn sanitize_score(text: &str) -> String {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        "0".to_string()
    } else {
        digits
    }
}

/// Reads every template region of a canonical image
pub struct FieldExtractor {
    recognizer: Box<dyn Recognizer>,
    identifier_backend: Box<dyn InstructionExtractor>,
    identifier_instruction: String,
}

impl FieldExtractor {
    pub fn new(
        recognizer: Box<dyn Recognizer>,
        identifier_backend: Box<dyn InstructionExtractor>,
        identifier_instruction: impl Into<String>,
    ) -> Self {
        Self {
            recognizer,
            identifier_backend,
            identifier_instruction: identifier_instruction.into(),
        }
    }

    /// Extract all fields. A backend failure aborts the whole extraction.
    pub fn extract(
        &self,
        canonical: &RgbImage,
        regions: &RegionTable,
    ) -> Result<ExtractedFields, BackendError> {
        let fields = regions
            .iter()
            .map(|region| {
                let text = self.read_region(canonical, region)?;
                debug!("{} ({}): {:?}", region.name, region.role, text);
                Ok(ExtractedField {
                    name: region.name.clone(),
                    role: region.role,
                    text,
                })
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        Ok(ExtractedFields::new(fields))
    }

    fn read_region(&self, canonical: &RgbImage, region: &RegionSpec) -> Result<String, BackendError> {
        let rect = region.rect;
        let crop = imageops::crop_imm(canonical, rect.x1, rect.y1, rect.width(), rect.height()).to_image();

        if region.role == FieldRole::StudentNumber {
            // Raw answer; digit-only cleanup is the caller's call
            let text = self
                .identifier_backend
                .extract(&crop, &self.identifier_instruction)?;
            return Ok(text.trim().to_string());
        }

        let crop = to_channel_order(crop, self.recognizer.channel_order());
        let text = self.recognizer.recognize(&crop)?.trim().to_uppercase();
        if region.role.is_numeric() {
            Ok(sanitize_score(&text))
        } else {
            Ok(text)
        }
    }
}
