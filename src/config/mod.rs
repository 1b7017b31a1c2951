//! Application Configuration
//!
//! Pipeline settings, the answer-sheet template and backend selection,
//! stored in TOML format. Secrets never live here: the API key is read
//! from the environment variable named by `backends.api_key_env`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::regions::{reference_template, RegionSpec, RegionTable};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General pipeline settings
    pub general: GeneralConfig,
    /// Sheet boundary detection settings
    pub normalizer: NormalizerSettings,
    /// Answer-sheet region layout
    pub template: TemplateConfig,
    /// Recognition backend settings
    pub backends: BackendSettings,
    /// Output locations
    pub storage: StorageSettings,
}

impl AppConfig {
    /// Build the validated region table for the configured canonical size
    pub fn region_table(&self) -> Result<RegionTable> {
        RegionTable::new(
            self.template.regions.clone(),
            self.general.canonical_width,
            self.general.canonical_height,
        )
        .context("Invalid answer-sheet template")
    }
}

/// General pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Canonical image width in pixels
    pub canonical_width: u32,
    /// Canonical image height in pixels
    pub canonical_height: u32,
    /// Minimum identity confidence (0-100) for every field before scores are read
    pub confidence_threshold: u8,
    /// Highest value a single score item may be corrected to
    pub max_item_score: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            canonical_width: 800,
            canonical_height: 1000,
            confidence_threshold: 50,
            max_item_score: 10,
        }
    }
}

/// Sheet boundary detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    /// Gaussian smoothing sigma before edge detection
    pub blur_sigma: f32,
    /// Canny low hysteresis threshold
    pub canny_low: f32,
    /// Canny high hysteresis threshold
    pub canny_high: f32,
    /// Polygon approximation tolerance as a fraction of the contour perimeter
    pub epsilon_ratio: f64,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            // Equivalent of a 5x5 kernel with automatic sigma
            blur_sigma: 1.1,
            canny_low: 50.0,
            canny_high: 150.0,
            epsilon_ratio: 0.02,
        }
    }
}

/// Answer-sheet region layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub regions: Vec<RegionSpec>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            regions: reference_template(),
        }
    }
}

/// Which backend reads names and score cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerKind {
    /// Local `tesseract` executable
    #[default]
    Tesseract,
    /// Instruction-driven service, also used for the student number
    Gemini,
}

/// Recognition backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Backend for name and score regions
    pub recognizer: RecognizerKind,
    /// Directory holding the `.traineddata` files (system tessdata when unset)
    pub tesseract_datapath: Option<PathBuf>,
    /// Tesseract language pack
    pub tesseract_language: String,
    /// Tesseract page segmentation mode (7 = single text line)
    pub tesseract_psm: u8,
    /// Base URL of the generative language API
    pub gemini_endpoint: String,
    /// Model used for instruction-driven extraction
    pub gemini_model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Minimum delay before every instruction-driven request
    pub request_pacing_ms: u64,
    /// HTTP timeout for a single request
    pub request_timeout_secs: u64,
    /// Instruction sent with the student number region
    pub identifier_instruction: String,
    /// Instruction sent with name and score regions when `recognizer = "gemini"`
    pub text_instruction: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            recognizer: RecognizerKind::Tesseract,
            tesseract_datapath: None,
            tesseract_language: "eng".to_string(),
            tesseract_psm: 7,
            gemini_endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            request_pacing_ms: 3000,
            request_timeout_secs: 60,
            identifier_instruction:
                "Extract only the student number from this image. Return digits only.".to_string(),
            text_instruction:
                "Transcribe the single line of text in this image. Return the text only."
                    .to_string(),
        }
    }
}

/// Output locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for quarantined sheets (defaults to `<data dir>/manual_inspection`)
    pub quarantine_dir: Option<PathBuf>,
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
