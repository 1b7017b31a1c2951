//! Sheet Capture Layer
//!
//! Loads photographed answer sheets from disk and applies the operator's
//! rotation before the sheet enters the pipeline.

pub mod frame;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub use frame::RawImage;

/// Clockwise rotation applied to a photo before normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Parse a rotation given in degrees
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }
}

/// Rotate a raw photo clockwise in place
pub fn rotate(raw: RawImage, rotation: Rotation) -> RawImage {
    let image = match rotation {
        Rotation::None => return raw,
        Rotation::Cw90 => raw.image.rotate90(),
        Rotation::Cw180 => raw.image.rotate180(),
        Rotation::Cw270 => raw.image.rotate270(),
    };
    RawImage { image, ..raw }
}

/// Load a sheet photo and apply `rotation`
pub fn load_sheet(path: &Path, rotation: Rotation) -> Result<RawImage> {
    let image = image::open(path).with_context(|| format!("Failed to load sheet image: {:?}", path))?;
    let raw = RawImage::new(image, path);
    debug!(
        "Loaded {:?} ({}x{}), rotating {} degrees",
        path,
        raw.dimensions().0,
        raw.dimensions().1,
        rotation.degrees()
    );
    Ok(rotate(raw, rotation))
}
