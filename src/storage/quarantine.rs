//! Quarantine store for sheets that failed a check
//!
//! Entries are keyed `{identifier}_{unix timestamp}` and never modified
//! after they are written.

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::fs::OpenOptions;
use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A persisted failed submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantineEntry {
    /// Unique key, `{identifier}_{timestamp}` plus a suffix on same-second collisions
    pub key: String,
    /// Unix timestamp of the failure
    pub timestamp: u64,
    /// Where the sheet was written, for stores backed by files
    pub location: Option<PathBuf>,
}

/// Durable store for sheets awaiting manual review
pub trait QuarantineSink {
    fn quarantine(&mut self, image: &RgbImage, identifier: &str, timestamp: u64) -> Result<QuarantineEntry>;
}

/// Make an OCR-derived identifier safe to use as a file name
pub fn quarantine_key(identifier: &str, timestamp: u64) -> String {
    let cleaned: String = identifier
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let cleaned = if cleaned.is_empty() { "UNKNOWN".to_string() } else { cleaned };
    format!("{}_{}", cleaned, timestamp)
}

/// Writes quarantined sheets as JPEG files into a directory
#[derive(Debug, Clone)]
pub struct DirectoryQuarantine {
    dir: PathBuf,
}

impl DirectoryQuarantine {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create quarantine directory {:?}", dir))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl QuarantineSink for DirectoryQuarantine {
    fn quarantine(&mut self, image: &RgbImage, identifier: &str, timestamp: u64) -> Result<QuarantineEntry> {
        let base = quarantine_key(identifier, timestamp);

        // Encode first so a failure leaves no file behind under the key
        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(image.clone())
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .with_context(|| format!("Failed to encode quarantined sheet {}", base))?;

        let mut attempt = 0;
        let (key, path, mut file) = loop {
            let key = if attempt == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, attempt)
            };
            let path = self.dir.join(format!("{}.jpg", key));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (key, path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {:?}", path));
                }
            }
        };

        if let Err(e) = file.write_all(&jpeg).and_then(|()| file.sync_all()) {
            // Leave nothing behind under the key
            let _ = std::fs::remove_file(&path);
            return Err(e).with_context(|| format!("Failed to write {:?}", path));
        }

        warn!("Flagged for manual inspection: {:?}", path);
        Ok(QuarantineEntry {
            key,
            timestamp,
            location: Some(path),
        })
    }
}

/// In-memory quarantine store
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryQuarantine {
    pub entries: Vec<QuarantineEntry>,
}

#[cfg(test)]
impl QuarantineSink for MemoryQuarantine {
    fn quarantine(&mut self, _image: &RgbImage, identifier: &str, timestamp: u64) -> Result<QuarantineEntry> {
        let entry = QuarantineEntry {
            key: quarantine_key(identifier, timestamp),
            timestamp,
            location: None,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_quarantine_key() {
        assert_eq!(quarantine_key("1001", 1700000000), "1001_1700000000");
        assert_eq!(quarantine_key(" 12/34 ", 5), "12_34_5");
        assert_eq!(quarantine_key("", 5), "UNKNOWN_5");
    }

    #[test]
    fn test_writes_jpeg_named_by_key() {
        let dir = tempdir().unwrap();
        let mut store = DirectoryQuarantine::new(&dir.path().join("manual_inspection")).unwrap();

        let entry = store.quarantine(&RgbImage::new(16, 16), "1001", 42).unwrap();
        assert_eq!(entry.key, "1001_42");
        let path = entry.location.unwrap();
        assert_eq!(path, store.dir().join("1001_42.jpg"));
        assert_eq!(image::open(&path).unwrap().width(), 16);
    }

    #[test]
    fn test_distinct_timestamps_do_not_collide() {
        let dir = tempdir().unwrap();
        let mut store = DirectoryQuarantine::new(dir.path()).unwrap();

        let a = store.quarantine(&RgbImage::new(4, 4), "1001", 100).unwrap();
        let b = store.quarantine(&RgbImage::new(4, 4), "1001", 101).unwrap();
        assert_ne!(a.location, b.location);
    }

    #[test]
    fn test_unencodable_sheet_leaves_no_file() {
        let dir = tempdir().unwrap();
        let mut store = DirectoryQuarantine::new(dir.path()).unwrap();

        // JPEG dimensions are limited to 65535
        let result = store.quarantine(&RgbImage::new(70_000, 1), "1001", 100);
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let entry = store.quarantine(&RgbImage::new(4, 4), "1001", 100).unwrap();
        assert_eq!(entry.key, "1001_100");
    }

    #[test]
    fn test_same_second_gets_suffix() {
        let dir = tempdir().unwrap();
        let mut store = DirectoryQuarantine::new(dir.path()).unwrap();

        let a = store.quarantine(&RgbImage::new(4, 4), "1001", 100).unwrap();
        let b = store.quarantine(&RgbImage::new(4, 4), "1001", 100).unwrap();
        assert_eq!(a.key, "1001_100");
        assert_eq!(b.key, "1001_100-1");
        assert!(b.location.unwrap().exists());
    }
}
