//! Storage Layer
//!
//! Reference registry input, append-only results output and the
//! quarantine store for sheets that need manual follow-up.

pub mod quarantine;
pub mod registry;
pub mod results;

use anyhow::Result;
use std::path::PathBuf;

pub use quarantine::{DirectoryQuarantine, QuarantineEntry, QuarantineSink};
pub use registry::Registry;
pub use results::{CsvResultsSink, ResultRecord, ResultsSink};

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "examingest", "ExamIngest")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Default location for quarantined sheets
pub fn default_quarantine_dir() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("manual_inspection"))
}
