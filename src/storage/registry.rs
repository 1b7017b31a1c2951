//! Reference student registry

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

pub const FAMILY_NAME_COLUMN: &str = "Family Name";
pub const FIRST_NAME_COLUMN: &str = "First Name";
pub const STUDENT_NUMBER_COLUMN: &str = "Student Number";

/// One known student, text-normalized for comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub family_name: String,
    pub first_name: String,
    pub student_number: String,
}

impl IdentityRecord {
    /// Names are uppercased and trimmed; the student number is trimmed
    pub fn new(family_name: &str, first_name: &str, student_number: &str) -> Self {
        Self {
            family_name: family_name.trim().to_uppercase(),
            first_name: first_name.trim().to_uppercase(),
            student_number: student_number.trim().to_string(),
        }
    }
}

/// Read-only table of known students
#[derive(Debug, Clone, Default)]
pub struct Registry {
    records: Vec<IdentityRecord>,
}

impl Registry {
    pub fn new(records: Vec<IdentityRecord>) -> Self {
        Self { records }
    }

    /// Load from a CSV with at least the Family Name, First Name and Student Number columns
    pub fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open student registry {:?}", path))?;

        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .with_context(|| format!("Registry {:?} has no '{}' column", path, name))
        };
        let family = column(FAMILY_NAME_COLUMN)?;
        let first = column(FIRST_NAME_COLUMN)?;
        let number = column(STUDENT_NUMBER_COLUMN)?;

        let mut records = Vec::new();
        for (line, row) in reader.records().enumerate() {
            let row = row.with_context(|| format!("Bad registry row {}", line + 2))?;
            let field = |i: usize| row.get(i).unwrap_or("");
            records.push(IdentityRecord::new(field(family), field(first), field(number)));
        }

        info!("Loaded {} students from {:?}", records.len(), path);
        Ok(Self::new(records))
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// First record whose student number equals `number` exactly
    pub fn find_by_number(&self, number: &str) -> Option<&IdentityRecord> {
        self.records.iter().find(|r| r.student_number == number)
    }
}
