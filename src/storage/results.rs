//! Append-only results table

use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use super::registry::{FAMILY_NAME_COLUMN, FIRST_NAME_COLUMN, STUDENT_NUMBER_COLUMN};

pub const TOTAL_SCORE_COLUMN: &str = "Total Score";

/// A fully validated submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub family_name: String,
    pub first_name: String,
    pub student_number: String,
    /// Item scores in template order
    pub scores: Vec<(String, u32)>,
    pub total: u32,
}

impl ResultRecord {
    /// Column names in natural order
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec![
            FAMILY_NAME_COLUMN.to_string(),
            FIRST_NAME_COLUMN.to_string(),
            STUDENT_NUMBER_COLUMN.to_string(),
        ];
        columns.extend(self.scores.iter().map(|(name, _)| name.clone()));
        columns.push(TOTAL_SCORE_COLUMN.to_string());
        columns
    }

    /// Value for a column, if the record has it
    pub fn value(&self, column: &str) -> Option<String> {
        match column {
            FAMILY_NAME_COLUMN => Some(self.family_name.clone()),
            FIRST_NAME_COLUMN => Some(self.first_name.clone()),
            STUDENT_NUMBER_COLUMN => Some(self.student_number.clone()),
            TOTAL_SCORE_COLUMN => Some(self.total.to_string()),
            item => self
                .scores
                .iter()
                .find(|(name, _)| name == item)
                .map(|(_, score)| score.to_string()),
        }
    }
}

/// Destination for accepted records; appending is its only mutation
pub trait ResultsSink {
    fn append(&mut self, record: &ResultRecord) -> Result<()>;
}

/// Results table stored as CSV
///
/// An existing header is the column contract: a record must supply every
/// column and nothing else, or it is refused before anything is written.
#[derive(Debug)]
pub struct CsvResultsSink {
    path: PathBuf,
    header: Option<Vec<String>>,
    missing_newline: bool,
}

impl CsvResultsSink {
    pub fn open(path: &Path) -> Result<Self> {
        let has_content = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        let header = if has_content {
            let mut reader = csv::Reader::from_path(path)
                .with_context(|| format!("Failed to open results table {:?}", path))?;
            let header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
            Some(header)
        } else {
            None
        };

        let missing_newline = has_content
            && !std::fs::read(path)
                .with_context(|| format!("Failed to read results table {:?}", path))?
                .ends_with(b"\n");

        Ok(Self {
            path: path.to_path_buf(),
            header,
            missing_newline,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn row_for(&self, header: &[String], record: &ResultRecord) -> Result<Vec<String>> {
        let row = header
            .iter()
            .map(|column| {
                record
                    .value(column)
                    .with_context(|| format!("Record has no value for column '{}'", column))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(extra) = record.columns().into_iter().find(|c| !header.contains(c)) {
            bail!("Results table {:?} has no '{}' column", self.path, extra);
        }
        Ok(row)
    }
}

impl ResultsSink for CsvResultsSink {
    fn append(&mut self, record: &ResultRecord) -> Result<()> {
        let (header, write_header) = match &self.header {
            Some(header) => (header.clone(), false),
            None => (record.columns(), true),
        };
        let row = self.row_for(&header, record)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open results table {:?}", self.path))?;
        if self.missing_newline {
            (&file).write_all(b"\n")?;
        }
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if write_header {
            writer.write_record(&header)?;
        }
        writer.write_record(&row)?;
        writer.flush()?;

        self.header = Some(header);
        self.missing_newline = false;
        info!("Appended {} to {:?}", record.student_number, self.path);
        Ok(())
    }
}

/// In-memory results table
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryResultsSink {
    pub records: Vec<ResultRecord>,
}

#[cfg(test)]
impl ResultsSink for MemoryResultsSink {
    fn append(&mut self, record: &ResultRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(number: &str) -> ResultRecord {
        ResultRecord {
            family_name: "SMITH".to_string(),
            first_name: "JOHN".to_string(),
            student_number: number.to_string(),
            scores: vec![("Q1".to_string(), 5), ("Q2".to_string(), 5)],
            total: 10,
        }
    }

    #[test]
    fn test_new_table_gets_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let mut sink = CsvResultsSink::open(&path).unwrap();
        sink.append(&record("1001")).unwrap();
        sink.append(&record("1002")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "Family Name,First Name,Student Number,Q1,Q2,Total Score\n\
             SMITH,JOHN,1001,5,5,10\n\
             SMITH,JOHN,1002,5,5,10\n"
        );
    }

    #[test]
    fn test_existing_header_order_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        std::fs::write(&path, "Student Number,Family Name,First Name,Total Score,Q2,Q1\n").unwrap();

        let mut sink = CsvResultsSink::open(&path).unwrap();
        sink.append(&record("1001")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("1001,SMITH,JOHN,10,5,5\n"));
    }

    #[test]
    fn test_column_mismatch_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let header = "Family Name,First Name,Student Number,Q1,Q2,Q3,Total Score\n";
        std::fs::write(&path, header).unwrap();

        let mut sink = CsvResultsSink::open(&path).unwrap();
        let err = sink.append(&record("1001")).unwrap_err();
        assert!(err.to_string().contains("Q3"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), header);

        std::fs::write(&path, "Family Name,First Name,Student Number,Q1,Total Score\n").unwrap();
        let mut sink = CsvResultsSink::open(&path).unwrap();
        let err = sink.append(&record("1001")).unwrap_err();
        assert!(err.to_string().contains("Q2"));
    }

    #[test]
    fn test_header_without_trailing_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        std::fs::write(&path, "Family Name,First Name,Student Number,Q1,Q2,Total Score").unwrap();

        CsvResultsSink::open(&path).unwrap().append(&record("1001")).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().nth(1), Some("SMITH,JOHN,1001,5,5,10"));
    }

    #[test]
    fn test_names_with_commas_are_quoted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let mut rec = record("1001");
        rec.family_name = "SMITH, JR".to_string();

        CsvResultsSink::open(&path).unwrap().append(&rec).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"SMITH, JR\",JOHN,1001"));
    }

    #[test]
    fn test_memory_sink_collects() {
        let mut sink = MemoryResultsSink::default();
        sink.append(&record("1")).unwrap();
        assert_eq!(sink.records.len(), 1);
    }
}
