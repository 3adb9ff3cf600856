//! Builder for step result metadata

use chrono::{DateTime, Local};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use crate::types::Metadata;

/// Collects the conventional metadata keys steps report
///
/// Keys: `input_rows`, `output_rows`, `rows_removed`, `processed`, `failed`,
/// `started_at`, `finished_at`, `duration_secs`, `file_path`, `file_size`.
#[derive(Debug, Clone, Default)]
pub struct StepMetadataBuilder {
    metadata: Metadata,
}

impl StepMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row counts before and after a transformation
    pub fn row_counts(mut self, input_rows: usize, output_rows: usize) -> Self {
        self.metadata.insert("input_rows".into(), input_rows.into());
        self.metadata.insert("output_rows".into(), output_rows.into());
        self.metadata.insert(
            "rows_removed".into(),
            input_rows.saturating_sub(output_rows).into(),
        );
        self
    }

    pub fn process_counts(mut self, processed: usize, failed: usize) -> Self {
        self.metadata.insert("processed".into(), processed.into());
        self.metadata.insert("failed".into(), failed.into());
        self
    }

    pub fn time_info(mut self, started_at: DateTime<Local>, finished_at: DateTime<Local>) -> Self {
        self.metadata
            .insert("started_at".into(), started_at.to_rfc3339().into());
        self.metadata
            .insert("finished_at".into(), finished_at.to_rfc3339().into());
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.metadata
            .insert("duration_secs".into(), duration.as_secs_f64().into());
        self
    }

    /// Path and, when given, size of a file the step read or wrote
    pub fn file_info(mut self, path: &Path, size: Option<u64>) -> Self {
        self.metadata
            .insert("file_path".into(), path.display().to_string().into());
        if let Some(size) = size {
            self.metadata.insert("file_size".into(), size.into());
        }
        self
    }

    pub fn custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Metadata {
        self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_counts_and_custom() {
        let metadata = StepMetadataBuilder::new()
            .row_counts(120, 100)
            .process_counts(100, 2)
            .custom("bank", "CUB")
            .build();

        assert_eq!(metadata["rows_removed"], Value::from(20));
        assert_eq!(metadata["failed"], Value::from(2));
        assert_eq!(metadata["bank"], Value::from("CUB"));
    }

    #[test]
    fn test_file_info_without_size() {
        let metadata = StepMetadataBuilder::new()
            .file_info(Path::new("out/escrow.xlsx"), None)
            .build();
        assert_eq!(metadata["file_path"], Value::from("out/escrow.xlsx"));
        assert!(!metadata.contains_key("file_size"));
    }
}
