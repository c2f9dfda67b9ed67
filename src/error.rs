use crate::dataset::Dataset;

/// Run-level failures: the whole import is rejected before any write happens.
/// Row-level problems are tallied in the report instead, and batch-level store
/// failures are collected as `PARTIAL_IMPORT` diagnostics by the sink.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("a file attachment is required for this dataset")]
    FileRequired,

    #[error("unsupported file extension {0:?}; expected .csv, .xlsx or .xls")]
    UnsupportedFormat(String),

    #[error("could not parse workbook: {0}")]
    Workbook(String),

    #[error("no qualifying header row found in the first {scanned} rows")]
    HeaderNotFound {
        scanned: usize,
        sample: Vec<String>,
    },

    #[error("header row {row_index} does not contain the {field:?} column")]
    AnchorColumnMissing {
        field: &'static str,
        row_index: usize,
    },

    #[error("no valid rows produced from {rows_read} data rows")]
    NoValidRows { rows_read: usize },

    #[error("could not read rows: {0}")]
    Source(String),

    #[error("store probe failed: {0}")]
    Store(String),
}

impl ImportError {
    /// Stable machine-readable code for the UI. Parse/detection failures are
    /// qualified by dataset, e.g. `OPPS_PARSE_FAILED`.
    pub fn error_code(&self, dataset: Dataset) -> String {
        match self {
            ImportError::FileRequired => "FILE_REQUIRED".to_string(),
            ImportError::Store(_) => "STORE_UNAVAILABLE".to_string(),
            ImportError::UnsupportedFormat(_)
            | ImportError::Workbook(_)
            | ImportError::HeaderNotFound { .. }
            | ImportError::AnchorColumnMissing { .. }
            | ImportError::NoValidRows { .. }
            | ImportError::Source(_) => {
                format!(
                    "{}_PARSE_FAILED",
                    dataset.as_str().replace('-', "_").to_ascii_uppercase()
                )
            }
        }
    }

    /// Diagnostic sample of the first scanned rows, present for header
    /// detection failures so an operator can see what the file looks like.
    pub fn sample_rows(&self) -> &[String] {
        match self {
            ImportError::HeaderNotFound { sample, .. } => sample,
            _ => &[],
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ImportError::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_dataset_qualified() {
        let err = ImportError::HeaderNotFound {
            scanned: 50,
            sample: vec![],
        };
        assert_eq!(err.error_code(Dataset::Opps), "OPPS_PARSE_FAILED");
        assert_eq!(
            err.error_code(Dataset::ZipCrosswalk),
            "ZIP_CROSSWALK_PARSE_FAILED"
        );
        assert_eq!(
            ImportError::FileRequired.error_code(Dataset::Mpfs),
            "FILE_REQUIRED"
        );
    }
}
