use std::collections::BTreeMap;
use std::io::Cursor;

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto_from_rs};
use serde::Serialize;

use crate::dataset::{Dataset, DatasetSpec};
use crate::error::ImportError;
use crate::header;
use crate::rows::{RowSource, populated_rows};
use crate::sink::BatchSink;
use crate::store::Store;
use crate::transform;

/// One import invocation, as decoded from the HTTP request or the CLI.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub dataset: Dataset,
    /// Reference year; dataset default applies when omitted.
    pub year: Option<i32>,
    pub dry_run: bool,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Aggregated outcome of a run; serialized camelCase for the admin UI.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub total_rows_read: usize,
    pub valid_rows: usize,
    pub imported: u64,
    pub skipped: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub skipped_reasons: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_row_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns_detected: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample_codes: Vec<String>,
    /// First scanned rows, echoed back when header detection fails.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample_rows: Vec<String>,
    pub batches_completed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub batch_errors: Vec<String>,
}

/// Runs one import end-to-end: source selection, header detection,
/// transformation and batched upserts, all in a single sequential pass.
pub fn run_import(store: &mut Store, req: &ImportRequest) -> Result<ImportReport, ImportError> {
    let Some(spec) = req.dataset.spec() else {
        // self-test: no parsing, one lightweight read against the store.
        let tables = store
            .self_test()
            .map_err(|e| ImportError::Store(format!("{e:#}")))?;
        tracing::info!("self-test ok: {tables} tables reachable");
        return Ok(ImportReport::default());
    };

    if req.bytes.is_empty() {
        return Err(ImportError::FileRequired);
    }
    let year = req.year.unwrap_or(spec.default_year);
    let started = std::time::Instant::now();
    tracing::info!(
        "import start: dataset={} year={} dry_run={} file={} ({} bytes)",
        req.dataset.as_str(),
        year,
        req.dry_run,
        req.file_name,
        req.bytes.len()
    );

    let extension = req
        .file_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    let (mut rows, sheet_name) = match extension.as_str() {
        // CSV fast-path: no workbook container to parse; this is the branch
        // the largest OPPS files take.
        "csv" => (RowSource::from_csv_bytes(req.bytes.clone()), None),
        "xlsx" | "xlsm" | "xls" => {
            let (range, name) = load_best_sheet(spec, &req.bytes)?;
            (RowSource::from_range(range), Some(name))
        }
        _ => return Err(ImportError::UnsupportedFormat(extension)),
    };

    let header = header::detect(spec, &mut rows)?;
    tracing::info!(
        "header found at row {}: {:?}",
        header.row_index,
        header.columns.fields()
    );

    let (records, tally) =
        transform::run(spec, &header, &mut rows, year, &req.file_name)
            .map_err(|e| ImportError::Source(format!("{e:#}")))?;

    if tally.valid_rows == 0 {
        return Err(ImportError::NoValidRows {
            rows_read: tally.rows_read,
        });
    }

    let mut sink = BatchSink::new(store, req.dataset, req.dry_run);
    for record in records {
        sink.push(record);
    }
    let outcome = sink.finish();

    tracing::info!(
        "import done in {:.2}s: {} rows read, {} valid, {} imported, {} batch errors",
        started.elapsed().as_secs_f64(),
        tally.rows_read,
        tally.valid_rows,
        outcome.imported,
        outcome.errors.len()
    );

    Ok(ImportReport {
        total_rows_read: tally.rows_read,
        valid_rows: tally.valid_rows,
        imported: outcome.imported,
        skipped: tally.skipped_total(),
        skipped_reasons: tally
            .skipped
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect(),
        header_row_index: Some(header.row_index),
        sheet_name,
        columns_detected: header.columns.fields(),
        sample_codes: tally.sample_codes,
        sample_rows: Vec::new(),
        batches_completed: outcome.batches_completed,
        batch_errors: outcome.errors,
    })
}

/// Opens the workbook from the uploaded bytes and picks the sheet whose name
/// matches the dataset's hints; with no hint match, the sheet with the most
/// populated rows wins.
fn load_best_sheet(
    spec: &DatasetSpec,
    bytes: &[u8],
) -> Result<(Range<Data>, String), ImportError> {
    let mut workbook: Sheets<_> = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::Workbook(e.to_string()))?;

    let names = workbook.sheet_names();
    if names.is_empty() {
        return Err(ImportError::Workbook("workbook has no sheets".to_string()));
    }

    let by_hint = names.iter().find(|name| {
        let lower = name.to_ascii_lowercase();
        spec.sheet_hints.iter().any(|hint| lower.contains(hint))
    });

    if let Some(name) = by_hint {
        let range = workbook
            .worksheet_range(name)
            .map_err(|e| ImportError::Workbook(e.to_string()))?;
        return Ok((range, name.clone()));
    }

    let mut best: Option<(Range<Data>, String, usize)> = None;
    for name in &names {
        let range = workbook
            .worksheet_range(name)
            .map_err(|e| ImportError::Workbook(e.to_string()))?;
        let rows = populated_rows(&range);
        if best.as_ref().map(|(_, _, n)| rows > *n).unwrap_or(true) {
            best = Some((range, name.clone(), rows));
        }
    }
    let Some((range, name, _)) = best else {
        return Err(ImportError::Workbook("workbook has no sheets".to_string()));
    };
    Ok((range, name))
}

/// Report skeleton carrying the diagnostic sample for run-level failures.
pub fn error_report(err: &ImportError) -> Option<ImportReport> {
    let sample = err.sample_rows();
    if sample.is_empty() {
        return None;
    }
    Some(ImportReport {
        sample_rows: sample.to_vec(),
        ..ImportReport::default()
    })
}
