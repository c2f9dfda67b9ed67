use crate::dataset::{Anchor, DatasetSpec};
use crate::error::ImportError;
use crate::rows::RowSource;

/// Hard bound on the header scan; files whose header sits deeper than this
/// fail fast instead of silently mapping the wrong row.
pub const HEADER_SCAN_WINDOW: usize = 50;

/// Rows kept verbatim for the diagnostic sample on detection failure.
const SAMPLE_ROWS: usize = 5;

/// Canonical field name -> zero-based column index, in synonym-table order.
/// Built once per run by the detector; read-only afterward.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    entries: Vec<(&'static str, usize)>,
}

impl ColumnMap {
    pub fn get(&self, field: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, idx)| *idx)
    }

    pub fn fields(&self) -> Vec<String> {
        self.entries.iter().map(|(f, _)| f.to_string()).collect()
    }

    fn insert(&mut self, field: &'static str, idx: usize) {
        self.entries.push((field, idx));
    }

    fn has_column(&self, idx: usize) -> bool {
        self.entries.iter().any(|(_, i)| *i == idx)
    }
}

#[derive(Debug, Clone)]
pub struct HeaderInfo {
    pub row_index: usize,
    pub columns: ColumnMap,
    /// Trimmed header texts by column index, for layouts (wide-state DME)
    /// whose interesting columns are not in the synonym table.
    pub raw_headers: Vec<String>,
}

/// Case- and punctuation-insensitive token form used for all header matching.
pub fn norm_token(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Scans at most the first [`HEADER_SCAN_WINDOW`] rows of `rows` for a
/// qualifying header row and builds the column map from it. Consumes the
/// source up to and including the header row, so the caller's transformer
/// continues on the same pass. Failure is terminal for the whole run.
pub fn detect(spec: &DatasetSpec, rows: &mut RowSource) -> Result<HeaderInfo, ImportError> {
    let anchor_synonyms: &[&str] = spec
        .columns
        .iter()
        .find(|c| c.field == spec.anchor_field)
        .map(|c| c.synonyms)
        .unwrap_or(&[]);

    let mut sample = Vec::new();
    let mut scanned = 0usize;

    while scanned < HEADER_SCAN_WINDOW {
        let Some((row_index, cells)) = rows
            .next_row()
            .map_err(|e| ImportError::Source(format!("{e:#}")))?
        else {
            break;
        };
        scanned += 1;

        let texts: Vec<String> = cells
            .iter()
            .map(|c| c.text().unwrap_or_default())
            .collect();
        if sample.len() < SAMPLE_ROWS {
            sample.push(render_sample(&texts));
        }

        let tokens: Vec<String> = texts.iter().map(|t| norm_token(t)).collect();
        let accepted = match spec.anchor {
            Anchor::Token => tokens
                .iter()
                .any(|t| anchor_synonyms.contains(&t.as_str())),
            Anchor::CoOccur { tokens: topics, min } => {
                let hits = topics
                    .iter()
                    .filter(|topic| tokens.iter().any(|t| t.contains(*topic)))
                    .count();
                hits >= min
            }
        };
        if !accepted {
            continue;
        }

        let mut columns = ColumnMap::default();
        for rule in spec.columns {
            let found = tokens.iter().enumerate().find(|(idx, tok)| {
                !columns.has_column(*idx) && rule.synonyms.contains(&tok.as_str())
            });
            if let Some((idx, _)) = found {
                columns.insert(rule.field, idx);
            }
        }

        if columns.get(spec.anchor_field).is_none() {
            return Err(ImportError::AnchorColumnMissing {
                field: spec.anchor_field,
                row_index,
            });
        }

        return Ok(HeaderInfo {
            row_index,
            columns,
            raw_headers: texts,
        });
    }

    Err(ImportError::HeaderNotFound { scanned, sample })
}

fn render_sample(texts: &[String]) -> String {
    let mut joined = texts.join(" | ");
    if joined.len() > 200 {
        joined.truncate(200);
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::rows::RowSource;

    fn csv_source(data: &str) -> RowSource {
        RowSource::from_csv_bytes(data.as_bytes().to_vec())
    }

    #[test]
    fn finds_anchor_header_below_title_rows() {
        let spec = Dataset::Opps.spec().unwrap();
        let mut rows = csv_source(
            "OPPS Addendum B,,\nJanuary 2025 release,,\n\
             HCPCS Code,Status Indicator,Payment Rate\n99284,V,125.50\n",
        );
        let info = detect(spec, &mut rows).unwrap();
        assert_eq!(info.row_index, 2);
        assert_eq!(info.columns.get("hcpcs"), Some(0));
        assert_eq!(info.columns.get("status_indicator"), Some(1));
        assert_eq!(info.columns.get("payment_rate"), Some(2));
        // Source resumes on the first data row.
        let (idx, _) = rows.next_row().unwrap().unwrap();
        assert_eq!(idx, 3);
    }

    #[test]
    fn header_window_is_bounded_at_fifty_rows() {
        let spec = Dataset::Opps.spec().unwrap();
        let mut data = String::new();
        for i in 0..50 {
            data.push_str(&format!("filler row {i},,\n"));
        }
        data.push_str("HCPCS,Payment Rate\n99284,125.50\n");
        let mut rows = csv_source(&data);
        match detect(spec, &mut rows) {
            Err(ImportError::HeaderNotFound { scanned, sample }) => {
                assert_eq!(scanned, 50);
                assert_eq!(sample.len(), 5);
            }
            other => panic!("expected HeaderNotFound, got {other:?}"),
        }
    }

    #[test]
    fn header_on_last_window_row_is_found() {
        let spec = Dataset::Opps.spec().unwrap();
        let mut data = String::new();
        for i in 0..49 {
            data.push_str(&format!("filler row {i},,\n"));
        }
        data.push_str("HCPCS,Payment Rate\n");
        let mut rows = csv_source(&data);
        assert_eq!(detect(spec, &mut rows).unwrap().row_index, 49);
    }

    #[test]
    fn co_occurrence_needs_minimum_tokens() {
        let spec = Dataset::Gpci.spec().unwrap();
        // "state" alone appears in an incidental note row; must not anchor.
        let mut rows = csv_source(
            "Rates vary by state,,,\n\
             State,Locality Number,Work GPCI,PE GPCI,MP GPCI\n\
             AL,00,1.000,0.869,0.575\n",
        );
        let info = detect(spec, &mut rows).unwrap();
        assert_eq!(info.row_index, 1);
        assert_eq!(info.columns.get("locality_num"), Some(1));
        assert_eq!(info.columns.get("work_gpci"), Some(2));
    }

    #[test]
    fn anchor_row_without_anchor_column_is_terminal() {
        let spec = Dataset::ZipCrosswalk.spec().unwrap();
        // Qualifies by co-occurrence (zip + locality) but maps no zip column.
        let mut rows = csv_source("zip locality notes,carrier\n07001,12102\n");
        match detect(spec, &mut rows) {
            Err(ImportError::AnchorColumnMissing { field, row_index }) => {
                assert_eq!(field, "zip5");
                assert_eq!(row_index, 0);
            }
            other => panic!("expected AnchorColumnMissing, got {other:?}"),
        }
    }

    #[test]
    fn fuzzy_matching_ignores_case_and_punctuation() {
        assert_eq!(norm_token("Short Descriptor"), "shortdescriptor");
        assert_eq!(norm_token("PAYMENT_RATE ($)"), "paymentrate");
        assert_eq!(norm_token("Zip Code"), "zipcode");
    }

    #[test]
    fn duplicate_header_text_maps_distinct_columns() {
        let spec = Dataset::Mpfs.spec().unwrap();
        let mut rows = csv_source("HCPCS,HCPCS,Non-Facility Fee\n");
        let info = detect(spec, &mut rows).unwrap();
        assert_eq!(info.columns.get("hcpcs"), Some(0));
        assert_eq!(info.columns.get("non_facility_fee"), Some(2));
    }
}
