use std::collections::BTreeMap;
use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;

use crate::dataset::{Dataset, DatasetSpec, Family};
use crate::header::{ColumnMap, HeaderInfo};
use crate::normalize::{
    normalize_code, normalize_locality, normalize_zip5, parse_numeric, parse_string,
    parse_state_fee_header,
};
use crate::rows::{Cell, RowSource};

/// HCPCS/CPT family code length.
const HCPCS_LEN: usize = 5;

/// How many accepted codes to echo back in the report.
const SAMPLE_CODES: usize = 5;

/// Skip reasons; keys of the report's `skippedReasons` histogram.
pub mod skip {
    pub const BLANK_ROW: &str = "blank_row";
    pub const INVALID_CODE: &str = "invalid_code";
    pub const INVALID_ZIP: &str = "invalid_zip";
    pub const MISSING_PAYMENT_RATE: &str = "missing_payment_rate";
    pub const MISSING_FEE: &str = "missing_fee";
    pub const NO_STATE_FEES: &str = "no_state_fees";
    pub const GPCI_COMPONENT_MISSING: &str = "gpci_component_missing";
    pub const MISSING_LOCALITY: &str = "missing_locality";
    pub const DUPLICATE_ZIP: &str = "duplicate_zip";
}

/// Per-run row accounting, accumulated while the transformer streams rows.
#[derive(Debug, Default)]
pub struct Tally {
    pub rows_read: usize,
    pub valid_rows: usize,
    pub skipped: BTreeMap<&'static str, u64>,
    pub sample_codes: Vec<String>,
}

impl Tally {
    fn skip(&mut self, reason: &'static str) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }

    fn accept(&mut self, code: &str) {
        self.valid_rows += 1;
        if self.sample_codes.len() < SAMPLE_CODES {
            self.sample_codes.push(code.to_string());
        }
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MpfsRecord {
    pub year: i32,
    pub hcpcs: String,
    pub modifier: Option<String>,
    pub non_facility_fee: Option<f64>,
    pub facility_fee: Option<f64>,
    pub description: Option<String>,
    pub source_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OppsRecord {
    pub year: i32,
    pub hcpcs: String,
    pub apc: Option<String>,
    pub status_indicator: Option<String>,
    pub payment_rate: f64,
    pub relative_weight: Option<f64>,
    pub short_desc: Option<String>,
    pub long_desc: Option<String>,
    pub min_copay: Option<f64>,
    pub national_copay: Option<f64>,
    pub source_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClfsRecord {
    pub year: i32,
    pub hcpcs: String,
    pub modifier: Option<String>,
    pub payment_rate: f64,
    pub description: Option<String>,
    pub source_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GpciRecord {
    pub year: i32,
    pub locality_num: String,
    pub state: Option<String>,
    pub locality_name: Option<String>,
    pub work_gpci: f64,
    pub pe_gpci: f64,
    pub mp_gpci: f64,
    pub source_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZipRecord {
    pub year: i32,
    pub zip5: String,
    pub locality_num: String,
    pub state: Option<String>,
    pub carrier: Option<String>,
    pub source_file: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DmeRecord {
    pub year: i32,
    pub hcpcs: String,
    pub modifier: Option<String>,
    pub modifier2: Option<String>,
    /// `None` is the national ceiling/floor fallback record.
    pub state: Option<&'static str>,
    pub rental: bool,
    pub fee: f64,
    pub description: Option<String>,
    pub source_file: String,
}

/// Tagged record union the sink batches and the store routes to tables.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FeeRecord {
    Mpfs(MpfsRecord),
    Opps(OppsRecord),
    Clfs(ClfsRecord),
    Gpci(GpciRecord),
    Zip(ZipRecord),
    Dme(DmeRecord),
}

/// Runs the dataset's transformer over the remaining rows of `rows` (the
/// detector has already consumed through the header). Row-level problems are
/// tallied and never abort the run.
pub fn run(
    spec: &DatasetSpec,
    header: &HeaderInfo,
    rows: &mut RowSource,
    year: i32,
    source_file: &str,
) -> Result<(Vec<FeeRecord>, Tally)> {
    if spec.family == Family::Crosswalk {
        return run_crosswalk(header, rows, year, source_file);
    }

    let ctx = RowContext {
        columns: &header.columns,
        year,
        source_file,
    };
    let mut tally = Tally::default();
    let mut records = Vec::new();

    let state_columns = if spec.family == Family::WideState {
        state_fee_columns(&header.raw_headers)
    } else {
        Vec::new()
    };

    while let Some((_, cells)) = rows.next_row()? {
        tally.rows_read += 1;
        if cells.iter().all(Cell::is_blank) {
            tally.skip(skip::BLANK_ROW);
            continue;
        }
        match spec.family {
            Family::CodeFee => {
                transform_code_fee(spec.dataset, &ctx, &cells, &mut tally, &mut records)
            }
            Family::WideState => {
                transform_wide_state(&ctx, &state_columns, &cells, &mut tally, &mut records)
            }
            Family::GeoIndex => transform_gpci(&ctx, &cells, &mut tally, &mut records),
            Family::Crosswalk => unreachable!(),
        }
    }

    Ok((records, tally))
}

struct RowContext<'a> {
    columns: &'a ColumnMap,
    year: i32,
    source_file: &'a str,
}

impl RowContext<'_> {
    fn cell<'c>(&self, cells: &'c [Cell], field: &str) -> &'c Cell {
        self.columns
            .get(field)
            .and_then(|idx| cells.get(idx))
            .unwrap_or(&Cell::Empty)
    }

    fn number(&self, cells: &[Cell], field: &str) -> Option<f64> {
        parse_numeric(self.cell(cells, field))
    }

    fn string(&self, cells: &[Cell], field: &str) -> Option<String> {
        parse_string(self.cell(cells, field))
    }

    fn modifier(&self, cells: &[Cell], field: &str) -> Option<String> {
        // Modifiers are short codes (NU, RR, QG); same hygiene as HCPCS but
        // variable length.
        self.string(cells, field)
            .map(|m| m.to_ascii_uppercase())
            .filter(|m| m.len() <= 2 && m.chars().all(|c| c.is_ascii_alphanumeric()))
    }
}

fn transform_code_fee(
    dataset: Dataset,
    ctx: &RowContext<'_>,
    cells: &[Cell],
    tally: &mut Tally,
    out: &mut Vec<FeeRecord>,
) {
    let Some(hcpcs) = normalize_code(ctx.cell(cells, "hcpcs"), HCPCS_LEN) else {
        tally.skip(skip::INVALID_CODE);
        return;
    };
    match dataset {
        Dataset::Opps => {
            let Some(payment_rate) = ctx.number(cells, "payment_rate") else {
                tally.skip(skip::MISSING_PAYMENT_RATE);
                return;
            };
            tally.accept(&hcpcs);
            out.push(FeeRecord::Opps(OppsRecord {
                year: ctx.year,
                hcpcs,
                apc: ctx.string(cells, "apc"),
                status_indicator: ctx.string(cells, "status_indicator"),
                payment_rate,
                relative_weight: ctx.number(cells, "relative_weight"),
                short_desc: ctx.string(cells, "short_desc"),
                long_desc: ctx.string(cells, "long_desc"),
                min_copay: ctx.number(cells, "min_copay"),
                national_copay: ctx.number(cells, "national_copay"),
                source_file: ctx.source_file.to_string(),
            }));
        }
        Dataset::Clfs => {
            let Some(payment_rate) = ctx.number(cells, "payment_rate") else {
                tally.skip(skip::MISSING_PAYMENT_RATE);
                return;
            };
            tally.accept(&hcpcs);
            out.push(FeeRecord::Clfs(ClfsRecord {
                year: ctx.year,
                hcpcs,
                modifier: ctx.modifier(cells, "modifier"),
                payment_rate,
                description: ctx.string(cells, "description"),
                source_file: ctx.source_file.to_string(),
            }));
        }
        _ => {
            // MPFS: a row with neither fee carries nothing to benchmark on.
            let non_facility_fee = ctx.number(cells, "non_facility_fee");
            let facility_fee = ctx.number(cells, "facility_fee");
            if non_facility_fee.is_none() && facility_fee.is_none() {
                tally.skip(skip::MISSING_FEE);
                return;
            }
            tally.accept(&hcpcs);
            out.push(FeeRecord::Mpfs(MpfsRecord {
                year: ctx.year,
                hcpcs,
                modifier: ctx.modifier(cells, "modifier"),
                non_facility_fee,
                facility_fee,
                description: ctx.string(cells, "description"),
                source_file: ctx.source_file.to_string(),
            }));
        }
    }
}

/// Wide-state header columns discovered once per run from the raw header row.
fn state_fee_columns(raw_headers: &[String]) -> Vec<(usize, &'static str, bool)> {
    raw_headers
        .iter()
        .enumerate()
        .filter_map(|(idx, text)| {
            parse_state_fee_header(text).map(|col| (idx, col.state, col.rental))
        })
        .collect()
}

fn transform_wide_state(
    ctx: &RowContext<'_>,
    state_columns: &[(usize, &'static str, bool)],
    cells: &[Cell],
    tally: &mut Tally,
    out: &mut Vec<FeeRecord>,
) {
    let Some(hcpcs) = normalize_code(ctx.cell(cells, "hcpcs"), HCPCS_LEN) else {
        tally.skip(skip::INVALID_CODE);
        return;
    };
    let modifier = ctx.modifier(cells, "modifier");
    let modifier2 = ctx.modifier(cells, "modifier2");
    let description = ctx.string(cells, "description");

    if state_columns.is_empty() {
        // No per-state columns in this layout at all: one national record
        // priced from the ceiling (or failing that, floor) column.
        let Some(fee) = ctx
            .number(cells, "ceiling")
            .or_else(|| ctx.number(cells, "floor"))
        else {
            tally.skip(skip::MISSING_FEE);
            return;
        };
        tally.accept(&hcpcs);
        out.push(FeeRecord::Dme(DmeRecord {
            year: ctx.year,
            hcpcs,
            modifier,
            modifier2,
            state: None,
            rental: false,
            fee,
            description,
            source_file: ctx.source_file.to_string(),
        }));
        return;
    }

    let mut emitted = 0usize;
    for &(idx, state, rental) in state_columns {
        let cell = cells.get(idx).unwrap_or(&Cell::Empty);
        let Some(fee) = parse_numeric(cell) else {
            continue;
        };
        out.push(FeeRecord::Dme(DmeRecord {
            year: ctx.year,
            hcpcs: hcpcs.clone(),
            modifier: modifier.clone(),
            modifier2: modifier2.clone(),
            state: Some(state),
            rental,
            fee,
            description: description.clone(),
            source_file: ctx.source_file.to_string(),
        }));
        emitted += 1;
    }
    if emitted == 0 {
        tally.skip(skip::NO_STATE_FEES);
    } else {
        tally.accept(&hcpcs);
    }
}

fn transform_gpci(
    ctx: &RowContext<'_>,
    cells: &[Cell],
    tally: &mut Tally,
    out: &mut Vec<FeeRecord>,
) {
    let Some(locality_num) = normalize_locality(ctx.cell(cells, "locality_num")) else {
        tally.skip(skip::INVALID_CODE);
        return;
    };
    // Downstream pricing math multiplies all three components; a partial
    // locality row is worse than a missing one.
    let (Some(work_gpci), Some(pe_gpci), Some(mp_gpci)) = (
        ctx.number(cells, "work_gpci"),
        ctx.number(cells, "pe_gpci"),
        ctx.number(cells, "mp_gpci"),
    ) else {
        tally.skip(skip::GPCI_COMPONENT_MISSING);
        return;
    };
    tally.accept(&locality_num);
    out.push(FeeRecord::Gpci(GpciRecord {
        year: ctx.year,
        locality_num,
        state: ctx.string(cells, "state"),
        locality_name: ctx.string(cells, "locality_name"),
        work_gpci,
        pe_gpci,
        mp_gpci,
        source_file: ctx.source_file.to_string(),
    }));
}

/// The crosswalk transformer owns its dedup set, so it runs its own row loop
/// instead of sharing the per-row dispatch above.
pub fn run_crosswalk(
    header: &HeaderInfo,
    rows: &mut RowSource,
    year: i32,
    source_file: &str,
) -> Result<(Vec<FeeRecord>, Tally)> {
    let ctx = RowContext {
        columns: &header.columns,
        year,
        source_file,
    };
    let mut tally = Tally::default();
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    while let Some((_, cells)) = rows.next_row()? {
        tally.rows_read += 1;
        if cells.iter().all(Cell::is_blank) {
            tally.skip(skip::BLANK_ROW);
            continue;
        }
        let Some(zip5) = normalize_zip5(ctx.cell(&cells, "zip5")) else {
            tally.skip(skip::INVALID_ZIP);
            continue;
        };
        let Some(locality_num) = normalize_locality(ctx.cell(&cells, "locality_num")) else {
            tally.skip(skip::MISSING_LOCALITY);
            continue;
        };
        // First occurrence wins; later duplicates are dropped, not merged.
        if !seen.insert(zip5.clone()) {
            tally.skip(skip::DUPLICATE_ZIP);
            continue;
        }
        tally.accept(&zip5);
        records.push(FeeRecord::Zip(ZipRecord {
            year,
            zip5,
            locality_num,
            state: ctx.string(&cells, "state"),
            carrier: ctx.string(&cells, "carrier"),
            source_file: source_file.to_string(),
        }));
    }

    Ok((records, tally))
}
