use crate::dataset::Dataset;
use crate::store::Store;
use crate::transform::FeeRecord;

/// Records per upsert call; large enough to amortize the transaction, small
/// enough to keep a failed batch's blast radius readable.
pub const BATCH_SIZE: usize = 500;

/// Groups normalized records into fixed-size batches and writes each through
/// the store's idempotent upsert. A failed batch becomes a diagnostic and the
/// remaining batches still run: partial import, not hard failure. In dry-run
/// mode batches are formed but no write is ever issued.
pub struct BatchSink<'a> {
    store: &'a mut Store,
    dataset: Dataset,
    dry_run: bool,
    buf: Vec<FeeRecord>,
    batch_index: usize,
    imported: u64,
    batches_completed: usize,
    errors: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SinkOutcome {
    pub imported: u64,
    pub batches_completed: usize,
    pub errors: Vec<String>,
}

impl<'a> BatchSink<'a> {
    pub fn new(store: &'a mut Store, dataset: Dataset, dry_run: bool) -> Self {
        BatchSink {
            store,
            dataset,
            dry_run,
            buf: Vec::with_capacity(BATCH_SIZE),
            batch_index: 0,
            imported: 0,
            batches_completed: 0,
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, record: FeeRecord) {
        self.buf.push(record);
        if self.buf.len() >= BATCH_SIZE {
            self.flush();
        }
    }

    pub fn finish(mut self) -> SinkOutcome {
        self.flush();
        SinkOutcome {
            imported: self.imported,
            batches_completed: self.batches_completed,
            errors: self.errors,
        }
    }

    fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let batch_index = self.batch_index;
        self.batch_index += 1;
        let batch = std::mem::take(&mut self.buf);

        if self.dry_run {
            self.batches_completed += 1;
            return;
        }

        match self.store.upsert_batch(self.dataset, &batch) {
            Ok(written) => {
                self.imported += written as u64;
                self.batches_completed += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "batch {} of {} failed: {:#}",
                    batch_index,
                    self.dataset.as_str(),
                    e
                );
                self.errors
                    .push(format!("PARTIAL_IMPORT batch={batch_index}: {e:#}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::OppsRecord;

    fn opps(i: usize) -> FeeRecord {
        FeeRecord::Opps(OppsRecord {
            year: 2025,
            hcpcs: format!("{i:05}"),
            apc: None,
            status_indicator: None,
            payment_rate: 1.0,
            relative_weight: None,
            short_desc: None,
            long_desc: None,
            min_copay: None,
            national_copay: None,
            source_file: "t.csv".to_string(),
        })
    }

    #[test]
    fn batches_split_at_fixed_size() {
        let mut store = Store::open_in_memory().unwrap();
        let mut sink = BatchSink::new(&mut store, Dataset::Opps, false);
        for i in 0..BATCH_SIZE + 3 {
            sink.push(opps(i));
        }
        let outcome = sink.finish();
        assert_eq!(outcome.imported, (BATCH_SIZE + 3) as u64);
        assert_eq!(outcome.batches_completed, 2);
        assert!(outcome.errors.is_empty());
        assert_eq!(store.count(Dataset::Opps).unwrap(), (BATCH_SIZE + 3) as u64);
    }

    #[test]
    fn dry_run_forms_batches_but_never_writes() {
        let mut store = Store::open_in_memory().unwrap();
        let mut sink = BatchSink::new(&mut store, Dataset::Opps, true);
        for i in 0..10 {
            sink.push(opps(i));
        }
        let outcome = sink.finish();
        assert_eq!(outcome.imported, 0);
        assert_eq!(outcome.batches_completed, 1);
        assert_eq!(store.count(Dataset::Opps).unwrap(), 0);
    }

    #[test]
    fn failed_batch_is_diagnosed_and_later_batches_continue() {
        let mut store = Store::open_in_memory().unwrap();
        let mut sink = BatchSink::new(&mut store, Dataset::Mpfs, false);
        // Wrong variant for the dataset forces the first batch to fail.
        for i in 0..BATCH_SIZE {
            sink.push(opps(i));
        }
        for i in 0..3 {
            sink.push(FeeRecord::Mpfs(crate::transform::MpfsRecord {
                year: 2025,
                hcpcs: format!("992{i}3"),
                modifier: None,
                non_facility_fee: Some(75.0),
                facility_fee: None,
                description: None,
                source_file: "t.csv".to_string(),
            }));
        }
        let outcome = sink.finish();
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("PARTIAL_IMPORT batch=0"));
        assert_eq!(outcome.batches_completed, 1);
        assert_eq!(outcome.imported, 3);
        assert_eq!(store.count(Dataset::Mpfs).unwrap(), 3);
    }
}
