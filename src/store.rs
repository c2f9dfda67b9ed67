use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::dataset::Dataset;
use crate::transform::FeeRecord;

/// Relational store for the ingested fee schedules: one table per dataset,
/// keyed by the dataset's natural key so re-imports overwrite in place.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create store dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite at {}", path.display()))?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    /// Idempotent batch write: one transaction, `INSERT OR REPLACE` per
    /// record, keyed by the dataset's natural key. Returns the records
    /// written. Records of a foreign variant are a programming error.
    pub fn upsert_batch(&mut self, dataset: Dataset, records: &[FeeRecord]) -> Result<usize> {
        let tx = self.conn.transaction().context("begin batch tx")?;
        let mut written = 0usize;
        {
            match dataset {
                Dataset::Mpfs => {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO mpfs_fees
                           (year, hcpcs, modifier, non_facility_fee, facility_fee, description, source_file)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    )?;
                    for rec in records {
                        let FeeRecord::Mpfs(r) = rec else {
                            anyhow::bail!("non-MPFS record routed to mpfs_fees");
                        };
                        stmt.execute(params![
                            r.year,
                            r.hcpcs,
                            r.modifier.clone().unwrap_or_default(),
                            r.non_facility_fee,
                            r.facility_fee,
                            r.description,
                            r.source_file,
                        ])?;
                        written += 1;
                    }
                }
                Dataset::Opps => {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO opps_fees
                           (year, hcpcs, apc, status_indicator, payment_rate, relative_weight,
                            short_desc, long_desc, min_copay, national_copay, source_file)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    )?;
                    for rec in records {
                        let FeeRecord::Opps(r) = rec else {
                            anyhow::bail!("non-OPPS record routed to opps_fees");
                        };
                        stmt.execute(params![
                            r.year,
                            r.hcpcs,
                            r.apc,
                            r.status_indicator,
                            r.payment_rate,
                            r.relative_weight,
                            r.short_desc,
                            r.long_desc,
                            r.min_copay,
                            r.national_copay,
                            r.source_file,
                        ])?;
                        written += 1;
                    }
                }
                Dataset::Clfs => {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO clfs_fees
                           (year, hcpcs, modifier, payment_rate, description, source_file)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for rec in records {
                        let FeeRecord::Clfs(r) = rec else {
                            anyhow::bail!("non-CLFS record routed to clfs_fees");
                        };
                        stmt.execute(params![
                            r.year,
                            r.hcpcs,
                            r.modifier.clone().unwrap_or_default(),
                            r.payment_rate,
                            r.description,
                            r.source_file,
                        ])?;
                        written += 1;
                    }
                }
                Dataset::Gpci => {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO gpci_indices
                           (locality_num, year, state, locality_name, work_gpci, pe_gpci, mp_gpci, source_file)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )?;
                    for rec in records {
                        let FeeRecord::Gpci(r) = rec else {
                            anyhow::bail!("non-GPCI record routed to gpci_indices");
                        };
                        stmt.execute(params![
                            r.locality_num,
                            r.year,
                            r.state,
                            r.locality_name,
                            r.work_gpci,
                            r.pe_gpci,
                            r.mp_gpci,
                            r.source_file,
                        ])?;
                        written += 1;
                    }
                }
                Dataset::ZipCrosswalk => {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO zip_localities
                           (zip5, year, locality_num, state, carrier, source_file)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for rec in records {
                        let FeeRecord::Zip(r) = rec else {
                            anyhow::bail!("non-crosswalk record routed to zip_localities");
                        };
                        stmt.execute(params![
                            r.zip5,
                            r.year,
                            r.locality_num,
                            r.state,
                            r.carrier,
                            r.source_file,
                        ])?;
                        written += 1;
                    }
                }
                Dataset::Dmepos | Dataset::Dmepen => {
                    let table = if dataset == Dataset::Dmepos {
                        "dmepos_fees"
                    } else {
                        "dmepen_fees"
                    };
                    let mut stmt = tx.prepare(&format!(
                        "INSERT OR REPLACE INTO {table}
                           (year, hcpcs, modifier, modifier2, state, rental, fee, description, source_file)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                    ))?;
                    for rec in records {
                        let FeeRecord::Dme(r) = rec else {
                            anyhow::bail!("non-DME record routed to {table}");
                        };
                        stmt.execute(params![
                            r.year,
                            r.hcpcs,
                            r.modifier.clone().unwrap_or_default(),
                            r.modifier2.clone().unwrap_or_default(),
                            r.state.unwrap_or(""),
                            r.rental,
                            r.fee,
                            r.description,
                            r.source_file,
                        ])?;
                        written += 1;
                    }
                }
                Dataset::SelfTest => anyhow::bail!("self-test has no table"),
            }
        }
        tx.commit().context("commit batch")?;
        Ok(written)
    }

    /// Lightweight connectivity probe for the `self-test` request: confirms
    /// the schema is reachable without touching any data.
    pub fn self_test(&self) -> Result<u64> {
        let tables: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .context("probe sqlite_master")?;
        Ok(tables.max(0) as u64)
    }

    pub fn count(&self, dataset: Dataset) -> Result<u64> {
        let table = dataset
            .spec()
            .map(|s| s.table)
            .context("self-test has no table")?;
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .with_context(|| format!("count {table}"))?;
        Ok(n.max(0) as u64)
    }

    pub fn dataset_counts(&self) -> Result<Vec<(Dataset, u64)>> {
        Dataset::ALL
            .iter()
            .map(|ds| Ok((*ds, self.count(*ds)?)))
            .collect()
    }

    /// Lookup used by the benchmarking engine and the integration tests.
    pub fn opps_payment_rate(&self, year: i32, hcpcs: &str) -> Result<Option<f64>> {
        use rusqlite::OptionalExtension;
        self.conn
            .query_row(
                "SELECT payment_rate FROM opps_fees WHERE year = ?1 AND hcpcs = ?2",
                params![year, hcpcs],
                |row| row.get(0),
            )
            .optional()
            .context("lookup opps payment rate")
    }

    pub fn zip_locality(&self, zip5: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;
        self.conn
            .query_row(
                "SELECT locality_num FROM zip_localities WHERE zip5 = ?1",
                params![zip5],
                |row| row.get(0),
            )
            .optional()
            .context("lookup zip locality")
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;

        CREATE TABLE IF NOT EXISTS mpfs_fees (
            year INTEGER NOT NULL,
            hcpcs TEXT NOT NULL,
            modifier TEXT NOT NULL DEFAULT '',
            non_facility_fee REAL,
            facility_fee REAL,
            description TEXT,
            source_file TEXT NOT NULL,
            PRIMARY KEY (year, hcpcs, modifier)
        );

        CREATE TABLE IF NOT EXISTS opps_fees (
            year INTEGER NOT NULL,
            hcpcs TEXT NOT NULL,
            apc TEXT,
            status_indicator TEXT,
            payment_rate REAL NOT NULL,
            relative_weight REAL,
            short_desc TEXT,
            long_desc TEXT,
            min_copay REAL,
            national_copay REAL,
            source_file TEXT NOT NULL,
            PRIMARY KEY (year, hcpcs)
        );

        CREATE TABLE IF NOT EXISTS clfs_fees (
            year INTEGER NOT NULL,
            hcpcs TEXT NOT NULL,
            modifier TEXT NOT NULL DEFAULT '',
            payment_rate REAL NOT NULL,
            description TEXT,
            source_file TEXT NOT NULL,
            PRIMARY KEY (year, hcpcs, modifier)
        );

        CREATE TABLE IF NOT EXISTS gpci_indices (
            locality_num TEXT NOT NULL PRIMARY KEY,
            year INTEGER NOT NULL,
            state TEXT,
            locality_name TEXT,
            work_gpci REAL NOT NULL,
            pe_gpci REAL NOT NULL,
            mp_gpci REAL NOT NULL,
            source_file TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS zip_localities (
            zip5 TEXT NOT NULL PRIMARY KEY,
            year INTEGER NOT NULL,
            locality_num TEXT NOT NULL,
            state TEXT,
            carrier TEXT,
            source_file TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dmepos_fees (
            year INTEGER NOT NULL,
            hcpcs TEXT NOT NULL,
            modifier TEXT NOT NULL DEFAULT '',
            modifier2 TEXT NOT NULL DEFAULT '',
            state TEXT NOT NULL DEFAULT '',
            rental INTEGER NOT NULL DEFAULT 0,
            fee REAL NOT NULL,
            description TEXT,
            source_file TEXT NOT NULL,
            PRIMARY KEY (year, hcpcs, modifier, modifier2, state, rental)
        );

        CREATE TABLE IF NOT EXISTS dmepen_fees (
            year INTEGER NOT NULL,
            hcpcs TEXT NOT NULL,
            modifier TEXT NOT NULL DEFAULT '',
            modifier2 TEXT NOT NULL DEFAULT '',
            state TEXT NOT NULL DEFAULT '',
            rental INTEGER NOT NULL DEFAULT 0,
            fee REAL NOT NULL,
            description TEXT,
            source_file TEXT NOT NULL,
            PRIMARY KEY (year, hcpcs, modifier, modifier2, state, rental)
        );
        ",
    )
    .context("initialize store schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{OppsRecord, ZipRecord};

    fn opps(hcpcs: &str, rate: f64) -> FeeRecord {
        FeeRecord::Opps(OppsRecord {
            year: 2025,
            hcpcs: hcpcs.to_string(),
            apc: None,
            status_indicator: None,
            payment_rate: rate,
            relative_weight: None,
            short_desc: None,
            long_desc: None,
            min_copay: None,
            national_copay: None,
            source_file: "test.csv".to_string(),
        })
    }

    #[test]
    fn upsert_is_idempotent_overwrite() {
        let mut store = Store::open_in_memory().unwrap();
        let batch = vec![opps("99284", 125.50), opps("00501", 10.0)];
        assert_eq!(store.upsert_batch(Dataset::Opps, &batch).unwrap(), 2);
        assert_eq!(store.upsert_batch(Dataset::Opps, &batch).unwrap(), 2);
        assert_eq!(store.count(Dataset::Opps).unwrap(), 2);

        // Same key, new value: replaced, not duplicated.
        store
            .upsert_batch(Dataset::Opps, &[opps("99284", 130.00)])
            .unwrap();
        assert_eq!(store.count(Dataset::Opps).unwrap(), 2);
        assert_eq!(
            store.opps_payment_rate(2025, "99284").unwrap(),
            Some(130.00)
        );
        // Leading-zero code survives storage untouched.
        assert_eq!(store.opps_payment_rate(2025, "00501").unwrap(), Some(10.0));
    }

    #[test]
    fn zip_crosswalk_keys_on_zip_alone() {
        let mut store = Store::open_in_memory().unwrap();
        let rec = |loc: &str| {
            FeeRecord::Zip(ZipRecord {
                year: 2025,
                zip5: "07001".to_string(),
                locality_num: loc.to_string(),
                state: Some("NJ".to_string()),
                carrier: None,
                source_file: "zips.csv".to_string(),
            })
        };
        store.upsert_batch(Dataset::ZipCrosswalk, &[rec("01")]).unwrap();
        store.upsert_batch(Dataset::ZipCrosswalk, &[rec("99")]).unwrap();
        assert_eq!(store.count(Dataset::ZipCrosswalk).unwrap(), 1);
        assert_eq!(store.zip_locality("07001").unwrap().as_deref(), Some("99"));
    }

    #[test]
    fn mixed_variant_batch_is_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store
            .upsert_batch(Dataset::Mpfs, &[opps("99284", 1.0)])
            .unwrap_err();
        assert!(err.to_string().contains("mpfs_fees"));
    }

    #[test]
    fn self_test_sees_all_tables() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.self_test().unwrap() >= 7);
        for ds in Dataset::ALL {
            assert_eq!(store.count(ds).unwrap(), 0);
        }
    }
}
