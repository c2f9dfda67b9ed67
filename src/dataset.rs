use serde::{Deserialize, Serialize};

/// The fee-schedule publications this backend ingests, plus the `self-test`
/// pseudo-dataset that only probes the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dataset {
    Mpfs,
    Gpci,
    Opps,
    Dmepos,
    Dmepen,
    Clfs,
    ZipCrosswalk,
    SelfTest,
}

impl Dataset {
    /// Every dataset with a table, i.e. everything but `self-test`.
    pub const ALL: [Dataset; 7] = [
        Dataset::Mpfs,
        Dataset::Gpci,
        Dataset::Opps,
        Dataset::Dmepos,
        Dataset::Dmepen,
        Dataset::Clfs,
        Dataset::ZipCrosswalk,
    ];

    pub fn parse(tag: &str) -> Option<Dataset> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "mpfs" => Some(Dataset::Mpfs),
            "gpci" => Some(Dataset::Gpci),
            "opps" => Some(Dataset::Opps),
            "dmepos" => Some(Dataset::Dmepos),
            "dmepen" => Some(Dataset::Dmepen),
            "clfs" => Some(Dataset::Clfs),
            "zip-crosswalk" => Some(Dataset::ZipCrosswalk),
            "self-test" => Some(Dataset::SelfTest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Mpfs => "mpfs",
            Dataset::Gpci => "gpci",
            Dataset::Opps => "opps",
            Dataset::Dmepos => "dmepos",
            Dataset::Dmepen => "dmepen",
            Dataset::Clfs => "clfs",
            Dataset::ZipCrosswalk => "zip-crosswalk",
            Dataset::SelfTest => "self-test",
        }
    }

    pub fn spec(&self) -> Option<&'static DatasetSpec> {
        match self {
            Dataset::Mpfs => Some(&MPFS),
            Dataset::Gpci => Some(&GPCI),
            Dataset::Opps => Some(&OPPS),
            Dataset::Dmepos => Some(&DMEPOS),
            Dataset::Dmepen => Some(&DMEPEN),
            Dataset::Clfs => Some(&CLFS),
            Dataset::ZipCrosswalk => Some(&ZIP_CROSSWALK),
            Dataset::SelfTest => None,
        }
    }
}

/// Transformer family a dataset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// One record per valid code row (MPFS, OPPS, CLFS).
    CodeFee,
    /// Wide per-state fee columns, one record per (row, state) pair.
    WideState,
    /// Locality rows carrying the three GPCI components.
    GeoIndex,
    /// ZIP-to-locality crosswalk with first-wins dedup.
    Crosswalk,
}

/// How the header detector accepts a candidate header row.
#[derive(Debug, Clone, Copy)]
pub enum Anchor {
    /// The row must contain a column matching a synonym of the anchor field.
    Token,
    /// The row must contain at least `min` of the topic tokens; used for
    /// files whose individual column names are too generic to anchor on.
    CoOccur {
        tokens: &'static [&'static str],
        min: usize,
    },
}

/// One canonical output field and the header spellings that map to it,
/// pre-normalized (lowercase, alphanumerics only). First match wins.
pub struct ColumnRule {
    pub field: &'static str,
    pub synonyms: &'static [&'static str],
}

/// Per-dataset configuration: data, not code. New CMS layout variants are
/// accommodated by extending a synonym list, not by touching control flow.
pub struct DatasetSpec {
    pub dataset: Dataset,
    pub family: Family,
    pub table: &'static str,
    /// Field that must be present in the column map for the run to proceed.
    pub anchor_field: &'static str,
    pub anchor: Anchor,
    pub columns: &'static [ColumnRule],
    pub default_year: i32,
    /// Lowercase substrings scored against sheet names of multi-sheet books.
    pub sheet_hints: &'static [&'static str],
}

static MPFS: DatasetSpec = DatasetSpec {
    dataset: Dataset::Mpfs,
    family: Family::CodeFee,
    table: "mpfs_fees",
    anchor_field: "hcpcs",
    anchor: Anchor::Token,
    columns: &[
        ColumnRule {
            field: "hcpcs",
            synonyms: &["hcpcs", "hcpcscode", "cpt", "cptcode", "procedurecode"],
        },
        ColumnRule {
            field: "modifier",
            synonyms: &["modifier", "mod"],
        },
        ColumnRule {
            field: "non_facility_fee",
            synonyms: &[
                "nonfacilityfee",
                "nonfacilityamount",
                "nonfacilityprice",
                "nonfacilityfeescheduleamount",
                "nonfacfee",
            ],
        },
        ColumnRule {
            field: "facility_fee",
            synonyms: &[
                "facilityfee",
                "facilityamount",
                "facilityprice",
                "facilityfeescheduleamount",
                "facfee",
            ],
        },
        ColumnRule {
            field: "description",
            synonyms: &["description", "shortdescription", "shortdescriptor", "desc"],
        },
    ],
    default_year: 2025,
    sheet_hints: &["pfs", "physician", "payment"],
};

static OPPS: DatasetSpec = DatasetSpec {
    dataset: Dataset::Opps,
    family: Family::CodeFee,
    table: "opps_fees",
    anchor_field: "hcpcs",
    anchor: Anchor::Token,
    columns: &[
        ColumnRule {
            field: "hcpcs",
            synonyms: &["hcpcs", "hcpcscode", "cpthcpcscode", "cpthcpcs"],
        },
        ColumnRule {
            field: "apc",
            synonyms: &["apc", "apcgroup"],
        },
        ColumnRule {
            field: "status_indicator",
            synonyms: &["statusindicator", "si"],
        },
        ColumnRule {
            field: "payment_rate",
            synonyms: &[
                "paymentrate",
                "apcpaymentrate",
                "nationalunadjustedpaymentrate",
                "payment",
                "rate",
            ],
        },
        ColumnRule {
            field: "relative_weight",
            synonyms: &["relativeweight", "weight"],
        },
        ColumnRule {
            field: "short_desc",
            synonyms: &["shortdescriptor", "shortdescription"],
        },
        ColumnRule {
            field: "long_desc",
            synonyms: &["longdescriptor", "longdescription", "description"],
        },
        ColumnRule {
            field: "min_copay",
            synonyms: &[
                "minimumunadjustedcopayment",
                "minimumcopayment",
                "mincopay",
            ],
        },
        ColumnRule {
            field: "national_copay",
            synonyms: &[
                "nationalunadjustedcopayment",
                "nationalcopay",
                "copayment",
                "copay",
            ],
        },
    ],
    default_year: 2025,
    sheet_hints: &["addendum b", "addendum", "opps"],
};

static CLFS: DatasetSpec = DatasetSpec {
    dataset: Dataset::Clfs,
    family: Family::CodeFee,
    table: "clfs_fees",
    anchor_field: "hcpcs",
    // CLFS headers spell the code column too many ways to anchor on alone.
    anchor: Anchor::CoOccur {
        tokens: &["hcpcs", "payment", "fee", "rate"],
        min: 2,
    },
    columns: &[
        ColumnRule {
            field: "hcpcs",
            synonyms: &["hcpcs", "hcpcscode", "code", "testcode"],
        },
        ColumnRule {
            field: "modifier",
            synonyms: &["modifier", "mod"],
        },
        ColumnRule {
            field: "payment_rate",
            synonyms: &[
                "paymentrate",
                "payment",
                "rate",
                "fee",
                "nationallimitamount",
                "nla",
            ],
        },
        ColumnRule {
            field: "description",
            synonyms: &["description", "shortdescription", "testname"],
        },
    ],
    default_year: 2025,
    sheet_hints: &["clfs", "lab"],
};

static GPCI: DatasetSpec = DatasetSpec {
    dataset: Dataset::Gpci,
    family: Family::GeoIndex,
    table: "gpci_indices",
    anchor_field: "locality_num",
    anchor: Anchor::CoOccur {
        tokens: &["locality", "gpci", "state"],
        min: 2,
    },
    columns: &[
        ColumnRule {
            field: "locality_num",
            synonyms: &["localitynumber", "localitycode", "localityno", "locality"],
        },
        ColumnRule {
            field: "state",
            synonyms: &["state", "statename"],
        },
        ColumnRule {
            field: "locality_name",
            synonyms: &["localityname", "localityarea", "areaname", "area"],
        },
        ColumnRule {
            field: "work_gpci",
            synonyms: &["workgpci", "pwgpci", "physicianworkgpci", "work", "gpciwork"],
        },
        ColumnRule {
            field: "pe_gpci",
            synonyms: &["pegpci", "practiceexpensegpci", "pe", "gpcipe"],
        },
        ColumnRule {
            field: "mp_gpci",
            synonyms: &["mpgpci", "malpracticegpci", "malpractice", "mp", "gpcimp"],
        },
    ],
    default_year: 2025,
    sheet_hints: &["gpci", "locality"],
};

static ZIP_CROSSWALK: DatasetSpec = DatasetSpec {
    dataset: Dataset::ZipCrosswalk,
    family: Family::Crosswalk,
    table: "zip_localities",
    anchor_field: "zip5",
    anchor: Anchor::CoOccur {
        tokens: &["zip", "locality"],
        min: 2,
    },
    columns: &[
        ColumnRule {
            field: "zip5",
            synonyms: &["zipcode", "zip", "zip5"],
        },
        ColumnRule {
            field: "locality_num",
            synonyms: &["locality", "localitycode", "localitynumber"],
        },
        ColumnRule {
            field: "state",
            synonyms: &["state"],
        },
        ColumnRule {
            field: "carrier",
            synonyms: &["carrier", "carriernumber", "carrierno", "macid", "mac"],
        },
    ],
    default_year: 2025,
    sheet_hints: &["zip", "crosswalk"],
};

const DME_COLUMNS: &[ColumnRule] = &[
    ColumnRule {
        field: "hcpcs",
        synonyms: &["hcpcs", "hcpcscode", "proccode", "procedurecode"],
    },
    ColumnRule {
        field: "modifier",
        synonyms: &["modifier", "mod", "mod1", "modifier1"],
    },
    ColumnRule {
        field: "modifier2",
        synonyms: &["modifier2", "mod2"],
    },
    ColumnRule {
        field: "ceiling",
        synonyms: &["ceiling", "ceilingfee", "nationalceiling"],
    },
    ColumnRule {
        field: "floor",
        synonyms: &["floor", "floorfee", "nationalfloor"],
    },
    ColumnRule {
        field: "description",
        synonyms: &["description", "shortdescription", "itemdescription"],
    },
];

static DMEPOS: DatasetSpec = DatasetSpec {
    dataset: Dataset::Dmepos,
    family: Family::WideState,
    table: "dmepos_fees",
    anchor_field: "hcpcs",
    anchor: Anchor::Token,
    columns: DME_COLUMNS,
    default_year: 2025,
    sheet_hints: &["dmepos", "fee"],
};

static DMEPEN: DatasetSpec = DatasetSpec {
    dataset: Dataset::Dmepen,
    family: Family::WideState,
    table: "dmepen_fees",
    anchor_field: "hcpcs",
    anchor: Anchor::Token,
    columns: DME_COLUMNS,
    default_year: 2025,
    sheet_hints: &["dmepen", "pen", "fee"],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_round_trip() {
        for ds in Dataset::ALL {
            assert_eq!(Dataset::parse(ds.as_str()), Some(ds));
        }
        assert_eq!(Dataset::parse("self-test"), Some(Dataset::SelfTest));
        assert_eq!(Dataset::parse("ZIP-Crosswalk"), Some(Dataset::ZipCrosswalk));
        assert_eq!(Dataset::parse("bogus"), None);
    }

    #[test]
    fn serde_tags_match_wire_format() {
        let tag = serde_json::to_string(&Dataset::ZipCrosswalk).unwrap();
        assert_eq!(tag, "\"zip-crosswalk\"");
        let ds: Dataset = serde_json::from_str("\"self-test\"").unwrap();
        assert_eq!(ds, Dataset::SelfTest);
    }

    #[test]
    fn every_dataset_spec_maps_its_anchor() {
        for ds in Dataset::ALL {
            let spec = ds.spec().expect("data dataset has a spec");
            assert!(
                spec.columns.iter().any(|c| c.field == spec.anchor_field),
                "{} anchor field missing from synonym table",
                ds.as_str()
            );
            assert_eq!(spec.dataset, ds);
        }
        assert!(Dataset::SelfTest.spec().is_none());
    }

    #[test]
    fn synonyms_are_pre_normalized() {
        for ds in Dataset::ALL {
            for rule in ds.spec().unwrap().columns {
                for syn in rule.synonyms {
                    assert!(
                        syn.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()),
                        "{syn:?} is not normalized"
                    );
                }
            }
        }
    }
}
