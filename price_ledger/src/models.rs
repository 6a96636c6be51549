use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Civil-time format shared by the row export and the table store.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Day-ahead market zone.
///
/// Variant order matches the lexical order of the names, so sorting by
/// `Market` and sorting by its text form agree in every sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Market {
    Portugal,
    Spain,
}

impl Market {
    pub const ALL: [Market; 2] = [Market::Portugal, Market::Spain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Portugal => "Portugal",
            Market::Spain => "Spain",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spain" | "es" => Ok(Market::Spain),
            "portugal" | "pt" => Ok(Market::Portugal),
            other => Err(format!("unknown market '{}'", other)),
        }
    }
}

/// One hourly price for one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub timestamp: NaiveDateTime,
    pub market: Market,
    pub price: f64,
    pub source_file: String,
}

impl PriceRecord {
    pub fn new(timestamp: NaiveDateTime, market: Market, price: f64, source_file: impl Into<String>) -> Self {
        Self {
            timestamp,
            market,
            price,
            source_file: source_file.into(),
        }
    }

    /// Identity of the record in the historical dataset.
    pub fn key(&self) -> RecordKey {
        (self.timestamp, self.market)
    }
}

pub type RecordKey = (NaiveDateTime, Market);

/// Ordered, deduplicated history of price records.
///
/// Records are sorted by `(timestamp, market)` and no two share that pair.
/// The only way to build one is through [`HistoricalDataset::from_records`]
/// or the reconciler, both of which enforce this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalDataset {
    records: Vec<PriceRecord>,
}

impl HistoricalDataset {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Normalize arbitrary records into a dataset. Later duplicates win.
    pub fn from_records(records: impl IntoIterator<Item = PriceRecord>) -> Self {
        let mut by_key: BTreeMap<RecordKey, PriceRecord> = BTreeMap::new();
        for record in records {
            by_key.insert(record.key(), record);
        }
        Self {
            records: by_key.into_values().collect(),
        }
    }

    /// Wraps records already known to be sorted and unique.
    pub(crate) fn from_sorted_unique(records: Vec<PriceRecord>) -> Self {
        debug_assert!(records.windows(2).all(|w| w[0].key() < w[1].key()));
        Self { records }
    }

    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PriceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&PriceRecord> {
        self.records
            .binary_search_by(|r| r.key().cmp(key))
            .ok()
            .map(|idx| &self.records[idx])
    }

    pub fn latest_timestamp(&self) -> Option<NaiveDateTime> {
        self.records.last().map(|r| r.timestamp)
    }

    pub fn earliest_timestamp(&self) -> Option<NaiveDateTime> {
        self.records.first().map(|r| r.timestamp)
    }

    pub fn markets(&self) -> BTreeSet<Market> {
        self.records.iter().map(|r| r.market).collect()
    }

    /// Logical content compared across sinks: `(timestamp, market, price)`.
    pub fn triples(&self) -> Vec<(NaiveDateTime, Market, f64)> {
        self.records
            .iter()
            .map(|r| (r.timestamp, r.market, r.price))
            .collect()
    }
}

impl<'a> IntoIterator for &'a HistoricalDataset {
    type Item = &'a PriceRecord;
    type IntoIter = std::slice::Iter<'a, PriceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Records parsed during one run, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct IngestBatch {
    records: Vec<PriceRecord>,
}

impl IngestBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: PriceRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = PriceRecord>) {
        self.records.extend(records);
    }

    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<PriceRecord>> for IngestBatch {
    fn from(records: Vec<PriceRecord>) -> Self {
        Self { records }
    }
}

impl FromIterator<PriceRecord> for IngestBatch {
    fn from_iter<I: IntoIterator<Item = PriceRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
