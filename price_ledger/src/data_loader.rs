use crate::error::LedgerError;
use crate::models::HistoricalDataset;
use crate::sinks::{Sink, SinkKind};

/// What the store held at the start of a run.
#[derive(Debug, Clone)]
pub enum StoreSnapshot {
    /// Nothing persisted yet: first run.
    Empty,
    Loaded {
        from: SinkKind,
        dataset: HistoricalDataset,
        /// Rows decoded before normalization; larger than `dataset.len()`
        /// when the store carried duplicate identities.
        raw_rows: usize,
    },
}

impl StoreSnapshot {
    pub fn source(&self) -> Option<SinkKind> {
        match self {
            StoreSnapshot::Empty => None,
            StoreSnapshot::Loaded { from, .. } => Some(*from),
        }
    }

    pub fn into_dataset(self) -> HistoricalDataset {
        match self {
            StoreSnapshot::Empty => HistoricalDataset::empty(),
            StoreSnapshot::Loaded { dataset, .. } => dataset,
        }
    }
}

/// Loads the historical dataset from the most authoritative sink on disk.
pub struct DataLoader<'a> {
    sinks: Vec<&'a dyn Sink>,
}

impl<'a> DataLoader<'a> {
    pub fn new(sinks: &'a [Box<dyn Sink>]) -> Self {
        let mut sinks: Vec<&'a dyn Sink> = sinks.iter().map(|s| s.as_ref()).collect();
        sinks.sort_by_key(|s| s.kind().authority());
        Self { sinks }
    }

    /// Sinks in the order they are consulted.
    pub fn search_order(&self) -> Vec<SinkKind> {
        self.sinks.iter().map(|s| s.kind()).collect()
    }

    /// Load the first sink present on disk.
    ///
    /// A present but undecodable sink is `CorruptStore`; the loader does not
    /// fall back to a less authoritative sink in that case.
    pub fn load_historical(&self) -> Result<StoreSnapshot, LedgerError> {
        let Some(sink) = self.sinks.iter().find(|s| s.exists()) else {
            log::info!("No persisted history found, starting from an empty dataset");
            return Ok(StoreSnapshot::Empty);
        };

        log::info!("📂 Loading history from {} ({})", sink.name(), sink.location().display());
        let raw = sink.read().map_err(|e| LedgerError::CorruptStore {
            sink: sink.name().to_string(),
            reason: e.to_string(),
        })?;

        let raw_rows = raw.len();
        let dataset = HistoricalDataset::from_records(raw);
        if dataset.len() != raw_rows {
            log::warn!(
                "⚠️  {} held {} duplicate identities, keeping the last of each",
                sink.name(),
                raw_rows - dataset.len()
            );
        }

        Ok(StoreSnapshot::Loaded {
            from: sink.kind(),
            dataset,
            raw_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Market, PriceRecord};
    use crate::sinks::SinkConfig;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::TempDir;

    fn dataset(price: f64) -> HistoricalDataset {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        HistoricalDataset::from_records(vec![PriceRecord::new(ts, Market::Spain, price, "f.1")])
    }

    #[test]
    fn test_missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let sinks = SinkConfig::new(dir.path()).build().unwrap();
        let snapshot = DataLoader::new(&sinks).load_historical().unwrap();
        assert!(matches!(snapshot, StoreSnapshot::Empty));
        assert!(snapshot.into_dataset().is_empty());
    }

    #[test]
    fn test_parquet_is_preferred() {
        let dir = TempDir::new().unwrap();
        let sinks = SinkConfig::new(dir.path()).build().unwrap();
        let loader = DataLoader::new(&sinks);
        assert_eq!(
            loader.search_order(),
            vec![SinkKind::Columnar, SinkKind::TableStore, SinkKind::RowExport]
        );

        for sink in &sinks {
            let price = if sink.kind() == SinkKind::Columnar { 1.0 } else { 2.0 };
            sink.write(&dataset(price)).unwrap();
        }

        let snapshot = loader.load_historical().unwrap();
        assert_eq!(snapshot.source(), Some(SinkKind::Columnar));
        assert_eq!(snapshot.into_dataset(), dataset(1.0));
    }

    #[test]
    fn test_falls_back_when_archive_is_absent() {
        let dir = TempDir::new().unwrap();
        let config = SinkConfig::new(dir.path());
        let sinks = config.build().unwrap();
        for sink in &sinks {
            if sink.kind() == SinkKind::RowExport {
                sink.write(&dataset(7.0)).unwrap();
            }
        }

        let snapshot = DataLoader::new(&sinks).load_historical().unwrap();
        assert_eq!(snapshot.source(), Some(SinkKind::RowExport));
    }

    #[test]
    fn test_undecodable_archive_is_corrupt_store() {
        let dir = TempDir::new().unwrap();
        let config = SinkConfig::new(dir.path());
        let sinks = config.build().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(config.path_for(SinkKind::Columnar), b"PAR1 garbage").unwrap();

        let err = DataLoader::new(&sinks).load_historical().unwrap_err();
        assert!(matches!(err, LedgerError::CorruptStore { ref sink, .. } if sink == "parquet"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_duplicate_rows_are_normalized() {
        let dir = TempDir::new().unwrap();
        let config = SinkConfig::new(dir.path());
        let sinks = config.build().unwrap();
        fs::write(
            config.path_for(SinkKind::RowExport),
            "timestamp,market,price,source_file\n\
             2024-05-01 00:00:00,Spain,1.0,a.1\n\
             2024-05-01 00:00:00,Spain,4.0,b.1\n",
        )
        .unwrap();

        match DataLoader::new(&sinks).load_historical().unwrap() {
            StoreSnapshot::Loaded { dataset, raw_rows, .. } => {
                assert_eq!(raw_rows, 2);
                assert_eq!(dataset.len(), 1);
                assert_eq!(dataset.records()[0].price, 4.0);
            }
            StoreSnapshot::Empty => panic!("expected a loaded snapshot"),
        }
    }
}
