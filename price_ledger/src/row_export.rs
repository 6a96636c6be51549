use crate::error::SinkError;
use crate::models::{HistoricalDataset, Market, PriceRecord, TIMESTAMP_FORMAT};
use crate::sinks::{write_atomically, Sink, SinkKind};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

pub const EXPORT_HEADER: [&str; 4] = ["timestamp", "market", "price", "source_file"];

#[derive(Debug, Serialize, Deserialize)]
struct ExportRow {
    timestamp: String,
    market: String,
    price: f64,
    #[serde(default)]
    source_file: String,
}

/// Flat CSV export, one row per record.
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sink for CsvSink {
    fn kind(&self) -> SinkKind {
        SinkKind::RowExport
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn write(&self, dataset: &HistoricalDataset) -> Result<(), SinkError> {
        write_atomically(&self.path, |file| {
            // Header is written by hand so an empty dataset still gets one.
            let mut wtr = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            wtr.write_record(EXPORT_HEADER)?;
            for record in dataset {
                wtr.serialize(ExportRow {
                    timestamp: record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    market: record.market.as_str().to_string(),
                    price: record.price,
                    source_file: record.source_file.clone(),
                })?;
            }
            wtr.flush()?;
            Ok(())
        })
    }

    fn read(&self) -> Result<Vec<PriceRecord>, SinkError> {
        let mut rdr = csv::Reader::from_reader(File::open(&self.path)?);
        let mut records = Vec::new();

        for (row, result) in rdr.deserialize::<ExportRow>().enumerate() {
            let raw = result?;
            let timestamp = NaiveDateTime::parse_from_str(&raw.timestamp, TIMESTAMP_FORMAT)
                .map_err(|e| SinkError::Schema(format!("row {}: bad timestamp '{}': {}", row, raw.timestamp, e)))?;
            let market = raw.market.parse::<Market>().map_err(SinkError::Schema)?;
            records.push(PriceRecord::new(timestamp, market, raw.price, raw.source_file));
        }

        Ok(records)
    }
}
