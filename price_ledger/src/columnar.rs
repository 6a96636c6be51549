//! Columnar sinks (Parquet and Arrow IPC) backed by polars.

use crate::error::SinkError;
use crate::models::{HistoricalDataset, Market, PriceRecord};
use crate::sinks::{write_atomically, Sink, SinkKind};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

const TIMESTAMP_COL: &str = "timestamp";
const MARKET_COL: &str = "market";
const PRICE_COL: &str = "price";
const SOURCE_COL: &str = "source_file";

/// Build the canonical frame: `timestamp` (ms datetime), `market`, `price`, `source_file`.
pub fn to_frame(dataset: &HistoricalDataset) -> Result<DataFrame, SinkError> {
    let n = dataset.len();
    let mut timestamps: Vec<i64> = Vec::with_capacity(n);
    let mut markets: Vec<&str> = Vec::with_capacity(n);
    let mut prices: Vec<f64> = Vec::with_capacity(n);
    let mut sources: Vec<&str> = Vec::with_capacity(n);

    for record in dataset {
        timestamps.push(record.timestamp.and_utc().timestamp_millis());
        markets.push(record.market.as_str());
        prices.push(record.price);
        sources.push(record.source_file.as_str());
    }

    let timestamp = Series::new(TIMESTAMP_COL, timestamps)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;

    let df = DataFrame::new(vec![
        timestamp,
        Series::new(MARKET_COL, markets),
        Series::new(PRICE_COL, prices),
        Series::new(SOURCE_COL, sources),
    ])?;
    Ok(df)
}

/// Decode a frame in the canonical schema back into records, in frame order.
pub fn from_frame(df: &DataFrame) -> Result<Vec<PriceRecord>, SinkError> {
    let ts_col = df.column(TIMESTAMP_COL)?;
    let unit = match ts_col.dtype() {
        DataType::Datetime(unit, _) => *unit,
        other => {
            return Err(SinkError::Schema(format!(
                "column '{}' has type {}, expected datetime",
                TIMESTAMP_COL, other
            )))
        }
    };
    let raw_ts = ts_col.cast(&DataType::Int64)?;
    let timestamps = raw_ts.i64()?;
    let markets = df.column(MARKET_COL)?.utf8()?;
    let prices = df.column(PRICE_COL)?.f64()?;
    let sources = df.column(SOURCE_COL)?.utf8()?;

    let mut records = Vec::with_capacity(df.height());
    let rows = timestamps
        .into_iter()
        .zip(markets.into_iter())
        .zip(prices.into_iter())
        .zip(sources.into_iter());

    for (row, (((ts, market), price), source)) in rows.enumerate() {
        let (Some(ts), Some(market), Some(price)) = (ts, market, price) else {
            return Err(SinkError::Schema(format!("null value at row {}", row)));
        };
        let millis = match unit {
            TimeUnit::Nanoseconds => ts / 1_000_000,
            TimeUnit::Microseconds => ts / 1_000,
            TimeUnit::Milliseconds => ts,
        };
        let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| SinkError::Schema(format!("timestamp out of range at row {}", row)))?;
        let market = market.parse::<Market>().map_err(SinkError::Schema)?;

        records.push(PriceRecord::new(
            timestamp,
            market,
            price,
            source.unwrap_or_default(),
        ));
    }

    Ok(records)
}

/// Parquet archive.
pub struct ParquetSink {
    path: PathBuf,
}

impl ParquetSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sink for ParquetSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Columnar
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn write(&self, dataset: &HistoricalDataset) -> Result<(), SinkError> {
        let mut df = to_frame(dataset)?;
        write_atomically(&self.path, |file| {
            ParquetWriter::new(file).finish(&mut df)?;
            Ok(())
        })
    }

    fn read(&self) -> Result<Vec<PriceRecord>, SinkError> {
        let df = ParquetReader::new(File::open(&self.path)?).finish()?;
        from_frame(&df)
    }
}

/// Arrow IPC file.
pub struct ArrowIpcSink {
    path: PathBuf,
}

impl ArrowIpcSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sink for ArrowIpcSink {
    fn kind(&self) -> SinkKind {
        SinkKind::ArrowIpc
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn write(&self, dataset: &HistoricalDataset) -> Result<(), SinkError> {
        let mut df = to_frame(dataset)?;
        write_atomically(&self.path, |file| {
            IpcWriter::new(file).finish(&mut df)?;
            Ok(())
        })
    }

    fn read(&self) -> Result<Vec<PriceRecord>, SinkError> {
        let df = IpcReader::new(File::open(&self.path)?).finish()?;
        from_frame(&df)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::TempDir;

    fn dataset() -> HistoricalDataset {
        let ts = NaiveDate::from_ymd_opt(2023, 10, 29)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap();
        HistoricalDataset::from_records(vec![
            PriceRecord::new(ts, Market::Spain, 87.25, "marginalpdbc_20231029.1"),
            PriceRecord::new(ts, Market::Portugal, -0.01, "marginalpdbc_20231029.2"),
        ])
    }

    #[test]
    fn test_frame_schema() {
        let df = to_frame(&dataset()).unwrap();
        assert_eq!(df.get_column_names(), vec!["timestamp", "market", "price", "source_file"]);
        assert_eq!(
            df.column("timestamp").unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, None)
        );
        assert_eq!(from_frame(&df).unwrap(), dataset().records().to_vec());
    }

    #[test]
    fn test_frame_without_timestamp_column_is_rejected() {
        let df = DataFrame::new(vec![
            Series::new("Datetime", vec![1i64]),
            Series::new("Country", vec!["Spain"]),
        ])
        .unwrap();
        assert!(from_frame(&df).is_err());
    }

    #[test]
    fn test_garbage_parquet_fails_to_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("omie_prices.parquet");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"definitely not parquet").unwrap();

        let sink = ParquetSink::new(&path);
        assert!(sink.exists());
        assert!(sink.read().is_err());
    }
}
