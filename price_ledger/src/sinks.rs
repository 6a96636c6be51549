//! Persistence sinks and the writer that keeps them in step.
//!
//! Every sink is fully rebuilt from the in-memory dataset on each write. File
//! sinks go through a temp file in the target directory and an atomic rename;
//! the table store rebuilds its table inside one transaction.

use crate::columnar::{ArrowIpcSink, ParquetSink};
use crate::error::{LedgerError, SinkError, SinkFailure};
use crate::models::{HistoricalDataset, Market, PriceRecord};
use crate::row_export::CsvSink;
use crate::table_store::TableStoreSink;
use chrono::NaiveDateTime;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SinkKind {
    /// Flat CSV export.
    RowExport,
    /// Parquet archive, the authoritative reload format.
    Columnar,
    /// Arrow IPC file.
    ArrowIpc,
    /// SQLite table.
    TableStore,
}

impl SinkKind {
    pub const DEFAULT: [SinkKind; 3] = [SinkKind::RowExport, SinkKind::Columnar, SinkKind::TableStore];

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::RowExport => "csv",
            SinkKind::Columnar => "parquet",
            SinkKind::ArrowIpc => "ipc",
            SinkKind::TableStore => "sqlite",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SinkKind::RowExport => "csv",
            SinkKind::Columnar => "parquet",
            SinkKind::ArrowIpc => "arrow",
            SinkKind::TableStore => "sqlite",
        }
    }

    /// Lower is more authoritative when loading history.
    pub fn authority(&self) -> u8 {
        match self {
            SinkKind::Columnar => 0,
            SinkKind::ArrowIpc => 1,
            SinkKind::TableStore => 2,
            SinkKind::RowExport => 3,
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(SinkKind::RowExport),
            "parquet" => Ok(SinkKind::Columnar),
            "ipc" | "arrow" => Ok(SinkKind::ArrowIpc),
            "sqlite" | "table" => Ok(SinkKind::TableStore),
            other => Err(format!("unknown sink '{}' (expected csv, parquet, ipc or sqlite)", other)),
        }
    }
}

/// One persisted representation of the historical dataset.
pub trait Sink: Send + Sync {
    fn kind(&self) -> SinkKind;

    fn location(&self) -> &Path;

    /// Whether persisted state for this sink is present.
    fn exists(&self) -> bool;

    /// Replace the persisted content with `dataset`.
    fn write(&self, dataset: &HistoricalDataset) -> Result<(), SinkError>;

    /// Decode the persisted content in stored order, without normalizing.
    fn read(&self) -> Result<Vec<PriceRecord>, SinkError>;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Where and how the sinks are laid out on disk.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub output_dir: PathBuf,
    pub dataset_name: String,
    pub table: String,
    pub kinds: Vec<SinkKind>,
}

impl SinkConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            dataset_name: "omie_prices".to_string(),
            table: "prices".to_string(),
            kinds: SinkKind::DEFAULT.to_vec(),
        }
    }

    pub fn path_for(&self, kind: SinkKind) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.dataset_name, kind.extension()))
    }

    /// Instantiate the configured sinks, in configuration order.
    pub fn build(&self) -> Result<Vec<Box<dyn Sink>>, LedgerError> {
        if self.kinds.is_empty() {
            return Err(LedgerError::InvalidConfig("at least one sink is required".to_string()));
        }
        if self.dataset_name.is_empty() || self.dataset_name.contains(['/', '\\']) {
            return Err(LedgerError::InvalidConfig(format!(
                "dataset name '{}' must be a plain file stem",
                self.dataset_name
            )));
        }

        let mut seen = Vec::new();
        let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
        for kind in &self.kinds {
            if seen.contains(kind) {
                continue;
            }
            seen.push(*kind);

            let path = self.path_for(*kind);
            let sink: Box<dyn Sink> = match kind {
                SinkKind::RowExport => Box::new(CsvSink::new(path)),
                SinkKind::Columnar => Box::new(ParquetSink::new(path)),
                SinkKind::ArrowIpc => Box::new(ArrowIpcSink::new(path)),
                SinkKind::TableStore => Box::new(TableStoreSink::new(path, &self.table)?),
            };
            sinks.push(sink);
        }
        Ok(sinks)
    }
}

/// Writes one dataset to every sink and checks they agree.
pub struct MultiSinkWriter {
    sinks: Vec<Box<dyn Sink>>,
}

impl MultiSinkWriter {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn from_config(config: &SinkConfig) -> Result<Self, LedgerError> {
        Ok(Self::new(config.build()?))
    }

    pub fn sinks(&self) -> &[Box<dyn Sink>] {
        &self.sinks
    }

    /// Write `dataset` to every sink.
    ///
    /// All sinks are attempted even after a failure; any failure makes the
    /// whole call fail with `PartialPersistence`.
    pub fn persist(&self, dataset: &HistoricalDataset) -> Result<(), LedgerError> {
        let mut failures = Vec::new();

        for sink in &self.sinks {
            log::info!(
                "💾 Writing {} records to {} ({})",
                dataset.len(),
                sink.name(),
                sink.location().display()
            );
            if let Err(e) = sink.write(dataset) {
                log::error!("❌ {} write failed: {}", sink.name(), e);
                failures.push(SinkFailure {
                    sink: sink.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::PartialPersistence { failures })
        }
    }

    /// Decode every sink again and compare it with `expected`.
    pub fn verify(&self, expected: &HistoricalDataset) -> Result<(), LedgerError> {
        let expected_triples = expected.triples();
        let mut failures = Vec::new();

        for sink in &self.sinks {
            let outcome = sink
                .read()
                .map_err(|e| e.to_string())
                .and_then(|records| compare_triples(&expected_triples, &records));
            match outcome {
                Ok(()) => log::debug!("{} read-back matches", sink.name()),
                Err(reason) => {
                    log::error!("❌ {} read-back mismatch: {}", sink.name(), reason);
                    failures.push(SinkFailure {
                        sink: sink.name().to_string(),
                        reason: format!("read-back check failed: {}", reason),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::PartialPersistence { failures })
        }
    }
}

type Triple = (NaiveDateTime, Market, f64);

fn compare_triples(expected: &[Triple], records: &[PriceRecord]) -> Result<(), String> {
    if expected.len() != records.len() {
        return Err(format!(
            "{} records decoded, {} expected",
            records.len(),
            expected.len()
        ));
    }
    for (idx, (want, got)) in expected.iter().zip(records).enumerate() {
        let got = (got.timestamp, got.market, got.price);
        if *want != got {
            return Err(format!("row {} differs: {:?} != {:?}", idx, got, want));
        }
    }
    Ok(())
}

/// Replace `path` with whatever `fill` writes, via a temp file and rename.
pub(crate) fn write_atomically<F>(path: &Path, fill: F) -> Result<(), SinkError>
where
    F: FnOnce(&mut File) -> Result<(), SinkError>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    fill(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}
