//! One ingestion run: discover raw files, parse, merge, persist, audit.

use crate::auditor::{audit, GapRange, GapReport};
use crate::data_loader::DataLoader;
use crate::error::{LedgerError, EXIT_MALFORMED_INPUT};
use crate::market_rule::MarketRule;
use crate::models::IngestBatch;
use crate::parser::parse_file;
use crate::reconciler::{reconcile, MergeStats};
use crate::sinks::{MultiSinkWriter, SinkConfig};
use chrono::NaiveDateTime;
use glob::{glob, Pattern};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub staging_dir: PathBuf,
    pub sinks: SinkConfig,
    /// Decode every sink after writing and compare with the merged snapshot.
    pub verify_readback: bool,
    pub show_progress: bool,
}

impl PipelineConfig {
    pub fn new(staging_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            sinks: SinkConfig::new(output_dir),
            verify_readback: true,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub files_seen: usize,
    pub files_parsed: usize,
    pub files_skipped: Vec<SkippedFile>,
    pub provisional_rows_dropped: usize,
    pub records_parsed: usize,
    pub merge: MergeStats,
    pub total_records: usize,
    pub latest_timestamp: Option<NaiveDateTime>,
    pub loaded_from: Option<String>,
    pub persisted: bool,
    pub gaps: GapReport,
    pub gap_ranges: Vec<GapRange>,
}

impl RunReport {
    /// Zero unless some raw file had to be skipped.
    pub fn exit_code(&self) -> u8 {
        if self.files_skipped.is_empty() {
            0
        } else {
            EXIT_MALFORMED_INPUT
        }
    }
}

struct Ingested {
    batch: IngestBatch,
    parsed: usize,
    skipped: Vec<SkippedFile>,
    provisional_rows: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    rule: Box<dyn MarketRule>,
    writer: MultiSinkWriter,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, rule: Box<dyn MarketRule>) -> Result<Self, LedgerError> {
        let writer = MultiSinkWriter::from_config(&config.sinks)?;
        Ok(Self {
            config,
            rule,
            writer,
        })
    }

    pub fn writer(&self) -> &MultiSinkWriter {
        &self.writer
    }

    /// Raw files in the staging directory whose suffix the market rule knows,
    /// sorted by file name.
    pub fn discover(&self) -> Result<Vec<PathBuf>, LedgerError> {
        let staging = &self.config.staging_dir;
        if !staging.is_dir() {
            log::warn!("⚠️  Staging directory {} does not exist", staging.display());
            return Ok(Vec::new());
        }
        let base = staging.to_str().ok_or_else(|| {
            LedgerError::InvalidConfig(format!("staging path {} is not valid UTF-8", staging.display()))
        })?;
        let base = Pattern::escape(base);

        let mut files: Vec<PathBuf> = Vec::new();
        for suffix in self.rule.suffixes() {
            let pattern = format!("{}/*.{}", base, Pattern::escape(&suffix));
            let matches = glob(&pattern)
                .map_err(|e| LedgerError::InvalidConfig(format!("bad glob '{}': {}", pattern, e)))?;
            files.extend(matches.filter_map(Result::ok).filter(|p| p.is_file()));
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
        files.dedup();
        Ok(files)
    }

    fn ingest(&self, files: &[PathBuf]) -> Ingested {
        let pb = if self.config.show_progress {
            ProgressBar::new(files.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style);
        }

        let rule = self.rule.as_ref();
        // par_iter keeps input order, so arrival order stays the file order.
        let results: Vec<_> = files
            .par_iter()
            .map(|path| {
                let parsed = parse_file(path, rule);
                pb.inc(1);
                (path, parsed)
            })
            .collect();
        pb.finish_and_clear();

        let mut ingested = Ingested {
            batch: IngestBatch::new(),
            parsed: 0,
            skipped: Vec::new(),
            provisional_rows: 0,
        };

        for (path, result) in results {
            match result {
                Ok(parsed) => {
                    ingested.parsed += 1;
                    ingested.provisional_rows += parsed.provisional_rows;
                    ingested.batch.extend(parsed.records);
                }
                Err(e) => {
                    log::warn!("⚠️  Skipping {}: {}", path.display(), e);
                    ingested.skipped.push(SkippedFile {
                        file: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        ingested
    }

    /// Execute one run.
    ///
    /// A corrupt store aborts before anything is written. Malformed raw files
    /// are skipped and listed in the report.
    pub fn run(&self) -> Result<RunReport, LedgerError> {
        let snapshot = DataLoader::new(self.writer.sinks()).load_historical()?;
        let loaded_from = snapshot.source().map(|k| k.to_string());
        let existing = snapshot.into_dataset();
        log::info!("📊 History holds {} records", existing.len());

        let files = self.discover()?;
        log::info!("🔍 Found {} raw files in {}", files.len(), self.config.staging_dir.display());
        let ingested = self.ingest(&files);
        log::info!(
            "📥 Parsed {} records from {} files ({} skipped)",
            ingested.batch.len(),
            ingested.parsed,
            ingested.skipped.len()
        );

        let merged = reconcile(&existing, &ingested.batch);
        let dataset = merged.dataset;
        log::info!(
            "🔀 Merge: {} added, {} updated, {} unchanged, {} total",
            merged.stats.added,
            merged.stats.updated,
            merged.stats.unchanged,
            merged.stats.total
        );

        // Every sink is rebuilt on every run, including one left stale by an
        // earlier failed write.
        let needs_write = !dataset.is_empty();
        if !merged.stats.changed() {
            log::info!("✅ No new records");
        }
        if needs_write {
            self.writer.persist(&dataset)?;
            if self.config.verify_readback {
                self.writer.verify(&dataset)?;
            }
        }

        let gaps = audit(&dataset);
        let gap_ranges = gaps.ranges();
        for range in &gap_ranges {
            log::warn!(
                "⚠️  {} missing {} hour(s): {} .. {}",
                range.market,
                range.hours,
                range.start,
                range.end
            );
        }

        Ok(RunReport {
            files_seen: files.len(),
            files_parsed: ingested.parsed,
            files_skipped: ingested.skipped,
            provisional_rows_dropped: ingested.provisional_rows,
            records_parsed: ingested.batch.len(),
            merge: merged.stats,
            total_records: dataset.len(),
            latest_timestamp: dataset.latest_timestamp(),
            loaded_from,
            persisted: needs_write,
            gaps,
            gap_ranges,
        })
    }
}
