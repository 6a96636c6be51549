//! End-to-end runs over a temporary staging and output directory.

use chrono::{NaiveDate, NaiveDateTime};
use price_ledger::{
    DataLoader, HistoricalDataset, LedgerError, Market, Pipeline, PipelineConfig, SinkKind,
    SuffixRule,
};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn ts(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn raw_day(day: u32, base: f64, skip_hour: Option<u32>) -> String {
    let mut text = String::from("MARGINALPDBC;\n");
    for hour in 1..=24 {
        if Some(hour) == skip_hour {
            text.push_str(&format!("2024;01;{:02};{};*;*;*\n", day, hour));
        } else {
            let price = base + hour as f64;
            text.push_str(&format!("2024;01;{:02};{};{};{};\n", day, hour, price, price));
        }
    }
    text.push_str("*\n");
    text
}

fn stage(dir: &Path, name: &str, content: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
}

fn pipeline(root: &TempDir) -> Pipeline {
    let config = PipelineConfig::new(root.path().join("data"), root.path().join("process"));
    Pipeline::new(config, Box::new(SuffixRule::default())).unwrap()
}

fn triples(records: Vec<price_ledger::PriceRecord>) -> BTreeSet<(NaiveDateTime, Market, u64)> {
    records
        .into_iter()
        .map(|r| (r.timestamp, r.market, r.price.to_bits()))
        .collect()
}

#[test]
fn test_worked_example_drops_sentinel_and_reports_gap() {
    let root = TempDir::new().unwrap();
    stage(
        &root.path().join("data"),
        "marginalpdbc_20240101.1",
        "MARGINALPDBC;\n2024;1;1;1;10.5;10.5;\n2024;1;1;2;*;*;*\n2024;1;1;3;12.0;12.0;\n",
    );

    let report = pipeline(&root).run().unwrap();

    assert_eq!(report.records_parsed, 2);
    assert_eq!(report.provisional_rows_dropped, 1);
    assert_eq!(report.total_records, 2);
    assert!(report.persisted);
    assert_eq!(report.gaps.missing_for(Market::Spain), &[ts(1, 1)]);
    assert_eq!(report.latest_timestamp, Some(ts(1, 2)));
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn test_second_run_changes_nothing() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    stage(&data, "marginalpdbc_20240101.1", &raw_day(1, 50.0, None));
    stage(&data, "marginalpdbc_20240101.2", &raw_day(1, 40.0, None));

    let first = pipeline(&root).run().unwrap();
    assert_eq!(first.merge.added, 48);
    assert_eq!(first.loaded_from, None);
    assert_eq!(first.provisional_rows_dropped, 0);

    let second = pipeline(&root).run().unwrap();
    assert_eq!(second.loaded_from.as_deref(), Some("parquet"));
    assert_eq!(second.merge.added, 0);
    assert_eq!(second.merge.updated, 0);
    assert_eq!(second.merge.unchanged, 48);
    assert_eq!(second.total_records, 48);
    assert!(!second.merge.changed());
    assert!(second.persisted);
    assert_eq!(second.exit_code(), 0);
    assert!(second.gaps.is_empty());
}

#[test]
fn test_new_day_appends_and_keeps_history() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    stage(&data, "marginalpdbc_20240101.1", &raw_day(1, 50.0, None));
    pipeline(&root).run().unwrap();

    // The first day's raw file is gone from staging; history must keep it.
    fs::remove_file(data.join("marginalpdbc_20240101.1")).unwrap();
    stage(&data, "marginalpdbc_20240102.1", &raw_day(2, 70.0, None));

    let report = pipeline(&root).run().unwrap();
    assert_eq!(report.merge.added, 24);
    assert_eq!(report.total_records, 48);
    assert_eq!(report.latest_timestamp, Some(ts(2, 23)));
    assert!(report.gaps.is_empty());
}

#[test]
fn test_corrected_file_supersedes_prior_values() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    stage(&data, "marginalpdbc_20240101.1", &raw_day(1, 50.0, Some(5)));
    let first = pipeline(&root).run().unwrap();
    assert_eq!(first.total_records, 23);
    assert_eq!(first.gaps.missing_for(Market::Spain), &[ts(1, 4)]);

    // Republished file: hour 5 now final, prices shifted.
    stage(&data, "marginalpdbc_20240101.1", &raw_day(1, 55.0, None));
    let second = pipeline(&root).run().unwrap();
    assert_eq!(second.merge.added, 1);
    assert_eq!(second.merge.updated, 23);
    assert!(second.gaps.is_empty());

    let p = pipeline(&root);
    let loaded = DataLoader::new(p.writer().sinks())
        .load_historical()
        .unwrap()
        .into_dataset();
    assert_eq!(loaded.get(&(ts(1, 0), Market::Spain)).unwrap().price, 56.0);
}

#[test]
fn test_sinks_hold_identical_content() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    stage(&data, "marginalpdbc_20240101.1", &raw_day(1, 50.0, Some(7)));
    stage(&data, "marginalpdbc_20240101.2", &raw_day(1, 40.0, None));
    stage(&data, "marginalpdbc_20240102.2", &raw_day(2, 45.0, None));

    let mut config = PipelineConfig::new(data, root.path().join("process"));
    config.sinks.kinds = vec![
        SinkKind::RowExport,
        SinkKind::Columnar,
        SinkKind::ArrowIpc,
        SinkKind::TableStore,
    ];
    let p = Pipeline::new(config, Box::new(SuffixRule::default())).unwrap();
    p.run().unwrap();

    let sinks = p.writer().sinks();
    let reference = triples(sinks[0].read().unwrap());
    assert_eq!(reference.len(), 23 + 24 + 24);
    for sink in &sinks[1..] {
        assert_eq!(triples(sink.read().unwrap()), reference, "{} differs", sink.name());
    }
}

#[test]
fn test_malformed_file_is_skipped_but_flagged() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    stage(&data, "marginalpdbc_20240101.1", &raw_day(1, 50.0, None));
    stage(&data, "marginalpdbc_20240102.1", "MARGINALPDBC;\n2024;01;02;1;oops\n");

    let report = pipeline(&root).run().unwrap();
    assert_eq!(report.files_seen, 2);
    assert_eq!(report.files_parsed, 1);
    assert_eq!(report.files_skipped.len(), 1);
    assert!(report.files_skipped[0].file.ends_with("marginalpdbc_20240102.1"));
    assert_eq!(report.total_records, 24);
    assert_ne!(report.exit_code(), 0);
}

#[test]
fn test_unrelated_files_are_ignored() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    stage(&data, "marginalpdbc_20240101.1", &raw_day(1, 50.0, None));
    stage(&data, "notes.txt", "not a price file");
    stage(&data, "marginalpdbc_20240101.zip", "PK");

    let report = pipeline(&root).run().unwrap();
    assert_eq!(report.files_seen, 1);
    assert!(report.files_skipped.is_empty());
}

#[test]
fn test_corrupt_store_aborts_without_writing() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let out = root.path().join("process");
    stage(&data, "marginalpdbc_20240101.1", &raw_day(1, 50.0, None));
    stage(&out, "omie_prices.parquet", "garbage");

    let err = pipeline(&root).run().unwrap_err();
    assert!(matches!(err, LedgerError::CorruptStore { .. }));
    assert!(!out.join("omie_prices.csv").exists());
    assert!(!out.join("omie_prices.sqlite").exists());
}

#[test]
fn test_empty_staging_is_success() {
    let root = TempDir::new().unwrap();
    let report = pipeline(&root).run().unwrap();
    assert_eq!(report.files_seen, 0);
    assert_eq!(report.total_records, 0);
    assert!(!report.persisted);
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn test_missing_sink_is_backfilled() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let out = root.path().join("process");
    stage(&data, "marginalpdbc_20240101.1", &raw_day(1, 50.0, None));
    pipeline(&root).run().unwrap();

    fs::remove_file(out.join("omie_prices.csv")).unwrap();
    let report = pipeline(&root).run().unwrap();
    assert!(!report.merge.changed());
    assert!(report.persisted);
    assert!(out.join("omie_prices.csv").is_file());

    let p = pipeline(&root);
    let from_csv = p
        .writer()
        .sinks()
        .iter()
        .find(|s| s.kind() == SinkKind::RowExport)
        .unwrap()
        .read()
        .unwrap();
    assert_eq!(HistoricalDataset::from_records(from_csv).len(), 24);
}

#[test]
fn test_retry_after_failed_sink_rebuilds_it() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");
    let out = root.path().join("process");
    stage(&data, "marginalpdbc_20240101.1", &raw_day(1, 50.0, None));
    pipeline(&root).run().unwrap();

    // Another process holds the table store while day 2 arrives.
    stage(&data, "marginalpdbc_20240102.1", &raw_day(2, 70.0, None));
    let lock = Connection::open(out.join("omie_prices.sqlite")).unwrap();
    lock.execute_batch("BEGIN EXCLUSIVE;").unwrap();

    let err = pipeline(&root).run().unwrap_err();
    match &err {
        LedgerError::PartialPersistence { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].sink, "sqlite");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_ne!(err.exit_code(), 0);
    drop(lock);

    // Parquet already holds day 2, so the retry merges nothing new.
    let p = pipeline(&root);
    let retry = p.run().unwrap();
    assert_eq!(retry.loaded_from.as_deref(), Some("parquet"));
    assert!(!retry.merge.changed());
    assert!(retry.persisted);
    assert_eq!(retry.total_records, 48);
    assert_eq!(retry.exit_code(), 0);

    for sink in p.writer().sinks() {
        assert_eq!(sink.read().unwrap().len(), 48, "{} is stale", sink.name());
    }
}

#[test]
fn test_dst_hour_25_overlap_is_reported() {
    let root = TempDir::new().unwrap();
    let data = root.path().join("data");

    let mut autumn = String::from("MARGINALPDBC;\n");
    for hour in 1..=25 {
        autumn.push_str(&format!("2024;10;27;{};55.0;55.0;\n", hour));
    }
    autumn.push_str("*\n");
    stage(&data, "marginalpdbc_20241027.1", &autumn);
    stage(&data, "marginalpdbc_20241028.1", "MARGINALPDBC;\n2024;10;28;1;70.0;70.0;\n*\n");

    let p = pipeline(&root);
    let report = p.run().unwrap();
    assert_eq!(report.records_parsed, 26);
    assert_eq!(report.total_records, 25);
    assert_eq!(report.merge.cross_day, 1);

    let next_midnight = NaiveDate::from_ymd_opt(2024, 10, 28)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let loaded = DataLoader::new(p.writer().sinks())
        .load_historical()
        .unwrap()
        .into_dataset();
    let kept = loaded.get(&(next_midnight, Market::Spain)).unwrap();
    assert_eq!(kept.price, 70.0);
    assert_eq!(kept.source_file, "marginalpdbc_20241028.1");
}
