//! Raw OMIE `marginalpdbc` file parsing.
//!
//! A raw file looks like:
//!
//! ```text
//! MARGINALPDBC;
//! 2024;01;01;1;63.33;63.33;
//! 2024;01;01;2;60.00;60.00;
//! *
//! ```
//!
//! The first line is metadata. Each data row carries
//! `(year, month, day, hour-index, price-primary, price-secondary, sentinel)`.
//! Data rows holding the `*` marker anywhere are provisional and are dropped.
//! The closing `*` line is skipped without being counted.

use crate::error::LedgerError;
use crate::market_rule::MarketRule;
use crate::models::{Market, PriceRecord};
use chrono::{Duration, NaiveDate, NaiveTime};
use csv::{ByteRecord, ReaderBuilder};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

pub const SENTINEL_MARKER: u8 = b'*';
pub const RAW_FIELD_COUNT: usize = 7;
/// 25 on the autumn DST changeover day.
pub const MAX_HOUR_INDEX: u32 = 25;

/// Records parsed from one raw file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub source_file: String,
    pub market: Market,
    pub records: Vec<PriceRecord>,
    pub provisional_rows: usize,
}

/// Parse a raw file from disk, assigning its market through `rule`.
pub fn parse_file(path: &Path, rule: &dyn MarketRule) -> Result<ParsedFile, LedgerError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| LedgerError::malformed(path.display().to_string(), "file name is not valid UTF-8"))?
        .to_string();
    let file = File::open(path)?;
    parse_raw(file, &name, rule)
}

/// Parse a raw byte stream named `source_file`, assigning its market through `rule`.
pub fn parse_raw<R: Read>(
    reader: R,
    source_file: &str,
    rule: &dyn MarketRule,
) -> Result<ParsedFile, LedgerError> {
    let market = rule
        .market_for(source_file)
        .ok_or_else(|| LedgerError::malformed(source_file, "no market assigned to this file suffix"))?;
    parse_prices(reader, source_file, market)
}

/// Parse a raw byte stream whose market is already known.
pub fn parse_prices<R: Read>(
    reader: R,
    source_file: &str,
    market: Market,
) -> Result<ParsedFile, LedgerError> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut rows = rdr.byte_records();

    let header = match rows.next() {
        Some(row) => row.map_err(|e| LedgerError::malformed(source_file, e.to_string()))?,
        None => return Err(LedgerError::malformed(source_file, "missing metadata line")),
    };
    check_header(&header).map_err(|reason| LedgerError::malformed(source_file, reason))?;

    let mut records = Vec::new();
    let mut provisional_rows = 0;

    for row in rows {
        let row = row.map_err(|e| LedgerError::malformed(source_file, e.to_string()))?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();

        if is_terminator(&row) {
            continue;
        }
        if row.len() == RAW_FIELD_COUNT && row.iter().any(|field| field.contains(&SENTINEL_MARKER)) {
            provisional_rows += 1;
            continue;
        }

        let record = parse_row(&row, market, source_file)
            .map_err(|reason| LedgerError::malformed(source_file, format!("line {}: {}", line, reason)))?;
        records.push(record);
    }

    log::debug!(
        "{}: {} records, {} provisional rows dropped",
        source_file,
        records.len(),
        provisional_rows
    );

    Ok(ParsedFile {
        source_file: source_file.to_string(),
        market,
        records,
        provisional_rows,
    })
}

/// The metadata line is a single label, never a data row.
fn check_header(header: &ByteRecord) -> Result<(), String> {
    let first = header
        .get(0)
        .map(|f| String::from_utf8_lossy(f).trim().to_string())
        .unwrap_or_default();
    if first.is_empty() {
        return Err("metadata line is empty".to_string());
    }
    if header.len() >= RAW_FIELD_COUNT && first.parse::<i32>().is_ok() {
        return Err("metadata line missing, file starts with a data row".to_string());
    }
    Ok(())
}

/// The lone `*` line closing every published file.
fn is_terminator(row: &ByteRecord) -> bool {
    let mut fields = row.iter().map(|f| f.trim_ascii()).filter(|f| !f.is_empty());
    matches!((fields.next(), fields.next()), (Some(b"*"), None))
}

fn parse_row(row: &ByteRecord, market: Market, source_file: &str) -> Result<PriceRecord, String> {
    if row.len() != RAW_FIELD_COUNT {
        return Err(format!(
            "expected {} fields, found {}",
            RAW_FIELD_COUNT,
            row.len()
        ));
    }

    let year: i32 = field(row, 0, "year")?;
    let month: u32 = field(row, 1, "month")?;
    let day: u32 = field(row, 2, "day")?;
    let hour: u32 = field(row, 3, "hour")?;
    let price: f64 = field(row, 4, "price")?;

    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| format!("invalid date {}-{}-{}", year, month, day))?;
    if !(1..=MAX_HOUR_INDEX).contains(&hour) {
        return Err(format!("hour index {} outside 1..={}", hour, MAX_HOUR_INDEX));
    }
    if !price.is_finite() {
        return Err(format!("price {} is not finite", price));
    }

    let timestamp = date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour - 1));
    Ok(PriceRecord::new(timestamp, market, price, source_file))
}

fn field<T: FromStr>(row: &ByteRecord, idx: usize, name: &str) -> Result<T, String> {
    let raw = row.get(idx).ok_or_else(|| format!("missing {} field", name))?;
    let text = std::str::from_utf8(raw)
        .map_err(|_| format!("{} field is not valid UTF-8", name))?
        .trim();
    text.parse::<T>()
        .map_err(|_| format!("cannot parse {} from '{}'", name, text))
}
