//! Completeness audit: missing hours per market.
//!
//! For each market the expected series is every hour between its first and
//! last timestamp. The report is advisory and never blocks persistence.

use crate::models::{HistoricalDataset, Market};
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

/// Observed range of one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketCoverage {
    pub first: NaiveDateTime,
    pub last: NaiveDateTime,
    pub present_hours: usize,
    pub missing_hours: usize,
}

/// Consecutive missing hours for one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapRange {
    pub market: Market,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub hours: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GapReport {
    coverage: BTreeMap<Market, MarketCoverage>,
    missing: BTreeMap<Market, Vec<NaiveDateTime>>,
}

impl GapReport {
    pub fn is_empty(&self) -> bool {
        self.missing.values().all(|m| m.is_empty())
    }

    pub fn total_missing(&self) -> usize {
        self.missing.values().map(|m| m.len()).sum()
    }

    pub fn missing_for(&self, market: Market) -> &[NaiveDateTime] {
        self.missing.get(&market).map(|m| m.as_slice()).unwrap_or(&[])
    }

    pub fn coverage(&self) -> &BTreeMap<Market, MarketCoverage> {
        &self.coverage
    }

    /// Missing hours coalesced into contiguous ranges, by market then time.
    pub fn ranges(&self) -> Vec<GapRange> {
        let step = Duration::hours(1);
        let mut ranges: Vec<GapRange> = Vec::new();

        for (market, missing) in &self.missing {
            for ts in missing {
                match ranges.last_mut() {
                    Some(open) if open.market == *market && open.end + step == *ts => {
                        open.end = *ts;
                        open.hours += 1;
                    }
                    _ => ranges.push(GapRange {
                        market: *market,
                        start: *ts,
                        end: *ts,
                        hours: 1,
                    }),
                }
            }
        }

        ranges
    }
}

/// Compute the gap report of `dataset`.
pub fn audit(dataset: &HistoricalDataset) -> GapReport {
    let step = Duration::hours(1);
    let mut by_market: BTreeMap<Market, Vec<NaiveDateTime>> = BTreeMap::new();
    for record in dataset {
        by_market.entry(record.market).or_default().push(record.timestamp);
    }

    let mut report = GapReport::default();

    for (market, timestamps) in by_market {
        // Dataset order guarantees ascending timestamps within a market.
        let (Some(&first), Some(&last)) = (timestamps.first(), timestamps.last()) else {
            continue;
        };

        let mut missing = Vec::new();
        for pair in timestamps.windows(2) {
            let mut expected = pair[0] + step;
            while expected < pair[1] {
                missing.push(expected);
                expected += step;
            }
        }

        report.coverage.insert(
            market,
            MarketCoverage {
                first,
                last,
                present_hours: timestamps.len(),
                missing_hours: missing.len(),
            },
        );
        if !missing.is_empty() {
            log::debug!("{}: {} missing hours", market, missing.len());
            report.missing.insert(market, missing);
        }
    }

    report
}
