use anyhow::{bail, Result};
use price_ledger::{audit, HistoricalDataset, LedgerError, Market, PriceRecord, Sink};
use std::collections::BTreeSet;

/// Checks run against one decoded sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkCheck {
    pub sink: String,
    pub records: usize,
    pub duplicates: usize,
    pub sorted: bool,
    pub markets: BTreeSet<Market>,
    /// `None` for the authoritative sink itself.
    pub matches_authority: Option<bool>,
}

impl SinkCheck {
    pub fn issues(&self) -> usize {
        let mut issues = self.duplicates;
        if !self.sorted {
            issues += 1;
        }
        if self.matches_authority == Some(false) {
            issues += 1;
        }
        issues
    }
}

pub fn check_records(sink: &str, records: &[PriceRecord]) -> (SinkCheck, HistoricalDataset) {
    let sorted = records.windows(2).all(|w| w[0].key() <= w[1].key());
    let markets = records.iter().map(|r| r.market).collect();
    let dataset = HistoricalDataset::from_records(records.iter().cloned());
    let check = SinkCheck {
        sink: sink.to_string(),
        records: records.len(),
        duplicates: records.len() - dataset.len(),
        sorted,
        markets,
        matches_authority: None,
    };
    (check, dataset)
}

/// Decode every present sink, compare each to the most authoritative one and
/// print the gap report. Gaps are reported but do not fail verification.
pub fn verify_store(sinks: &[Box<dyn Sink>]) -> Result<Vec<SinkCheck>> {
    println!("\n🔍 Data Quality Verification");
    println!("{}", "=".repeat(60));

    let mut ordered: Vec<&dyn Sink> = sinks.iter().map(|s| s.as_ref()).collect();
    ordered.sort_by_key(|s| s.kind().authority());

    let mut checks = Vec::new();
    let mut authority: Option<HistoricalDataset> = None;
    let mut total_issues = 0;

    for sink in ordered {
        if !sink.exists() {
            println!("\n  ⚠️  {} missing: {}", sink.name(), sink.location().display());
            total_issues += 1;
            continue;
        }

        println!("\n  Verifying: {} ({})", sink.name(), sink.location().display());
        let records = sink.read().map_err(|e| LedgerError::CorruptStore {
            sink: sink.name().to_string(),
            reason: e.to_string(),
        })?;
        let (mut check, dataset) = check_records(sink.name(), &records);

        match &authority {
            None => authority = Some(dataset),
            Some(reference) => {
                check.matches_authority = Some(reference.triples() == dataset.triples());
            }
        }

        if check.duplicates > 0 {
            println!("    ❌ Found {} duplicate entries", check.duplicates);
        } else {
            println!("    ✅ No duplicates found");
        }
        if check.sorted {
            println!("    ✅ Data is properly sorted");
        } else {
            println!("    ⚠️  Data is not sorted by (timestamp, market)");
        }
        match check.matches_authority {
            Some(true) => println!("    ✅ Matches authoritative sink"),
            Some(false) => println!("    ❌ Differs from authoritative sink"),
            None => println!("    📌 Authoritative sink"),
        }
        println!("    📊 Total records: {}", check.records);
        println!(
            "    📊 Markets: {}",
            check
                .markets
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        total_issues += check.issues();
        checks.push(check);
    }

    if let Some(dataset) = &authority {
        let gaps = audit(dataset);
        println!("\n🕳️  Gap report");
        for (market, coverage) in gaps.coverage() {
            println!(
                "  {}: {} .. {}, {} hours present, {} missing",
                market, coverage.first, coverage.last, coverage.present_hours, coverage.missing_hours
            );
        }
        for range in gaps.ranges() {
            println!(
                "    ⚠️  {} missing {} hour(s): {} .. {}",
                range.market, range.hours, range.start, range.end
            );
        }
    }

    println!("\n{}", "=".repeat(60));
    if total_issues == 0 {
        println!("✅ Data quality verification passed! No issues found.");
        Ok(checks)
    } else {
        println!("⚠️  Data quality verification found {} issues", total_issues);
        bail!("store verification found {} issue(s)", total_issues)
    }
}
