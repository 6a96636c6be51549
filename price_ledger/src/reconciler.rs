use crate::models::{HistoricalDataset, IngestBatch, PriceRecord, RecordKey};
use serde::Serialize;
use std::collections::BTreeMap;

/// Counts describing what a merge did to the history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Identities that did not exist before.
    pub added: usize,
    /// Existing identities whose price or provenance changed.
    pub updated: usize,
    /// Existing identities re-delivered with identical content.
    pub unchanged: usize,
    /// Replacements where the two records come from files published on
    /// different days, e.g. hour 25 of an autumn DST day landing on the next
    /// day's first hour.
    pub cross_day: usize,
    /// Records in the merged dataset.
    pub total: usize,
}

impl MergeStats {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.updated > 0
    }
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub dataset: HistoricalDataset,
    pub stats: MergeStats,
}

/// Merge `incoming` into `existing`, returning the new snapshot.
///
/// Identity is `(timestamp, market)`. A record from `incoming` always replaces
/// the record with the same identity in `existing`, and within `incoming` the
/// later record wins. The result is sorted by identity. `existing` is left
/// untouched.
pub fn merge(existing: &HistoricalDataset, incoming: &IngestBatch) -> HistoricalDataset {
    reconcile(existing, incoming).dataset
}

/// Same as [`merge`] but also reports what changed.
pub fn reconcile(existing: &HistoricalDataset, incoming: &IngestBatch) -> Reconciliation {
    if incoming.is_empty() {
        return Reconciliation {
            dataset: existing.clone(),
            stats: MergeStats {
                total: existing.len(),
                ..MergeStats::default()
            },
        };
    }

    let mut stats = MergeStats::default();

    // Collapse the batch first: last arrival per identity.
    let mut latest: BTreeMap<RecordKey, &PriceRecord> = BTreeMap::new();
    for record in incoming.records() {
        if let Some(prev) = latest.insert(record.key(), record) {
            note_cross_day(prev, record, &mut stats);
        }
    }

    let mut merged: Vec<PriceRecord> = Vec::with_capacity(existing.len() + latest.len());
    let mut prior = existing.iter().peekable();

    for (key, fresh) in latest {
        while let Some(kept) = prior.next_if(|r| r.key() < key) {
            merged.push(kept.clone());
        }
        match prior.next_if(|r| r.key() == key) {
            Some(old) if old == fresh => stats.unchanged += 1,
            Some(old) => {
                note_cross_day(old, fresh, &mut stats);
                stats.updated += 1;
            }
            None => stats.added += 1,
        }
        merged.push(fresh.clone());
    }
    merged.extend(prior.cloned());

    stats.total = merged.len();
    Reconciliation {
        dataset: HistoricalDataset::from_sorted_unique(merged),
        stats,
    }
}

/// `YYYYMMDD` from a `prefix_YYYYMMDD.suffix` file name.
fn publication_date(source_file: &str) -> Option<&str> {
    let stem = source_file.rsplit_once('.').map_or(source_file, |(stem, _)| stem);
    let (_, date) = stem.rsplit_once('_')?;
    (date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit())).then_some(date)
}

fn note_cross_day(old: &PriceRecord, fresh: &PriceRecord, stats: &mut MergeStats) {
    let (Some(was), Some(now)) = (
        publication_date(&old.source_file),
        publication_date(&fresh.source_file),
    ) else {
        return;
    };
    if was != now {
        stats.cross_day += 1;
        log::warn!(
            "⚠️  {} {} from {} replaced by {} (files published on different days)",
            fresh.market,
            fresh.timestamp,
            old.source_file,
            fresh.source_file
        );
    }
}
