use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::data::{
    domain::{Label, NamedSeries, OTHERS_LABEL, TimePoint, Timestamp},
    join::{JoinedTable, join},
};

/// Result of [`breakdown_by_category`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Breakdown {
    pub table: JoinedTable,
    /// Surviving labels in rank order, followed by `"Others"` if anything folded.
    pub legend: Vec<Label>,
    /// How many categories were folded into `"Others"`.
    pub others_count: usize,
}

impl Breakdown {
    pub fn has_others(&self) -> bool {
        self.others_count > 0
    }
}

/// Keeps the `top_k` largest categories and folds the rest into `"Others"`.
///
/// Categories are ranked by the sum of their first field, descending. Ties keep
/// first-seen input order. A repeated label replaces the earlier series' data
/// but keeps its first-seen rank position for tie-breaking.
///
/// The `"Others"` value at a timestamp is the sum of every excluded category at
/// that timestamp, with absent values counted as zero inside the fold only.
/// The row axis covers every input timestamp, so each row of the table sums
/// to the original per-timestamp total across all categories.
pub fn breakdown_by_category(per_category: &[NamedSeries], top_k: usize) -> Breakdown {
    let categories = dedup_last_wins(per_category);

    // `sorted_by` is stable, which gives the first-seen tie-break.
    let ranked: Vec<(usize, f64)> = categories
        .iter()
        .map(|s| s.total())
        .enumerate()
        .sorted_by(|a, b| b.1.total_cmp(&a.1))
        .collect();

    let (kept, folded) = ranked.split_at(top_k.min(ranked.len()));

    let mut columns: Vec<NamedSeries> = kept
        .iter()
        .map(|&(i, _)| categories[i].clone())
        .collect();

    if !folded.is_empty() {
        let mut others: BTreeMap<Timestamp, f64> = BTreeMap::new();
        for &(i, _) in folded {
            for p in &categories[i].points {
                *others.entry(p.timestamp).or_insert(0.0) += p.value().unwrap_or(0.0);
            }
        }
        columns.push(NamedSeries::new(
            OTHERS_LABEL,
            others
                .into_iter()
                .map(|(ts, v)| TimePoint::scalar(ts.0, v))
                .collect(),
        ));
    }

    let table = join(&columns);
    let legend = table.labels.clone();

    Breakdown {
        table,
        legend,
        others_count: folded.len(),
    }
}

fn dedup_last_wins(series: &[NamedSeries]) -> Vec<&NamedSeries> {
    let mut out: Vec<&NamedSeries> = Vec::with_capacity(series.len());
    for s in series {
        match out.iter_mut().find(|existing| existing.label == s.label) {
            Some(slot) => *slot = s,
            None => out.push(s),
        }
    }
    out
}
