//! Match-quality report for tuning.
//!
//! Unlike the matchers this scans every live hash and every reference
//! occurrence, with no pair caps, and uses its own (stricter) cap on how
//! generic a hash may be before it is ignored.

use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Write};

use crate::config::{
    DIAGNOSTIC_MAX_HASH_OCCURRENCE, DIAGNOSTIC_TOP_OFFSETS, DISPERSED_CONCENTRATION,
    GOOD_CONCENTRATION, LOW_MATCH_RATE,
};
use crate::fingerprint::{FptEntry, total_hash_count};
use crate::hashing::parse_hash;
use crate::index::ReverseIndex;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchDiagnostics {
    /// Every hash string across all live entries.
    pub total_live_hashes: usize,
    /// Live hash strings that do not parse to a valid hash.
    pub invalid_hashes: usize,
    /// Distinct hash values found in the reference and not filtered.
    pub unique_matched_hashes: usize,
    /// Live hashes skipped for occurring too often in the reference.
    pub filtered_hashes: usize,
    /// Sum of the offset histogram.
    pub total_match_occurrences: usize,
    /// `unique_matched_hashes / total_live_hashes`.
    pub hash_match_rate: f64,
    /// Share of occurrences at the top offset and its two neighbours.
    pub offset_concentration: f64,
    /// Offset in seconds to occurrence count.
    pub offset_histogram: BTreeMap<i64, usize>,
    /// Up to ten `(offset, count)`, most frequent first.
    pub top_offsets: Vec<(i64, usize)>,
    pub summary: String,
}

impl MatchDiagnostics {
    fn unavailable(reason: &str, total_live_hashes: usize) -> Self {
        Self {
            total_live_hashes,
            summary: format!("Diagnosis unavailable: {reason}"),
            ..Self::default()
        }
    }

    /// Offset with the most occurrences, if anything matched.
    pub fn top_offset(&self) -> Option<i64> {
        self.top_offsets.first().map(|&(offset, _)| offset)
    }
}

impl fmt::Display for MatchDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary)
    }
}

/// Analyze with the default occurrence cap.
pub fn analyze(live: &[FptEntry], index: &ReverseIndex) -> MatchDiagnostics {
    analyze_with(live, index, DIAGNOSTIC_MAX_HASH_OCCURRENCE)
}

pub fn analyze_with(
    live: &[FptEntry],
    index: &ReverseIndex,
    max_hash_occurrence: usize,
) -> MatchDiagnostics {
    let total_live_hashes = total_hash_count(live);
    if live.is_empty() {
        return MatchDiagnostics::unavailable("no live fingerprint entries", 0);
    }
    if index.is_empty() {
        return MatchDiagnostics::unavailable("reference index is empty", total_live_hashes);
    }

    let mut invalid_hashes = 0;
    let mut filtered_hashes = 0;
    let mut matched: HashSet<u64> = HashSet::new();
    let mut offset_histogram: BTreeMap<i64, usize> = BTreeMap::new();

    for entry in live {
        for text in &entry.hashes {
            let Some(hash) = parse_hash(text) else {
                invalid_hashes += 1;
                continue;
            };
            let Some(stamps) = index.get(hash) else {
                continue;
            };
            if stamps.len() > max_hash_occurrence {
                filtered_hashes += 1;
                continue;
            }
            matched.insert(hash);
            for &ref_timestamp in stamps {
                *offset_histogram
                    .entry(ref_timestamp.saturating_sub(entry.timestamp))
                    .or_default() += 1;
            }
        }
    }

    let total_match_occurrences: usize = offset_histogram.values().sum();
    let unique_matched_hashes = matched.len();
    let hash_match_rate = unique_matched_hashes as f64 / total_live_hashes.max(1) as f64;

    let mut top_offsets: Vec<(i64, usize)> =
        offset_histogram.iter().map(|(&o, &c)| (o, c)).collect();
    top_offsets.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    top_offsets.truncate(DIAGNOSTIC_TOP_OFFSETS);

    let offset_concentration = match top_offsets.first() {
        Some(&(top, _)) if total_match_occurrences > 0 => {
            let window: usize = (top.saturating_sub(1)..=top.saturating_add(1))
                .filter_map(|o| offset_histogram.get(&o))
                .sum();
            (window as f64 / total_match_occurrences as f64).clamp(0.0, 1.0)
        }
        _ => 0.0,
    };

    let mut diagnostics = MatchDiagnostics {
        total_live_hashes,
        invalid_hashes,
        unique_matched_hashes,
        filtered_hashes,
        total_match_occurrences,
        hash_match_rate,
        offset_concentration,
        offset_histogram,
        top_offsets,
        summary: String::new(),
    };
    diagnostics.summary = render_summary(&diagnostics, max_hash_occurrence);
    log::debug!(
        "Diagnostics: rate {:.3}, concentration {:.3}, {} filtered",
        hash_match_rate,
        offset_concentration,
        filtered_hashes
    );
    diagnostics
}

fn render_summary(d: &MatchDiagnostics, max_hash_occurrence: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Match diagnostics ===");
    let _ = writeln!(out, "Live hashes:        {}", d.total_live_hashes);
    if d.invalid_hashes > 0 {
        let _ = writeln!(out, "Invalid hashes:     {}", d.invalid_hashes);
    }
    let _ = writeln!(out, "Matched (unique):   {}", d.unique_matched_hashes);
    let _ = writeln!(
        out,
        "Filtered (>{}x):    {}",
        max_hash_occurrence, d.filtered_hashes
    );
    let _ = writeln!(out, "Match occurrences:  {}", d.total_match_occurrences);
    let _ = writeln!(out, "Match rate:         {:.1}%", d.hash_match_rate * 100.0);
    let _ = writeln!(
        out,
        "Offset concentration: {:.1}%",
        d.offset_concentration * 100.0
    );

    if !d.top_offsets.is_empty() {
        let _ = writeln!(out, "Top offsets:");
        for (offset, count) in &d.top_offsets {
            let _ = writeln!(out, "  {offset:>+6}s  {count}");
        }
    }

    if d.hash_match_rate < LOW_MATCH_RATE {
        let _ = writeln!(
            out,
            "WARNING: low match rate; the live capture may not be from this reference"
        );
    }
    if d.offset_concentration < DISPERSED_CONCENTRATION {
        let _ = writeln!(
            out,
            "WARNING: offsets are dispersed; matches do not agree on one alignment"
        );
    } else if d.offset_concentration > GOOD_CONCENTRATION {
        let _ = writeln!(
            out,
            "GOOD: offsets concentrate around {:+}s",
            d.top_offset().unwrap_or(0)
        );
    }
    out
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn counters_consistent(
            reference in proptest::collection::vec((0i64..100, 1u64..50), 1..200),
            live in proptest::collection::vec((0i64..100, 1u64..80), 0..200),
            cap in 1usize..20,
        ) {
            let index: ReverseIndex = reference.into_iter().map(|(t, h)| (h, t)).collect();
            let live: Vec<FptEntry> = live
                .into_iter()
                .map(|(t, h)| FptEntry::from_values(t, &[h]))
                .collect();
            let d = analyze_with(&live, &index, cap);
            prop_assert!(d.filtered_hashes + d.unique_matched_hashes <= d.total_live_hashes);
            if d.unique_matched_hashes > 0 {
                prop_assert!((0.0..=1.0).contains(&d.offset_concentration));
            }
        }
    }
}
