use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{
    DEFAULT_MIN_CONFIDENCE, MAX_HASHES_PER_ENTRY, MAX_MATCH_PAIRS, MAX_REFS_PER_HASH,
    MIN_MATCH_PAIRS, MatchConfig,
};
use crate::fingerprint::{FptEntry, total_hash_count};
use crate::hashing::parse_hash;
use crate::index::ReverseIndex;

use super::{FingerprintMatchResult, MatchPair};

const PAIR_RATIO_WEIGHT: f64 = 0.4;
const LIVE_RATIO_WEIGHT: f64 = 0.3;
const INLIER_COUNT_WEIGHT: f64 = 0.3;
const FULL_INLIER_COUNT: f64 = 10.0;

/// Finds the single global offset most live/reference hash pairs agree on.
///
/// Pair collection is bounded by `max_hashes_per_entry`, `max_refs_per_hash`
/// and `max_pairs` so highly repetitive content cannot blow up the vote.
#[derive(Debug, Clone)]
pub struct OffsetVotingMatcher {
    pub min_confidence: f64,
    pub max_hashes_per_entry: usize,
    pub max_refs_per_hash: usize,
    pub max_pairs: usize,
    /// When set, hashes occurring more often than this in the searched index are skipped.
    pub max_hash_occurrences: Option<usize>,
}

impl Default for OffsetVotingMatcher {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_hashes_per_entry: MAX_HASHES_PER_ENTRY,
            max_refs_per_hash: MAX_REFS_PER_HASH,
            max_pairs: MAX_MATCH_PAIRS,
            max_hash_occurrences: None,
        }
    }
}

/// Winning offset bin and the offsets that agree with it.
#[derive(Debug, Clone, PartialEq)]
struct OffsetVote {
    best_offset: i64,
    inlier_offsets: Vec<i64>,
}

impl OffsetVotingMatcher {
    pub fn new(min_confidence: f64) -> Self {
        Self {
            min_confidence,
            ..Self::default()
        }
    }

    pub fn from_config(config: &MatchConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            max_hashes_per_entry: config.max_hashes_per_entry,
            max_refs_per_hash: config.max_refs_per_hash,
            max_pairs: config.max_pairs,
            max_hash_occurrences: None,
        }
    }

    pub fn with_occurrence_cap(mut self, cap: usize) -> Self {
        self.max_hash_occurrences = Some(cap);
        self
    }

    /// Pairs every looked-up live hash with its first reference occurrences,
    /// stopping once `max_pairs` pairs exist.
    pub fn collect_pairs(&self, live: &[FptEntry], index: &ReverseIndex) -> Vec<MatchPair> {
        let mut pairs = Vec::new();
        for entry in live {
            for text in entry.hashes.iter().take(self.max_hashes_per_entry) {
                let Some(stamps) = parse_hash(text).and_then(|hash| index.get(hash)) else {
                    continue;
                };
                if self
                    .max_hash_occurrences
                    .is_some_and(|cap| stamps.len() > cap)
                {
                    continue;
                }
                for &ref_timestamp in stamps.iter().take(self.max_refs_per_hash) {
                    pairs.push(MatchPair {
                        live_timestamp: entry.timestamp,
                        ref_timestamp,
                    });
                    if pairs.len() >= self.max_pairs {
                        log::debug!("Pair cap of {} reached", self.max_pairs);
                        return pairs;
                    }
                }
            }
        }
        pairs
    }

    pub fn find_match(&self, live: &[FptEntry], index: &ReverseIndex) -> FingerprintMatchResult {
        if live.is_empty() || index.is_empty() {
            return FingerprintMatchResult::empty();
        }

        let pairs = self.collect_pairs(live, index);
        if pairs.len() < MIN_MATCH_PAIRS {
            log::debug!("Only {} match pairs, no match", pairs.len());
            return FingerprintMatchResult::empty();
        }

        let Some(vote) = vote_offset(&pairs) else {
            return FingerprintMatchResult::empty();
        };
        let inliers = vote.inlier_offsets.len();
        if inliers < MIN_MATCH_PAIRS {
            log::debug!(
                "Offset {}s has only {} inliers, no match",
                vote.best_offset,
                inliers
            );
            return FingerprintMatchResult::empty();
        }

        let offset = median(&vote.inlier_offsets);
        let confidence = confidence(inliers, pairs.len(), total_hash_count(live));
        let is_matched = confidence >= self.min_confidence;

        log::debug!(
            "Offset vote: bin {}s, refined {:.2}s, {}/{} inliers, confidence {:.3}{}",
            vote.best_offset,
            offset,
            inliers,
            pairs.len(),
            confidence,
            if is_matched { "" } else { " (below threshold)" }
        );

        FingerprintMatchResult {
            is_matched,
            confidence,
            matched_time: Duration::from_secs_f64(offset.max(0.0)),
            matched_hash_count: inliers,
            total_hash_count: pairs.len(),
        }
    }
}

/// Voting match with default caps.
pub fn match_offsets(
    live: &[FptEntry],
    index: &ReverseIndex,
    min_confidence: f64,
) -> FingerprintMatchResult {
    OffsetVotingMatcher::new(min_confidence).find_match(live, index)
}

/// Picks the offset whose count, merged with the two adjacent seconds, is
/// highest. Ties go to the lowest offset.
fn vote_offset(pairs: &[MatchPair]) -> Option<OffsetVote> {
    let mut histogram: BTreeMap<i64, usize> = BTreeMap::new();
    for pair in pairs {
        *histogram.entry(pair.offset()).or_default() += 1;
    }

    let count = |offset: i64| histogram.get(&offset).copied().unwrap_or(0);
    let mut best: Option<(i64, usize)> = None;
    for &offset in histogram.keys() {
        let score =
            count(offset) + count(offset.saturating_sub(1)) + count(offset.saturating_add(1));
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((offset, score));
        }
    }

    let (best_offset, _) = best?;
    let inlier_offsets = pairs
        .iter()
        .map(MatchPair::offset)
        .filter(|offset| offset.abs_diff(best_offset) <= 1)
        .collect();
    Some(OffsetVote {
        best_offset,
        inlier_offsets,
    })
}

fn median(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    } else {
        sorted[mid] as f64
    }
}

fn confidence(inliers: usize, total_pairs: usize, total_live_hashes: usize) -> f64 {
    let inliers = inliers as f64;
    let pair_ratio = inliers / total_pairs.max(1) as f64;
    let live_ratio = (inliers / total_live_hashes.max(1) as f64).min(1.0);
    let count_score = (inliers / FULL_INLIER_COUNT).min(1.0);
    let weighted = PAIR_RATIO_WEIGHT * pair_ratio
        + LIVE_RATIO_WEIGHT * live_ratio
        + INLIER_COUNT_WEIGHT * count_score;
    weighted.clamp(0.0, 1.0)
}
