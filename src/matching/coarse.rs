use std::collections::HashMap;

use crate::config::{
    DEFAULT_MIN_CONFIDENCE, DEFAULT_REGION_SIZE_SECS, DEFAULT_TOP_CANDIDATES,
    LEGACY_REGION_SIZE_SECS, LEGACY_TOP_CANDIDATES, MAX_HASH_OCCURRENCES, MatchConfig,
};
use crate::fingerprint::FptEntry;
use crate::index::ReverseIndex;

use super::{FingerprintMatchResult, OffsetVotingMatcher};

/// A fixed-size span of the reference timeline and how many live hashes hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateRegion {
    pub start_time: i64,
    pub end_time: i64,
    pub match_count: usize,
}

/// Scores reference regions first, then runs offset voting inside the best few.
#[derive(Debug, Clone)]
pub struct CoarseToFineMatcher {
    pub region_size_secs: i64,
    pub top_candidates: usize,
    /// Hashes occurring more often than this in the reference are ignored.
    pub max_hash_occurrences: usize,
    fine: OffsetVotingMatcher,
}

impl Default for CoarseToFineMatcher {
    fn default() -> Self {
        Self::new(
            DEFAULT_REGION_SIZE_SECS,
            DEFAULT_TOP_CANDIDATES,
            DEFAULT_MIN_CONFIDENCE,
        )
    }
}

impl CoarseToFineMatcher {
    pub fn new(region_size_secs: i64, top_candidates: usize, min_confidence: f64) -> Self {
        Self {
            region_size_secs: region_size_secs.max(1),
            top_candidates,
            max_hash_occurrences: MAX_HASH_OCCURRENCES,
            fine: OffsetVotingMatcher::new(min_confidence)
                .with_occurrence_cap(MAX_HASH_OCCURRENCES),
        }
    }

    pub fn from_config(config: &MatchConfig) -> Self {
        Self {
            region_size_secs: config.region_size_secs.max(1),
            top_candidates: config.top_candidates,
            max_hash_occurrences: config.max_hash_occurrences,
            fine: OffsetVotingMatcher::from_config(config)
                .with_occurrence_cap(config.max_hash_occurrences),
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.fine.min_confidence
    }

    fn region_start(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.region_size_secs) * self.region_size_secs
    }

    /// Every region hit by at least one informative live hash, best first.
    /// Equal scores are ordered by start time.
    pub fn score_regions(&self, live: &[FptEntry], index: &ReverseIndex) -> Vec<CandidateRegion> {
        let mut scores: HashMap<i64, usize> = HashMap::new();
        for entry in live {
            for hash in entry.hash_values() {
                let Some(stamps) = index.get(hash) else {
                    continue;
                };
                if stamps.len() > self.max_hash_occurrences {
                    continue;
                }
                for &timestamp in stamps {
                    *scores.entry(self.region_start(timestamp)).or_default() += 1;
                }
            }
        }

        let mut regions: Vec<CandidateRegion> = scores
            .into_iter()
            .map(|(start_time, match_count)| CandidateRegion {
                start_time,
                end_time: start_time.saturating_add(self.region_size_secs),
                match_count,
            })
            .collect();
        regions.sort_by(|a, b| {
            b.match_count
                .cmp(&a.match_count)
                .then(a.start_time.cmp(&b.start_time))
        });
        regions
    }

    pub fn find_match(&self, live: &[FptEntry], index: &ReverseIndex) -> FingerprintMatchResult {
        if live.is_empty() || index.is_empty() {
            return FingerprintMatchResult::empty();
        }

        let regions = self.score_regions(live, index);
        if regions.is_empty() {
            log::debug!("No candidate regions");
            return FingerprintMatchResult::empty();
        }

        let mut best: Option<FingerprintMatchResult> = None;
        for region in regions.iter().take(self.top_candidates) {
            let regional = index.restricted_to(region.start_time, region.end_time);
            let result = self.fine.find_match(live, &regional);
            log::debug!(
                "Region {}-{}s ({} hits): {}",
                region.start_time,
                region.end_time,
                region.match_count,
                result
            );
            if result.is_matched
                && best
                    .as_ref()
                    .is_none_or(|b| result.confidence > b.confidence)
            {
                best = Some(result);
            }
        }

        best.unwrap_or_default()
    }

    /// Older two-index call shape. The coarse index is ignored; regions are
    /// always scored from `index` with 30 s regions and 5 candidates.
    pub fn find_match_with_coarse_index(
        &self,
        live: &[FptEntry],
        index: &ReverseIndex,
        _coarse_index: &ReverseIndex,
    ) -> FingerprintMatchResult {
        let legacy = Self {
            region_size_secs: LEGACY_REGION_SIZE_SECS,
            top_candidates: LEGACY_TOP_CANDIDATES,
            ..self.clone()
        };
        legacy.find_match(live, index)
    }
}

/// Coarse-to-fine match with default occurrence caps.
pub fn match_coarse_to_fine(
    live: &[FptEntry],
    index: &ReverseIndex,
    region_size_secs: i64,
    top_candidates: usize,
    min_confidence: f64,
) -> FingerprintMatchResult {
    CoarseToFineMatcher::new(region_size_secs, top_candidates, min_confidence)
        .find_match(live, index)
}
