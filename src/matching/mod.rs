//! Matching a live capture against a reference index.
//!
//! Two strategies share one result type: [`OffsetVotingMatcher`] votes on a
//! single global offset, [`CoarseToFineMatcher`] narrows the reference to a few
//! time regions first and runs the voting matcher inside each.

mod coarse;
mod voting;

use std::fmt;
use std::time::Duration;

pub use coarse::{CandidateRegion, CoarseToFineMatcher, match_coarse_to_fine};
pub use voting::{OffsetVotingMatcher, match_offsets};

const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.7;
const MEDIUM_CONFIDENCE_THRESHOLD: f64 = 0.45;

/// A live hash occurrence paired with one reference occurrence of the same hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPair {
    pub live_timestamp: i64,
    pub ref_timestamp: i64,
}

impl MatchPair {
    /// Reference time minus live time, in seconds. Saturates at the `i64` range.
    pub fn offset(&self) -> i64 {
        self.ref_timestamp.saturating_sub(self.live_timestamp)
    }
}

/// Outcome of a match. A failed or inconclusive match is still a value:
/// callers check `is_matched`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FingerprintMatchResult {
    pub is_matched: bool,
    /// Within `[0, 1]`.
    pub confidence: f64,
    /// Position in the reference that the start of the live capture aligns to.
    pub matched_time: Duration,
    /// Pairs agreeing with the chosen offset.
    pub matched_hash_count: usize,
    /// Pairs considered.
    pub total_hash_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchQuality {
    High,
    Medium,
    Low,
}

impl fmt::Display for MatchQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchQuality::High => "High",
            MatchQuality::Medium => "Medium",
            MatchQuality::Low => "Low",
        })
    }
}

impl FingerprintMatchResult {
    /// No match, zero confidence.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn quality(&self) -> MatchQuality {
        if self.confidence > HIGH_CONFIDENCE_THRESHOLD {
            MatchQuality::High
        } else if self.confidence > MEDIUM_CONFIDENCE_THRESHOLD {
            MatchQuality::Medium
        } else {
            MatchQuality::Low
        }
    }
}

impl fmt::Display for FingerprintMatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_matched {
            return write!(
                f,
                "No match (confidence {:.3}, {}/{} pairs agree)",
                self.confidence, self.matched_hash_count, self.total_hash_count
            );
        }
        write!(
            f,
            "Matched at {:.2}s (confidence {:.3}, {} quality, {}/{} pairs agree)",
            self.matched_time.as_secs_f64(),
            self.confidence,
            self.quality(),
            self.matched_hash_count,
            self.total_hash_count
        )
    }
}
