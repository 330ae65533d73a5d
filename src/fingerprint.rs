use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::config::{PairingConfig, PeakConfig};
use crate::hashing::{format_hash, generate_hashes, parse_hash};
use crate::peaks::{Peak, SpectralFrame, detect_frames};

/// All hashes anchored within one second of audio.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FptEntry {
    /// Whole seconds from the start of the recording.
    pub timestamp: i64,
    /// Hex hash strings, in generation order.
    pub hashes: Vec<String>,
}

impl FptEntry {
    pub fn new(timestamp: i64, hashes: Vec<String>) -> Self {
        Self { timestamp, hashes }
    }

    /// Build an entry straight from hash values.
    pub fn from_values(timestamp: i64, values: &[u64]) -> Self {
        Self {
            timestamp,
            hashes: values.iter().map(|&h| format_hash(h)).collect(),
        }
    }

    /// The hashes that parse to a valid non-zero value, in order.
    pub fn hash_values(&self) -> impl Iterator<Item = u64> + '_ {
        self.hashes.iter().filter_map(|h| parse_hash(h))
    }
}

/// Total hash strings across `entries`, valid or not.
pub fn total_hash_count(entries: &[FptEntry]) -> usize {
    entries.iter().map(|e| e.hashes.len()).sum()
}

/// Pair peaks into anchor/target hashes and group them per anchor second.
///
/// Peaks may arrive in any order; they are sorted by time, then frequency.
/// Each anchor is paired with up to `fan_out` later peaks whose time gap lies
/// in `[min_time_delta, max_time_delta]`.
pub fn build_entries(mut peaks: Vec<Peak>, pairing: &PairingConfig) -> Vec<FptEntry> {
    peaks.retain(|p| p.time.is_finite() && p.frequency.is_finite());
    peaks.sort_by(|a, b| {
        a.time
            .partial_cmp(&b.time)
            .unwrap_or(Ordering::Equal)
            .then(a.frequency.partial_cmp(&b.frequency).unwrap_or(Ordering::Equal))
    });

    let mut grouped: BTreeMap<i64, (Vec<String>, HashSet<u64>)> = BTreeMap::new();
    let mut pair_count = 0usize;

    for (i, anchor) in peaks.iter().enumerate() {
        let mut targets = 0;
        for target in &peaks[i + 1..] {
            let delta = target.time - anchor.time;
            if delta > pairing.max_time_delta || targets >= pairing.fan_out {
                break;
            }
            if delta < pairing.min_time_delta {
                continue;
            }
            targets += 1;
            pair_count += 1;

            let (hashes, seen) = grouped.entry(anchor.time.floor() as i64).or_default();
            for hash in generate_hashes(anchor, target) {
                if seen.insert(hash) {
                    hashes.push(format_hash(hash));
                }
            }
        }
    }

    log::debug!(
        "Paired {} peaks into {} pairs over {} entries",
        peaks.len(),
        pair_count,
        grouped.len()
    );

    grouped
        .into_iter()
        .map(|(timestamp, (hashes, _))| FptEntry { timestamp, hashes })
        .collect()
}

/// Detect peaks over all frames and pair them into entries.
pub fn fingerprint_frames(
    frames: &[SpectralFrame],
    peaks: &PeakConfig,
    pairing: &PairingConfig,
) -> Vec<FptEntry> {
    build_entries(detect_frames(frames, peaks), pairing)
}
