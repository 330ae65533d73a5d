use std::collections::HashMap;

use crate::fingerprint::FptEntry;
use crate::hashing::parse_hash;

/// Hash value to every reference timestamp it occurs at, in scan order.
/// Zero is never a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseIndex {
    map: HashMap<u64, Vec<i64>>,
}

impl ReverseIndex {
    /// Index every valid hash of every entry. Unparseable and zero hashes are skipped.
    pub fn build(entries: &[FptEntry]) -> Self {
        let mut map: HashMap<u64, Vec<i64>> = HashMap::new();
        let mut skipped = 0usize;
        for entry in entries {
            for text in &entry.hashes {
                match parse_hash(text) {
                    Some(hash) => map.entry(hash).or_default().push(entry.timestamp),
                    None => skipped += 1,
                }
            }
        }
        if skipped > 0 {
            log::debug!("Skipped {} invalid hashes while indexing", skipped);
        }
        log::debug!(
            "Built reverse index: {} entries, {} unique hashes",
            entries.len(),
            map.len()
        );
        Self { map }
    }

    pub fn get(&self, hash: u64) -> Option<&[i64]> {
        if hash == 0 {
            return None;
        }
        self.map.get(&hash).map(Vec::as_slice)
    }

    /// How many times `hash` occurs in the reference.
    pub fn occurrences(&self, hash: u64) -> usize {
        self.get(hash).map_or(0, <[i64]>::len)
    }

    /// Number of distinct hashes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &[i64])> {
        self.map.iter().map(|(&hash, stamps)| (hash, stamps.as_slice()))
    }

    /// A copy holding only timestamps within `[start, end]`. Hashes left
    /// without timestamps are dropped.
    pub fn restricted_to(&self, start: i64, end: i64) -> Self {
        let map = self
            .map
            .iter()
            .filter_map(|(&hash, stamps)| {
                let kept: Vec<i64> = stamps
                    .iter()
                    .copied()
                    .filter(|&t| t >= start && t <= end)
                    .collect();
                (!kept.is_empty()).then_some((hash, kept))
            })
            .collect();
        Self { map }
    }
}

impl FromIterator<(u64, i64)> for ReverseIndex {
    fn from_iter<I: IntoIterator<Item = (u64, i64)>>(iter: I) -> Self {
        let mut map: HashMap<u64, Vec<i64>> = HashMap::new();
        for (hash, timestamp) in iter.into_iter().filter(|&(hash, _)| hash != 0) {
            map.entry(hash).or_default().push(timestamp);
        }
        Self { map }
    }
}
