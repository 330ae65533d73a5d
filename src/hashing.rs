//! Peak-pair hashing.
//!
//! A hash encodes the quantized relationship between an anchor peak and a
//! target peak: time gap, frequency ratio and the Mel band of each. Every pair
//! yields the hash at its true time bucket plus the two neighbouring buckets,
//! so a one-bucket timing jitter between two captures still shares a hash.

use crate::config::{
    FNV_OFFSET_BASIS, FNV_PRIME, FREQ_RATIO_BUCKETS, LOG_RATIO_RANGE, MAX_FREQ_RATIO,
    MEL_BAND_WIDTH, MEL_BANDS, MIN_FREQ_RATIO, TIME_BUCKET_SECS, TIME_BUCKETS,
};
use crate::peaks::Peak;

const FREQ_EPSILON: f64 = 1e-10;

/// Time gap in 0.03 s buckets, clamped to `[0, 99]`.
pub fn quantize_time(time_delta: f64) -> u16 {
    if time_delta.is_nan() {
        return 0;
    }
    let bucket = (time_delta / TIME_BUCKET_SECS).floor();
    bucket.clamp(0.0, (TIME_BUCKETS - 1) as f64) as u16
}

/// Log frequency ratio bucket in `[0, 99]`. Ratios outside `[0.25, 4]` clamp.
pub fn quantize_freq_ratio(ratio: f64) -> u16 {
    if ratio.is_nan() {
        return 0;
    }
    let log_ratio = ratio.clamp(MIN_FREQ_RATIO, MAX_FREQ_RATIO).ln();
    let normalized = (log_ratio + LOG_RATIO_RANGE) / (2.0 * LOG_RATIO_RANGE);
    let bucket = (normalized * FREQ_RATIO_BUCKETS as f64).floor();
    bucket.clamp(0.0, (FREQ_RATIO_BUCKETS - 1) as f64) as u16
}

/// Mel-scale band index in `[0, 49]`, 80 mel per band.
pub fn mel_band(frequency: f64) -> u8 {
    if frequency.is_nan() {
        return 0;
    }
    let mel = 2595.0 * (1.0 + frequency.max(0.0) / 700.0).log10();
    (mel / MEL_BAND_WIDTH)
        .floor()
        .clamp(0.0, (MEL_BANDS - 1) as f64) as u8
}

/// FNV-1a over the quantized fields. Both bytes of the two bucket values are
/// mixed, low byte first; bands never exceed one byte.
pub fn mix_fields(time_bucket: u16, ratio_bucket: u16, band1: u8, band2: u8) -> u64 {
    let [t_lo, t_hi] = time_bucket.to_le_bytes();
    let [r_lo, r_hi] = ratio_bucket.to_le_bytes();
    [t_lo, t_hi, r_lo, r_hi, band1, band2]
        .iter()
        .fold(FNV_OFFSET_BASIS, |hash, &byte| {
            (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
        })
}

/// Hashes for an anchor/target pair: the true time bucket first, then the
/// buckets one below and one above. Variants that clamp onto an already
/// produced bucket are dropped, so the result has 3 entries except at the
/// edges of the time range.
pub fn generate_hashes(anchor: &Peak, target: &Peak) -> Vec<u64> {
    let time_bucket = quantize_time(target.time - anchor.time);
    let ratio_bucket = quantize_freq_ratio(target.frequency / (anchor.frequency + FREQ_EPSILON));
    let band1 = mel_band(anchor.frequency);
    let band2 = mel_band(target.frequency);

    let max_bucket = TIME_BUCKETS - 1;
    let variants = [
        time_bucket,
        time_bucket.saturating_sub(1),
        (time_bucket + 1).min(max_bucket),
    ];

    let mut hashes = Vec::with_capacity(variants.len());
    for (i, &bucket) in variants.iter().enumerate() {
        if variants[..i].contains(&bucket) {
            continue;
        }
        hashes.push(mix_fields(bucket, ratio_bucket, band1, band2));
    }
    hashes
}

/// Older call shape with an indexing/query switch. Indexing and querying use
/// the same symmetric variants, so the flag is ignored.
pub fn generate_hashes_for(anchor: &Peak, target: &Peak, _for_indexing: bool) -> Vec<u64> {
    generate_hashes(anchor, target)
}

/// 32-bit form kept for older fingerprint sets.
pub fn legacy_hash32(hash: u64) -> u32 {
    hash as u32
}

/// Fixed-width lowercase hex, the stored form of a hash.
pub fn format_hash(hash: u64) -> String {
    format!("{hash:016x}")
}

/// Parse a stored hash string. Empty, unparseable and zero values are `None`.
/// Legacy 32-bit strings parse into the low half.
pub fn parse_hash(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok().filter(|&hash| hash != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(time: f64, frequency: f64) -> Peak {
        Peak {
            time,
            frequency,
            magnitude: 1.0,
        }
    }

    #[test]
    fn test_quantize_time_buckets() {
        assert_eq!(quantize_time(0.0), 0);
        assert_eq!(quantize_time(0.031), 1);
        assert_eq!(quantize_time(0.5), 16);
        assert_eq!(quantize_time(-1.0), 0);
        assert_eq!(quantize_time(2.99), 99);
        assert_eq!(quantize_time(1e9), 99);
        assert_eq!(quantize_time(f64::NAN), 0);
    }

    #[test]
    fn test_quantize_freq_ratio() {
        // ln(1) = 0 sits at the middle of [-1.4, 1.4].
        assert_eq!(quantize_freq_ratio(1.0), 50);
        assert_eq!(quantize_freq_ratio(0.0), quantize_freq_ratio(0.25));
        assert_eq!(quantize_freq_ratio(100.0), quantize_freq_ratio(4.0));
        assert!(quantize_freq_ratio(4.0) <= 99);
        assert!(quantize_freq_ratio(0.5) < quantize_freq_ratio(2.0));
    }

    #[test]
    fn test_mel_band_edges() {
        assert_eq!(mel_band(0.0), 0);
        assert_eq!(mel_band(-50.0), 0);
        assert_eq!(mel_band(1e9), 49);
        // 1000 Hz ~ 1000 mel.
        assert_eq!(mel_band(1000.0), 12);
    }

    #[test]
    fn test_mix_high_band_byte_never_needed() {
        assert!(MEL_BANDS as u16 <= u8::MAX as u16);
        assert_ne!(mix_fields(1, 50, 3, 4), mix_fields(1, 50, 4, 3));
        assert_ne!(mix_fields(1, 50, 3, 4), mix_fields(2, 50, 3, 4));
        assert_ne!(mix_fields(256, 0, 0, 0), mix_fields(0, 1, 0, 0));
    }

    #[test]
    fn test_mix_matches_reference_fnv() {
        // FNV-1a of six zero bytes.
        let mut expected = FNV_OFFSET_BASIS;
        for _ in 0..6 {
            expected = expected.wrapping_mul(FNV_PRIME);
        }
        assert_eq!(mix_fields(0, 0, 0, 0), expected);
    }

    #[test]
    fn test_three_variants_in_range() {
        let hashes = generate_hashes(&peak(1.0, 440.0), &peak(1.5, 880.0));
        assert_eq!(hashes.len(), 3);
        let ratio = quantize_freq_ratio(2.0);
        let (b1, b2) = (mel_band(440.0), mel_band(880.0));
        assert_eq!(hashes[0], mix_fields(16, ratio, b1, b2));
        assert_eq!(hashes[1], mix_fields(15, ratio, b1, b2));
        assert_eq!(hashes[2], mix_fields(17, ratio, b1, b2));
    }

    #[test]
    fn test_variants_collapse_at_edges() {
        assert_eq!(generate_hashes(&peak(1.0, 440.0), &peak(1.0, 880.0)).len(), 2);
        assert_eq!(generate_hashes(&peak(0.0, 440.0), &peak(10.0, 880.0)).len(), 2);
    }

    #[test]
    fn test_one_bucket_jitter_shares_a_hash() {
        let reference = generate_hashes(&peak(2.0, 500.0), &peak(2.30, 750.0));
        let live = generate_hashes(&peak(7.0, 500.0), &peak(7.34, 750.0));
        assert!(reference.iter().any(|h| live.contains(h)));
    }

    #[test]
    fn test_indexing_flag_has_no_effect() {
        let (a, b) = (peak(0.0, 300.0), peak(0.2, 900.0));
        assert_eq!(generate_hashes_for(&a, &b, true), generate_hashes_for(&a, &b, false));
        assert_eq!(generate_hashes_for(&a, &b, true), generate_hashes(&a, &b));
    }

    #[test]
    fn test_zero_anchor_frequency_is_finite() {
        let hashes = generate_hashes(&peak(0.0, 0.0), &peak(0.1, 500.0));
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn test_legacy_hash32_is_low_half() {
        assert_eq!(legacy_hash32(0x1234_5678_9abc_def0), 0x9abc_def0);
    }

    #[test]
    fn test_hex_codec() {
        let hash = 0x00ab_cdef_0123_4567;
        let text = format_hash(hash);
        assert_eq!(text, "00abcdef01234567");
        assert_eq!(parse_hash(&text), Some(hash));
        assert_eq!(parse_hash("0xDEADBEEF"), Some(0xdead_beef));
        assert_eq!(parse_hash(" 9abcdef0 "), Some(0x9abc_def0));
    }

    #[test]
    fn test_invalid_hash_strings() {
        assert_eq!(parse_hash(""), None);
        assert_eq!(parse_hash("   "), None);
        assert_eq!(parse_hash("0x"), None);
        assert_eq!(parse_hash("zz"), None);
        assert_eq!(parse_hash("0000000000000000"), None);
        assert_eq!(parse_hash("1ffffffffffffffff"), None);
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn quantize_time_bounded(delta in proptest::num::f64::ANY) {
            prop_assert!(quantize_time(delta) <= 99);
        }

        #[test]
        fn quantize_ratio_bounded(ratio in proptest::num::f64::ANY) {
            prop_assert!(quantize_freq_ratio(ratio) <= 99);
        }

        #[test]
        fn mel_band_monotonic(a in 0.0f64..1e9, b in 0.0f64..1e9) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(mel_band(lo) <= mel_band(hi));
            prop_assert!(mel_band(hi) <= 49);
        }

        #[test]
        fn hashes_deterministic(
            t1 in 0.0f64..600.0,
            dt in -1.0f64..5.0,
            f1 in 20.0f64..6400.0,
            f2 in 20.0f64..6400.0,
        ) {
            let a = Peak { time: t1, frequency: f1, magnitude: 1.0 };
            let b = Peak { time: t1 + dt, frequency: f2, magnitude: 2.0 };
            let first = generate_hashes(&a, &b);
            prop_assert_eq!(&first, &generate_hashes(&a, &b));
            prop_assert!(first.len() == 2 || first.len() == 3);
            let bucket = quantize_time(b.time - a.time);
            if bucket > 0 && bucket < 99 {
                prop_assert_eq!(first.len(), 3);
            }
        }
    }
}
