//! Adaptive per-band spectral peak detection.
//!
//! Each frame is searched independently, so frames can be spread over worker
//! threads. Detected peaks land in a [`PeakSink`], which is safe to share
//! between threads and gives no ordering guarantee.

use std::cmp::Ordering;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::{
    BAND_MAX_FLOOR_RATIO, FLATNESS_NOISE_MULTIPLIER, FLATNESS_NOISE_THRESHOLD, FREQUENCY_BANDS,
    MAX_NEIGHBORHOOD, MIN_NEIGHBORHOOD, MIN_PEAKS_PER_BAND, PeakConfig,
};

const MAGNITUDE_FLOOR: f64 = 1e-10;

/// A spectral peak, refined to sub-bin frequency precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Seconds from the start of the recording.
    pub time: f64,
    /// Hz.
    pub frequency: f64,
    pub magnitude: f64,
}

/// One analysis frame of an already-computed spectrum.
/// `frequencies` must be ascending and the same length as `magnitudes`.
#[derive(Debug, Clone, Default)]
pub struct SpectralFrame {
    pub time: f64,
    pub magnitudes: Vec<f64>,
    pub frequencies: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralStatistics {
    pub mean: f64,
    pub stddev: f64,
    pub max: f64,
}

impl SpectralStatistics {
    pub fn of(magnitudes: &[f64]) -> Self {
        if magnitudes.is_empty() {
            return Self {
                mean: 0.0,
                stddev: 0.0,
                max: 0.0,
            };
        }
        let n = magnitudes.len() as f64;
        let mean = magnitudes.iter().sum::<f64>() / n;
        let variance = magnitudes.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
        let max = magnitudes.iter().copied().fold(f64::MIN, f64::max);
        Self {
            mean,
            stddev: variance.sqrt(),
            max,
        }
    }
}

/// Append-only peak collection shared by detection workers.
#[derive(Debug, Default)]
pub struct PeakSink {
    peaks: Mutex<Vec<Peak>>,
}

impl PeakSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, peak: Peak) {
        self.peaks.lock().push(peak);
    }

    /// Appends a whole batch under a single lock acquisition.
    pub fn extend(&self, batch: Vec<Peak>) {
        if batch.is_empty() {
            return;
        }
        self.peaks.lock().extend(batch);
    }

    pub fn len(&self) -> usize {
        self.peaks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.lock().is_empty()
    }

    /// Copy of the peaks collected so far.
    pub fn snapshot(&self) -> Vec<Peak> {
        self.peaks.lock().clone()
    }

    pub fn into_peaks(self) -> Vec<Peak> {
        self.peaks.into_inner()
    }
}

/// Geometric over arithmetic mean of the bins above the magnitude floor.
/// Close to 1 for noise, close to 0 for tonal content.
pub fn spectral_flatness(magnitudes: &[f64]) -> f64 {
    let mut log_sum = 0.0;
    let mut sum = 0.0;
    let mut count = 0usize;
    for &m in magnitudes.iter().filter(|&&m| m > MAGNITUDE_FLOOR) {
        log_sum += m.ln();
        sum += m;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    let geometric = (log_sum / count as f64).exp();
    let arithmetic = sum / count as f64;
    (geometric / (arithmetic + MAGNITUDE_FLOOR)).clamp(0.0, 1.0)
}

fn flatness_multiplier(flatness: f64) -> f64 {
    if flatness > FLATNESS_NOISE_THRESHOLD {
        FLATNESS_NOISE_MULTIPLIER
    } else {
        1.0
    }
}

/// Index range `[start, end)` of the bins whose frequency lies in `[min_hz, max_hz)`.
fn band_bin_range(frequencies: &[f64], min_hz: f64, max_hz: f64) -> (usize, usize) {
    let start = frequencies.partition_point(|&f| f < min_hz);
    let end = frequencies.partition_point(|&f| f < max_hz);
    (start, end.max(start))
}

fn band_threshold(band: &[f64], freq_ratio: f64, flat_mult: f64, config: &PeakConfig) -> f64 {
    let n = band.len() as f64;
    let mean = band.iter().sum::<f64>() / n;
    let variance = band.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
    let band_max = band.iter().copied().fold(0.0, f64::max);

    let adaptive = mean
        + config.peak_threshold_multiplier * (1.0 + freq_ratio) * flat_mult * variance.sqrt();
    adaptive.max(BAND_MAX_FLOOR_RATIO * band_max)
}

fn neighborhood_for(freq_ratio: f64, config: &PeakConfig) -> usize {
    let scaled = config.peak_neighborhood_size as f64 * (1.0 + (1.0 - freq_ratio));
    (scaled as usize).clamp(MIN_NEIGHBORHOOD, MAX_NEIGHBORHOOD)
}

fn is_local_maximum(magnitudes: &[f64], idx: usize, neighborhood: usize) -> bool {
    let value = magnitudes[idx];
    (idx - neighborhood..=idx + neighborhood)
        .filter(|&j| j != idx)
        .all(|j| value > magnitudes[j])
}

/// Sub-bin frequency via a parabola through the log magnitudes of bins
/// `idx - 1`, `idx`, `idx + 1`. The shift never exceeds half a bin.
fn refine_frequency(magnitudes: &[f64], frequencies: &[f64], idx: usize) -> f64 {
    if idx == 0 || idx + 1 >= magnitudes.len() || idx + 1 >= frequencies.len() {
        return frequencies[idx];
    }
    let alpha = (magnitudes[idx - 1] + MAGNITUDE_FLOOR).ln();
    let beta = (magnitudes[idx] + MAGNITUDE_FLOOR).ln();
    let gamma = (magnitudes[idx + 1] + MAGNITUDE_FLOOR).ln();

    let denom = alpha - 2.0 * beta + gamma;
    let shift = if denom.abs() > MAGNITUDE_FLOOR {
        (0.5 * (alpha - gamma) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let bin_width = (frequencies[idx + 1] - frequencies[idx - 1]) / 2.0;
    frequencies[idx] + shift * bin_width
}

/// Detect peaks in a single frame and append them to `sink`.
pub fn detect_peaks(frame: &SpectralFrame, config: &PeakConfig, sink: &PeakSink) {
    sink.extend(find_frame_peaks(frame, config));
}

/// Detect peaks in a single frame. No peaks for an empty or malformed frame.
pub fn find_frame_peaks(frame: &SpectralFrame, config: &PeakConfig) -> Vec<Peak> {
    let magnitudes = &frame.magnitudes;
    let frequencies = &frame.frequencies;
    if magnitudes.is_empty() || magnitudes.len() != frequencies.len() {
        return Vec::new();
    }

    let stats = SpectralStatistics::of(magnitudes);
    let flatness = spectral_flatness(magnitudes);
    let flat_mult = flatness_multiplier(flatness);
    log::trace!(
        "frame t={:.3}s mean={:.4} std={:.4} max={:.4} flatness={:.3}",
        frame.time,
        stats.mean,
        stats.stddev,
        stats.max,
        flatness
    );

    let per_band = MIN_PEAKS_PER_BAND.max(config.max_peaks_per_frame / FREQUENCY_BANDS.len());
    let mut peaks = Vec::new();

    for &(min_hz, max_hz) in &FREQUENCY_BANDS {
        let (start, end) = band_bin_range(frequencies, min_hz, max_hz);
        if start == end {
            continue;
        }

        let freq_ratio = (min_hz + max_hz) / 2.0 / 10_000.0;
        let threshold = band_threshold(&magnitudes[start..end], freq_ratio, flat_mult, config);
        let neighborhood = neighborhood_for(freq_ratio, config);

        if end - start <= 2 * neighborhood {
            continue;
        }

        let mut candidates: Vec<Peak> = (start + neighborhood..end - neighborhood)
            .filter(|&i| magnitudes[i] > threshold && is_local_maximum(magnitudes, i, neighborhood))
            .map(|i| Peak {
                time: frame.time,
                frequency: refine_frequency(magnitudes, frequencies, i),
                magnitude: magnitudes[i],
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.magnitude
                .partial_cmp(&a.magnitude)
                .unwrap_or(Ordering::Equal)
        });
        candidates.truncate(per_band);
        peaks.extend(candidates);
    }

    peaks
}

/// Run detection over every frame on the rayon pool.
/// The returned order is unspecified.
pub fn detect_frames(frames: &[SpectralFrame], config: &PeakConfig) -> Vec<Peak> {
    let sink = PeakSink::new();
    frames
        .par_iter()
        .for_each(|frame| detect_peaks(frame, config, &sink));
    log::debug!("Detected {} peaks over {} frames", sink.len(), frames.len());
    sink.into_peaks()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIN_HZ: f64 = 10.0;

    /// 700 bins at 10 Hz spacing (0..7000 Hz) with a low flat floor.
    fn flat_frame(time: f64) -> SpectralFrame {
        let n = 700;
        SpectralFrame {
            time,
            magnitudes: (0..n).map(|i| 0.01 + 0.001 * ((i * 7) % 5) as f64).collect(),
            frequencies: (0..n).map(|i| i as f64 * BIN_HZ).collect(),
        }
    }

    fn with_tone(mut frame: SpectralFrame, hz: f64, magnitude: f64) -> SpectralFrame {
        let bin = (hz / BIN_HZ) as usize;
        frame.magnitudes[bin] = magnitude;
        frame.magnitudes[bin - 1] = magnitude * 0.5;
        frame.magnitudes[bin + 1] = magnitude * 0.5;
        frame
    }

    #[test]
    fn test_empty_frame_has_no_peaks() {
        let sink = PeakSink::new();
        detect_peaks(&SpectralFrame::default(), &PeakConfig::default(), &sink);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_mismatched_lengths_have_no_peaks() {
        let frame = SpectralFrame {
            time: 0.0,
            magnitudes: vec![1.0; 10],
            frequencies: vec![0.0; 5],
        };
        assert!(find_frame_peaks(&frame, &PeakConfig::default()).is_empty());
    }

    #[test]
    fn test_single_tone_detected_in_its_band() {
        let frame = with_tone(flat_frame(1.5), 1000.0, 50.0);
        let peaks = find_frame_peaks(&frame, &PeakConfig::default());
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].time, 1.5);
        assert_eq!(peaks[0].magnitude, 50.0);
        // Symmetric neighbours: no sub-bin shift.
        assert!((peaks[0].frequency - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_tones_in_several_bands() {
        let frame = with_tone(flat_frame(0.0), 300.0, 20.0);
        let frame = with_tone(frame, 1200.0, 30.0);
        let frame = with_tone(frame, 5000.0, 40.0);
        let mut freqs: Vec<f64> = find_frame_peaks(&frame, &PeakConfig::default())
            .iter()
            .map(|p| p.frequency.round())
            .collect();
        freqs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(freqs, vec![300.0, 1200.0, 5000.0]);
    }

    #[test]
    fn test_content_above_6400_ignored() {
        let frame = with_tone(flat_frame(0.0), 6800.0, 100.0);
        assert!(find_frame_peaks(&frame, &PeakConfig::default()).is_empty());
    }

    #[test]
    fn test_band_edge_peak_excluded() {
        // 800 Hz is the first bin of the 800-1600 band and the end of 400-800.
        let frame = with_tone(flat_frame(0.0), 810.0, 80.0);
        assert!(find_frame_peaks(&frame, &PeakConfig::default()).is_empty());
    }

    #[test]
    fn test_per_band_cap_keeps_strongest() {
        let mut frame = flat_frame(0.0);
        // Six well separated tones inside 3200-6400 Hz.
        for (k, hz) in [3500.0, 3900.0, 4300.0, 4700.0, 5100.0, 5500.0].iter().enumerate() {
            frame = with_tone(frame, *hz, 10.0 + k as f64);
        }
        let config = PeakConfig {
            max_peaks_per_frame: 12,
            ..PeakConfig::default()
        };
        let peaks = find_frame_peaks(&frame, &config);
        assert_eq!(peaks.len(), 2);
        assert_eq!(peaks[0].magnitude, 15.0);
        assert_eq!(peaks[1].magnitude, 14.0);
    }

    #[test]
    fn test_minimum_two_per_band() {
        let mut frame = flat_frame(0.0);
        for (k, hz) in [3500.0, 4300.0, 5100.0].iter().enumerate() {
            frame = with_tone(frame, *hz, 10.0 + k as f64);
        }
        let config = PeakConfig {
            max_peaks_per_frame: 0,
            ..PeakConfig::default()
        };
        assert_eq!(find_frame_peaks(&frame, &config).len(), 2);
    }

    #[test]
    fn test_plateau_is_not_a_peak() {
        let mut frame = flat_frame(0.0);
        frame.magnitudes[100] = 40.0;
        frame.magnitudes[101] = 40.0;
        assert!(find_frame_peaks(&frame, &PeakConfig::default()).is_empty());
    }

    #[test]
    fn test_refine_shifts_toward_stronger_neighbour() {
        let magnitudes = vec![1.0, 4.0, 8.0, 6.0, 1.0];
        let frequencies = vec![0.0, 10.0, 20.0, 30.0, 40.0];
        let refined = refine_frequency(&magnitudes, &frequencies, 2);
        assert!(refined > 20.0 && refined <= 25.0, "refined={refined}");
    }

    #[test]
    fn test_refine_at_edge_returns_bin_frequency() {
        let magnitudes = vec![5.0, 1.0];
        let frequencies = vec![0.0, 10.0];
        assert_eq!(refine_frequency(&magnitudes, &frequencies, 0), 0.0);
    }

    #[test]
    fn test_refine_tolerates_short_frequency_axis() {
        let magnitudes = vec![1.0, 4.0, 8.0, 6.0, 1.0];
        let frequencies = vec![0.0, 10.0, 20.0];
        assert_eq!(refine_frequency(&magnitudes, &frequencies, 2), 20.0);
    }

    /// Unit floor everywhere, with 3.0 spikes every 8 bins across 3200-6400 Hz.
    fn noisy_frame() -> SpectralFrame {
        let mut frame = SpectralFrame {
            time: 0.0,
            magnitudes: vec![1.0; 700],
            frequencies: (0..700).map(|i| i as f64 * BIN_HZ).collect(),
        };
        for k in 0..39 {
            frame.magnitudes[324 + 8 * k] = 3.0;
        }
        frame
    }

    #[test]
    fn test_noise_like_frame_raises_threshold() {
        let frame = noisy_frame();
        assert!(spectral_flatness(&frame.magnitudes) > FLATNESS_NOISE_THRESHOLD);
        assert_eq!(flatness_multiplier(spectral_flatness(&frame.magnitudes)), 1.5);

        // Band std is about 0.65: 1.5 * 1.48 * 1.5 * 0.65 puts the bar above 3.0.
        assert!(find_frame_peaks(&frame, &PeakConfig::default()).is_empty());

        // Without the noise multiplier the same spikes would pass at 1.5.
        let relaxed = PeakConfig {
            peak_threshold_multiplier: 1.0,
            ..PeakConfig::default()
        };
        let peaks = find_frame_peaks(&frame, &relaxed);
        assert_eq!(peaks.len(), 5);
        assert!(peaks.iter().all(|p| p.magnitude == 3.0));
    }

    #[test]
    fn test_band_max_floor_rejects_weaker_peak() {
        let mut frame = SpectralFrame {
            time: 0.0,
            magnitudes: vec![0.001; 700],
            frequencies: (0..700).map(|i| i as f64 * BIN_HZ).collect(),
        };
        frame.magnitudes[400] = 100.0;
        frame.magnitudes[500] = 14.0;

        // Mean plus scaled std is about 12.9, under the 15.0 floor.
        let config = PeakConfig::default();
        let band = &frame.magnitudes[320..640];
        let threshold = band_threshold(band, 0.48, 1.0, &config);
        assert_eq!(threshold, BAND_MAX_FLOOR_RATIO * 100.0);

        let peaks = find_frame_peaks(&frame, &config);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].magnitude, 100.0);
        assert!((peaks[0].frequency - 4000.0).abs() < 1e-6);

        // A peak above the floor is kept.
        frame.magnitudes[500] = 16.0;
        assert_eq!(find_frame_peaks(&frame, &config).len(), 2);
    }

    #[test]
    fn test_flatness_noise_vs_tone() {
        let noise = vec![1.0; 256];
        assert!((spectral_flatness(&noise) - 1.0).abs() < 1e-6);

        let mut tone = vec![1e-6; 256];
        tone[40] = 100.0;
        assert!(spectral_flatness(&tone) < 0.1);

        assert_eq!(spectral_flatness(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_neighborhood_clamped() {
        let wide = PeakConfig {
            peak_neighborhood_size: 20,
            ..PeakConfig::default()
        };
        assert_eq!(neighborhood_for(0.01, &wide), MAX_NEIGHBORHOOD);

        let narrow = PeakConfig {
            peak_neighborhood_size: 1,
            ..PeakConfig::default()
        };
        assert_eq!(neighborhood_for(0.48, &narrow), MIN_NEIGHBORHOOD);
        // Low bands widen the window.
        let config = PeakConfig::default();
        assert!(neighborhood_for(0.01, &config) >= neighborhood_for(0.48, &config));
    }

    #[test]
    fn test_statistics() {
        let stats = SpectralStatistics::of(&[1.0, 3.0]);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.stddev, 1.0);
        assert_eq!(stats.max, 3.0);
    }

    #[test]
    fn test_parallel_detection_collects_every_frame() {
        let frames: Vec<SpectralFrame> = (0..64)
            .map(|i| with_tone(flat_frame(i as f64 * 0.032), 1000.0, 50.0))
            .collect();
        let peaks = detect_frames(&frames, &PeakConfig::default());
        assert_eq!(peaks.len(), 64);
        let mut times: Vec<f64> = peaks.iter().map(|p| p.time).collect();
        times.sort_by(|a, b| a.partial_cmp(b).unwrap());
        times.dedup();
        assert_eq!(times.len(), 64);
    }

    #[test]
    fn test_sink_concurrent_push() {
        let sink = PeakSink::new();
        std::thread::scope(|s| {
            for t in 0..8 {
                let sink = &sink;
                s.spawn(move || {
                    for i in 0..500 {
                        sink.push(Peak {
                            time: t as f64,
                            frequency: i as f64,
                            magnitude: 1.0,
                        });
                    }
                });
            }
        });
        assert_eq!(sink.len(), 4000);
        assert_eq!(sink.snapshot().len(), 4000);
    }
}
