//! WAV loading and the short-time spectrum fed to peak detection.

use std::f64::consts::PI;
use std::path::Path;

use hound::SampleFormat;
use rustfft::{FftPlanner, num_complex::Complex};
use thiserror::Error;

use crate::peaks::SpectralFrame;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Unsupported channel count: {0} (only mono and stereo)")]
    Channels(u16),
    #[error("Unsupported sample format: {bits}-bit {format:?}")]
    Format { bits: u16, format: SampleFormat },
    #[error("Upsampling is not supported ({from} Hz -> {to} Hz)")]
    Upsample { from: u32, to: u32 },
}

/// Mono samples in `[-1, 1]` at a known rate.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Read a WAV file, mix it to mono and downsample to `target_sample_rate`.
pub fn load_wav(path: &Path, target_sample_rate: u32) -> Result<AudioBuffer, AudioError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    log::debug!(
        "{}: {} Hz, {} ch, {}-bit {:?}, {} samples",
        path.display(),
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        spec.sample_format,
        reader.len()
    );

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, bits @ 17..=32) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (format, bits) => return Err(AudioError::Format { bits, format }),
    };

    let mono = match spec.channels {
        1 => interleaved,
        2 => {
            log::debug!("Stereo audio detected, converting to mono");
            interleaved
                .chunks_exact(2)
                .map(|chunk| (chunk[0] + chunk[1]) / 2.0)
                .collect()
        }
        n => return Err(AudioError::Channels(n)),
    };

    let samples = downsample(&mono, spec.sample_rate, target_sample_rate)?;
    let sample_rate = if target_sample_rate > 0 && spec.sample_rate > target_sample_rate {
        // Integer stepping lands on sample_rate / step, not always the target.
        spec.sample_rate / (spec.sample_rate / target_sample_rate)
    } else {
        spec.sample_rate
    };
    Ok(AudioBuffer {
        samples,
        sample_rate,
    })
}

/// Keep every `original / target`-th sample. Equal rates copy the input.
pub fn downsample(
    samples: &[f32],
    original_sample_rate: u32,
    target_sample_rate: u32,
) -> Result<Vec<f32>, AudioError> {
    if target_sample_rate >= original_sample_rate || target_sample_rate == 0 {
        if target_sample_rate > original_sample_rate {
            return Err(AudioError::Upsample {
                from: original_sample_rate,
                to: target_sample_rate,
            });
        }
        return Ok(samples.to_vec());
    }

    let step = (original_sample_rate / target_sample_rate) as usize;
    log::debug!(
        "Downsampling: {} Hz -> {} Hz (step {})",
        original_sample_rate,
        target_sample_rate,
        step
    );
    Ok(samples.iter().step_by(step).copied().collect())
}

pub fn hamming_window(window_size: usize) -> Vec<f64> {
    if window_size < 2 {
        return vec![1.0; window_size];
    }
    (0..window_size)
        .map(|n| {
            let value = 2.0 * PI * n as f64 / (window_size as f64 - 1.0);
            0.54 - 0.46 * value.cos()
        })
        .collect()
}

/// Frequency in Hz of each of the `window_size / 2` bins.
pub fn bin_frequencies(window_size: usize, sample_rate: u32) -> Vec<f64> {
    let resolution = sample_rate as f64 / window_size as f64;
    (0..window_size / 2).map(|k| k as f64 * resolution).collect()
}

/// Hamming-windowed magnitude spectrum of every full window, `hop_size` apart.
pub fn compute_spectral_frames(
    samples: &[f32],
    sample_rate: u32,
    window_size: usize,
    hop_size: usize,
) -> Vec<SpectralFrame> {
    if window_size < 2 || hop_size == 0 || sample_rate == 0 || samples.len() < window_size {
        return Vec::new();
    }

    let window = hamming_window(window_size);
    let frequencies = bin_frequencies(window_size, sample_rate);
    let fft = FftPlanner::<f64>::new().plan_fft_forward(window_size);
    let mut buffer = vec![Complex::new(0.0, 0.0); window_size];

    let frames: Vec<SpectralFrame> = samples
        .windows(window_size)
        .step_by(hop_size)
        .enumerate()
        .map(|(i, chunk)| {
            for (slot, (&sample, &coeff)) in buffer.iter_mut().zip(chunk.iter().zip(&window)) {
                *slot = Complex::new(sample as f64 * coeff, 0.0);
            }
            fft.process(&mut buffer);
            SpectralFrame {
                time: (i * hop_size) as f64 / sample_rate as f64,
                magnitudes: buffer[..window_size / 2].iter().map(|c| c.norm()).collect(),
                frequencies: frequencies.clone(),
            }
        })
        .collect();

    log::debug!(
        "Spectrogram: {} frames, {} bins",
        frames.len(),
        window_size / 2
    );
    frames
}
