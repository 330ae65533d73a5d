use std::path::Path;

use image::{ImageResult, Rgb, RgbImage};

use crate::config::FREQUENCY_BANDS;
use crate::peaks::{Peak, SpectralFrame};

const BAND_COLORS: [Rgb<u8>; 6] = [
    Rgb([0, 0, 255]),   // 0-200 Hz
    Rgb([0, 255, 255]), // 200-400 Hz
    Rgb([0, 255, 0]),   // 400-800 Hz
    Rgb([255, 255, 0]), // 800-1600 Hz
    Rgb([255, 165, 0]), // 1600-3200 Hz
    Rgb([255, 0, 0]),   // 3200-6400 Hz
];
const DEFAULT_PEAK_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

fn band_color(frequency: f64) -> Rgb<u8> {
    FREQUENCY_BANDS
        .iter()
        .position(|&(lo, hi)| frequency >= lo && frequency < hi)
        .map_or(DEFAULT_PEAK_COLOR, |band| BAND_COLORS[band])
}

/// Log-magnitude grayscale spectrogram (time left to right, low frequencies
/// at the bottom) with peaks drawn in their band colour.
/// Returns `None` when there is nothing to draw.
pub fn render_peaks(frames: &[SpectralFrame], peaks: &[Peak]) -> Option<RgbImage> {
    let height = frames.first()?.magnitudes.len();
    if height == 0 {
        return None;
    }
    let width = frames.len();

    let mut min_log_mag = f64::MAX;
    let mut max_log_mag = f64::MIN;
    for magnitude in frames.iter().flat_map(|f| f.magnitudes.iter()) {
        if *magnitude < 1e-10 {
            continue;
        }
        let log_mag = (magnitude + 1e-6).log10();
        min_log_mag = min_log_mag.min(log_mag);
        max_log_mag = max_log_mag.max(log_mag);
    }
    let log_mag_range = if max_log_mag - min_log_mag < 1e-6 {
        1.0
    } else {
        max_log_mag - min_log_mag
    };

    let mut imgbuf = RgbImage::new(width as u32, height as u32);
    for (t, frame) in frames.iter().enumerate() {
        for (f, &magnitude) in frame.magnitudes.iter().take(height).enumerate() {
            let scaled = ((magnitude + 1e-6).log10() - min_log_mag) / log_mag_range;
            let intensity = (scaled.clamp(0.0, 1.0) * 255.0).round() as u8;
            imgbuf.put_pixel(
                t as u32,
                (height - 1 - f) as u32,
                Rgb([intensity, intensity, intensity]),
            );
        }
    }

    let first_time = frames[0].time;
    let frame_step = if width > 1 {
        (frames[width - 1].time - first_time) / (width - 1) as f64
    } else {
        1.0
    };
    let frequencies = &frames[0].frequencies;

    for peak in peaks {
        let x = ((peak.time - first_time) / frame_step.max(1e-9)).round();
        let y = frequencies.partition_point(|&f| f < peak.frequency);
        if x < 0.0 || x as usize >= width || y >= height {
            continue;
        }
        imgbuf.put_pixel(x as u32, (height - 1 - y) as u32, band_color(peak.frequency));
    }

    Some(imgbuf)
}

/// Render and save as an image file; the format follows the extension.
pub fn save_peak_image(frames: &[SpectralFrame], peaks: &[Peak], path: &Path) -> ImageResult<bool> {
    match render_peaks(frames, peaks) {
        Some(img) => {
            img.save(path)?;
            log::info!("Spectrogram with peaks saved to {}", path.display());
            Ok(true)
        }
        None => {
            log::warn!("Spectrogram is empty, nothing to draw");
            Ok(false)
        }
    }
}
