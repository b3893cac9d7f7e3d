//! Background masking: classify source pixels as background and drop paths
//! that lie on it.

use tracing::debug;

use crate::config::{BackgroundRemovalAlgorithm, BackgroundRemovalConfig};
use crate::trace::filters::{otsu_threshold, GrayImage, IntegralImage};
use crate::trace::{PathSet, PixelBuffer, VectorPath};

/// Luminance spread (8-bit std dev) above which `Auto` picks the adaptive
/// threshold.
const AUTO_ADAPTIVE_STD_DEV: f32 = 45.0;

/// Higher strength lowers the threshold: `0.7..=1.0` of the base value.
fn strength_factor(strength: f32) -> f32 {
    0.7 + (1.0 - strength.clamp(0.0, 1.0)) * 0.3
}

/// Resolve `Auto` from the image's luminance spread.
pub fn resolve_algorithm(gray: &GrayImage, requested: BackgroundRemovalAlgorithm) -> BackgroundRemovalAlgorithm {
    if requested != BackgroundRemovalAlgorithm::Auto {
        return requested;
    }
    let n = gray.data.len().max(1) as f32;
    let mean = gray.data.iter().sum::<f32>() / n;
    let variance = gray.data.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    if variance.sqrt() * 255.0 > AUTO_ADAPTIVE_STD_DEV {
        BackgroundRemovalAlgorithm::Adaptive
    } else {
        BackgroundRemovalAlgorithm::Otsu
    }
}

/// Local windows flatter than this (std dev in `0..=1`) use the global
/// threshold instead of their own mean.
const MIN_LOCAL_CONTRAST: f32 = 0.05;

/// Midpoint between the mean of the values below `t` and the mean of those at
/// or above it. Falls back to `t` when either class is empty.
fn class_midpoint(values: &[f32], t: f32) -> f32 {
    let (mut lo, mut lo_n, mut hi, mut hi_n) = (0.0f32, 0usize, 0.0f32, 0usize);
    for v in values {
        if *v < t {
            lo += v;
            lo_n += 1;
        } else {
            hi += v;
            hi_n += 1;
        }
    }
    if lo_n == 0 || hi_n == 0 {
        return t;
    }
    (lo / lo_n as f32 + hi / hi_n as f32) / 2.0
}

/// Odd window size from the image size: about 5% of the shorter side,
/// widened for gentler strengths.
fn adaptive_window(width: usize, height: usize, strength: f32) -> usize {
    let base = (width.min(height) / 20).clamp(15, 51) as f32;
    let size = (base * (1.0 + (1.0 - strength.clamp(0.0, 1.0)) * 0.5)) as usize;
    size | 1
}

/// Per-pixel background mask.
///
/// Pixels are split into a light and a dark class; the class holding most of
/// the image border is the background.
pub fn background_mask(pixels: &PixelBuffer, config: &BackgroundRemovalConfig) -> Vec<bool> {
    let gray = GrayImage::from_pixels(pixels);
    let (w, h) = (gray.width, gray.height);
    let factor = strength_factor(config.strength);
    let global = class_midpoint(&gray.data, otsu_threshold(&gray.data)) * factor;

    let light: Vec<bool> = match (config.threshold, resolve_algorithm(&gray, config.algorithm)) {
        (Some(t), _) => {
            let t = f32::from(t) / 255.0;
            gray.data.iter().map(|v| *v >= t).collect()
        }
        (None, BackgroundRemovalAlgorithm::Adaptive) => {
            let half = adaptive_window(w, h, config.strength) / 2;
            let integral = IntegralImage::new(&gray);
            (0..w * h)
                .map(|i| {
                    let (x, y) = (i % w, i / w);
                    let (mean, std) = integral.window_stats(
                        x.saturating_sub(half),
                        y.saturating_sub(half),
                        (x + half).min(w - 1),
                        (y + half).min(h - 1),
                    );
                    let t = if std < MIN_LOCAL_CONTRAST { global } else { mean * factor };
                    gray.data[i] >= t
                })
                .collect()
        }
        (None, _) => gray.data.iter().map(|v| *v >= global).collect(),
    };

    let border: Vec<usize> = (0..w)
        .flat_map(|x| [x, (h - 1) * w + x])
        .chain((0..h).flat_map(|y| [y * w, y * w + w - 1]))
        .collect();
    let light_border = border.iter().filter(|&&i| light[i]).count();
    let background_is_light = light_border * 2 >= border.len();
    light.into_iter().map(|l| l == background_is_light).collect()
}

/// Fraction of a path's samples that fall on background pixels.
fn background_fraction(path: &VectorPath, mask: &[bool], width: u32, height: u32) -> f32 {
    let samples = path.sample_points();
    if samples.is_empty() {
        return 0.0;
    }
    let hits = samples
        .iter()
        .filter(|p| {
            let x = (p.x.round().max(0.0) as u32).min(width - 1);
            let y = (p.y.round().max(0.0) as u32).min(height - 1);
            mask[y as usize * width as usize + x as usize]
        })
        .count();
    hits as f32 / samples.len() as f32
}

/// Drop paths lying on the background. Stronger settings drop paths with a
/// smaller background share. Returns the number removed.
pub fn remove_background(paths: &mut PathSet, pixels: &PixelBuffer, config: &BackgroundRemovalConfig) -> usize {
    let mask = background_mask(pixels, config);
    let cutoff = 0.9 - 0.4 * config.strength.clamp(0.0, 1.0);
    let before = paths.len();
    let (w, h) = (pixels.width(), pixels.height());
    paths
        .paths
        .retain(|path| background_fraction(path, &mask, w, h) < cutoff);
    let removed = before - paths.len();
    debug!(removed, cutoff, "background paths removed");
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{PathGeometry, Point, Rgb};

    fn dark_square_on_white() -> PixelBuffer {
        PixelBuffer::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                [10, 10, 10, 255]
            } else {
                [245, 245, 245, 255]
            }
        })
    }

    fn polygon(points: &[(f32, f32)]) -> VectorPath {
        VectorPath::filled(
            PathGeometry::Polyline {
                points: points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
                closed: true,
            },
            Rgb::BLACK,
        )
    }

    #[test]
    fn test_border_class_is_background() {
        for algorithm in [
            BackgroundRemovalAlgorithm::Otsu,
            BackgroundRemovalAlgorithm::Adaptive,
            BackgroundRemovalAlgorithm::Auto,
        ] {
            let config = BackgroundRemovalConfig {
                enabled: true,
                algorithm,
                ..BackgroundRemovalConfig::default()
            };
            let mask = background_mask(&dark_square_on_white(), &config);
            assert!(mask[0], "{algorithm:?}");
            assert!(!mask[20 * 40 + 20], "{algorithm:?}");
        }
    }

    #[test]
    fn test_auto_picks_by_spread() {
        let flat = GrayImage::from_pixels(&PixelBuffer::solid(10, 10, [128, 128, 128, 255]));
        assert_eq!(
            resolve_algorithm(&flat, BackgroundRemovalAlgorithm::Auto),
            BackgroundRemovalAlgorithm::Otsu
        );
        let contrasty = GrayImage::from_pixels(&dark_square_on_white());
        assert_eq!(
            resolve_algorithm(&contrasty, BackgroundRemovalAlgorithm::Auto),
            BackgroundRemovalAlgorithm::Adaptive
        );
    }

    #[test]
    fn test_paths_on_background_removed() {
        let mut paths = PathSet {
            width: 40,
            height: 40,
            paths: vec![
                polygon(&[(0.0, 0.0), (39.0, 0.0), (39.0, 39.0), (0.0, 39.0)]),
                polygon(&[(12.0, 12.0), (27.0, 12.0), (27.0, 27.0), (12.0, 27.0)]),
            ],
        };
        let config = BackgroundRemovalConfig {
            enabled: true,
            ..BackgroundRemovalConfig::default()
        };
        let removed = remove_background(&mut paths, &dark_square_on_white(), &config);
        assert_eq!(removed, 1);
        assert_eq!(paths.paths[0].bounds().min, Point::new(12.0, 12.0));
    }

    #[test]
    fn test_strength_lowers_threshold() {
        assert!(strength_factor(1.0) < strength_factor(0.0));
        assert!((class_midpoint(&[0.0, 0.0, 1.0, 1.0], 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(class_midpoint(&[0.3, 0.3], 0.1), 0.1);
        assert_eq!(adaptive_window(100, 100, 1.0) % 2, 1);
    }
}
