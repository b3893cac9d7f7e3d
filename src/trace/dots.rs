//! Stippling: dots on a lattice, sized by tone and local gradient.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::filters::{gaussian_blur, sobel, GrayImage};
use super::{PathGeometry, PathSet, PixelBuffer, Point, Rgb, TraceContext, VectorPath};
use crate::config::{DotsConfig, GridPattern};
use crate::error::ProcessingError;

/// Minimum tone difference from the background for a dot at a detail level.
fn tone_threshold(detail: f32) -> f32 {
    0.5 - 0.45 * detail.clamp(0.0, 1.0)
}

/// Distance between lattice points: dense configurations pack dots tightly.
fn lattice_spacing(config: &DotsConfig) -> f32 {
    (config.max_radius * 2.0 + (1.0 - config.density.clamp(0.0, 1.0)) * config.max_radius * 6.0)
        .max(1.0)
}

fn lattice(pattern: GridPattern, width: f32, height: f32, spacing: f32, seed: u64) -> Vec<Point> {
    let mut points = Vec::new();
    match pattern {
        GridPattern::Grid => {
            let mut y = spacing / 2.0;
            while y < height {
                let mut x = spacing / 2.0;
                while x < width {
                    points.push(Point::new(x, y));
                    x += spacing;
                }
                y += spacing;
            }
        }
        GridPattern::Hexagonal => {
            let row_step = spacing * 0.866;
            let mut y = spacing / 2.0;
            let mut row = 0u32;
            while y < height {
                let mut x = if row % 2 == 0 { spacing / 2.0 } else { spacing };
                while x < width {
                    points.push(Point::new(x, y));
                    x += spacing;
                }
                y += row_step;
                row += 1;
            }
        }
        GridPattern::Random => {
            let count = ((width * height) / (spacing * spacing)).round().max(1.0) as usize;
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..count {
                points.push(Point::new(
                    rng.gen_range(0.0..width),
                    rng.gen_range(0.0..height),
                ));
            }
        }
    }
    points
}

/// Median luminance of the image border.
fn border_tone(gray: &GrayImage) -> f32 {
    let (w, h) = (gray.width, gray.height);
    let mut border = Vec::with_capacity(2 * (w + h));
    for x in 0..w {
        border.push(gray.get(x, 0));
        border.push(gray.get(x, h - 1));
    }
    for y in 0..h {
        border.push(gray.get(0, y));
        border.push(gray.get(w - 1, y));
    }
    border.sort_by(f32::total_cmp);
    border[border.len() / 2]
}

pub(super) fn trace(
    pixels: &PixelBuffer,
    config: &DotsConfig,
    ctx: &TraceContext,
) -> Result<PathSet, ProcessingError> {
    let smoothed = gaussian_blur(&GrayImage::from_pixels(pixels), 1.0);
    let (gx, gy) = sobel(&smoothed);
    let background = border_tone(&smoothed);
    let threshold = tone_threshold(ctx.detail);
    let spacing = lattice_spacing(config);

    let mut out = PathSet::new(pixels.width(), pixels.height());
    let positions = lattice(
        config.grid_pattern,
        pixels.width() as f32,
        pixels.height() as f32,
        spacing,
        ctx.seed,
    );
    for center in positions {
        let tone = (background - smoothed.sample(center.x, center.y)).abs();
        let (ix, iy) = (center.x as isize, center.y as isize);
        let gradient = (gx.get_clamped(ix, iy).powi(2) + gy.get_clamped(ix, iy).powi(2)).sqrt() / 4.0;
        let strength = tone.max(gradient * 0.5).clamp(0.0, 1.0);
        if strength < threshold {
            continue;
        }

        let radius = if config.adaptive_sizing {
            config.min_radius + (config.max_radius - config.min_radius) * strength
        } else {
            (config.min_radius + config.max_radius) / 2.0
        };
        let color = if config.preserve_colors {
            pixels.color_at(center.x, center.y)
        } else {
            Rgb::BLACK
        };
        out.paths.push(VectorPath::filled(
            PathGeometry::Dot {
                center,
                radius,
                shape: config.shape,
            },
            color,
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DotShape;

    fn gradient_image() -> PixelBuffer {
        PixelBuffer::from_fn(80, 40, |x, _| {
            let v = 255 - (x * 3).min(255) as u8;
            [v, v, v, 255]
        })
    }

    #[test]
    fn test_flat_image_has_no_dots() {
        let pixels = PixelBuffer::solid(50, 50, [30, 30, 30, 255]);
        let paths = trace(&pixels, &DotsConfig::default(), &TraceContext::default()).unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn test_dots_follow_dark_regions() {
        let pixels = PixelBuffer::from_fn(80, 40, |x, _| {
            if x < 60 { [255, 255, 255, 255] } else { [0, 0, 0, 255] }
        });
        let config = DotsConfig {
            density: 0.8,
            ..DotsConfig::default()
        };
        let paths = trace(&pixels, &config, &TraceContext::default()).unwrap();
        assert!(!paths.is_empty());
        for path in &paths.paths {
            if let PathGeometry::Dot { radius, center, .. } = path.geometry {
                assert!(radius >= config.min_radius && radius <= config.max_radius);
                assert!(center.x > 50.0, "dot on background at {center:?}");
            }
        }
    }

    #[test]
    fn test_patterns_and_shapes() {
        for pattern in [GridPattern::Grid, GridPattern::Hexagonal, GridPattern::Random] {
            let config = DotsConfig {
                density: 1.0,
                shape: DotShape::Diamond,
                grid_pattern: pattern,
                ..DotsConfig::default()
            };
            let ctx = TraceContext {
                detail: 1.0,
                ..TraceContext::default()
            };
            let paths = trace(&gradient_image(), &config, &ctx).unwrap();
            assert!(!paths.is_empty(), "{pattern:?}");
            assert!(paths.paths.iter().all(|p| matches!(
                p.geometry,
                PathGeometry::Dot { shape: DotShape::Diamond, .. }
            )));
        }
    }

    #[test]
    fn test_random_lattice_honors_seed() {
        let a = lattice(GridPattern::Random, 100.0, 100.0, 10.0, 7);
        let b = lattice(GridPattern::Random, 100.0, 100.0, 10.0, 7);
        let c = lattice(GridPattern::Random, 100.0, 100.0, 10.0, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 100);
    }

    #[test]
    fn test_preserve_colors() {
        let pixels = PixelBuffer::from_fn(40, 40, |x, _| {
            if x < 20 { [255, 255, 255, 255] } else { [200, 0, 0, 255] }
        });
        let config = DotsConfig {
            density: 1.0,
            preserve_colors: true,
            ..DotsConfig::default()
        };
        let paths = trace(&pixels, &config, &TraceContext::default()).unwrap();
        assert!(paths
            .paths
            .iter()
            .any(|p| p.fill == Some(Rgb::new(200, 0, 0))));
    }
}
