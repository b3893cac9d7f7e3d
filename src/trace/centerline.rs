//! Centerline tracing: binarize dark strokes, thin them to a one-pixel
//! skeleton and trace the skeleton.

use super::chains::trace_chains;
use super::edge::{build_line_path, min_chain_length};
use super::filters::{gaussian_blur, otsu_threshold, GrayImage, IntegralImage};
use super::geometry::polyline_length;
use super::{PathSet, PixelBuffer, TraceContext};
use crate::config::CenterlineConfig;
use crate::error::ProcessingError;

/// Dynamic range of the standard deviation for luminance in `0..=1`.
const SAUVOLA_R: f32 = 0.5;

/// Images whose luminance spread is below this have no strokes to trace.
const MIN_CONTRAST: f32 = 0.05;

pub(super) fn trace(
    pixels: &PixelBuffer,
    config: &CenterlineConfig,
    ctx: &TraceContext,
) -> Result<PathSet, ProcessingError> {
    let gray = gaussian_blur(&GrayImage::from_pixels(pixels), 0.8);
    let (w, h) = (gray.width, gray.height);
    let mut out = PathSet::new(pixels.width(), pixels.height());

    let (lo, hi) = gray.min_max();
    if hi - lo < MIN_CONTRAST {
        return Ok(out);
    }

    let mut mask = if config.adaptive_threshold {
        sauvola(&gray, config.window_size | 1, config.sensitivity_k)
    } else {
        let t = otsu_threshold(&gray.data);
        gray.data.iter().map(|v| *v < t).collect()
    };
    zhang_suen_thin(&mut mask, w, h);

    let min_len = min_chain_length(config.min_branch_length, ctx.detail);
    for chain in trace_chains(&mask, w, h, ctx.raster_order, None) {
        if polyline_length(&chain) < min_len {
            continue;
        }
        out.paths.push(build_line_path(
            pixels,
            &chain,
            config.douglas_peucker_epsilon,
            false,
            ctx,
        ));
    }
    Ok(out)
}

/// Sauvola local threshold: foreground where the pixel is darker than
/// `mean * (1 + k * (std / R - 1))` over the window.
fn sauvola(gray: &GrayImage, window: u32, k: f32) -> Vec<bool> {
    let (w, h) = (gray.width, gray.height);
    let half = (window / 2) as usize;
    let integral = IntegralImage::new(gray);
    let mut mask = vec![false; w * h];
    for y in 0..h {
        let (y0, y1) = (y.saturating_sub(half), (y + half).min(h - 1));
        for x in 0..w {
            let (x0, x1) = (x.saturating_sub(half), (x + half).min(w - 1));
            let (mean, std) = integral.window_stats(x0, y0, x1, y1);
            let threshold = mean * (1.0 + k * (std / SAUVOLA_R - 1.0));
            mask[y * w + x] = gray.get(x, y) < threshold;
        }
    }
    mask
}

/// Zhang–Suen thinning, in place.
fn zhang_suen_thin(mask: &mut [bool], w: usize, h: usize) {
    if w < 3 || h < 3 {
        return;
    }
    let mut to_clear = Vec::new();
    loop {
        let mut changed = false;
        for step in 0..2 {
            to_clear.clear();
            for y in 1..h - 1 {
                for x in 1..w - 1 {
                    if !mask[y * w + x] {
                        continue;
                    }
                    let at = |dx: isize, dy: isize| {
                        mask[(y as isize + dy) as usize * w + (x as isize + dx) as usize] as u8
                    };
                    // P2..P9, clockwise from north.
                    let p = [
                        at(0, -1),
                        at(1, -1),
                        at(1, 0),
                        at(1, 1),
                        at(0, 1),
                        at(-1, 1),
                        at(-1, 0),
                        at(-1, -1),
                    ];
                    let neighbors: u8 = p.iter().sum();
                    if !(2..=6).contains(&neighbors) {
                        continue;
                    }
                    let transitions = (0..8).filter(|&i| p[i] == 0 && p[(i + 1) % 8] == 1).count();
                    if transitions != 1 {
                        continue;
                    }
                    let (p2, p4, p6, p8) = (p[0], p[2], p[4], p[6]);
                    let ok = if step == 0 {
                        p2 * p4 * p6 == 0 && p4 * p6 * p8 == 0
                    } else {
                        p2 * p4 * p8 == 0 && p2 * p6 * p8 == 0
                    };
                    if ok {
                        to_clear.push(y * w + x);
                    }
                }
            }
            for &i in &to_clear {
                mask[i] = false;
            }
            changed |= !to_clear.is_empty();
        }
        if !changed {
            break;
        }
    }
}
