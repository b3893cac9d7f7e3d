//! Post-processing of merged paths.
//!
//! Steps run in a fixed order, each a no-op when disabled:
//! 1. background removal
//! 2. color-fidelity clamp (line-color mode only)
//! 3. hand-drawn perturbation

pub mod background;
pub mod hand_drawn;

use serde::Serialize;
use tracing::debug;

use crate::config::{LineColorConfig, VectorizationConfig};
use crate::trace::{PathSet, PixelBuffer, Rgb};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostProcessReport {
    pub background_paths_removed: usize,
    pub color_stops_clamped: usize,
    pub hand_drawn_strokes: usize,
    pub hand_drawn_overdraws: usize,
}

pub fn apply(
    mut paths: PathSet,
    pixels: &PixelBuffer,
    config: &VectorizationConfig,
) -> (PathSet, PostProcessReport) {
    let mut report = PostProcessReport::default();

    if config.background_removal.enabled {
        report.background_paths_removed =
            background::remove_background(&mut paths, pixels, &config.background_removal);
    }

    if config.line_color.preserve_colors {
        report.color_stops_clamped = clamp_colors(&mut paths, &config.line_color);
    }

    if let Some(params) = config.hand_drawn.resolve() {
        let outcome = hand_drawn::apply(&mut paths, &params, config.seed);
        report.hand_drawn_strokes = outcome.strokes_perturbed;
        report.hand_drawn_overdraws = outcome.strokes_added;
    }

    debug!(?report, "post-processing complete");
    (paths, report)
}

/// Collapse runs of similar colors, then keep at most `max_colors_per_path`
/// evenly spaced stops. A path left with one stop becomes flat-colored.
/// Returns the number of stops removed.
pub fn clamp_colors(paths: &mut PathSet, config: &LineColorConfig) -> usize {
    let max = config.max_colors_per_path.max(1) as usize;
    let mut removed = 0;
    for path in &mut paths.paths {
        if path.color_stops.is_empty() {
            continue;
        }
        let before = path.color_stops.len();

        let mut stops: Vec<Rgb> = Vec::with_capacity(before);
        for c in path.color_stops.drain(..) {
            match stops.last() {
                Some(prev) if prev.distance(c) < config.color_tolerance => {}
                _ => stops.push(c),
            }
        }
        if stops.len() > max {
            stops = if max == 1 {
                vec![Rgb::mean(stops.iter().map(|c| (*c, 1.0))).unwrap_or(Rgb::BLACK)]
            } else {
                (0..max)
                    .map(|i| stops[i * (stops.len() - 1) / (max - 1)])
                    .collect()
            };
        }

        removed += before - stops.len();
        if stops.len() == 1 {
            path.stroke = Some(stops[0]);
        } else {
            path.color_stops = stops;
        }
    }
    removed
}
