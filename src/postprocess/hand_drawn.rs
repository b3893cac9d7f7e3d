//! Seeded hand-drawn stroke effects: tremor, variable weight, tapered ends
//! and overlapping second strokes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::HandDrawnParams;
use crate::trace::{PathGeometry, PathSet, Point, VectorPath};

/// Pixel displacement at `tremor == 1.0`.
const TREMOR_SCALE: f32 = 2.0;

const MIN_STROKE_WIDTH: f32 = 0.1;

/// Summary of what the effect changed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HandDrawnOutcome {
    pub strokes_perturbed: usize,
    pub strokes_added: usize,
}

fn jitter(rng: &mut StdRng, p: Point, amplitude: f32) -> Point {
    if amplitude <= 0.0 {
        return p;
    }
    Point::new(
        p.x + rng.gen_range(-1.0f32..=1.0) * amplitude,
        p.y + rng.gen_range(-1.0f32..=1.0) * amplitude,
    )
}

fn jitter_geometry(rng: &mut StdRng, geometry: &PathGeometry, amplitude: f32) -> PathGeometry {
    match geometry {
        PathGeometry::Polyline { points, closed } => PathGeometry::Polyline {
            points: points.iter().map(|p| jitter(rng, *p, amplitude)).collect(),
            closed: *closed,
        },
        PathGeometry::Cubic {
            start,
            segments,
            closed,
        } => PathGeometry::Cubic {
            start: jitter(rng, *start, amplitude),
            segments: segments
                .iter()
                .map(|s| {
                    let mut s = *s;
                    s.c1 = jitter(rng, s.c1, amplitude);
                    s.c2 = jitter(rng, s.c2, amplitude);
                    s.end = jitter(rng, s.end, amplitude);
                    s
                })
                .collect(),
            closed: *closed,
        },
        dot @ PathGeometry::Dot { .. } => dot.clone(),
    }
}

/// Split an open polyline into a thinner head, a body and a thinner tail.
fn taper(path: VectorPath, tapering: f32) -> Vec<VectorPath> {
    let points = match &path.geometry {
        PathGeometry::Polyline {
            points,
            closed: false,
        } if tapering > 0.0 && points.len() >= 4 => points.clone(),
        _ => return vec![path],
    };
    let n = points.len();
    let end_width = (path.stroke_width * (1.0 - tapering)).max(MIN_STROKE_WIDTH);
    let piece = |pts: &[Point], width: f32| VectorPath {
        geometry: PathGeometry::Polyline {
            points: pts.to_vec(),
            closed: false,
        },
        stroke_width: width,
        color_stops: Vec::new(),
        ..path.clone()
    };
    vec![
        piece(&points[..2], end_width),
        VectorPath {
            geometry: PathGeometry::Polyline {
                points: points[1..n - 1].to_vec(),
                closed: false,
            },
            ..path.clone()
        },
        piece(&points[n - 2..], end_width),
    ]
}

/// Apply the effect to every stroked, non-dot path. Deterministic for a seed.
pub fn apply(paths: &mut PathSet, params: &HandDrawnParams, seed: u64) -> HandDrawnOutcome {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut outcome = HandDrawnOutcome::default();
    let amplitude = params.tremor * TREMOR_SCALE;

    let mut out = Vec::with_capacity(paths.len());
    for path in std::mem::take(&mut paths.paths) {
        if path.stroke.is_none() || path.is_dot() {
            out.push(path);
            continue;
        }
        outcome.strokes_perturbed += 1;

        let weight = 1.0 + rng.gen_range(-1.0f32..=1.0) * params.variable_weights * params.pressure_variation.max(0.5);
        let stroke_width = (path.stroke_width * params.base_width_multiplier * weight).max(MIN_STROKE_WIDTH);
        let perturbed = VectorPath {
            geometry: jitter_geometry(&mut rng, &path.geometry, amplitude),
            stroke_width,
            ..path
        };

        let overdraw = params.multi_pass_intensity > 0.0 && rng.gen::<f32>() < params.multi_pass_intensity;
        let second = overdraw.then(|| VectorPath {
            geometry: jitter_geometry(&mut rng, &perturbed.geometry, amplitude + 0.5),
            stroke_width: (perturbed.stroke_width * 0.8).max(MIN_STROKE_WIDTH),
            opacity: perturbed.opacity * 0.6,
            fill: None,
            ..perturbed.clone()
        });

        out.extend(taper(perturbed, params.tapering));
        if let Some(second) = second {
            outcome.strokes_added += 1;
            out.push(second);
        }
    }
    paths.paths = out;
    outcome
}
