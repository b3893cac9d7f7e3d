//! Edge tracing: gradient (or flow-based DoG) response, non-maximum
//! suppression, chain linking in raster order, pruning and simplification.

use super::chains::trace_chains;
use super::filters::{gaussian_blur, sobel, GrayImage};
use super::geometry::{douglas_peucker, fit_cubic_chain, polyline_length};
use super::{sample_line_colors, PathGeometry, PathSet, PixelBuffer, Point, Rgb, TraceContext, VectorPath};
use crate::config::EdgeConfig;
use crate::error::ProcessingError;

/// Sobel magnitude of a unit step.
const SOBEL_UNIT_STEP: f32 = 4.0;

/// Response threshold for a detail level: fine detail keeps weaker edges.
pub(super) fn edge_threshold(detail: f32) -> f32 {
    0.4 - 0.35 * detail.clamp(0.0, 1.0)
}

/// Minimum chain length for a detail level.
pub(super) fn min_chain_length(min_branch_length: f32, detail: f32) -> f32 {
    min_branch_length * (1.25 - 0.5 * detail.clamp(0.0, 1.0))
}

pub(super) fn trace(
    pixels: &PixelBuffer,
    config: &EdgeConfig,
    ctx: &TraceContext,
) -> Result<PathSet, ProcessingError> {
    let gray = GrayImage::from_pixels(pixels);
    let smoothed = gaussian_blur(&gray, 1.0);
    let (gx, gy) = sobel(&smoothed);
    let (w, h) = (gray.width, gray.height);

    let mut flow = None;
    let response = if config.etf_fdog {
        let tangents = edge_tangent_flow(&gx, &gy);
        let fdog = flow_dog(&smoothed, &tangents);
        flow = Some(tangents);
        fdog
    } else {
        gx.data
            .iter()
            .zip(&gy.data)
            .map(|(x, y)| (x * x + y * y).sqrt() / SOBEL_UNIT_STEP)
            .collect()
    };

    let mask = non_max_suppress(&response, &gx, &gy, w, h, edge_threshold(ctx.detail));
    let guide = if config.flow_tracing { flow.as_deref() } else { None };
    let chains = trace_chains(&mask, w, h, ctx.raster_order, guide);

    let min_len = min_chain_length(config.min_branch_length, ctx.detail);
    let mut out = PathSet::new(pixels.width(), pixels.height());
    for chain in chains {
        if polyline_length(&chain) < min_len {
            continue;
        }
        out.paths.push(build_line_path(
            pixels,
            &chain,
            config.douglas_peucker_epsilon,
            config.bezier_fitting,
            ctx,
        ));
    }
    Ok(out)
}

/// Simplify a traced chain and paint it. Shared with centerline tracing.
pub(super) fn build_line_path(
    pixels: &PixelBuffer,
    chain: &[Point],
    epsilon: f32,
    bezier: bool,
    ctx: &TraceContext,
) -> VectorPath {
    let closed = chain.len() > 3
        && match (chain.first(), chain.last()) {
            (Some(a), Some(b)) => a.distance(*b) <= 1.5,
            _ => false,
        };
    let simplified = douglas_peucker(chain, epsilon);

    let geometry = if bezier && simplified.len() >= 2 {
        PathGeometry::Cubic {
            start: simplified[0],
            segments: fit_cubic_chain(&simplified, closed),
            closed,
        }
    } else {
        PathGeometry::Polyline {
            points: simplified,
            closed,
        }
    };

    let mut path = VectorPath::stroked(geometry, Rgb::BLACK, ctx.stroke_width);
    if ctx.line_color.preserve_colors {
        let (stops, mean) = sample_line_colors(pixels, chain, &ctx.line_color);
        path.stroke = Some(mean);
        if stops.iter().any(|c| *c != stops[0]) {
            path.color_stops = stops;
        }
    }
    path
}

/// Structure-tensor edge tangent flow: per-pixel unit vectors along edges.
fn edge_tangent_flow(gx: &GrayImage, gy: &GrayImage) -> Vec<(f32, f32)> {
    let (w, h) = (gx.width, gx.height);
    let mut jxx = GrayImage::new(w, h);
    let mut jxy = GrayImage::new(w, h);
    let mut jyy = GrayImage::new(w, h);
    for i in 0..w * h {
        let (x, y) = (gx.data[i], gy.data[i]);
        jxx.data[i] = x * x;
        jxy.data[i] = x * y;
        jyy.data[i] = y * y;
    }
    let (jxx, jxy, jyy) = (
        gaussian_blur(&jxx, 2.0),
        gaussian_blur(&jxy, 2.0),
        gaussian_blur(&jyy, 2.0),
    );
    (0..w * h)
        .map(|i| {
            let theta = 0.5 * (2.0 * jxy.data[i]).atan2(jxx.data[i] - jyy.data[i]);
            // Gradient direction is (cos, sin); the tangent is perpendicular.
            (-theta.sin(), theta.cos())
        })
        .collect()
}

/// Flow-based difference of Gaussians: DoG across the edge, smoothed along
/// the tangent flow. Returns a non-negative response normalized to the
/// strongest edge (with a floor so flat images stay at zero).
fn flow_dog(img: &GrayImage, tangents: &[(f32, f32)]) -> Vec<f32> {
    const SIGMA_C: f32 = 1.0;
    const SIGMA_S: f32 = 1.6 * SIGMA_C;
    const RHO: f32 = 0.99;
    const SIGMA_M: f32 = 2.0;

    let gauss = |t: f32, s: f32| (-(t * t) / (2.0 * s * s)).exp() / (s * (2.0 * std::f32::consts::PI).sqrt());
    let (w, h) = (img.width, img.height);
    let reach = (3.0 * SIGMA_S).ceil() as i32;

    let mut dog = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let (tx, ty) = tangents[i];
            let (nx, ny) = (ty, -tx);
            let mut acc = 0.0;
            for t in -reach..=reach {
                let t = t as f32;
                let v = img.sample(x as f32 + nx * t, y as f32 + ny * t);
                acc += v * (gauss(t, SIGMA_C) - RHO * gauss(t, SIGMA_S));
            }
            dog[i] = acc;
        }
    }

    let steps = (3.0 * SIGMA_M).ceil() as i32;
    let mut smoothed = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = gauss(0.0, SIGMA_M) * dog[y * w + x];
            let mut weight = gauss(0.0, SIGMA_M);
            for sign in [-1.0f32, 1.0] {
                let (mut px, mut py) = (x as f32, y as f32);
                for s in 1..=steps {
                    let (cx, cy) = (px.round() as isize, py.round() as isize);
                    if cx < 0 || cy < 0 || cx >= w as isize || cy >= h as isize {
                        break;
                    }
                    let (tx, ty) = tangents[cy as usize * w + cx as usize];
                    px += sign * tx;
                    py += sign * ty;
                    let (qx, qy) = (px.round() as isize, py.round() as isize);
                    if qx < 0 || qy < 0 || qx >= w as isize || qy >= h as isize {
                        break;
                    }
                    let g = gauss(s as f32, SIGMA_M);
                    acc += g * dog[qy as usize * w + qx as usize];
                    weight += g;
                }
            }
            smoothed[y * w + x] = acc / weight;
        }
    }

    // Dark side of an edge responds negatively.
    let response: Vec<f32> = smoothed.iter().map(|v| (-v).max(0.0)).collect();
    let peak = response.iter().copied().fold(0.0f32, f32::max).max(0.02);
    response.into_iter().map(|v| v / peak).collect()
}

/// Thin a response map to one-pixel ridges along the gradient direction.
fn non_max_suppress(
    response: &[f32],
    gx: &GrayImage,
    gy: &GrayImage,
    w: usize,
    h: usize,
    threshold: f32,
) -> Vec<bool> {
    let mut mask = vec![false; w * h];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let r = response[i];
            if r <= threshold {
                continue;
            }
            let angle = gy.data[i].atan2(gx.data[i]).to_degrees().rem_euclid(180.0);
            let (dx, dy): (isize, isize) = if !(22.5..157.5).contains(&angle) {
                (1, 0)
            } else if angle < 67.5 {
                (1, 1)
            } else if angle < 112.5 {
                (0, 1)
            } else {
                (-1, 1)
            };
            let at = |ox: isize, oy: isize| -> f32 {
                let (nx, ny) = (x as isize + ox, y as isize + oy);
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    0.0
                } else {
                    response[ny as usize * w + nx as usize]
                }
            };
            // Ties resolve toward the forward neighbor so plateaus stay one pixel wide.
            if r >= at(-dx, -dy) && r > at(dx, dy) {
                mask[i] = true;
            }
        }
    }
    mask
}
