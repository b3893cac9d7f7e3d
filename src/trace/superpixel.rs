//! Region tracing: SLIC superpixels in Lab space, merged by color and size,
//! emitted as closed boundary polygons.

use std::collections::{BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::filters::rgb_to_lab;
use super::geometry::douglas_peucker;
use super::{PathGeometry, PathSet, PixelBuffer, Point, Rgb, TraceContext, VectorPath};
use crate::config::{SuperpixelConfig, SuperpixelInitPattern};
use crate::error::ProcessingError;

/// Lab distance below which adjacent regions merge, for a detail level.
fn merge_threshold(detail: f32) -> f32 {
    8.0 + (1.0 - detail.clamp(0.0, 1.0)) * 12.0
}

pub(super) fn trace(
    pixels: &PixelBuffer,
    config: &SuperpixelConfig,
    ctx: &TraceContext,
) -> Result<PathSet, ProcessingError> {
    let (w, h) = (pixels.width() as usize, pixels.height() as usize);
    let colors: Vec<Rgb> = pixels
        .as_raw()
        .chunks_exact(4)
        .map(|p| Rgb::from_rgba([p[0], p[1], p[2], p[3]]))
        .collect();
    let lab: Vec<[f32; 3]> = colors.iter().map(|c| rgb_to_lab(*c)).collect();

    let step = ((w * h) as f32 / config.num_superpixels.max(1) as f32)
        .sqrt()
        .max(1.0);
    let clusters = slic(&lab, w, h, step, config, ctx.seed);
    let (regions, map) =
        merge_regions(&clusters, &lab, &colors, w, h, step, merge_threshold(ctx.detail));
    debug!(step, regions = regions.len(), "superpixel segmentation");

    let mut out = PathSet::new(pixels.width(), pixels.height());
    for region in &regions {
        let contour = trace_boundary(&map, region.id, w, h, region.start);
        let points = if config.simplify_boundaries {
            douglas_peucker(&contour, config.boundary_epsilon)
        } else {
            contour
        };
        if points.len() < 3 {
            continue;
        }
        let geometry = PathGeometry::Polyline {
            points,
            closed: true,
        };
        let path = match (config.fill_regions, config.stroke_regions) {
            (true, true) => VectorPath {
                stroke: Some(Rgb::BLACK),
                stroke_width: ctx.stroke_width,
                ..VectorPath::filled(geometry, region.color)
            },
            (true, false) => VectorPath::filled(geometry, region.color),
            _ => VectorPath::stroked(geometry, region.color, ctx.stroke_width * 1.5),
        };
        out.paths.push(path);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// SLIC
// ---------------------------------------------------------------------------

struct Center {
    lab: [f32; 3],
    x: f32,
    y: f32,
}

fn lab_distance_sq(a: [f32; 3], b: [f32; 3]) -> f32 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

fn seed_positions(
    pattern: SuperpixelInitPattern,
    w: usize,
    h: usize,
    step: f32,
    seed: u64,
) -> Vec<(usize, usize)> {
    let (wf, hf) = (w as f32, h as f32);
    let clamp = |x: f32, y: f32| {
        (
            x.round().clamp(0.0, wf - 1.0) as usize,
            y.round().clamp(0.0, hf - 1.0) as usize,
        )
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();

    let row_step = match pattern {
        SuperpixelInitPattern::Hexagonal => step * 0.866,
        _ => step,
    };
    let mut y = row_step / 2.0;
    let mut row = 0u32;
    while y < hf {
        let offset = match pattern {
            SuperpixelInitPattern::Hexagonal if row % 2 == 1 => step,
            _ => step / 2.0,
        };
        let mut x = offset;
        while x < wf {
            let (px, py) = match pattern {
                SuperpixelInitPattern::Poisson => (
                    x + rng.gen_range(-0.35..0.35) * step,
                    y + rng.gen_range(-0.35..0.35) * step,
                ),
                _ => (x, y),
            };
            out.push(clamp(px, py));
            x += step;
        }
        y += row_step;
        row += 1;
    }
    if out.is_empty() {
        out.push((w / 2, h / 2));
    }
    out
}

/// Move a seed to the lowest-gradient pixel of its 3x3 neighborhood.
fn lowest_gradient(lab: &[[f32; 3]], w: usize, h: usize, x: usize, y: usize) -> (usize, usize) {
    let gradient = |x: usize, y: usize| {
        let at = |x: usize, y: usize| lab[y * w + x];
        let (l, r) = (at(x.saturating_sub(1), y), at((x + 1).min(w - 1), y));
        let (u, d) = (at(x, y.saturating_sub(1)), at(x, (y + 1).min(h - 1)));
        lab_distance_sq(l, r) + lab_distance_sq(u, d)
    };
    let mut best = (x, y, gradient(x, y));
    for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
        for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
            let g = gradient(nx, ny);
            if g < best.2 {
                best = (nx, ny, g);
            }
        }
    }
    (best.0, best.1)
}

/// Cluster label per pixel.
fn slic(
    lab: &[[f32; 3]],
    w: usize,
    h: usize,
    step: f32,
    config: &SuperpixelConfig,
    seed: u64,
) -> Vec<usize> {
    let mut centers: Vec<Center> = seed_positions(config.initialization_pattern, w, h, step, seed)
        .into_iter()
        .map(|(x, y)| {
            let (x, y) = lowest_gradient(lab, w, h, x, y);
            Center {
                lab: lab[y * w + x],
                x: x as f32,
                y: y as f32,
            }
        })
        .collect();

    let spatial_weight = (config.compactness / step).powi(2);
    let reach = (2.0 * step).ceil() as isize;
    let mut labels = vec![usize::MAX; w * h];
    let mut distances = vec![f32::INFINITY; w * h];

    for _ in 0..config.iterations.max(1) {
        distances.fill(f32::INFINITY);
        for (ci, c) in centers.iter().enumerate() {
            let (cx, cy) = (c.x.round() as isize, c.y.round() as isize);
            for y in (cy - reach).max(0)..=(cy + reach).min(h as isize - 1) {
                for x in (cx - reach).max(0)..=(cx + reach).min(w as isize - 1) {
                    let i = y as usize * w + x as usize;
                    let ds = (x as f32 - c.x).powi(2) + (y as f32 - c.y).powi(2);
                    let d = lab_distance_sq(lab[i], c.lab) + ds * spatial_weight;
                    if d < distances[i] {
                        distances[i] = d;
                        labels[i] = ci;
                    }
                }
            }
        }

        let mut sums = vec![[0.0f64; 6]; centers.len()];
        for (i, &label) in labels.iter().enumerate() {
            if label == usize::MAX {
                continue;
            }
            let s = &mut sums[label];
            for k in 0..3 {
                s[k] += f64::from(lab[i][k]);
            }
            s[3] += (i % w) as f64;
            s[4] += (i / w) as f64;
            s[5] += 1.0;
        }
        for (c, s) in centers.iter_mut().zip(&sums) {
            if s[5] > 0.0 {
                c.lab = [(s[0] / s[5]) as f32, (s[1] / s[5]) as f32, (s[2] / s[5]) as f32];
                c.x = (s[3] / s[5]) as f32;
                c.y = (s[4] / s[5]) as f32;
            }
        }
    }

    // Pixels no window reached go to the spatially nearest center.
    for i in 0..w * h {
        if labels[i] != usize::MAX {
            continue;
        }
        let (x, y) = ((i % w) as f32, (i / w) as f32);
        labels[i] = centers
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let da = (a.x - x).powi(2) + (a.y - y).powi(2);
                let db = (b.x - x).powi(2) + (b.y - y).powi(2);
                da.total_cmp(&db)
            })
            .map_or(0, |(ci, _)| ci);
    }
    labels
}

// ---------------------------------------------------------------------------
// Region merging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Stats {
    lab: [f64; 3],
    rgb: [f64; 3],
    area: usize,
}

impl Stats {
    fn mean_lab(&self) -> [f32; 3] {
        let n = self.area.max(1) as f64;
        [
            (self.lab[0] / n) as f32,
            (self.lab[1] / n) as f32,
            (self.lab[2] / n) as f32,
        ]
    }

    fn mean_rgb(&self) -> Rgb {
        let n = self.area.max(1) as f64;
        let c = |v: f64| (v / n).round().clamp(0.0, 255.0) as u8;
        Rgb::new(c(self.rgb[0]), c(self.rgb[1]), c(self.rgb[2]))
    }

    fn absorb(&mut self, other: &Stats) {
        for k in 0..3 {
            self.lab[k] += other.lab[k];
            self.rgb[k] += other.rgb[k];
        }
        self.area += other.area;
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Join two sets; the lower index becomes the root. Returns `(root, absorbed)`.
    fn union(&mut self, a: usize, b: usize) -> Option<(usize, usize)> {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return None;
        }
        let (root, child) = (ra.min(rb), ra.max(rb));
        self.parent[child] = root;
        Some((root, child))
    }
}

/// One final region: its label in the region map, its first pixel in
/// raster order and its mean color.
#[derive(Debug, Clone)]
struct Region {
    id: usize,
    start: usize,
    area: usize,
    color: Rgb,
}

fn merge_regions(
    clusters: &[usize],
    lab: &[[f32; 3]],
    colors: &[Rgb],
    w: usize,
    h: usize,
    step: f32,
    threshold: f32,
) -> (Vec<Region>, Vec<usize>) {
    // 1. Split clusters into 4-connected components.
    let mut component = vec![usize::MAX; w * h];
    let mut stats: Vec<Stats> = Vec::new();
    let mut queue = VecDeque::new();
    for seed in 0..w * h {
        if component[seed] != usize::MAX {
            continue;
        }
        let id = stats.len();
        let mut s = Stats::default();
        component[seed] = id;
        queue.push_back(seed);
        while let Some(i) = queue.pop_front() {
            for k in 0..3 {
                s.lab[k] += f64::from(lab[i][k]);
            }
            s.rgb[0] += f64::from(colors[i].r);
            s.rgb[1] += f64::from(colors[i].g);
            s.rgb[2] += f64::from(colors[i].b);
            s.area += 1;
            let (x, y) = (i % w, i / w);
            let neighbors = [
                (x > 0).then(|| i - 1),
                (x + 1 < w).then(|| i + 1),
                (y > 0).then(|| i - w),
                (y + 1 < h).then(|| i + w),
            ];
            for n in neighbors.into_iter().flatten() {
                if component[n] == usize::MAX && clusters[n] == clusters[seed] {
                    component[n] = id;
                    queue.push_back(n);
                }
            }
        }
        stats.push(s);
    }

    let mut adjacent = BTreeSet::new();
    for i in 0..w * h {
        let (x, y) = (i % w, i / w);
        for n in [(x + 1 < w).then(|| i + 1), (y + 1 < h).then(|| i + w)]
            .into_iter()
            .flatten()
        {
            let (a, b) = (component[i], component[n]);
            if a != b {
                adjacent.insert((a.min(b), a.max(b)));
            }
        }
    }

    // 2. Merge neighbors of similar color, then absorb fragments.
    let mut sets = DisjointSet::new(stats.len());
    let threshold_sq = threshold * threshold;
    for &(a, b) in &adjacent {
        let (ra, rb) = (sets.find(a), sets.find(b));
        if ra == rb || lab_distance_sq(stats[ra].mean_lab(), stats[rb].mean_lab()) >= threshold_sq {
            continue;
        }
        if let Some((root, child)) = sets.union(ra, rb) {
            let absorbed = std::mem::take(&mut stats[child]);
            stats[root].absorb(&absorbed);
        }
    }

    let min_area = ((step * step) / 4.0).max(4.0) as usize;
    for a in 0..stats.len() {
        let ra = sets.find(a);
        if stats[ra].area >= min_area {
            continue;
        }
        let closest = adjacent
            .iter()
            .filter_map(|&(x, y)| {
                let (rx, ry) = (sets.find(x), sets.find(y));
                match (rx == ra, ry == ra) {
                    (true, false) => Some(ry),
                    (false, true) => Some(rx),
                    _ => None,
                }
            })
            .min_by(|&x, &y| {
                let target = stats[ra].mean_lab();
                lab_distance_sq(stats[x].mean_lab(), target)
                    .total_cmp(&lab_distance_sq(stats[y].mean_lab(), target))
            });
        if let Some(neighbor) = closest {
            if let Some((root, child)) = sets.union(ra, neighbor) {
                let absorbed = std::mem::take(&mut stats[child]);
                stats[root].absorb(&absorbed);
            }
        }
    }

    // 3. Collect final regions, largest first so enclosed regions paint on top.
    let mut map = vec![0usize; w * h];
    let mut regions: Vec<Region> = Vec::new();
    let mut seen = vec![false; stats.len()];
    for i in 0..w * h {
        let root = sets.find(component[i]);
        map[i] = root;
        if !seen[root] {
            seen[root] = true;
            regions.push(Region {
                id: root,
                start: i,
                area: stats[root].area,
                color: stats[root].mean_rgb(),
            });
        }
    }
    regions.sort_by(|a, b| b.area.cmp(&a.area).then(a.start.cmp(&b.start)));
    (regions, map)
}

// ---------------------------------------------------------------------------
// Boundary tracing
// ---------------------------------------------------------------------------

/// Clockwise (in image coordinates) starting west.
const RING: [(isize, isize); 8] = [
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
];

/// Moore-neighbor contour of region `id` in `map`. `start` must be the
/// region's first pixel in raster order.
fn trace_boundary(map: &[usize], id: usize, w: usize, h: usize, start: usize) -> Vec<Point> {
    let inside = |x: isize, y: isize| {
        x >= 0 && y >= 0 && x < w as isize && y < h as isize && map[y as usize * w + x as usize] == id
    };
    let to_point = |i: usize| Point::new((i % w) as f32, (i / w) as f32);

    let mut boundary = vec![start];
    let mut current = start;
    let mut backtrack = 0usize;
    let limit = 4 * map.len() + 8;

    while boundary.len() < limit {
        let (cx, cy) = ((current % w) as isize, (current / w) as isize);
        let found = (1..=8).map(|k| (backtrack + k) % 8).find(|&d| {
            let (dx, dy) = RING[d];
            inside(cx + dx, cy + dy)
        });
        let Some(d) = found else {
            break;
        };
        let (nx, ny) = (cx + RING[d].0, cy + RING[d].1);
        let next = ny as usize * w + nx as usize;
        if current == start && boundary.len() > 1 && boundary.get(1) == Some(&next) {
            break;
        }

        // The last outside position examined becomes the new backtrack.
        let (px, py) = (cx + RING[(d + 7) % 8].0, cy + RING[(d + 7) % 8].1);
        backtrack = RING
            .iter()
            .position(|&o| o == (px - nx, py - ny))
            .unwrap_or(0);
        boundary.push(next);
        current = next;
    }

    if boundary.len() > 1 && boundary.last() == Some(&start) {
        boundary.pop();
    }
    boundary.into_iter().map(to_point).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tone() -> PixelBuffer {
        PixelBuffer::from_fn(40, 40, |x, _| {
            if x < 20 {
                [250, 250, 250, 255]
            } else {
                [40, 80, 160, 255]
            }
        })
    }

    #[test]
    fn test_flat_image_is_one_region() {
        let pixels = PixelBuffer::solid(30, 20, [120, 40, 200, 255]);
        let paths = trace(&pixels, &SuperpixelConfig::default(), &TraceContext::default()).unwrap();
        assert_eq!(paths.len(), 1);
        let b = paths.paths[0].bounds();
        assert_eq!((b.min.x, b.min.y, b.max.x, b.max.y), (0.0, 0.0, 29.0, 19.0));
        assert_eq!(paths.paths[0].stroke, Some(Rgb::new(120, 40, 200)));
    }

    #[test]
    fn test_two_tones_become_two_colored_regions() {
        let config = SuperpixelConfig {
            fill_regions: true,
            stroke_regions: false,
            ..SuperpixelConfig::default()
        };
        let paths = trace(&two_tone(), &config, &TraceContext::default()).unwrap();
        assert!(paths.len() >= 2);
        let fills: Vec<Rgb> = paths.paths.iter().filter_map(|p| p.fill).collect();
        assert!(fills.iter().any(|c| c.distance(Rgb::new(250, 250, 250)) < 0.1));
        assert!(fills.iter().any(|c| c.distance(Rgb::new(40, 80, 160)) < 0.1));
        assert!(paths.paths.iter().all(|p| p.stroke.is_none()));
    }

    #[test]
    fn test_fill_and_stroke_draws_black_borders() {
        let config = SuperpixelConfig {
            fill_regions: true,
            stroke_regions: true,
            ..SuperpixelConfig::default()
        };
        let paths = trace(&two_tone(), &config, &TraceContext::default()).unwrap();
        assert!(!paths.is_empty());
        for path in &paths.paths {
            assert!(path.fill.is_some());
            assert_eq!(path.stroke, Some(Rgb::BLACK));
        }
    }

    #[test]
    fn test_stroke_only_widens_outline() {
        let ctx = TraceContext {
            stroke_width: 2.0,
            ..TraceContext::default()
        };
        let paths = trace(&two_tone(), &SuperpixelConfig::default(), &ctx).unwrap();
        assert!(paths.paths.iter().all(|p| p.fill.is_none() && p.stroke_width == 3.0));
    }

    #[test]
    fn test_boundary_of_square() {
        let (w, h) = (5, 5);
        let map: Vec<usize> = (0..w * h)
            .map(|i| usize::from((1..4).contains(&(i % w)) && (1..4).contains(&(i / w))))
            .collect();
        let contour = trace_boundary(&map, 1, w, h, w + 1);
        assert_eq!(contour.len(), 8);
        assert_eq!(contour[0], Point::new(1.0, 1.0));
        assert_eq!(contour[1], Point::new(2.0, 1.0));
        assert!(!contour.contains(&Point::new(2.0, 2.0)));
    }

    #[test]
    fn test_single_pixel_boundary() {
        let map = vec![0, 0, 0, 0, 7, 0, 0, 0, 0];
        assert_eq!(trace_boundary(&map, 7, 3, 3, 4), vec![Point::new(1.0, 1.0)]);
    }

    #[test]
    fn test_seed_patterns() {
        let square = seed_positions(SuperpixelInitPattern::Square, 40, 40, 10.0, 1);
        assert_eq!(square.len(), 16);
        assert_eq!(square[0], (5, 5));
        let hex = seed_positions(SuperpixelInitPattern::Hexagonal, 40, 40, 10.0, 1);
        assert!(hex.len() > 12);
        let a = seed_positions(SuperpixelInitPattern::Poisson, 40, 40, 10.0, 1);
        let b = seed_positions(SuperpixelInitPattern::Poisson, 40, 40, 10.0, 1);
        assert_eq!(a, b);
        assert!(a.iter().all(|&(x, y)| x < 40 && y < 40));
    }
}
