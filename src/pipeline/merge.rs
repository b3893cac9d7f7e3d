//! Overlap-aware union of path sets.
//!
//! Kept paths are bucketed into a uniform grid, so a candidate is only
//! compared with paths whose bounds share a cell with its own.

use crate::trace::geometry::mean_nearest_distance;
use crate::trace::{PathGeometry, PathSet, Point, Rect, VectorPath};

/// Spacing of resampled points used for overlap tests.
const SAMPLE_SPACING: f32 = 2.0;

/// Smallest grid cell, in pixels.
const MIN_CELL_SIZE: f32 = 16.0;

/// Candidates examined between time-budget checks.
const BUDGET_CHECK_INTERVAL: usize = 64;

/// Resample a polyline so consecutive points are at most `spacing` apart.
fn densify(points: &[Point], spacing: f32) -> Vec<Point> {
    let mut out = Vec::with_capacity(points.len());
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let steps = (a.distance(b) / spacing).ceil().max(1.0) as usize;
        for s in 0..steps {
            out.push(a.lerp(b, s as f32 / steps as f32));
        }
    }
    if let Some(last) = points.last() {
        out.push(*last);
    }
    out
}

fn outline(path: &VectorPath) -> Vec<Point> {
    let mut points = densify(&path.sample_points(), SAMPLE_SPACING);
    let closed = matches!(
        path.geometry,
        PathGeometry::Polyline { closed: true, .. } | PathGeometry::Cubic { closed: true, .. }
    );
    if closed {
        if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
            points.extend(densify(&[last, first], SAMPLE_SPACING));
        }
    }
    points
}

/// True when `candidate` retraces `existing` within `tolerance` pixels.
pub fn overlaps(candidate: &VectorPath, existing: &VectorPath, tolerance: f32) -> bool {
    match (&candidate.geometry, &existing.geometry) {
        (
            PathGeometry::Dot { center: a, radius: ra, .. },
            PathGeometry::Dot { center: b, radius: rb, .. },
        ) => a.distance(*b) <= ra.max(*rb).max(tolerance),
        (PathGeometry::Dot { .. }, _) | (_, PathGeometry::Dot { .. }) => false,
        _ => {
            if !candidate
                .bounds()
                .expanded(tolerance)
                .intersects(&existing.bounds())
            {
                return false;
            }
            mean_nearest_distance(&outline(candidate), &outline(existing)) <= tolerance
        }
    }
}

// ---------------------------------------------------------------------------
// Spatial grid
// ---------------------------------------------------------------------------

/// Uniform grid over the image holding references to kept paths.
///
/// A path is registered in every cell its bounds touch; coordinates outside
/// the image clamp to the border cells.
struct SpatialGrid<'a> {
    cell_size: f32,
    grid_width: usize,
    grid_height: usize,
    cells: Vec<Vec<usize>>,
    entries: Vec<&'a VectorPath>,
    /// Last query that visited each entry.
    seen: Vec<u32>,
    query: u32,
}

impl<'a> SpatialGrid<'a> {
    fn new(width: u32, height: u32, tolerance: f32) -> Self {
        let cell_size = (tolerance * 4.0).max(MIN_CELL_SIZE);
        let grid_width = ((width as f32 / cell_size).ceil() as usize).max(1);
        let grid_height = ((height as f32 / cell_size).ceil() as usize).max(1);
        Self {
            cell_size,
            grid_width,
            grid_height,
            cells: vec![Vec::new(); grid_width * grid_height],
            entries: Vec::new(),
            seen: Vec::new(),
            query: 0,
        }
    }

    fn to_grid(&self, x: f32, y: f32) -> (usize, usize) {
        let gx = ((x / self.cell_size).max(0.0) as usize).min(self.grid_width - 1);
        let gy = ((y / self.cell_size).max(0.0) as usize).min(self.grid_height - 1);
        (gx, gy)
    }

    /// Inclusive cell span `(x0, y0, x1, y1)` covered by `r`.
    fn span(&self, r: &Rect) -> (usize, usize, usize, usize) {
        let (x0, y0) = self.to_grid(r.min.x, r.min.y);
        let (x1, y1) = self.to_grid(r.max.x, r.max.y);
        (x0, y0, x1, y1)
    }

    fn insert(&mut self, path: &'a VectorPath) {
        let id = self.entries.len();
        let (x0, y0, x1, y1) = self.span(&path.bounds());
        for gy in y0..=y1 {
            for gx in x0..=x1 {
                self.cells[gy * self.grid_width + gx].push(id);
            }
        }
        self.entries.push(path);
        self.seen.push(0);
    }

    /// Whether any registered path is retraced by `candidate`.
    fn any_overlap(&mut self, candidate: &VectorPath, tolerance: f32) -> bool {
        self.query = self.query.wrapping_add(1).max(1);
        let (x0, y0, x1, y1) = self.span(&candidate.bounds().expanded(tolerance));
        for gy in y0..=y1 {
            for gx in x0..=x1 {
                for &id in &self.cells[gy * self.grid_width + gx] {
                    if self.seen[id] == self.query {
                        continue;
                    }
                    self.seen[id] = self.query;
                    if overlaps(candidate, self.entries[id], tolerance) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Fraction of `candidate` paths that overlap nothing in `committed`.
/// An empty candidate has no novelty.
pub fn novelty_ratio(candidate: &PathSet, committed: &[&PathSet], tolerance: f32) -> f32 {
    if candidate.is_empty() {
        return 0.0;
    }
    let mut grid = SpatialGrid::new(candidate.width, candidate.height, tolerance);
    for &set in committed {
        for path in &set.paths {
            grid.insert(path);
        }
    }
    let novel = candidate
        .paths
        .iter()
        .filter(|path| !grid.any_overlap(path, tolerance))
        .count();
    novel as f32 / candidate.len() as f32
}

/// Result of merging several path sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeStats {
    pub input_paths: usize,
    pub duplicates_removed: usize,
}

impl MergeStats {
    pub fn dedup_percent(&self) -> f32 {
        if self.input_paths == 0 {
            return 0.0;
        }
        self.duplicates_removed as f32 * 100.0 / self.input_paths as f32
    }
}

/// Union of `sets` in order.
///
/// A path is dropped when it retraces a path kept from an *earlier* set;
/// paths of the same set are never compared with each other, so a single
/// set passes through unchanged. `check` runs periodically and aborts the
/// merge with its error.
pub fn merge_path_sets<'a, E>(
    width: u32,
    height: u32,
    sets: &[&'a PathSet],
    tolerance: f32,
    mut check: impl FnMut() -> Result<(), E>,
) -> Result<(PathSet, MergeStats), E> {
    let mut merged = PathSet::new(width, height);
    let mut stats = MergeStats::default();
    if let [only] = sets {
        stats.input_paths = only.len();
        merged.paths = only.paths.clone();
        return Ok((merged, stats));
    }

    let mut grid = SpatialGrid::new(width, height, tolerance);
    for &set in sets {
        let mut kept: Vec<&'a VectorPath> = Vec::with_capacity(set.len());
        for (i, path) in set.paths.iter().enumerate() {
            if i % BUDGET_CHECK_INTERVAL == 0 {
                check()?;
            }
            stats.input_paths += 1;
            if grid.any_overlap(path, tolerance) {
                stats.duplicates_removed += 1;
                continue;
            }
            kept.push(path);
        }
        merged.paths.extend(kept.iter().map(|p| (*p).clone()));
        for path in kept {
            grid.insert(path);
        }
    }
    Ok((merged, stats))
}
