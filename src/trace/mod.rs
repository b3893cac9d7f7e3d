//! Tracing strategies: pixels in, vector paths out.
//!
//! All four algorithms are pure functions of the pixel buffer, their
//! parameter block and a [`TraceContext`]. Identical input and configuration
//! always produce identical output.

mod centerline;
mod chains;
mod dots;
mod edge;
pub mod filters;
pub mod geometry;
mod superpixel;

pub use geometry::{CubicSegment, Point, Rect};

use serde::Serialize;
use tracing::debug;

use crate::backend::ProcessingBackend;
use crate::config::{AlgorithmConfig, DotShape, LineColorConfig, TraceBackend};
use crate::error::ProcessingError;

// ---------------------------------------------------------------------------
// Pixels
// ---------------------------------------------------------------------------

/// An 8-bit RGBA image, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ProcessingError> {
        if width == 0 || height == 0 {
            return Err(ProcessingError::EmptyImage { width, height });
        }
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(ProcessingError::BufferSizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A single-color image. Zero dimensions are clamped to 1.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::from_fn(width, height, |_, _| rgba)
    }

    /// Build an image from a per-pixel function. Zero dimensions are clamped to 1.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Color at a (possibly fractional, possibly out of range) position,
    /// clamped to the image and composited over white.
    pub fn color_at(&self, x: f32, y: f32) -> Rgb {
        let xi = (x.round().max(0.0) as u32).min(self.width - 1);
        let yi = (y.round().max(0.0) as u32).min(self.height - 1);
        Rgb::from_rgba(self.pixel(xi, yi))
    }
}

/// An opaque color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Composite over white using the alpha channel.
    pub fn from_rgba([r, g, b, a]: [u8; 4]) -> Self {
        if a == 255 {
            return Self { r, g, b };
        }
        let alpha = f32::from(a) / 255.0;
        let blend = |c: u8| (f32::from(c) * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        Self {
            r: blend(r),
            g: blend(g),
            b: blend(b),
        }
    }

    /// Rec. 709 luma in `0.0..=1.0`.
    pub fn luminance(self) -> f32 {
        (0.2126 * f32::from(self.r) + 0.7152 * f32::from(self.g) + 0.0722 * f32::from(self.b))
            / 255.0
    }

    /// Euclidean RGB distance normalized to `0.0..=1.0`.
    pub fn distance(self, other: Rgb) -> f32 {
        let dr = f32::from(self.r) - f32::from(other.r);
        let dg = f32::from(self.g) - f32::from(other.g);
        let db = f32::from(self.b) - f32::from(other.b);
        (dr * dr + dg * dg + db * db).sqrt() / (255.0 * 3f32.sqrt())
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Weighted mean of colors.
    pub fn mean<I: IntoIterator<Item = (Rgb, f32)>>(colors: I) -> Option<Rgb> {
        let (mut r, mut g, mut b, mut w) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        for (c, weight) in colors {
            r += f32::from(c.r) * weight;
            g += f32::from(c.g) * weight;
            b += f32::from(c.b) * weight;
            w += weight;
        }
        if w <= 0.0 {
            return None;
        }
        Some(Rgb::new(
            (r / w).round() as u8,
            (g / w).round() as u8,
            (b / w).round() as u8,
        ))
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PathGeometry {
    Polyline {
        points: Vec<Point>,
        closed: bool,
    },
    Cubic {
        start: Point,
        segments: Vec<CubicSegment>,
        closed: bool,
    },
    Dot {
        center: Point,
        radius: f32,
        shape: DotShape,
    },
}

/// One vector element with its paint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorPath {
    pub geometry: PathGeometry,
    pub stroke: Option<Rgb>,
    pub fill: Option<Rgb>,
    pub stroke_width: f32,
    pub opacity: f32,
    /// Colors sampled along the path, start to end. More than one stop
    /// renders as a gradient.
    pub color_stops: Vec<Rgb>,
}

impl VectorPath {
    pub fn stroked(geometry: PathGeometry, color: Rgb, width: f32) -> Self {
        Self {
            geometry,
            stroke: Some(color),
            fill: None,
            stroke_width: width,
            opacity: 1.0,
            color_stops: Vec::new(),
        }
    }

    pub fn filled(geometry: PathGeometry, color: Rgb) -> Self {
        Self {
            geometry,
            stroke: None,
            fill: Some(color),
            stroke_width: 0.0,
            opacity: 1.0,
            color_stops: Vec::new(),
        }
    }

    /// Dominant paint: fill if present, else stroke.
    pub fn color(&self) -> Option<Rgb> {
        self.fill.or(self.stroke)
    }

    pub fn is_dot(&self) -> bool {
        matches!(self.geometry, PathGeometry::Dot { .. })
    }

    /// Whether every coordinate and size is a finite number.
    pub fn is_finite(&self) -> bool {
        let radius = match &self.geometry {
            PathGeometry::Dot { radius, .. } => *radius,
            _ => 0.0,
        };
        radius.is_finite()
            && self.stroke_width.is_finite()
            && self
                .sample_points()
                .iter()
                .all(|p| p.x.is_finite() && p.y.is_finite())
    }

    /// Points describing the path's shape, used for overlap tests.
    pub fn sample_points(&self) -> Vec<Point> {
        match &self.geometry {
            PathGeometry::Polyline { points, .. } => points.clone(),
            PathGeometry::Cubic {
                start, segments, ..
            } => geometry::flatten_cubics(*start, segments, 4),
            PathGeometry::Dot { center, .. } => vec![*center],
        }
    }

    pub fn bounds(&self) -> Rect {
        match &self.geometry {
            PathGeometry::Dot { center, radius, .. } => Rect {
                min: Point::new(center.x - radius, center.y - radius),
                max: Point::new(center.x + radius, center.y + radius),
            },
            _ => Rect::from_points(&self.sample_points()),
        }
    }
}

/// All paths traced from one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathSet {
    pub width: u32,
    pub height: u32,
    pub paths: Vec<VectorPath>,
}

impl PathSet {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            paths: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Scan order used when seeding traced lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterOrder {
    /// Top-left to bottom-right, row by row.
    Normal,
    /// Bottom-right to top-left.
    Reverse,
    /// Anti-diagonals from the top-left corner.
    Diagonal,
}

impl RasterOrder {
    /// Pixel coordinates of a `width`x`height` grid in this order.
    pub fn coordinates(self, width: u32, height: u32) -> Vec<(u32, u32)> {
        let mut out = Vec::with_capacity(width as usize * height as usize);
        match self {
            RasterOrder::Normal => {
                for y in 0..height {
                    for x in 0..width {
                        out.push((x, y));
                    }
                }
            }
            RasterOrder::Reverse => {
                for y in (0..height).rev() {
                    for x in (0..width).rev() {
                        out.push((x, y));
                    }
                }
            }
            RasterOrder::Diagonal => {
                for d in 0..(width + height).saturating_sub(1) {
                    let x_start = d.saturating_sub(height - 1);
                    let x_end = d.min(width - 1);
                    for x in x_start..=x_end {
                        out.push((x, d - x));
                    }
                }
            }
        }
        out
    }
}

/// Everything a strategy needs besides pixels and its own parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceContext {
    /// Informational: every backend runs the same kernels.
    pub backend: ProcessingBackend,
    pub detail: f32,
    pub raster_order: RasterOrder,
    pub stroke_width: f32,
    pub seed: u64,
    pub line_color: LineColorConfig,
}

impl Default for TraceContext {
    fn default() -> Self {
        Self {
            backend: ProcessingBackend::CpuSingleThreaded,
            detail: 0.4,
            raster_order: RasterOrder::Normal,
            stroke_width: 1.5,
            seed: 42,
            line_color: LineColorConfig::default(),
        }
    }
}

/// Trace `pixels` with the algorithm selected by `algorithm`.
pub fn trace(
    pixels: &PixelBuffer,
    algorithm: &AlgorithmConfig,
    ctx: &TraceContext,
) -> Result<PathSet, ProcessingError> {
    let paths = match algorithm {
        AlgorithmConfig::Edge(config) => edge::trace(pixels, config, ctx)?,
        AlgorithmConfig::Centerline(config) => centerline::trace(pixels, config, ctx)?,
        AlgorithmConfig::Dots(config) => dots::trace(pixels, config, ctx)?,
        AlgorithmConfig::Superpixel(config) => superpixel::trace(pixels, config, ctx)?,
    };
    ensure_drawable(algorithm.backend(), &paths)?;
    debug!(
        algorithm = %algorithm.backend(),
        order = ?ctx.raster_order,
        detail = ctx.detail,
        paths = paths.len(),
        "trace complete"
    );
    Ok(paths)
}

fn ensure_drawable(algorithm: TraceBackend, paths: &PathSet) -> Result<(), ProcessingError> {
    match paths.paths.iter().position(|p| !p.is_finite()) {
        Some(index) => Err(ProcessingError::Strategy {
            algorithm,
            reason: format!("path {index} has a non-finite coordinate"),
        }),
        None => Ok(()),
    }
}

/// Sample colors along `points` for line-color mode. Returns the stops and
/// their mean.
pub(crate) fn sample_line_colors(
    pixels: &PixelBuffer,
    points: &[Point],
    line_color: &LineColorConfig,
) -> (Vec<Rgb>, Rgb) {
    if points.is_empty() {
        return (Vec::new(), Rgb::BLACK);
    }
    let samples = 1 + (line_color.color_accuracy * 7.0).round() as usize;
    let step = (points.len() as f32 / samples as f32).max(1.0);
    let mut stops = Vec::with_capacity(samples);
    let mut i = 0.0f32;
    while (i as usize) < points.len() && stops.len() < samples {
        let p = points[i as usize];
        stops.push(pixels.color_at(p.x, p.y));
        i += step;
    }
    let mean = Rgb::mean(stops.iter().map(|c| (*c, 1.0))).unwrap_or(Rgb::BLACK);
    (stops, mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DotsConfig, EdgeConfig, SuperpixelConfig, CenterlineConfig};

    #[test]
    fn test_non_finite_geometry_is_a_strategy_failure() {
        let mut paths = PathSet::new(10, 10);
        paths.paths.push(VectorPath::filled(
            PathGeometry::Dot {
                center: Point::new(2.0, 2.0),
                radius: 1.0,
                shape: DotShape::Circle,
            },
            Rgb::BLACK,
        ));
        assert!(ensure_drawable(TraceBackend::Dots, &paths).is_ok());

        paths.paths.push(VectorPath::stroked(
            PathGeometry::Polyline {
                points: vec![Point::new(0.0, 0.0), Point::new(f32::NAN, 3.0)],
                closed: false,
            },
            Rgb::BLACK,
            1.0,
        ));
        let err = ensure_drawable(TraceBackend::Edge, &paths).unwrap_err();
        assert_eq!(
            err,
            ProcessingError::Strategy {
                algorithm: TraceBackend::Edge,
                reason: "path 1 has a non-finite coordinate".into(),
            }
        );
    }

    #[test]
    fn test_pixel_buffer_validation() {
        assert!(matches!(
            PixelBuffer::from_rgba(0, 10, Vec::new()),
            Err(ProcessingError::EmptyImage { .. })
        ));
        assert!(matches!(
            PixelBuffer::from_rgba(2, 2, vec![0; 15]),
            Err(ProcessingError::BufferSizeMismatch { expected: 16, actual: 15, .. })
        ));
        let buf = PixelBuffer::from_rgba(2, 1, vec![1, 2, 3, 255, 4, 5, 6, 255]).unwrap();
        assert_eq!(buf.pixel(1, 0), [4, 5, 6, 255]);
    }

    #[test]
    fn test_transparent_pixels_composite_over_white() {
        assert_eq!(Rgb::from_rgba([0, 0, 0, 0]), Rgb::new(255, 255, 255));
        assert_eq!(Rgb::from_rgba([10, 20, 30, 255]), Rgb::new(10, 20, 30));
    }

    #[test]
    fn test_raster_orders_cover_grid() {
        for order in [RasterOrder::Normal, RasterOrder::Reverse, RasterOrder::Diagonal] {
            let mut coords = order.coordinates(4, 3);
            assert_eq!(coords.len(), 12, "{order:?}");
            coords.sort_unstable();
            coords.dedup();
            assert_eq!(coords.len(), 12, "{order:?}");
        }
        assert_eq!(RasterOrder::Reverse.coordinates(2, 2)[0], (1, 1));
        assert_eq!(RasterOrder::Diagonal.coordinates(3, 3)[..3], [(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn test_every_strategy_is_deterministic() {
        let pixels = PixelBuffer::from_fn(64, 64, |x, y| {
            if (x / 16 + y / 16) % 2 == 0 {
                [20, 20, 20, 255]
            } else {
                [230, 230, 230, 255]
            }
        });
        let ctx = TraceContext::default();
        let algorithms = [
            AlgorithmConfig::Edge(EdgeConfig::default()),
            AlgorithmConfig::Centerline(CenterlineConfig::default()),
            AlgorithmConfig::Dots(DotsConfig {
                density: 0.8,
                grid_pattern: crate::config::GridPattern::Random,
                ..DotsConfig::default()
            }),
            AlgorithmConfig::Superpixel(SuperpixelConfig::default()),
        ];
        for algorithm in &algorithms {
            let a = trace(&pixels, algorithm, &ctx).unwrap();
            let b = trace(&pixels, algorithm, &ctx).unwrap();
            assert_eq!(a, b, "{}", algorithm.backend());
            assert!(!a.is_empty(), "{} produced no paths", algorithm.backend());
        }
    }

    #[test]
    fn test_line_color_sampling() {
        let pixels = PixelBuffer::from_fn(10, 1, |x, _| if x < 5 { [255, 0, 0, 255] } else { [0, 0, 255, 255] });
        let points: Vec<_> = (0..10).map(|x| Point::new(x as f32, 0.0)).collect();
        let config = LineColorConfig {
            preserve_colors: true,
            color_accuracy: 1.0,
            ..LineColorConfig::default()
        };
        let (stops, _) = sample_line_colors(&pixels, &points, &config);
        assert_eq!(stops.first(), Some(&Rgb::new(255, 0, 0)));
        assert_eq!(stops.last(), Some(&Rgb::new(0, 0, 255)));
    }
}
