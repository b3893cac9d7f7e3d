//! Raster filters shared by the tracing strategies.

use super::{PixelBuffer, Rgb};

/// Single-channel float image, values nominally in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_pixels(pixels: &PixelBuffer) -> Self {
        let data = pixels
            .as_raw()
            .chunks_exact(4)
            .map(|px| Rgb::from_rgba([px[0], px[1], px[2], px[3]]).luminance())
            .collect();
        Self {
            width: pixels.width() as usize,
            height: pixels.height() as usize,
            data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Value at signed coordinates, clamped to the border.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.get(x, y)
    }

    /// Bilinear sample at fractional coordinates, clamped to the border.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let (fx, fy) = (x - x0, y - y0);
        let (xi, yi) = (x0 as isize, y0 as isize);
        let a = self.get_clamped(xi, yi);
        let b = self.get_clamped(xi + 1, yi);
        let c = self.get_clamped(xi, yi + 1);
        let d = self.get_clamped(xi + 1, yi + 1);
        let top = a + (b - a) * fx;
        let bottom = c + (d - c) * fx;
        top + (bottom - top) * fy
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            })
    }
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil().max(1.0) as isize;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Separable Gaussian blur. `sigma <= 0` returns a copy.
pub fn gaussian_blur(img: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return img.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let (w, h) = (img.width, img.height);

    let mut horizontal = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                acc += weight * img.get_clamped(x as isize + k as isize - radius, y as isize);
            }
            horizontal.data[y * w + x] = acc;
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                acc += weight * horizontal.get_clamped(x as isize, y as isize + k as isize - radius);
            }
            out.data[y * w + x] = acc;
        }
    }
    out
}

/// Sobel gradients `(gx, gy)`.
pub fn sobel(img: &GrayImage) -> (GrayImage, GrayImage) {
    let (w, h) = (img.width, img.height);
    let mut gx = GrayImage::new(w, h);
    let mut gy = GrayImage::new(w, h);
    for y in 0..h as isize {
        for x in 0..w as isize {
            let p = |dx: isize, dy: isize| img.get_clamped(x + dx, y + dy);
            let sx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            let sy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            let i = y as usize * w + x as usize;
            gx.data[i] = sx;
            gy.data[i] = sy;
        }
    }
    (gx, gy)
}

/// Otsu's threshold over values in `0.0..=1.0` (256 bins). Returns the bin
/// boundary maximizing between-class variance.
pub fn otsu_threshold(values: &[f32]) -> f32 {
    let mut histogram = [0u64; 256];
    for v in values {
        let bin = (v.clamp(0.0, 1.0) * 255.0).round() as usize;
        histogram[bin] += 1;
    }
    let total = values.len() as f64;
    if total == 0.0 {
        return 0.5;
    }
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, c)| i as f64 * *c as f64)
        .sum();

    let (mut sum_bg, mut weight_bg) = (0.0f64, 0.0f64);
    let (mut best, mut best_var) = (0usize, -1.0f64);
    for (i, count) in histogram.iter().enumerate() {
        weight_bg += *count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += i as f64 * *count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let var = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if var > best_var {
            best_var = var;
            best = i;
        }
    }
    // Pixels at or below `best` form the dark class.
    (best as f32 + 0.5) / 255.0
}

/// Summed-area tables of values and squared values for O(1) window statistics.
pub struct IntegralImage {
    width: usize,
    sum: Vec<f64>,
    sq_sum: Vec<f64>,
}

impl IntegralImage {
    pub fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width, img.height);
        let stride = w + 1;
        let mut sum = vec![0.0f64; stride * (h + 1)];
        let mut sq_sum = vec![0.0f64; stride * (h + 1)];
        for y in 0..h {
            let (mut row, mut row_sq) = (0.0f64, 0.0f64);
            for x in 0..w {
                let v = f64::from(img.get(x, y));
                row += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[y * stride + x + 1] + row;
                sq_sum[i] = sq_sum[y * stride + x + 1] + row_sq;
            }
        }
        Self {
            width: w,
            sum,
            sq_sum,
        }
    }

    /// Mean and standard deviation over the inclusive window `[x0, x1] x [y0, y1]`.
    pub fn window_stats(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> (f32, f32) {
        let stride = self.width + 1;
        let at = |t: &[f64], x: usize, y: usize| t[y * stride + x];
        let area = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f64;
        let rect = |t: &[f64]| at(t, x1 + 1, y1 + 1) - at(t, x0, y1 + 1) - at(t, x1 + 1, y0) + at(t, x0, y0);
        let mean = rect(&self.sum) / area;
        let variance = (rect(&self.sq_sum) / area - mean * mean).max(0.0);
        (mean as f32, variance.sqrt() as f32)
    }
}

/// Edge-preserving bilateral filter on RGBA pixels. `range_sigma` is in
/// 8-bit intensity units.
pub fn bilateral_filter(pixels: &PixelBuffer, spatial_sigma: f32, range_sigma: f32) -> PixelBuffer {
    let (w, h) = (pixels.width() as isize, pixels.height() as isize);
    let radius = (spatial_sigma * 2.0).ceil() as isize;
    let spatial_denom = 2.0 * spatial_sigma * spatial_sigma;
    let range_denom = 2.0 * range_sigma * range_sigma;

    PixelBuffer::from_fn(w as u32, h as u32, |x, y| {
        let center = pixels.pixel(x, y);
        let mut acc = [0.0f32; 3];
        let mut total = 0.0f32;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let nx = (x as isize + dx).clamp(0, w - 1) as u32;
                let ny = (y as isize + dy).clamp(0, h - 1) as u32;
                let n = pixels.pixel(nx, ny);
                let spatial = ((dx * dx + dy * dy) as f32) / spatial_denom;
                let diff: f32 = (0..3)
                    .map(|c| (f32::from(n[c]) - f32::from(center[c])).powi(2))
                    .sum();
                let weight = (-spatial - diff / range_denom).exp();
                for c in 0..3 {
                    acc[c] += weight * f32::from(n[c]);
                }
                total += weight;
            }
        }
        let channel = |c: usize| (acc[c] / total).round().clamp(0.0, 255.0) as u8;
        [channel(0), channel(1), channel(2), center[3]]
    })
}

/// CIE L*a*b* (D65) from sRGB.
pub fn rgb_to_lab(c: Rgb) -> [f32; 3] {
    fn linear(v: u8) -> f32 {
        let v = f32::from(v) / 255.0;
        if v <= 0.04045 {
            v / 12.92
        } else {
            ((v + 0.055) / 1.055).powf(2.4)
        }
    }
    fn f(t: f32) -> f32 {
        if t > 0.008_856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    }
    let (r, g, b) = (linear(c.r), linear(c.g), linear(c.b));
    let x = (0.4124 * r + 0.3576 * g + 0.1805 * b) / 0.950_47;
    let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let z = (0.0193 * r + 0.1192 * g + 0.9505 * b) / 1.088_83;
    let (fx, fy, fz) = (f(x), f(y), f(z));
    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}
