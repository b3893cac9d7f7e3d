//! Vectorization configuration: the typed parameter tree, its defaults,
//! validation, presets and the stateful [`ConfigurationManager`].
//!
//! The configuration serializes to a flat JSON/TOML document whose
//! `backend` key selects the algorithm, e.g.
//!
//! ```json
//! { "backend": "edge", "detail": 0.5, "etf_fdog": true,
//!   "multipass": { "enabled": true, "reverse_pass": true } }
//! ```

mod manager;
mod presets;
mod validation;

pub use manager::{ConfigState, ConfigurationManager};
pub use presets::{preset, PRESET_NAMES};
pub use validation::{validate, ConfigError, FieldError, ValidationResult};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Algorithm selection
// ---------------------------------------------------------------------------

/// The four tracing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceBackend {
    Edge,
    Centerline,
    Dots,
    Superpixel,
}

impl TraceBackend {
    pub const ALL: [TraceBackend; 4] = [
        TraceBackend::Edge,
        TraceBackend::Centerline,
        TraceBackend::Dots,
        TraceBackend::Superpixel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TraceBackend::Edge => "edge",
            TraceBackend::Centerline => "centerline",
            TraceBackend::Dots => "dots",
            TraceBackend::Superpixel => "superpixel",
        }
    }

    /// Whether the algorithm emits stroked lines (as opposed to dots or regions).
    pub fn is_line_based(self) -> bool {
        matches!(self, TraceBackend::Edge | TraceBackend::Centerline)
    }
}

impl fmt::Display for TraceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edge" => Ok(TraceBackend::Edge),
            "centerline" => Ok(TraceBackend::Centerline),
            "dots" | "stippling" => Ok(TraceBackend::Dots),
            "superpixel" | "regions" => Ok(TraceBackend::Superpixel),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

/// Algorithm-specific parameters. Exactly one block is active at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    Edge(EdgeConfig),
    Centerline(CenterlineConfig),
    Dots(DotsConfig),
    Superpixel(SuperpixelConfig),
}

impl AlgorithmConfig {
    pub fn backend(&self) -> TraceBackend {
        match self {
            AlgorithmConfig::Edge(_) => TraceBackend::Edge,
            AlgorithmConfig::Centerline(_) => TraceBackend::Centerline,
            AlgorithmConfig::Dots(_) => TraceBackend::Dots,
            AlgorithmConfig::Superpixel(_) => TraceBackend::Superpixel,
        }
    }

    /// Default parameter block for `backend`.
    pub fn for_backend(backend: TraceBackend) -> Self {
        match backend {
            TraceBackend::Edge => AlgorithmConfig::Edge(EdgeConfig::default()),
            TraceBackend::Centerline => AlgorithmConfig::Centerline(CenterlineConfig::default()),
            TraceBackend::Dots => AlgorithmConfig::Dots(DotsConfig::default()),
            TraceBackend::Superpixel => AlgorithmConfig::Superpixel(SuperpixelConfig::default()),
        }
    }
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        AlgorithmConfig::Edge(EdgeConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Edge-tangent-flow smoothing followed by flow-based difference of Gaussians.
    pub etf_fdog: bool,
    /// Follow the tangent field when linking edge pixels. Requires `etf_fdog`.
    pub flow_tracing: bool,
    /// Fit cubic Béziers to traced polylines. Requires `flow_tracing`.
    pub bezier_fitting: bool,
    pub douglas_peucker_epsilon: f32,
    /// Minimum traced polyline length in pixels.
    pub min_branch_length: f32,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            etf_fdog: false,
            flow_tracing: false,
            bezier_fitting: false,
            douglas_peucker_epsilon: 1.0,
            min_branch_length: 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterlineConfig {
    /// Local (Sauvola) thresholding instead of a global Otsu threshold.
    pub adaptive_threshold: bool,
    /// Odd window size for adaptive thresholding.
    pub window_size: u32,
    /// Sauvola sensitivity `k`.
    pub sensitivity_k: f32,
    pub douglas_peucker_epsilon: f32,
    pub min_branch_length: f32,
}

impl Default for CenterlineConfig {
    fn default() -> Self {
        Self {
            adaptive_threshold: true,
            window_size: 25,
            sensitivity_k: 0.3,
            douglas_peucker_epsilon: 1.0,
            min_branch_length: 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DotShape {
    #[default]
    Circle,
    Square,
    Diamond,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridPattern {
    #[default]
    Grid,
    Hexagonal,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DotsConfig {
    /// 0.0 = sparse, 1.0 = dense.
    pub density: f32,
    pub min_radius: f32,
    pub max_radius: f32,
    /// Scale dot radius with local darkness.
    pub adaptive_sizing: bool,
    pub preserve_colors: bool,
    pub shape: DotShape,
    pub grid_pattern: GridPattern,
}

impl Default for DotsConfig {
    fn default() -> Self {
        Self {
            density: 0.2,
            min_radius: 0.5,
            max_radius: 3.0,
            adaptive_sizing: true,
            preserve_colors: false,
            shape: DotShape::Circle,
            grid_pattern: GridPattern::Grid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuperpixelInitPattern {
    Square,
    Hexagonal,
    #[default]
    Poisson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperpixelConfig {
    pub num_superpixels: u32,
    pub compactness: f32,
    pub iterations: u32,
    pub initialization_pattern: SuperpixelInitPattern,
    pub fill_regions: bool,
    pub stroke_regions: bool,
    pub simplify_boundaries: bool,
    pub boundary_epsilon: f32,
}

impl Default for SuperpixelConfig {
    fn default() -> Self {
        Self {
            num_superpixels: 200,
            compactness: 10.0,
            iterations: 10,
            initialization_pattern: SuperpixelInitPattern::Poisson,
            fill_regions: false,
            stroke_regions: true,
            simplify_boundaries: true,
            boundary_epsilon: 1.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultipassConfig {
    pub enabled: bool,
    /// Number of detail-level passes when enabled (2..=10).
    pub pass_count: u32,
    /// Schedule a bottom-right to top-left directional pass.
    pub reverse_pass: bool,
    /// Schedule a diagonal directional pass.
    pub diagonal_pass: bool,
    /// Defaults to `detail * 0.7`.
    pub conservative_detail: Option<f32>,
    /// Defaults to `detail * 1.3`, capped at 1.0.
    pub aggressive_detail: Option<f32>,
    /// Minimum fraction of novel paths for a directional pass to be kept.
    pub directional_strength_threshold: f32,
}

impl Default for MultipassConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pass_count: 2,
            reverse_pass: false,
            diagonal_pass: false,
            conservative_detail: None,
            aggressive_detail: None,
            directional_strength_threshold: 0.3,
        }
    }
}

impl MultipassConfig {
    pub fn has_directional(&self) -> bool {
        self.reverse_pass || self.diagonal_pass
    }

    /// `(conservative, aggressive)` detail levels for a base `detail`.
    pub fn resolved_details(&self, detail: f32) -> (f32, f32) {
        let conservative = self
            .conservative_detail
            .unwrap_or(detail * 0.7)
            .clamp(0.0, 1.0);
        let aggressive = self
            .aggressive_detail
            .unwrap_or((detail * 1.3).min(1.0))
            .clamp(0.0, 1.0);
        (conservative, aggressive)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseFilterConfig {
    pub enabled: bool,
    /// Bilateral filter spatial sigma in pixels.
    pub spatial_sigma: f32,
    /// Bilateral filter range sigma in 8-bit intensity units.
    pub range_sigma: f32,
}

impl Default for NoiseFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            spatial_sigma: 2.0,
            range_sigma: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundRemovalAlgorithm {
    Otsu,
    Adaptive,
    #[default]
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundRemovalConfig {
    pub enabled: bool,
    pub strength: f32,
    pub algorithm: BackgroundRemovalAlgorithm,
    /// Explicit tolerance in 8-bit units; derived from the image when unset.
    pub threshold: Option<u8>,
}

impl Default for BackgroundRemovalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strength: 0.5,
            algorithm: BackgroundRemovalAlgorithm::Auto,
            threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineColorConfig {
    /// Sample source colors along traced lines.
    pub preserve_colors: bool,
    /// 0.0 = one averaged color per path, 1.0 = dense sampling.
    pub color_accuracy: f32,
    pub max_colors_per_path: u32,
    /// Colors closer than this (normalized RGB distance) are merged.
    pub color_tolerance: f32,
}

impl Default for LineColorConfig {
    fn default() -> Self {
        Self {
            preserve_colors: false,
            color_accuracy: 0.5,
            max_colors_per_path: 3,
            color_tolerance: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandDrawnPreset {
    #[default]
    None,
    Subtle,
    Medium,
    Strong,
    Sketchy,
    /// Explicit parameters only.
    Custom,
}

impl HandDrawnPreset {
    pub fn as_str(self) -> &'static str {
        match self {
            HandDrawnPreset::None => "none",
            HandDrawnPreset::Subtle => "subtle",
            HandDrawnPreset::Medium => "medium",
            HandDrawnPreset::Strong => "strong",
            HandDrawnPreset::Sketchy => "sketchy",
            HandDrawnPreset::Custom => "custom",
        }
    }
}

impl FromStr for HandDrawnPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(HandDrawnPreset::None),
            "subtle" => Ok(HandDrawnPreset::Subtle),
            "medium" => Ok(HandDrawnPreset::Medium),
            "strong" => Ok(HandDrawnPreset::Strong),
            "sketchy" => Ok(HandDrawnPreset::Sketchy),
            "custom" => Ok(HandDrawnPreset::Custom),
            other => Err(ConfigError::InvalidParameter {
                field: "hand_drawn.preset".into(),
                value: other.into(),
                expected: "one of none, subtle, medium, strong, sketchy, custom".into(),
            }),
        }
    }
}

/// Fully resolved hand-drawn effect parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HandDrawnParams {
    pub variable_weights: f32,
    pub tremor: f32,
    pub tapering: f32,
    pub pressure_variation: f32,
    pub base_width_multiplier: f32,
    pub multi_pass_intensity: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandDrawnConfig {
    pub preset: HandDrawnPreset,
    pub variable_weights: Option<f32>,
    pub tremor: Option<f32>,
    pub tapering: Option<f32>,
    pub multi_pass_intensity: Option<f32>,
}

impl HandDrawnConfig {
    pub fn from_preset(preset: HandDrawnPreset) -> Self {
        Self {
            preset,
            ..Self::default()
        }
    }

    fn has_custom_values(&self) -> bool {
        self.variable_weights.is_some()
            || self.tremor.is_some()
            || self.tapering.is_some()
            || self.multi_pass_intensity.is_some()
    }

    /// Whether any effect will be applied.
    pub fn is_active(&self) -> bool {
        self.preset != HandDrawnPreset::None || self.has_custom_values()
    }

    /// Preset values overlaid with explicit overrides. `None` when inactive.
    pub fn resolve(&self) -> Option<HandDrawnParams> {
        if !self.is_active() {
            return None;
        }
        let base = match self.preset {
            HandDrawnPreset::None | HandDrawnPreset::Custom => HandDrawnParams {
                variable_weights: 0.0,
                tremor: 0.0,
                tapering: 0.0,
                pressure_variation: 0.0,
                base_width_multiplier: 1.0,
                multi_pass_intensity: 0.0,
            },
            HandDrawnPreset::Subtle => HandDrawnParams {
                variable_weights: 0.15,
                tremor: 0.05,
                tapering: 0.1,
                pressure_variation: 0.2,
                base_width_multiplier: 1.0,
                multi_pass_intensity: 0.1,
            },
            HandDrawnPreset::Medium => HandDrawnParams {
                variable_weights: 0.3,
                tremor: 0.1,
                tapering: 0.2,
                pressure_variation: 0.4,
                base_width_multiplier: 1.0,
                multi_pass_intensity: 0.25,
            },
            HandDrawnPreset::Strong => HandDrawnParams {
                variable_weights: 0.5,
                tremor: 0.2,
                tapering: 0.4,
                pressure_variation: 0.6,
                base_width_multiplier: 1.1,
                multi_pass_intensity: 0.4,
            },
            HandDrawnPreset::Sketchy => HandDrawnParams {
                variable_weights: 0.6,
                tremor: 0.3,
                tapering: 0.3,
                pressure_variation: 0.7,
                base_width_multiplier: 1.2,
                multi_pass_intensity: 0.6,
            },
        };
        Some(HandDrawnParams {
            variable_weights: self.variable_weights.unwrap_or(base.variable_weights),
            tremor: self.tremor.unwrap_or(base.tremor),
            tapering: self.tapering.unwrap_or(base.tapering),
            multi_pass_intensity: self
                .multi_pass_intensity
                .unwrap_or(base.multi_pass_intensity),
            ..base
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveScalingConfig {
    /// Interpret `stroke_width` at a 1080 px reference and scale it to the image.
    pub enabled: bool,
    /// Resolution of the final output when the traced pixels are a downscaled
    /// preview. Defaults to the traced image's own size.
    pub image_resolution: Option<ImageResolution>,
}

/// Shortest side, in pixels, at which `stroke_width` is used unscaled.
pub const REFERENCE_RESOLUTION: f32 = 1080.0;

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// The complete parameter tree for one vectorize call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizationConfig {
    #[serde(flatten)]
    pub algorithm: AlgorithmConfig,
    /// 0.0 = coarse, 1.0 = fine.
    pub detail: f32,
    pub stroke_width: f32,
    /// Decimal places per SVG coordinate.
    pub svg_precision: u8,
    /// Seed for every randomized step (dot lattice, Poisson init, hand-drawn jitter).
    pub seed: u64,
    pub max_processing_time_ms: u64,
    /// Largest accepted image dimension in pixels.
    pub max_image_size: u32,
    pub multipass: MultipassConfig,
    pub noise_filter: NoiseFilterConfig,
    pub background_removal: BackgroundRemovalConfig,
    pub line_color: LineColorConfig,
    pub hand_drawn: HandDrawnConfig,
    pub adaptive_scaling: AdaptiveScalingConfig,
}

impl Default for VectorizationConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmConfig::default(),
            detail: 0.4,
            stroke_width: 1.5,
            svg_precision: 2,
            seed: 42,
            max_processing_time_ms: 60_000,
            max_image_size: 4096,
            multipass: MultipassConfig::default(),
            noise_filter: NoiseFilterConfig::default(),
            background_removal: BackgroundRemovalConfig::default(),
            line_color: LineColorConfig::default(),
            hand_drawn: HandDrawnConfig::default(),
            adaptive_scaling: AdaptiveScalingConfig::default(),
        }
    }
}

impl VectorizationConfig {
    pub fn with_backend(backend: TraceBackend) -> Self {
        Self {
            algorithm: AlgorithmConfig::for_backend(backend),
            ..Self::default()
        }
    }

    pub fn backend(&self) -> TraceBackend {
        self.algorithm.backend()
    }

    /// Stroke width after adaptive scaling for an image of the given size.
    pub fn effective_stroke_width(&self, width: u32, height: u32) -> f32 {
        if !self.adaptive_scaling.enabled {
            return self.stroke_width;
        }
        let (w, h) = match self.adaptive_scaling.image_resolution {
            Some(res) => (res.width, res.height),
            None => (width, height),
        };
        let shortest = w.min(h).max(1) as f32;
        (self.stroke_width * shortest / REFERENCE_RESOLUTION).max(0.1)
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Serializing plain data with string keys cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
