use std::fmt;
use std::ops::RangeInclusive;

use serde::Serialize;
use thiserror::Error;

use super::{AlgorithmConfig, HandDrawnPreset, TraceBackend, VectorizationConfig};

/// Configuration rejected by a setter, a document or a preset lookup.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value} for `{field}`: expected {expected}")]
    InvalidParameter {
        field: String,
        value: String,
        expected: String,
    },

    #[error("configuration rejected: {}", summarize(.errors))]
    Invalid { errors: Vec<FieldError> },

    #[error("malformed configuration document: {0}")]
    Malformed(String),

    #[error("unknown preset `{name}` (available: {available})")]
    UnknownPreset { name: String, available: String },

    #[error("unknown backend `{0}` (expected edge, centerline, dots or superpixel)")]
    UnknownBackend(String),

    #[error("`{field}` applies to the {expected} backend but {active} is active")]
    InactiveBackend {
        field: String,
        expected: TraceBackend,
        active: TraceBackend,
    },
}

impl ConfigError {
    /// Field-level errors carried by this error, if any.
    pub fn field_errors(&self) -> Vec<FieldError> {
        match self {
            ConfigError::Invalid { errors } => errors.clone(),
            ConfigError::InvalidParameter {
                field,
                value,
                expected,
            } => vec![FieldError::new(field, value, expected)],
            _ => Vec::new(),
        }
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    /// Dotted path, e.g. `multipass.pass_count`.
    pub field: String,
    pub value: String,
    pub expected: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, value: impl fmt::Display, expected: &str) -> Self {
        let value = value.to_string();
        Self {
            message: format!("`{field}` = {value} is invalid, expected {expected}"),
            field: field.to_string(),
            value,
            expected: expected.to_string(),
        }
    }

    /// A value that cannot be read as the field's type. `reason` is the
    /// deserializer's message.
    pub fn type_mismatch(field: &str, value: &serde_json::Value, reason: &str) -> Self {
        let expected = reason.split_once("expected ").map_or(reason, |(_, rest)| rest);
        Self {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
            message: format!("`{field}` cannot be read: {reason}"),
        }
    }

    fn dependency(field: &str, value: impl fmt::Display, message: &str) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            expected: message.to_string(),
            message: format!("`{field}` {message}"),
        }
    }

    pub fn into_error(self) -> ConfigError {
        ConfigError::InvalidParameter {
            field: self.field,
            value: self.value,
            expected: self.expected,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of [`validate`]. Lists every violation, not just the first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), ConfigError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                errors: self.errors,
            })
        }
    }

    fn range_f32(&mut self, field: &str, value: f32, range: RangeInclusive<f32>) {
        if !value.is_finite() || !range.contains(&value) {
            let expected = format!("{} to {}", range.start(), range.end());
            self.errors.push(FieldError::new(field, value, &expected));
        }
    }

    fn positive_up_to(&mut self, field: &str, value: f32, max: f32) {
        if !value.is_finite() || value <= 0.0 || value > max {
            let expected = format!("greater than 0 and at most {max}");
            self.errors.push(FieldError::new(field, value, &expected));
        }
    }

    fn range_u64(&mut self, field: &str, value: u64, range: RangeInclusive<u64>) {
        if !range.contains(&value) {
            let expected = format!("{} to {}", range.start(), range.end());
            self.errors.push(FieldError::new(field, value, &expected));
        }
    }
}

/// Check every field and cross-field dependency of `config`.
pub fn validate(config: &VectorizationConfig) -> ValidationResult {
    let mut r = ValidationResult::default();

    r.range_f32("detail", config.detail, 0.0..=1.0);
    r.positive_up_to("stroke_width", config.stroke_width, 50.0);
    r.range_u64("svg_precision", config.svg_precision.into(), 0..=6);
    r.range_u64(
        "max_processing_time_ms",
        config.max_processing_time_ms,
        100..=600_000,
    );
    r.range_u64("max_image_size", config.max_image_size.into(), 64..=16_384);

    match &config.algorithm {
        AlgorithmConfig::Edge(edge) => {
            r.range_f32("douglas_peucker_epsilon", edge.douglas_peucker_epsilon, 0.1..=10.0);
            r.range_f32("min_branch_length", edge.min_branch_length, 1.0..=100.0);
            if edge.flow_tracing && !edge.etf_fdog {
                r.errors.push(FieldError::dependency(
                    "flow_tracing",
                    true,
                    "requires etf_fdog to be enabled",
                ));
            }
            if edge.bezier_fitting && !edge.flow_tracing {
                r.errors.push(FieldError::dependency(
                    "bezier_fitting",
                    true,
                    "requires flow_tracing to be enabled",
                ));
            }
        }
        AlgorithmConfig::Centerline(c) => {
            r.range_u64("window_size", c.window_size.into(), 15..=50);
            r.range_f32("sensitivity_k", c.sensitivity_k, 0.1..=1.0);
            r.range_f32("douglas_peucker_epsilon", c.douglas_peucker_epsilon, 0.1..=10.0);
            r.range_f32("min_branch_length", c.min_branch_length, 1.0..=100.0);
        }
        AlgorithmConfig::Dots(d) => {
            r.range_f32("density", d.density, 0.0..=1.0);
            r.positive_up_to("min_radius", d.min_radius, 20.0);
            r.positive_up_to("max_radius", d.max_radius, 20.0);
            if d.min_radius > d.max_radius {
                r.errors.push(FieldError::new(
                    "min_radius",
                    d.min_radius,
                    &format!("at most max_radius ({})", d.max_radius),
                ));
            }
        }
        AlgorithmConfig::Superpixel(s) => {
            r.range_u64("num_superpixels", s.num_superpixels.into(), 20..=1000);
            r.range_f32("compactness", s.compactness, 1.0..=50.0);
            r.range_u64("iterations", s.iterations.into(), 5..=15);
            r.range_f32("boundary_epsilon", s.boundary_epsilon, 0.5..=5.0);
            if !s.fill_regions && !s.stroke_regions {
                r.errors.push(FieldError::dependency(
                    "stroke_regions",
                    false,
                    "must be enabled when fill_regions is disabled",
                ));
            }
        }
    }

    let mp = &config.multipass;
    r.range_u64("multipass.pass_count", mp.pass_count.into(), 1..=10);
    r.range_f32(
        "multipass.directional_strength_threshold",
        mp.directional_strength_threshold,
        0.0..=1.0,
    );
    if let Some(c) = mp.conservative_detail {
        r.range_f32("multipass.conservative_detail", c, 0.0..=1.0);
    }
    if let Some(a) = mp.aggressive_detail {
        r.range_f32("multipass.aggressive_detail", a, 0.0..=1.0);
    }
    if mp.enabled {
        let (c, a) = mp.resolved_details(config.detail);
        if c > a {
            r.errors.push(FieldError::new(
                "multipass.conservative_detail",
                c,
                &format!("at most aggressive_detail ({a})"),
            ));
        }
    }

    let nf = &config.noise_filter;
    r.range_f32("noise_filter.spatial_sigma", nf.spatial_sigma, 0.5..=5.0);
    r.range_f32("noise_filter.range_sigma", nf.range_sigma, 10.0..=100.0);

    r.range_f32(
        "background_removal.strength",
        config.background_removal.strength,
        0.0..=1.0,
    );

    let lc = &config.line_color;
    r.range_f32("line_color.color_accuracy", lc.color_accuracy, 0.0..=1.0);
    r.range_u64(
        "line_color.max_colors_per_path",
        lc.max_colors_per_path.into(),
        1..=10,
    );
    r.range_f32("line_color.color_tolerance", lc.color_tolerance, 0.0..=1.0);

    let hd = &config.hand_drawn;
    if let Some(t) = hd.tremor {
        r.range_f32("hand_drawn.tremor", t, 0.0..=0.5);
    }
    if let Some(w) = hd.variable_weights {
        r.range_f32("hand_drawn.variable_weights", w, 0.0..=1.0);
    }
    if let Some(t) = hd.tapering {
        r.range_f32("hand_drawn.tapering", t, 0.0..=1.0);
    }
    if let Some(i) = hd.multi_pass_intensity {
        r.range_f32("hand_drawn.multi_pass_intensity", i, 0.0..=1.0);
    }
    let has_custom = hd.tremor.is_some()
        || hd.variable_weights.is_some()
        || hd.tapering.is_some()
        || hd.multi_pass_intensity.is_some();
    if has_custom && hd.preset == HandDrawnPreset::None {
        r.errors.push(FieldError::dependency(
            "hand_drawn.preset",
            "none",
            "must name a preset (or `custom`) when explicit hand-drawn values are set",
        ));
    }

    if let Some(res) = config.adaptive_scaling.image_resolution {
        if res.width == 0 || res.height == 0 {
            r.errors.push(FieldError::new(
                "adaptive_scaling.image_resolution",
                format!("{}x{}", res.width, res.height),
                "non-zero width and height",
            ));
        }
    }

    r
}
