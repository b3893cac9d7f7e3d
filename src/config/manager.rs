use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{
    presets, validate, AlgorithmConfig, BackgroundRemovalConfig, CenterlineConfig, ConfigError,
    DotsConfig, EdgeConfig, FieldError, HandDrawnConfig, HandDrawnPreset, ImageResolution,
    LineColorConfig, NoiseFilterConfig, SuperpixelConfig, TraceBackend, ValidationResult,
    VectorizationConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigState {
    /// Defaults in effect, nothing applied yet.
    Unconfigured,
    Configured,
}

/// Owns the active [`VectorizationConfig`].
///
/// Every mutation builds a new config, validates it and swaps it in whole.
/// A rejected change leaves the previous config and state untouched.
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    current: Arc<VectorizationConfig>,
    state: ConfigState,
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self {
            current: Arc::new(VectorizationConfig::default()),
            state: ConfigState::Unconfigured,
        }
    }

    /// Start from an already-built config. Fails if it does not validate.
    pub fn with_config(config: VectorizationConfig) -> Result<Self, ConfigError> {
        let mut manager = Self::new();
        manager.commit(config)?;
        Ok(manager)
    }

    pub fn state(&self) -> ConfigState {
        self.state
    }

    /// Snapshot of the active config.
    pub fn current(&self) -> Arc<VectorizationConfig> {
        Arc::clone(&self.current)
    }

    pub fn config(&self) -> &VectorizationConfig {
        &self.current
    }

    /// Re-validate the active config, as done before every vectorize call.
    pub fn validated(&self) -> Result<Arc<VectorizationConfig>, ConfigError> {
        validate(&self.current).into_result()?;
        Ok(self.current())
    }

    pub fn reset(&mut self) {
        self.current = Arc::new(VectorizationConfig::default());
        self.state = ConfigState::Unconfigured;
        debug!("configuration reset to defaults");
    }

    pub fn load_preset(&mut self, name: &str) -> Result<(), ConfigError> {
        let config = presets::preset(name)?;
        self.commit(config)?;
        info!(preset = name, backend = %self.current.backend(), "preset loaded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    pub fn get_config_json(&self) -> Value {
        self.current.to_json()
    }

    /// Merge `doc` over the active config, validate the result as a whole and
    /// commit it. Unknown keys are ignored; missing keys keep their values.
    /// Values of the wrong type are rejected by path along with any range
    /// violations in the same document.
    pub fn apply_config_json(&mut self, doc: &Value) -> Result<(), ConfigError> {
        let (candidate, mut errors) = self.merged(doc)?;
        errors.extend(validate(&candidate).errors);
        if !errors.is_empty() {
            debug!(errors = errors.len(), "configuration document rejected");
            return Err(ConfigError::Invalid { errors });
        }
        self.swap(candidate);
        debug!(backend = %self.current.backend(), "configuration document applied");
        Ok(())
    }

    /// Parse and apply a JSON document.
    pub fn apply_config_str(&mut self, text: &str) -> Result<(), ConfigError> {
        let doc: Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        self.apply_config_json(&doc)
    }

    /// Same checks as [`apply_config_json`](Self::apply_config_json), without
    /// touching the active config.
    pub fn validate_config_json(&self, doc: &Value) -> ValidationResult {
        match self.merged(doc) {
            Ok((candidate, mut errors)) => {
                errors.extend(validate(&candidate).errors);
                ValidationResult { errors }
            }
            Err(e) => ValidationResult {
                errors: vec![FieldError::new("document", e, "a well-formed configuration document")],
            },
        }
    }

    /// `doc` merged over the active config, plus one error per leaf whose value
    /// cannot be read as its field's type. Rejected leaves keep their current
    /// value so the rest of the document can still be range-checked.
    fn merged(&self, doc: &Value) -> Result<(VectorizationConfig, Vec<FieldError>), ConfigError> {
        let patch = match doc {
            Value::Object(map) => expand_shorthands(map),
            other => {
                return Err(ConfigError::Malformed(format!(
                    "expected a JSON object, got {}",
                    json_kind(other)
                )))
            }
        };
        let base = self.current.to_json();
        let mut full = base.clone();
        merge_value(&mut full, &Value::Object(patch.clone()));
        if let Ok(mut config) = serde_json::from_value::<VectorizationConfig>(full) {
            normalize(&mut config);
            return Ok((config, Vec::new()));
        }

        // 1. The backend switch decides which algorithm fields exist.
        let mut errors = Vec::new();
        let mut context = base;
        if let Some(backend) = patch.get("backend") {
            let mut switched = context.clone();
            merge_value(&mut switched, &serde_json::json!({ "backend": backend }));
            match serde_json::from_value::<VectorizationConfig>(switched.clone()) {
                Ok(_) => context = switched,
                Err(e) => errors.push(FieldError::type_mismatch("backend", backend, &e.to_string())),
            }
        }

        // 2. Every other leaf is tried on its own against that context.
        let mut accepted = context.clone();
        let mut leaves = Vec::new();
        collect_leaves(&patch, String::new(), &mut leaves);
        for (path, value) in leaves.into_iter().filter(|(path, _)| path != "backend") {
            let leaf = nest(&path, value);
            let mut trial = context.clone();
            merge_value(&mut trial, &leaf);
            match serde_json::from_value::<VectorizationConfig>(trial) {
                Ok(_) => merge_value(&mut accepted, &leaf),
                Err(e) => errors.push(FieldError::type_mismatch(&path, value, &e.to_string())),
            }
        }

        let mut config: VectorizationConfig =
            serde_json::from_value(accepted).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        normalize(&mut config);
        Ok((config, errors))
    }

    // -----------------------------------------------------------------------
    // Setters
    // -----------------------------------------------------------------------

    pub fn set_backend(&mut self, backend: TraceBackend) -> Result<(), ConfigError> {
        self.update(|c| {
            if c.backend() != backend {
                c.algorithm = AlgorithmConfig::for_backend(backend);
            }
            Ok(())
        })
    }

    pub fn set_detail(&mut self, detail: f32) -> Result<(), ConfigError> {
        self.update(|c| {
            c.detail = detail;
            Ok(())
        })
    }

    pub fn set_stroke_width(&mut self, width: f32) -> Result<(), ConfigError> {
        self.update(|c| {
            c.stroke_width = width;
            Ok(())
        })
    }

    pub fn set_svg_precision(&mut self, precision: u8) -> Result<(), ConfigError> {
        self.update(|c| {
            c.svg_precision = precision;
            Ok(())
        })
    }

    pub fn set_seed(&mut self, seed: u64) -> Result<(), ConfigError> {
        self.update(|c| {
            c.seed = seed;
            Ok(())
        })
    }

    pub fn set_multipass(&mut self, enabled: bool) -> Result<(), ConfigError> {
        self.update(|c| {
            c.multipass.enabled = enabled;
            Ok(())
        })
    }

    pub fn set_pass_count(&mut self, count: u32) -> Result<(), ConfigError> {
        self.update(|c| {
            c.multipass.pass_count = count;
            Ok(())
        })
    }

    pub fn set_detail_levels(
        &mut self,
        conservative: f32,
        aggressive: f32,
    ) -> Result<(), ConfigError> {
        self.update(|c| {
            c.multipass.conservative_detail = Some(conservative);
            c.multipass.aggressive_detail = Some(aggressive);
            if conservative > aggressive {
                return Err(FieldError::new(
                    "multipass.conservative_detail",
                    conservative,
                    &format!("at most aggressive_detail ({aggressive})"),
                )
                .into_error());
            }
            Ok(())
        })
    }

    pub fn set_directional_passes(
        &mut self,
        reverse: bool,
        diagonal: bool,
        strength_threshold: f32,
    ) -> Result<(), ConfigError> {
        self.update(|c| {
            c.multipass.reverse_pass = reverse;
            c.multipass.diagonal_pass = diagonal;
            c.multipass.directional_strength_threshold = strength_threshold;
            Ok(())
        })
    }

    /// Activate the edge backend with `settings`.
    pub fn set_edge_settings(&mut self, settings: EdgeConfig) -> Result<(), ConfigError> {
        self.update(|c| {
            c.algorithm = AlgorithmConfig::Edge(settings);
            Ok(())
        })
    }

    /// Activate the centerline backend with `settings`. An even `window_size`
    /// is rounded to the nearest odd value inside the accepted range.
    pub fn set_centerline_settings(
        &mut self,
        settings: CenterlineConfig,
    ) -> Result<(), ConfigError> {
        self.update(|c| {
            c.algorithm = AlgorithmConfig::Centerline(settings);
            normalize(c);
            Ok(())
        })
    }

    /// Activate the dots backend with `settings`.
    pub fn set_dots_settings(&mut self, settings: DotsConfig) -> Result<(), ConfigError> {
        self.update(|c| {
            c.algorithm = AlgorithmConfig::Dots(settings);
            Ok(())
        })
    }

    /// Set the dot radius range of the active dots backend. `min > max` is
    /// rejected, never swapped.
    pub fn set_dot_size_range(&mut self, min_radius: f32, max_radius: f32) -> Result<(), ConfigError> {
        self.update(|c| {
            let active = c.backend();
            match &mut c.algorithm {
                AlgorithmConfig::Dots(dots) => {
                    if min_radius > max_radius {
                        return Err(FieldError::new(
                            "min_radius",
                            min_radius,
                            &format!("at most max_radius ({max_radius})"),
                        )
                        .into_error());
                    }
                    dots.min_radius = min_radius;
                    dots.max_radius = max_radius;
                    Ok(())
                }
                _ => Err(ConfigError::InactiveBackend {
                    field: "min_radius/max_radius".into(),
                    expected: TraceBackend::Dots,
                    active,
                }),
            }
        })
    }

    /// Activate the superpixel backend with `settings`.
    pub fn set_superpixel_settings(
        &mut self,
        settings: SuperpixelConfig,
    ) -> Result<(), ConfigError> {
        self.update(|c| {
            c.algorithm = AlgorithmConfig::Superpixel(settings);
            Ok(())
        })
    }

    pub fn set_noise_filtering(&mut self, settings: NoiseFilterConfig) -> Result<(), ConfigError> {
        self.update(|c| {
            c.noise_filter = settings;
            Ok(())
        })
    }

    pub fn set_background_removal(
        &mut self,
        settings: BackgroundRemovalConfig,
    ) -> Result<(), ConfigError> {
        self.update(|c| {
            c.background_removal = settings;
            Ok(())
        })
    }

    /// Select a hand-drawn preset, clearing explicit overrides.
    pub fn set_hand_drawn_preset(&mut self, preset: HandDrawnPreset) -> Result<(), ConfigError> {
        self.update(|c| {
            c.hand_drawn = HandDrawnConfig::from_preset(preset);
            Ok(())
        })
    }

    /// Override individual hand-drawn values. With no preset selected the
    /// preset becomes `custom`.
    pub fn set_custom_hand_drawn(
        &mut self,
        tremor: Option<f32>,
        variable_weights: Option<f32>,
        tapering: Option<f32>,
        multi_pass_intensity: Option<f32>,
    ) -> Result<(), ConfigError> {
        self.update(|c| {
            let hd = &mut c.hand_drawn;
            if hd.preset == HandDrawnPreset::None {
                hd.preset = HandDrawnPreset::Custom;
            }
            hd.tremor = tremor.or(hd.tremor);
            hd.variable_weights = variable_weights.or(hd.variable_weights);
            hd.tapering = tapering.or(hd.tapering);
            hd.multi_pass_intensity = multi_pass_intensity.or(hd.multi_pass_intensity);
            Ok(())
        })
    }

    pub fn set_line_colors(&mut self, settings: LineColorConfig) -> Result<(), ConfigError> {
        self.update(|c| {
            c.line_color = settings;
            Ok(())
        })
    }

    pub fn set_adaptive_scaling(
        &mut self,
        enabled: bool,
        image_resolution: Option<ImageResolution>,
    ) -> Result<(), ConfigError> {
        self.update(|c| {
            c.adaptive_scaling.enabled = enabled;
            c.adaptive_scaling.image_resolution = image_resolution;
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Apply `f` to a copy of the active config and commit it if valid.
    /// Setters fail fast with the first violation.
    fn update<F>(&mut self, f: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut VectorizationConfig) -> Result<(), ConfigError>,
    {
        let mut next = VectorizationConfig::clone(&self.current);
        f(&mut next)?;
        if let Some(first) = validate(&next).errors.into_iter().next() {
            return Err(first.into_error());
        }
        self.swap(next);
        Ok(())
    }

    fn commit(&mut self, mut next: VectorizationConfig) -> Result<(), ConfigError> {
        normalize(&mut next);
        validate(&next).into_result()?;
        self.swap(next);
        Ok(())
    }

    fn swap(&mut self, next: VectorizationConfig) {
        self.current = Arc::new(next);
        self.state = ConfigState::Configured;
    }
}

/// Round an even centerline window to the nearest odd size within 15..=50.
fn normalize(config: &mut VectorizationConfig) {
    if let AlgorithmConfig::Centerline(c) = &mut config.algorithm {
        if c.window_size % 2 == 0 {
            c.window_size = if c.window_size < 50 {
                c.window_size + 1
            } else {
                c.window_size - 1
            };
        }
    }
}

/// Accept `"multipass": true`, `"noise_filter": false`, `"hand_drawn": "medium"`
/// and similar scalar shorthands for the nested blocks.
fn expand_shorthands(doc: &Map<String, Value>) -> Map<String, Value> {
    let mut out = doc.clone();
    for key in ["multipass", "noise_filter", "background_removal", "adaptive_scaling"] {
        if let Some(Value::Bool(enabled)) = out.get(key) {
            let enabled = *enabled;
            out.insert(key.to_string(), serde_json::json!({ "enabled": enabled }));
        }
    }
    if let Some(Value::String(preset)) = out.get("hand_drawn") {
        let preset = preset.clone();
        out.insert("hand_drawn".to_string(), serde_json::json!({ "preset": preset }));
    }
    if let Some(Value::String(backend)) = out.get("backend") {
        if let Ok(parsed) = backend.parse::<TraceBackend>() {
            out.insert("backend".to_string(), Value::String(parsed.as_str().into()));
        }
    }
    out
}

/// Dotted paths of every non-object value in `map`. Empty objects are skipped.
fn collect_leaves<'v>(map: &'v Map<String, Value>, prefix: String, out: &mut Vec<(String, &'v Value)>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) => collect_leaves(inner, path, out),
            leaf => out.push((path, leaf)),
        }
    }
}

/// `{"a": {"b": value}}` for path `a.b`.
fn nest(path: &str, value: &Value) -> Value {
    path.rsplit('.').fold(value.clone(), |inner, key| {
        let mut map = Map::new();
        map.insert(key.to_string(), inner);
        Value::Object(map)
    })
}

/// Recursive object merge; non-object values in `patch` replace those in `base`.
fn merge_value(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_starts_unconfigured() {
        let manager = ConfigurationManager::new();
        assert_eq!(manager.state(), ConfigState::Unconfigured);
        assert_eq!(manager.config(), &VectorizationConfig::default());
    }

    #[test]
    fn test_apply_document_transitions_state() {
        let mut manager = ConfigurationManager::new();
        manager
            .apply_config_json(&json!({"backend": "edge", "detail": 0.5, "multipass": false}))
            .unwrap();
        assert_eq!(manager.state(), ConfigState::Configured);
        assert!((manager.config().detail - 0.5).abs() < f32::EPSILON);
        assert!(!manager.config().multipass.enabled);
    }

    #[test]
    fn test_rejected_document_leaves_config_untouched() {
        let mut manager = ConfigurationManager::new();
        manager.apply_config_json(&json!({"detail": 0.7})).unwrap();
        let before = manager.current();

        let err = manager
            .apply_config_json(&json!({"detail": 0.2, "stroke_width": -1.0, "svg_precision": 12}))
            .unwrap_err();
        let fields: Vec<_> = err.field_errors().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["stroke_width", "svg_precision"]);

        assert_eq!(*manager.current(), *before);
        assert_eq!(manager.state(), ConfigState::Configured);
    }

    #[test]
    fn test_round_trip_is_fixed_point() {
        let mut manager = ConfigurationManager::new();
        manager.load_preset("technical").unwrap();
        let first = manager.get_config_json();
        manager.apply_config_json(&first).unwrap();
        let second = manager.get_config_json();
        manager.apply_config_json(&second).unwrap();
        assert_eq!(first, second);
        assert_eq!(second, manager.get_config_json());
    }

    #[test]
    fn test_validate_document_does_not_mutate() {
        let manager = ConfigurationManager::new();
        let result = manager.validate_config_json(&json!({
            "multipass": {"enabled": true, "conservative_detail": 0.8, "aggressive_detail": 0.3}
        }));
        assert!(!result.is_valid());
        assert_eq!(result.errors[0].field, "multipass.conservative_detail");
        assert_eq!(manager.state(), ConfigState::Unconfigured);
    }

    #[test]
    fn test_validate_dots_radius_document() {
        let manager = ConfigurationManager::new();
        let result = manager.validate_config_json(&json!({
            "backend": "dots", "min_radius": 4.0, "max_radius": 1.0
        }));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "min_radius");
    }

    #[test]
    fn test_malformed_documents() {
        let mut manager = ConfigurationManager::new();
        assert!(matches!(
            manager.apply_config_json(&json!([1, 2, 3])),
            Err(ConfigError::Malformed(_))
        ));
        assert!(manager.apply_config_str("{not json").is_err());

        let result = manager.validate_config_json(&json!(null));
        assert_eq!(result.errors[0].field, "document");

        let result = manager.validate_config_json(&json!({"backend": "laser"}));
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "backend");
        assert_eq!(manager.state(), ConfigState::Unconfigured);
    }

    #[test]
    fn test_type_errors_name_the_field() {
        let mut manager = ConfigurationManager::new();
        let err = manager.apply_config_json(&json!({"detail": "high"})).unwrap_err();
        let errors = err.field_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "detail");
        assert_eq!(errors[0].value, r#""high""#);
        assert_eq!(manager.state(), ConfigState::Unconfigured);
    }

    #[test]
    fn test_type_and_range_errors_reported_together() {
        let manager = ConfigurationManager::new();
        let result = manager.validate_config_json(&json!({
            "detail": "high",
            "stroke_width": -3.0,
            "multipass": {"pass_count": "many"}
        }));
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["detail", "multipass.pass_count", "stroke_width"]);
    }

    #[test]
    fn test_type_errors_in_algorithm_block_after_backend_switch() {
        let manager = ConfigurationManager::new();
        let result = manager.validate_config_json(&json!({
            "backend": "dots",
            "density": [1],
            "min_radius": 4.0,
            "max_radius": 1.0
        }));
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["density", "min_radius"]);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let mut manager = ConfigurationManager::new();
        manager
            .apply_config_json(&json!({"detail": 0.3, "future_option": {"x": 1}}))
            .unwrap();
        assert!((manager.config().detail - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_backend_switch_via_document() {
        let mut manager = ConfigurationManager::new();
        manager
            .apply_config_json(&json!({"backend": "Superpixel", "num_superpixels": 300}))
            .unwrap();
        match &manager.config().algorithm {
            AlgorithmConfig::Superpixel(s) => assert_eq!(s.num_superpixels, 300),
            other => panic!("unexpected algorithm block: {other:?}"),
        }
    }

    #[test]
    fn test_dot_size_range_rejects_inverted() {
        let mut manager = ConfigurationManager::new();
        manager.set_backend(TraceBackend::Dots).unwrap();
        let before = manager.current();

        let err = manager.set_dot_size_range(5.0, 2.0).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameter { ref field, .. } if field == "min_radius"));
        assert_eq!(*manager.current(), *before);

        manager.set_dot_size_range(1.0, 4.0).unwrap();
        match &manager.config().algorithm {
            AlgorithmConfig::Dots(d) => {
                assert!((d.min_radius - 1.0).abs() < f32::EPSILON);
                assert!((d.max_radius - 4.0).abs() < f32::EPSILON);
            }
            other => panic!("unexpected algorithm block: {other:?}"),
        }
    }

    #[test]
    fn test_dot_size_range_requires_dots_backend() {
        let mut manager = ConfigurationManager::new();
        assert!(matches!(
            manager.set_dot_size_range(1.0, 2.0),
            Err(ConfigError::InactiveBackend { .. })
        ));
    }

    #[test]
    fn test_setters_fail_fast() {
        let mut manager = ConfigurationManager::new();
        assert!(manager.set_detail(1.2).is_err());
        assert!(manager.set_pass_count(11).is_err());
        assert!(manager.set_pass_count(0).is_err());
        assert!(manager.set_stroke_width(0.0).is_err());
        assert!(manager.set_detail_levels(0.9, 0.1).is_err());
        assert_eq!(manager.state(), ConfigState::Unconfigured);

        manager.set_pass_count(4).unwrap();
        assert_eq!(manager.config().multipass.pass_count, 4);
        assert_eq!(manager.state(), ConfigState::Configured);
    }

    #[test]
    fn test_edge_dependency_setter() {
        let mut manager = ConfigurationManager::new();
        let err = manager
            .set_edge_settings(EdgeConfig {
                flow_tracing: true,
                ..EdgeConfig::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("flow_tracing"));
    }

    #[test]
    fn test_window_size_normalized_to_odd() {
        let mut manager = ConfigurationManager::new();
        manager
            .set_centerline_settings(CenterlineConfig {
                window_size: 20,
                ..CenterlineConfig::default()
            })
            .unwrap();
        match &manager.config().algorithm {
            AlgorithmConfig::Centerline(c) => assert_eq!(c.window_size, 21),
            other => panic!("unexpected algorithm block: {other:?}"),
        }

        manager
            .apply_config_json(&json!({"window_size": 50}))
            .unwrap();
        match &manager.config().algorithm {
            AlgorithmConfig::Centerline(c) => assert_eq!(c.window_size, 49),
            other => panic!("unexpected algorithm block: {other:?}"),
        }
    }

    #[test]
    fn test_custom_hand_drawn_promotes_preset() {
        let mut manager = ConfigurationManager::new();
        manager
            .set_custom_hand_drawn(Some(0.2), None, Some(0.5), None)
            .unwrap();
        assert_eq!(manager.config().hand_drawn.preset, HandDrawnPreset::Custom);
        let params = manager.config().hand_drawn.resolve().unwrap();
        assert!((params.tremor - 0.2).abs() < f32::EPSILON);
        assert!((params.tapering - 0.5).abs() < f32::EPSILON);

        assert!(manager.set_custom_hand_drawn(Some(0.9), None, None, None).is_err());
    }

    #[test]
    fn test_shorthands() {
        let mut manager = ConfigurationManager::new();
        manager
            .apply_config_json(&json!({"hand_drawn": "sketchy", "noise_filter": true}))
            .unwrap();
        assert_eq!(manager.config().hand_drawn.preset, HandDrawnPreset::Sketchy);
        assert!(manager.config().noise_filter.enabled);
    }

    #[test]
    fn test_reset() {
        let mut manager = ConfigurationManager::new();
        manager.load_preset("pointillism").unwrap();
        manager.reset();
        assert_eq!(manager.state(), ConfigState::Unconfigured);
        assert_eq!(manager.config().backend(), TraceBackend::Edge);
    }
}
