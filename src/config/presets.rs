use super::{
    AlgorithmConfig, CenterlineConfig, ConfigError, DotsConfig, EdgeConfig, HandDrawnConfig,
    HandDrawnPreset, MultipassConfig, NoiseFilterConfig, SuperpixelConfig, VectorizationConfig,
};

/// Names accepted by [`preset`].
pub const PRESET_NAMES: [&str; 6] = [
    "line_art",
    "sketch",
    "technical",
    "stippling",
    "pointillism",
    "regions",
];

/// Build the named preset configuration.
pub fn preset(name: &str) -> Result<VectorizationConfig, ConfigError> {
    let base = VectorizationConfig::default();
    let config = match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "line_art" => VectorizationConfig {
            algorithm: AlgorithmConfig::Edge(EdgeConfig::default()),
            detail: 0.4,
            stroke_width: 1.2,
            ..base
        },
        "sketch" => VectorizationConfig {
            algorithm: AlgorithmConfig::Edge(EdgeConfig::default()),
            detail: 0.35,
            stroke_width: 1.5,
            multipass: MultipassConfig {
                enabled: true,
                pass_count: 2,
                ..MultipassConfig::default()
            },
            noise_filter: NoiseFilterConfig {
                enabled: true,
                ..NoiseFilterConfig::default()
            },
            hand_drawn: HandDrawnConfig::from_preset(HandDrawnPreset::Medium),
            ..base
        },
        "technical" => VectorizationConfig {
            algorithm: AlgorithmConfig::Centerline(CenterlineConfig {
                adaptive_threshold: true,
                window_size: 25,
                sensitivity_k: 0.3,
                ..CenterlineConfig::default()
            }),
            detail: 0.6,
            stroke_width: 1.0,
            multipass: MultipassConfig {
                enabled: true,
                pass_count: 3,
                reverse_pass: true,
                diagonal_pass: true,
                ..MultipassConfig::default()
            },
            ..base
        },
        "stippling" => VectorizationConfig {
            algorithm: AlgorithmConfig::Dots(DotsConfig {
                density: 0.05,
                min_radius: 0.3,
                max_radius: 1.0,
                ..DotsConfig::default()
            }),
            detail: 0.3,
            ..base
        },
        "pointillism" => VectorizationConfig {
            algorithm: AlgorithmConfig::Dots(DotsConfig {
                density: 0.15,
                min_radius: 1.0,
                max_radius: 4.0,
                preserve_colors: true,
                ..DotsConfig::default()
            }),
            detail: 0.4,
            ..base
        },
        "regions" => VectorizationConfig {
            algorithm: AlgorithmConfig::Superpixel(SuperpixelConfig {
                fill_regions: true,
                stroke_regions: false,
                ..SuperpixelConfig::default()
            }),
            detail: 0.5,
            ..base
        },
        _ => {
            return Err(ConfigError::UnknownPreset {
                name: name.to_string(),
                available: PRESET_NAMES.join(", "),
            })
        }
    };
    Ok(config)
}
