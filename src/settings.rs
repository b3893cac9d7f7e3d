//! Engine settings file (TOML).
//!
//! Separate from per-call [`VectorizationConfig`](crate::config::VectorizationConfig)
//! documents: these settings describe the host process (backend policy,
//! logging, output defaults) and are read once at startup.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::ProcessingConfig;

/// Environment variable naming an explicit settings file.
pub const SETTINGS_ENV: &str = "VECTRACE_CONFIG";

/// Settings file looked up in the working directory.
pub const LOCAL_SETTINGS_FILE: &str = "vectrace.toml";

// ---------------------------------------------------------------------------
// Top-level settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

impl EngineSettings {
    /// Load settings from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file: {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings file: {}", path.display()))?;
        info!(path = %path.display(), "loaded engine settings");
        Ok(settings)
    }

    /// Try, in order:
    /// 1. The path in `VECTRACE_CONFIG`.
    /// 2. `./vectrace.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        // 1. Environment variable override.
        if let Ok(env_path) = std::env::var(SETTINGS_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(settings) => return settings,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "VECTRACE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        // 2. Working directory.
        let local = Path::new(LOCAL_SETTINGS_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(settings) => return settings,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "settings file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        // 3. Defaults.
        debug!("no settings file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter applied once settings are read, unless `RUST_LOG` is set.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Preset applied before any per-call configuration.
    pub default_preset: Option<String>,
    /// Overrides the configuration's `svg_precision` when set.
    pub svg_precision: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_sane() {
        let settings = EngineSettings::default();
        assert!(settings.processing.try_gpu_acceleration);
        assert_eq!(settings.processing.max_attempt_time_ms, 10_000);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.output.default_preset.is_none());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[processing]
try_gpu_acceleration = false
gpu_min_pixel_area = 1024

[output]
default_preset = "sketch"
"#;
        let settings: EngineSettings = toml::from_str(toml_str).unwrap();
        assert!(!settings.processing.try_gpu_acceleration);
        assert_eq!(settings.processing.gpu_min_pixel_area, 1024);
        assert!(settings.processing.aggressive_fallback);
        assert_eq!(settings.output.default_preset.as_deref(), Some("sketch"));
        assert_eq!(settings.logging, LoggingSettings::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let settings = EngineSettings::load(file.path()).unwrap();
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[processing]\ntry_gpu_acceleration = \"maybe\"").unwrap();
        let err = EngineSettings::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse settings file"));
    }
}
