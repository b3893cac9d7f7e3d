//! vectrace -- raster-to-SVG tracing with capability-aware backend selection.
//!
//! This crate provides the host capability probe, GPU/CPU backend selection,
//! the validated configuration layer, four tracing algorithms, multipass
//! orchestration, post-processing and SVG output.

pub mod backend;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod postprocess;
pub mod progress;
pub mod settings;
pub mod svg;
pub mod trace;

pub use backend::{BackendSelector, GpuBackend, GpuBackendInfo, ProcessingBackend, ProcessingConfig};
pub use capability::{CapabilityProbe, CapabilityReport, EnvironmentType};
pub use config::{ConfigError, ConfigurationManager, TraceBackend, VectorizationConfig};
pub use engine::{RunReport, VectorizeOutput, Vectorizer};
pub use error::{DiagnosticError, ProcessingError, VectorizeError};
pub use progress::{Progress, ProgressStage};
pub use settings::EngineSettings;
pub use trace::PixelBuffer;
