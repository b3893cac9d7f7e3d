//! Error taxonomy for the vectorization engine.
//!
//! Four classes of failure exist:
//! - configuration errors (see [`crate::config::ConfigError`]), always surfaced;
//! - capability errors, recovered by falling back to a weaker backend and
//!   kept as run diagnostics rather than returned;
//! - processing errors, fatal for the call and never retried;
//! - GPU transient errors, which trigger one fallback attempt before surfacing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::{ConfigError, TraceBackend};

// ---------------------------------------------------------------------------
// Processing errors
// ---------------------------------------------------------------------------

/// A tracing strategy could not produce geometry for the given pixels.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessingError {
    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("pixel buffer holds {actual} bytes, expected {expected} for a {width}x{height} RGBA image")]
    BufferSizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("image {width}x{height} exceeds the maximum dimension of {max} pixels")]
    ImageTooLarge { width: u32, height: u32, max: u32 },

    #[error("{algorithm} tracing failed: {reason}")]
    Strategy {
        algorithm: TraceBackend,
        reason: String,
    },

    #[error("processing exceeded its time budget of {budget_ms} ms after {elapsed_ms} ms")]
    TimeBudgetExceeded { budget_ms: u64, elapsed_ms: u64 },
}

// ---------------------------------------------------------------------------
// Diagnostic errors (threading / GPU)
// ---------------------------------------------------------------------------

/// Classification of a capability or GPU failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    SharedArrayBufferUnavailable,
    CrossOriginIsolationMissing,
    AtomicsUnavailable,
    WorkersUnavailable,
    GpuAdapterUnavailable,
    GpuDeviceRequestFailed,
    GpuTimeout,
    GpuDeviceLost,
}

impl DiagnosticKind {
    /// Expected slowdown when this failure forces a fallback
    /// (0.0 = no impact, 1.0 = severe).
    pub fn performance_impact(self) -> f32 {
        match self {
            DiagnosticKind::SharedArrayBufferUnavailable => 0.8,
            DiagnosticKind::CrossOriginIsolationMissing => 0.8,
            DiagnosticKind::AtomicsUnavailable => 0.7,
            DiagnosticKind::WorkersUnavailable => 0.9,
            DiagnosticKind::GpuAdapterUnavailable => 0.5,
            DiagnosticKind::GpuDeviceRequestFailed => 0.5,
            DiagnosticKind::GpuTimeout => 0.5,
            DiagnosticKind::GpuDeviceLost => 0.6,
        }
    }

    pub fn is_gpu(self) -> bool {
        matches!(
            self,
            DiagnosticKind::GpuAdapterUnavailable
                | DiagnosticKind::GpuDeviceRequestFailed
                | DiagnosticKind::GpuTimeout
                | DiagnosticKind::GpuDeviceLost
        )
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::SharedArrayBufferUnavailable => "SharedArrayBufferError",
            DiagnosticKind::CrossOriginIsolationMissing => "CrossOriginIsolationError",
            DiagnosticKind::AtomicsUnavailable => "AtomicsError",
            DiagnosticKind::WorkersUnavailable => "WorkerSupportError",
            DiagnosticKind::GpuAdapterUnavailable => "GpuAdapterError",
            DiagnosticKind::GpuDeviceRequestFailed => "GpuDeviceError",
            DiagnosticKind::GpuTimeout => "GpuTimeoutError",
            DiagnosticKind::GpuDeviceLost => "GpuDeviceLostError",
        };
        f.write_str(name)
    }
}

/// Structured description of a threading or GPU failure, with enough context
/// for a caller to act on it without re-running.
#[derive(Debug, Clone, Serialize, Error)]
#[error("{error_type}: {message}")]
pub struct DiagnosticError {
    pub error_type: DiagnosticKind,
    pub message: String,
    /// Ordered, most actionable first.
    pub recovery_suggestions: Vec<String>,
    pub attempted_solutions: Vec<String>,
    pub environment_info: serde_json::Value,
    pub recoverable: bool,
    pub performance_impact: f32,
    pub timestamp: DateTime<Utc>,
}

/// Failure to obtain multi-threading support.
pub type ThreadingError = DiagnosticError;

/// Failure to obtain or keep a GPU backend.
pub type GpuError = DiagnosticError;

impl DiagnosticError {
    pub fn new(error_type: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            recovery_suggestions: Vec::new(),
            attempted_solutions: Vec::new(),
            environment_info: serde_json::Value::Null,
            recoverable: true,
            performance_impact: error_type.performance_impact(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recovery_suggestions
            .extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn with_attempted(mut self, attempted: impl Into<String>) -> Self {
        self.attempted_solutions.push(attempted.into());
        self
    }

    pub fn with_environment(mut self, info: serde_json::Value) -> Self {
        self.environment_info = info;
        self
    }

    pub fn unrecoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// Threading failures are capability errors; GPU failures are transient.
    pub fn class(&self) -> ErrorClass {
        if self.error_type.is_gpu() {
            ErrorClass::GpuTransient
        } else {
            ErrorClass::Capability
        }
    }

    /// Name of the failure class, e.g. `CrossOriginIsolationError`.
    pub fn error_type(&self) -> String {
        self.error_type.to_string()
    }
}

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Coarse class of a [`VectorizeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorClass {
    Configuration,
    Capability,
    Processing,
    GpuTransient,
}

/// Error returned by the vectorize entry points.
#[derive(Debug, Error)]
pub enum VectorizeError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("GPU backend failed: {0}")]
    GpuTransient(DiagnosticError),
}

impl VectorizeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VectorizeError::Configuration(_) => ErrorClass::Configuration,
            VectorizeError::Processing(_) => ErrorClass::Processing,
            VectorizeError::GpuTransient(_) => ErrorClass::GpuTransient,
        }
    }

    /// GPU-transient errors can be recovered from by falling back to a weaker
    /// backend. Configuration and processing errors cannot.
    pub fn is_recoverable(&self) -> bool {
        match self {
            VectorizeError::GpuTransient(e) => e.recoverable,
            VectorizeError::Configuration(_) | VectorizeError::Processing(_) => false,
        }
    }
}
