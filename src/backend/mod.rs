//! Execution backend resolution: GPU compute, GPU shading or CPU.

pub mod gpu;
mod selector;

pub use gpu::{AdapterDescription, GpuProbe, GpuProbeError, WgpuProbe};
pub use selector::BackendSelector;

use std::fmt;

use serde::{Deserialize, Serialize};

/// GPU API resolved by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpuBackend {
    WebGpu,
    WebGl2,
    None,
}

impl fmt::Display for GpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GpuBackend::WebGpu => "WebGPU",
            GpuBackend::WebGl2 => "WebGL2",
            GpuBackend::None => "none",
        };
        f.write_str(s)
    }
}

/// Backend a vectorize call actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingBackend {
    /// GPU compute.
    WebGpu,
    /// GPU-assisted shading.
    WebGl2,
    CpuSingleThreaded,
}

impl ProcessingBackend {
    pub fn is_gpu(self) -> bool {
        !matches!(self, ProcessingBackend::CpuSingleThreaded)
    }

    pub fn gpu_api(self) -> GpuBackend {
        match self {
            ProcessingBackend::WebGpu => GpuBackend::WebGpu,
            ProcessingBackend::WebGl2 => GpuBackend::WebGl2,
            ProcessingBackend::CpuSingleThreaded => GpuBackend::None,
        }
    }
}

impl From<GpuBackend> for ProcessingBackend {
    fn from(api: GpuBackend) -> Self {
        match api {
            GpuBackend::WebGpu => ProcessingBackend::WebGpu,
            GpuBackend::WebGl2 => ProcessingBackend::WebGl2,
            GpuBackend::None => ProcessingBackend::CpuSingleThreaded,
        }
    }
}

impl fmt::Display for ProcessingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingBackend::WebGpu => "webgpu",
            ProcessingBackend::WebGl2 => "webgl2",
            ProcessingBackend::CpuSingleThreaded => "cpu",
        };
        f.write_str(s)
    }
}

/// Outcome of GPU probing. Immutable; replaced only by a fresh probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuBackendInfo {
    pub backend: GpuBackend,
    pub available: bool,
    pub status_message: String,
    pub estimated_memory_mb: Option<f64>,
    pub adapter_info: String,
    pub webgpu_supported: bool,
    pub webgl2_supported: bool,
}

impl GpuBackendInfo {
    /// No GPU: the CPU backend is used.
    pub fn cpu(status_message: impl Into<String>) -> Self {
        Self {
            backend: GpuBackend::None,
            available: false,
            status_message: status_message.into(),
            estimated_memory_mb: None,
            adapter_info: "No GPU".to_string(),
            webgpu_supported: false,
            webgl2_supported: false,
        }
    }

    pub fn processing_backend(&self) -> ProcessingBackend {
        if self.available {
            self.backend.into()
        } else {
            ProcessingBackend::CpuSingleThreaded
        }
    }
}

/// Backend selection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub try_gpu_acceleration: bool,
    /// Upper bound for one adapter/device request.
    pub max_attempt_time_ms: u64,
    /// Keep every fallback candidate in the processing order, not just two.
    pub aggressive_fallback: bool,
    pub cache_backend_selection: bool,
    /// Images with fewer pixels skip GPU attempts.
    pub gpu_min_pixel_area: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            try_gpu_acceleration: true,
            max_attempt_time_ms: 10_000,
            aggressive_fallback: true,
            cache_backend_selection: true,
            gpu_min_pixel_area: 65_536,
        }
    }
}
