//! GPU adapter/device acquisition.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::GpuBackend;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GpuProbeError {
    #[error("no {api} adapter found")]
    NoAdapter { api: GpuBackend },

    #[error("{api} device request failed: {reason}")]
    DeviceRequest { api: GpuBackend, reason: String },

    #[error("{api} device lost")]
    DeviceLost { api: GpuBackend },
}

/// Adapter details reported by a successful acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterDescription {
    pub name: String,
    pub driver_backend: String,
    pub device_type: String,
    pub estimated_memory_mb: Option<f64>,
}

/// Acquires a GPU adapter and device for one API and releases them again.
///
/// Implementations must not keep the device alive after returning.
#[async_trait]
pub trait GpuProbe: Send + Sync {
    async fn acquire(&self, api: GpuBackend) -> Result<AdapterDescription, GpuProbeError>;
}

/// [`GpuProbe`] backed by `wgpu`. WebGPU maps to the primary native
/// backends (Vulkan, Metal, DX12, browser WebGPU); WebGL2 maps to the GL backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct WgpuProbe;

impl WgpuProbe {
    pub fn new() -> Self {
        Self
    }

    fn backends_for(api: GpuBackend) -> Option<wgpu::Backends> {
        match api {
            GpuBackend::WebGpu => Some(wgpu::Backends::PRIMARY),
            GpuBackend::WebGl2 => Some(wgpu::Backends::GL),
            GpuBackend::None => None,
        }
    }
}

#[async_trait]
impl GpuProbe for WgpuProbe {
    async fn acquire(&self, api: GpuBackend) -> Result<AdapterDescription, GpuProbeError> {
        let backends = Self::backends_for(api).ok_or(GpuProbeError::NoAdapter { api })?;

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(GpuProbeError::NoAdapter { api })?;

        let info = adapter.get_info();
        let limits = adapter.limits();

        let (device, _queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("vectrace probe"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                        .using_resolution(limits.clone()),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| GpuProbeError::DeviceRequest {
                api,
                reason: e.to_string(),
            })?;
        drop(device);

        debug!(
            adapter = %info.name,
            driver = ?info.backend,
            device_type = ?info.device_type,
            "GPU device acquired and released"
        );

        Ok(AdapterDescription {
            name: info.name,
            driver_backend: format!("{:?}", info.backend),
            device_type: format!("{:?}", info.device_type),
            estimated_memory_mb: Some(limits.max_buffer_size as f64 / (1024.0 * 1024.0)),
        })
    }
}
