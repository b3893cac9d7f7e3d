use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{
    AdapterDescription, GpuBackend, GpuBackendInfo, GpuProbe, GpuProbeError, ProcessingBackend,
    ProcessingConfig, WgpuProbe,
};
use crate::capability::CapabilityReport;
use crate::config::TraceBackend;
use crate::error::{DiagnosticError, DiagnosticKind, GpuError};

/// Number of timings kept per backend.
const PERFORMANCE_HISTORY: usize = 10;

/// Resolves the execution backend for a vectorize call.
///
/// Preference is WebGPU, then WebGL2, then CPU. GPU failures and timeouts
/// degrade to the next candidate; selection itself never fails.
pub struct BackendSelector {
    config: ProcessingConfig,
    gpu: Arc<dyn GpuProbe>,
    cached: Option<GpuBackendInfo>,
    last_successful: Option<ProcessingBackend>,
    timings: HashMap<ProcessingBackend, VecDeque<f64>>,
}

impl BackendSelector {
    pub fn new(config: ProcessingConfig, gpu: Arc<dyn GpuProbe>) -> Self {
        Self {
            config,
            gpu,
            cached: None,
            last_successful: None,
            timings: HashMap::new(),
        }
    }

    /// Selector backed by the `wgpu` adapter probe.
    pub fn with_wgpu(config: ProcessingConfig) -> Self {
        Self::new(config, Arc::new(WgpuProbe::new()))
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Cached probe result, if any.
    pub fn gpu_info(&self) -> Option<&GpuBackendInfo> {
        self.cached.as_ref()
    }

    /// True when GPU dispatch would cost more than it saves: GPU disabled,
    /// a small image, or an algorithm without a GPU kernel.
    pub fn skips_gpu(&self, algorithm: TraceBackend, width: u32, height: u32) -> bool {
        let area = u64::from(width) * u64::from(height);
        !self.config.try_gpu_acceleration
            || area < self.config.gpu_min_pixel_area
            || !has_gpu_kernel(algorithm)
    }

    /// Resolve the backend for one call. Never returns a backend the report
    /// marks unavailable.
    pub async fn select(
        &mut self,
        caps: &CapabilityReport,
        algorithm: TraceBackend,
        width: u32,
        height: u32,
    ) -> GpuBackendInfo {
        if !self.config.try_gpu_acceleration {
            debug!("GPU acceleration disabled; using CPU");
            return GpuBackendInfo::cpu("GPU backend not available");
        }
        if self.skips_gpu(algorithm, width, height) {
            debug!(%algorithm, width, height, "GPU skipped by size/algorithm heuristic");
            return GpuBackendInfo::cpu("GPU skipped: small image or no GPU kernel for algorithm");
        }

        if self.config.cache_backend_selection {
            if let Some(cached) = &self.cached {
                if consistent_with(cached, caps) {
                    debug!(backend = %cached.backend, "reusing cached GPU selection");
                    return cached.clone();
                }
                debug!("cached GPU selection no longer matches capabilities; re-probing");
            }
        }

        let info = self.probe_gpu(caps).await;
        info!(
            backend = %info.backend,
            available = info.available,
            adapter = %info.adapter_info,
            "GPU backend resolved"
        );
        if self.config.cache_backend_selection {
            self.cached = Some(info.clone());
        }
        info
    }

    async fn probe_gpu(&self, caps: &CapabilityReport) -> GpuBackendInfo {
        for api in [GpuBackend::WebGpu, GpuBackend::WebGl2] {
            let supported = match api {
                GpuBackend::WebGpu => caps.webgpu_supported,
                GpuBackend::WebGl2 => caps.webgl2_supported,
                GpuBackend::None => false,
            };
            if !supported {
                continue;
            }
            match self.acquire_api(api).await {
                Ok(adapter) => {
                    return GpuBackendInfo {
                        backend: api,
                        available: true,
                        status_message: format!("{api} initialized successfully"),
                        estimated_memory_mb: adapter.estimated_memory_mb,
                        adapter_info: format!("{} ({}, {})", adapter.name, adapter.driver_backend, adapter.device_type),
                        webgpu_supported: caps.webgpu_supported,
                        webgl2_supported: caps.webgl2_supported,
                    };
                }
                Err(e) => warn!(%api, error = %e, "GPU backend unavailable, trying next"),
            }
        }

        GpuBackendInfo {
            webgpu_supported: caps.webgpu_supported,
            webgl2_supported: caps.webgl2_supported,
            ..GpuBackendInfo::cpu("No GPU acceleration available")
        }
    }

    async fn acquire_api(&self, api: GpuBackend) -> Result<AdapterDescription, GpuError> {
        let limit = Duration::from_millis(self.config.max_attempt_time_ms);
        match timeout(limit, self.gpu.acquire(api)).await {
            Ok(Ok(adapter)) => Ok(adapter),
            Ok(Err(e)) => Err(gpu_error(api, e)),
            Err(_) => Err(DiagnosticError::new(
                DiagnosticKind::GpuTimeout,
                format!("{api} request exceeded {} ms", self.config.max_attempt_time_ms),
            )
            .with_attempted(format!("{api} adapter request"))
            .with_suggestions(["Increase max_attempt_time_ms", "Disable GPU acceleration"])),
        }
    }

    /// Acquire the device for `backend` at the start of a run. The CPU backend
    /// always succeeds.
    pub async fn acquire(&self, backend: ProcessingBackend) -> Result<(), GpuError> {
        match backend.gpu_api() {
            GpuBackend::None => Ok(()),
            api => self.acquire_api(api).await.map(|_| ()),
        }
    }

    /// Forget the cached GPU selection; the next `select` re-probes.
    pub fn reset_gpu_backend(&mut self) {
        self.cached = None;
        self.last_successful = None;
        info!("GPU backend selection reset");
    }

    /// Backends to try, in order: last successful (when caching), the
    /// available GPU backend, then CPU. CPU is always present. Without
    /// aggressive fallback only the first candidate and CPU remain.
    pub fn processing_order(&self) -> Vec<ProcessingBackend> {
        let mut order = Vec::new();
        if self.config.cache_backend_selection {
            if let Some(last) = self.last_successful {
                order.push(last);
            }
        }
        if let Some(info) = self.cached.as_ref().filter(|i| i.available) {
            let gpu = info.processing_backend();
            if !order.contains(&gpu) {
                order.push(gpu);
            }
        }
        if !self.config.aggressive_fallback {
            order.truncate(1);
        }
        if !order.contains(&ProcessingBackend::CpuSingleThreaded) {
            order.push(ProcessingBackend::CpuSingleThreaded);
        }
        order
    }

    /// Next candidate after `failed` in the processing order.
    pub fn fallback_after(&self, failed: ProcessingBackend) -> ProcessingBackend {
        let order = self.processing_order();
        order
            .iter()
            .skip_while(|b| **b != failed)
            .nth(1)
            .or_else(|| order.iter().find(|b| **b != failed))
            .copied()
            .unwrap_or(ProcessingBackend::CpuSingleThreaded)
    }

    pub fn record_success(&mut self, backend: ProcessingBackend) {
        self.last_successful = Some(backend);
    }

    pub fn last_successful(&self) -> Option<ProcessingBackend> {
        self.last_successful
    }

    pub fn record_performance(&mut self, backend: ProcessingBackend, elapsed_ms: f64) {
        let history = self.timings.entry(backend).or_default();
        history.push_back(elapsed_ms);
        while history.len() > PERFORMANCE_HISTORY {
            history.pop_front();
        }
    }

    pub fn average_time_ms(&self, backend: ProcessingBackend) -> Option<f64> {
        let history = self.timings.get(&backend)?;
        if history.is_empty() {
            return None;
        }
        Some(history.iter().sum::<f64>() / history.len() as f64)
    }

    pub fn performance_report(&self) -> String {
        let mut out = String::from("Backend performance (last 10 runs)\n");
        let mut any = false;
        for backend in [
            ProcessingBackend::WebGpu,
            ProcessingBackend::WebGl2,
            ProcessingBackend::CpuSingleThreaded,
        ] {
            let Some(history) = self.timings.get(&backend).filter(|h| !h.is_empty()) else {
                continue;
            };
            any = true;
            let avg = history.iter().sum::<f64>() / history.len() as f64;
            let min = history.iter().copied().fold(f64::INFINITY, f64::min);
            let max = history.iter().copied().fold(0.0, f64::max);
            let _ = writeln!(
                out,
                "  {:<8} runs={:<2} avg={:.1}ms min={:.1}ms max={:.1}ms",
                backend.to_string(),
                history.len(),
                avg,
                min,
                max
            );
        }
        if !any {
            out.push_str("  no runs recorded\n");
        }
        if let Some(last) = self.last_successful {
            let _ = writeln!(out, "  last successful: {last}");
        }
        out
    }

    pub fn capability_report_text(&self, caps: &CapabilityReport) -> String {
        let supported = |b: bool| if b { "supported" } else { "not supported" };
        let mut out = String::from("GPU Capability Report\n=====================\n");
        let _ = writeln!(out, "WebGPU: {}", supported(caps.webgpu_supported));
        let _ = writeln!(out, "WebGL2: {}", supported(caps.webgl2_supported));
        match &self.cached {
            Some(info) => {
                let _ = writeln!(out, "Selected backend: {}", info.backend);
                let _ = writeln!(out, "Status: {}", info.status_message);
                let _ = writeln!(out, "Adapter: {}", info.adapter_info);
                if let Some(mb) = info.estimated_memory_mb {
                    let _ = writeln!(out, "Estimated memory: {mb:.0} MB");
                }
            }
            None => {
                let _ = writeln!(out, "Selected backend: not probed yet");
            }
        }
        let mut chain = Vec::new();
        if caps.webgpu_supported {
            chain.push("WebGPU");
        }
        if caps.webgl2_supported {
            chain.push("WebGL2");
        }
        chain.push("CPU");
        let _ = writeln!(out, "Recommended processing chain: {}", chain.join(" -> "));
        out
    }
}

fn has_gpu_kernel(algorithm: TraceBackend) -> bool {
    !matches!(algorithm, TraceBackend::Centerline)
}

fn consistent_with(info: &GpuBackendInfo, caps: &CapabilityReport) -> bool {
    match info.backend {
        GpuBackend::WebGpu => caps.webgpu_supported,
        GpuBackend::WebGl2 => caps.webgl2_supported,
        GpuBackend::None => {
            info.webgpu_supported == caps.webgpu_supported
                && info.webgl2_supported == caps.webgl2_supported
        }
    }
}

fn gpu_error(api: GpuBackend, err: GpuProbeError) -> GpuError {
    let kind = match err {
        GpuProbeError::NoAdapter { .. } => DiagnosticKind::GpuAdapterUnavailable,
        GpuProbeError::DeviceRequest { .. } => DiagnosticKind::GpuDeviceRequestFailed,
        GpuProbeError::DeviceLost { .. } => DiagnosticKind::GpuDeviceLost,
    };
    DiagnosticError::new(kind, err.to_string())
        .with_attempted(format!("{api} adapter and device request"))
        .with_suggestions([
            "Update graphics drivers",
            "Enable hardware acceleration in the host",
            "Continue on the CPU backend",
        ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{HostSnapshot, SnapshotHost};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGpu {
        webgpu: bool,
        webgl2: bool,
        delay_ms: u64,
        calls: AtomicUsize,
    }

    impl FakeGpu {
        fn new(webgpu: bool, webgl2: bool) -> Arc<Self> {
            Arc::new(Self {
                webgpu,
                webgl2,
                delay_ms: 0,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GpuProbe for FakeGpu {
        async fn acquire(&self, api: GpuBackend) -> Result<AdapterDescription, GpuProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let ok = match api {
                GpuBackend::WebGpu => self.webgpu,
                GpuBackend::WebGl2 => self.webgl2,
                GpuBackend::None => false,
            };
            if ok {
                Ok(AdapterDescription {
                    name: "Fake Adapter".into(),
                    driver_backend: "Vulkan".into(),
                    device_type: "DiscreteGpu".into(),
                    estimated_memory_mb: Some(256.0),
                })
            } else {
                Err(GpuProbeError::NoAdapter { api })
            }
        }
    }

    fn caps(webgpu: bool, webgl2: bool) -> CapabilityReport {
        CapabilityReport::from_host(&SnapshotHost::new(HostSnapshot {
            webgpu,
            webgl2,
            ..HostSnapshot::isolated_browser()
        }))
    }

    #[tokio::test]
    async fn test_prefers_webgpu() {
        let mut selector = BackendSelector::new(ProcessingConfig::default(), FakeGpu::new(true, true));
        let info = selector.select(&caps(true, true), TraceBackend::Edge, 512, 512).await;
        assert_eq!(info.backend, GpuBackend::WebGpu);
        assert!(info.available);
        assert_eq!(info.status_message, "WebGPU initialized successfully");
    }

    #[tokio::test]
    async fn test_falls_back_to_webgl2_then_cpu() {
        let mut selector = BackendSelector::new(ProcessingConfig::default(), FakeGpu::new(false, true));
        let info = selector.select(&caps(true, true), TraceBackend::Dots, 512, 512).await;
        assert_eq!(info.backend, GpuBackend::WebGl2);

        let mut selector = BackendSelector::new(ProcessingConfig::default(), FakeGpu::new(false, false));
        let info = selector.select(&caps(true, true), TraceBackend::Dots, 512, 512).await;
        assert_eq!(info.processing_backend(), ProcessingBackend::CpuSingleThreaded);
        assert_eq!(info.status_message, "No GPU acceleration available");
    }

    #[tokio::test]
    async fn test_never_selects_unreported_backend() {
        let gpu = FakeGpu::new(true, true);
        let mut selector = BackendSelector::new(ProcessingConfig::default(), gpu.clone());
        let info = selector.select(&caps(false, true), TraceBackend::Edge, 512, 512).await;
        assert_eq!(info.backend, GpuBackend::WebGl2);
        assert_eq!(gpu.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_small_images_and_centerline_skip_gpu() {
        let gpu = FakeGpu::new(true, true);
        let mut selector = BackendSelector::new(ProcessingConfig::default(), gpu.clone());
        let caps = caps(true, true);

        let small = selector.select(&caps, TraceBackend::Edge, 100, 100).await;
        assert_eq!(small.processing_backend(), ProcessingBackend::CpuSingleThreaded);

        let centerline = selector.select(&caps, TraceBackend::Centerline, 1024, 1024).await;
        assert_eq!(centerline.processing_backend(), ProcessingBackend::CpuSingleThreaded);

        assert_eq!(gpu.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_selection_is_cached_until_reset() {
        let gpu = FakeGpu::new(true, false);
        let mut selector = BackendSelector::new(ProcessingConfig::default(), gpu.clone());
        let caps = caps(true, false);

        selector.select(&caps, TraceBackend::Edge, 512, 512).await;
        selector.select(&caps, TraceBackend::Edge, 512, 512).await;
        assert_eq!(gpu.calls.load(Ordering::SeqCst), 1);

        selector.reset_gpu_backend();
        assert!(selector.gpu_info().is_none());
        selector.select(&caps, TraceBackend::Edge, 512, 512).await;
        assert_eq!(gpu.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_cpu() {
        let gpu = Arc::new(FakeGpu {
            webgpu: true,
            webgl2: false,
            delay_ms: 200,
            calls: AtomicUsize::new(0),
        });
        let config = ProcessingConfig {
            max_attempt_time_ms: 10,
            ..ProcessingConfig::default()
        };
        let mut selector = BackendSelector::new(config, gpu);
        let info = selector.select(&caps(true, false), TraceBackend::Edge, 512, 512).await;
        assert_eq!(info.processing_backend(), ProcessingBackend::CpuSingleThreaded);

        let err = selector.acquire(ProcessingBackend::WebGpu).await.unwrap_err();
        assert_eq!(err.error_type, DiagnosticKind::GpuTimeout);
    }

    #[tokio::test]
    async fn test_gpu_disabled() {
        let gpu = FakeGpu::new(true, true);
        let config = ProcessingConfig {
            try_gpu_acceleration: false,
            ..ProcessingConfig::default()
        };
        let mut selector = BackendSelector::new(config, gpu.clone());
        let info = selector.select(&caps(true, true), TraceBackend::Edge, 2048, 2048).await;
        assert!(!info.available);
        assert_eq!(gpu.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_processing_order() {
        let mut selector = BackendSelector::new(ProcessingConfig::default(), FakeGpu::new(true, true));
        assert_eq!(selector.processing_order(), vec![ProcessingBackend::CpuSingleThreaded]);

        selector.select(&caps(true, true), TraceBackend::Edge, 512, 512).await;
        assert_eq!(
            selector.processing_order(),
            vec![ProcessingBackend::WebGpu, ProcessingBackend::CpuSingleThreaded]
        );
        assert_eq!(
            selector.fallback_after(ProcessingBackend::WebGpu),
            ProcessingBackend::CpuSingleThreaded
        );

        selector.record_success(ProcessingBackend::WebGl2);
        assert_eq!(
            selector.processing_order(),
            vec![
                ProcessingBackend::WebGl2,
                ProcessingBackend::WebGpu,
                ProcessingBackend::CpuSingleThreaded
            ]
        );
    }

    #[tokio::test]
    async fn test_processing_order_without_aggressive_fallback() {
        let config = ProcessingConfig {
            aggressive_fallback: false,
            ..ProcessingConfig::default()
        };
        let mut selector = BackendSelector::new(config, FakeGpu::new(true, true));
        selector.select(&caps(true, true), TraceBackend::Edge, 512, 512).await;
        selector.record_success(ProcessingBackend::WebGl2);
        assert_eq!(
            selector.processing_order(),
            vec![ProcessingBackend::WebGl2, ProcessingBackend::CpuSingleThreaded]
        );
    }

    #[test]
    fn test_performance_history_is_bounded() {
        let mut selector = BackendSelector::new(ProcessingConfig::default(), FakeGpu::new(false, false));
        for i in 0..15 {
            selector.record_performance(ProcessingBackend::CpuSingleThreaded, i as f64);
        }
        // Last ten: 5..=14
        let avg = selector.average_time_ms(ProcessingBackend::CpuSingleThreaded).unwrap();
        assert!((avg - 9.5).abs() < 1e-9);
        assert!(selector.average_time_ms(ProcessingBackend::WebGpu).is_none());

        let report = selector.performance_report();
        assert!(report.contains("cpu"));
        assert!(report.contains("runs=10"));
    }

    #[test]
    fn test_capability_report_text() {
        let selector = BackendSelector::new(ProcessingConfig::default(), FakeGpu::new(false, false));
        let text = selector.capability_report_text(&caps(false, true));
        assert!(text.contains("WebGPU: not supported"));
        assert!(text.contains("WebGL2: supported"));
        assert!(text.contains("Recommended processing chain: WebGL2 -> CPU"));
    }
}
