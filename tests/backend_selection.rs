use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vectrace::backend::{AdapterDescription, GpuProbe, GpuProbeError};
use vectrace::capability::{CapabilityProbe, HostSnapshot};
use vectrace::{BackendSelector, GpuBackend, ProcessingBackend, ProcessingConfig, TraceBackend};

struct ScriptedGpu {
    webgpu: bool,
    webgl2: bool,
    hang: bool,
    calls: AtomicUsize,
}

impl ScriptedGpu {
    fn new(webgpu: bool, webgl2: bool) -> Arc<Self> {
        Arc::new(Self {
            webgpu,
            webgl2,
            hang: false,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GpuProbe for ScriptedGpu {
    async fn acquire(&self, api: GpuBackend) -> Result<AdapterDescription, GpuProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let ok = match api {
            GpuBackend::WebGpu => self.webgpu,
            GpuBackend::WebGl2 => self.webgl2,
            GpuBackend::None => false,
        };
        if ok {
            Ok(AdapterDescription {
                name: "Scripted".into(),
                driver_backend: "Metal".into(),
                device_type: "IntegratedGpu".into(),
                estimated_memory_mb: Some(512.0),
            })
        } else {
            Err(GpuProbeError::NoAdapter { api })
        }
    }
}

fn browser(webgpu: bool, webgl2: bool) -> CapabilityProbe {
    CapabilityProbe::from_snapshot(HostSnapshot {
        webgpu,
        webgl2,
        ..HostSnapshot::isolated_browser()
    })
}

#[tokio::test]
async fn test_selection_never_returns_unavailable_backend() {
    for (caps_gpu, caps_gl, probe_gpu, probe_gl) in [
        (true, true, true, true),
        (true, true, false, true),
        (true, false, false, true),
        (false, true, true, true),
        (false, false, true, true),
    ] {
        let caps = browser(caps_gpu, caps_gl).probe();
        let mut selector = BackendSelector::new(ProcessingConfig::default(), ScriptedGpu::new(probe_gpu, probe_gl));
        let info = selector.select(&caps, TraceBackend::Edge, 1024, 1024).await;
        match info.processing_backend() {
            ProcessingBackend::WebGpu => assert!(caps.webgpu_supported && probe_gpu),
            ProcessingBackend::WebGl2 => {
                assert!(caps.webgl2_supported && probe_gl);
                assert!(!(caps.webgpu_supported && probe_gpu), "WebGPU preferred over WebGL2");
            }
            ProcessingBackend::CpuSingleThreaded => {}
        }
    }
}

#[tokio::test]
async fn test_gpu_disabled_skips_probing() {
    let gpu = ScriptedGpu::new(true, true);
    let config = ProcessingConfig {
        try_gpu_acceleration: false,
        ..ProcessingConfig::default()
    };
    let mut selector = BackendSelector::new(config, gpu.clone());
    let info = selector
        .select(&browser(true, true).probe(), TraceBackend::Dots, 4096, 4096)
        .await;
    assert_eq!(info.processing_backend(), ProcessingBackend::CpuSingleThreaded);
    assert_eq!(gpu.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_timeout_degrades_to_cpu() {
    let gpu = Arc::new(ScriptedGpu {
        webgpu: true,
        webgl2: true,
        hang: true,
        calls: AtomicUsize::new(0),
    });
    let config = ProcessingConfig {
        max_attempt_time_ms: 20,
        ..ProcessingConfig::default()
    };
    let mut selector = BackendSelector::new(config, gpu);
    let info = selector
        .select(&browser(true, true).probe(), TraceBackend::Superpixel, 1024, 1024)
        .await;
    assert!(!info.available);
    assert_eq!(info.processing_backend(), ProcessingBackend::CpuSingleThreaded);
}

#[tokio::test]
async fn test_cached_selection_and_reset() {
    let gpu = ScriptedGpu::new(true, false);
    let caps = browser(true, true).probe();
    let mut selector = BackendSelector::new(ProcessingConfig::default(), gpu.clone());

    selector.select(&caps, TraceBackend::Edge, 1024, 1024).await;
    selector.select(&caps, TraceBackend::Edge, 1024, 1024).await;
    assert_eq!(gpu.calls.load(Ordering::SeqCst), 1);

    selector.reset_gpu_backend();
    assert!(selector.gpu_info().is_none());
    selector.select(&caps, TraceBackend::Edge, 1024, 1024).await;
    assert_eq!(gpu.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_processing_order_ends_with_cpu() {
    let caps = browser(true, true).probe();
    let mut selector = BackendSelector::new(ProcessingConfig::default(), ScriptedGpu::new(true, true));
    selector.select(&caps, TraceBackend::Edge, 1024, 1024).await;
    assert_eq!(
        selector.processing_order(),
        vec![ProcessingBackend::WebGpu, ProcessingBackend::CpuSingleThreaded]
    );
    assert_eq!(
        selector.fallback_after(ProcessingBackend::WebGpu),
        ProcessingBackend::CpuSingleThreaded
    );

    selector.record_performance(ProcessingBackend::WebGpu, 12.0);
    selector.record_performance(ProcessingBackend::WebGpu, 18.0);
    assert_eq!(selector.average_time_ms(ProcessingBackend::WebGpu), Some(15.0));
    assert!(selector.performance_report().contains("webgpu"));
}
