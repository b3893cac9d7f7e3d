//! The vectorization facade.
//!
//! [`Vectorizer`] owns the configuration manager, the capability probe and
//! the backend selector, and runs one image at a time through
//! `validate → select backend → orchestrate passes → render SVG`.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::{BackendSelector, ProcessingBackend};
use crate::capability::{CapabilityProbe, EnvironmentType};
use crate::config::{ConfigError, ConfigurationManager, TraceBackend, VectorizationConfig};
use crate::error::{DiagnosticError, ProcessingError, VectorizeError};
use crate::pipeline::{OrchestrationReport, PassOrchestrator};
use crate::progress::{ProgressCallback, ProgressReporter, ProgressStage};
use crate::settings::{EngineSettings, OutputSettings};
use crate::svg;
use crate::trace::PixelBuffer;

/// Everything known about one finished vectorize call.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub algorithm: TraceBackend,
    pub backend: ProcessingBackend,
    pub elapsed_ms: f64,
    pub svg_size: usize,
    pub orchestration: OrchestrationReport,
    /// Capability and GPU failures that were recovered from during the run.
    pub diagnostics: Vec<DiagnosticError>,
}

#[derive(Debug, Clone)]
pub struct VectorizeOutput {
    pub svg: String,
    pub report: RunReport,
}

pub struct Vectorizer {
    config: ConfigurationManager,
    capabilities: CapabilityProbe,
    selector: BackendSelector,
    output: OutputSettings,
}

impl Vectorizer {
    pub fn new(config: ConfigurationManager, capabilities: CapabilityProbe, selector: BackendSelector) -> Self {
        Self {
            config,
            capabilities,
            selector,
            output: OutputSettings::default(),
        }
    }

    /// Native probe, `wgpu` selector and the settings' default preset.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, ConfigError> {
        Self::with_probe(settings, CapabilityProbe::native(), BackendSelector::with_wgpu(settings.processing.clone()))
    }

    /// Like [`from_settings`](Self::from_settings) with injected probe and selector.
    pub fn with_probe(
        settings: &EngineSettings,
        capabilities: CapabilityProbe,
        selector: BackendSelector,
    ) -> Result<Self, ConfigError> {
        let mut config = ConfigurationManager::new();
        if let Some(name) = &settings.output.default_preset {
            config.load_preset(name)?;
        }
        let mut vectorizer = Self::new(config, capabilities, selector);
        vectorizer.output = settings.output.clone();
        Ok(vectorizer)
    }

    pub fn config(&self) -> &ConfigurationManager {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigurationManager {
        &mut self.config
    }

    pub fn capabilities(&self) -> &CapabilityProbe {
        &self.capabilities
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    // -----------------------------------------------------------------------
    // Vectorize entry points
    // -----------------------------------------------------------------------

    /// Trace on the cached backend selection, or the CPU when nothing has
    /// been selected yet. Never probes.
    pub fn vectorize(
        &mut self,
        pixels: &PixelBuffer,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<String, VectorizeError> {
        self.vectorize_detailed(pixels, progress).map(|out| out.svg)
    }

    pub fn vectorize_detailed(
        &mut self,
        pixels: &PixelBuffer,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<VectorizeOutput, VectorizeError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("vectorize", %run_id, mode = "sync");
        let _guard = span.enter();

        let config = self.config.validated()?;
        check_dimensions(&config, pixels)?;
        let mut reporter = ProgressReporter::new(progress);
        reporter.emit(ProgressStage::Initializing, 0, "Validating configuration");

        let backend = self
            .selector
            .gpu_info()
            .filter(|info| info.available)
            .filter(|_| !self.selector.skips_gpu(config.backend(), pixels.width(), pixels.height()))
            .map(|info| info.processing_backend())
            .unwrap_or(ProcessingBackend::CpuSingleThreaded);

        // Only a report that is already cached is consulted.
        let mut diagnostics = Vec::new();
        if self.capabilities.is_cached() {
            diagnostics.extend(self.threading_diagnostic());
        }

        self.execute(run_id, &config, pixels, backend, reporter, diagnostics)
    }

    /// Probe capabilities, select a GPU backend when one helps, and trace.
    pub async fn vectorize_gpu(
        &mut self,
        pixels: &PixelBuffer,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<String, VectorizeError> {
        self.vectorize_gpu_detailed(pixels, progress)
            .await
            .map(|out| out.svg)
    }

    pub async fn vectorize_gpu_detailed(
        &mut self,
        pixels: &PixelBuffer,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<VectorizeOutput, VectorizeError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("vectorize", %run_id, mode = "gpu");
        self.run_gpu(run_id, pixels, progress).instrument(span).await
    }

    async fn run_gpu(
        &mut self,
        run_id: Uuid,
        pixels: &PixelBuffer,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<VectorizeOutput, VectorizeError> {
        let config = self.config.validated()?;
        check_dimensions(&config, pixels)?;
        let mut reporter = ProgressReporter::new(progress);
        reporter.emit(ProgressStage::Initializing, 0, "Selecting processing backend");

        let mut diagnostics: Vec<DiagnosticError> = self.threading_diagnostic().into_iter().collect();
        let backend = self.acquire_backend(&config, pixels, &mut diagnostics).await?;
        self.execute(run_id, &config, pixels, backend, reporter, diagnostics)
    }

    /// Select and acquire a backend. A failed acquisition falls back exactly
    /// once; a second failure surfaces as [`VectorizeError::GpuTransient`].
    async fn acquire_backend(
        &mut self,
        config: &VectorizationConfig,
        pixels: &PixelBuffer,
        diagnostics: &mut Vec<DiagnosticError>,
    ) -> Result<ProcessingBackend, VectorizeError> {
        let caps = self.capabilities.probe();
        let info = self
            .selector
            .select(&caps, config.backend(), pixels.width(), pixels.height())
            .await;
        let backend = info.processing_backend();

        let Err(err) = self.selector.acquire(backend).await else {
            return Ok(backend);
        };
        let fallback = self.selector.fallback_after(backend);
        warn!(
            failed = %backend,
            fallback = %fallback,
            class = ?err.class(),
            error = %err,
            "backend acquisition failed, falling back"
        );
        diagnostics.push(err);
        match self.selector.acquire(fallback).await {
            Ok(()) => Ok(fallback),
            Err(err) => Err(VectorizeError::GpuTransient(err)),
        }
    }

    fn threading_diagnostic(&self) -> Option<DiagnosticError> {
        let err = self.capabilities.threading_error()?;
        warn!(class = ?err.class(), error = %err, "multi-threading unavailable, running single-threaded");
        Some(err)
    }

    fn execute(
        &mut self,
        run_id: Uuid,
        config: &VectorizationConfig,
        pixels: &PixelBuffer,
        backend: ProcessingBackend,
        mut reporter: ProgressReporter<'_>,
        diagnostics: Vec<DiagnosticError>,
    ) -> Result<VectorizeOutput, VectorizeError> {
        let started = Instant::now();
        info!(
            algorithm = %config.backend(),
            %backend,
            width = pixels.width(),
            height = pixels.height(),
            "vectorize started"
        );

        let orchestrated = PassOrchestrator::new(config, backend).run(pixels, &mut reporter)?;

        reporter.emit(ProgressStage::Rendering, 95, "Rendering SVG");
        let precision = self.output.svg_precision.unwrap_or(config.svg_precision);
        let svg = svg::render(&orchestrated.paths, precision);
        reporter.complete(svg.len());

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.selector.record_performance(backend, elapsed_ms);
        self.selector.record_success(backend);
        info!(
            paths = orchestrated.paths.len(),
            svg_bytes = svg.len(),
            elapsed_ms = elapsed_ms as u64,
            "vectorize finished"
        );

        Ok(VectorizeOutput {
            report: RunReport {
                run_id,
                algorithm: config.backend(),
                backend,
                elapsed_ms,
                svg_size: svg.len(),
                orchestration: orchestrated.report,
                diagnostics,
            },
            svg,
        })
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    pub fn environment_type(&self) -> EnvironmentType {
        self.capabilities.environment_type()
    }

    pub fn missing_requirements(&self) -> Vec<String> {
        self.capabilities.missing_requirements()
    }

    pub fn capability_summary(&self) -> String {
        self.capabilities.summary()
    }

    pub fn recommendations(&self) -> Vec<String> {
        self.capabilities.recommendations()
    }

    pub fn gpu_capability_report(&self) -> String {
        self.selector.capability_report_text(&self.capabilities.probe())
    }

    pub fn performance_report(&self) -> String {
        self.selector.performance_report()
    }

    /// Re-probe the host on the next query.
    pub fn refresh_capabilities(&mut self) {
        self.capabilities.refresh();
    }

    pub fn reset_gpu_backend(&mut self) {
        self.selector.reset_gpu_backend();
    }
}

fn check_dimensions(config: &VectorizationConfig, pixels: &PixelBuffer) -> Result<(), ProcessingError> {
    let max = config.max_image_size;
    if pixels.width() > max || pixels.height() > max {
        return Err(ProcessingError::ImageTooLarge {
            width: pixels.width(),
            height: pixels.height(),
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AdapterDescription, GpuBackend, GpuProbe, GpuProbeError, ProcessingConfig};
    use crate::capability::HostSnapshot;
    use crate::error::ErrorClass;
    use crate::progress::Progress;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Succeeds for the first `ok_calls` acquisitions, then fails.
    struct FlakyGpu {
        ok_calls: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GpuProbe for FlakyGpu {
        async fn acquire(&self, api: GpuBackend) -> Result<AdapterDescription, GpuProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.ok_calls {
                Ok(AdapterDescription {
                    name: "Flaky".into(),
                    driver_backend: "Vulkan".into(),
                    device_type: "IntegratedGpu".into(),
                    estimated_memory_mb: None,
                })
            } else {
                Err(GpuProbeError::DeviceLost { api })
            }
        }
    }

    fn vectorizer(ok_calls: usize) -> Vectorizer {
        let processing = ProcessingConfig {
            gpu_min_pixel_area: 0,
            ..ProcessingConfig::default()
        };
        let gpu = Arc::new(FlakyGpu {
            ok_calls,
            calls: AtomicUsize::new(0),
        });
        Vectorizer::new(
            ConfigurationManager::new(),
            CapabilityProbe::from_snapshot(HostSnapshot::isolated_browser()),
            BackendSelector::new(processing, gpu),
        )
    }

    fn square() -> PixelBuffer {
        PixelBuffer::from_fn(64, 64, |x, y| {
            if (16..48).contains(&x) && (16..48).contains(&y) {
                [0, 0, 0, 255]
            } else {
                [255, 255, 255, 255]
            }
        })
    }

    #[test]
    fn test_flat_image_yields_at_most_one_path() {
        let mut v = vectorizer(0);
        v.config_mut()
            .apply_config_json(&json!({"backend": "edge", "detail": 0.5, "multipass": {"enabled": false}}))
            .unwrap();
        let svg = v
            .vectorize(&PixelBuffer::solid(100, 100, [200, 200, 200, 255]), None)
            .unwrap();
        assert!(svg.matches("<path").count() <= 1);
        assert!(svg.contains(r#"viewBox="0 0 100 100""#));
    }

    #[test]
    fn test_progress_runs_from_initializing_to_complete() {
        let mut v = vectorizer(0);
        let mut events: Vec<Progress> = Vec::new();
        let mut record = |p: &Progress| events.push(p.clone());
        let svg = v.vectorize(&square(), Some(&mut record)).unwrap();

        let first = events.first().unwrap();
        let last = events.last().unwrap();
        assert_eq!(first.stage, ProgressStage::Initializing);
        assert_eq!(last.stage, ProgressStage::Complete);
        assert_eq!(last.percent, 100);
        assert_eq!(last.svg_size, Some(svg.len()));
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert!(events.iter().any(|p| p.stage == ProgressStage::Rendering));
    }

    #[test]
    fn test_sync_path_records_cpu_run() {
        let mut v = vectorizer(0);
        let out = v.vectorize_detailed(&square(), None).unwrap();
        assert_eq!(out.report.backend, ProcessingBackend::CpuSingleThreaded);
        assert_eq!(out.report.svg_size, out.svg.len());
        assert!(!v.capabilities().is_cached());
        assert_eq!(v.selector().last_successful(), Some(ProcessingBackend::CpuSingleThreaded));
        assert!(v.selector().average_time_ms(ProcessingBackend::CpuSingleThreaded).is_some());
        assert!(v.performance_report().contains("cpu"));
    }

    #[test]
    fn test_oversized_image_rejected() {
        let mut v = vectorizer(0);
        v.config_mut().apply_config_json(&json!({"max_image_size": 64})).unwrap();
        let err = v
            .vectorize(&PixelBuffer::solid(65, 10, [0, 0, 0, 255]), None)
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Processing);
        assert!(matches!(
            err,
            VectorizeError::Processing(ProcessingError::ImageTooLarge { max: 64, .. })
        ));
    }

    #[test]
    fn test_dot_size_range_rejects_inverted_bounds() {
        let mut v = vectorizer(0);
        v.config_mut().set_backend(TraceBackend::Dots).unwrap();
        assert!(v.config_mut().set_dot_size_range(5.0, 2.0).is_err());
        assert!(v.config_mut().set_dot_size_range(1.0, 4.0).is_ok());
    }

    #[test]
    fn test_default_preset_applied_from_settings() {
        let mut settings = EngineSettings::default();
        settings.output.default_preset = Some("stippling".into());
        let v = Vectorizer::with_probe(
            &settings,
            CapabilityProbe::from_snapshot(HostSnapshot::isolated_browser()),
            BackendSelector::new(ProcessingConfig::default(), Arc::new(FlakyGpu { ok_calls: 0, calls: AtomicUsize::new(0) })),
        )
        .unwrap();
        assert_eq!(v.config().config().backend(), TraceBackend::Dots);

        settings.output.default_preset = Some("watercolor".into());
        assert!(Vectorizer::with_probe(
            &settings,
            CapabilityProbe::from_snapshot(HostSnapshot::isolated_browser()),
            BackendSelector::new(ProcessingConfig::default(), Arc::new(FlakyGpu { ok_calls: 0, calls: AtomicUsize::new(0) })),
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_gpu_path_uses_selected_backend() {
        let mut v = vectorizer(usize::MAX);
        let out = v.vectorize_gpu_detailed(&square(), None).await.unwrap();
        assert_eq!(out.report.backend, ProcessingBackend::WebGpu);
        assert!(out.report.diagnostics.is_empty());
        assert!(v.gpu_capability_report().contains("Selected backend: WebGPU"));
    }

    #[tokio::test]
    async fn test_transient_gpu_failure_falls_back_once() {
        // Selection succeeds, the per-run acquisition loses the device.
        let mut v = vectorizer(1);
        let out = v.vectorize_gpu_detailed(&square(), None).await.unwrap();
        assert_eq!(out.report.backend, ProcessingBackend::CpuSingleThreaded);
        assert_eq!(out.report.diagnostics.len(), 1);
        assert!(out.report.diagnostics[0].error_type.is_gpu());
    }

    #[tokio::test]
    async fn test_config_errors_surface_before_gpu_work() {
        let mut v = vectorizer(usize::MAX);
        let err = v
            .vectorize_gpu(&PixelBuffer::solid(5000, 1, [0, 0, 0, 255]), None)
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Processing);
        assert!(v.selector().gpu_info().is_none());
    }
}
