//! Host capability probing.
//!
//! [`CapabilityProbe`] inspects a [`HostEnvironment`] once, caches the
//! resulting [`CapabilityReport`] and hands out shared snapshots of it until
//! explicitly refreshed.

pub mod host;

pub use host::{HostEnvironment, HostSnapshot, NativeHost, SnapshotHost};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DiagnosticError, DiagnosticKind, ThreadingError};

pub const COOP_HEADER: &str = "Cross-Origin-Opener-Policy: same-origin";
pub const COEP_HEADER: &str = "Cross-Origin-Embedder-Policy: require-corp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentType {
    Browser,
    Worker,
    Node,
    /// A plain OS process.
    Native,
    Unknown,
}

impl EnvironmentType {
    /// Hosts without a cross-origin model, where isolation is implicit.
    fn process_isolated(self) -> bool {
        matches!(self, EnvironmentType::Node | EnvironmentType::Native)
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvironmentType::Browser => "browser",
            EnvironmentType::Worker => "worker",
            EnvironmentType::Node => "node",
            EnvironmentType::Native => "native",
            EnvironmentType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// What the host can do. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityReport {
    pub threading_supported: bool,
    pub shared_array_buffer: bool,
    pub cross_origin_isolated: bool,
    pub atomics_supported: bool,
    pub webgpu_supported: bool,
    pub webgl2_supported: bool,
    pub is_node_js: bool,
    pub environment_type: EnvironmentType,
    pub web_workers: bool,
    pub hardware_concurrency: Option<u32>,
    /// Ordered, most fundamental first.
    pub missing_requirements: Vec<String>,
    pub diagnostics: Vec<String>,
}

impl CapabilityReport {
    /// Run every check against `host`. A check that panics counts as failed.
    pub fn from_host(host: &dyn HostEnvironment) -> Self {
        let kind = guarded("environment type", EnvironmentType::Unknown, || host.kind());

        // 1. Shared memory: type present, then allocate + read/write
        let sab_present = guarded("shared memory", false, || host.has_shared_memory());
        let sab_functional =
            sab_present && guarded("shared memory roundtrip", false, || host.shared_memory_functional());

        // 2. Cross-origin isolation
        let isolation_signal = guarded("cross-origin isolation", None, || host.cross_origin_isolated());
        let cross_origin_isolated = isolation_signal.unwrap_or(kind.process_isolated());

        // 3. Atomics and workers
        let atomics_supported = guarded("atomics", false, || host.has_atomics());
        let web_workers = guarded("workers", false, || host.has_workers());

        // 4. GPU APIs (adapter enumeration only)
        let webgpu_supported = guarded("webgpu", false, || host.webgpu_available());
        let webgl2_supported = guarded("webgl2", false, || host.webgl2_available());

        let hardware_concurrency = guarded("hardware concurrency", None, || host.hardware_concurrency());

        let workers_ok = web_workers || kind.process_isolated();
        let threading_supported =
            sab_functional && cross_origin_isolated && atomics_supported && workers_ok;

        let mut missing_requirements = Vec::new();
        if !sab_functional {
            missing_requirements.push("SharedArrayBuffer".to_string());
        }
        if !cross_origin_isolated {
            missing_requirements.push(format!(
                "Cross-Origin Isolation (COOP/COEP headers: {COOP_HEADER}; {COEP_HEADER})"
            ));
        }
        if !workers_ok {
            missing_requirements.push("Web Workers".to_string());
        }
        if !atomics_supported {
            missing_requirements.push("Atomics".to_string());
        }

        let yes_no = |b: bool| if b { "available" } else { "unavailable" };
        let mut diagnostics = vec![
            format!("Environment: {kind}"),
            format!(
                "SharedArrayBuffer: {}{}",
                yes_no(sab_present),
                if sab_present && !sab_functional {
                    " (allocation/read-write test failed)"
                } else {
                    ""
                }
            ),
            match isolation_signal {
                Some(v) => format!("Cross-origin isolated: {v}"),
                None => format!(
                    "Cross-origin isolated: no signal, assumed {cross_origin_isolated} for {kind}"
                ),
            },
            format!("Atomics: {}", yes_no(atomics_supported)),
            format!("Workers: {}", yes_no(web_workers)),
            format!("WebGPU: {}", yes_no(webgpu_supported)),
            format!("WebGL2: {}", yes_no(webgl2_supported)),
        ];
        if let Some(n) = hardware_concurrency {
            diagnostics.push(format!("Hardware concurrency: {n}"));
        }

        Self {
            threading_supported,
            shared_array_buffer: sab_functional,
            cross_origin_isolated,
            atomics_supported,
            webgpu_supported,
            webgl2_supported,
            is_node_js: kind == EnvironmentType::Node,
            environment_type: kind,
            web_workers,
            hardware_concurrency,
            missing_requirements,
            diagnostics,
        }
    }

    pub fn has_gpu(&self) -> bool {
        self.webgpu_supported || self.webgl2_supported
    }

    /// One-paragraph human-readable summary.
    pub fn summary(&self) -> String {
        let threading = if self.threading_supported {
            "Multi-threading is available".to_string()
        } else {
            format!(
                "Multi-threading is unavailable (missing: {})",
                self.missing_requirements.join(", ")
            )
        };
        let gpu = match (self.webgpu_supported, self.webgl2_supported) {
            (true, true) => "WebGPU and WebGL2 are available",
            (true, false) => "WebGPU is available",
            (false, true) => "WebGL2 is available, WebGPU is not",
            (false, false) => "no GPU acceleration is available, processing will use the CPU",
        };
        let cores = self
            .hardware_concurrency
            .map(|n| format!(" with {n} logical cores"))
            .unwrap_or_default();
        format!(
            "Running in a {} environment{cores}. {threading}; {gpu}.",
            self.environment_type
        )
    }

    /// Actionable remediation steps, most important first.
    pub fn recommendations(&self) -> Vec<String> {
        let mut recs = Vec::new();
        let web = !self.environment_type.process_isolated();

        if !self.cross_origin_isolated {
            recs.push(format!("Add COOP header: {COOP_HEADER}"));
            recs.push(format!("Add COEP header: {COEP_HEADER}"));
            recs.push(
                "Serve the page over HTTPS (or localhost); isolation is only granted in secure contexts"
                    .to_string(),
            );
            recs.push(
                "Send Cross-Origin-Resource-Policy headers on cross-origin subresources".to_string(),
            );
        }
        if !self.shared_array_buffer {
            if self.is_node_js {
                recs.push("Run Node.js with --experimental-wasm-threads or upgrade to Node.js 16+".to_string());
            } else if web {
                recs.push(
                    "Use a browser with SharedArrayBuffer support (Chrome 92+, Firefox 79+, Safari 15.2+)"
                        .to_string(),
                );
            }
        }
        if !self.atomics_supported {
            recs.push("Use a runtime with Atomics support".to_string());
        }
        if web && !self.web_workers {
            recs.push("Enable Web Workers in the host environment".to_string());
        }
        if !self.has_gpu() {
            recs.push(
                "No GPU adapter found: update graphics drivers or enable hardware acceleration; the CPU backend will be used"
                    .to_string(),
            );
        }
        if recs.is_empty() {
            recs.push("No action needed: all capabilities are available".to_string());
        }
        recs
    }

    /// Structured error describing why threading is unavailable, if it is.
    pub fn threading_error(&self) -> Option<ThreadingError> {
        if self.threading_supported {
            return None;
        }
        let (kind, message) = if !self.shared_array_buffer {
            (
                DiagnosticKind::SharedArrayBufferUnavailable,
                "SharedArrayBuffer is not available or not functional",
            )
        } else if !self.cross_origin_isolated {
            (
                DiagnosticKind::CrossOriginIsolationMissing,
                "the environment is not cross-origin isolated",
            )
        } else if !self.atomics_supported {
            (DiagnosticKind::AtomicsUnavailable, "Atomics are not supported")
        } else {
            (DiagnosticKind::WorkersUnavailable, "workers are not available")
        };

        let environment = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let err = DiagnosticError::new(kind, message)
            .with_suggestions(self.recommendations())
            .with_attempted("Feature detection for SharedArrayBuffer, Atomics and workers")
            .with_attempted("Cross-origin isolation check")
            .with_attempted("Fallback to single-threaded processing")
            .with_environment(environment);
        Some(err)
    }
}

fn guarded<T>(check: &str, fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            warn!(check, "capability check panicked; reporting unavailable");
            fallback
        }
    }
}

/// Lazily probes the host once and caches the report until [`refresh`](Self::refresh).
pub struct CapabilityProbe {
    host: Arc<dyn HostEnvironment>,
    cache: OnceLock<Arc<CapabilityReport>>,
}

impl CapabilityProbe {
    pub fn new(host: Arc<dyn HostEnvironment>) -> Self {
        Self {
            host,
            cache: OnceLock::new(),
        }
    }

    /// Probe the running process.
    pub fn native() -> Self {
        Self::new(Arc::new(NativeHost::new()))
    }

    pub fn from_snapshot(snapshot: HostSnapshot) -> Self {
        Self::new(Arc::new(SnapshotHost::new(snapshot)))
    }

    pub fn probe(&self) -> Arc<CapabilityReport> {
        let report = self.cache.get_or_init(|| {
            let report = CapabilityReport::from_host(self.host.as_ref());
            info!(
                environment = %report.environment_type,
                threading = report.threading_supported,
                webgpu = report.webgpu_supported,
                webgl2 = report.webgl2_supported,
                "capability probe complete"
            );
            Arc::new(report)
        });
        Arc::clone(report)
    }

    pub fn is_cached(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Drop the cached report; the next query re-probes.
    pub fn refresh(&mut self) {
        self.cache = OnceLock::new();
        debug!("capability cache cleared");
    }

    pub fn environment_type(&self) -> EnvironmentType {
        self.probe().environment_type
    }

    pub fn missing_requirements(&self) -> Vec<String> {
        self.probe().missing_requirements.clone()
    }

    pub fn summary(&self) -> String {
        self.probe().summary()
    }

    pub fn recommendations(&self) -> Vec<String> {
        self.probe().recommendations()
    }

    pub fn threading_error(&self) -> Option<ThreadingError> {
        self.probe().threading_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHost {
        calls: AtomicUsize,
    }

    impl HostEnvironment for CountingHost {
        fn kind(&self) -> EnvironmentType {
            self.calls.fetch_add(1, Ordering::SeqCst);
            EnvironmentType::Browser
        }
        fn has_shared_memory(&self) -> bool {
            true
        }
        fn shared_memory_functional(&self) -> bool {
            true
        }
        fn cross_origin_isolated(&self) -> Option<bool> {
            Some(true)
        }
        fn has_atomics(&self) -> bool {
            true
        }
        fn has_workers(&self) -> bool {
            true
        }
        fn webgpu_available(&self) -> bool {
            panic!("adapter enumeration crashed")
        }
        fn webgl2_available(&self) -> bool {
            true
        }
        fn hardware_concurrency(&self) -> Option<u32> {
            Some(4)
        }
    }

    #[test]
    fn test_not_isolated_disables_threading() {
        let probe = CapabilityProbe::from_snapshot(HostSnapshot {
            cross_origin_isolated: Some(false),
            ..HostSnapshot::isolated_browser()
        });
        let report = probe.probe();
        assert!(!report.threading_supported);
        assert!(!report.cross_origin_isolated);
        assert!(report
            .missing_requirements
            .iter()
            .any(|r| r.contains("Cross-Origin-Opener-Policy")));
        assert!(report
            .recommendations()
            .iter()
            .any(|r| r.contains("Cross-Origin-Embedder-Policy: require-corp")));

        let err = report.threading_error().unwrap();
        assert_eq!(err.error_type, DiagnosticKind::CrossOriginIsolationMissing);
        assert!(err.is_recoverable());
        assert_eq!(err.environment_info["environment_type"], "browser");
    }

    #[test]
    fn test_missing_signal_in_browser_means_not_isolated() {
        let report = CapabilityReport::from_host(&SnapshotHost::new(HostSnapshot {
            cross_origin_isolated: None,
            ..HostSnapshot::isolated_browser()
        }));
        assert!(!report.cross_origin_isolated);
        assert!(!report.threading_supported);
    }

    #[test]
    fn test_node_without_workers_flag() {
        let report = CapabilityReport::from_host(&SnapshotHost::new(HostSnapshot {
            environment_type: EnvironmentType::Node,
            shared_array_buffer: true,
            shared_array_buffer_functional: true,
            atomics: true,
            ..HostSnapshot::default()
        }));
        assert!(report.is_node_js);
        assert!(report.cross_origin_isolated);
        assert!(report.threading_supported);
        assert!(report.missing_requirements.is_empty());
        assert!(report.threading_error().is_none());
    }

    #[test]
    fn test_requirements_are_ordered() {
        let report = CapabilityReport::from_host(&SnapshotHost::new(HostSnapshot {
            environment_type: EnvironmentType::Browser,
            ..HostSnapshot::default()
        }));
        assert_eq!(report.missing_requirements[0], "SharedArrayBuffer");
        assert!(report.missing_requirements[1].starts_with("Cross-Origin Isolation"));
        assert_eq!(report.missing_requirements[2], "Web Workers");
        assert_eq!(report.missing_requirements[3], "Atomics");
        assert_eq!(
            report.threading_error().unwrap().error_type,
            DiagnosticKind::SharedArrayBufferUnavailable
        );
    }

    #[test]
    fn test_probe_is_cached_until_refresh() {
        let host = Arc::new(CountingHost {
            calls: AtomicUsize::new(0),
        });
        let mut probe = CapabilityProbe::new(host.clone());
        assert!(!probe.is_cached());

        let first = probe.probe();
        let second = probe.probe();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(host.calls.load(Ordering::SeqCst), 1);

        probe.refresh();
        assert!(!probe.is_cached());
        let third = probe.probe();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(host.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_check_reports_false() {
        let host = CountingHost {
            calls: AtomicUsize::new(0),
        };
        let report = CapabilityReport::from_host(&host);
        assert!(!report.webgpu_supported);
        assert!(report.webgl2_supported);
        assert!(report.threading_supported);
    }

    #[test]
    fn test_summary_and_recommendations() {
        let report = CapabilityReport::from_host(&SnapshotHost::new(HostSnapshot::isolated_browser()));
        let summary = report.summary();
        assert!(summary.contains("browser"));
        assert!(summary.contains("Multi-threading is available"));
        assert!(summary.contains("8 logical cores"));
        assert_eq!(
            report.recommendations(),
            vec!["No action needed: all capabilities are available".to_string()]
        );
    }
}
