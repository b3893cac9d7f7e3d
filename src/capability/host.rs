//! Host environment abstraction used by the capability probe.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::EnvironmentType;

/// Raw feature signals of the host. Every method must be cheap and must not
/// keep any resource (GPU device, thread) alive after returning.
pub trait HostEnvironment: Send + Sync {
    fn kind(&self) -> EnvironmentType;

    /// Shared-memory buffer type is present.
    fn has_shared_memory(&self) -> bool;

    /// A shared-memory buffer can be allocated, written and read back.
    fn shared_memory_functional(&self) -> bool;

    /// `None` when the host exposes no isolation signal at all.
    fn cross_origin_isolated(&self) -> Option<bool>;

    fn has_atomics(&self) -> bool;

    fn has_workers(&self) -> bool;

    fn webgpu_available(&self) -> bool;

    fn webgl2_available(&self) -> bool;

    fn hardware_concurrency(&self) -> Option<u32>;
}

// ---------------------------------------------------------------------------
// Native process
// ---------------------------------------------------------------------------

/// The running OS process.
///
/// A native process has no cross-origin model, so isolation is reported as
/// satisfied. GPU presence comes from adapter enumeration only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeHost;

impl NativeHost {
    pub fn new() -> Self {
        Self
    }

    fn adapter_count(backends: wgpu::Backends) -> usize {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let count = instance.enumerate_adapters(backends).len();
        debug!(?backends, count, "enumerated GPU adapters");
        count
    }
}

impl HostEnvironment for NativeHost {
    fn kind(&self) -> EnvironmentType {
        EnvironmentType::Native
    }

    fn has_shared_memory(&self) -> bool {
        true
    }

    fn shared_memory_functional(&self) -> bool {
        let cells: Arc<[AtomicU32]> = (0..4).map(|_| AtomicU32::new(0)).collect();
        for (i, cell) in cells.iter().enumerate() {
            cell.store(i as u32 * 7 + 1, Ordering::Release);
        }
        let swapped = cells[0]
            .compare_exchange(1, 42, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        swapped
            && cells
                .iter()
                .enumerate()
                .skip(1)
                .all(|(i, c)| c.load(Ordering::Acquire) == i as u32 * 7 + 1)
    }

    fn cross_origin_isolated(&self) -> Option<bool> {
        None
    }

    fn has_atomics(&self) -> bool {
        cfg!(target_has_atomic = "32")
    }

    fn has_workers(&self) -> bool {
        std::thread::available_parallelism().is_ok()
    }

    fn webgpu_available(&self) -> bool {
        Self::adapter_count(wgpu::Backends::PRIMARY) > 0
    }

    fn webgl2_available(&self) -> bool {
        Self::adapter_count(wgpu::Backends::GL) > 0
    }

    fn hardware_concurrency(&self) -> Option<u32> {
        std::thread::available_parallelism()
            .ok()
            .and_then(|n| u32::try_from(n.get()).ok())
    }
}

// ---------------------------------------------------------------------------
// Recorded snapshot
// ---------------------------------------------------------------------------

/// Feature signals recorded from another host (a browser tab, a worker, a
/// Node process) and replayed through the probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSnapshot {
    pub environment_type: EnvironmentType,
    pub shared_array_buffer: bool,
    pub shared_array_buffer_functional: bool,
    pub cross_origin_isolated: Option<bool>,
    pub atomics: bool,
    pub web_workers: bool,
    pub webgpu: bool,
    pub webgl2: bool,
    pub hardware_concurrency: Option<u32>,
}

impl Default for HostSnapshot {
    fn default() -> Self {
        Self {
            environment_type: EnvironmentType::Unknown,
            shared_array_buffer: false,
            shared_array_buffer_functional: false,
            cross_origin_isolated: None,
            atomics: false,
            web_workers: false,
            webgpu: false,
            webgl2: false,
            hardware_concurrency: None,
        }
    }
}

impl HostSnapshot {
    /// A fully capable, cross-origin isolated browser tab.
    pub fn isolated_browser() -> Self {
        Self {
            environment_type: EnvironmentType::Browser,
            shared_array_buffer: true,
            shared_array_buffer_functional: true,
            cross_origin_isolated: Some(true),
            atomics: true,
            web_workers: true,
            webgpu: true,
            webgl2: true,
            hardware_concurrency: Some(8),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read host snapshot {}", path.display()))?;
        let snapshot: HostSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse host snapshot {}", path.display()))?;
        Ok(snapshot)
    }
}

/// Replays a [`HostSnapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotHost {
    snapshot: HostSnapshot,
}

impl SnapshotHost {
    pub fn new(snapshot: HostSnapshot) -> Self {
        Self { snapshot }
    }
}

impl HostEnvironment for SnapshotHost {
    fn kind(&self) -> EnvironmentType {
        self.snapshot.environment_type
    }

    fn has_shared_memory(&self) -> bool {
        self.snapshot.shared_array_buffer
    }

    fn shared_memory_functional(&self) -> bool {
        self.snapshot.shared_array_buffer && self.snapshot.shared_array_buffer_functional
    }

    fn cross_origin_isolated(&self) -> Option<bool> {
        self.snapshot.cross_origin_isolated
    }

    fn has_atomics(&self) -> bool {
        self.snapshot.atomics
    }

    fn has_workers(&self) -> bool {
        self.snapshot.web_workers
    }

    fn webgpu_available(&self) -> bool {
        self.snapshot.webgpu
    }

    fn webgl2_available(&self) -> bool {
        self.snapshot.webgl2
    }

    fn hardware_concurrency(&self) -> Option<u32> {
        self.snapshot.hardware_concurrency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_native_shared_memory_roundtrip() {
        let host = NativeHost::new();
        assert!(host.has_shared_memory());
        assert!(host.shared_memory_functional());
        assert_eq!(host.kind(), EnvironmentType::Native);
        assert!(host.cross_origin_isolated().is_none());
    }

    #[test]
    fn test_snapshot_functional_requires_presence() {
        let host = SnapshotHost::new(HostSnapshot {
            shared_array_buffer: false,
            shared_array_buffer_functional: true,
            ..HostSnapshot::default()
        });
        assert!(!host.shared_memory_functional());
    }

    #[test]
    fn test_load_partial_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"environment_type": "browser", "shared_array_buffer": true, "cross_origin_isolated": false}}"#
        )
        .unwrap();

        let snapshot = HostSnapshot::load(file.path()).unwrap();
        assert_eq!(snapshot.environment_type, EnvironmentType::Browser);
        assert!(snapshot.shared_array_buffer);
        assert_eq!(snapshot.cross_origin_isolated, Some(false));
        assert!(!snapshot.webgpu);
    }

    #[test]
    fn test_load_missing_snapshot() {
        assert!(HostSnapshot::load(Path::new("/nonexistent/snapshot.json")).is_err());
    }
}
