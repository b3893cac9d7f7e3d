//! Multipass orchestration.
//!
//! A run moves through `Init → RunPass(i) → … → Merge → PostProcess → Done`.
//! Passes execute strictly in order; each pass's result is committed before
//! the next begins, and directional passes are judged against everything
//! committed so far.

mod merge;

pub use merge::{merge_path_sets, novelty_ratio, overlaps, MergeStats};

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::backend::ProcessingBackend;
use crate::config::VectorizationConfig;
use crate::error::ProcessingError;
use crate::postprocess::{self, PostProcessReport};
use crate::progress::{ProgressReporter, ProgressStage};
use crate::trace::filters::bilateral_filter;
use crate::trace::{self, PathSet, PixelBuffer, RasterOrder, TraceContext};

/// Detail passes when a directional pass is also scheduled.
const DETAIL_PASSES_WITH_DIRECTIONAL: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    /// The only pass of a single-pass run.
    Single,
    /// One level of the conservative → aggressive detail ramp.
    Detail,
    /// A re-trace in a different raster order, kept only if it adds enough.
    Directional,
}

/// One scheduled pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassPlan {
    pub kind: PassKind,
    pub detail: f32,
    pub raster_order: RasterOrder,
}

/// Passes for `config`, in execution order.
///
/// Multipass off: one pass at `detail`. On: detail passes ramp from the
/// conservative to the aggressive level (`pass_count` of them, or two when a
/// directional pass is also requested), then the reverse and diagonal passes
/// at the aggressive level. The plan never exceeds four passes when
/// directional passes are enabled.
pub fn plan_passes(config: &VectorizationConfig) -> Vec<PassPlan> {
    let mp = &config.multipass;
    if !mp.enabled {
        return vec![PassPlan {
            kind: PassKind::Single,
            detail: config.detail,
            raster_order: RasterOrder::Normal,
        }];
    }

    let (conservative, aggressive) = mp.resolved_details(config.detail);
    let count = if mp.has_directional() {
        DETAIL_PASSES_WITH_DIRECTIONAL
    } else {
        mp.pass_count.clamp(2, 10)
    };

    let mut plan: Vec<PassPlan> = (0..count)
        .map(|i| {
            let t = i as f32 / (count - 1) as f32;
            PassPlan {
                kind: PassKind::Detail,
                detail: conservative + (aggressive - conservative) * t,
                raster_order: RasterOrder::Normal,
            }
        })
        .collect();
    for (enabled, order) in [
        (mp.reverse_pass, RasterOrder::Reverse),
        (mp.diagonal_pass, RasterOrder::Diagonal),
    ] {
        if enabled {
            plan.push(PassPlan {
                kind: PassKind::Directional,
                detail: aggressive,
                raster_order: order,
            });
        }
    }
    plan
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub index: usize,
    pub kind: PassKind,
    pub detail: f32,
    pub raster_order: RasterOrder,
    pub paths: usize,
    /// Fraction of paths not already traced; directional passes only.
    pub novelty: Option<f32>,
    pub retained: bool,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationReport {
    pub backend: ProcessingBackend,
    pub passes: Vec<PassReport>,
    pub paths_before_merge: usize,
    pub duplicates_removed: usize,
    pub dedup_percent: f32,
    pub paths_after_merge: usize,
    pub post_process: PostProcessReport,
    pub paths_final: usize,
}

impl OrchestrationReport {
    pub fn retained_passes(&self) -> usize {
        self.passes.iter().filter(|p| p.retained).count()
    }
}

/// Traced paths plus how they were obtained.
#[derive(Debug, Clone)]
pub struct Orchestrated {
    pub paths: PathSet,
    pub report: OrchestrationReport,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs the configured strategy over one image.
pub struct PassOrchestrator<'c> {
    config: &'c VectorizationConfig,
    backend: ProcessingBackend,
}

impl<'c> PassOrchestrator<'c> {
    pub fn new(config: &'c VectorizationConfig, backend: ProcessingBackend) -> Self {
        Self { config, backend }
    }

    pub fn plan(&self) -> Vec<PassPlan> {
        plan_passes(self.config)
    }

    /// Distance within which two traced paths count as the same stroke.
    pub fn dedup_tolerance(&self) -> f32 {
        self.config.stroke_width.max(1.5)
    }

    pub fn run(
        &self,
        pixels: &PixelBuffer,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<Orchestrated, ProcessingError> {
        let config = self.config;
        let started = Instant::now();

        // 1. Init: optional noise filtering, once for all passes.
        let filtered;
        let source = if config.noise_filter.enabled {
            progress.emit(ProgressStage::Preprocessing, 5, "Applying noise filter");
            filtered = bilateral_filter(
                pixels,
                config.noise_filter.spatial_sigma,
                config.noise_filter.range_sigma,
            );
            &filtered
        } else {
            pixels
        };

        let plan = self.plan();
        info!(
            algorithm = %config.backend(),
            backend = %self.backend,
            passes = plan.len(),
            "starting trace"
        );

        // 2. Passes, strictly in order.
        let tolerance = self.dedup_tolerance();
        let stroke_width = config.effective_stroke_width(pixels.width(), pixels.height());
        let mut committed: Vec<PathSet> = Vec::with_capacity(plan.len());
        let mut reports = Vec::with_capacity(plan.len());
        for (index, pass) in plan.iter().enumerate() {
            let pass_started = Instant::now();
            let ctx = TraceContext {
                backend: self.backend,
                detail: pass.detail,
                raster_order: pass.raster_order,
                stroke_width,
                seed: config.seed,
                line_color: config.line_color.clone(),
            };
            let paths = trace::trace(source, &config.algorithm, &ctx)?;

            let (novelty, retained) = match pass.kind {
                PassKind::Directional => {
                    let kept: Vec<&PathSet> = committed.iter().collect();
                    let ratio = novelty_ratio(&paths, &kept, tolerance);
                    (
                        Some(ratio),
                        ratio > config.multipass.directional_strength_threshold,
                    )
                }
                PassKind::Single | PassKind::Detail => (None, true),
            };
            debug!(
                pass = index + 1,
                kind = ?pass.kind,
                detail = pass.detail,
                paths = paths.len(),
                ?novelty,
                retained,
                "pass complete"
            );
            reports.push(PassReport {
                index: index + 1,
                kind: pass.kind,
                detail: pass.detail,
                raster_order: pass.raster_order,
                paths: paths.len(),
                novelty,
                retained,
                elapsed_ms: pass_started.elapsed().as_secs_f64() * 1000.0,
            });
            if retained {
                committed.push(paths);
            }

            let percent = 10 + (70 * (index + 1) / plan.len()) as u8;
            progress.emit(
                ProgressStage::Tracing,
                percent,
                format!("Pass {}/{} complete", index + 1, plan.len()),
            );
            check_budget(config, started)?;
        }

        // 3. Merge. Duplicates only exist across committed passes.
        let sets: Vec<&PathSet> = committed.iter().collect();
        let (merged, stats) = merge_path_sets(pixels.width(), pixels.height(), &sets, tolerance, || {
            check_budget(config, started)
        })?;
        progress.emit(
            ProgressStage::Merging,
            85,
            format!(
                "Merged {} paths ({} duplicates removed)",
                merged.len(),
                stats.duplicates_removed
            ),
        );
        let paths_after_merge = merged.len();

        // 4. Post-process.
        let (paths, post_process) = postprocess::apply(merged, source, config);
        progress.emit(ProgressStage::PostProcessing, 92, "Post-processing complete");
        check_budget(config, started)?;

        info!(
            paths = paths.len(),
            duplicates = stats.duplicates_removed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "trace finished"
        );
        Ok(Orchestrated {
            report: OrchestrationReport {
                backend: self.backend,
                passes: reports,
                paths_before_merge: stats.input_paths,
                duplicates_removed: stats.duplicates_removed,
                dedup_percent: stats.dedup_percent(),
                paths_after_merge,
                post_process,
                paths_final: paths.len(),
            },
            paths,
        })
    }
}

fn check_budget(config: &VectorizationConfig, started: Instant) -> Result<(), ProcessingError> {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if elapsed_ms > config.max_processing_time_ms {
        return Err(ProcessingError::TimeBudgetExceeded {
            budget_ms: config.max_processing_time_ms,
            elapsed_ms,
        });
    }
    Ok(())
}
