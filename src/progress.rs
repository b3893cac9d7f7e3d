//! Progress reporting for a single vectorize call.
//!
//! Callers pass an optional `&mut dyn FnMut(&Progress)`; the engine invokes it
//! at each stage boundary. Reported percentages never decrease.

use std::fmt;
use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Initializing,
    Preprocessing,
    Tracing,
    Merging,
    PostProcessing,
    Rendering,
    Complete,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressStage::Initializing => "initializing",
            ProgressStage::Preprocessing => "preprocessing",
            ProgressStage::Tracing => "tracing",
            ProgressStage::Merging => "merging",
            ProgressStage::PostProcessing => "post_processing",
            ProgressStage::Rendering => "rendering",
            ProgressStage::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// A single progress event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub stage: ProgressStage,
    /// 0..=100, non-decreasing within a call.
    pub percent: u8,
    pub message: String,
    /// Size of the rendered SVG in bytes, set on completion.
    pub svg_size: Option<usize>,
    /// Wall time of the whole call, set on completion.
    pub processing_time_ms: Option<f64>,
}

pub type ProgressCallback<'a> = &'a mut dyn FnMut(&Progress);

/// Wraps the caller's callback and enforces monotonic percentages.
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
    started: Instant,
    last_percent: u8,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: Option<ProgressCallback<'a>>) -> Self {
        Self {
            callback,
            started: Instant::now(),
            last_percent: 0,
        }
    }

    /// A reporter that drops every event.
    pub fn silent() -> Self {
        Self::new(None)
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    pub fn emit(&mut self, stage: ProgressStage, percent: u8, message: impl Into<String>) {
        self.send(stage, percent, message.into(), None, None);
    }

    pub fn complete(&mut self, svg_size: usize) {
        self.send(
            ProgressStage::Complete,
            100,
            format!("SVG generated ({svg_size} bytes)"),
            Some(svg_size),
            Some(self.elapsed_ms()),
        );
    }

    fn send(
        &mut self,
        stage: ProgressStage,
        percent: u8,
        message: String,
        svg_size: Option<usize>,
        processing_time_ms: Option<f64>,
    ) {
        let percent = percent.min(100).max(self.last_percent);
        self.last_percent = percent;
        if let Some(cb) = self.callback.as_mut() {
            cb(&Progress {
                stage,
                percent,
                message,
                svg_size,
                processing_time_ms,
            });
        }
    }
}
