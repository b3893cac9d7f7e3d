use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use vectrace::backend::BackendSelector;
use vectrace::capability::{CapabilityProbe, HostSnapshot};
use vectrace::config::{preset, ConfigurationManager, TraceBackend, PRESET_NAMES};
use vectrace::progress::{Progress, ProgressCallback};
use vectrace::{EngineSettings, PixelBuffer, Vectorizer};

#[derive(Parser)]
#[command(
    name = "vectrace",
    about = "Trace raster images into SVG on the fastest available backend",
    version,
    long_about = None
)]
struct Cli {
    /// Engine settings file (TOML). Defaults to $VECTRACE_CONFIG, then ./vectrace.toml
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "VECTRACE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trace an image into SVG
    Trace {
        /// Input image (PNG, JPEG or BMP)
        input: PathBuf,

        /// Output SVG file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration document (JSON or TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Start from a named preset
        #[arg(long)]
        preset: Option<String>,

        /// Tracing algorithm: edge, centerline, dots or superpixel
        #[arg(long)]
        backend: Option<TraceBackend>,

        /// Detail level (0.0 to 1.0)
        #[arg(long)]
        detail: Option<f32>,

        /// Probe and use a GPU backend when one is available
        #[arg(long)]
        gpu: bool,

        /// Print progress to stderr
        #[arg(long)]
        progress: bool,
    },

    /// Show what the host supports
    Capabilities {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Replay a recorded host snapshot (JSON) instead of probing this process
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Validate a configuration document without tracing
    Validate {
        /// Configuration document (JSON or TOML)
        file: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List the built-in presets
    Presets,

    /// Probe GPU backends and show the processing order
    Backends {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing before anything logs
    let log_filter = init_tracing(cli.log_json);

    let settings = match &cli.settings {
        Some(path) => EngineSettings::load(path)?,
        None => EngineSettings::load_or_default(),
    };
    if let Some(handle) = log_filter {
        if let Err(e) = handle.reload(EnvFilter::new(&settings.logging.level)) {
            warn!(error = %e, level = %settings.logging.level, "could not apply logging level");
        }
    }

    match cli.command {
        Commands::Trace {
            input,
            output,
            config,
            preset,
            backend,
            detail,
            gpu,
            progress,
        } => {
            let mut vectorizer = Vectorizer::from_settings(&settings)?;
            let manager = vectorizer.config_mut();
            if let Some(name) = &preset {
                manager.load_preset(name)?;
            }
            if let Some(path) = &config {
                let doc = read_config_document(path)?;
                manager
                    .apply_config_json(&doc)
                    .with_context(|| format!("invalid configuration in {}", path.display()))?;
            }
            if let Some(backend) = backend {
                manager.set_backend(backend)?;
            }
            if let Some(detail) = detail {
                manager.set_detail(detail)?;
            }

            let pixels = load_image(&input)?;
            tracing::info!(
                input = %input.display(),
                width = pixels.width(),
                height = pixels.height(),
                gpu,
                "Tracing image"
            );

            let mut print_progress = |p: &Progress| {
                eprintln!("[{:>3}%] {:<16} {}", p.percent, p.stage.to_string(), p.message);
            };
            let callback: Option<ProgressCallback<'_>> = if progress {
                Some(&mut print_progress)
            } else {
                None
            };
            let result = if gpu {
                vectorizer.vectorize_gpu_detailed(&pixels, callback).await?
            } else {
                vectorizer.vectorize_detailed(&pixels, callback)?
            };

            match &output {
                Some(path) => {
                    std::fs::write(path, &result.svg)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(
                        output = %path.display(),
                        bytes = result.report.svg_size,
                        backend = %result.report.backend,
                        elapsed_ms = result.report.elapsed_ms as u64,
                        "SVG written"
                    );
                }
                None => print!("{}", result.svg),
            }
            for diagnostic in &result.report.diagnostics {
                tracing::warn!(error = %diagnostic, "recovered during run");
            }
        }
        Commands::Capabilities { json, snapshot } => {
            let probe = match &snapshot {
                Some(path) => CapabilityProbe::from_snapshot(HostSnapshot::load(path)?),
                None => CapabilityProbe::native(),
            };
            let report = probe.probe();
            if json {
                let out = json!({
                    "report": &*report,
                    "summary": report.summary(),
                    "recommendations": report.recommendations(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                let yes_no = |b: bool| if b { "yes" } else { "no" };
                println!("\nvectrace Host Capabilities");
                println!("{:<25} | Value", "Capability");
                println!("{:-<25}-|-{:-<30}", "", "");
                println!("{:<25} | {}", "Environment", report.environment_type);
                println!("{:<25} | {}", "Threading", yes_no(report.threading_supported));
                println!("{:<25} | {}", "SharedArrayBuffer", yes_no(report.shared_array_buffer));
                println!("{:<25} | {}", "Cross-origin isolated", yes_no(report.cross_origin_isolated));
                println!("{:<25} | {}", "Atomics", yes_no(report.atomics_supported));
                println!("{:<25} | {}", "WebGPU", yes_no(report.webgpu_supported));
                println!("{:<25} | {}", "WebGL2", yes_no(report.webgl2_supported));
                if let Some(n) = report.hardware_concurrency {
                    println!("{:<25} | {}", "Hardware concurrency", n);
                }
                println!("\n{}", report.summary());
                if !report.missing_requirements.is_empty() {
                    println!("\nMissing requirements:");
                    for req in &report.missing_requirements {
                        println!(" - {}", req);
                    }
                }
                let recs = report.recommendations();
                if !recs.is_empty() {
                    println!("\nRecommendations:");
                    for rec in recs {
                        println!(" -> {}", rec);
                    }
                }
                println!();
            }
        }
        Commands::Validate { file, json } => {
            let doc = read_config_document(&file)?;
            let result = ConfigurationManager::new().validate_config_json(&doc);
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.is_valid() {
                println!("{}: valid", file.display());
            } else {
                println!("{:<35} | {:<12} | Expected", "Field", "Value");
                println!("{:-<35}-|-{:-<12}-|-{:-<30}", "", "", "");
                for err in &result.errors {
                    println!("{:<35} | {:<12} | {}", err.field, err.value, err.expected);
                }
            }
            if !result.is_valid() {
                bail!(
                    "{} has {} invalid field(s)",
                    file.display(),
                    result.errors.len()
                );
            }
        }
        Commands::Presets => {
            println!("{:<15} | {:<12} | {:<8} | Multipass", "Preset", "Algorithm", "Detail");
            println!("{:-<15}-|-{:-<12}-|-{:-<8}-|-{:-<9}", "", "", "", "");
            for name in PRESET_NAMES {
                let config = preset(name)?;
                println!(
                    "{:<15} | {:<12} | {:<8} | {}",
                    name,
                    config.backend().as_str(),
                    config.detail,
                    config.multipass.enabled
                );
            }
        }
        Commands::Backends { json } => {
            let probe = CapabilityProbe::native();
            let caps = probe.probe();
            let mut selector = BackendSelector::with_wgpu(settings.processing.clone());
            // Nominal size large enough to clear the small-image heuristic.
            let info = selector.select(&caps, TraceBackend::Edge, 2048, 2048).await;
            let order: Vec<String> = selector
                .processing_order()
                .iter()
                .map(|b| b.to_string())
                .collect();
            if json {
                let out = json!({
                    "selected": info,
                    "processing_order": order,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print!("{}", selector.capability_report_text(&caps));
                println!("Processing order: {}", order.join(" -> "));
            }
        }
    }

    Ok(())
}

/// Read a JSON or TOML configuration document into a JSON value.
/// Install the global subscriber on stderr. The filter is `RUST_LOG`, or
/// `info` until settings are read; in that case the returned handle swaps in
/// the configured level.
fn init_tracing(json: bool) -> Option<reload::Handle<EnvFilter, Registry>> {
    let from_env = EnvFilter::try_from_default_env().ok();
    let pinned = from_env.is_some();
    let (filter, handle) = reload::Layer::new(from_env.unwrap_or_else(|| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
    (!pinned).then_some(handle)
}

fn read_config_document(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    let doc = if is_toml {
        toml::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse TOML configuration {}", path.display()))?
    } else {
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse JSON configuration {}", path.display()))?
    };
    Ok(doc)
}

fn load_image(path: &Path) -> Result<PixelBuffer> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode image {}", path.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    let pixels = PixelBuffer::from_rgba(width, height, image.into_raw())
        .with_context(|| format!("unusable image {}", path.display()))?;
    Ok(pixels)
}
