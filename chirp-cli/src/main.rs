//! `chirp`: classify a bird call from a file or the microphone.
//!
//! ```text
//! chirp classify recording.mp3
//! chirp --variant efficiency --json classify clip.wav
//! chirp record --seconds 5
//! chirp devices
//! chirp models
//! ```
//!
//! Logging goes to stderr and honours `RUST_LOG`; results go to stdout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chirp_core::audio::device::list_input_devices;
use chirp_core::audio::CpalBackend;
use chirp_core::engine::DiagnosticsSnapshot;
use chirp_core::inference::model_catalog;
use chirp_core::{
    ChirpPipeline, ClassificationResult, Microphone, ModelState, ModelVariant, PipelineConfig,
    PipelineOutput,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "chirp")]
#[command(about = "Identify bird calls from short audio clips", long_about = None)]
struct Args {
    /// JSON pipeline config. Missing fields use defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model variant: precision or efficiency.
    #[arg(long, global = true)]
    variant: Option<ModelVariant>,

    /// Directory holding <variant>/model.json and weights.
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of a table.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify an audio file (wav, mp3, ogg, webm, flac).
    Classify {
        file: PathBuf,
    },
    /// Record from the microphone, then classify the recording.
    Record {
        /// Recording length in seconds.
        #[arg(long, default_value_t = 3.0)]
        seconds: f32,
        /// Input device name (default device when omitted).
        #[arg(long)]
        device: Option<String>,
    },
    /// List audio input devices.
    Devices,
    /// List model variants.
    Models,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    source: String,
    generation: u64,
    variant: ModelVariant,
    model_state: ModelState,
    sample_rate: u32,
    duration_seconds: f64,
    results: &'a [ClassificationResult],
    diagnostics: DiagnosticsSnapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chirp=info,chirp_core=info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    match args.command {
        Command::Classify { ref file } => {
            let pipeline = ChirpPipeline::new(config).context("create pipeline")?;
            let state = pipeline.load_default_model().await?;
            let output = pipeline
                .classify_file(file)
                .await
                .with_context(|| format!("classify {}", file.display()))?;
            print_output(&args, &pipeline, state, file.display().to_string(), &output)
        }
        Command::Record { seconds, ref device } => {
            let pipeline = ChirpPipeline::new(config).context("create pipeline")?;
            let state = pipeline.load_default_model().await?;
            let signal = record(seconds, device.clone()).await?;
            let output = pipeline
                .classify_signal(signal)
                .await
                .context("classify recording")?;
            print_output(&args, &pipeline, state, "microphone".into(), &output)
        }
        Command::Devices => {
            let devices = list_input_devices();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("no input devices found");
            } else {
                for d in &devices {
                    let mut flags = Vec::new();
                    if d.is_default {
                        flags.push("default");
                    }
                    if d.is_loopback_like {
                        flags.push("loopback");
                    }
                    if flags.is_empty() {
                        println!("{}", d.name);
                    } else {
                        println!("{} [{}]", d.name, flags.join(", "));
                    }
                }
            }
            Ok(())
        }
        Command::Models => {
            let catalog = model_catalog();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                for m in &catalog {
                    println!(
                        "{:<12} {:<12} accuracy {:>5.1}%  {:>5} KB  input {:?}",
                        m.id,
                        m.display_name,
                        m.accuracy * 100.0,
                        m.memory_footprint_kb,
                        m.input_shape
                    );
                }
                println!("models dir: {}", config.models_dir.display());
            }
            Ok(())
        }
    }
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => PipelineConfig::default(),
    }
    .apply_env();

    // Flags beat env beats file.
    if let Some(dir) = &args.models_dir {
        config.models_dir = dir.clone();
    }
    if let Some(variant) = args.variant {
        config.default_variant = variant;
    }
    Ok(config)
}

async fn record(seconds: f32, device: Option<String>) -> Result<chirp_core::AudioSignal> {
    let backend = match device {
        Some(name) => CpalBackend::with_device(name),
        None => CpalBackend::default(),
    };
    let mut mic = Microphone::new(Arc::new(backend));
    if !mic.request_permission() {
        anyhow::bail!("microphone unavailable or access denied");
    }
    mic.start_recording().context("start recording")?;
    info!(seconds, "recording");
    tokio::time::sleep(Duration::from_secs_f32(seconds.clamp(0.1, 60.0))).await;
    let signal = mic.stop_recording().await.context("stop recording")?;
    mic.dispose();
    Ok(signal)
}

fn print_output(
    args: &Args,
    pipeline: &ChirpPipeline,
    state: ModelState,
    source: String,
    output: &PipelineOutput,
) -> Result<()> {
    if state != ModelState::Loaded {
        warn!("no model loaded; results come from the built-in fallback");
    }
    if args.json {
        let report = Report {
            source,
            generation: output.generation,
            variant: pipeline.config().default_variant,
            model_state: state,
            sample_rate: output.signal.sample_rate(),
            duration_seconds: output.signal.duration(),
            results: &output.results,
            diagnostics: pipeline.diagnostics_snapshot(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{source}: {:.2} s @ {} Hz, model {} ({:?})",
        output.signal.duration(),
        output.signal.sample_rate(),
        pipeline.config().default_variant,
        state
    );
    for r in &output.results {
        println!(
            "  {:<16} {:>6.2}%   {:.1} ms",
            r.species,
            r.confidence * 100.0,
            r.inference_time_ms
        );
    }
    Ok(())
}
