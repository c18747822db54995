//! `ChirpPipeline`: top-level orchestration of decode, DSP and inference.
//!
//! ## Run lifecycle
//!
//! ```text
//! classify_*()  → generation = N, stage = audio
//!     └─► resample                 (blocking pool)  stage = dsp
//!         └─► slice/int16/mel      (blocking pool)  stage = inference
//!             └─► InferenceEngine  (blocking pool)  stage = complete, output committed
//! ```
//!
//! The generation is allocated when `classify_*` is called, before the
//! returned future is polled. Between stages, and again at commit, a run
//! whose generation is no longer current stops with
//! `ChirpError::Superseded` and leaves `latest()` untouched.

pub mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn, Instrument};

use crate::audio::{decode_bytes, decode_file, AudioSignal};
use crate::config::PipelineConfig;
use crate::dsp::{DspEngine, MelSpectrogram, SpectrogramData};
use crate::error::{ChirpError, Result};
use crate::inference::{default_loader, EngineHandle, InferenceEngine, ModelState, ModelVariant};
use crate::ipc::events::{ClassificationResult, ProgressEvent, ProgressStage};

pub use pipeline::{DiagnosticsSnapshot, DspOutput, PipelineDiagnostics, RunGuard};

/// Broadcast channel capacity for progress events.
const PROGRESS_CAP: usize = 64;

/// Everything one completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub generation: u64,
    /// Decoded input at the analysis rate.
    pub signal: AudioSignal,
    /// dB spectrogram of the loudest slice.
    pub spectrogram: SpectrogramData,
    pub mel: MelSpectrogram,
    /// Ranked results, highest confidence first.
    pub results: Vec<ClassificationResult>,
}

impl PipelineOutput {
    pub fn top(&self) -> Option<&ClassificationResult> {
        self.results.first()
    }
}

enum Source {
    Bytes { bytes: Vec<u8>, hint: Option<String> },
    File(PathBuf),
    Signal(AudioSignal),
}

struct Inner {
    config: PipelineConfig,
    dsp: DspEngine,
    engine: EngineHandle,
    progress_tx: broadcast::Sender<ProgressEvent>,
    generation: Arc<AtomicU64>,
    latest: Mutex<Option<Arc<PipelineOutput>>>,
    diagnostics: PipelineDiagnostics,
}

/// Cheaply clonable pipeline handle. All clones share state.
#[derive(Clone)]
pub struct ChirpPipeline {
    inner: Arc<Inner>,
}

impl ChirpPipeline {
    /// Pipeline with the default model loader for `config.models_dir`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let engine = EngineHandle::new(InferenceEngine::with_loader(default_loader(
            &config.models_dir,
        )));
        Self::with_engine(config, engine)
    }

    /// Pipeline over an existing inference engine.
    ///
    /// # Errors
    /// `InvalidConfig` if the DSP config is invalid or the target rate is 0.
    pub fn with_engine(config: PipelineConfig, engine: EngineHandle) -> Result<Self> {
        if config.target_sample_rate == 0 {
            return Err(ChirpError::InvalidConfig(
                "targetSampleRate must be non-zero".into(),
            ));
        }
        let dsp = DspEngine::new(config.dsp.clone())?;
        let (progress_tx, _) = broadcast::channel(PROGRESS_CAP);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                dsp,
                engine,
                progress_tx,
                generation: Arc::new(AtomicU64::new(0)),
                latest: Mutex::new(None),
                diagnostics: PipelineDiagnostics::default(),
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn dsp(&self) -> &DspEngine {
        &self.inner.dsp
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.inner.engine
    }

    /// Load a model variant on the blocking pool. Failures leave the engine
    /// unloaded (mock inference) and are only logged.
    pub async fn load_model(&self, variant: ModelVariant) -> Result<ModelState> {
        self.emit(
            self.current_generation(),
            ProgressStage::Loading,
            format!("loading {variant} model"),
        );
        let engine = self.inner.engine.clone();
        let state = tokio::task::spawn_blocking(move || {
            let mut engine = engine.lock();
            engine.load_model(variant);
            engine.state()
        })
        .await
        .map_err(join_err)?;
        info!(%variant, ?state, "model load finished");
        let message = match state {
            ModelState::Loaded => format!("{variant} model ready"),
            _ => format!("{variant} model unavailable; using fallback scores"),
        };
        self.emit(self.current_generation(), ProgressStage::Idle, message);
        Ok(state)
    }

    /// Load `config.default_variant`.
    pub async fn load_default_model(&self) -> Result<ModelState> {
        self.load_model(self.inner.config.default_variant).await
    }

    /// Decode and classify an in-memory container. `hint` is a file
    /// extension used to guide format probing.
    pub fn classify_bytes(
        &self,
        bytes: Vec<u8>,
        hint: Option<String>,
    ) -> impl std::future::Future<Output = Result<Arc<PipelineOutput>>> + Send + 'static {
        self.spawn_run(Source::Bytes { bytes, hint })
    }

    /// Decode and classify a file on disk.
    pub fn classify_file(
        &self,
        path: impl AsRef<Path>,
    ) -> impl std::future::Future<Output = Result<Arc<PipelineOutput>>> + Send + 'static {
        self.spawn_run(Source::File(path.as_ref().to_path_buf()))
    }

    /// Classify an already decoded signal (e.g. a microphone recording).
    pub fn classify_signal(
        &self,
        signal: AudioSignal,
    ) -> impl std::future::Future<Output = Result<Arc<PipelineOutput>>> + Send + 'static {
        self.spawn_run(Source::Signal(signal))
    }

    /// Output of the newest committed run.
    pub fn latest(&self) -> Option<Arc<PipelineOutput>> {
        self.inner.latest.lock().clone()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.progress_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.inner.diagnostics.snapshot()
    }

    /// Drop the committed output and supersede any in-flight run.
    pub fn clear(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.latest.lock() = None;
        self.emit(generation, ProgressStage::Idle, "cleared");
        info!(generation, "pipeline cleared");
    }

    /// Generation of the newest run (0 before the first run).
    pub fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn spawn_run(
        &self,
        source: Source,
    ) -> impl std::future::Future<Output = Result<Arc<PipelineOutput>>> + Send + 'static {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .diagnostics
            .runs_started
            .fetch_add(1, Ordering::Relaxed);
        let guard = RunGuard::new(generation, Arc::clone(&self.inner.generation));
        let this = self.clone();
        let span = tracing::info_span!("classify", generation);

        async move {
            match this.run(&guard, source).await {
                Ok(output) => Ok(output),
                Err(e @ ChirpError::Superseded { .. }) => {
                    this.inner
                        .diagnostics
                        .runs_superseded
                        .fetch_add(1, Ordering::Relaxed);
                    info!("run superseded; discarding");
                    Err(e)
                }
                Err(e) => {
                    this.inner
                        .diagnostics
                        .runs_failed
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "run failed");
                    this.emit(generation, ProgressStage::Error, e.to_string());
                    Err(e)
                }
            }
        }
        .instrument(span)
    }

    async fn run(&self, guard: &RunGuard, source: Source) -> Result<Arc<PipelineOutput>> {
        let generation = guard.generation();
        let target_rate = self.inner.config.target_sample_rate;

        // ── audio ────────────────────────────────────────────────────────────
        self.emit(generation, ProgressStage::Audio, "decoding audio");
        let decoded = match source {
            Source::Signal(signal) => signal,
            Source::Bytes { bytes, hint } => {
                tokio::task::spawn_blocking(move || decode_bytes(bytes, hint.as_deref()))
                    .await
                    .map_err(join_err)??
            }
            Source::File(path) => tokio::task::spawn_blocking(move || decode_file(&path))
                .await
                .map_err(join_err)??,
        };
        self.inner
            .diagnostics
            .samples_in
            .fetch_add(decoded.len(), Ordering::Relaxed);
        guard.check()?;

        let signal =
            tokio::task::spawn_blocking(move || pipeline::prepare_signal(&decoded, target_rate))
                .await
                .map_err(join_err)??;
        self.inner
            .diagnostics
            .samples_resampled
            .fetch_add(signal.len(), Ordering::Relaxed);
        guard.check()?;

        // ── dsp ──────────────────────────────────────────────────────────────
        self.emit(generation, ProgressStage::Dsp, "extracting features");
        let dsp = self.inner.dsp.clone();
        let (signal, features) = tokio::task::spawn_blocking(move || {
            let features = pipeline::run_dsp(&dsp, &signal);
            (signal, features)
        })
        .await
        .map_err(join_err)?;
        let DspOutput { spectrogram, mel } = features?;
        guard.check()?;

        // ── inference ────────────────────────────────────────────────────────
        self.emit(generation, ProgressStage::Inference, "classifying");
        let engine = self.inner.engine.clone();
        let (mel, results, used_mock) = tokio::task::spawn_blocking(move || {
            let mut engine = engine.lock();
            let used_mock = !engine.is_loaded();
            let results = engine.infer(&mel);
            (mel, results, used_mock)
        })
        .await
        .map_err(join_err)?;
        self.inner
            .diagnostics
            .inference_calls
            .fetch_add(1, Ordering::Relaxed);
        if used_mock {
            self.inner
                .diagnostics
                .mock_inferences
                .fetch_add(1, Ordering::Relaxed);
        }

        // ── commit ───────────────────────────────────────────────────────────
        let output = Arc::new(PipelineOutput {
            generation,
            signal,
            spectrogram,
            mel,
            results,
        });
        self.commit(guard, &output)?;

        self.inner
            .diagnostics
            .runs_completed
            .fetch_add(1, Ordering::Relaxed);
        let summary = output
            .top()
            .map(|r| format!("{} ({:.1}%)", r.species, r.confidence * 100.0))
            .unwrap_or_else(|| "no result".into());
        info!(top = %summary, "run complete");
        self.emit(generation, ProgressStage::Complete, summary);
        Ok(output)
    }

    fn commit(&self, guard: &RunGuard, output: &Arc<PipelineOutput>) -> Result<()> {
        let mut latest = self.inner.latest.lock();
        guard.check()?;
        if latest
            .as_ref()
            .is_some_and(|prev| prev.generation > guard.generation())
        {
            return Err(ChirpError::Superseded {
                generation: guard.generation(),
            });
        }
        *latest = Some(Arc::clone(output));
        Ok(())
    }

    fn emit(&self, generation: u64, stage: ProgressStage, message: impl Into<String>) {
        // No receivers is fine.
        let _ = self
            .inner
            .progress_tx
            .send(ProgressEvent::new(generation, stage, message));
    }
}

impl std::fmt::Debug for ChirpPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChirpPipeline")
            .field("generation", &self.current_generation())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn join_err(e: tokio::task::JoinError) -> ChirpError {
    ChirpError::Other(anyhow::anyhow!("blocking task failed: {e}"))
}
