//! Bird classifier abstraction and the engine that owns the active model.
//!
//! `BirdClassifier` decouples inference from any specific backend and
//! `ModelLoader` decides where weights come from. `&mut self` on `predict`
//! lets backends keep scratch state; all access is serialised through
//! [`EngineHandle`]'s `parking_lot::Mutex`.
//!
//! Model failures never surface to callers: a failed load leaves the engine
//! unloaded and a failed forward pass is replaced by the mock distribution.

pub mod mock;
pub mod models;
pub mod tensor;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxClassifier, OnnxLoader};

pub use mock::{mock_distribution, MOCK_SCORES};
pub use models::{model_catalog, ModelConfig, ModelManifest, ModelVariant};
pub use tensor::InputTensor;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dsp::MelSpectrogram;
use crate::error::{ChirpError, Result};
use crate::ipc::events::ClassificationResult;

/// Contract for classifier backends.
pub trait BirdClassifier: Send + 'static {
    /// Raw per-class scores in label order.
    ///
    /// # Errors
    /// Any runtime failure. The engine logs it and falls back to the mock.
    fn predict(&mut self, input: &InputTensor) -> Result<Vec<f32>>;
}

/// Produces a classifier for a variant.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self, config: &ModelConfig) -> Result<Box<dyn BirdClassifier>>;
}

/// Loader used when no inference backend is compiled in. Always fails, so
/// the engine stays on the mock.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLoader;

impl ModelLoader for UnavailableLoader {
    fn load(&self, config: &ModelConfig) -> Result<Box<dyn BirdClassifier>> {
        Err(ChirpError::ModelLoad {
            variant: config.id.clone(),
            reason: "no inference backend available (built without `onnx`)".into(),
        })
    }
}

/// Loader for the configured models directory: ONNX when compiled in,
/// otherwise [`UnavailableLoader`].
pub fn default_loader(models_dir: &std::path::Path) -> Box<dyn ModelLoader> {
    #[cfg(feature = "onnx")]
    {
        Box::new(OnnxLoader::new(models_dir))
    }
    #[cfg(not(feature = "onnx"))]
    {
        debug!(models_dir = ?models_dir, "onnx feature disabled; models will not load");
        Box::new(UnavailableLoader)
    }
}

/// Lifecycle of the engine's model slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Unloaded,
    /// Held only for the duration of [`InferenceEngine::load_model`], which
    /// runs under the engine lock, so readers never observe it. Callers
    /// that need to surface a load in progress get it from the pipeline's
    /// `Loading` progress event instead.
    Loading,
    Loaded,
}

struct ActiveModel {
    variant: ModelVariant,
    config: ModelConfig,
    classifier: Box<dyn BirdClassifier>,
}

/// Owns at most one loaded classifier.
pub struct InferenceEngine {
    loader: Box<dyn ModelLoader>,
    state: ModelState,
    active: Option<ActiveModel>,
}

impl InferenceEngine {
    pub fn new(loader: impl ModelLoader) -> Self {
        Self::with_loader(Box::new(loader))
    }

    pub fn with_loader(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            state: ModelState::Unloaded,
            active: None,
        }
    }

    /// Make `variant` the active model.
    ///
    /// No-op if it is already loaded. Any other loaded model is disposed
    /// first. Failures are logged and leave the engine unloaded. The state
    /// on return is always `Loaded` or `Unloaded`.
    pub fn load_model(&mut self, variant: ModelVariant) {
        if self.loaded_variant() == Some(variant) {
            debug!(%variant, "model already loaded");
            return;
        }
        self.dispose();

        self.state = ModelState::Loading;
        let config = variant.config();
        let started = Instant::now();
        match self.loader.load(&config) {
            Ok(classifier) => {
                info!(
                    %variant,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model loaded"
                );
                self.active = Some(ActiveModel {
                    variant,
                    config,
                    classifier,
                });
                self.state = ModelState::Loaded;
            }
            Err(e) => {
                let err = match e {
                    e @ ChirpError::ModelLoad { .. } => e,
                    other => ChirpError::ModelLoad {
                        variant: variant.id().to_string(),
                        reason: other.to_string(),
                    },
                };
                warn!(error = %err, "model unavailable; inference will use the mock");
                self.state = ModelState::Unloaded;
            }
        }
    }

    /// Classify a mel spectrogram.
    ///
    /// Always returns one result per class label, sorted by descending
    /// confidence, each confidence clamped to [0, 1].
    pub fn infer(&mut self, mel: &MelSpectrogram) -> Vec<ClassificationResult> {
        let started = Instant::now();
        let labels = match &self.active {
            Some(active) => active.config.labels.clone(),
            None => ModelVariant::default().config().labels,
        };
        let num_classes = labels.len();

        let scores = match self.run_active(mel) {
            Some(Ok(scores)) => scores,
            Some(Err(e)) => {
                let err = match e {
                    e @ ChirpError::InferenceRuntime(_) => e,
                    other => ChirpError::InferenceRuntime(other.to_string()),
                };
                warn!(error = %err, "inference failed; using mock scores");
                mock_distribution(num_classes)
            }
            None => mock_distribution(num_classes),
        };
        let inference_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut results: Vec<ClassificationResult> = labels
            .into_iter()
            .zip(scores)
            .map(|(species, score)| ClassificationResult {
                species,
                confidence: score.clamp(0.0, 1.0),
                inference_time_ms,
            })
            .collect();
        results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        results.truncate(num_classes);

        debug!(inference_time_ms, top = ?results.first().map(|r| &r.species), "inference done");
        results
    }

    /// `None` when no model is loaded.
    fn run_active(&mut self, mel: &MelSpectrogram) -> Option<Result<Vec<f32>>> {
        self.active.as_mut().map(|active| forward(active, mel))
    }

    /// Drop the active model, if any.
    pub fn dispose(&mut self) {
        if let Some(active) = self.active.take() {
            info!(variant = %active.variant, "disposing model");
            drop(active);
        }
        self.state = ModelState::Unloaded;
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn loaded_variant(&self) -> Option<ModelVariant> {
        self.active.as_ref().map(|a| a.variant)
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ModelState::Loaded
    }

    /// Config of the loaded model.
    pub fn config(&self) -> Option<&ModelConfig> {
        self.active.as_ref().map(|a| &a.config)
    }
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("state", &self.state)
            .field("variant", &self.loaded_variant())
            .finish_non_exhaustive()
    }
}

fn forward(active: &mut ActiveModel, mel: &MelSpectrogram) -> Result<Vec<f32>> {
    let tensor = InputTensor::from_mel(mel)?;
    if tensor.shape() != active.config.input_shape {
        return Err(ChirpError::InferenceRuntime(format!(
            "input shape {:?} does not match model shape {:?}",
            tensor.shape(),
            active.config.input_shape
        )));
    }
    let scores = active.classifier.predict(&tensor)?;
    let num_classes = active.config.num_classes();
    if scores.len() != num_classes {
        return Err(ChirpError::InferenceRuntime(format!(
            "model returned {} scores for {} classes",
            scores.len(),
            num_classes
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ChirpError::InferenceRuntime(
            "model returned non-finite scores".into(),
        ));
    }
    Ok(scores)
}

/// Thread-safe shared handle to an [`InferenceEngine`].
#[derive(Clone, Debug)]
pub struct EngineHandle(pub Arc<Mutex<InferenceEngine>>);

impl EngineHandle {
    pub fn new(engine: InferenceEngine) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, InferenceEngine> {
        self.0.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier(Vec<f32>);

    impl BirdClassifier for FixedClassifier {
        fn predict(&mut self, _input: &InputTensor) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct FailingClassifier;

    impl BirdClassifier for FailingClassifier {
        fn predict(&mut self, _input: &InputTensor) -> Result<Vec<f32>> {
            Err(ChirpError::InferenceRuntime("boom".into()))
        }
    }

    /// Hands out a fresh classifier built by `make` and counts loads.
    struct FnLoader<F> {
        make: F,
        loads: Arc<AtomicUsize>,
    }

    impl<F> ModelLoader for FnLoader<F>
    where
        F: Fn(&ModelConfig) -> Result<Box<dyn BirdClassifier>> + Send + Sync + 'static,
    {
        fn load(&self, config: &ModelConfig) -> Result<Box<dyn BirdClassifier>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            (self.make)(config)
        }
    }

    fn engine_with<F>(make: F) -> (InferenceEngine, Arc<AtomicUsize>)
    where
        F: Fn(&ModelConfig) -> Result<Box<dyn BirdClassifier>> + Send + Sync + 'static,
    {
        let loads = Arc::new(AtomicUsize::new(0));
        let engine = InferenceEngine::new(FnLoader {
            make,
            loads: loads.clone(),
        });
        (engine, loads)
    }

    fn silent_mel() -> MelSpectrogram {
        MelSpectrogram::from_rows(Vec::new(), 55, 40)
    }

    #[test]
    fn unloaded_engine_uses_mock() {
        let mut engine = InferenceEngine::new(UnavailableLoader);
        engine.load_model(ModelVariant::Precision);
        assert_eq!(engine.state(), ModelState::Unloaded);
        assert!(engine.config().is_none());

        let results = engine.infer(&silent_mel());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].species, "Other");
        assert_relative_eq!(results[0].confidence, 0.6, epsilon = 1e-6);
        assert_eq!(results[1].species, "Eurasian Wren");
        let total: f32 = results.iter().map(|r| r.confidence).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn loaded_model_results_are_sorted_and_clamped() {
        let (mut engine, _) = engine_with(|_| Ok(Box::new(FixedClassifier(vec![-0.2, 1.7]))));
        engine.load_model(ModelVariant::Efficiency);
        assert!(engine.is_loaded());
        assert_eq!(engine.loaded_variant(), Some(ModelVariant::Efficiency));

        let results = engine.infer(&silent_mel());
        assert_eq!(results[0].species, "Eurasian Wren");
        assert_eq!(results[0].confidence, 1.0);
        assert_eq!(results[1].confidence, 0.0);
        assert!(results.iter().all(|r| r.inference_time_ms >= 0.0));
    }

    #[test]
    fn reloading_same_variant_is_a_no_op() {
        let (mut engine, loads) = engine_with(|_| Ok(Box::new(FixedClassifier(vec![0.5, 0.5]))));
        engine.load_model(ModelVariant::Precision);
        engine.load_model(ModelVariant::Precision);
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        engine.load_model(ModelVariant::Efficiency);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(engine.loaded_variant(), Some(ModelVariant::Efficiency));
    }

    #[test]
    fn runtime_failure_falls_back_to_mock() {
        let (mut engine, _) = engine_with(|_| Ok(Box::new(FailingClassifier)));
        engine.load_model(ModelVariant::Precision);
        let results = engine.infer(&silent_mel());
        assert_relative_eq!(results[0].confidence, 0.6, epsilon = 1e-6);
        // the model stays loaded after a runtime failure
        assert!(engine.is_loaded());
    }

    #[test]
    fn wrong_score_count_falls_back_to_mock() {
        let (mut engine, _) =
            engine_with(|_| Ok(Box::new(FixedClassifier(vec![0.1, 0.2, 0.7]))));
        engine.load_model(ModelVariant::Precision);
        let results = engine.infer(&silent_mel());
        assert_eq!(results.len(), 2);
        assert_relative_eq!(results[0].confidence, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn non_finite_scores_fall_back_to_mock() {
        let (mut engine, _) =
            engine_with(|_| Ok(Box::new(FixedClassifier(vec![f32::NAN, 0.2]))));
        engine.load_model(ModelVariant::Precision);
        let results = engine.infer(&silent_mel());
        assert_relative_eq!(results[0].confidence, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn mismatched_mel_shape_falls_back_to_mock() {
        let (mut engine, _) = engine_with(|_| Ok(Box::new(FixedClassifier(vec![0.1, 0.9]))));
        engine.load_model(ModelVariant::Precision);
        let results = engine.infer(&MelSpectrogram::from_rows(Vec::new(), 49, 40));
        assert_relative_eq!(results[0].confidence, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn failed_load_disposes_previous_model() {
        let (mut engine, _) = engine_with(|config| {
            if config.id == "precision" {
                Ok(Box::new(FixedClassifier(vec![0.1, 0.9])))
            } else {
                Err(ChirpError::Io(std::io::Error::other("disk gone")))
            }
        });
        engine.load_model(ModelVariant::Precision);
        assert!(engine.is_loaded());

        engine.load_model(ModelVariant::Efficiency);
        assert_eq!(engine.state(), ModelState::Unloaded);
        assert_eq!(engine.loaded_variant(), None);
    }

    #[test]
    fn dispose_resets_state() {
        let (mut engine, _) = engine_with(|_| Ok(Box::new(FixedClassifier(vec![0.1, 0.9]))));
        engine.load_model(ModelVariant::Precision);
        engine.dispose();
        assert_eq!(engine.state(), ModelState::Unloaded);
        assert!(!engine.is_loaded());
        engine.dispose();
    }

    #[test]
    fn handle_shares_engine() {
        let handle = EngineHandle::new(InferenceEngine::new(UnavailableLoader));
        let clone = handle.clone();
        clone.lock().load_model(ModelVariant::Efficiency);
        assert_eq!(handle.lock().state(), ModelState::Unloaded);
    }
}
