//! ONNX Runtime classifier backend via the `ort` crate.
//!
//! ## Model directory layout
//!
//! ```text
//! <models_root>/
//!   precision/
//!     model.json     {"weights":"model.onnx","inputShape":[1,55,40,1],"labels":["Other","Eurasian Wren"]}
//!     model.onnx
//!   efficiency/
//!     model.json
//!     model.onnx
//! ```
//!
//! ## Model I/O
//!
//! | Tensor | Shape           | DType |
//! |--------|-----------------|-------|
//! | input  | `[1, 55, 40, 1]`| f32   |
//! | output | `[1, classes]`  | f32   |

use std::path::{Path, PathBuf};

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::{debug, info};

use crate::error::{ChirpError, Result};
use crate::inference::models::{ModelConfig, ModelManifest};
use crate::inference::{BirdClassifier, InputTensor, ModelLoader};

/// Loads variants from `<models_root>/<id>/`.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    models_root: PathBuf,
}

impl OnnxLoader {
    pub fn new(models_root: impl Into<PathBuf>) -> Self {
        Self {
            models_root: models_root.into(),
        }
    }

    pub fn models_root(&self) -> &Path {
        &self.models_root
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self, config: &ModelConfig) -> Result<Box<dyn BirdClassifier>> {
        let dir = self.models_root.join(&config.id);
        let manifest = ModelManifest::load(&dir)?;
        manifest.ensure_matches(config)?;

        let weights = dir.join(&manifest.weights);
        if !weights.exists() {
            return Err(ChirpError::ModelNotFound { path: weights });
        }

        let session = create_session(&weights, &config.id)?;
        let classifier = OnnxClassifier::new(session, &manifest, config)?;
        Ok(Box::new(classifier))
    }
}

fn load_err<E: std::fmt::Display>(variant: &str) -> impl Fn(E) -> ChirpError + '_ {
    move |e| ChirpError::ModelLoad {
        variant: variant.to_string(),
        reason: e.to_string(),
    }
}

fn create_session(model_path: &Path, variant: &str) -> Result<Session> {
    let logical_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    let intra_threads = std::env::var("CHIRP_ORT_INTRA_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(logical_cores.clamp(1, 4))
        .clamp(1, 16);

    let size_kb = std::fs::metadata(model_path)
        .map(|m| m.len() / 1024)
        .unwrap_or(0);
    info!(path = ?model_path, size_kb, intra_threads, "creating ONNX session");

    SessionBuilder::new()
        .map_err(load_err(variant))?
        .with_intra_threads(intra_threads)
        .map_err(load_err(variant))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(load_err(variant))?
        .commit_from_file(model_path)
        .map_err(load_err(variant))
}

/// A loaded ONNX classifier.
pub struct OnnxClassifier {
    session: Session,
    input_name: String,
    output_name: Option<String>,
    num_classes: usize,
}

impl OnnxClassifier {
    fn new(session: Session, manifest: &ModelManifest, config: &ModelConfig) -> Result<Self> {
        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        info!(variant = %config.id, inputs = ?input_names, outputs = ?output_names, "ONNX graph");

        let input_name = manifest
            .input_name
            .clone()
            .filter(|name| input_names.contains(name))
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| ChirpError::ModelLoad {
                variant: config.id.clone(),
                reason: "graph has no inputs".into(),
            })?;
        let output_name = manifest
            .output_name
            .clone()
            .filter(|name| output_names.contains(name));

        Ok(Self {
            session,
            input_name,
            output_name,
            num_classes: config.num_classes(),
        })
    }
}

impl BirdClassifier for OnnxClassifier {
    fn predict(&mut self, input: &InputTensor) -> Result<Vec<f32>> {
        let value = Value::from_array(input.array().clone())
            .map_err(|e: ort::Error| ChirpError::InferenceRuntime(e.to_string()))?;
        let inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), value.into())];

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| ChirpError::InferenceRuntime(e.to_string()))?;
        let output = self
            .output_name
            .as_deref()
            .and_then(|name| outputs.get(name))
            .unwrap_or(&outputs[0]);
        let (_, scores) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ChirpError::InferenceRuntime(e.to_string()))?;

        debug!(expected = self.num_classes, got = scores.len(), "ONNX forward pass");
        Ok(scores.to_vec())
    }
}

impl std::fmt::Debug for OnnxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClassifier")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("num_classes", &self.num_classes)
            .finish_non_exhaustive()
    }
}
