//! Classifier variants, their metadata, and on-disk model manifests.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChirpError, Result};

/// Label of the positive class both variants were trained to detect.
pub const TARGET_SPECIES: &str = "Eurasian Wren";

/// Label of the catch-all negative class.
pub const OTHER_LABEL: &str = "Other";

/// File name of the model description inside each variant directory.
pub const MANIFEST_FILE: &str = "model.json";

/// One of the two interchangeable classifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// Larger network, higher rated accuracy.
    #[default]
    Precision,
    /// Smaller network for constrained hosts.
    Efficiency,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 2] = [ModelVariant::Precision, ModelVariant::Efficiency];

    /// Directory name and identifier of the variant.
    pub fn id(self) -> &'static str {
        match self {
            ModelVariant::Precision => "precision",
            ModelVariant::Efficiency => "efficiency",
        }
    }

    pub fn config(self) -> ModelConfig {
        let labels = vec![OTHER_LABEL.to_string(), TARGET_SPECIES.to_string()];
        match self {
            ModelVariant::Precision => ModelConfig {
                id: self.id().into(),
                display_name: "Precision".into(),
                accuracy: 0.94,
                memory_footprint_kb: 312,
                input_shape: [1, 55, 40, 1],
                labels,
            },
            ModelVariant::Efficiency => ModelConfig {
                id: self.id().into(),
                display_name: "Efficiency".into(),
                accuracy: 0.89,
                memory_footprint_kb: 64,
                input_shape: [1, 55, 40, 1],
                labels,
            },
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ModelVariant {
    type Err = ChirpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "precision" => Ok(ModelVariant::Precision),
            "efficiency" => Ok(ModelVariant::Efficiency),
            other => Err(ChirpError::InvalidConfig(format!(
                "unknown model variant '{other}' (expected 'precision' or 'efficiency')"
            ))),
        }
    }
}

/// Static description of a classifier variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub id: String,
    pub display_name: String,
    /// Rated accuracy on the validation set, in [0, 1].
    pub accuracy: f32,
    pub memory_footprint_kb: u32,
    /// `[batch, frames, bands, channels]`.
    pub input_shape: [usize; 4],
    /// Class labels in model output order.
    pub labels: Vec<String>,
}

impl ModelConfig {
    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }
}

/// Every known variant, in display order.
pub fn model_catalog() -> Vec<ModelConfig> {
    ModelVariant::ALL.iter().map(|v| v.config()).collect()
}

/// Contents of `<models_root>/<id>/model.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelManifest {
    /// Weights file, relative to the manifest.
    pub weights: String,
    pub input_shape: Vec<usize>,
    pub labels: Vec<String>,
    /// Graph input to feed; the first input when absent.
    #[serde(default)]
    pub input_name: Option<String>,
    /// Graph output to read; the first output when absent.
    #[serde(default)]
    pub output_name: Option<String>,
}

impl ModelManifest {
    /// Read and parse the manifest in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(ChirpError::ModelNotFound { path });
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The manifest must describe the same tensor shape and labels as the
    /// variant it is loaded for.
    pub fn ensure_matches(&self, config: &ModelConfig) -> Result<()> {
        if self.input_shape.as_slice() != config.input_shape.as_slice() {
            return Err(ChirpError::ModelLoad {
                variant: config.id.clone(),
                reason: format!(
                    "manifest input shape {:?} does not match {:?}",
                    self.input_shape, config.input_shape
                ),
            });
        }
        if self.labels != config.labels {
            return Err(ChirpError::ModelLoad {
                variant: config.id.clone(),
                reason: format!(
                    "manifest labels {:?} do not match {:?}",
                    self.labels, config.labels
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ModelManifest {
        ModelManifest {
            weights: "model.onnx".into(),
            input_shape: vec![1, 55, 40, 1],
            labels: vec!["Other".into(), "Eurasian Wren".into()],
            input_name: None,
            output_name: None,
        }
    }

    #[test]
    fn catalog_has_both_variants() {
        let catalog = model_catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].id, "precision");
        assert_eq!(catalog[1].id, "efficiency");
        for config in &catalog {
            assert_eq!(config.input_shape, [1, 55, 40, 1]);
            assert_eq!(config.labels, vec!["Other", "Eurasian Wren"]);
            assert!((0.0..=1.0).contains(&config.accuracy));
        }
    }

    #[test]
    fn variant_parses_case_insensitively() {
        assert_eq!(" Precision ".parse::<ModelVariant>().unwrap(), ModelVariant::Precision);
        assert_eq!("EFFICIENCY".parse::<ModelVariant>().unwrap(), ModelVariant::Efficiency);
        assert!(matches!(
            "tiny".parse::<ModelVariant>(),
            Err(ChirpError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_serializes_camel_case() {
        let json = serde_json::to_value(ModelVariant::Efficiency.config()).unwrap();
        assert_eq!(json["displayName"], "Efficiency");
        assert_eq!(json["memoryFootprintKb"], 64);
        assert_eq!(json["inputShape"], serde_json::json!([1, 55, 40, 1]));
    }

    #[test]
    fn manifest_must_match_variant() {
        let config = ModelVariant::Precision.config();
        assert!(manifest().ensure_matches(&config).is_ok());

        let mut wrong_shape = manifest();
        wrong_shape.input_shape = vec![1, 49, 40, 1];
        assert!(matches!(
            wrong_shape.ensure_matches(&config),
            Err(ChirpError::ModelLoad { .. })
        ));

        let mut wrong_labels = manifest();
        wrong_labels.labels.reverse();
        assert!(wrong_labels.ensure_matches(&config).is_err());
    }

    #[test]
    fn manifest_parses_optional_names() {
        let parsed: ModelManifest = serde_json::from_str(
            r#"{"weights":"w.onnx","inputShape":[1,55,40,1],"labels":["Other","Eurasian Wren"],"outputName":"probs"}"#,
        )
        .unwrap();
        assert_eq!(parsed.output_name.as_deref(), Some("probs"));
        assert!(parsed.input_name.is_none());
    }

    #[test]
    fn missing_manifest_is_not_found() {
        let dir = std::env::temp_dir().join("chirp-no-such-model-dir");
        assert!(matches!(
            ModelManifest::load(&dir),
            Err(ChirpError::ModelNotFound { .. })
        ));
    }
}
