//! Pipeline configuration (JSON file + environment overrides).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dsp::DspConfig;
use crate::error::Result;
use crate::inference::ModelVariant;

/// Overrides the models root directory.
pub const ENV_MODEL_DIR: &str = "CHIRP_MODEL_DIR";
/// Overrides the default variant (`precision` / `efficiency`).
pub const ENV_MODEL_VARIANT: &str = "CHIRP_MODEL_VARIANT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PipelineConfig {
    /// All inputs are resampled to this rate before DSP.
    pub target_sample_rate: u32,
    pub dsp: DspConfig,
    pub models_dir: PathBuf,
    pub default_variant: ModelVariant,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            dsp: DspConfig::default(),
            models_dir: default_models_dir(),
            default_variant: ModelVariant::Precision,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        info!(path = ?path, "loaded pipeline config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `CHIRP_MODEL_DIR` / `CHIRP_MODEL_VARIANT`. Blank values are
    /// ignored; an unknown variant is logged and ignored.
    pub fn apply_env(mut self) -> Self {
        self.apply_overrides(
            std::env::var(ENV_MODEL_DIR).ok().as_deref(),
            std::env::var(ENV_MODEL_VARIANT).ok().as_deref(),
        );
        self
    }

    fn apply_overrides(&mut self, model_dir: Option<&str>, variant: Option<&str>) {
        if let Some(dir) = model_dir.map(str::trim).filter(|d| !d.is_empty()) {
            self.models_dir = PathBuf::from(dir);
        }
        if let Some(raw) = variant.map(str::trim).filter(|v| !v.is_empty()) {
            match raw.parse::<ModelVariant>() {
                Ok(v) => self.default_variant = v,
                Err(e) => warn!(error = %e, "ignoring {ENV_MODEL_VARIANT}"),
            }
        }
    }
}

/// Platform data directory for model files.
pub fn default_models_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(|p| PathBuf::from(p).join("Chirp").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("chirp")
            .join("models")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"defaultVariant":"efficiency","dsp":{"windowSize":2048}}"#,
        )
        .unwrap();
        assert_eq!(config.default_variant, ModelVariant::Efficiency);
        assert_eq!(config.target_sample_rate, 16_000);
        assert_eq!(config.dsp.window_size, 2048);
        assert_eq!(config.dsp.hop_size, 512);
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let mut config = PipelineConfig::default();
        config.apply_overrides(Some(" /srv/models "), Some("Efficiency"));
        assert_eq!(config.models_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.default_variant, ModelVariant::Efficiency);

        config.apply_overrides(Some("   "), Some("huge"));
        assert_eq!(config.models_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.default_variant, ModelVariant::Efficiency);
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir()
            .join(format!("chirp-config-{}", std::process::id()))
            .join("config.json");
        let config = PipelineConfig {
            models_dir: PathBuf::from("/opt/chirp"),
            ..PipelineConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn default_models_dir_ends_in_models() {
        assert!(default_models_dir().ends_with("models"));
    }
}
