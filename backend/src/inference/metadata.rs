use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::labels::{LabelTable, LabelTableError};
use super::preprocess::Normalization;
use crate::config::PreprocessingConfig;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Failed to read model metadata {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse model metadata: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid class indices: {0}")]
    Labels(#[from] LabelTableError),
    #[error("Model expects {model}px input, preprocessing produces {configured}px")]
    InputSizeMismatch { model: u32, configured: u32 },
    #[error("Model expects {model:?} normalization, preprocessing applies {configured:?}")]
    NormalizationMismatch {
        model: Normalization,
        configured: Normalization,
    },
}

/// Axis order the exported graph expects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

/// What the final layer of the exported graph emits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelOutput {
    /// Softmax head. Scores are renormalized by their sum, which absorbs reduced-precision drift.
    #[default]
    Probabilities,
    /// Raw scores; softmax is applied after inference.
    Logits,
}

/// Sidecar JSON written next to the exported model at training time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    pub class_indices: BTreeMap<String, usize>,
    #[serde(default)]
    pub input_size: Option<u32>,
    #[serde(default)]
    pub normalization: Option<Normalization>,
    #[serde(default)]
    pub layout: TensorLayout,
    #[serde(default)]
    pub output: ModelOutput,
}

impl ModelMetadata {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let raw = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, MetadataError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn label_table(&self) -> Result<LabelTable, MetadataError> {
        Ok(LabelTable::from_class_indices(&self.class_indices)?)
    }

    /// Fails when the model was trained on inputs the preprocessor does not produce.
    pub fn check_preprocessing(&self, config: &PreprocessingConfig) -> Result<(), MetadataError> {
        if let Some(model) = self.input_size {
            if model != config.input_size {
                return Err(MetadataError::InputSizeMismatch {
                    model,
                    configured: config.input_size,
                });
            }
        }
        if let Some(model) = self.normalization {
            if model != config.normalization {
                return Err(MetadataError::NormalizationMismatch {
                    model,
                    configured: config.normalization,
                });
            }
        }
        Ok(())
    }
}
