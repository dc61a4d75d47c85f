//! Process-wide model handle.
//!
//! The model is loaded at most once. The first caller of [`ClassifierAdapter::classify`] or
//! [`ClassifierAdapter::ensure_loaded`] runs the injected [`ModelLoader`]; callers arriving while
//! that load is in flight block until it finishes. A failed load is cached and never retried.

use shared::DementiaStage;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use super::labels::LabelTable;
use super::metadata::{MetadataError, ModelOutput};
use super::preprocess::NormalizedTensor;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("model artifact not found: {0}")]
    MissingArtifact(String),
    #[error("model metadata: {0}")]
    Metadata(#[from] MetadataError),
    #[error("backend failed to load model: {0}")]
    Backend(String),
    #[error("{0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("model returned {found} scores, expected {expected}")]
    OutputShape { expected: usize, found: usize },
    #[error("model returned non-finite scores")]
    NonFinite,
    #[error("model returned scores that are not probabilities")]
    NotProbabilities,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifyError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
}

/// Runs one forward pass and returns raw scores, one per model output index.
pub trait ModelBackend: Send + Sync {
    fn forward(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>, InferenceError>;
}

pub trait ModelLoader: Send + Sync {
    /// Human-readable description of what is being loaded, for logs.
    fn describe(&self) -> String;
    fn load(&self) -> Result<LoadedModel, ModelLoadError>;
}

pub struct LoadedModel {
    backend: Box<dyn ModelBackend>,
    labels: LabelTable,
    output: ModelOutput,
}

impl LoadedModel {
    /// A model whose head emits probabilities.
    pub fn new(backend: Box<dyn ModelBackend>, labels: LabelTable) -> Self {
        Self {
            backend,
            labels,
            output: ModelOutput::default(),
        }
    }

    pub fn with_output(mut self, output: ModelOutput) -> Self {
        self.output = output;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub label: DementiaStage,
    /// Probability of `label`, in [0, 1].
    pub confidence: f32,
    pub class_probabilities: BTreeMap<DementiaStage, f32>,
}

impl PredictionResult {
    pub fn from_scores(
        scores: &[f32],
        labels: &LabelTable,
        output: ModelOutput,
    ) -> Result<Self, InferenceError> {
        if scores.len() != labels.len() {
            return Err(InferenceError::OutputShape {
                expected: labels.len(),
                found: scores.len(),
            });
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(InferenceError::NonFinite);
        }

        let probabilities = match output {
            ModelOutput::Probabilities => renormalize(scores)?,
            ModelOutput::Logits => softmax(scores),
        };

        // Strict comparison keeps the lowest index on ties.
        let mut best = 0;
        for (index, &p) in probabilities.iter().enumerate() {
            if p > probabilities[best] {
                best = index;
            }
        }

        let mut class_probabilities = BTreeMap::new();
        for (index, stage) in labels.iter() {
            class_probabilities.insert(stage, probabilities[index]);
        }
        let label = labels
            .stage_at(best)
            .ok_or(InferenceError::OutputShape {
                expected: labels.len(),
                found: scores.len(),
            })?;

        Ok(Self {
            label,
            confidence: probabilities[best],
            class_probabilities,
        })
    }
}

fn renormalize(scores: &[f32]) -> Result<Vec<f32>, InferenceError> {
    let sum: f32 = scores.iter().sum();
    if scores.iter().any(|&s| s < 0.0) || sum <= 0.0 {
        return Err(InferenceError::NotProbabilities);
    }
    Ok(scores.iter().map(|s| s / sum).collect())
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

pub struct ClassifierAdapter {
    loader: Box<dyn ModelLoader>,
    model: OnceLock<Result<Arc<LoadedModel>, String>>,
}

impl ClassifierAdapter {
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            model: OnceLock::new(),
        }
    }

    /// Loads the model if nobody has tried yet. Returns the cached outcome otherwise.
    pub fn ensure_loaded(&self) -> Result<(), ClassifyError> {
        self.model().map(|_| ())
    }

    /// True once a load has finished successfully. Never triggers a load.
    pub fn is_loaded(&self) -> bool {
        matches!(self.model.get(), Some(Ok(_)))
    }

    pub fn classify(&self, tensor: &NormalizedTensor) -> Result<PredictionResult, ClassifyError> {
        let model = self.model()?;
        let scores = model.backend.forward(tensor)?;
        Ok(PredictionResult::from_scores(
            &scores,
            &model.labels,
            model.output,
        )?)
    }

    fn model(&self) -> Result<Arc<LoadedModel>, ClassifyError> {
        let slot = self.model.get_or_init(|| {
            log::info!("Loading model: {}", self.loader.describe());
            match self.loader.load() {
                Ok(model) => {
                    log::info!("Model loaded");
                    Ok(Arc::new(model))
                }
                Err(e) => {
                    log::error!("Model load failed: {}", e);
                    Err(e.to_string())
                }
            }
        });
        match slot {
            Ok(model) => Ok(model.clone()),
            Err(reason) => Err(ClassifyError::ModelUnavailable(reason.clone())),
        }
    }
}

/// Loader for builds without a model backend. Always fails, so the service runs and
/// reports the model as unavailable.
pub struct UnavailableLoader {
    reason: String,
}

impl UnavailableLoader {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ModelLoader for UnavailableLoader {
    fn describe(&self) -> String {
        "no model backend".to_string()
    }

    fn load(&self) -> Result<LoadedModel, ModelLoadError> {
        Err(ModelLoadError::Unsupported(self.reason.clone()))
    }
}
