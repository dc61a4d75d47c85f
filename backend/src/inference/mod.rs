pub mod advisory;
pub mod classifier;
pub mod labels;
pub mod metadata;
pub mod pipeline;
pub mod preprocess;
#[cfg(feature = "torch")]
pub mod torch_backend;
pub mod validator;

use crate::config::AppConfig;
use classifier::ModelLoader;

/// The loader the binary uses: TorchScript when built with `torch`, otherwise a loader
/// that reports the model as unavailable.
pub fn default_loader(config: &AppConfig) -> Box<dyn ModelLoader> {
    #[cfg(feature = "torch")]
    {
        Box::new(torch_backend::TorchModelLoader::new(
            config.model.clone(),
            config.preprocessing,
        ))
    }
    #[cfg(not(feature = "torch"))]
    {
        Box::new(classifier::UnavailableLoader::new(format!(
            "built without the `torch` feature; cannot load {}",
            config.model.path.display()
        )))
    }
}
