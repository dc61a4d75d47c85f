use std::sync::Mutex;
use tch::{CModule, Device, Kind, Tensor};

use super::classifier::{InferenceError, LoadedModel, ModelBackend, ModelLoadError, ModelLoader};
use super::metadata::{ModelMetadata, TensorLayout};
use super::preprocess::{NormalizedTensor, CHANNELS};
use crate::config::{DeviceChoice, ModelConfig, PreprocessingConfig};

pub struct TorchModelLoader {
    config: ModelConfig,
    preprocessing: PreprocessingConfig,
}

impl TorchModelLoader {
    pub fn new(config: ModelConfig, preprocessing: PreprocessingConfig) -> Self {
        Self {
            config,
            preprocessing,
        }
    }

    fn device(&self) -> Device {
        match self.config.device {
            DeviceChoice::Cpu => Device::Cpu,
            DeviceChoice::Cuda => Device::Cuda(0),
            DeviceChoice::Auto => Device::cuda_if_available(),
        }
    }
}

impl ModelLoader for TorchModelLoader {
    fn describe(&self) -> String {
        format!("TorchScript {}", self.config.path.display())
    }

    fn load(&self) -> Result<LoadedModel, ModelLoadError> {
        if !self.config.path.exists() {
            return Err(ModelLoadError::MissingArtifact(
                self.config.path.display().to_string(),
            ));
        }
        let metadata = ModelMetadata::load(&self.config.metadata_path())?;
        metadata.check_preprocessing(&self.preprocessing)?;
        let labels = metadata.label_table()?;

        let device = self.device();
        let module = CModule::load_on_device(&self.config.path, device)
            .map_err(|e| ModelLoadError::Backend(e.to_string()))?;
        log::info!("TorchScript module loaded on {:?}", device);

        let backend = TorchBackend {
            module: Mutex::new(module),
            device,
            layout: metadata.layout,
            input_size: self.preprocessing.input_size as i64,
        };
        Ok(LoadedModel::new(Box::new(backend), labels).with_output(metadata.output))
    }
}

pub struct TorchBackend {
    module: Mutex<CModule>,
    device: Device,
    layout: TensorLayout,
    input_size: i64,
}

impl ModelBackend for TorchBackend {
    fn forward(&self, tensor: &NormalizedTensor) -> Result<Vec<f32>, InferenceError> {
        let size = self.input_size;
        let values = tensor.to_vec();
        let input = Tensor::from_slice(&values).view([1, size, size, CHANNELS as i64]);
        let input = match self.layout {
            TensorLayout::Nhwc => input,
            TensorLayout::Nchw => input.permute([0, 3, 1, 2]).contiguous(),
        }
        .to_device(self.device);

        let module = self
            .module
            .lock()
            .map_err(|_| InferenceError::Backend("model mutex poisoned".to_string()))?;
        let output = tch::no_grad(|| module.forward_ts(&[input]))
            .map_err(|e| InferenceError::Backend(e.to_string()))?;

        let output = output.to_kind(Kind::Float).to_device(Device::Cpu).view([-1]);
        let num_elements = output.numel();
        let mut output_vec = vec![0.0f32; num_elements];
        output.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }
}
