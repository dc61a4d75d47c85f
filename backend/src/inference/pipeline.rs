use actix_web::web;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::advisory::advice_for;
use super::classifier::{ClassifierAdapter, ClassifyError};
use super::preprocess::{PreprocessError, Preprocessor};
use super::validator::Rejection;
use crate::db::models::NewScanRecord;

/// An upload that passed the storage checks, with the location reserved for it.
/// Nothing is written to `stored_path` until the pipeline succeeds.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub original_name: String,
    pub stored_name: String,
    pub stored_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    #[error("upload rejected by validator: {0}")]
    Validation(Rejection),
    #[error("preprocessing failed: {0}")]
    Preprocess(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("prediction timed out")]
    TimedOut,
}

impl ScanError {
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Validation(_) => "validation",
            ScanError::Preprocess(_) => "preprocess",
            ScanError::ModelUnavailable(_) => "model_unavailable",
            ScanError::Inference(_) => "inference",
            ScanError::TimedOut => "timed_out",
        }
    }

    /// Text shown to the uploader. Internal detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            ScanError::Validation(reason) => format!(
                "Uploaded image does not look like a brain MRI scan: {}",
                reason
            ),
            ScanError::Preprocess(_) => "Preprocessing failed".to_string(),
            ScanError::ModelUnavailable(_) => "Model not loaded".to_string(),
            ScanError::Inference(_) => "Prediction failed".to_string(),
            ScanError::TimedOut => "Prediction timed out".to_string(),
        }
    }
}

impl From<PreprocessError> for ScanError {
    fn from(err: PreprocessError) -> Self {
        match err {
            PreprocessError::NotBrainLike(reason) => ScanError::Validation(reason),
            PreprocessError::Failed(reason) => ScanError::Preprocess(reason),
        }
    }
}

impl From<ClassifyError> for ScanError {
    fn from(err: ClassifyError) -> Self {
        match err {
            ClassifyError::ModelUnavailable(reason) => ScanError::ModelUnavailable(reason),
            ClassifyError::Inference(e) => ScanError::Inference(e.to_string()),
        }
    }
}

pub struct ScanPipeline {
    preprocessor: Arc<Preprocessor>,
    classifier: Arc<ClassifierAdapter>,
}

impl ScanPipeline {
    pub fn new(preprocessor: Arc<Preprocessor>, classifier: Arc<ClassifierAdapter>) -> Self {
        Self {
            preprocessor,
            classifier,
        }
    }

    pub fn classifier(&self) -> &Arc<ClassifierAdapter> {
        &self.classifier
    }

    /// Preprocess, classify and attach advice. Any failure short-circuits without a record.
    pub fn run(
        &self,
        upload: &UploadedImage,
        doctor_id: i64,
        patient_id: i64,
    ) -> Result<NewScanRecord, ScanError> {
        let tensor = self.preprocessor.preprocess(&upload.bytes)?;
        let prediction = self.classifier.classify(&tensor)?;

        Ok(NewScanRecord {
            doctor_id,
            patient_id,
            filename: upload.stored_name.clone(),
            file_path: upload.stored_path.to_string_lossy().into_owned(),
            prediction: prediction.label,
            confidence: prediction.confidence,
            stage: prediction.label.severity(),
            ai_suggestions: advice_for(prediction.label).to_string(),
            class_probabilities: prediction.class_probabilities,
        })
    }
}

/// Async front of the pipeline: runs it on the blocking pool with a deadline.
#[derive(Clone)]
pub struct ScanService {
    pipeline: Arc<ScanPipeline>,
    timeout: Duration,
}

impl ScanService {
    pub fn new(pipeline: Arc<ScanPipeline>, timeout: Duration) -> Self {
        Self { pipeline, timeout }
    }

    pub async fn run(
        &self,
        upload: Arc<UploadedImage>,
        doctor_id: i64,
        patient_id: i64,
    ) -> Result<NewScanRecord, ScanError> {
        let pipeline = self.pipeline.clone();
        let job = web::block(move || pipeline.run(&upload, doctor_id, patient_id));

        match tokio::time::timeout(self.timeout, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ScanError::Inference(format!("blocking task failed: {}", e))),
            Err(_) => {
                log::warn!("Scan exceeded {:?}", self.timeout);
                Err(ScanError::TimedOut)
            }
        }
    }

    /// Loads the model ahead of the first request. A load still running when the deadline
    /// passes keeps going; requests then wait on it under their own timeout.
    pub async fn warm_up(&self, load_timeout: Duration) -> bool {
        let classifier = self.pipeline.classifier().clone();
        let job = web::block(move || classifier.ensure_loaded());

        match tokio::time::timeout(load_timeout, job).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                log::error!("Model warm-up failed: {}", e);
                false
            }
            Ok(Err(e)) => {
                log::error!("Model warm-up task failed: {}", e);
                false
            }
            Err(_) => {
                log::warn!("Model still loading after {:?}", load_timeout);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PreprocessingConfig, ValidatorConfig};
    use crate::inference::classifier::{
        InferenceError, LoadedModel, ModelBackend, ModelLoadError, ModelLoader, UnavailableLoader,
    };
    use crate::inference::labels::LabelTable;
    use crate::inference::preprocess::NormalizedTensor;
    use crate::inference::test_images::{checker_disc, colour_photo, encode_png, uniform_gray};
    use crate::inference::validator::BrainImageValidator;
    use shared::DementiaStage;

    struct SlowBackend {
        scores: Vec<f32>,
        delay: Duration,
    }

    impl ModelBackend for SlowBackend {
        fn forward(&self, _tensor: &NormalizedTensor) -> Result<Vec<f32>, InferenceError> {
            std::thread::sleep(self.delay);
            Ok(self.scores.clone())
        }
    }

    struct FakeLoader {
        scores: Vec<f32>,
        delay: Duration,
    }

    impl ModelLoader for FakeLoader {
        fn describe(&self) -> String {
            "fake".to_string()
        }

        fn load(&self) -> Result<LoadedModel, ModelLoadError> {
            let indices = DementiaStage::all()
                .into_iter()
                .enumerate()
                .map(|(i, s)| (s.training_key().to_string(), i))
                .collect();
            let labels = LabelTable::from_class_indices(&indices)
                .map_err(|e| ModelLoadError::Backend(e.to_string()))?;
            Ok(LoadedModel::new(
                Box::new(SlowBackend {
                    scores: self.scores.clone(),
                    delay: self.delay,
                }),
                labels,
            ))
        }
    }

    fn pipeline(loader: Box<dyn ModelLoader>) -> ScanPipeline {
        ScanPipeline::new(
            Arc::new(Preprocessor::new(
                PreprocessingConfig::default(),
                BrainImageValidator::new(ValidatorConfig::default()),
            )),
            Arc::new(ClassifierAdapter::new(loader)),
        )
    }

    fn working(delay: Duration) -> ScanPipeline {
        pipeline(Box::new(FakeLoader {
            scores: vec![0.05, 0.15, 0.7, 0.1],
            delay,
        }))
    }

    fn upload(bytes: Vec<u8>) -> UploadedImage {
        UploadedImage {
            bytes,
            original_name: "scan.png".to_string(),
            stored_name: "0000_scan.png".to_string(),
            stored_path: PathBuf::from("uploads/0000_scan.png"),
        }
    }

    #[test]
    fn successful_run_builds_record() {
        let image = upload(encode_png(&checker_disc(64, 20, 1, 120, 240, 0)));
        let record = working(Duration::ZERO).run(&image, 3, 9).unwrap();

        assert_eq!(record.doctor_id, 3);
        assert_eq!(record.patient_id, 9);
        assert_eq!(record.prediction, DementiaStage::MildDemented);
        assert_eq!(record.stage, 2);
        assert!((record.confidence - 0.7).abs() < 1e-6);
        assert_eq!(record.ai_suggestions, advice_for(DementiaStage::MildDemented));
        assert_eq!(record.filename, "0000_scan.png");
        assert_eq!(record.class_probabilities.len(), 4);
    }

    #[test]
    fn colour_photo_reaches_inference_and_is_recorded() {
        let image = upload(encode_png(&colour_photo(64, 22)));
        let record = working(Duration::ZERO).run(&image, 4, 5).unwrap();

        assert_eq!(record.prediction, DementiaStage::MildDemented);
        assert_eq!(record.patient_id, 5);
        assert_eq!(record.class_probabilities.len(), 4);
    }

    #[test]
    fn gray_image_fails_validation() {
        let err = working(Duration::ZERO)
            .run(&upload(encode_png(&uniform_gray(128, 128, 128))), 1, 1)
            .unwrap_err();
        assert_eq!(err, ScanError::Validation(Rejection::LowContrast));
        assert_eq!(err.kind(), "validation");
        assert!(err
            .user_message()
            .starts_with("Uploaded image does not look like a brain MRI scan: "));
    }

    #[test]
    fn undecodable_upload_fails_preprocessing() {
        let err = working(Duration::ZERO)
            .run(&upload(b"not an image".to_vec()), 1, 1)
            .unwrap_err();
        assert_eq!(err.kind(), "preprocess");
        assert_eq!(err.user_message(), "Preprocessing failed");
    }

    #[test]
    fn missing_model_is_reported() {
        let pipeline = pipeline(Box::new(UnavailableLoader::new("no model")));
        let err = pipeline
            .run(&upload(encode_png(&checker_disc(64, 20, 1, 120, 240, 0))), 1, 1)
            .unwrap_err();
        assert_eq!(err, ScanError::ModelUnavailable("no model".to_string()));
        assert_eq!(err.user_message(), "Model not loaded");
    }

    #[test]
    fn inference_errors_hide_detail_from_users() {
        let err = ScanError::from(ClassifyError::Inference(InferenceError::NonFinite));
        assert_eq!(err.kind(), "inference");
        assert_eq!(err.user_message(), "Prediction failed");
        assert_eq!(ScanError::TimedOut.user_message(), "Prediction timed out");
    }

    #[actix_web::test]
    async fn service_runs_on_blocking_pool() {
        let service = ScanService::new(Arc::new(working(Duration::ZERO)), Duration::from_secs(10));
        assert!(service.warm_up(Duration::from_secs(10)).await);

        let image = Arc::new(upload(encode_png(&checker_disc(64, 20, 1, 120, 240, 0))));
        let record = service.run(image, 1, 2).await.unwrap();
        assert_eq!(record.prediction, DementiaStage::MildDemented);
    }

    #[actix_web::test]
    async fn slow_inference_times_out() {
        let service = ScanService::new(
            Arc::new(working(Duration::from_millis(500))),
            Duration::from_millis(50),
        );
        let image = Arc::new(upload(encode_png(&checker_disc(64, 20, 1, 120, 240, 0))));
        assert_eq!(service.run(image, 1, 2).await, Err(ScanError::TimedOut));
    }

    #[actix_web::test]
    async fn warm_up_reports_failed_load() {
        let service = ScanService::new(
            Arc::new(pipeline(Box::new(UnavailableLoader::new("no model")))),
            Duration::from_secs(1),
        );
        assert!(!service.warm_up(Duration::from_secs(1)).await);
    }
}
