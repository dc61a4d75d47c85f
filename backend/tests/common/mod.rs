#![allow(dead_code)]

use actix_web::{http::StatusCode, test as actix_test, web, App};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use neuroscan::auth::jwt::JwtService;
use neuroscan::auth::middleware::AuthMiddleware;
use neuroscan::config::{PreprocessingConfig, UploadConfig, ValidatorConfig};
use neuroscan::db::repository::ClinicRepository;
use neuroscan::inference::classifier::{
    ClassifierAdapter, InferenceError, LoadedModel, ModelBackend, ModelLoadError, ModelLoader,
};
use neuroscan::inference::labels::LabelTable;
use neuroscan::inference::pipeline::{ScanPipeline, ScanService};
use neuroscan::inference::preprocess::{NormalizedTensor, Preprocessor};
use neuroscan::inference::validator::BrainImageValidator;
use neuroscan::routes::configure_routes;
use neuroscan::storage::upload_store::UploadStore;
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const BOUNDARY: &str = "----neuroscan-test-boundary";

/// Returns fixed scores using the Keras training order
/// (MildDemented, ModerateDemented, NonDemented, VeryMildDemented).
pub struct FakeLoader {
    pub scores: Vec<f32>,
}

struct FakeBackend {
    scores: Vec<f32>,
}

impl ModelBackend for FakeBackend {
    fn forward(&self, _tensor: &NormalizedTensor) -> Result<Vec<f32>, InferenceError> {
        Ok(self.scores.clone())
    }
}

impl ModelLoader for FakeLoader {
    fn describe(&self) -> String {
        "fake model".to_string()
    }

    fn load(&self) -> Result<LoadedModel, ModelLoadError> {
        let indices = [
            ("MildDemented", 0),
            ("ModerateDemented", 1),
            ("NonDemented", 2),
            ("VeryMildDemented", 3),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();
        let labels = LabelTable::from_class_indices(&indices)
            .map_err(|e| ModelLoadError::Backend(e.to_string()))?;
        Ok(LoadedModel::new(
            Box::new(FakeBackend {
                scores: self.scores.clone(),
            }),
            labels,
        ))
    }
}

pub fn non_demented_loader() -> Box<dyn ModelLoader> {
    Box::new(FakeLoader {
        scores: vec![0.1, 0.05, 0.8, 0.05],
    })
}

pub struct MissingModelLoader;

impl ModelLoader for MissingModelLoader {
    fn describe(&self) -> String {
        "missing model".to_string()
    }

    fn load(&self) -> Result<LoadedModel, ModelLoadError> {
        Err(ModelLoadError::MissingArtifact("models/alz_effnet.pt".to_string()))
    }
}

/// Everything an app instance needs, rooted in a temporary directory.
pub struct TestContext {
    pub dir: TempDir,
    pub repo: ClinicRepository,
    pub store: UploadStore,
    pub scans: ScanService,
    pub jwt: JwtService,
    pub static_dir: PathBuf,
}

impl TestContext {
    pub async fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self::with_upload_limit(loader, 16 * 1024 * 1024).await
    }

    pub async fn with_upload_limit(loader: Box<dyn ModelLoader>, max_bytes: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let url = format!("sqlite://{}", dir.path().join("database/test.db").display());
        let repo = ClinicRepository::connect(&url).await.unwrap();
        repo.init_schema().await.unwrap();

        let store = UploadStore::new(&UploadConfig {
            dir: dir.path().join("uploads"),
            max_bytes,
            ..UploadConfig::default()
        });
        store.ensure_root().unwrap();

        let static_dir = dir.path().join("static");
        std::fs::create_dir_all(&static_dir).unwrap();
        std::fs::write(static_dir.join("index.html"), "<html>NeuroScan</html>").unwrap();

        let preprocessor = Arc::new(Preprocessor::new(
            PreprocessingConfig::default(),
            BrainImageValidator::new(ValidatorConfig::default()),
        ));
        let classifier = Arc::new(ClassifierAdapter::new(loader));
        let scans = ScanService::new(
            Arc::new(ScanPipeline::new(preprocessor, classifier)),
            Duration::from_secs(10),
        );

        Self {
            dir,
            repo,
            store,
            scans,
            jwt: JwtService::new("test-secret", 7),
            static_dir,
        }
    }

    pub async fn create_app(
        &self,
    ) -> impl actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse,
        Error = actix_web::Error,
    > {
        let static_dir = self.static_dir.clone();
        let auth_middleware = AuthMiddleware::new(self.jwt.clone());
        actix_test::init_service(
            App::new()
                .app_data(web::Data::new(self.repo.clone()))
                .app_data(web::Data::new(self.store.clone()))
                .app_data(web::Data::new(self.scans.clone()))
                .app_data(web::Data::new(self.jwt.clone()))
                .configure(move |cfg| configure_routes(cfg, static_dir, auth_middleware)),
        )
        .await
    }

    pub fn stored_uploads(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.store.root())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}

pub async fn send<S>(app: &S, req: actix_http::Request) -> (StatusCode, Value)
where
    S: actix_web::dev::Service<
            actix_http::Request,
            Response = actix_web::dev::ServiceResponse,
            Error = actix_web::Error,
        >,
{
    let resp = actix_test::call_service(app, req).await;
    let status = resp.status();
    let body = actix_test::read_body(resp).await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

pub fn post_json(path: &str, body: Value, token: Option<&str>) -> actix_http::Request {
    let mut req = actix_test::TestRequest::post().uri(path).set_json(body);
    if let Some(token) = token {
        req = req.insert_header(("Authorization", format!("Bearer {}", token)));
    }
    req.to_request()
}

pub fn get(path: &str, token: Option<&str>) -> actix_http::Request {
    let mut req = actix_test::TestRequest::get().uri(path);
    if let Some(token) = token {
        req = req.insert_header(("Authorization", format!("Bearer {}", token)));
    }
    req.to_request()
}

pub fn delete(path: &str, token: Option<&str>) -> actix_http::Request {
    let mut req = actix_test::TestRequest::delete().uri(path);
    if let Some(token) = token {
        req = req.insert_header(("Authorization", format!("Bearer {}", token)));
    }
    req.to_request()
}

pub fn doctor_registration(email: &str, license: &str) -> Value {
    json!({
        "fullname": "Dr. Ada Byron",
        "email": email,
        "password": "doctor-pass",
        "phone": "555-0100",
        "license": license,
        "specialization": "Neurology",
        "hospital": "General Hospital"
    })
}

pub fn patient_registration(email: &str) -> Value {
    json!({
        "fullname": "Sam Reyes",
        "email": email,
        "password": "patient-pass",
        "phone": "555-0101",
        "age": "71",
        "gender": "female"
    })
}

/// Registers and logs in a doctor, returning the session token.
pub async fn doctor_session<S>(app: &S, email: &str, license: &str) -> String
where
    S: actix_web::dev::Service<
            actix_http::Request,
            Response = actix_web::dev::ServiceResponse,
            Error = actix_web::Error,
        >,
{
    let (status, _) = send(
        app,
        post_json("/api/doctor-register", doctor_registration(email, license), None),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(
        app,
        post_json(
            "/api/doctor-login",
            json!({"email": email, "password": "doctor-pass"}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["token"].as_str().unwrap().to_string()
}

pub async fn patient_session<S>(app: &S, email: &str) -> String
where
    S: actix_web::dev::Service<
            actix_http::Request,
            Response = actix_web::dev::ServiceResponse,
            Error = actix_web::Error,
        >,
{
    let (status, _) = send(
        app,
        post_json("/api/patient-register", patient_registration(email), None),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(
        app,
        post_json(
            "/api/patient-login",
            json!({"email": email, "password": "patient-pass"}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["token"].as_str().unwrap().to_string()
}

/// Textured bright disc on a black background: passes the brain-image gate.
pub fn brain_like_png() -> Vec<u8> {
    let center = 31.5f32;
    let image = RgbImage::from_fn(64, 64, |x, y| {
        let (dx, dy) = (x as f32 - center, y as f32 - center);
        let v = if (dx * dx + dy * dy).sqrt() < 20.0 {
            if (x + y) % 2 == 0 { 240 } else { 120 }
        } else {
            0
        };
        Rgb([v, v, v])
    });
    encode_png(&DynamicImage::ImageRgb8(image))
}

pub fn gray_png() -> Vec<u8> {
    encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
        64,
        64,
        Rgb([128, 128, 128]),
    )))
}

fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

/// Builds a `multipart/form-data` body from `(field name, file name, content)` parts, in order.
pub fn multipart_parts(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let disposition = match file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                name, file_name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", name),
        };
        body.extend_from_slice(disposition.as_bytes());
        if file_name.is_some() {
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Builds a `multipart/form-data` body with optional `mri_file` and `patient_email` parts.
pub fn multipart_body(file: Option<(&str, &[u8])>, patient_email: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(email) = patient_email {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"patient_email\"\r\n\r\n");
        body.extend_from_slice(email.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    if let Some((name, bytes)) = file {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"mri_file\"; filename=\"{}\"\r\n",
                name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(token: Option<&str>, body: Vec<u8>) -> actix_http::Request {
    let mut req = actix_test::TestRequest::post()
        .uri("/api/predict-mri")
        .insert_header((
            "Content-Type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(body);
    if let Some(token) = token {
        req = req.insert_header(("Authorization", format!("Bearer {}", token)));
    }
    req.to_request()
}
