use actix_files::Files;
use actix_multipart::{Multipart, MultipartError};
use actix_web::{
    error::{InternalError, JsonPayloadError},
    http::StatusCode,
    web, HttpRequest, HttpResponse,
};
use futures::TryStreamExt;
use log::{error, info, warn};
use shared::{DoctorDashboard, MessageResponse, PatientDashboard, PredictionResponse, ScanSummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth;
use crate::auth::jwt::JwtService;
use crate::auth::middleware::{AuthMiddleware, AuthenticatedDoctor, AuthenticatedPatient};
use crate::db::models::MriScan;
use crate::db::repository::{ClinicRepository, RepositoryError};
use crate::inference::pipeline::{ScanError, ScanService, UploadedImage};
use crate::storage::upload_store::{UploadError, UploadStore};

/// Routes that answer 401 without a valid session.
pub const PROTECTED_PATHS: [&str; 5] = [
    "/api/doctor-dashboard",
    "/api/patient-dashboard",
    "/api/predict-mri",
    "/api/doctor-account",
    "/api/patient-account",
];

const PATIENT_EMAIL_LIMIT: usize = 1024;

pub fn configure_routes(
    cfg: &mut web::ServiceConfig,
    static_dir: PathBuf,
    auth_middleware: AuthMiddleware,
) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(
            web::scope("/api")
                .wrap(auth_middleware.require_auth_for(PROTECTED_PATHS))
                .route("/doctor-register", web::post().to(auth::routes::doctor_register))
                .route("/patient-register", web::post().to(auth::routes::patient_register))
                .route("/doctor-login", web::post().to(auth::routes::doctor_login))
                .route("/patient-login", web::post().to(auth::routes::patient_login))
                .route("/logout", web::post().to(auth::routes::logout))
                .route("/check-session", web::get().to(auth::routes::check_session))
                .route("/doctor-dashboard", web::get().to(doctor_dashboard))
                .route("/patient-dashboard", web::get().to(patient_dashboard))
                .route("/predict-mri", web::post().to(predict_mri))
                .route("/doctor-account", web::delete().to(delete_doctor_account))
                .route("/patient-account", web::delete().to(delete_patient_account))
                .default_service(web::to(not_found)),
        )
        .service(Files::new("/static", static_dir.clone()))
        .service(Files::new("/", static_dir).index_file("index.html"));
}

fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    warn!("Rejected JSON body: {}", err);
    let response = HttpResponse::BadRequest().json(MessageResponse::failure("Invalid request body"));
    InternalError::from_response(err, response).into()
}

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(MessageResponse::failure("Endpoint not found"))
}

fn failure(status: StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(MessageResponse::failure(message))
}

fn server_error() -> HttpResponse {
    failure(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
}

fn unauthorized() -> HttpResponse {
    failure(StatusCode::UNAUTHORIZED, "Unauthorized")
}

fn summaries(scans: &[MriScan]) -> Result<Vec<ScanSummary>, RepositoryError> {
    scans.iter().map(MriScan::summary).collect()
}

async fn doctor_dashboard(
    doctor: AuthenticatedDoctor,
    repo: web::Data<ClinicRepository>,
) -> HttpResponse {
    let account = match repo.get_doctor(doctor.0.account_id).await {
        Ok(Some(account)) => account,
        Ok(None) => return unauthorized(),
        Err(e) => {
            error!("Failed to load doctor {}: {}", doctor.0.account_id, e);
            return server_error();
        }
    };

    let scans = repo
        .scans_for_doctor(account.id)
        .await
        .and_then(|scans| summaries(&scans));
    match scans {
        Ok(scans) => HttpResponse::Ok().json(DoctorDashboard {
            success: true,
            doctor: account.profile(),
            scans,
        }),
        Err(e) => {
            error!("Failed to load scans for doctor {}: {}", account.id, e);
            server_error()
        }
    }
}

async fn patient_dashboard(
    patient: AuthenticatedPatient,
    repo: web::Data<ClinicRepository>,
) -> HttpResponse {
    let account = match repo.get_patient(patient.0.account_id).await {
        Ok(Some(account)) => account,
        Ok(None) => return unauthorized(),
        Err(e) => {
            error!("Failed to load patient {}: {}", patient.0.account_id, e);
            return server_error();
        }
    };

    let scans = repo
        .scans_for_patient(account.id)
        .await
        .and_then(|scans| summaries(&scans));
    match scans {
        Ok(scans) => HttpResponse::Ok().json(PatientDashboard {
            success: true,
            patient: account.profile(),
            scans,
        }),
        Err(e) => {
            error!("Failed to load scans for patient {}: {}", account.id, e);
            server_error()
        }
    }
}

#[derive(Default)]
struct UploadForm {
    file_name: Option<String>,
    file_bytes: Vec<u8>,
    patient_email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum UploadFormError {
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("file exceeds upload limit")]
    TooLarge,
    #[error("patient email exceeds {PATIENT_EMAIL_LIMIT} bytes")]
    EmailTooLong,
}

async fn read_upload_form(
    payload: &mut Multipart,
    store: &UploadStore,
) -> Result<UploadForm, UploadFormError> {
    let mut form = UploadForm::default();
    let mut file_seen = false;

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "mri_file" if !file_seen => {
                file_seen = true;
                form.file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(|f| f.to_string());
                while let Some(chunk) = field.try_next().await? {
                    form.file_bytes.extend_from_slice(&chunk);
                    if store.validate_size(form.file_bytes.len()).is_err() {
                        return Err(UploadFormError::TooLarge);
                    }
                }
            }
            "patient_email" => {
                let mut text = Vec::new();
                while let Some(chunk) = field.try_next().await? {
                    if text.len() + chunk.len() > PATIENT_EMAIL_LIMIT {
                        return Err(UploadFormError::EmailTooLong);
                    }
                    text.extend_from_slice(&chunk);
                }
                form.patient_email = Some(String::from_utf8_lossy(&text).trim().to_string());
            }
            _ => {
                // Drain unknown fields and repeated file parts.
                while field.try_next().await?.is_some() {}
            }
        }
    }
    Ok(form)
}

fn scan_failure_status(err: &ScanError) -> StatusCode {
    match err {
        ScanError::Validation(_) | ScanError::Preprocess(_) => StatusCode::BAD_REQUEST,
        ScanError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ScanError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ScanError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
    }
}

/// Percentage with two decimals.
fn confidence_percent(confidence: f32) -> f32 {
    ((f64::from(confidence) * 100.0 * 100.0).round() / 100.0) as f32
}

async fn predict_mri(
    doctor: AuthenticatedDoctor,
    repo: web::Data<ClinicRepository>,
    store: web::Data<UploadStore>,
    scans: web::Data<ScanService>,
    mut payload: Multipart,
) -> HttpResponse {
    let form = match read_upload_form(&mut payload, &store).await {
        Ok(form) => form,
        Err(UploadFormError::TooLarge) => {
            warn!("Upload from doctor {} exceeds {} bytes", doctor.0.account_id, store.max_bytes());
            return failure(StatusCode::PAYLOAD_TOO_LARGE, "File too large");
        }
        Err(UploadFormError::EmailTooLong) => {
            warn!("Upload from doctor {} has an oversized patient email", doctor.0.account_id);
            return failure(StatusCode::BAD_REQUEST, "Invalid patient email");
        }
        Err(e) => {
            warn!("Upload from doctor {} rejected: {}", doctor.0.account_id, e);
            return failure(StatusCode::BAD_REQUEST, "No file uploaded");
        }
    };

    let file_name = match form.file_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return failure(StatusCode::BAD_REQUEST, "No file uploaded"),
    };
    let patient_email = match form.patient_email.as_deref() {
        Some(email) if !email.is_empty() => email.to_string(),
        _ => return failure(StatusCode::BAD_REQUEST, "Patient email required"),
    };

    match repo.get_doctor(doctor.0.account_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return unauthorized(),
        Err(e) => {
            error!("Failed to load doctor {}: {}", doctor.0.account_id, e);
            return server_error();
        }
    }
    let patient = match repo.find_patient_by_email(&patient_email).await {
        Ok(Some(patient)) => patient,
        Ok(None) => return failure(StatusCode::BAD_REQUEST, "Patient not found"),
        Err(e) => {
            error!("Patient lookup failed: {}", e);
            return server_error();
        }
    };

    let reserved = match store.reserve(&file_name) {
        Ok(reserved) => reserved,
        Err(UploadError::ExtensionNotAllowed) => {
            warn!("Upload {:?} has a disallowed extension", file_name);
            return failure(StatusCode::BAD_REQUEST, "File type not allowed");
        }
        Err(e) => {
            error!("Failed to reserve upload: {}", e);
            return server_error();
        }
    };

    let upload = Arc::new(UploadedImage {
        bytes: form.file_bytes,
        original_name: file_name,
        stored_name: reserved.stored_name.clone(),
        stored_path: reserved.path.clone(),
    });

    let record = match scans
        .run(upload.clone(), doctor.0.account_id, patient.id)
        .await
    {
        Ok(record) => record,
        Err(e) => {
            match &e {
                ScanError::Validation(_) | ScanError::Preprocess(_) => {
                    warn!("Scan {:?} rejected: {}", upload.original_name, e)
                }
                _ => error!("Scan {:?} failed: {}", upload.original_name, e),
            }
            return failure(scan_failure_status(&e), &e.user_message());
        }
    };

    let saved = {
        let store = store.get_ref().clone();
        let reserved = reserved.clone();
        let upload = upload.clone();
        web::block(move || {
            store.save(&reserved, &upload.bytes)?;
            Ok::<_, UploadError>(UploadStore::content_hash(&upload.bytes))
        })
        .await
    };
    let content_hash = match saved {
        Ok(Ok(hash)) => hash,
        Ok(Err(e)) => {
            error!("Failed to store upload {}: {}", reserved.path.display(), e);
            return server_error();
        }
        Err(e) => {
            error!("Upload storage task failed: {}", e);
            return server_error();
        }
    };
    let scan_id = match repo.insert_scan(&record).await {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to record scan: {}", e);
            remove_quietly(&store, &reserved.path);
            return server_error();
        }
    };

    info!(
        "Scan {} created: doctor={} patient={} prediction={} sha256={}",
        scan_id,
        record.doctor_id,
        record.patient_id,
        record.prediction,
        content_hash
    );

    HttpResponse::Ok().json(PredictionResponse {
        success: true,
        prediction: record.prediction,
        confidence: confidence_percent(record.confidence),
        classes: record.class_probabilities,
        suggestions: record.ai_suggestions,
        scan_id,
    })
}

fn remove_quietly(store: &UploadStore, path: &Path) {
    if let Err(e) = store.remove(path) {
        error!("Failed to remove {}: {}", path.display(), e);
    }
}

async fn delete_doctor_account(
    doctor: AuthenticatedDoctor,
    repo: web::Data<ClinicRepository>,
    store: web::Data<UploadStore>,
    jwt_service: web::Data<JwtService>,
) -> HttpResponse {
    match repo.delete_doctor(doctor.0.account_id).await {
        Ok(paths) => {
            for path in &paths {
                remove_quietly(&store, Path::new(path));
            }
            jwt_service.revoke(&doctor.0.token_id, doctor.0.expires_at);
            info!("Doctor {} deleted with {} scans", doctor.0.account_id, paths.len());
            HttpResponse::Ok().json(MessageResponse::ok("Account deleted successfully"))
        }
        Err(RepositoryError::NotFound) => unauthorized(),
        Err(e) => {
            error!("Failed to delete doctor {}: {}", doctor.0.account_id, e);
            server_error()
        }
    }
}

async fn delete_patient_account(
    patient: AuthenticatedPatient,
    repo: web::Data<ClinicRepository>,
    store: web::Data<UploadStore>,
    jwt_service: web::Data<JwtService>,
) -> HttpResponse {
    match repo.delete_patient(patient.0.account_id).await {
        Ok(paths) => {
            for path in &paths {
                remove_quietly(&store, Path::new(path));
            }
            jwt_service.revoke(&patient.0.token_id, patient.0.expires_at);
            info!("Patient {} deleted with {} scans", patient.0.account_id, paths.len());
            HttpResponse::Ok().json(MessageResponse::ok("Account deleted successfully"))
        }
        Err(RepositoryError::NotFound) => unauthorized(),
        Err(e) => {
            error!("Failed to delete patient {}: {}", patient.0.account_id, e);
            server_error()
        }
    }
}
