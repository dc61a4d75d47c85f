use actix_web::{web, HttpResponse};
use log::error;
use shared::{DoctorLoginResponse, MessageResponse, PatientLoginResponse, SessionStatus};

use crate::db::models::{NewDoctor, NewPatient};
use crate::db::repository::{ClinicRepository, RepositoryError};

use super::jwt::JwtService;
use super::middleware::MaybeIdentity;
use super::models::{required, DoctorRegisterRequest, LoginRequest, PatientRegisterRequest, Role};
use super::password::{hash_password, verify_password};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(MessageResponse::failure(message))
}

fn server_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(MessageResponse::failure("Server error"))
}

fn registration_failure(e: RepositoryError) -> HttpResponse {
    match e {
        RepositoryError::EmailTaken => bad_request("Email already registered"),
        RepositoryError::LicenseTaken => bad_request("License already registered"),
        other => {
            error!("Registration failed: {}", other);
            server_error()
        }
    }
}

/// Password hashing is CPU-bound; keep it off the async workers.
async fn hash_blocking(password: String) -> Option<String> {
    match web::block(move || hash_password(&password)).await {
        Ok(hash) => Some(hash),
        Err(e) => {
            error!("Password hashing task failed: {}", e);
            None
        }
    }
}

async fn verify_blocking(password: String, stored: String) -> bool {
    match web::block(move || verify_password(&password, &stored)).await {
        Ok(Ok(matches)) => matches,
        Ok(Err(e)) => {
            error!("Stored password hash unusable: {}", e);
            false
        }
        Err(e) => {
            error!("Password verification task failed: {}", e);
            false
        }
    }
}

pub async fn doctor_register(
    repo: web::Data<ClinicRepository>,
    body: web::Json<DoctorRegisterRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    let (
        Some(fullname),
        Some(email),
        Some(password),
        Some(phone),
        Some(license),
        Some(specialization),
        Some(hospital),
    ) = (
        required(&body.fullname),
        required(&body.email),
        required(&body.password),
        required(&body.phone),
        required(&body.license),
        required(&body.specialization),
        required(&body.hospital),
    )
    else {
        return bad_request("All fields required");
    };

    match repo.find_doctor_by_email(email).await {
        Ok(Some(_)) => return bad_request("Email already registered"),
        Ok(None) => {}
        Err(e) => return registration_failure(e),
    }
    match repo.license_exists(license).await {
        Ok(true) => return bad_request("License already registered"),
        Ok(false) => {}
        Err(e) => return registration_failure(e),
    }

    let Some(password_hash) = hash_blocking(password.to_string()).await else {
        return server_error();
    };
    let doctor = NewDoctor {
        fullname: fullname.to_string(),
        email: email.to_string(),
        password_hash,
        phone: phone.to_string(),
        license: license.to_string(),
        specialization: specialization.to_string(),
        hospital: hospital.to_string(),
    };

    match repo.create_doctor(&doctor).await {
        Ok(created) => {
            log::info!("Doctor registered: {} ({})", created.id, created.email);
            HttpResponse::Created().json(MessageResponse::ok("Doctor registered successfully"))
        }
        Err(e) => registration_failure(e),
    }
}

pub async fn patient_register(
    repo: web::Data<ClinicRepository>,
    body: web::Json<PatientRegisterRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    let (Some(fullname), Some(email), Some(password), Some(phone), Some(age), Some(gender)) = (
        required(&body.fullname),
        required(&body.email),
        required(&body.password),
        required(&body.phone),
        body.age,
        required(&body.gender),
    ) else {
        return bad_request("All fields required");
    };

    match repo.find_patient_by_email(email).await {
        Ok(Some(_)) => return bad_request("Email already registered"),
        Ok(None) => {}
        Err(e) => return registration_failure(e),
    }

    let Some(password_hash) = hash_blocking(password.to_string()).await else {
        return server_error();
    };
    let patient = NewPatient {
        fullname: fullname.to_string(),
        email: email.to_string(),
        password_hash,
        phone: phone.to_string(),
        age,
        gender: gender.to_string(),
        medical_history: body.medical_history.clone().unwrap_or_default(),
    };

    match repo.create_patient(&patient).await {
        Ok(created) => {
            log::info!("Patient registered: {} ({})", created.id, created.email);
            HttpResponse::Created().json(MessageResponse::ok("Patient registered successfully"))
        }
        Err(e) => registration_failure(e),
    }
}

pub async fn doctor_login(
    repo: web::Data<ClinicRepository>,
    jwt_service: web::Data<JwtService>,
    body: web::Json<LoginRequest>,
) -> HttpResponse {
    let (Some(email), Some(password)) = (required(&body.email), required(&body.password)) else {
        return bad_request("Email and password required");
    };

    let doctor = match repo.find_doctor_by_email(email).await {
        Ok(Some(doctor)) => doctor,
        Ok(None) => {
            log::warn!("Doctor login for unknown email {}", email);
            return HttpResponse::Unauthorized().json(MessageResponse::failure(INVALID_CREDENTIALS));
        }
        Err(e) => {
            error!("Doctor lookup failed: {}", e);
            return server_error();
        }
    };
    if !verify_blocking(password.to_string(), doctor.password_hash.clone()).await {
        log::warn!("Doctor login with wrong password for {}", email);
        return HttpResponse::Unauthorized().json(MessageResponse::failure(INVALID_CREDENTIALS));
    }

    match jwt_service.generate_token(doctor.id, Role::Doctor, &doctor.fullname) {
        Ok(token) => HttpResponse::Ok().json(DoctorLoginResponse {
            success: true,
            message: "Login successful".to_string(),
            token,
            doctor: doctor.profile(),
        }),
        Err(e) => {
            error!("Failed to issue token: {}", e);
            server_error()
        }
    }
}

pub async fn patient_login(
    repo: web::Data<ClinicRepository>,
    jwt_service: web::Data<JwtService>,
    body: web::Json<LoginRequest>,
) -> HttpResponse {
    let (Some(email), Some(password)) = (required(&body.email), required(&body.password)) else {
        return bad_request("Email and password required");
    };

    let patient = match repo.find_patient_by_email(email).await {
        Ok(Some(patient)) => patient,
        Ok(None) => {
            log::warn!("Patient login for unknown email {}", email);
            return HttpResponse::Unauthorized().json(MessageResponse::failure(INVALID_CREDENTIALS));
        }
        Err(e) => {
            error!("Patient lookup failed: {}", e);
            return server_error();
        }
    };
    if !verify_blocking(password.to_string(), patient.password_hash.clone()).await {
        log::warn!("Patient login with wrong password for {}", email);
        return HttpResponse::Unauthorized().json(MessageResponse::failure(INVALID_CREDENTIALS));
    }

    match jwt_service.generate_token(patient.id, Role::Patient, &patient.fullname) {
        Ok(token) => HttpResponse::Ok().json(PatientLoginResponse {
            success: true,
            message: "Login successful".to_string(),
            token,
            patient: patient.profile(),
        }),
        Err(e) => {
            error!("Failed to issue token: {}", e);
            server_error()
        }
    }
}

pub async fn logout(identity: MaybeIdentity, jwt_service: web::Data<JwtService>) -> HttpResponse {
    if let Some(identity) = identity.0 {
        jwt_service.revoke(&identity.token_id, identity.expires_at);
        log::info!("{} {} logged out", identity.role, identity.account_id);
    }
    HttpResponse::Ok().json(MessageResponse::ok("Logged out successfully"))
}

pub async fn check_session(identity: MaybeIdentity) -> HttpResponse {
    let mut status = SessionStatus::default();
    if let Some(identity) = identity.0 {
        match identity.role {
            Role::Doctor => {
                status.doctor_logged_in = true;
                status.doctor_name = Some(identity.name);
            }
            Role::Patient => {
                status.patient_logged_in = true;
                status.patient_name = Some(identity.name);
            }
        }
    }
    HttpResponse::Ok().json(status)
}
