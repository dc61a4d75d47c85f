use chrono::NaiveDateTime;
use shared::{DementiaStage, DoctorProfile, PatientProfile, ScanSummary};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::repository::RepositoryError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Doctor {
    pub id: i64,
    pub fullname: String,
    pub email: String,
    #[sqlx(rename = "password")]
    pub password_hash: String,
    pub phone: String,
    pub license: String,
    pub specialization: String,
    pub hospital: String,
    pub created_at: NaiveDateTime,
}

impl Doctor {
    pub fn profile(&self) -> DoctorProfile {
        DoctorProfile {
            id: self.id,
            fullname: self.fullname.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            specialization: self.specialization.clone(),
            hospital: self.hospital.clone(),
            created_at: self.created_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Patient {
    pub id: i64,
    pub fullname: String,
    pub email: String,
    #[sqlx(rename = "password")]
    pub password_hash: String,
    pub phone: String,
    pub age: i64,
    pub gender: String,
    pub medical_history: String,
    pub created_at: NaiveDateTime,
}

impl Patient {
    pub fn profile(&self) -> PatientProfile {
        PatientProfile {
            id: self.id,
            fullname: self.fullname.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            age: u32::try_from(self.age).unwrap_or_default(),
            gender: self.gender.clone(),
            created_at: self.created_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MriScan {
    pub id: i64,
    pub doctor_id: i64,
    pub patient_id: i64,
    pub filename: String,
    pub filepath: String,
    pub prediction: String,
    pub confidence: f64,
    pub stage: i64,
    pub ai_suggestions: String,
    pub class_probabilities: String,
    pub created_at: NaiveDateTime,
}

impl MriScan {
    pub fn stage_label(&self) -> Result<DementiaStage, RepositoryError> {
        DementiaStage::from_str(&self.prediction).map_err(|_| {
            RepositoryError::InvalidData(format!(
                "scan {} has unknown prediction {:?}",
                self.id, self.prediction
            ))
        })
    }

    pub fn class_probabilities(&self) -> Result<BTreeMap<DementiaStage, f32>, RepositoryError> {
        Ok(serde_json::from_str(&self.class_probabilities)?)
    }

    pub fn summary(&self) -> Result<ScanSummary, RepositoryError> {
        Ok(ScanSummary {
            id: self.id,
            doctor_id: self.doctor_id,
            patient_id: self.patient_id,
            filename: self.filename.clone(),
            prediction: self.stage_label()?,
            confidence: self.confidence as f32,
            stage: u8::try_from(self.stage).unwrap_or_default(),
            created_at: self.created_at.format(TIMESTAMP_FORMAT).to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewDoctor {
    pub fullname: String,
    pub email: String,
    pub password_hash: String,
    pub phone: String,
    pub license: String,
    pub specialization: String,
    pub hospital: String,
}

#[derive(Debug, Clone)]
pub struct NewPatient {
    pub fullname: String,
    pub email: String,
    pub password_hash: String,
    pub phone: String,
    pub age: u32,
    pub gender: String,
    pub medical_history: String,
}

/// A finished pipeline run, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScanRecord {
    pub doctor_id: i64,
    pub patient_id: i64,
    pub filename: String,
    pub file_path: String,
    pub prediction: DementiaStage,
    /// Probability of `prediction`, in [0, 1].
    pub confidence: f32,
    pub stage: u8,
    pub ai_suggestions: String,
    pub class_probabilities: BTreeMap<DementiaStage, f32>,
}
