use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// The four dementia stages the classifier can report.
///
/// `Display` and serde use the clinical label ("Very Mild Demented"). `FromStr` also accepts
/// the training key ("VeryMildDemented"), which is how the stages are named in the model's
/// `class_indices` metadata.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum DementiaStage {
    #[serde(rename = "Non-Demented")]
    #[strum(to_string = "Non-Demented", serialize = "NonDemented")]
    NonDemented,
    #[serde(rename = "Very Mild Demented")]
    #[strum(to_string = "Very Mild Demented", serialize = "VeryMildDemented")]
    VeryMildDemented,
    #[serde(rename = "Mild Demented")]
    #[strum(to_string = "Mild Demented", serialize = "MildDemented")]
    MildDemented,
    #[serde(rename = "Moderate Demented")]
    #[strum(to_string = "Moderate Demented", serialize = "ModerateDemented")]
    ModerateDemented,
}

impl DementiaStage {
    pub const COUNT: usize = 4;

    pub fn all() -> Vec<DementiaStage> {
        DementiaStage::iter().collect()
    }

    /// Class-directory name used when the model was trained.
    pub fn training_key(&self) -> &'static str {
        match self {
            DementiaStage::NonDemented => "NonDemented",
            DementiaStage::VeryMildDemented => "VeryMildDemented",
            DementiaStage::MildDemented => "MildDemented",
            DementiaStage::ModerateDemented => "ModerateDemented",
        }
    }

    /// 0 (no impairment) to 3 (moderate).
    pub fn severity(&self) -> u8 {
        match self {
            DementiaStage::NonDemented => 0,
            DementiaStage::VeryMildDemented => 1,
            DementiaStage::MildDemented => 2,
            DementiaStage::ModerateDemented => 3,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionResponse {
    pub success: bool,
    pub prediction: DementiaStage,
    /// Percentage, rounded to two decimals.
    pub confidence: f32,
    pub classes: BTreeMap<DementiaStage, f32>,
    pub suggestions: String,
    pub scan_id: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DoctorProfile {
    pub id: i64,
    pub fullname: String,
    pub email: String,
    pub phone: String,
    pub specialization: String,
    pub hospital: String,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PatientProfile {
    pub id: i64,
    pub fullname: String,
    pub email: String,
    pub phone: String,
    pub age: u32,
    pub gender: String,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ScanSummary {
    pub id: i64,
    pub doctor_id: i64,
    pub patient_id: i64,
    pub filename: String,
    pub prediction: DementiaStage,
    pub confidence: f32,
    pub stage: u8,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DoctorLoginResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub doctor: DoctorProfile,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PatientLoginResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub patient: PatientProfile,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DoctorDashboard {
    pub success: bool,
    pub doctor: DoctorProfile,
    pub scans: Vec<ScanSummary>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PatientDashboard {
    pub success: bool,
    pub patient: PatientProfile,
    pub scans: Vec<ScanSummary>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SessionStatus {
    pub doctor_logged_in: bool,
    pub patient_logged_in: bool,
    pub doctor_name: Option<String>,
    pub patient_name: Option<String>,
}
