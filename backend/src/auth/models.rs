use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Patient,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Doctor => write!(f, "doctor"),
            Role::Patient => write!(f, "patient"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Account ID
    pub role: Role,
    pub name: String,
    pub exp: usize,
    pub iat: usize,
    pub jti: String,
}

/// A verified session attached to the request by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub account_id: i64,
    pub role: Role,
    pub name: String,
    pub token_id: String,
    pub expires_at: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DoctorRegisterRequest {
    pub fullname: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone: Option<String>,
    pub license: Option<String>,
    pub specialization: Option<String>,
    pub hospital: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatientRegisterRequest {
    pub fullname: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "lenient_age")]
    pub age: Option<u32>,
    pub gender: Option<String>,
    #[serde(default)]
    pub medical_history: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Accepts `71`, `"71"` or nothing. Anything unparseable counts as missing.
fn lenient_age<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Age {
        Number(u64),
        Text(String),
        Other(serde_json::Value),
    }

    let age = match Option::<Age>::deserialize(deserializer)? {
        Some(Age::Number(n)) => u32::try_from(n).ok(),
        Some(Age::Text(s)) => s.trim().parse().ok(),
        Some(Age::Other(_)) | None => None,
    };
    Ok(age)
}

/// Trimmed value, or `None` when missing or blank.
pub fn required(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
