use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;

use super::models::{Doctor, MriScan, NewDoctor, NewPatient, NewScanRecord, Patient};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Record not found")]
    NotFound,
    #[error("Email already registered")]
    EmailTaken,
    #[error("License already registered")]
    LicenseTaken,
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS doctors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fullname TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        phone TEXT NOT NULL,
        license TEXT NOT NULL UNIQUE,
        specialization TEXT NOT NULL,
        hospital TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS patients (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fullname TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        phone TEXT NOT NULL,
        age INTEGER NOT NULL,
        gender TEXT NOT NULL,
        medical_history TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mri_scans (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doctor_id INTEGER NOT NULL REFERENCES doctors(id) ON DELETE CASCADE,
        patient_id INTEGER NOT NULL REFERENCES patients(id) ON DELETE CASCADE,
        filename TEXT NOT NULL,
        filepath TEXT NOT NULL,
        prediction TEXT NOT NULL,
        confidence REAL NOT NULL,
        stage INTEGER NOT NULL,
        ai_suggestions TEXT NOT NULL DEFAULT '',
        class_probabilities TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )
    "#,
];

const SCAN_COLUMNS: &str = "id, doctor_id, patient_id, filename, filepath, prediction, confidence, \
     stage, ai_suggestions, class_probabilities, created_at";

/// File behind a `sqlite:` URL, or `None` for in-memory databases.
pub fn database_file_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Maps a unique-constraint failure on an account table to the matching domain error.
fn unique_violation(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let message = db_err.message();
            if message.contains(".license") {
                return RepositoryError::LicenseTaken;
            }
            if message.contains(".email") {
                return RepositoryError::EmailTaken;
            }
        }
    }
    RepositoryError::Database(err)
}

#[derive(Clone)]
pub struct ClinicRepository {
    pool: SqlitePool,
}

impl ClinicRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database file and its directory, with foreign keys on.
    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        if let Some(path) = database_file_path(url) {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn init_schema(&self) -> Result<(), RepositoryError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn create_doctor(&self, doctor: &NewDoctor) -> Result<Doctor, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO doctors (fullname, email, password, phone, license, specialization, hospital, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doctor.fullname)
        .bind(&doctor.email)
        .bind(&doctor.password_hash)
        .bind(&doctor.phone)
        .bind(&doctor.license)
        .bind(&doctor.specialization)
        .bind(&doctor.hospital)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await
        .map_err(unique_violation)?;

        self.get_doctor(result.last_insert_rowid())
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    pub async fn get_doctor(&self, id: i64) -> Result<Option<Doctor>, RepositoryError> {
        let doctor = sqlx::query_as::<_, Doctor>("SELECT * FROM doctors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doctor)
    }

    pub async fn find_doctor_by_email(&self, email: &str) -> Result<Option<Doctor>, RepositoryError> {
        let doctor = sqlx::query_as::<_, Doctor>("SELECT * FROM doctors WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doctor)
    }

    pub async fn license_exists(&self, license: &str) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM doctors WHERE license = ?")
            .bind(license)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Deletes the doctor and, through the cascade, their scans.
    /// Returns the stored file paths of the removed scans.
    pub async fn delete_doctor(&self, id: i64) -> Result<Vec<String>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT filepath FROM mri_scans WHERE doctor_id = ?")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
        let result = sqlx::query("DELETE FROM doctors WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        tx.commit().await?;
        Ok(paths)
    }

    pub async fn create_patient(&self, patient: &NewPatient) -> Result<Patient, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO patients (fullname, email, password, phone, age, gender, medical_history, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&patient.fullname)
        .bind(&patient.email)
        .bind(&patient.password_hash)
        .bind(&patient.phone)
        .bind(i64::from(patient.age))
        .bind(&patient.gender)
        .bind(&patient.medical_history)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await
        .map_err(unique_violation)?;

        self.get_patient(result.last_insert_rowid())
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    pub async fn get_patient(&self, id: i64) -> Result<Option<Patient>, RepositoryError> {
        let patient = sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(patient)
    }

    pub async fn find_patient_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Patient>, RepositoryError> {
        let patient = sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(patient)
    }

    pub async fn delete_patient(&self, id: i64) -> Result<Vec<String>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT filepath FROM mri_scans WHERE patient_id = ?")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
        let result = sqlx::query("DELETE FROM patients WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        tx.commit().await?;
        Ok(paths)
    }

    pub async fn insert_scan(&self, scan: &NewScanRecord) -> Result<i64, RepositoryError> {
        let probabilities = serde_json::to_string(&scan.class_probabilities)?;
        let result = sqlx::query(
            r#"
            INSERT INTO mri_scans (doctor_id, patient_id, filename, filepath, prediction, confidence,
                                   stage, ai_suggestions, class_probabilities, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(scan.doctor_id)
        .bind(scan.patient_id)
        .bind(&scan.filename)
        .bind(&scan.file_path)
        .bind(scan.prediction.to_string())
        .bind(f64::from(scan.confidence))
        .bind(i64::from(scan.stage))
        .bind(&scan.ai_suggestions)
        .bind(probabilities)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_scan(&self, id: i64) -> Result<Option<MriScan>, RepositoryError> {
        let scan = sqlx::query_as::<_, MriScan>(&format!(
            "SELECT {} FROM mri_scans WHERE id = ?",
            SCAN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(scan)
    }

    /// Newest first.
    pub async fn scans_for_doctor(&self, doctor_id: i64) -> Result<Vec<MriScan>, RepositoryError> {
        let scans = sqlx::query_as::<_, MriScan>(&format!(
            "SELECT {} FROM mri_scans WHERE doctor_id = ? ORDER BY created_at DESC, id DESC",
            SCAN_COLUMNS
        ))
        .bind(doctor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(scans)
    }

    /// Newest first.
    pub async fn scans_for_patient(&self, patient_id: i64) -> Result<Vec<MriScan>, RepositoryError> {
        let scans = sqlx::query_as::<_, MriScan>(&format!(
            "SELECT {} FROM mri_scans WHERE patient_id = ? ORDER BY created_at DESC, id DESC",
            SCAN_COLUMNS
        ))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(scans)
    }
}
