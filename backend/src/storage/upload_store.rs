use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::UploadConfig;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("File type not allowed")]
    ExtensionNotAllowed,
    #[error("File too large")]
    FileTooLarge,
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a single upload will live once its scan succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedUpload {
    pub stored_name: String,
    pub path: PathBuf,
}

/// Uploaded scans on the local filesystem.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    max_bytes: usize,
    allowed_extensions: Vec<String>,
}

impl UploadStore {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            root: config.dir.clone(),
            max_bytes: config.max_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn ensure_root(&self) -> Result<(), UploadError> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Reduces a client filename to a safe single path component: ASCII alphanumerics,
    /// `.`, `-` and `_`, whitespace as `_`, no leading dots. Directory parts are dropped.
    pub fn sanitize_filename(name: &str) -> String {
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let mut cleaned = String::with_capacity(base.len());
        for c in base.chars() {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                cleaned.push(c);
            } else if c.is_whitespace() {
                cleaned.push('_');
            }
        }
        cleaned.trim_start_matches(['.', '_']).to_string()
    }

    /// Lowercased extension after the last dot, if any.
    pub fn extension(name: &str) -> Option<String> {
        let (stem, ext) = name.rsplit_once('.')?;
        if ext.is_empty() || stem.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        Self::extension(name)
            .map(|ext| self.allowed_extensions.contains(&ext))
            .unwrap_or(false)
    }

    /// Checks the extension and picks a unique stored name. Nothing touches the disk.
    pub fn reserve(&self, original_name: &str) -> Result<ReservedUpload, UploadError> {
        let sanitized = Self::sanitize_filename(original_name);
        if !self.is_allowed(&sanitized) {
            return Err(UploadError::ExtensionNotAllowed);
        }
        let stored_name = format!("{}_{}", Uuid::new_v4().simple(), sanitized);
        let path = self.root.join(&stored_name);
        Ok(ReservedUpload { stored_name, path })
    }

    pub fn validate_size(&self, len: usize) -> Result<(), UploadError> {
        if len > self.max_bytes {
            return Err(UploadError::FileTooLarge);
        }
        Ok(())
    }

    pub fn save(&self, reserved: &ReservedUpload, bytes: &[u8]) -> Result<(), UploadError> {
        self.validate_size(bytes.len())?;
        self.ensure_root()?;
        std::fs::write(&reserved.path, bytes)?;
        Ok(())
    }

    /// Removes a stored file. A file that is already gone is not an error.
    pub fn remove(&self, path: &Path) -> Result<(), UploadError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn content_hash(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}
