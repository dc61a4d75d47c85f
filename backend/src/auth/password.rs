use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SCHEME: &str = "sha256";
pub const DEFAULT_ITERATIONS: u32 = 10_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("Malformed password hash")]
    MalformedHash,
    #[error("Unsupported hash scheme: {0}")]
    UnsupportedScheme(String),
}

/// Salted, iterated SHA-256, stored as `sha256$<iterations>$<salt hex>$<digest hex>`.
pub fn hash_password(password: &str) -> String {
    hash_with(password, &rand::random::<[u8; 16]>(), DEFAULT_ITERATIONS)
}

fn hash_with(password: &str, salt: &[u8], iterations: u32) -> String {
    let digest = digest(password, salt, iterations);
    format!(
        "{}${}${}${}",
        SCHEME,
        iterations,
        hex::encode(salt),
        hex::encode(digest)
    )
}

fn digest(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut current = hasher.finalize();
    for _ in 1..iterations.max(1) {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(current);
        current = hasher.finalize();
    }
    current.to_vec()
}

pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let parts: Vec<&str> = stored.split('$').collect();
    let [scheme, iterations, salt, expected] = parts.as_slice() else {
        return Err(PasswordError::MalformedHash);
    };
    if *scheme != SCHEME {
        return Err(PasswordError::UnsupportedScheme(scheme.to_string()));
    }
    let iterations: u32 = iterations.parse().map_err(|_| PasswordError::MalformedHash)?;
    let salt = hex::decode(salt).map_err(|_| PasswordError::MalformedHash)?;
    let expected = hex::decode(expected).map_err(|_| PasswordError::MalformedHash)?;

    let actual = digest(password, &salt, iterations);
    Ok(actual.ct_eq(&expected).into())
}
