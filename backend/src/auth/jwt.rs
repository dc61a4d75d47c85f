use super::models::{Claims, Role, SessionIdentity};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
    #[error("JWT decoding error: {0}")]
    Decoding(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token revoked")]
    TokenRevoked,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_length: Duration,
    /// jti -> exp of tokens revoked by logout.
    revoked: Arc<Mutex<HashMap<String, usize>>>,
}

impl JwtService {
    pub fn new(secret: &str, session_days: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            session_length: Duration::days(session_days.max(1)),
            revoked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn generate_token(&self, account_id: i64, role: Role, name: &str) -> Result<String, JwtError> {
        let now = Utc::now();
        let expiration = now + self.session_length;

        let claims = Claims {
            sub: account_id.to_string(),
            role,
            name: name.to_string(),
            exp: expiration.timestamp() as usize,
            iat: now.timestamp() as usize,
            jti: Uuid::new_v4().to_string(),
        };

        let header = Header::new(Algorithm::HS256);
        encode(&header, &claims, &self.encoding_key).map_err(JwtError::Encoding)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, JwtError> {
        if token.is_empty() {
            return Err(JwtError::InvalidToken);
        }

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(JwtError::InvalidToken);
        }

        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(token_data) => {
                let now = Utc::now().timestamp() as usize;
                log::debug!(
                    "JWT token decoded successfully. Account: {}, Role: {}, Exp: {}, Now: {}",
                    token_data.claims.sub,
                    token_data.claims.role,
                    token_data.claims.exp,
                    now
                );

                if token_data.claims.exp < now {
                    log::warn!(
                        "JWT token expired. Exp: {}, Now: {}",
                        token_data.claims.exp,
                        now
                    );
                    return Err(JwtError::TokenExpired);
                }
                if self.is_revoked(&token_data.claims.jti) {
                    return Err(JwtError::TokenRevoked);
                }
                Ok(token_data.claims)
            }
            Err(err) => {
                log::warn!("JWT token decode error: {:?}", err);
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        Err(JwtError::TokenExpired)
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidToken => Err(JwtError::InvalidToken),
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        Err(JwtError::InvalidToken)
                    }
                    _ => Err(JwtError::Decoding(err.to_string())),
                }
            }
        }
    }

    /// Verifies the token and turns its claims into a session identity.
    pub fn identify(&self, token: &str) -> Result<SessionIdentity, JwtError> {
        let claims = self.verify_token(token)?;
        let account_id = claims.sub.parse().map_err(|_| JwtError::InvalidToken)?;
        Ok(SessionIdentity {
            account_id,
            role: claims.role,
            name: claims.name,
            token_id: claims.jti,
            expires_at: claims.exp,
        })
    }

    /// Revokes a session until its natural expiry. Expired entries are pruned on the way.
    pub fn revoke(&self, token_id: &str, expires_at: usize) {
        let now = Utc::now().timestamp() as usize;
        match self.revoked.lock() {
            Ok(mut revoked) => {
                revoked.retain(|_, exp| *exp >= now);
                revoked.insert(token_id.to_string(), expires_at);
            }
            Err(_) => log::error!("Revocation list lock poisoned; token {} not revoked", token_id),
        }
    }

    fn is_revoked(&self, token_id: &str) -> bool {
        match self.revoked.lock() {
            Ok(revoked) => revoked.contains_key(token_id),
            // Fail closed.
            Err(_) => true,
        }
    }
}
