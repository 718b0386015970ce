//! JWT authentication.
//!
//! Tokens are HS256-signed with the secret from `JWT_SECRET` and carry the
//! user's email as `sub`.

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::users::{self, User};

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user email)
    pub sub: String,
    /// Issued at (timestamp)
    pub iat: i64,
    /// Expiration time (timestamp)
    pub exp: i64,
}

/// Why a request could not be tied to an active user.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Could not validate credentials")]
    InvalidToken,
    #[error("User account is disabled")]
    Disabled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// JWT authentication handler
pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtAuth {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::try_minutes(ttl_minutes).unwrap_or(Duration::MAX),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Issue a token for `subject`, valid for the configured lifetime.
    pub fn generate_token(&self, subject: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: now
                .checked_add_signed(self.ttl)
                .ok_or_else(|| anyhow!("Token lifetime out of range"))?
                .timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("Failed to generate token: {}", e))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| anyhow!("Invalid token: {}", e))?;

        Ok(token_data.claims)
    }

    /// Extract token from Authorization header (Bearer token)
    pub fn extract_bearer_token(auth_header: &str) -> Result<&str> {
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| anyhow!("Invalid authorization header format"))?
            .trim();
        if token.is_empty() {
            return Err(anyhow!("Empty token"));
        }
        Ok(token)
    }

    /// Resolve an `Authorization` header value to an active user.
    pub async fn authorize(
        &self,
        pool: &SqlitePool,
        auth_header: Option<&str>,
    ) -> Result<User, AuthError> {
        let token = auth_header
            .and_then(|h| Self::extract_bearer_token(h).ok())
            .ok_or(AuthError::InvalidToken)?;
        let claims = self
            .validate_token(token)
            .map_err(|_| AuthError::InvalidToken)?;
        let user = users::find_by_email(pool, &claims.sub)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if !user.is_active {
            return Err(AuthError::Disabled);
        }
        Ok(user)
    }
}
