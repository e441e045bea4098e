//! Request authentication
//!
//! Two kinds of bearer credentials are accepted:
//!
//! - a user token, an HS256 JWT whose `sub` claim is the user id
//! - a service API key, which acts on behalf of the user named in the
//!   `X-User-Id` header
//!
//! Either way the resolved [`AuthenticatedUser`] is stored in the request
//! extensions for the handlers.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroizing;

/// Minimum API key length (256 bits)
pub const MIN_KEY_LENGTH: usize = 32;

pub const USER_HEADER: &str = "X-User-Id";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("API_KEYS is not set")]
    MissingKeys,

    #[error("API key too weak (length {0}, minimum {MIN_KEY_LENGTH})")]
    WeakKey(usize),

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// User on whose behalf a request runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
}

/// Valid service API keys
#[derive(Clone, Default)]
pub struct ApiKeys {
    keys: HashSet<String>,
}

impl ApiKeys {
    pub fn new<I, S>(keys: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for key in keys {
            let key = key.as_ref().trim();
            if key.is_empty() {
                continue;
            }
            if key.len() < MIN_KEY_LENGTH {
                tracing::error!(
                    "API key is too weak (length: {}, minimum: {})",
                    key.len(),
                    MIN_KEY_LENGTH
                );
                return Err(AuthError::WeakKey(key.len()));
            }
            set.insert(key.to_string());
        }
        Ok(Self { keys: set })
    }

    /// Comma-separated keys from `API_KEYS`. At least one is required.
    pub fn from_env() -> Result<Self, AuthError> {
        let raw = std::env::var("API_KEYS").map_err(|_| AuthError::MissingKeys)?;
        let keys = Self::new(raw.split(','))?;
        if keys.keys.is_empty() {
            return Err(AuthError::MissingKeys);
        }
        tracing::info!("API authentication initialized with {} key(s)", keys.keys.len());
        Ok(keys)
    }

    pub fn is_valid(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// Issues and verifies user tokens
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &Zeroizing<String>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// User id carried by a valid, unexpired token
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }
        Ok(data.claims.sub)
    }

    pub fn issue(&self, user_id: &str, ttl: chrono::Duration) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now() + ttl).timestamp().max(0) as u64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Shared state of the authentication middleware
#[derive(Clone)]
pub struct AuthState {
    pub api_keys: Arc<ApiKeys>,
    pub jwt: Arc<JwtAuth>,
}

impl AuthState {
    fn resolve(&self, request: &Request) -> Result<AuthenticatedUser, StatusCode> {
        let header = request
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok());

        let token = match header {
            Some(auth) if auth.starts_with("Bearer ") => &auth[7..],
            Some(_) => {
                tracing::warn!("Invalid Authorization header format (expected Bearer token)");
                return Err(StatusCode::UNAUTHORIZED);
            }
            None => {
                tracing::warn!("Missing Authorization header");
                return Err(StatusCode::UNAUTHORIZED);
            }
        };

        if self.api_keys.is_valid(token) {
            let user = request
                .headers()
                .get(USER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    tracing::warn!("API key request without {} header", USER_HEADER);
                    StatusCode::BAD_REQUEST
                })?;
            return Ok(AuthenticatedUser(user.to_string()));
        }

        match self.jwt.verify(token) {
            Ok(user) => Ok(AuthenticatedUser(user)),
            Err(e) => {
                tracing::warn!("Rejected bearer credential: {}", e);
                Err(StatusCode::UNAUTHORIZED)
            }
        }
    }
}

/// Middleware for the protected routes
pub async fn require_auth(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user = auth.resolve(&request)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Zeroizing<String> {
        Zeroizing::new("k".repeat(40))
    }

    #[test]
    fn test_api_key_validation() {
        let keys = ApiKeys::new(["a".repeat(32), "b".repeat(40)]).unwrap();
        assert!(keys.is_valid(&"a".repeat(32)));
        assert!(!keys.is_valid("invalid_key"));
        assert!(!keys.is_valid(""));

        assert!(matches!(
            ApiKeys::new(["short"]),
            Err(AuthError::WeakKey(5))
        ));
    }

    #[test]
    fn test_jwt_round_trip_and_tampering() {
        let jwt = JwtAuth::new(&secret());
        let token = jwt.issue("user-42", chrono::Duration::minutes(5)).unwrap();
        assert_eq!(jwt.verify(&token).unwrap(), "user-42");

        let other = JwtAuth::new(&Zeroizing::new("z".repeat(40)));
        assert!(other.verify(&token).is_err());
        assert!(jwt.verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_expired_jwt_rejected() {
        let jwt = JwtAuth::new(&secret());
        let token = jwt.issue("user-42", chrono::Duration::hours(-2)).unwrap();
        assert!(jwt.verify(&token).is_err());
    }
}
