//! Secret handling
//!
//! Secrets (provider token, JWT signing secret, broker passwords) are kept in
//! `Zeroizing` buffers so they are wiped from memory when dropped. Broker
//! credentials are never stored: only a SHA-256 fingerprint is persisted as
//! the account link's credentials reference.

use sha2::{Digest, Sha256};
use std::env;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Minimum length of a signing secret (256 bits)
pub const MIN_SIGNING_SECRET_LENGTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("Secret validation failed: {0}")]
    ValidationFailed(String),
}

/// Load a secret from an environment variable
pub fn load_secret(env_var_name: &str) -> Result<Zeroizing<String>, SecretError> {
    let value = env::var(env_var_name)
        .map(Zeroizing::new)
        .map_err(|_| SecretError::EnvVarNotSet(env_var_name.to_string()))?;
    if value.trim().is_empty() {
        return Err(SecretError::EnvVarNotSet(env_var_name.to_string()));
    }
    Ok(value)
}

/// Reject short secrets and obvious placeholders
pub fn validate_secret_strength(secret: &str, min_length: usize) -> Result<(), SecretError> {
    if secret.len() < min_length {
        return Err(SecretError::ValidationFailed(format!(
            "Secret too short: {} characters (minimum: {})",
            secret.len(),
            min_length
        )));
    }

    let weak_patterns = ["changeme", "placeholder", "example", "secret", "12345"];
    let lower = secret.to_lowercase();
    for pattern in &weak_patterns {
        if lower.contains(pattern) {
            return Err(SecretError::ValidationFailed(format!(
                "Secret contains weak pattern: {}",
                pattern
            )));
        }
    }

    Ok(())
}

/// MetaApi access token, sent as the `auth-token` header
pub fn load_provider_token() -> Result<Zeroizing<String>, SecretError> {
    let token = load_secret("METAAPI_TOKEN")?;
    info!("Loaded MetaApi token ({} characters)", token.len());
    Ok(token)
}

/// HS256 secret used to verify subscriber tokens
pub fn load_jwt_secret() -> Result<Zeroizing<String>, SecretError> {
    let secret = load_secret("JWT_SECRET")?;
    if let Err(e) = validate_secret_strength(&secret, MIN_SIGNING_SECRET_LENGTH) {
        warn!("JWT_SECRET rejected: {}", e);
        return Err(e);
    }
    Ok(secret)
}

/// Stable reference to a set of broker credentials that reveals nothing
/// about the password
pub fn credentials_fingerprint(account_id: &str, login: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(login.as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
