//! Trigger token verification
//!
//! The configured bearer token is hashed with Argon2id at startup and only
//! the hash is kept. Incoming tokens are verified against that hash.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;

use crate::error::AuthError;

/// Memory cost in KiB
const HASH_MEMORY_KIB: u32 = 4096;

/// Number of passes
const HASH_ITERATIONS: u32 = 2;

fn hasher() -> Result<Argon2<'static>, HashError> {
    let params = Params::new(HASH_MEMORY_KIB, HASH_ITERATIONS, 1, None)
        .map_err(|e| HashError::HashFailed(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a token using Argon2id
///
/// The hash includes a random salt.
///
/// # Returns
///
/// The Argon2id hash string (PHC format)
///
/// # Example
///
/// ```
/// use formsync::auth::token::hash_token;
///
/// let hash = hash_token("s3cret").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_token(token: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);

    hasher()?
        .hash_password(token.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| HashError::HashFailed(e.to_string()))
}

/// Verify a token against a stored hash
///
/// Returns `true` if the token matches the hash, `false` otherwise,
/// including when the hash cannot be parsed.
///
/// # Example
///
/// ```
/// use formsync::auth::token::{hash_token, verify_token};
///
/// let hash = hash_token("s3cret").unwrap();
/// assert!(verify_token("s3cret", &hash));
/// assert!(!verify_token("wrong", &hash));
/// ```
pub fn verify_token(token: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(token.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Extract the token from an `Authorization: Bearer <token>` header value
///
/// The scheme is matched case-insensitively. An empty token is treated as
/// absent.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Shared-token guard for the trigger endpoint
#[derive(Debug, Clone)]
pub struct TriggerAuth {
    hash: String,
}

impl TriggerAuth {
    /// Hash the configured token
    pub fn new(token: &str) -> Result<Self, HashError> {
        Ok(Self {
            hash: hash_token(token)?,
        })
    }

    /// Check an `Authorization` header value
    pub fn authenticate(&self, header: Option<&str>) -> Result<(), AuthError> {
        let token = header.and_then(bearer_token).ok_or(AuthError::MissingAuth)?;

        if verify_token(token, &self.hash) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

/// Error type for token hashing operations
#[derive(Debug, Clone, PartialEq)]
pub enum HashError {
    /// Hashing failed
    HashFailed(String),
}

impl std::fmt::Display for HashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashError::HashFailed(msg) => write!(f, "Hash failed: {}", msg),
        }
    }
}

impl std::error::Error for HashError {}
