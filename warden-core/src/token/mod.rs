//! Signed, time-bounded bearer tokens
//!
//! Tokens are compact JWS (JWT) strings carrying the claims below, signed with a
//! process-wide key chosen at startup.
//!
//! | Claim | Type     | Description                                  |
//! | ----- | -------- | -------------------------------------------- |
//! | `sub` | `String` | The authenticated subject (user identifier). |
//! | `iat` | `i64`    | Issued-at, seconds since the Unix epoch.     |
//! | `exp` | `i64`    | Expiry, seconds since the Unix epoch.        |
//! | `iss` | `String` | Optional issuer, checked when configured.    |
//!
//! A token is valid only while `now < exp` and only if its signature verifies
//! against the exact claims. Tokens cannot be revoked individually: logging out
//! only tells the client to drop its cookie (see [`TokenIssuer::logout_envelope`]),
//! so a captured token stays usable until its own `exp`.

pub mod envelope;
pub mod issuer;

use std::path::Path;

use base64::{Engine, prelude::BASE64_STANDARD};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::Algorithm;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{error::ValidationError, storage::parse_duration_var};

pub use envelope::{CookieConfig, CookieSameSite, TransportEnvelope, extract_presented_token};
pub use issuer::TokenIssuer;

/// Minimum HS256 secret length in bytes.
pub const MIN_HS256_SECRET_LEN: usize = 32;

/// Claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - user ID
    pub sub: String,
    /// Issued at in seconds (as UTC timestamp)
    pub iat: i64,
    /// Expiration time in seconds (as UTC timestamp)
    pub exp: i64,
    /// Issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// An issued token together with the claims it was minted from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    claims: TokenClaims,
}

impl Token {
    pub(crate) fn new(value: String, claims: TokenClaims) -> Self {
        Self { value, claims }
    }

    /// The compact serialized token.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_inner(self) -> String {
        self.value
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.iat, 0).unwrap_or_default()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.exp, 0).unwrap_or_default()
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Identity recovered from a valid token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject(String);

impl Subject {
    pub(crate) fn new(subject: String) -> Self {
        Self(subject)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<&str> for Subject {
    fn from(subject: &str) -> Self {
        Self(subject.to_string())
    }
}

impl From<String> for Subject {
    fn from(subject: String) -> Self {
        Self(subject)
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signing algorithm and key material.
#[derive(Clone)]
pub enum TokenAlgorithm {
    /// HS256 - HMAC with SHA-256
    HS256 {
        /// Secret key for both signing and verifying
        secret_key: Vec<u8>,
    },
    /// RS256 - RSA with SHA-256
    RS256 {
        /// Private key for signing (PEM format)
        private_key: Vec<u8>,
        /// Public key for verifying (PEM format)
        public_key: Vec<u8>,
    },
}

impl std::fmt::Debug for TokenAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenAlgorithm::HS256 { .. } => f.write_str("HS256 { secret_key: <redacted> }"),
            TokenAlgorithm::RS256 { .. } => f.write_str("RS256 { private_key: <redacted>, .. }"),
        }
    }
}

/// Configuration for token issuance, validation and transport.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Algorithm and keys
    pub algorithm: TokenAlgorithm,
    /// Issuer claim written on issue and required on validation
    pub issuer: Option<String>,
    /// Lifetime used by [`TokenIssuer::issue_default`]
    pub default_lifetime: Duration,
    /// Upper bound applied to requested lifetimes
    pub max_lifetime: Option<Duration>,
    /// Cookie used to carry the token
    pub cookie: CookieConfig,
}

impl TokenConfig {
    /// Default token lifetime.
    pub const DEFAULT_LIFETIME_DAYS: i64 = 3;

    fn with_algorithm(algorithm: TokenAlgorithm) -> Self {
        Self {
            algorithm,
            issuer: None,
            default_lifetime: Duration::days(Self::DEFAULT_LIFETIME_DAYS),
            max_lifetime: None,
            cookie: CookieConfig::default(),
        }
    }

    /// Create a configuration with an HS256 secret
    pub fn new_hs256(secret_key: Vec<u8>) -> Self {
        Self::with_algorithm(TokenAlgorithm::HS256 { secret_key })
    }

    /// Create a configuration with an RS256 key pair (PEM format)
    pub fn new_rs256(private_key: Vec<u8>, public_key: Vec<u8>) -> Self {
        Self::with_algorithm(TokenAlgorithm::RS256 {
            private_key,
            public_key,
        })
    }

    /// Create a configuration from RSA key files (PEM format)
    pub fn from_rs256_pem_files(
        private_key_path: impl AsRef<Path>,
        public_key_path: impl AsRef<Path>,
    ) -> Result<Self, ValidationError> {
        use std::fs::read;

        let private_key = read(private_key_path).map_err(|e| {
            ValidationError::InvalidField(format!("Failed to read private key file: {e}"))
        })?;

        let public_key = read(public_key_path).map_err(|e| {
            ValidationError::InvalidField(format!("Failed to read public key file: {e}"))
        })?;

        Ok(Self::new_rs256(private_key, public_key))
    }

    /// Create a configuration with a fresh random HS256 secret.
    ///
    /// Tokens signed with it stop validating when the process restarts.
    pub fn new_random_hs256() -> Self {
        let mut secret_key = vec![0u8; MIN_HS256_SECRET_LEN];
        rand::rng().fill_bytes(&mut secret_key);
        Self::new_hs256(secret_key)
    }

    /// Set the issuer claim
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_default_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = Some(max_lifetime);
        self
    }

    pub fn with_cookie(mut self, cookie: CookieConfig) -> Self {
        self.cookie = cookie;
        self
    }

    /// Get the algorithm to use with jsonwebtoken
    pub fn jwt_algorithm(&self) -> Algorithm {
        match &self.algorithm {
            TokenAlgorithm::HS256 { .. } => Algorithm::HS256,
            TokenAlgorithm::RS256 { .. } => Algorithm::RS256,
        }
    }

    /// Check key length and lifetimes.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let TokenAlgorithm::HS256 { secret_key } = &self.algorithm {
            if secret_key.len() < MIN_HS256_SECRET_LEN {
                return Err(ValidationError::InvalidField(format!(
                    "HS256 secret must be at least {MIN_HS256_SECRET_LEN} bytes"
                )));
            }
        }
        if self.default_lifetime < Duration::seconds(1) {
            return Err(ValidationError::InvalidLifetime(
                "default token lifetime must be at least one second".to_string(),
            ));
        }
        if let Some(max) = self.max_lifetime {
            if max < Duration::seconds(1) {
                return Err(ValidationError::InvalidLifetime(
                    "maximum token lifetime must be at least one second".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Load the configuration from `WARDEN_TOKEN_*` and `WARDEN_COOKIE_*` variables.
    ///
    /// Either `WARDEN_TOKEN_SECRET` (standard base64, HS256) or both
    /// `WARDEN_TOKEN_PRIVATE_KEY_PATH` and `WARDEN_TOKEN_PUBLIC_KEY_PATH` (PEM,
    /// RS256) must be set. Optional: `WARDEN_TOKEN_ISSUER`,
    /// `WARDEN_TOKEN_LIFETIME_DAYS`, `WARDEN_TOKEN_MAX_LIFETIME_DAYS`, and the
    /// cookie variables read by [`CookieConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`TokenConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = if let Some(secret) = lookup("WARDEN_TOKEN_SECRET") {
            let secret_key = BASE64_STANDARD.decode(secret.trim()).map_err(|e| {
                ValidationError::InvalidField(format!("WARDEN_TOKEN_SECRET is not base64: {e}"))
            })?;
            Self::new_hs256(secret_key)
        } else {
            match (
                lookup("WARDEN_TOKEN_PRIVATE_KEY_PATH"),
                lookup("WARDEN_TOKEN_PUBLIC_KEY_PATH"),
            ) {
                (Some(private_key_path), Some(public_key_path)) => {
                    Self::from_rs256_pem_files(private_key_path, public_key_path)?
                }
                _ => {
                    return Err(ValidationError::MissingField(
                        "WARDEN_TOKEN_SECRET or WARDEN_TOKEN_PRIVATE_KEY_PATH/WARDEN_TOKEN_PUBLIC_KEY_PATH"
                            .to_string(),
                    ));
                }
            }
        };

        config.issuer = lookup("WARDEN_TOKEN_ISSUER").filter(|issuer| !issuer.trim().is_empty());
        if let Some(lifetime) =
            parse_duration_var(&lookup, "WARDEN_TOKEN_LIFETIME_DAYS", Duration::try_days)?
        {
            config.default_lifetime = lifetime;
        }
        config.max_lifetime =
            parse_duration_var(&lookup, "WARDEN_TOKEN_MAX_LIFETIME_DAYS", Duration::try_days)?;
        config.cookie = CookieConfig::from_lookup(&lookup)?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const TEST_HS256_SECRET: &[u8] = b"this_is_a_test_secret_key_for_hs256_tokens_not_for_prod";

    #[test]
    fn test_token_config_hs256() {
        let config = TokenConfig::new_hs256(TEST_HS256_SECRET.to_vec());

        match &config.algorithm {
            TokenAlgorithm::HS256 { secret_key } => {
                assert_eq!(secret_key, &TEST_HS256_SECRET.to_vec());
            }
            _ => panic!("Expected HS256 algorithm"),
        }

        assert_eq!(config.jwt_algorithm(), Algorithm::HS256);
        assert_eq!(config.default_lifetime, Duration::days(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_config_random_hs256() {
        let config = TokenConfig::new_random_hs256();

        match &config.algorithm {
            TokenAlgorithm::HS256 { secret_key } => {
                assert_eq!(secret_key.len(), MIN_HS256_SECRET_LEN);
            }
            _ => panic!("Expected HS256 algorithm"),
        }
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = TokenConfig::new_hs256(b"short".to_vec());
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidField(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let config = TokenConfig::new_hs256(TEST_HS256_SECRET.to_vec());
        let rendered = format!("{config:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("this_is_a_test_secret"));
    }

    #[test]
    fn test_from_lookup_hs256() {
        let secret = BASE64_STANDARD.encode(TEST_HS256_SECRET);
        let vars: HashMap<&str, String> = HashMap::from([
            ("WARDEN_TOKEN_SECRET", secret),
            ("WARDEN_TOKEN_ISSUER", "warden-test".to_string()),
            ("WARDEN_TOKEN_LIFETIME_DAYS", "1".to_string()),
            ("WARDEN_COOKIE_NAME", "auth".to_string()),
        ]);

        let config = TokenConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();
        assert_eq!(config.jwt_algorithm(), Algorithm::HS256);
        assert_eq!(config.issuer.as_deref(), Some("warden-test"));
        assert_eq!(config.default_lifetime, Duration::days(1));
        assert_eq!(config.max_lifetime, None);
        assert_eq!(config.cookie.name, "auth");
    }

    #[test]
    fn test_from_lookup_requires_key_material() {
        let result = TokenConfig::from_lookup(|_| None);
        assert!(matches!(result, Err(ValidationError::MissingField(_))));

        let result = TokenConfig::from_lookup(|name| {
            (name == "WARDEN_TOKEN_SECRET").then(|| "%%%not-base64%%%".to_string())
        });
        assert!(matches!(result, Err(ValidationError::InvalidField(_))));
    }

    #[test]
    fn test_from_lookup_rejects_out_of_range_lifetimes() {
        let secret = BASE64_STANDARD.encode(TEST_HS256_SECRET);
        for name in ["WARDEN_TOKEN_LIFETIME_DAYS", "WARDEN_TOKEN_MAX_LIFETIME_DAYS"] {
            let vars: HashMap<&str, String> = HashMap::from([
                ("WARDEN_TOKEN_SECRET", secret.clone()),
                (name, "999999999999999999".to_string()),
            ]);
            let result = TokenConfig::from_lookup(|var| vars.get(var).cloned());
            assert!(
                matches!(result, Err(ValidationError::InvalidField(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_subject_display() {
        let subject = Subject::new("alice".to_string());
        assert_eq!(subject.to_string(), "alice");
        assert_eq!(subject.as_str(), "alice");
        assert_eq!(subject.into_inner(), "alice");
    }
}
