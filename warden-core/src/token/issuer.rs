use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use crate::{
    clock::{Clock, SystemClock},
    error::{Error, InvalidToken, TokenError, ValidationError},
    token::{Subject, Token, TokenAlgorithm, TokenClaims, TokenConfig, TransportEnvelope},
};

/// Issues and validates signed tokens.
///
/// The keys are derived once from the [`TokenConfig`] and never change, so an
/// issuer can be shared behind an `Arc` without locking.
#[derive(Clone)]
pub struct TokenIssuer {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &self.config.algorithm)
            .field("issuer", &self.config.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(config: TokenConfig) -> Result<Self, Error> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: TokenConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        config.validate()?;

        let (encoding_key, decoding_key) = match &config.algorithm {
            TokenAlgorithm::HS256 { secret_key } => (
                EncodingKey::from_secret(secret_key),
                DecodingKey::from_secret(secret_key),
            ),
            TokenAlgorithm::RS256 {
                private_key,
                public_key,
            } => (
                EncodingKey::from_rsa_pem(private_key).map_err(|e| {
                    TokenError::InvalidKey(format!("Invalid RSA private key: {e}"))
                })?,
                DecodingKey::from_rsa_pem(public_key).map_err(|e| {
                    TokenError::InvalidKey(format!("Invalid RSA public key: {e}"))
                })?,
            ),
        };

        // Expiry is checked against the injected clock in `verify_claims`.
        let mut validation = Validation::new(config.jwt_algorithm());
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self {
            config,
            encoding_key,
            decoding_key,
            validation,
            clock,
        })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue a token for `subject` that expires `lifetime` from now.
    pub fn issue(&self, subject: &str, lifetime: Duration) -> Result<Token, Error> {
        if subject.trim().is_empty() {
            return Err(ValidationError::MissingField("subject".to_string()).into());
        }
        if lifetime < Duration::seconds(1) {
            return Err(ValidationError::InvalidLifetime(format!(
                "token lifetime must be at least one second, got {}s",
                lifetime.num_seconds()
            ))
            .into());
        }

        let lifetime = match self.config.max_lifetime {
            Some(max) if lifetime > max => {
                tracing::warn!(
                    requested_secs = lifetime.num_seconds(),
                    max_secs = max.num_seconds(),
                    "Requested token lifetime exceeds maximum, clamping"
                );
                max
            }
            _ => lifetime,
        };

        let now = self.clock.now();
        let expires_at = now.checked_add_signed(lifetime).ok_or_else(|| {
            ValidationError::InvalidLifetime(format!(
                "token lifetime of {}s is out of range",
                lifetime.num_seconds()
            ))
        })?;
        let claims = TokenClaims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.config.issuer.clone(),
        };

        let value = encode(
            &Header::new(self.config.jwt_algorithm()),
            &claims,
            &self.encoding_key,
        )
        .map_err(|e| TokenError::Signing(e.to_string()))?;

        tracing::debug!(subject = %claims.sub, exp = claims.exp, "Issued token");

        Ok(Token::new(value, claims))
    }

    /// Issue a token with the configured default lifetime.
    pub fn issue_default(&self, subject: &str) -> Result<Token, Error> {
        self.issue(subject, self.config.default_lifetime)
    }

    /// Package a token as a cookie living for `envelope_lifetime`.
    ///
    /// The cookie lifetime is independent of the token's own expiry.
    pub fn wrap_for_transport(&self, token: &Token, envelope_lifetime: Duration) -> TransportEnvelope {
        self.config
            .cookie
            .envelope(token.as_str().to_string(), envelope_lifetime)
    }

    /// Package a token with the configured cookie lifetime.
    pub fn wrap_for_transport_default(&self, token: &Token) -> TransportEnvelope {
        self.wrap_for_transport(token, self.config.cookie.max_age)
    }

    /// An envelope that clears the token cookie on the client.
    ///
    /// The token itself stays valid until its `exp`.
    pub fn logout_envelope(&self) -> TransportEnvelope {
        self.config.cookie.envelope(String::new(), Duration::zero())
    }

    /// Check a presented token and return its subject.
    pub fn validate(&self, presented: &str) -> Result<Subject, InvalidToken> {
        self.verify_claims(presented)
            .map(|claims| Subject::new(claims.sub))
    }

    /// Whether `presented` is valid and belongs to `expected_subject`.
    pub fn validate_for(&self, presented: &str, expected_subject: &str) -> bool {
        self.validate(presented)
            .is_ok_and(|subject| subject.as_str() == expected_subject)
    }

    /// Check a presented token and return all of its claims.
    pub fn verify_claims(&self, presented: &str) -> Result<TokenClaims, InvalidToken> {
        let presented = presented.trim();
        if presented.is_empty() {
            tracing::debug!("Rejected empty token");
            return Err(InvalidToken);
        }

        let data = decode::<TokenClaims>(presented, &self.decoding_key, &self.validation).map_err(
            |e| {
                tracing::debug!(reason = %e, "Rejected token");
                InvalidToken
            },
        )?;
        let claims = data.claims;

        let now: DateTime<Utc> = self.clock.now();
        if now.timestamp() >= claims.exp {
            tracing::debug!(subject = %claims.sub, exp = claims.exp, "Rejected expired token");
            return Err(InvalidToken);
        }
        if claims.sub.is_empty() {
            tracing::debug!("Rejected token without subject");
            return Err(InvalidToken);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;

    const TEST_HS256_SECRET: &[u8] = b"this_is_a_test_secret_key_for_hs256_tokens_not_for_prod";
    const OTHER_HS256_SECRET: &[u8] = b"another_secret_key_that_is_long_enough_for_hs256_use";

    // DO NOT EVER USE THESE KEYS FOR ANYTHING REAL
    const TEST_RS256_PRIVATE_KEY: &[u8] = include_bytes!("../../testdata/rs256_private.pem");
    const TEST_RS256_PUBLIC_KEY: &[u8] = include_bytes!("../../testdata/rs256_public.pem");

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn issuer_with_clock() -> (TokenIssuer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let issuer = TokenIssuer::with_clock(
            TokenConfig::new_hs256(TEST_HS256_SECRET.to_vec()),
            clock.clone(),
        )
        .unwrap();
        (issuer, clock)
    }

    fn replace_segment(token: &str, index: usize, segment: &str) -> String {
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[index] = segment;
        parts.join(".")
    }

    #[test]
    fn test_issue_then_validate() {
        let (issuer, _clock) = issuer_with_clock();
        let token = issuer.issue("alice", Duration::days(3)).unwrap();

        assert_eq!(token.subject(), "alice");
        assert_eq!(token.issued_at(), start());
        assert_eq!(token.expires_at(), start() + Duration::days(3));
        assert_eq!(token.as_str().split('.').count(), 3);

        let subject = issuer.validate(token.as_str()).unwrap();
        assert_eq!(subject.as_str(), "alice");
    }

    #[test]
    fn test_token_expires_at_exact_instant() {
        let (issuer, clock) = issuer_with_clock();
        let lifetime = Duration::minutes(30);
        let token = issuer.issue("alice", lifetime).unwrap();

        clock.advance(lifetime - Duration::seconds(1));
        assert!(issuer.validate(token.as_str()).is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(issuer.validate(token.as_str()), Err(InvalidToken));

        clock.advance(Duration::days(365));
        assert_eq!(issuer.validate(token.as_str()), Err(InvalidToken));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let (issuer, _clock) = issuer_with_clock();
        let token = issuer.issue("alice", Duration::days(1)).unwrap();

        let signature = token.as_str().split('.').nth(2).unwrap();
        let mut chars: Vec<char> = signature.chars().collect();
        let middle = chars.len() / 2;
        chars[middle] = if chars[middle] == 'A' { 'B' } else { 'A' };
        let forged_signature: String = chars.into_iter().collect();

        let forged = replace_segment(token.as_str(), 2, &forged_signature);
        assert_eq!(issuer.validate(&forged), Err(InvalidToken));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let (issuer, _clock) = issuer_with_clock();
        let token = issuer.issue("alice", Duration::days(1)).unwrap();

        let payload = token.as_str().split('.').nth(1).unwrap();
        let mut claims: serde_json::Value =
            serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        claims["sub"] = serde_json::Value::String("mallory".to_string());
        let forged_payload = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());

        let forged = replace_segment(token.as_str(), 1, &forged_payload);
        assert_eq!(issuer.validate(&forged), Err(InvalidToken));

        claims["sub"] = serde_json::Value::String("alice".to_string());
        claims["exp"] = serde_json::Value::from(claims["exp"].as_i64().unwrap() + 86_400);
        let extended_payload = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let extended = replace_segment(token.as_str(), 1, &extended_payload);
        assert_eq!(issuer.validate(&extended), Err(InvalidToken));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let (issuer, _clock) = issuer_with_clock();

        for presented in ["", "   ", "not-a-token", "a.b", "a.b.c", "a.b.c.d", "\u{0}\u{1}.."] {
            assert_eq!(issuer.validate(presented), Err(InvalidToken), "{presented:?}");
        }
    }

    #[test]
    fn test_token_from_other_key_rejected() {
        let (issuer, clock) = issuer_with_clock();
        let other = TokenIssuer::with_clock(
            TokenConfig::new_hs256(OTHER_HS256_SECRET.to_vec()),
            clock.clone(),
        )
        .unwrap();

        let token = other.issue("alice", Duration::days(1)).unwrap();
        assert_eq!(issuer.validate(token.as_str()), Err(InvalidToken));
        assert!(other.validate(token.as_str()).is_ok());
    }

    #[test]
    fn test_hs256_signing_is_deterministic() {
        let (issuer, _clock) = issuer_with_clock();
        let first = issuer.issue("alice", Duration::days(1)).unwrap();
        let second = issuer.issue("alice", Duration::days(1)).unwrap();
        assert_eq!(first, second);

        let bob = issuer.issue("bob", Duration::days(1)).unwrap();
        assert_ne!(first.as_str(), bob.as_str());
    }

    #[test]
    fn test_issuer_claim_checked() {
        let clock = Arc::new(ManualClock::new(start()));
        let config = TokenConfig::new_hs256(TEST_HS256_SECRET.to_vec());

        let plain = TokenIssuer::with_clock(config.clone(), clock.clone()).unwrap();
        let named =
            TokenIssuer::with_clock(config.clone().with_issuer("warden"), clock.clone()).unwrap();
        let other =
            TokenIssuer::with_clock(config.with_issuer("someone-else"), clock.clone()).unwrap();

        let token = named.issue("alice", Duration::days(1)).unwrap();
        assert_eq!(token.claims().iss.as_deref(), Some("warden"));
        assert!(named.validate(token.as_str()).is_ok());
        assert_eq!(other.validate(token.as_str()), Err(InvalidToken));

        let anonymous = plain.issue("alice", Duration::days(1)).unwrap();
        assert_eq!(named.validate(anonymous.as_str()), Err(InvalidToken));
    }

    #[test]
    fn test_validate_for_subject() {
        let (issuer, clock) = issuer_with_clock();
        let token = issuer.issue("alice", Duration::hours(1)).unwrap();

        assert!(issuer.validate_for(token.as_str(), "alice"));
        assert!(!issuer.validate_for(token.as_str(), "bob"));

        clock.advance(Duration::hours(1));
        assert!(!issuer.validate_for(token.as_str(), "alice"));
    }

    #[test]
    fn test_issue_rejects_bad_input() {
        let (issuer, _clock) = issuer_with_clock();

        let err = issuer.issue("", Duration::days(1)).unwrap_err();
        assert!(err.is_validation_error());

        let err = issuer.issue("alice", Duration::zero()).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidLifetime(_))
        ));

        let err = issuer.issue("alice", Duration::seconds(-5)).unwrap_err();
        assert!(err.is_validation_error());

        let err = issuer.issue("alice", Duration::days(100_000_000)).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidLifetime(_))
        ));
    }

    #[test]
    fn test_max_lifetime_clamps() {
        let clock = Arc::new(ManualClock::new(start()));
        let config = TokenConfig::new_hs256(TEST_HS256_SECRET.to_vec())
            .with_max_lifetime(Duration::hours(1));
        let issuer = TokenIssuer::with_clock(config, clock).unwrap();

        let token = issuer.issue("alice", Duration::days(30)).unwrap();
        assert_eq!(token.expires_at(), start() + Duration::hours(1));
    }

    #[test]
    fn test_issue_default_uses_configured_lifetime() {
        let (issuer, _clock) = issuer_with_clock();
        let token = issuer.issue_default("alice").unwrap();
        assert_eq!(token.expires_at(), start() + Duration::days(3));
    }

    #[test]
    fn test_wrap_for_transport() {
        let (issuer, _clock) = issuer_with_clock();
        let token = issuer.issue("alice", Duration::days(3)).unwrap();

        let envelope = issuer.wrap_for_transport(&token, Duration::days(10));
        assert_eq!(envelope.name, "jwt");
        assert_eq!(envelope.value, token.as_str());
        assert_eq!(envelope.max_age, Duration::days(10));
        assert!(envelope.http_only);
        assert!(envelope.secure);

        let header = envelope.to_set_cookie_header();
        assert!(header.contains("SameSite=Strict"));
        assert!(header.contains("Max-Age=864000"));

        let default_envelope = issuer.wrap_for_transport_default(&token);
        assert_eq!(default_envelope, envelope);
    }

    #[test]
    fn test_logout_envelope() {
        let (issuer, _clock) = issuer_with_clock();
        let envelope = issuer.logout_envelope();

        assert!(envelope.is_removal());
        assert_eq!(envelope.name, "jwt");
        assert_eq!(envelope.path, "/");
        assert!(envelope.http_only);
    }

    #[test]
    fn test_rs256_round_trip() {
        let clock = Arc::new(ManualClock::new(start()));
        let config = TokenConfig::new_rs256(
            TEST_RS256_PRIVATE_KEY.to_vec(),
            TEST_RS256_PUBLIC_KEY.to_vec(),
        );
        let issuer = TokenIssuer::with_clock(config, clock.clone()).unwrap();

        let token = issuer.issue("alice", Duration::hours(2)).unwrap();
        assert_eq!(issuer.validate(token.as_str()).unwrap().as_str(), "alice");

        let hs256 = TokenIssuer::with_clock(
            TokenConfig::new_hs256(TEST_HS256_SECRET.to_vec()),
            clock.clone(),
        )
        .unwrap();
        assert_eq!(hs256.validate(token.as_str()), Err(InvalidToken));

        clock.advance(Duration::hours(2));
        assert_eq!(issuer.validate(token.as_str()), Err(InvalidToken));
    }

    #[test]
    fn test_rs256_from_pem_files() {
        let dir = env!("CARGO_MANIFEST_DIR");
        let config = TokenConfig::from_rs256_pem_files(
            format!("{dir}/testdata/rs256_private.pem"),
            format!("{dir}/testdata/rs256_public.pem"),
        )
        .unwrap();
        assert!(TokenIssuer::new(config).is_ok());

        let missing = TokenConfig::from_rs256_pem_files("/nonexistent/key.pem", "/nonexistent/pub.pem");
        assert!(missing.is_err());
    }

    #[test]
    fn test_invalid_rsa_key_material() {
        let config = TokenConfig::new_rs256(b"not a key".to_vec(), b"not a key".to_vec());
        let err = TokenIssuer::new(config).unwrap_err();
        assert!(err.is_token_error());
    }

    #[test]
    fn test_short_secret_rejected_at_construction() {
        let err = TokenIssuer::new(TokenConfig::new_hs256(b"short".to_vec())).unwrap_err();
        assert!(err.is_validation_error());
    }
}
