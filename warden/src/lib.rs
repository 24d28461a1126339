//! # Warden
//!
//! Warden protects a password login in two ways:
//!
//! - Repeated failures for the same user from the same client address are
//!   throttled. After `max_failed_attempts` failures the pair is refused for a
//!   cooldown window, even if the next attempt carries the right password.
//! - A successful login yields a signed, time-bounded token delivered as an
//!   `HttpOnly` cookie. Later requests present the token and get the subject back.
//!
//! Warden does not store users or passwords. Plug your user store in through
//! [`CredentialVerifier`].
//!
//! ## Storage Support
//!
//! Failure counters can live in:
//! - memory ([`InMemoryRepositoryProvider`]), per process
//! - SQLite ([`SqliteRepositoryProvider`], `sqlite` feature)
//!
//! ## Example
//!
//! ```rust,no_run
//! use warden::{LoginOutcome, LoginRequest, TokenConfig, WardenBuilder};
//! # use warden::{CredentialVerifier, WardenError};
//! # struct Users;
//! # #[async_trait::async_trait]
//! # impl CredentialVerifier for Users {
//! #     async fn verify(&self, _: &str, _: &str) -> Result<bool, WardenError> { Ok(true) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warden = WardenBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .with_token_config(TokenConfig::from_env()?)
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let request = LoginRequest::new("alice", "hunter2", "203.0.113.5");
//!     match warden.login(&request, &Users).await? {
//!         LoginOutcome::Granted { envelope, .. } => {
//!             println!("Set-Cookie: {}", envelope.to_set_cookie_header());
//!         }
//!         LoginOutcome::Blocked { retry_after_minutes } => {
//!             println!("Too many attempts, retry in {retry_after_minutes} minutes");
//!         }
//!         LoginOutcome::InvalidCredentials => println!("Invalid credentials"),
//!     }
//!     Ok(())
//! }
//! ```
pub mod builder;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use warden_core::repositories::AttemptRepositoryAdapter;

pub use builder::{NoStorage, WardenBuilder, WardenBuilderError, WithStorage};

/// Re-export core types from warden_core
///
/// These types are commonly used when working with the Warden API.
pub use warden_core::{
    AttemptKey, BlockStatus, BruteForceConfig, BruteForceGuard, Clock, CookieConfig,
    CookieSameSite, InMemoryRepositoryProvider, InvalidToken, ManualClock, RepositoryProvider,
    StoreFailurePolicy, Subject, SystemClock, Token, TokenAlgorithm, TokenClaims, TokenConfig,
    TokenIssuer, TransportEnvelope, extract_presented_token, resolve_client_address,
};

/// Re-export storage backends
///
/// These storage implementations are available when the corresponding feature is enabled.
#[cfg(feature = "sqlite")]
pub use warden_storage_sqlite::SqliteRepositoryProvider;

#[cfg(feature = "sqlite")]
pub(crate) mod sqlite {
    pub use warden_storage_sqlite::SqliteRepositoryProvider;
}

/// Errors that can occur when using Warden.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// The login request could not be turned into an attempt key
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The credential verifier failed
    #[error("Auth error: {0}")]
    AuthError(String),
    /// Error when interacting with storage
    #[error("Storage error: {0}")]
    StorageError(String),
    /// A token could not be issued
    #[error("Token error: {0}")]
    TokenError(String),
}

/// Checks a user's credentials against the application's user store.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Whether `password` is correct for `user_id`.
    ///
    /// Return `Ok(false)` for unknown users and wrong passwords alike.
    async fn verify(&self, user_id: &str, password: &str) -> Result<bool, WardenError>;
}

/// One login attempt.
#[derive(Clone)]
pub struct LoginRequest {
    pub user_id: String,
    pub password: String,
    /// Resolved client address, see [`resolve_client_address`]
    pub client_addr: String,
}

impl LoginRequest {
    pub fn new(
        user_id: impl Into<String>,
        password: impl Into<String>,
        client_addr: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            password: password.into(),
            client_addr: client_addr.into(),
        }
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("user_id", &self.user_id)
            .field("password", &"<redacted>")
            .field("client_addr", &self.client_addr)
            .finish()
    }
}

/// Result of [`Warden::login`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials verified. Send `envelope` back as a `Set-Cookie` header.
    Granted {
        subject: Subject,
        token: Token,
        envelope: TransportEnvelope,
    },
    /// The (user, address) pair is in a cooldown window. Credentials were not checked.
    Blocked { retry_after_minutes: i64 },
    /// Wrong user or password. The failure was counted.
    InvalidCredentials,
}

/// The main login coordinator.
///
/// `Warden` runs the login flow: refuse blocked keys, verify credentials,
/// count failures, and on success reset the key and issue a token.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use warden::{InMemoryRepositoryProvider, TokenConfig, Warden};
///
/// let warden = Warden::new(
///     Arc::new(InMemoryRepositoryProvider::new()),
///     TokenConfig::new_random_hs256(),
/// )
/// .unwrap();
/// ```
pub struct Warden<R: RepositoryProvider> {
    repositories: Arc<R>,
    guard: Arc<BruteForceGuard<AttemptRepositoryAdapter<R>>>,
    issuer: Arc<TokenIssuer>,
}

impl<R: RepositoryProvider> Warden<R> {
    /// Create a Warden with the default brute-force settings and the system clock.
    pub fn new(repositories: Arc<R>, token_config: TokenConfig) -> Result<Self, WardenError> {
        Self::from_parts(
            repositories,
            BruteForceConfig::default(),
            token_config,
            Arc::new(SystemClock),
        )
    }

    /// Create a Warden from explicit parts. The guard and the issuer share `clock`.
    pub fn from_parts(
        repositories: Arc<R>,
        brute_force_config: BruteForceConfig,
        token_config: TokenConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WardenError> {
        let issuer = TokenIssuer::with_clock(token_config, clock.clone())
            .map_err(|e| WardenError::TokenError(e.to_string()))?;
        let guard = BruteForceGuard::with_clock(
            Arc::new(AttemptRepositoryAdapter::new(repositories.clone())),
            brute_force_config,
            clock,
        );

        Ok(Self {
            repositories,
            guard: Arc::new(guard),
            issuer: Arc::new(issuer),
        })
    }

    pub fn guard(&self) -> &BruteForceGuard<AttemptRepositoryAdapter<R>> {
        &self.guard
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Run storage migrations
    pub async fn migrate(&self) -> Result<(), WardenError> {
        self.repositories
            .migrate()
            .await
            .map_err(|e| WardenError::StorageError(e.to_string()))
    }

    /// Check that storage is reachable
    pub async fn health_check(&self) -> Result<(), WardenError> {
        self.repositories
            .health_check()
            .await
            .map_err(|e| WardenError::StorageError(e.to_string()))
    }

    /// Attempt a login.
    ///
    /// A blocked key is refused before the verifier runs. A wrong password is
    /// counted against the key; a right one clears it and yields a token
    /// with the configured lifetimes.
    pub async fn login(
        &self,
        request: &LoginRequest,
        verifier: &dyn CredentialVerifier,
    ) -> Result<LoginOutcome, WardenError> {
        let key = AttemptKey::new(&request.user_id, &request.client_addr)
            .map_err(|e| WardenError::InvalidRequest(e.to_string()))?;

        let status = self.guard.check_and_handle_block(&key).await;
        if status.is_blocked {
            let retry_after_minutes = status.retry_after_minutes().unwrap_or(1);
            tracing::info!(key = %key, retry_after_minutes, "Login refused, key is blocked");
            return Ok(LoginOutcome::Blocked {
                retry_after_minutes,
            });
        }

        if !verifier.verify(key.user_id(), &request.password).await? {
            let status = self.guard.record_failure(&key).await;
            tracing::info!(
                key = %key,
                failed_attempts = status.failed_attempts,
                "Login failed"
            );
            return Ok(LoginOutcome::InvalidCredentials);
        }

        self.guard.reset(&key).await;

        let token = self
            .issuer
            .issue_default(key.user_id())
            .map_err(|e| WardenError::TokenError(e.to_string()))?;
        let envelope = self.issuer.wrap_for_transport_default(&token);

        tracing::info!(user_id = %key.user_id(), "Login succeeded");

        Ok(LoginOutcome::Granted {
            subject: Subject::from(key.user_id()),
            token,
            envelope,
        })
    }

    /// Issue a token for `subject` outside the login flow.
    pub fn issue_token(&self, subject: &str, lifetime: Duration) -> Result<Token, WardenError> {
        self.issuer
            .issue(subject, lifetime)
            .map_err(|e| WardenError::TokenError(e.to_string()))
    }

    /// Validate a presented token.
    pub fn validate(&self, presented: &str) -> Result<Subject, InvalidToken> {
        self.issuer.validate(presented)
    }

    /// Validate the token carried by a request's `Cookie` or `Authorization` header.
    pub fn validate_request(
        &self,
        cookie_header: Option<&str>,
        authorization: Option<&str>,
    ) -> Result<Subject, InvalidToken> {
        let presented = extract_presented_token(
            cookie_header,
            authorization,
            &self.issuer.config().cookie.name,
        )
        .ok_or(InvalidToken)?;
        self.issuer.validate(&presented)
    }

    /// Whether the request carries a valid token for `expected_subject`.
    pub fn validate_request_for(
        &self,
        cookie_header: Option<&str>,
        authorization: Option<&str>,
        expected_subject: &str,
    ) -> bool {
        self.validate_request(cookie_header, authorization)
            .is_ok_and(|subject| subject.as_str() == expected_subject)
    }

    /// Envelope that clears the token cookie.
    ///
    /// Tokens are not revoked server-side; a copied token stays valid until it expires.
    pub fn logout(&self) -> TransportEnvelope {
        self.issuer.logout_envelope()
    }

    /// Start the background task that purges stale failure counters.
    pub fn start_cleanup_task(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        self.guard.start_cleanup_task(shutdown)
    }
}
