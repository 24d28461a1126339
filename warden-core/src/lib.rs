//! Core functionality for the warden project
//!
//! This crate contains the two building blocks of warden's login security:
//!
//! - [`BruteForceGuard`] counts failed logins per [`AttemptKey`] (user plus
//!   client address) and refuses further attempts for a while once a threshold
//!   is reached.
//! - [`TokenIssuer`] mints signed, time-bounded tokens for authenticated
//!   subjects, validates them, and packages them as cookies
//!   ([`TransportEnvelope`]).
//!
//! Counters live behind the [`AttemptRepository`] trait. An in-memory store
//! ships here; persistent stores live in their own crates and are exposed
//! through [`RepositoryProvider`].
//!
//! Application code normally uses the `warden` crate, which wires these pieces
//! into a login flow.
pub mod clock;
pub mod error;
pub mod key;
pub mod repositories;
pub mod services;
pub mod storage;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, InvalidToken, StorageError, TokenError, ValidationError};
pub use key::{AttemptKey, resolve_client_address};
pub use repositories::{
    AttemptRepository, AttemptRepositoryAdapter, InMemoryRepositoryProvider, RepositoryProvider,
};
pub use services::BruteForceGuard;
pub use storage::{
    AttemptRecord, BlockStatus, BruteForceConfig, InMemoryAttemptRepository, LockoutRule,
    StoreFailurePolicy,
};
pub use token::{
    CookieConfig, CookieSameSite, Subject, Token, TokenAlgorithm, TokenClaims, TokenConfig,
    TokenIssuer, TransportEnvelope, extract_presented_token,
};
