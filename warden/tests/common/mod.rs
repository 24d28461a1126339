#![allow(dead_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use warden::{CredentialVerifier, TokenConfig, WardenError};

pub const TEST_SECRET: &[u8] = b"integration_test_secret_key_for_hs256_only";

pub fn token_config() -> TokenConfig {
    TokenConfig::new_hs256(TEST_SECRET.to_vec()).with_issuer("warden-tests")
}

/// Plain-text user table standing in for an application's user store.
pub struct Users(HashMap<String, String>);

impl Users {
    pub fn with(entries: &[(&str, &str)]) -> Self {
        Self(
            entries
                .iter()
                .map(|(user, password)| (user.to_string(), password.to_string()))
                .collect(),
        )
    }
}

#[async_trait]
impl CredentialVerifier for Users {
    async fn verify(&self, user_id: &str, password: &str) -> Result<bool, WardenError> {
        Ok(self.0.get(user_id).is_some_and(|expected| expected == password))
    }
}

/// A verifier whose backing store is down.
pub struct BrokenUserStore;

#[async_trait]
impl CredentialVerifier for BrokenUserStore {
    async fn verify(&self, _user_id: &str, _password: &str) -> Result<bool, WardenError> {
        Err(WardenError::AuthError("user store unavailable".to_string()))
    }
}
