//! Attempt keys and client address resolution
//!
//! An [`AttemptKey`] scopes one brute-force counter to a (user, client address)
//! pair. The same user from a different address, or a different user from the
//! same address, gets its own counter.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Composite identity of one brute-force counter.
///
/// Both parts are normalized on construction: the user identifier is trimmed and
/// the client address is rendered in canonical IP form when it parses as one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawAttemptKey")]
pub struct AttemptKey {
    user_id: String,
    client_addr: String,
}

/// Wire form of [`AttemptKey`], normalized through [`AttemptKey::new`].
#[derive(Deserialize)]
struct RawAttemptKey {
    user_id: String,
    client_addr: String,
}

impl TryFrom<RawAttemptKey> for AttemptKey {
    type Error = ValidationError;

    fn try_from(raw: RawAttemptKey) -> Result<Self, Self::Error> {
        Self::new(&raw.user_id, &raw.client_addr)
    }
}

impl AttemptKey {
    /// Build a key from a user identifier and a client address.
    ///
    /// Returns a validation error when either part is empty after trimming.
    pub fn new(user_id: &str, client_addr: &str) -> Result<Self, ValidationError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ValidationError::MissingField(
                "Attempt key user id is empty".to_string(),
            ));
        }

        let client_addr = normalize_address(client_addr);
        if client_addr.is_empty() {
            return Err(ValidationError::MissingField(
                "Attempt key client address is empty".to_string(),
            ));
        }

        Ok(Self {
            user_id: user_id.to_string(),
            client_addr,
        })
    }

    /// Build a key from an already parsed client IP.
    pub fn from_ip(user_id: &str, client_ip: IpAddr) -> Result<Self, ValidationError> {
        Self::new(user_id, &client_ip.to_string())
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn client_addr(&self) -> &str {
        &self.client_addr
    }
}

impl std::fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.user_id, self.client_addr)
    }
}

fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(ip) => ip.to_canonical().to_string(),
        Err(_) => trimmed.to_ascii_lowercase(),
    }
}

/// Pick the client address a login request should be attributed to.
///
/// When `trust_forwarded` is set and `forwarded_for` carries an `X-Forwarded-For`
/// value, the first hop that parses as an IP wins. Otherwise the socket peer is
/// used. Only enable `trust_forwarded` behind a proxy that overwrites the header.
pub fn resolve_client_address(
    forwarded_for: Option<&str>,
    peer: IpAddr,
    trust_forwarded: bool,
) -> IpAddr {
    if trust_forwarded {
        let first_hop = forwarded_for
            .and_then(|header| header.split(',').next())
            .and_then(|hop| hop.trim().parse::<IpAddr>().ok());

        if let Some(ip) = first_hop {
            return ip.to_canonical();
        }
    }

    peer.to_canonical()
}
