//! Cookie transport for issued tokens.

use chrono::Duration;
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    storage::{parse_duration_var, parse_var},
};

/// SameSite attribute written on the token cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CookieSameSite {
    #[default]
    Strict,
    Lax,
    None,
}

impl From<CookieSameSite> for SameSite {
    fn from(value: CookieSameSite) -> Self {
        match value {
            CookieSameSite::Strict => SameSite::Strict,
            CookieSameSite::Lax => SameSite::Lax,
            CookieSameSite::None => SameSite::None,
        }
    }
}

/// Attributes of the cookie that carries the token.
///
/// The cookie never has a `Domain`, so browsers scope it to the exact host
/// that set it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieConfig {
    pub name: String,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: CookieSameSite,
    /// `Max-Age` used when no explicit envelope lifetime is given
    pub max_age: Duration,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: CookieConfig::DEFAULT_NAME.to_string(),
            path: "/".to_string(),
            http_only: true,
            secure: true,
            same_site: CookieSameSite::Strict,
            max_age: Duration::days(10),
        }
    }
}

impl CookieConfig {
    pub const DEFAULT_NAME: &'static str = "jwt";

    /// Plain-HTTP friendly settings for local development.
    pub fn development() -> Self {
        Self {
            secure: false,
            same_site: CookieSameSite::Lax,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_same_site(mut self, same_site: CookieSameSite) -> Self {
        self.same_site = same_site;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Read `WARDEN_COOKIE_NAME`, `WARDEN_COOKIE_PATH`,
    /// `WARDEN_COOKIE_LIFETIME_DAYS` and `WARDEN_COOKIE_SECURE`.
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("WARDEN_COOKIE_NAME") {
            let name = name.trim();
            if name.is_empty() || name.contains([';', '=', ' ']) {
                return Err(ValidationError::InvalidField(format!(
                    "WARDEN_COOKIE_NAME is not a valid cookie name: `{name}`"
                )));
            }
            config.name = name.to_string();
        }
        if let Some(path) = lookup("WARDEN_COOKIE_PATH") {
            config.path = path.trim().to_string();
        }
        if let Some(max_age) =
            parse_duration_var(lookup, "WARDEN_COOKIE_LIFETIME_DAYS", Duration::try_days)?
        {
            config.max_age = max_age;
        }
        if let Some(secure) = parse_var(lookup, "WARDEN_COOKIE_SECURE")? {
            config.secure = secure;
        }

        Ok(config)
    }

    pub(crate) fn envelope(&self, value: String, max_age: Duration) -> TransportEnvelope {
        TransportEnvelope {
            name: self.name.clone(),
            value,
            path: self.path.clone(),
            max_age,
            http_only: self.http_only,
            secure: self.secure,
            same_site: self.same_site,
        }
    }
}

/// A token packaged as a cookie for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEnvelope {
    pub name: String,
    pub value: String,
    pub path: String,
    pub max_age: Duration,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: CookieSameSite,
}

impl TransportEnvelope {
    /// Build the cookie described by this envelope.
    pub fn to_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.name.clone(), self.value.clone()))
            .path(self.path.clone())
            .http_only(self.http_only)
            .secure(self.secure)
            .same_site(self.same_site.into())
            .max_age(time::Duration::seconds(self.max_age.num_seconds().max(0)))
            .build()
    }

    /// Value for a `Set-Cookie` response header.
    pub fn to_set_cookie_header(&self) -> String {
        self.to_cookie().to_string()
    }

    /// Whether this envelope tells the client to drop its cookie.
    pub fn is_removal(&self) -> bool {
        self.value.is_empty() && self.max_age <= Duration::zero()
    }
}

impl std::fmt::Display for TransportEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_cookie())
    }
}

/// Pull the presented token out of raw request headers.
///
/// The cookie named `cookie_name` wins; otherwise an `Authorization: Bearer`
/// header is used. Empty values count as absent.
pub fn extract_presented_token(
    cookie_header: Option<&str>,
    authorization: Option<&str>,
    cookie_name: &str,
) -> Option<String> {
    if let Some(header) = cookie_header {
        let from_cookie = Cookie::split_parse(header)
            .flatten()
            .find(|cookie| cookie.name() == cookie_name)
            .map(|cookie| cookie.value().trim().to_string())
            .filter(|value| !value.is_empty());
        if from_cookie.is_some() {
            return from_cookie;
        }
    }

    authorization
        .and_then(|header| header.trim().strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
