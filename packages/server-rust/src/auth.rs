//! Caller authentication.
//!
//! The transport attaches whatever the caller presented as [`Credentials`] to
//! the request context; the request-scope middleware hands them to an
//! [`Authenticator`] and attaches the resulting [`Principal`].

use std::fmt;

use reqscope_core::{Principal, UserId};
use subtle::ConstantTimeEq;

/// Bearer token presented by the caller.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials(String);

impl Credentials {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

/// Why a caller could not be authenticated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing credentials")]
    Missing,
    #[error("invalid credentials")]
    Invalid,
}

/// Identity provider consulted once per request.
pub trait Authenticator: Send + Sync {
    /// Resolves the caller's principal.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when credentials are absent or not recognised.
    fn authenticate(&self, credentials: Option<&Credentials>) -> Result<Principal, AuthError>;
}

/// Fixed token table. When disabled, every caller is the `guest` principal.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    enabled: bool,
    tokens: Vec<(String, Principal)>,
}

impl StaticAuthenticator {
    /// Accepts every caller as `guest`.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tokens: Vec::new(),
        }
    }

    #[must_use]
    pub fn new(tokens: Vec<(String, Principal)>) -> Self {
        Self {
            enabled: true,
            tokens,
        }
    }

    /// Parses a comma-separated `token:user_id` list.
    ///
    /// `None` disables authentication. Malformed entries are skipped with a warning.
    #[must_use]
    pub fn from_token_list(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            tracing::warn!("auth disabled: no token list configured");
            return Self::disabled();
        };

        let mut tokens = Vec::new();
        for entry in raw.split(',') {
            let trimmed = entry.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Some((token, user_id)) = trimmed.split_once(':') else {
                tracing::warn!(entry = %trimmed, "invalid token entry, expected token:user_id");
                continue;
            };
            if token.is_empty() || user_id.is_empty() {
                tracing::warn!(entry = %trimmed, "empty token or user id, skipping");
                continue;
            }
            tokens.push((token.to_string(), Principal::new(user_id)));
        }

        Self::new(tokens)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, credentials: Option<&Credentials>) -> Result<Principal, AuthError> {
        if !self.enabled {
            return Ok(Principal::new(UserId::from("guest")));
        }

        let credentials = credentials.ok_or(AuthError::Missing)?;
        let presented = credentials.token().as_bytes();

        // Scan the whole table so timing does not reveal which entry matched.
        let mut found = None;
        for (token, principal) in &self.tokens {
            if bool::from(token.as_bytes().ct_eq(presented)) {
                found = Some(principal);
            }
        }

        found.cloned().ok_or(AuthError::Invalid)
    }
}
