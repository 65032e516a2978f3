//! Bearer tokens, their persisted form and the authentication proofs that
//! obtain them.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// A short-lived bearer token issued for a tenant.
///
/// The value is kept in a [`SecretString`] and never shows up in `Debug`
/// output.
#[derive(Clone)]
pub struct Token {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl Token {
    /// Creates a token from its value and absolute expiry.
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: SecretString::new(value.into().into()),
            expires_at,
        }
    }

    /// The raw bearer value.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// When the issuing backend stops accepting this token.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token is usable at `now`.
    ///
    /// True only while more than `threshold` remains before expiry, so a token
    /// is already invalid exactly at `expires_at - threshold`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        self.expires_at - now > threshold
    }

    /// The instant at which a proactive refresh should happen.
    ///
    /// Saturates at the earliest representable instant when `threshold` is
    /// larger than the time since the epoch allows.
    #[must_use]
    pub fn refresh_at(&self, threshold: chrono::Duration) -> DateTime<Utc> {
        self.expires_at
            .checked_sub_signed(threshold)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Time to wait from `now` before refreshing, clamped at zero.
    #[must_use]
    pub fn refresh_delay(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Duration {
        (self.refresh_at(threshold) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// The serialisable form of this token.
    #[must_use]
    pub fn to_record(&self) -> TokenRecord {
        TokenRecord {
            token: self.expose().to_string(),
            expires_at: self.expires_at,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl From<TokenRecord> for Token {
    fn from(record: TokenRecord) -> Self {
        Self::new(record.token, record.expires_at)
    }
}

/// Wire and storage representation of a token.
///
/// This is both the body returned by the token endpoint and the record
/// written to the local store: `{"token": "...", "expiresAt": "<ISO-8601>"}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// The bearer value.
    pub token: String,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A one-time proof submitted to obtain a token, such as a solved captcha.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProof {
    /// Proof kind understood by the backend (e.g. `captcha`).
    #[serde(rename = "type")]
    pub kind: String,
    /// The proof payload.
    pub value: String,
}

impl AuthProof {
    /// Creates a proof of an arbitrary kind.
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Creates a captcha proof.
    pub fn captcha(value: impl Into<String>) -> Self {
        Self::new("captcha", value)
    }
}

impl fmt::Debug for AuthProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProof")
            .field("kind", &self.kind)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Lifecycle state of the token manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// The manager has not been started.
    Uninitialized,
    /// Explicit authentication mode: automatic refresh never runs and tokens
    /// arrive only through a submitted proof or an on-demand fetch.
    NoAuthRequired,
    /// No valid token is cached yet.
    AwaitingToken,
    /// A cached token is not yet near expiry.
    Valid,
    /// A token fetch is in flight.
    Refreshing,
}

impl TokenState {
    /// Short lowercase name, as used in logs and CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::NoAuthRequired => "no_auth_required",
            Self::AwaitingToken => "awaiting_token",
            Self::Valid => "valid",
            Self::Refreshing => "refreshing",
        }
    }
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
