//! SDK configuration.
//!
//! A [`Config`] is built once when the SDK is initialised and is never mutated
//! afterwards. Every field except `tenant_id` has a default, so a config can be
//! read from a sparse TOML table:
//!
//! ```toml
//! tenant_id = "api-replicate-com-i24sjl"
//! token_owner = "user-42"
//! require_auth = true
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default base URL of the token-issuing backend.
pub const DEFAULT_API_BASE_URL: &str = "https://api.usesapi.com/";

/// Default suffix appended to the tenant identifier to form the proxy host.
pub const DEFAULT_PROXY_SUFFIX: &str = "proxy.usesapi.com";

/// Configuration for the credential SDK.
///
/// # Examples
///
/// ```
/// use sapi_common::Config;
///
/// let config = Config::new("api-replicate-com-i24sjl")
///     .with_token_owner("user-42")
///     .with_platform("ios")
///     .with_require_auth(true);
///
/// assert_eq!(config.token_owner, "user-42");
/// assert_eq!(config.expiration_threshold_ms, 60_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Opaque tenant identifier encoding the protected host and a routing salt.
    pub tenant_id: String,

    /// Owner recorded against issued tokens (default: `anonymous`).
    #[serde(default = "default_token_owner")]
    pub token_owner: String,

    /// Platform reported in token request metadata (default: `app`).
    #[serde(default = "default_platform")]
    pub platform: String,

    /// When true, tokens are only obtained through an explicit proof and the
    /// background refresh never runs (default: false).
    #[serde(default)]
    pub require_auth: bool,

    /// A token is treated as expired this many milliseconds before its real
    /// expiry (default: 60000).
    #[serde(default = "default_expiration_threshold_ms")]
    pub expiration_threshold_ms: u64,

    /// Base URL of the token-issuing backend, with a trailing slash.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Suffix of the tenant proxy host.
    #[serde(default = "default_proxy_suffix")]
    pub proxy_suffix: String,

    /// Upper bound on a single token fetch in milliseconds (default: 10000).
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_token_owner() -> String {
    "anonymous".to_string()
}

fn default_platform() -> String {
    "app".to_string()
}

const fn default_expiration_threshold_ms() -> u64 {
    60_000
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_proxy_suffix() -> String {
    DEFAULT_PROXY_SUFFIX.to_string()
}

const fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// Creates a configuration for `tenant_id` with every other field defaulted.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            token_owner: default_token_owner(),
            platform: default_platform(),
            require_auth: false,
            expiration_threshold_ms: default_expiration_threshold_ms(),
            api_base_url: default_api_base_url(),
            proxy_suffix: default_proxy_suffix(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }

    /// Sets the token owner.
    #[must_use]
    pub fn with_token_owner(mut self, token_owner: impl Into<String>) -> Self {
        self.token_owner = token_owner.into();
        self
    }

    /// Sets the platform reported to the token endpoint.
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Enables or disables the explicit-authentication mode.
    #[must_use]
    pub const fn with_require_auth(mut self, require_auth: bool) -> Self {
        self.require_auth = require_auth;
        self
    }

    /// Sets the expiration threshold in milliseconds.
    #[must_use]
    pub const fn with_expiration_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.expiration_threshold_ms = threshold_ms;
        self
    }

    /// Points the SDK at a different token-issuing backend.
    ///
    /// A trailing slash is appended when missing so that `v1/token` resolves
    /// beneath the given path.
    #[must_use]
    pub fn with_api_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        let mut api_base_url = api_base_url.into();
        if !api_base_url.ends_with('/') {
            api_base_url.push('/');
        }
        self.api_base_url = api_base_url;
        self
    }

    /// Sets the suffix used to build the proxy host.
    #[must_use]
    pub fn with_proxy_suffix(mut self, proxy_suffix: impl Into<String>) -> Self {
        self.proxy_suffix = proxy_suffix.into();
        self
    }

    /// Sets the token fetch timeout in milliseconds.
    #[must_use]
    pub const fn with_fetch_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.fetch_timeout_ms = timeout_ms;
        self
    }

    /// The expiration threshold as a signed duration for timestamp arithmetic.
    #[must_use]
    pub fn expiration_threshold(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(
            i64::try_from(self.expiration_threshold_ms).unwrap_or(i64::MAX),
        )
    }

    /// The token fetch timeout.
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}
