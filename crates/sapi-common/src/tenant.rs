//! Tenant identifiers and the hosts derived from them.
//!
//! A tenant identifier such as `api-replicate-com-i24sjl` packs the protected
//! API host (`api.replicate.com`) together with a routing salt (`i24sjl`).
//! Dots in the host become single hyphens and literal hyphens are written as
//! `--`. The proxy host is the identifier followed by the proxy suffix.

use thiserror::Error;

/// Stands in for escaped `--` while splitting. NUL never occurs in a hostname.
const ESCAPED_HYPHEN: &str = "\u{0}";

/// Errors produced while validating a tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantError {
    /// The identifier is empty.
    #[error("tenant identifier is empty")]
    Empty,

    /// The identifier contains a character that cannot appear in a hostname.
    #[error("tenant identifier contains invalid character {0:?}")]
    InvalidCharacter(char),

    /// Decoding produced no host, usually because the salt is missing.
    #[error("tenant identifier '{0}' does not encode a host")]
    MissingHost(String),

    /// Decoding produced a host with an empty label.
    #[error("tenant identifier decodes to malformed host '{0}'")]
    MalformedHost(String),
}

/// Recovers the protected API host from a tenant identifier.
///
/// Only the first dot-delimited label is considered. The last hyphen-delimited
/// segment is the routing salt and is dropped. This never fails: an identifier
/// with fewer than two segments decodes to an empty string.
///
/// # Examples
///
/// ```
/// use sapi_common::decode_host;
///
/// assert_eq!(decode_host("api-replicate-com-i24sjl"), "api.replicate.com");
/// assert_eq!(decode_host("api-my--service-io-x1.proxy.usesapi.com"), "api.my-service.io");
/// assert_eq!(decode_host("nosalt"), "");
/// ```
#[must_use]
pub fn decode_host(tenant_id: &str) -> String {
    let label = tenant_id.split('.').next().unwrap_or_default();
    let escaped = label.replace("--", ESCAPED_HYPHEN);

    let mut segments: Vec<&str> = escaped.split('-').collect();
    segments.pop();

    segments.join(".").replace(ESCAPED_HYPHEN, "-")
}

/// A validated tenant with its derived hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    id: String,
    api_host: String,
    proxy_host: String,
}

impl Tenant {
    /// Validates `tenant_id` and derives the API and proxy hosts.
    ///
    /// # Errors
    ///
    /// Returns a [`TenantError`] when the identifier is empty, contains
    /// characters outside `[A-Za-z0-9.-]`, or does not decode to a host made of
    /// non-empty labels.
    pub fn resolve(tenant_id: &str, proxy_suffix: &str) -> Result<Self, TenantError> {
        if tenant_id.is_empty() {
            return Err(TenantError::Empty);
        }

        if let Some(c) = tenant_id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
        {
            return Err(TenantError::InvalidCharacter(c));
        }

        let api_host = decode_host(tenant_id);
        if api_host.is_empty() {
            return Err(TenantError::MissingHost(tenant_id.to_string()));
        }
        if api_host.split('.').any(str::is_empty) {
            return Err(TenantError::MalformedHost(api_host));
        }

        Ok(Self {
            id: tenant_id.to_string(),
            proxy_host: format!("{tenant_id}.{proxy_suffix}"),
            api_host,
        })
    }

    /// The tenant identifier as configured.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The protected API host.
    #[must_use]
    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    /// The tenant proxy host.
    #[must_use]
    pub fn proxy_host(&self) -> &str {
        &self.proxy_host
    }

    /// Whether a request to `host` must be authenticated and proxied.
    ///
    /// Only the API host itself matches. Hosts that merely contain it, such
    /// as `api.replicate.com.example.net`, never receive the token.
    #[must_use]
    pub fn is_in_scope(&self, host: &str) -> bool {
        host.eq_ignore_ascii_case(&self.api_host)
    }

    /// The host a request to `host` is sent to: the proxy host when in
    /// scope, otherwise `host` unchanged.
    #[must_use]
    pub fn rewrite_host(&self, host: &str) -> String {
        if self.is_in_scope(host) {
            self.proxy_host.clone()
        } else {
            host.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_example_tenant() {
        assert_eq!(decode_host("api-replicate-com-i24sjl"), "api.replicate.com");
    }

    #[test]
    fn test_decode_escaped_hyphen() {
        assert_eq!(decode_host("a-b--c-salt.suffix"), "a.b-c");
        assert_eq!(decode_host("my--api-example-com-xyz"), "my-api.example.com");
    }

    #[test]
    fn test_decode_ignores_dotted_suffix() {
        assert_eq!(
            decode_host("api-replicate-com-i24sjl.proxy.usesapi.com"),
            "api.replicate.com"
        );
    }

    #[test]
    fn test_decode_degenerate_inputs() {
        assert_eq!(decode_host(""), "");
        assert_eq!(decode_host("salt"), "");
        assert_eq!(decode_host("host-salt"), "host");
        assert_eq!(decode_host("a--salt"), "");
    }

    #[test]
    fn test_resolve_derives_hosts() {
        let tenant = Tenant::resolve("api-replicate-com-i24sjl", "proxy.usesapi.com").unwrap();

        assert_eq!(tenant.id(), "api-replicate-com-i24sjl");
        assert_eq!(tenant.api_host(), "api.replicate.com");
        assert_eq!(
            tenant.proxy_host(),
            "api-replicate-com-i24sjl.proxy.usesapi.com"
        );
    }

    #[test]
    fn test_resolve_rejects_bad_identifiers() {
        assert_eq!(Tenant::resolve("", "p"), Err(TenantError::Empty));
        assert_eq!(
            Tenant::resolve("api_host-salt", "p"),
            Err(TenantError::InvalidCharacter('_'))
        );
        assert_eq!(
            Tenant::resolve("salt", "p"),
            Err(TenantError::MissingHost("salt".to_string()))
        );
        assert_eq!(
            Tenant::resolve("-api-salt", "p"),
            Err(TenantError::MalformedHost(".api".to_string()))
        );
    }

    #[test]
    fn test_scope_and_rewrite() {
        let tenant = Tenant::resolve("api-replicate-com-i24sjl", "proxy.usesapi.com").unwrap();

        assert!(tenant.is_in_scope("api.replicate.com"));
        assert!(!tenant.is_in_scope("api.openai.com"));
        assert_eq!(
            tenant.rewrite_host("api.replicate.com"),
            "api-replicate-com-i24sjl.proxy.usesapi.com"
        );
        assert_eq!(tenant.rewrite_host("example.org"), "example.org");
    }

    #[test]
    fn test_scope_requires_exact_host() {
        let tenant = Tenant::resolve("api-replicate-com-i24sjl", "proxy.usesapi.com").unwrap();

        assert!(tenant.is_in_scope("API.Replicate.com"));
        assert!(!tenant.is_in_scope("api.replicate.com.evil.net"));
        assert!(!tenant.is_in_scope("evilapi.replicate.com"));
        assert!(!tenant.is_in_scope("x.api.replicate.com"));
        assert_eq!(
            tenant.rewrite_host("api.replicate.com.evil.net"),
            "api.replicate.com.evil.net"
        );
    }

    proptest! {
        #[test]
        fn prop_decode_escaped_form(
            a in "[a-z0-9]{1,8}",
            b in "[a-z0-9]{1,8}",
            c in "[a-z0-9]{1,8}",
            salt in "[a-z0-9]{1,8}",
            suffix in "[a-z]{1,6}",
        ) {
            let tenant_id = format!("{a}-{b}--{c}-{salt}.{suffix}");
            prop_assert_eq!(decode_host(&tenant_id), format!("{a}.{b}-{c}"));
        }

        #[test]
        fn prop_decode_never_panics(input in "\\PC{0,40}") {
            let _ = decode_host(&input);
        }
    }
}
