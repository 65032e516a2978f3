//! Credential-injecting request middleware.
//!
//! [`CredentialMiddleware`] is a `reqwest-middleware` stage. Requests whose
//! host is the tenant's protected API host are authenticated and sent to
//! the tenant proxy instead:
//!
//! ```text
//! GET https://api.replicate.com/v1/predictions?id=7
//!   -> GET https://api-replicate-com-i24sjl.proxy.usesapi.com/v1/predictions?id=7
//!      Authorization: Bearer <token>
//! ```
//!
//! Everything else passes through untouched. Interception fails open: if no
//! token can be obtained or the request cannot be rewritten, the original
//! request is sent as-is and the failure is only logged.

use std::sync::Arc;

use async_trait::async_trait;
use http::Extensions;
use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Request, Response, Url};
use reqwest_middleware::{Middleware, Next};

use sapi_common::Tenant;

use crate::error::{Result, SapiError};
use crate::manager::TokenManager;

/// Authenticates and reroutes requests bound for the protected API.
#[derive(Clone)]
pub struct CredentialMiddleware {
    manager: Arc<TokenManager>,
}

impl CredentialMiddleware {
    /// Creates a middleware backed by `manager`.
    #[must_use]
    pub const fn new(manager: Arc<TokenManager>) -> Self {
        Self { manager }
    }

    /// Whether requests to `url` are authenticated and proxied.
    #[must_use]
    pub fn is_in_scope(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.manager.tenant().is_in_scope(host))
    }

    /// Builds the proxied, authenticated copy of `request`.
    async fn authorize(&self, request: &Request) -> Result<Request> {
        let token = self.manager.ensure_valid_token().await?;

        let mut authorized = request.try_clone().ok_or_else(|| {
            SapiError::Interception("request body cannot be cloned".to_string())
        })?;

        rewrite_url(self.manager.tenant(), authorized.url_mut())?;

        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|e| SapiError::Interception(format!("token is not a valid header: {e}")))?;
        value.set_sensitive(true);
        authorized.headers_mut().insert(AUTHORIZATION, value);

        Ok(authorized)
    }
}

#[async_trait]
impl Middleware for CredentialMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        if !self.is_in_scope(req.url()) {
            return next.run(req, extensions).await;
        }

        match self.authorize(&req).await {
            Ok(authorized) => {
                debug!(
                    "Proxying {} {} via {}",
                    req.method(),
                    req.url().path(),
                    self.manager.tenant().proxy_host()
                );
                next.run(authorized, extensions).await
            }
            Err(e) => {
                warn!(
                    "Credential injection failed for {}, sending original request: {e}",
                    req.url()
                );
                next.run(req, extensions).await
            }
        }
    }
}

impl std::fmt::Debug for CredentialMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialMiddleware")
            .field("api_host", &self.manager.tenant().api_host())
            .field("proxy_host", &self.manager.tenant().proxy_host())
            .finish()
    }
}

/// Points `url` at the tenant proxy, keeping scheme, port, path and query.
fn rewrite_url(tenant: &Tenant, url: &mut Url) -> Result<()> {
    let host = url
        .host_str()
        .ok_or_else(|| SapiError::Interception(format!("URL has no host: {url}")))?;
    let proxied = tenant.rewrite_host(host);

    url.set_host(Some(&proxied))
        .map_err(|e| SapiError::Interception(format!("cannot route to '{proxied}': {e}")))
}
