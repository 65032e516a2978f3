//! The SDK entry point.

use std::sync::Arc;

use log::info;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tokio::sync::watch;

use sapi_common::{AuthProof, Config, Tenant, TokenState};

use crate::error::Result;
use crate::manager::TokenManager;
use crate::middleware::CredentialMiddleware;
use crate::store::{FileStore, KeyValueStore, TokenStore};

/// Builder for a [`Sapi`] instance with a custom store or HTTP client.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use sapi_client::{MemoryStore, Sapi};
/// use sapi_common::Config;
///
/// # async fn example() -> sapi_client::Result<()> {
/// let sapi = Sapi::builder(Config::new("api-replicate-com-i24sjl"))
///     .store(Arc::new(MemoryStore::new()))
///     .init()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct SapiBuilder {
    config: Config,
    store: Option<Arc<dyn KeyValueStore>>,
    http: Option<reqwest::Client>,
}

impl SapiBuilder {
    /// Persists tokens in `store` instead of the default [`FileStore`].
    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `client` for token requests and as the base of [`Sapi::client`].
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Validates the configuration and starts the token manager.
    ///
    /// Startup never waits for the network: a missing token is fetched in the
    /// background and a failure there is only logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the default store
    /// cannot be opened, or the HTTP client cannot be built.
    pub async fn init(self) -> Result<Sapi> {
        let backend = match self.store {
            Some(store) => store,
            None => Arc::new(FileStore::open_default()?),
        };
        let http = match self.http {
            Some(client) => client,
            None => reqwest::Client::builder().build()?,
        };

        let manager = TokenManager::new(self.config, TokenStore::new(backend), http.clone())?;
        manager.start().await;

        info!(
            "Sapi initialised for {} (proxy {}, state {})",
            manager.tenant().api_host(),
            manager.tenant().proxy_host(),
            manager.state()
        );

        Ok(Sapi { manager, http })
    }
}

/// Handle to the credential SDK.
///
/// Cloning is cheap and every clone shares the same token manager. Build the
/// application's HTTP client through [`Sapi::client`] or
/// [`Sapi::client_builder`] so that calls to the protected API are
/// authenticated and proxied.
#[derive(Clone)]
pub struct Sapi {
    manager: Arc<TokenManager>,
    http: reqwest::Client,
}

impl Sapi {
    /// Starts configuring an instance.
    #[must_use]
    pub fn builder(config: Config) -> SapiBuilder {
        SapiBuilder {
            config,
            store: None,
            http: None,
        }
    }

    /// Initialises the SDK with the default file store and HTTP client.
    ///
    /// # Errors
    ///
    /// See [`SapiBuilder::init`].
    pub async fn init(config: Config) -> Result<Self> {
        Self::builder(config).init().await
    }

    /// An HTTP client with the credential middleware installed.
    #[must_use]
    pub fn client(&self) -> ClientWithMiddleware {
        self.client_builder(self.http.clone()).build()
    }

    /// A middleware client builder over `client` with the credential stage
    /// already attached. Further middleware can be added before `build()`.
    #[must_use]
    pub fn client_builder(&self, client: reqwest::Client) -> ClientBuilder {
        ClientBuilder::new(client).with(self.middleware())
    }

    /// The credential middleware on its own.
    #[must_use]
    pub fn middleware(&self) -> CredentialMiddleware {
        CredentialMiddleware::new(Arc::clone(&self.manager))
    }

    /// Submits a one-time proof (e.g. a solved captcha) and stores the token
    /// it yields.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SapiError::Auth`] if the proof is rejected, or a
    /// transport error.
    pub async fn auth_token(&self, proof: AuthProof) -> Result<()> {
        self.manager.auth_token(&proof).await
    }

    /// Whether the cached token is present and not about to expire.
    #[must_use]
    pub fn is_token_valid(&self) -> bool {
        self.manager.is_valid()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TokenState {
        self.manager.state()
    }

    /// Subscribes to lifecycle state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TokenState> {
        self.manager.subscribe()
    }

    /// The resolved tenant.
    #[must_use]
    pub fn tenant(&self) -> &Tenant {
        self.manager.tenant()
    }

    /// The underlying token manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<TokenManager> {
        &self.manager
    }

    /// Stops background refresh for every clone of this handle.
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}

impl std::fmt::Debug for Sapi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sapi")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::error::SapiError;
    use crate::store::MemoryStore;

    const TENANT: &str = "127-0-0-1-x1y2";
    const PROXY_HOST: &str = "127-0-0-1-x1y2.proxy.test";

    fn config(server: &MockServer) -> Config {
        Config::new(TENANT)
            .with_api_base_url(server.uri())
            .with_proxy_suffix("proxy.test")
    }

    fn http(server: &MockServer) -> reqwest::Client {
        reqwest::Client::builder()
            .resolve(PROXY_HOST, *server.address())
            .build()
            .unwrap()
    }

    fn token_response(value: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": value,
            "expiresAt": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
        }))
    }

    #[tokio::test]
    async fn test_init_rejects_malformed_tenant() {
        let err = Sapi::builder(Config::new("no_salt"))
            .store(Arc::new(MemoryStore::new()))
            .init()
            .await
            .unwrap_err();
        assert!(matches!(err, SapiError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_background_flow_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .respond_with(token_response("tok-bg"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/predictions/abc"))
            .and(header("authorization", "Bearer tok-bg"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"status\":\"ok\"}"))
            .expect(1)
            .mount(&server)
            .await;

        let sapi = Sapi::builder(config(&server))
            .store(Arc::new(MemoryStore::new()))
            .http_client(http(&server))
            .init()
            .await
            .unwrap();

        let mut states = sapi.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == TokenState::Valid),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(sapi.is_token_valid());

        let port = server.address().port();
        let response = sapi
            .client()
            .get(format!("http://127.0.0.1:{port}/v1/predictions/abc"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        sapi.shutdown();
    }

    #[tokio::test]
    async fn test_explicit_auth_persists_across_restarts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .and(body_partial_json(serde_json::json!({
                "auth": { "type": "captcha", "value": "solved" },
                "tokenOwner": "user-9",
            })))
            .respond_with(token_response("tok-proven"))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store_dir = temp.path().join("sapi");
        let config = config(&server)
            .with_require_auth(true)
            .with_token_owner("user-9");

        let first = Sapi::builder(config.clone())
            .store(Arc::new(FileStore::new(&store_dir).unwrap()))
            .http_client(http(&server))
            .init()
            .await
            .unwrap();

        assert_eq!(first.state(), TokenState::NoAuthRequired);
        assert!(!first.is_token_valid());

        first.auth_token(AuthProof::captcha("solved")).await.unwrap();
        assert!(first.is_token_valid());
        first.shutdown();

        // A fresh instance over the same store starts with the saved token.
        let second = Sapi::builder(config)
            .store(Arc::new(FileStore::new(&store_dir).unwrap()))
            .http_client(http(&server))
            .init()
            .await
            .unwrap();

        assert!(second.is_token_valid());
        assert_eq!(
            second.manager().current_token().unwrap().expose(),
            "tok-proven"
        );
    }

    #[tokio::test]
    async fn test_client_builder_keeps_credential_stage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .respond_with(token_response("tok-custom"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("authorization", "Bearer tok-custom"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sapi = Sapi::builder(config(&server).with_require_auth(true))
            .store(Arc::new(MemoryStore::new()))
            .http_client(http(&server))
            .init()
            .await
            .unwrap();

        let client = sapi.client_builder(http(&server)).build();
        let port = server.address().port();
        let response = client
            .get(format!("http://127.0.0.1:{port}/ping"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 204);
        assert_eq!(sapi.tenant().api_host(), "127.0.0.1");
    }
}
