//! Token lifecycle management.
//!
//! The [`TokenManager`] owns the current token for one tenant. It loads the
//! persisted token at startup, fetches new tokens from the issuing backend,
//! writes them through to the [`TokenStore`] and, unless explicit
//! authentication is required, refreshes them in the background shortly
//! before they expire.
//!
//! # Refresh scheduling
//!
//! A single scheduler task per manager waits for the next refresh instant,
//! published on a `watch` channel. A successful fetch publishes
//! `expires_at - threshold`; a failed background refresh publishes nothing,
//! so the next refresh happens when an intercepted request or
//! [`TokenManager::auth_token`] needs a token again. The scheduler only holds
//! a weak reference to the manager and stops when the manager is shut down
//! or dropped.
//!
//! # Single-flight
//!
//! Every fetch-and-install runs under one async mutex. A caller that only
//! needs *a* valid token re-checks the cache after acquiring it, so concurrent
//! callers share the token fetched by whoever got there first.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use sapi_common::{AuthProof, Config, Tenant, Token, TokenRecord, TokenState};

use crate::error::{Result, SapiError};
use crate::store::TokenStore;

/// Body of a token request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'a AuthProof>,
    token_owner: &'a str,
    metadata: TokenMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct TokenMetadata<'a> {
    platform: &'a str,
}

/// Owns the current token of a tenant and keeps it fresh.
pub struct TokenManager {
    config: Arc<Config>,
    tenant: Tenant,
    store: TokenStore,
    storage_key: String,
    http: reqwest::Client,
    token_url: Url,
    current: RwLock<Option<Token>>,
    state: watch::Sender<TokenState>,
    /// Wall-clock instant of the next background refresh, if one is armed.
    next_refresh: watch::Sender<Option<DateTime<Utc>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl TokenManager {
    /// Creates a manager for the tenant named in `config`.
    ///
    /// `http` must be a plain client: token requests must not pass through
    /// the credential middleware.
    ///
    /// # Errors
    ///
    /// Returns [`SapiError::Configuration`] if the tenant identifier or the
    /// token endpoint URL is invalid.
    pub fn new(config: Config, store: TokenStore, http: reqwest::Client) -> Result<Arc<Self>> {
        let tenant = Tenant::resolve(&config.tenant_id, &config.proxy_suffix)?;
        let token_url = token_url(&config.api_base_url, tenant.id())?;
        let storage_key = TokenStore::storage_key(tenant.proxy_host());

        let (state, _) = watch::channel(TokenState::Uninitialized);
        let (next_refresh, _) = watch::channel(None);

        Ok(Arc::new(Self {
            config: Arc::new(config),
            tenant,
            store,
            storage_key,
            http,
            token_url,
            current: RwLock::new(None),
            state,
            next_refresh,
            refresh_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            scheduler: Mutex::new(None),
        }))
    }

    /// The configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The resolved tenant.
    #[must_use]
    pub const fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TokenState {
        *self.state.borrow()
    }

    /// Subscribes to lifecycle state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TokenState> {
        self.state.subscribe()
    }

    /// Loads the persisted token and starts background refresh.
    ///
    /// A stored record that cannot be read is logged and treated as absent.
    /// In explicit authentication mode the manager moves to
    /// [`TokenState::NoAuthRequired`] and never refreshes on its own.
    /// Otherwise a valid stored token arms a refresh shortly before it
    /// expires, and a missing or stale one triggers an immediate refresh
    /// whose failure is only logged.
    pub async fn start(self: &Arc<Self>) {
        if self.state() != TokenState::Uninitialized {
            warn!(
                "Token manager for {} already started, ignoring",
                self.tenant.proxy_host()
            );
            return;
        }

        let stored = match self.store.get(&self.storage_key).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Ignoring stored token for {}: {e}", self.tenant.proxy_host());
                None
            }
        };

        if let Some(token) = &stored {
            debug!(
                "Loaded stored token for {} expiring at {}",
                self.tenant.proxy_host(),
                token.expires_at()
            );
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        }

        if self.config.require_auth {
            info!(
                "Explicit authentication required for {}, background refresh disabled",
                self.tenant.proxy_host()
            );
            self.state.send_replace(TokenState::NoAuthRequired);
            return;
        }

        self.spawn_scheduler();

        match stored.filter(|token| self.is_usable(token)) {
            Some(token) => {
                self.state.send_replace(TokenState::Valid);
                self.arm_refresh(&token);
            }
            None => {
                info!(
                    "No valid token for {}, refreshing now",
                    self.tenant.proxy_host()
                );
                self.state.send_replace(TokenState::AwaitingToken);
                self.next_refresh.send_replace(Some(Utc::now()));
            }
        }
    }

    /// Whether a cached token exists and is not within the expiration
    /// threshold.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid_token().is_some()
    }

    /// The cached token, valid or not.
    #[must_use]
    pub fn current_token(&self) -> Option<Token> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requests a new token from the issuing backend without storing it.
    ///
    /// # Errors
    ///
    /// - [`SapiError::Auth`] if the backend answers with a status >= 400
    /// - [`SapiError::Timeout`] if the fetch exceeds the configured timeout
    /// - [`SapiError::Network`] on transport failures
    /// - [`SapiError::InvalidResponse`] if the body is not a token record
    pub async fn fetch_token(&self, proof: Option<&AuthProof>) -> Result<Token> {
        let body = TokenRequest {
            auth: proof,
            token_owner: &self.config.token_owner,
            metadata: TokenMetadata {
                platform: &self.config.platform,
            },
        };

        debug!(
            "Requesting token for tenant {} (proof: {})",
            self.tenant.id(),
            proof.map_or("none", |p| p.kind.as_str())
        );

        let response = self
            .http
            .post(self.token_url.clone())
            .json(&body)
            .timeout(self.config.fetch_timeout())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let message = response.text().await.unwrap_or_else(|e| {
                warn!("Failed to read token error body: {e}");
                String::new()
            });
            error!(
                "Token request for {} failed with status {}",
                self.tenant.id(),
                status.as_u16()
            );
            return Err(SapiError::Auth { status, message });
        }

        let text = response.text().await.map_err(map_transport_error)?;
        let record: TokenRecord = serde_json::from_str(&text).map_err(|e| {
            SapiError::InvalidResponse(format!("token endpoint returned an unexpected body: {e}"))
        })?;

        Ok(record.into())
    }

    /// Fetches, persists and installs a new token, then arms the next refresh.
    ///
    /// On failure the previous token is kept and no refresh is rescheduled.
    ///
    /// # Errors
    ///
    /// Returns the error from [`TokenManager::fetch_token`].
    pub async fn refresh_token(&self) -> Result<Token> {
        self.refresh(false).await
    }

    /// Submits a one-time proof and installs the resulting token.
    ///
    /// When background refresh is active the next refresh is armed from the
    /// new token's expiry, exactly as after a regular refresh.
    ///
    /// # Errors
    ///
    /// Returns the error from [`TokenManager::fetch_token`]; the previous
    /// token is left untouched.
    pub async fn auth_token(&self, proof: &AuthProof) -> Result<()> {
        let _flight = self.refresh_lock.lock().await;

        let token = self.fetch_token(Some(proof)).await?;
        info!("Authenticated {} with a {} proof", self.tenant.id(), proof.kind);
        self.install(token).await;

        Ok(())
    }

    /// Returns a valid token, refreshing first if necessary.
    ///
    /// Concurrent callers wait for a single in-flight fetch and share its
    /// result.
    ///
    /// # Errors
    ///
    /// Returns the refresh error when no valid token can be obtained.
    pub async fn ensure_valid_token(&self) -> Result<Token> {
        if let Some(token) = self.valid_token() {
            return Ok(token);
        }
        self.refresh(true).await
    }

    /// Stops the background refresh. Pending refreshes never fire.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        debug!("Token manager for {} shut down", self.tenant.proxy_host());
    }

    fn scheduling_active(&self) -> bool {
        !self.config.require_auth
    }

    fn is_usable(&self, token: &Token) -> bool {
        token.is_valid_at(Utc::now(), self.config.expiration_threshold())
    }

    fn valid_token(&self) -> Option<Token> {
        self.current_token().filter(|token| self.is_usable(token))
    }

    fn arm_refresh(&self, token: &Token) {
        let threshold = self.config.expiration_threshold();
        debug!(
            "Next refresh for {} in {:?}",
            self.tenant.proxy_host(),
            token.refresh_delay(Utc::now(), threshold)
        );
        self.next_refresh.send_replace(Some(token.refresh_at(threshold)));
    }

    async fn refresh(&self, reuse_valid: bool) -> Result<Token> {
        let _flight = self.refresh_lock.lock().await;

        if reuse_valid && let Some(token) = self.valid_token() {
            debug!("Reusing token fetched by a concurrent refresh");
            return Ok(token);
        }

        if self.scheduling_active() {
            self.state.send_replace(TokenState::Refreshing);
        }

        match self.fetch_token(None).await {
            Ok(token) => {
                self.install(token.clone()).await;
                Ok(token)
            }
            Err(e) => {
                if self.scheduling_active() {
                    let fallback = if self.is_valid() {
                        TokenState::Valid
                    } else {
                        TokenState::AwaitingToken
                    };
                    self.state.send_replace(fallback);
                    self.next_refresh.send_replace(None);
                }
                Err(e)
            }
        }
    }

    /// Persists `token` and makes it current. Caller holds `refresh_lock`.
    async fn install(&self, token: Token) {
        if let Err(e) = self.store.set(&self.storage_key, &token).await {
            warn!(
                "Failed to persist token for {}: {e}",
                self.tenant.proxy_host()
            );
        }

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());

        if self.scheduling_active() {
            let state = if self.is_usable(&token) {
                TokenState::Valid
            } else {
                TokenState::AwaitingToken
            };
            self.state.send_replace(state);
            self.arm_refresh(&token);
        }
    }

    fn spawn_scheduler(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        let next = self.next_refresh.subscribe();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(run_scheduler(manager, next, cancel));

        if let Some(previous) = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
    }
}

async fn run_scheduler(
    manager: Weak<TokenManager>,
    mut next: watch::Receiver<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
) {
    loop {
        let due = *next.borrow_and_update();
        let wait = async move {
            match due {
                Some(at) => {
                    tokio::time::sleep((at - Utc::now()).to_std().unwrap_or(Duration::ZERO)).await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            changed = next.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            () = wait => {}
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };
        if let Err(e) = manager.refresh(true).await {
            warn!(
                "Background token refresh for {} failed: {e}",
                manager.tenant.proxy_host()
            );
        }
    }

    debug!("Token refresh scheduler stopped");
}

impl Drop for TokenManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("tenant", &self.tenant)
            .field("token_url", &self.token_url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn token_url(api_base_url: &str, tenant_id: &str) -> Result<Url> {
    let mut url = Url::parse(api_base_url)
        .and_then(|base| base.join("v1/token"))
        .map_err(|e| {
            SapiError::Configuration(format!("Invalid API base URL '{api_base_url}': {e}"))
        })?;
    url.query_pairs_mut().append_pair("code", tenant_id);
    Ok(url)
}

fn map_transport_error(e: reqwest::Error) -> SapiError {
    if e.is_timeout() {
        SapiError::Timeout
    } else {
        SapiError::Network(e)
    }
}
