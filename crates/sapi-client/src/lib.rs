//! # sapi-client
//!
//! Client-side credential SDK for Sapi tenant proxies.
//!
//! Applications call a third-party API as usual. Requests bound for the
//! protected API host are transparently rerouted to the tenant's proxy with a
//! short-lived bearer token attached. This crate provides:
//! - [`TokenManager`], which loads, fetches, persists and refreshes tokens
//! - [`CredentialMiddleware`], a `reqwest-middleware` stage that rewrites and
//!   authenticates in-scope requests and fails open
//! - [`KeyValueStore`] with [`FileStore`] and [`MemoryStore`] backends
//! - [`Sapi`], the entry point tying them together
//!
//! ## Example
//!
//! ```no_run
//! use sapi_client::Sapi;
//! use sapi_common::{AuthProof, Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sapi = Sapi::init(Config::new("api-replicate-com-i24sjl")).await?;
//!
//! // Sent to api-replicate-com-i24sjl.proxy.usesapi.com with a bearer token.
//! let response = sapi
//!     .client()
//!     .get("https://api.replicate.com/v1/predictions")
//!     .send()
//!     .await?;
//! println!("{}", response.status());
//!
//! // With `require_auth`, tokens are only issued against a proof.
//! sapi.auth_token(AuthProof::captcha("solved-captcha")).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod manager;
pub mod middleware;
pub mod sdk;
pub mod store;

pub use error::{Result, SapiError};
pub use manager::TokenManager;
pub use middleware::CredentialMiddleware;
pub use sdk::{Sapi, SapiBuilder};
pub use store::{FileStore, KeyValueStore, MemoryStore, TokenStore};

pub use sapi_common::{AuthProof, Config, Tenant, Token, TokenState};
