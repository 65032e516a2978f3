//! # sapi-common
//!
//! Plain data types shared by the Sapi credential SDK:
//! - [`Config`], built once when the SDK starts
//! - [`Tenant`] and [`decode_host`], which map a tenant identifier to the
//!   protected API host and the tenant proxy host
//! - [`Token`], [`TokenRecord`] and [`AuthProof`]
//! - [`TokenState`], the lifecycle of the token manager
//!
//! ## Example
//!
//! ```
//! use sapi_common::{Config, Tenant};
//!
//! let config = Config::new("api-replicate-com-i24sjl");
//! let tenant = Tenant::resolve(&config.tenant_id, &config.proxy_suffix)?;
//!
//! assert_eq!(tenant.api_host(), "api.replicate.com");
//! assert_eq!(tenant.proxy_host(), "api-replicate-com-i24sjl.proxy.usesapi.com");
//! # Ok::<(), sapi_common::TenantError>(())
//! ```

/// SDK configuration and defaults.
pub mod config;
/// Tenant identifier decoding and validation.
pub mod tenant;
/// Tokens, proofs and manager state.
pub mod token;

pub use config::{Config, DEFAULT_API_BASE_URL, DEFAULT_PROXY_SUFFIX};
pub use tenant::{Tenant, TenantError, decode_host};
pub use token::{AuthProof, Token, TokenRecord, TokenState};
