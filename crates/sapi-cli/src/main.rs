//! Sapi CLI
//!
//! Command-line front end for the credential SDK: decode tenant identifiers,
//! inspect the token lifecycle, submit auth proofs and issue requests through
//! the intercepted client.

mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sapi_client::Sapi;
use sapi_common::{AuthProof, DEFAULT_PROXY_SUFFIX, Tenant, TokenState};

use crate::config::CliConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tenant identifier (overrides `sdk.tenant_id` from the config file)
    #[arg(long, global = true)]
    tenant_id: Option<String>,

    /// Path to the configuration file (default: ~/.config/sapi/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the API and proxy hosts encoded in a tenant identifier
    Decode {
        /// The tenant identifier to decode
        #[arg(value_name = "TENANT_ID")]
        id: String,

        /// Proxy domain suffix
        #[arg(long, default_value = DEFAULT_PROXY_SUFFIX)]
        proxy_suffix: String,
    },

    /// Initialise the SDK and report the token state
    Status {
        /// Seconds to wait for the initial refresh
        #[arg(long, default_value_t = 5)]
        wait: u64,
    },

    /// Obtain a token by submitting a solved captcha
    Auth {
        /// The captcha solution
        #[arg(long)]
        captcha: String,
    },

    /// Send a GET request through the intercepted client
    Get {
        /// The URL to fetch
        url: String,
    },
}

/// Initializes structured logging with tracing.
///
/// Supports two output formats via `SAPI_LOG_FORMAT` environment variable:
/// - `json`: Machine-readable JSON logs
/// - `pretty`: Human-readable formatted logs (default)
///
/// Log level is controlled via `RUST_LOG`. Logs go to stderr so command
/// output stays clean.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let format = std::env::var("SAPI_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string())
        .to_lowercase();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sapi=info,sapi_client=info"));

    match format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .init();
        }
    }
}

async fn init_sdk(args: &Args) -> Result<Sapi> {
    let config = CliConfig::load(args.config.as_deref(), args.tenant_id.as_deref())?;
    let store = config.store.open()?;

    Sapi::builder(config.sdk)
        .store(store)
        .init()
        .await
        .context("Failed to initialise the SDK")
}

fn decode(id: &str, proxy_suffix: &str) -> Result<()> {
    let tenant = Tenant::resolve(id, proxy_suffix)
        .with_context(|| format!("Invalid tenant identifier '{id}'"))?;

    println!("api host:   {}", tenant.api_host());
    println!("proxy host: {}", tenant.proxy_host());
    Ok(())
}

async fn status(sapi: &Sapi, wait: u64) {
    let mut states = sapi.subscribe();
    let settled = tokio::time::timeout(
        Duration::from_secs(wait),
        states.wait_for(|s| !matches!(s, TokenState::AwaitingToken | TokenState::Refreshing)),
    )
    .await
    .is_ok();
    if !settled {
        warn!("No token after {wait}s");
    }

    println!("tenant:     {}", sapi.tenant().id());
    println!("api host:   {}", sapi.tenant().api_host());
    println!("proxy host: {}", sapi.tenant().proxy_host());
    println!("state:      {}", sapi.state());
    println!("valid:      {}", sapi.is_token_valid());
    if let Some(token) = sapi.manager().current_token() {
        println!("expires at: {}", token.expires_at().to_rfc3339());
    }
}

async fn auth(sapi: &Sapi, captcha: String) -> Result<()> {
    sapi.auth_token(AuthProof::captcha(captcha))
        .await
        .context("Authentication failed")?;

    if let Some(token) = sapi.manager().current_token() {
        println!("token valid until {}", token.expires_at().to_rfc3339());
    }
    Ok(())
}

async fn get(sapi: &Sapi, url: &str) -> Result<()> {
    let response = sapi
        .client()
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request to {url} failed"))?;

    let status = response.status();
    let body = response.text().await.context("Failed to read body")?;

    println!("{status}");
    println!("{body}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    if let Command::Decode { id, proxy_suffix } = &args.command {
        return decode(id, proxy_suffix);
    }

    let sapi = init_sdk(&args).await?;
    info!("Using tenant proxy {}", sapi.tenant().proxy_host());

    let result = match args.command {
        Command::Status { wait } => {
            status(&sapi, wait).await;
            Ok(())
        }
        Command::Auth { captcha } => auth(&sapi, captcha).await,
        Command::Get { ref url } => get(&sapi, url).await,
        Command::Decode { .. } => Ok(()),
    };

    sapi.shutdown();
    result
}
