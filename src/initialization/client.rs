//! HTTP client initialization.
//!
//! This module provides functions to initialize the HTTP clients probes
//! go out through.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use reqwest::ClientBuilder;

/// Initializes the plain HTTP client.
///
/// Creates a `reqwest::Client` configured with:
/// - User-Agent header from the configuration
/// - A per-request timeout slightly above the probe timeout, as a backstop
/// - Redirect following enabled (up to 10 hops), which the response-url
///   detection rule relies on to observe the final URL
///
/// # Arguments
///
/// * `config` - Command-line configuration carrying user-agent and timeout settings
///
/// # Errors
///
/// Returns a `reqwest::Error` if client creation fails.
pub async fn init_client(config: &Config) -> Result<Arc<reqwest::Client>, reqwest::Error> {
    let client = ClientBuilder::new()
        .timeout(Duration::from_secs(config.probe_timeout_seconds + 2))
        .user_agent(config.user_agent.clone())
        .build()?;
    Ok(Arc::new(client))
}

/// Initializes the cookie-jar HTTP client.
///
/// Identical to [`init_client`] but with a cookie store, for sites whose
/// error pages only render properly inside a session. Probes using the
/// `message` detection rule go through this client.
///
/// # Arguments
///
/// * `config` - Command-line configuration carrying user-agent and timeout settings
///
/// # Errors
///
/// Returns a `reqwest::Error` if client creation fails.
pub async fn init_cookie_client(config: &Config) -> Result<Arc<reqwest::Client>, reqwest::Error> {
    let client = ClientBuilder::new()
        .cookie_store(true)
        .timeout(Duration::from_secs(config.probe_timeout_seconds + 2))
        .user_agent(config.user_agent.clone())
        .build()?;
    Ok(Arc::new(client))
}
