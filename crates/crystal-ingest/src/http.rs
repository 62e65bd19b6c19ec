//! Shared HTTP client

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use reqwest::Client;
use std::time::Duration;

/// Client carrying the configured user agent and request timeout.
///
/// `reqwest::Client` is reference counted, so clones share one connection pool.
pub fn build_client(config: &IndexConfig) -> Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| IndexError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// GET `url` and return the response if the status is a success.
pub async fn get_ok(client: &Client, url: &str) -> Result<reqwest::Response> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| IndexError::retrieval(url, e))?;

    if !response.status().is_success() {
        return Err(IndexError::retrieval(url, format!("HTTP {}", response.status())));
    }

    Ok(response)
}
