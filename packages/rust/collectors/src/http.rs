//! Shared HTTP client construction and request helpers.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

use digest_shared::{DigestError, HttpConfig, Result};

/// Build the client every collector shares.
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| DigestError::Network(format!("failed to build HTTP client: {e}")))
}

async fn send(client: &Client, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| DigestError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DigestError::Network(format!("{url}: HTTP {status}")));
    }
    Ok(response)
}

/// GET `url` and decode the JSON body.
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T> {
    send(client, url, query)
        .await?
        .json::<T>()
        .await
        .map_err(|e| DigestError::parse(format!("{url}: {e}")))
}

/// GET `url` and return the raw body.
pub async fn get_bytes(client: &Client, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
    let body = send(client, url, query)
        .await?
        .bytes()
        .await
        .map_err(|e| DigestError::Network(format!("{url}: {e}")))?;
    Ok(body.to_vec())
}
