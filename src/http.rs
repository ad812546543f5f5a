//! Shared HTTP plumbing for the embedding and generation providers.
//!
//! Every outbound call goes through [`send_json`], which classifies
//! failures into [`ErrorKind`]s:
//!
//! - HTTP 429, 5xx, or a body carrying `RESOURCE_EXHAUSTED` → transient
//! - other non-success statuses → fatal
//! - connect or timeout failures → transient
//! - an unparseable success body → fatal

use std::time::Duration;

use anyhow::{bail, Result};
use docqa_core::{ErrorKind, ProviderError};
use reqwest::{Client, RequestBuilder, StatusCode};

/// Status marker Google APIs use for quota exhaustion.
const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";

/// Longest body excerpt carried in an error message.
const MAX_ERROR_BODY: usize = 500;

pub fn build_client(timeout_secs: u64) -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Read the API key for `provider`, from `env_override` when given.
pub fn resolve_api_key(provider: &str, env_override: Option<&str>) -> Result<String> {
    let var = env_override.unwrap_or(match provider {
        "openai" => "OPENAI_API_KEY",
        _ => "GOOGLE_API_KEY",
    });
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!("{} environment variable not set", var),
    }
}

pub fn classify_status(status: StatusCode, body: &str) -> ErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || body.contains(RESOURCE_EXHAUSTED)
    {
        ErrorKind::Transient
    } else {
        ErrorKind::Fatal
    }
}

fn classify_transport(err: &reqwest::Error) -> ErrorKind {
    if err.is_builder() {
        ErrorKind::Fatal
    } else {
        ErrorKind::Transient
    }
}

/// Send `request` and decode a JSON body.
///
/// `service` names the remote in error messages (e.g. `"Gemini"`).
pub async fn send_json(
    request: RequestBuilder,
    service: &str,
) -> Result<serde_json::Value, ProviderError> {
    let response = request.send().await.map_err(|e| ProviderError {
        kind: classify_transport(&e),
        message: format!("{} request failed: {}", service, e),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
        return Err(ProviderError {
            kind: classify_status(status, &body),
            message: format!("{} API error {}: {}", service, status, excerpt),
        });
    }

    response
        .json()
        .await
        .map_err(|e| ProviderError::fatal(format!("{} returned invalid JSON: {}", service, e)))
}
