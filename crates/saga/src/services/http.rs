//! Shared plumbing for the HTTP service adapters.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::Deserialize;

use crate::error::ServiceError;

/// Base URL plus a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEndpoint {
    /// Creates an endpoint whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Creates an endpoint sharing an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Body shape of error responses (`{"error": "..."}`).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub available: Option<u32>,
}

impl ErrorBody {
    pub(crate) async fn read(response: Response) -> Self {
        response.json().await.unwrap_or_default()
    }

    pub(crate) fn message(&self, status: StatusCode) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string())
    }
}

/// Connection refused, timeouts and other send failures are transient.
pub(crate) fn transport_error(err: reqwest::Error) -> ServiceError {
    ServiceError::Transient(err.to_string())
}

/// Maps a response status the caller did not handle explicitly.
pub(crate) async fn unexpected_status(response: Response) -> ServiceError {
    let status = response.status();
    let message = ErrorBody::read(response).await.message(status);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        ServiceError::Transient(format!("{status}: {message}"))
    } else {
        ServiceError::Validation(format!("{status}: {message}"))
    }
}

/// Decodes a success body; a malformed body from a healthy service is not retried.
pub(crate) async fn decode<T: serde::de::DeserializeOwned>(
    response: Response,
) -> Result<T, ServiceError> {
    response
        .json()
        .await
        .map_err(|e| ServiceError::Validation(format!("unexpected response body: {e}")))
}
