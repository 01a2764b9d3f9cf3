//! reqwest-backed transport

use super::{FetchResponse, Transport, TransportError};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, ACCEPT};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = concat!("change-discovery/", env!("CARGO_PKG_VERSION"));

/// Blocking HTTP client for feed documents and manifests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a client with the given request timeout and user agent.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/ld+json, application/json;q=0.9"),
        );
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// 30 second timeout, default user agent.
    pub fn with_defaults() -> Result<Self, TransportError> {
        Self::new(Duration::from_secs(30), DEFAULT_USER_AGENT)
    }
}

impl Transport for HttpTransport {
    fn fetch_json(&self, url: &str) -> Result<FetchResponse, TransportError> {
        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout { url: url.to_string() }
            } else {
                TransportError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = resp.status().as_u16();
        let text = resp.text().map_err(|e| TransportError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let body = match serde_json::from_str::<Value>(&text) {
            Ok(body) => body,
            Err(e) => {
                debug!(url, status, error = %e, "response body is not JSON");
                Value::Null
            }
        };

        Ok(FetchResponse { status, body })
    }
}
