use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::config::ApiConfig;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication failed ({status}): {body}")]
    Authentication { status: StatusCode, body: String },

    #[error("Unexpected response format: {0}")]
    MalformedResponse(String),

    #[error("HTTP error {status} for {url}")]
    Http { status: StatusCode, url: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid JSON in response: {0}")]
    Parse(String),
}

impl ApiError {
    /// Short label for per-project console diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            ApiError::Authentication { .. } => "Authentication error",
            ApiError::MalformedResponse(_) => "Unexpected error",
            ApiError::Http { .. } => "HTTP error",
            ApiError::Network(_) => "Network error",
            ApiError::Parse(_) => "Malformed JSON",
        }
    }
}

/// Blocking client for the test-management REST API.
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        if config.insecure_tls {
            log::warn!("TLS certificate verification is disabled for {}", config.endpoint);
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()?;

        Ok(Self {
            http,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Exchange a long-lived API token for a short-lived bearer token.
    pub fn exchange_token(&self, credential: &str) -> Result<String, ApiError> {
        let url = self.url("/api/uaa/oauth/token");
        log::debug!("Requesting access token from {}", url);

        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .form(&[("grant_type", "apitoken"), ("scope", "openid"), ("token", credential)])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ApiError::Authentication { status, body });
        }

        let body: Value = parse_body(response)?;
        body.get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::MalformedResponse("token response has no access_token".to_string()))
    }

    /// GET a JSON document. `authorization` is the full header value, scheme included.
    pub fn get_json(&self, path: &str, query: &[(&str, String)], authorization: &str) -> Result<Value, ApiError> {
        let url = self.url(path);
        log::debug!("GET {} {:?}", url, query);

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, authorization)
            .query(query)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http { status, url });
        }

        parse_body(response)
    }
}

fn parse_body(response: Response) -> Result<Value, ApiError> {
    let text = response.text()?;
    serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))
}
