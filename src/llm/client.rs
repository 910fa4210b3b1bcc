//! LLM HTTP Client
//!
//! This module provides a reusable HTTP client for making requests to LLM APIs,
//! with built-in retry logic, exponential backoff, and error handling.

use crate::error::{QueryAgentError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Default maximum number of retry attempts
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default initial retry delay in milliseconds
const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

/// Default timeout for HTTP requests (in seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// HTTP client for LLM API requests
#[derive(Clone)]
pub struct LLMHttpClient {
    /// Reqwest HTTP client
    client: Client,
    /// Maximum number of retry attempts
    max_retries: u32,
    /// Initial retry delay in milliseconds
    initial_delay_ms: u64,
}

impl LLMHttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Create a new HTTP client with custom timeout
    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
        })
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial retry delay
    pub fn with_retry_delay(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    /// Make a POST request with retry logic
    ///
    /// # Arguments
    /// * `provider` - Provider name used in error messages
    /// * `url` - Request URL
    /// * `headers` - Request headers
    /// * `body` - Request body (serializable)
    ///
    /// # Returns
    /// Response body as string
    pub async fn post_with_retry<T: Serialize + Sync>(
        &self,
        provider: &str,
        url: &str,
        headers: HeaderMap,
        body: &T,
    ) -> Result<String> {
        let mut attempt = 0;
        loop {
            let response = self
                .client
                .post(url)
                .headers(headers.clone())
                .json(body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                debug!(provider, attempt, "LLM request succeeded");
                return Ok(response.text().await?);
            }

            if self.should_retry(status, attempt) {
                let delay = self.calculate_delay(attempt);
                warn!(
                    provider,
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay,
                    "LLM request failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
                continue;
            }

            let response_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());

            return Err(QueryAgentError::LLMApiError {
                provider: provider.to_string(),
                message: response_text,
                status: status.as_u16(),
            });
        }
    }

    /// Check if a request should be retried
    fn should_retry(&self, status: StatusCode, attempt: u32) -> bool {
        if attempt >= self.max_retries {
            return false;
        }

        // Rate limiting, server errors and gateway timeouts
        status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
    }

    /// Calculate retry delay with exponential backoff
    fn calculate_delay(&self, attempt: u32) -> u64 {
        // Exponential backoff: delay * 2^attempt
        self.initial_delay_ms * 2_u64.pow(attempt)
    }

    /// Build standard JSON headers with a bearer token
    pub fn build_headers(api_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::add_header(headers, AUTHORIZATION.as_str(), &format!("Bearer {}", api_key))
    }

    /// Build JSON headers with a custom credential header (e.g. `x-api-key`)
    pub fn build_headers_with_auth(auth_header: &str, auth_value: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::add_header(headers, auth_header, auth_value)
    }

    /// Add custom header to existing headers
    pub fn add_header(mut headers: HeaderMap, key: &str, value: &str) -> Result<HeaderMap> {
        let key_header = HeaderName::from_str(key)
            .map_err(|_| QueryAgentError::Config(format!("Invalid header name: {}", key)))?;
        // Never echo the value: it is usually a credential
        let value_header = HeaderValue::from_str(value)
            .map_err(|_| QueryAgentError::Config(format!("Invalid value for header {}", key)))?;

        headers.insert(key_header, value_header);
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_creation() {
        let client = LLMHttpClient::new().unwrap();
        assert_eq!(client.max_retries, DEFAULT_MAX_RETRIES);

        let client = LLMHttpClient::with_timeout(30).unwrap().with_max_retries(1);
        assert_eq!(client.max_retries, 1);
    }

    #[test]
    fn test_retry_logic() {
        let client = LLMHttpClient::new().unwrap();

        assert!(client.should_retry(StatusCode::INTERNAL_SERVER_ERROR, 0));
        assert!(client.should_retry(StatusCode::SERVICE_UNAVAILABLE, 0));
        assert!(client.should_retry(StatusCode::TOO_MANY_REQUESTS, 0));

        // Client errors are final
        assert!(!client.should_retry(StatusCode::BAD_REQUEST, 0));
        assert!(!client.should_retry(StatusCode::UNAUTHORIZED, 0));

        assert!(!client.should_retry(StatusCode::INTERNAL_SERVER_ERROR, 5));
    }

    #[test]
    fn test_exponential_backoff() {
        let client = LLMHttpClient::new().unwrap().with_retry_delay(500);
        assert_eq!(client.calculate_delay(0), 500);
        assert_eq!(client.calculate_delay(1), 1000);
        assert_eq!(client.calculate_delay(2), 2000);
    }

    #[test]
    fn test_headers_building() {
        let headers = LLMHttpClient::build_headers("test-key").unwrap();
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer test-key");

        let headers = LLMHttpClient::build_headers_with_auth("x-api-key", "abc").unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "abc");
    }

    #[test]
    fn test_invalid_header_value() {
        assert!(LLMHttpClient::build_headers("bad\nkey").is_err());
    }
}
