//! HTTP transport for a JSON control-plane gateway
//!
//! Each call is a `POST {endpoint}/{service}/{call}` whose body is the
//! parameter record and whose response body is the response record.

use super::transport::{Params, PoolConfig, Transport, TransportFactory};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

const USER_AGENT: &str = concat!("cloudgraph/", env!("CARGO_PKG_VERSION"));

/// Sanitize response body for logging
/// Truncates long responses and drops control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Builds one [`HttpTransport`] per service, sharing a connection pool
#[derive(Clone)]
pub struct HttpFactory {
    endpoint: String,
}

impl HttpFactory {
    pub fn new(endpoint: &str) -> Result<Self> {
        let parsed = reqwest::Url::parse(endpoint)
            .with_context(|| format!("Invalid endpoint URL: {}", endpoint))?;
        Ok(Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }
}

impl TransportFactory for HttpFactory {
    fn build(&self, service: &str, pool: &PoolConfig) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(HttpTransport::new(&self.endpoint, service, pool)?))
    }
}

/// HTTP client wrapper for one service
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    permits: Arc<Semaphore>,
}

impl HttpTransport {
    /// Create a new HTTP transport for `service`
    pub fn new(endpoint: &str, service: &str, pool: &PoolConfig) -> Result<Self> {
        let max = pool.max_connections.max(1);
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(max)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/{}",
                endpoint.trim_end_matches('/'),
                urlencoding::encode(service)
            ),
            permits: Arc::new(Semaphore::new(max)),
        })
    }

    fn call_url(&self, call: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(call))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn invoke(&self, call: &str, params: &Params) -> Result<Value> {
        let url = self.call_url(call);
        let _permit = self
            .permits
            .acquire()
            .await
            .context("Connection pool closed")?;

        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(params)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(anyhow::anyhow!("API request failed: {}", status));
        }

        // Handle empty response
        if body.is_empty() {
            return Ok(Value::Object(Params::new()));
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}

/// Format a transport error for display
pub fn format_api_error(error: &anyhow::Error) -> String {
    let error_str = error.to_string();

    if error_str.contains("403") {
        return "Permission denied. Check the IAM permissions of your credentials.".to_string();
    }
    if error_str.contains("401") {
        return "Authentication failed. Refresh your credentials.".to_string();
    }
    if error_str.contains("404") {
        return "Endpoint not found.".to_string();
    }
    if error_str.contains("429") {
        return "Rate limit exceeded. Please try again later.".to_string();
    }
    if error_str.contains("500") || error_str.contains("503") {
        return "Service temporarily unavailable. Please try again.".to_string();
    }

    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(80)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
