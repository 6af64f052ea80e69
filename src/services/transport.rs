// Outbound HTTP with a hard per-call deadline
//
// The whole exchange (connect, send, read body) runs inside tokio::time::timeout.
// On expiry the request future is dropped, which tears down the connection, so no
// background work outlives the call.

use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::core::errors::{ConfigError, EndpointError, EndpointResult};

/// Outbound request description
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub json_body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            json_body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            json_body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer_auth(self, token: Option<&str>) -> Self {
        match token {
            Some(token) => self.header("Authorization", format!("Bearer {}", token)),
            None => self,
        }
    }
}

/// Fully-read response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into `HttpStatus`
    pub fn error_for_status(self) -> EndpointResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(EndpointError::HttpStatus {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Shared HTTP client; cheap to clone
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ConfigError> {
        // Deadlines are enforced per call, not on the client
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self { client })
    }

    /// Perform `request`, failing with `Timeout` once `timeout` elapses.
    pub async fn send(&self, request: HttpRequest, timeout: Duration) -> EndpointResult<HttpResponse> {
        let url = request.url.clone();
        debug!("{} {} (deadline {}ms)", request.method, url, timeout.as_millis());

        match tokio::time::timeout(timeout, self.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(EndpointError::Timeout {
                url,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn execute(&self, request: HttpRequest) -> EndpointResult<HttpResponse> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.json_body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse { status, body })
    }
}
