// Bespoke analysis service: POST /api/analyze {imageBase64, prompt} -> metadata JSON

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

use super::{join_url, VisionEndpoint, HEALTH_CHECK_TIMEOUT};
use crate::core::errors::{EndpointError, EndpointResult};
use crate::core::types::{AnalysisResult, HealthStatus};
use crate::middleware::retry::RetryPolicy;
use crate::services::transport::{HttpRequest, HttpTransport};
use crate::services::validation::normalize_analysis;
use crate::utils::image_ops::encode_image_reference;
use crate::utils::Metrics;

const REQUIRED_FIELDS: [&str; 3] = ["alt_text", "title", "keywords"];

/// Custom protocol adapter
pub struct CustomEndpoint {
    transport: HttpTransport,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    metrics: Option<Metrics>,
}

impl CustomEndpoint {
    pub fn new(transport: HttpTransport, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            metrics: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, success: bool, started: Instant) {
        if let Some(ref m) = self.metrics {
            m.record_api_call(success, started.elapsed(), 0, 0);
        }
    }
}

#[async_trait]
impl VisionEndpoint for CustomEndpoint {
    fn name(&self) -> &'static str {
        "custom"
    }

    #[instrument(skip(self, image_reference, prompt))]
    async fn analyze(
        &self,
        image_reference: &str,
        prompt: &str,
        model_override: Option<&str>,
    ) -> EndpointResult<AnalysisResult> {
        let image = encode_image_reference(image_reference).await?;

        let mut body = json!({
            "imageBase64": image.base64,
            "prompt": prompt,
        });
        if let Some(model) = model_override {
            body["model"] = json!(model);
        }
        let request = HttpRequest::post_json(join_url(&self.base_url, "api/analyze"), body);

        let started = Instant::now();
        let sent = self
            .retry
            .run_if(
                |attempt| {
                    let request = request.clone();
                    async move {
                        if attempt > 0 {
                            warn!("Custom endpoint retry attempt {}", attempt);
                        }
                        self.transport
                            .send(request, self.timeout)
                            .await?
                            .error_for_status()
                    }
                },
                EndpointError::is_retryable,
            )
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                self.record(false, started);
                return Err(e);
            }
        };

        let payload: Value = match serde_json::from_str(&response.body) {
            Ok(payload) => payload,
            Err(e) => {
                self.record(false, started);
                return Err(EndpointError::ModelResponseFormat {
                    reason: format!("response body is not JSON: {}", e),
                    raw: response.body,
                });
            }
        };

        let missing = missing_fields(&payload);
        if !missing.is_empty() {
            self.record(false, started);
            return Err(EndpointError::InvalidResponseShape { missing });
        }

        self.record(true, started);
        Ok(normalize_analysis(&payload))
    }

    async fn health(&self) -> HealthStatus {
        let request = HttpRequest::get(join_url(&self.base_url, "healthz"));
        match self.transport.send(request, HEALTH_CHECK_TIMEOUT).await {
            Ok(response) if response.is_success() => {
                HealthStatus::healthy(format!("{} responded HTTP {}", self.base_url, response.status))
            }
            Ok(response) => HealthStatus::unhealthy(format!("GET /healthz returned HTTP {}", response.status)),
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }
}

fn missing_fields(payload: &Value) -> Vec<String> {
    REQUIRED_FIELDS
        .iter()
        .filter(|field| payload.get(**field).map_or(true, Value::is_null))
        .map(|field| field.to_string())
        .collect()
}
