// OpenAI-compatible vision endpoint (LM Studio, vLLM, Ollama's /v1, OpenAI)
// Image goes inline as a data URL in the user message; the model answers with
// JSON text that may be fenced or wrapped in prose.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::{join_url, VisionEndpoint, HEALTH_CHECK_TIMEOUT};
use crate::core::errors::{EndpointError, EndpointResult};
use crate::core::types::{AnalysisResult, HealthStatus};
use crate::middleware::retry::RetryPolicy;
use crate::services::transport::{HttpRequest, HttpTransport};
use crate::services::validation::normalize_analysis;
use crate::utils::image_ops::encode_image_reference;
use crate::utils::Metrics;

const TEMPERATURE: f32 = 0.2;

const SYSTEM_PROMPT: &str = "You are a stock photography metadata editor. \
    Describe the image for search and accessibility. \
    Respond with strict JSON only, no Markdown and no commentary, using exactly these fields: \
    \"alt_text\" (string, 5-160 characters, literal description for screen readers), \
    \"title\" (string, at most 70 characters, marketable headline), \
    \"keywords\" (array of 5-50 single- or two-word strings, most relevant first, no duplicates).";

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("valid regex"));

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<Value>,
}

/// Chat-Completions protocol adapter
pub struct ChatCompletionsEndpoint {
    transport: HttpTransport,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    timeout: Duration,
    retry: RetryPolicy,
    metrics: Option<Metrics>,
}

impl ChatCompletionsEndpoint {
    pub fn new(
        transport: HttpTransport,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            max_tokens: 800,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            metrics: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
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

    fn build_request_body(&self, prompt: &str, image_data_url: String, model: &str) -> Value {
        json!({
            "model": model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": prompt},
                        {"type": "image_url", "image_url": {"url": image_data_url}}
                    ]
                }
            ],
            "temperature": TEMPERATURE,
            "max_tokens": self.max_tokens,
            "stream": false
        })
    }

    fn record(&self, success: bool, started: Instant, usage: Option<&Usage>) {
        if let Some(ref m) = self.metrics {
            let (input, output) = usage
                .map(|u| (u.prompt_tokens, u.completion_tokens))
                .unwrap_or((0, 0));
            m.record_api_call(success, started.elapsed(), input, output);
        }
    }
}

#[async_trait]
impl VisionEndpoint for ChatCompletionsEndpoint {
    fn name(&self) -> &'static str {
        "openai"
    }

    #[instrument(skip(self, image_reference, prompt), fields(model = tracing::field::Empty))]
    async fn analyze(
        &self,
        image_reference: &str,
        prompt: &str,
        model_override: Option<&str>,
    ) -> EndpointResult<AnalysisResult> {
        let model = model_override.unwrap_or(self.model.as_str());
        tracing::Span::current().record("model", model);

        let image = encode_image_reference(image_reference).await?;
        let body = self.build_request_body(prompt, image.data_url(), model);
        let request = HttpRequest::post_json(join_url(&self.base_url, "chat/completions"), body)
            .bearer_auth(self.api_key.as_deref());

        let started = Instant::now();
        let sent = self
            .retry
            .run_if(
                |attempt| {
                    let request = request.clone();
                    async move {
                        if attempt > 0 {
                            warn!("Chat completion retry attempt {}", attempt);
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
                self.record(false, started, None);
                return Err(e);
            }
        };

        let completion: ChatCompletionResponse = match serde_json::from_str(&response.body) {
            Ok(completion) => completion,
            Err(e) => {
                self.record(false, started, None);
                return Err(EndpointError::ModelResponseFormat {
                    reason: format!("not a chat completion response: {}", e),
                    raw: response.body,
                });
            }
        };
        if let Some(usage) = &completion.usage {
            debug!(
                "Chat completion: {} prompt + {} completion tokens in {:.2}s",
                usage.prompt_tokens,
                usage.completion_tokens,
                started.elapsed().as_secs_f64()
            );
        }

        let usage = completion.usage;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty());

        let payload = match content {
            Some(content) => extract_json_payload(&content),
            None => Err(EndpointError::ModelResponseFormat {
                reason: "assistant message has no content".to_string(),
                raw: response.body,
            }),
        };
        self.record(payload.is_ok(), started, usage.as_ref());

        Ok(normalize_analysis(&payload?))
    }

    async fn health(&self) -> HealthStatus {
        let request = HttpRequest::get(join_url(&self.base_url, "models"))
            .bearer_auth(self.api_key.as_deref());

        let response = match self.transport.send(request, HEALTH_CHECK_TIMEOUT).await {
            Ok(response) => response,
            Err(e) => return HealthStatus::unhealthy(e.to_string()),
        };

        if !response.is_success() {
            return HealthStatus::unhealthy(format!("GET /models returned HTTP {}", response.status));
        }

        let count = serde_json::from_str::<ModelList>(&response.body)
            .map(|list| list.data.len())
            .unwrap_or(0);
        info!("Chat endpoint healthy, {} models listed", count);
        HealthStatus::healthy(format!("Connected to {} ({} models available)", self.base_url, count))
    }
}

/// Pull the JSON object out of an assistant message.
///
/// Strips a surrounding Markdown fence, then falls back to the outermost
/// `{...}` span when prose is mixed in.
pub fn extract_json_payload(content: &str) -> EndpointResult<Value> {
    let trimmed = content.trim();
    let unfenced = FENCED_BLOCK
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
        return Ok(value);
    }

    // First `{` that opens a complete object wins; trailing prose is ignored
    let mut first_error = None;
    for (idx, _) in unfenced.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&unfenced[idx..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) if value.is_object() => return Ok(value),
            Some(Err(e)) if first_error.is_none() => first_error = Some(e.to_string()),
            _ => {}
        }
    }

    let reason = match first_error {
        Some(e) => format!("embedded object is not valid JSON: {}", e),
        None => "no JSON object found".to_string(),
    };
    Err(EndpointError::ModelResponseFormat {
        reason,
        raw: content.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_server, TINY_PNG_BASE64};
    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::get, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const FENCED: &str = "```json\n{\"alt_text\":\"A red car on a street\",\"title\":\"Red car in urban setting\",\"keywords\":[\"car\",\"red\",\"street\",\"urban\",\"vehicle\",\"transport\"]}\n```";

    fn completion(content: &str) -> Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 60}
        })
    }

    #[test]
    fn test_fenced_json_scenario() {
        let payload = extract_json_payload(FENCED).unwrap();
        let result = normalize_analysis(&payload);

        assert_eq!(
            result,
            AnalysisResult {
                alt_text: "A red car on a street".to_string(),
                title: "Red car in urban setting".to_string(),
                keywords: ["car", "red", "street", "urban", "vehicle", "transport"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }
        );
    }

    #[test]
    fn test_plain_fence_without_language() {
        let value = extract_json_payload("```\n{\"title\": \"x\"}\n```").unwrap();
        assert_eq!(value["title"], "x");
    }

    #[test]
    fn test_object_extracted_from_prose() {
        let content = "Sure! Here is the metadata you asked for:\n{\"title\": \"Mountain lake\"}\nLet me know if you need more.";
        let value = extract_json_payload(content).unwrap();
        assert_eq!(value["title"], "Mountain lake");
    }

    #[test]
    fn test_first_object_wins_over_trailing_braces() {
        let content = "Here is the result: {\"title\": \"Mountain lake\"} (fields follow the {schema} you gave)";
        let value = extract_json_payload(content).unwrap();
        assert_eq!(value["title"], "Mountain lake");
    }

    #[test]
    fn test_skips_brace_group_that_is_not_json() {
        let content = "Using {schema}: {\"title\": \"Harbor at dawn\"}";
        let value = extract_json_payload(content).unwrap();
        assert_eq!(value["title"], "Harbor at dawn");
    }

    #[test]
    fn test_prose_without_json_is_format_error() {
        let err = extract_json_payload("I cannot describe this image.").unwrap_err();
        match err {
            EndpointError::ModelResponseFormat { raw, .. } => {
                assert_eq!(raw, "I cannot describe this image.")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_request_body_shape() {
        let endpoint = ChatCompletionsEndpoint::new(
            HttpTransport::new().unwrap(),
            "http://localhost:1234/v1",
            "llava",
            None,
        )
        .with_max_tokens(300);
        let body = endpoint.build_request_body("Describe", "data:image/png;base64,AAAA".into(), "llava");

        assert_eq!(body["model"], "llava");
        assert_eq!(body["max_tokens"], 300);
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"][0]["text"], "Describe");
        assert_eq!(
            body["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[derive(Clone)]
    struct FakeBackend {
        calls: Arc<AtomicUsize>,
        failures_before_success: usize,
    }

    async fn fake_completion(
        State(state): State<FakeBackend>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, StatusCode> {
        let n = state.calls.fetch_add(1, Ordering::SeqCst);
        if n < state.failures_before_success {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        assert_eq!(
            headers.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer sk-test")
        );
        assert!(body["messages"][1]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        Ok(Json(completion(FENCED)))
    }

    fn fake_router(state: FakeBackend) -> Router {
        Router::new()
            .route("/v1/chat/completions", post(fake_completion))
            .route(
                "/v1/models",
                get(|| async { Json(json!({"data": [{"id": "llava"}, {"id": "qwen2-vl"}]})) }),
            )
            .with_state(state)
    }

    #[tokio::test]
    async fn test_analyze_retries_server_errors() {
        let state = FakeBackend {
            calls: Arc::new(AtomicUsize::new(0)),
            failures_before_success: 2,
        };
        let base = spawn_server(fake_router(state.clone())).await;
        let metrics = Metrics::new();
        let endpoint = ChatCompletionsEndpoint::new(
            HttpTransport::new().unwrap(),
            format!("{}/v1", base),
            "llava",
            Some("sk-test".to_string()),
        )
        .with_retry(RetryPolicy::new(2, Duration::from_millis(10)))
        .with_metrics(metrics.clone());

        let result = endpoint
            .analyze(&format!("data:image/png;base64,{}", TINY_PNG_BASE64), "Describe", None)
            .await
            .unwrap();

        assert_eq!(result.title, "Red car in urban setting");
        assert_eq!(state.calls.load(Ordering::SeqCst), 3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.model.succeeded, 1);
        assert_eq!(snapshot.model.prompt_tokens, 900);
    }

    #[tokio::test]
    async fn test_analyze_surfaces_last_error_after_exhaustion() {
        let state = FakeBackend {
            calls: Arc::new(AtomicUsize::new(0)),
            failures_before_success: usize::MAX,
        };
        let base = spawn_server(fake_router(state.clone())).await;
        let endpoint = ChatCompletionsEndpoint::new(
            HttpTransport::new().unwrap(),
            format!("{}/v1", base),
            "llava",
            Some("sk-test".to_string()),
        )
        .with_retry(RetryPolicy::new(1, Duration::from_millis(5)));

        let err = endpoint.analyze(TINY_PNG_BASE64, "Describe", None).await.unwrap_err();
        assert!(matches!(err, EndpointError::HttpStatus { status: 503, .. }));
        assert_eq!(state.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unparseable_content_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(completion("Sorry, I can't help with that."))
                }
            }),
        );
        let base = spawn_server(app).await;
        let metrics = Metrics::new();
        let endpoint = ChatCompletionsEndpoint::new(
            HttpTransport::new().unwrap(),
            format!("{}/v1", base),
            "llava",
            None,
        )
        .with_retry(RetryPolicy::new(3, Duration::from_millis(5)))
        .with_metrics(metrics.clone());

        let err = endpoint.analyze(TINY_PNG_BASE64, "Describe", None).await.unwrap_err();
        assert!(matches!(err, EndpointError::ModelResponseFormat { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Unusable content counts as a failed exchange
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.model.succeeded, 0);
        assert_eq!(snapshot.model.failed, 1);
        assert_eq!(snapshot.model.prompt_tokens, 900);
    }

    #[tokio::test]
    async fn test_health_reports_model_count() {
        let state = FakeBackend {
            calls: Arc::new(AtomicUsize::new(0)),
            failures_before_success: 0,
        };
        let base = spawn_server(fake_router(state)).await;
        let endpoint = ChatCompletionsEndpoint::new(
            HttpTransport::new().unwrap(),
            format!("{}/v1", base),
            "llava",
            None,
        );

        let health = endpoint.health().await;
        assert!(health.ok);
        assert!(health.info.unwrap().contains("2 models"));
    }

    #[tokio::test]
    async fn test_health_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = ChatCompletionsEndpoint::new(
            HttpTransport::new().unwrap(),
            format!("http://{}/v1", addr),
            "llava",
            None,
        );
        assert!(!endpoint.health().await.ok);
    }
}
