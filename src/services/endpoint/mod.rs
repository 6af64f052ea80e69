// Pluggable vision-model endpoints
//
// Two wire protocols sit behind one trait. Each adapter owns its own transport,
// retry policy and parsing; nothing is shared through a base type.

pub mod chat_completions;
pub mod custom;
pub mod factory;

use async_trait::async_trait;

use crate::core::errors::EndpointResult;
use crate::core::types::{AnalysisResult, HealthStatus};

pub use chat_completions::ChatCompletionsEndpoint;
pub use custom::CustomEndpoint;
pub use factory::{build_endpoint, EndpointFactory};

/// Fixed deadline for health checks (never retried)
pub const HEALTH_CHECK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// A model backend that turns an image into SEO metadata
#[async_trait]
pub trait VisionEndpoint: Send + Sync {
    /// Short protocol name for logs
    fn name(&self) -> &'static str;

    /// Analyze one image.
    ///
    /// `image_reference` is a file path, a `data:` URL or raw base64.
    async fn analyze(
        &self,
        image_reference: &str,
        prompt: &str,
        model_override: Option<&str>,
    ) -> EndpointResult<AnalysisResult>;

    /// Check backend connectivity
    async fn health(&self) -> HealthStatus;
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
