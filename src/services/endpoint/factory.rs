use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use super::{ChatCompletionsEndpoint, CustomEndpoint, VisionEndpoint};
use crate::core::config::{EndpointConfig, EndpointMode};
use crate::core::errors::{ConfigError, ConfigResult};
use crate::middleware::retry::RetryPolicy;
use crate::services::transport::HttpTransport;
use crate::utils::Metrics;

/// Construct the adapter selected by `config.mode`.
///
/// Fails with `MissingParameter` before any network activity when the selected
/// mode lacks a required setting.
pub fn build_endpoint(
    config: &EndpointConfig,
    metrics: Option<Metrics>,
) -> ConfigResult<Arc<dyn VisionEndpoint>> {
    let retry = RetryPolicy::new(config.max_retries, config.retry_base_delay());

    match config.mode {
        EndpointMode::OpenAi => {
            let base_url = require(config.mode, "OPENAI_BASE_URL", &config.openai_base_url)?;
            let model = require(config.mode, "OPENAI_MODEL", &config.openai_model)?;

            let mut endpoint = ChatCompletionsEndpoint::new(
                HttpTransport::new()?,
                base_url,
                model,
                config.openai_api_key.clone(),
            )
            .with_max_tokens(config.openai_max_tokens)
            .with_timeout(config.timeout())
            .with_retry(retry);
            if let Some(m) = metrics {
                endpoint = endpoint.with_metrics(m);
            }

            info!(
                "Using chat-completions endpoint {} (model {}, auth {})",
                base_url,
                model,
                if config.openai_api_key.is_some() { "bearer" } else { "none" }
            );
            Ok(Arc::new(endpoint))
        }
        EndpointMode::Custom => {
            let base_url = require(config.mode, "CUSTOM_BASE_URL", &config.custom_base_url)?;

            let mut endpoint = CustomEndpoint::new(HttpTransport::new()?, base_url)
                .with_timeout(config.timeout())
                .with_retry(retry);
            if let Some(m) = metrics {
                endpoint = endpoint.with_metrics(m);
            }

            info!("Using custom endpoint {}", base_url);
            Ok(Arc::new(endpoint))
        }
    }
}

fn require<'a>(mode: EndpointMode, key: &str, value: &'a Option<String>) -> ConfigResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| ConfigError::MissingParameter {
            mode: mode.to_string(),
            key: key.to_string(),
        })
}

/// Process-scoped holder of the active endpoint.
///
/// Built once on first use and cached until `reset`. The application owns one
/// instance; tests create their own.
pub struct EndpointFactory {
    config: EndpointConfig,
    metrics: Option<Metrics>,
    active: RwLock<Option<Arc<dyn VisionEndpoint>>>,
}

impl EndpointFactory {
    pub fn new(config: EndpointConfig, metrics: Option<Metrics>) -> Self {
        Self {
            config,
            metrics,
            active: RwLock::new(None),
        }
    }

    /// Return the cached endpoint, building it on first call
    pub fn get_or_init(&self) -> ConfigResult<Arc<dyn VisionEndpoint>> {
        if let Some(endpoint) = self.active.read().as_ref() {
            return Ok(Arc::clone(endpoint));
        }

        let mut slot = self.active.write();
        // Another caller may have won the race
        if let Some(endpoint) = slot.as_ref() {
            return Ok(Arc::clone(endpoint));
        }
        let endpoint = build_endpoint(&self.config, self.metrics.clone())?;
        *slot = Some(Arc::clone(&endpoint));
        Ok(endpoint)
    }

    /// Endpoint if already initialized
    pub fn active(&self) -> Option<Arc<dyn VisionEndpoint>> {
        self.active.read().clone()
    }

    /// Replace the cached endpoint (test doubles)
    pub fn install(&self, endpoint: Arc<dyn VisionEndpoint>) {
        *self.active.write() = Some(endpoint);
    }

    /// Drop the cached endpoint; the next `get_or_init` rebuilds it
    pub fn reset(&self) {
        *self.active.write() = None;
    }

    pub fn mode(&self) -> EndpointMode {
        self.config.mode
    }
}
