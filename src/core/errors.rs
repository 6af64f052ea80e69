// Error taxonomy, one enum per layer
//
// Endpoint errors say whether a retry can help. Store and pipeline errors stay
// scoped to a single image; only ConfigError is fatal at startup.

use thiserror::Error;

/// Model endpoint errors (transport, protocol, response shape)
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Model endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Model response could not be parsed as metadata JSON: {reason} (raw: {raw})")]
    ModelResponseFormat { reason: String, raw: String },

    #[error("Model response is missing required fields: {missing:?}")]
    InvalidResponseShape { missing: Vec<String> },

    #[error("Failed to read image {path}: {source}")]
    ImageRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid image reference: {0}")]
    InvalidImage(String),
}

impl EndpointError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Timeouts, I/O failures, 429 and 5xx are transient; everything else is
    /// deterministic for the same input.
    pub fn is_retryable(&self) -> bool {
        match self {
            EndpointError::Timeout { .. } | EndpointError::Transport(_) => true,
            EndpointError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for EndpointError {
    fn from(err: reqwest::Error) -> Self {
        EndpointError::Transport(err.to_string())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown AI_MODE '{0}' (expected 'openai' or 'custom')")]
    UnknownMode(String),

    #[error("Missing required setting {key} for '{mode}' mode")]
    MissingParameter { mode: String, key: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Storage contract errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Image {0} not found")]
    NotFound(String),

    #[error("Image {0} already exists")]
    AlreadyExists(String),

    #[error("Illegal status transition for image {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// Pipeline orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Analysis failed for image {image_id}: {source}")]
    AnalysisFailed {
        image_id: String,
        #[source]
        source: EndpointError,
    },

    #[error("Metadata rejected for image {image_id}: {errors:?}")]
    ValidationFailed {
        image_id: String,
        errors: Vec<String>,
    },

    #[error("Storage operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Image {0} already has an analysis in flight")]
    AlreadyInFlight(String),
}

// Convenience type aliases for Results
pub type EndpointResult<T> = Result<T, EndpointError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EndpointError::Timeout { url: "u".into(), timeout_ms: 10 }.is_retryable());
        assert!(EndpointError::Transport("reset".into()).is_retryable());
        assert!(EndpointError::HttpStatus { status: 503, body: String::new() }.is_retryable());
        assert!(EndpointError::HttpStatus { status: 429, body: String::new() }.is_retryable());
        assert!(!EndpointError::HttpStatus { status: 400, body: String::new() }.is_retryable());
        assert!(!EndpointError::ModelResponseFormat { reason: "x".into(), raw: "y".into() }
            .is_retryable());
        assert!(!EndpointError::InvalidResponseShape { missing: vec!["title".into()] }
            .is_retryable());
    }
}
