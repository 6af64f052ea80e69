// Domain types shared by the endpoint adapters, validator and orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const DEFAULT_TITLE_MAX_LENGTH: usize = 70;
pub const DEFAULT_KEYWORDS_MIN: usize = 15;
pub const DEFAULT_KEYWORDS_MAX: usize = 25;

/// Normalized SEO metadata for one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub alt_text: String,
    pub title: String,
    pub keywords: Vec<String>,
}

/// Lifecycle of an image in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl ImageStatus {
    /// pending -> processing -> {completed, error}, nothing else.
    pub fn can_transition_to(self, next: ImageStatus) -> bool {
        matches!(
            (self, next),
            (ImageStatus::Pending, ImageStatus::Processing)
                | (ImageStatus::Processing, ImageStatus::Completed)
                | (ImageStatus::Processing, ImageStatus::Error)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Processing => "processing",
            ImageStatus::Completed => "completed",
            ImageStatus::Error => "error",
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted image record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: Uuid,
    pub session_id: String,
    /// File path, data URL or raw base64 handed to the adapter
    pub file_reference: String,
    pub status: ImageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    /// New record in the `pending` state
    pub fn pending(session_id: impl Into<String>, file_reference: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            file_reference: file_reference.into(),
            status: ImageStatus::Pending,
            metadata: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields written alongside a status change
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub metadata: Option<AnalysisResult>,
    pub error: Option<String>,
}

/// Caller-supplied validation bounds (read-only to the pipeline)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub title_max_length: Option<usize>,
    #[serde(default)]
    pub keywords_min: Option<usize>,
    #[serde(default)]
    pub keywords_max: Option<usize>,
    /// Free-form guidance appended to the prompt
    #[serde(default)]
    pub keyword_rules: Option<String>,
}

impl Preset {
    pub fn title_max_length(&self) -> usize {
        self.title_max_length.unwrap_or(DEFAULT_TITLE_MAX_LENGTH)
    }

    pub fn keywords_min(&self) -> usize {
        self.keywords_min.unwrap_or(DEFAULT_KEYWORDS_MIN)
    }

    pub fn keywords_max(&self) -> usize {
        self.keywords_max.unwrap_or(DEFAULT_KEYWORDS_MAX)
    }
}

/// Result of preset-aware validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Endpoint health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl HealthStatus {
    pub fn healthy(info: impl Into<String>) -> Self {
        Self { ok: true, info: Some(info.into()) }
    }

    pub fn unhealthy(info: impl Into<String>) -> Self {
        Self { ok: false, info: Some(info.into()) }
    }
}

/// One submitted image
#[derive(Debug, Clone, Deserialize)]
pub struct ImageSubmission {
    pub file_reference: String,
}

/// Per-image outcome in a batch report
#[derive(Debug, Clone, Serialize)]
pub struct ImageOutcome {
    pub image_id: Uuid,
    pub status: ImageStatus,
    pub processing_time_ms: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch processing report
///
/// A batch always completes; failures are reported per image.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub session_id: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub processing_time_ms: f64,
    pub results: Vec<ImageOutcome>,
}
