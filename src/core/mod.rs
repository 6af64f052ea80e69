pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{ConfigError, EndpointError, PipelineError, StoreError};
pub use types::{
    AnalysisResult, BatchReport, HealthStatus, ImageOutcome, ImageRecord, ImageStatus,
    ImageSubmission, Preset, StatusUpdate, ValidationOutcome,
};
