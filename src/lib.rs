// Library exports for the image SEO metadata workflow

pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{ConfigError, EndpointError, PipelineError, StoreError},
    types::{AnalysisResult, BatchReport, ImageRecord, ImageStatus, Preset, ValidationOutcome},
};

pub use middleware::RetryPolicy;

pub use orchestration::AnalysisOrchestrator;

pub use services::{build_endpoint, EndpointFactory, VisionEndpoint};

pub use storage::{ImageStore, InMemoryImageStore};

pub use utils::Metrics;
