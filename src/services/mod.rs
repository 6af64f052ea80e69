pub mod endpoint;
pub mod transport; // Timeout-bounded HTTP shared by both adapters
pub mod validation;

// Re-export commonly used services
pub use endpoint::{build_endpoint, EndpointFactory, VisionEndpoint};
pub use transport::HttpTransport;
