// Middleware for resilient model calls

pub mod retry;

pub use retry::RetryPolicy;
