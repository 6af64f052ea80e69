pub mod preset;
pub mod schema;

pub use preset::{validate_metadata, validate_result};
pub use schema::{normalize_analysis, repair, validate_strict};
