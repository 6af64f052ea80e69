pub mod image_ops;
pub mod metrics;

pub use image_ops::{encode_image_reference, sniff_mime_type, EncodedImage};
pub use metrics::{Metrics, MetricsSnapshot};
