// Narrow read/write contract onto the image store
//
// The relational store lives outside this crate. The pipeline only creates
// records, moves them through the status lifecycle and lists them per session.

pub mod memory;

use uuid::Uuid;

use crate::core::errors::StoreResult;
use crate::core::types::{ImageRecord, ImageStatus, StatusUpdate};

pub use memory::InMemoryImageStore;

/// Synchronous, failable storage operations used by the orchestrator
pub trait ImageStore: Send + Sync {
    fn create_image(&self, record: ImageRecord) -> StoreResult<()>;

    /// Move `id` to `status`, writing `update` alongside
    fn update_image_status(&self, id: Uuid, status: ImageStatus, update: StatusUpdate) -> StoreResult<ImageRecord>;

    fn get_image(&self, id: Uuid) -> StoreResult<ImageRecord>;

    /// Snapshot of a session's images in creation order
    fn get_images(&self, session_id: &str) -> StoreResult<Vec<ImageRecord>>;
}
