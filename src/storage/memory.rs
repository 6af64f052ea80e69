use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::ImageStore;
use crate::core::errors::{StoreError, StoreResult};
use crate::core::types::{ImageRecord, ImageStatus, StatusUpdate};

/// In-process store backing the HTTP surface and tests.
///
/// Rejects illegal status transitions. Readers get clones, never references
/// into the map.
#[derive(Default)]
pub struct InMemoryImageStore {
    images: DashMap<Uuid, StoredImage>,
    next_seq: AtomicU64,
}

struct StoredImage {
    /// Insertion order, for stable listing
    seq: u64,
    record: ImageRecord,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageStore for InMemoryImageStore {
    fn create_image(&self, record: ImageRecord) -> StoreResult<()> {
        if record.status != ImageStatus::Pending {
            return Err(StoreError::InvalidTransition {
                id: record.id.to_string(),
                from: "none".to_string(),
                to: record.status.to_string(),
            });
        }
        match self.images.entry(record.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::AlreadyExists(record.id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(StoredImage { seq, record });
                Ok(())
            }
        }
    }

    fn update_image_status(&self, id: Uuid, status: ImageStatus, update: StatusUpdate) -> StoreResult<ImageRecord> {
        let mut stored = self
            .images
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let record = &mut stored.record;

        if !record.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: record.status.to_string(),
                to: status.to_string(),
            });
        }

        record.status = status;
        if update.metadata.is_some() {
            record.metadata = update.metadata;
        }
        if update.error.is_some() {
            record.error = update.error;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    fn get_image(&self, id: Uuid) -> StoreResult<ImageRecord> {
        self.images
            .get(&id)
            .map(|stored| stored.record.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn get_images(&self, session_id: &str) -> StoreResult<Vec<ImageRecord>> {
        let mut records: Vec<(u64, ImageRecord)> = self
            .images
            .iter()
            .filter(|stored| stored.record.session_id == session_id)
            .map(|stored| (stored.seq, stored.record.clone()))
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        Ok(records.into_iter().map(|(_, record)| record).collect())
    }
}
