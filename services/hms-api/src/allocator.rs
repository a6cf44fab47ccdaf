//! Business id allocation.
//!
//! The next id for an entity is derived from the ids currently stored:
//! max numeric suffix among matching ids, plus one. There is no persisted
//! counter, so deleting the highest record frees its number. Allocation is
//! not atomic with the insert that follows; the store's unique index catches
//! the race and the facade retries.

use std::sync::Arc;

use async_trait::async_trait;
use hms_seqid::{next_in_sequence, IdError};
use thiserror::Error;

use crate::catalog::Entity;
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Error)]
pub enum AllocError {
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Sequence(#[from] IdError),
}

/// Produces the next business id for an entity.
#[async_trait]
pub trait IdAllocator: Send + Sync {
    async fn allocate_next(&self, entity: &Entity) -> Result<String, AllocError>;
}

/// Allocates by scanning the stored business ids.
pub struct ScanAllocator {
    store: Arc<dyn RecordStore>,
}

impl ScanAllocator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IdAllocator for ScanAllocator {
    async fn allocate_next(&self, entity: &Entity) -> Result<String, AllocError> {
        let existing = self
            .store
            .business_ids(&entity.name, entity.codec.prefix())
            .await?;
        let next = next_in_sequence(&entity.codec, existing.iter().map(String::as_str))?;
        tracing::debug!(entity = %entity.name, id = %next, scanned = existing.len(), "allocated business id");
        Ok(next)
    }
}
