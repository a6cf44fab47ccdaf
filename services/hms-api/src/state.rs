//! Application state shared across request handlers.

use std::sync::Arc;

use crate::allocator::ScanAllocator;
use crate::catalog::Catalog;
use crate::facade::RecordFacade;
use crate::store::RecordStore;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    catalog: Catalog,
    store: Arc<dyn RecordStore>,
    facade: RecordFacade,
}

impl AppState {
    /// Create a new application state around a record store, allocating
    /// business ids by scanning that store.
    pub fn new(catalog: Catalog, store: Arc<dyn RecordStore>, allocation_retries: u32) -> Self {
        let allocator = Arc::new(ScanAllocator::new(store.clone()));
        let facade = RecordFacade::new(store.clone(), allocator, allocation_retries);
        Self {
            inner: Arc::new(AppStateInner {
                catalog,
                store,
                facade,
            }),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.store
    }

    pub fn facade(&self) -> &RecordFacade {
        &self.inner.facade
    }
}
