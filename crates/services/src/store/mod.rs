mod service;
mod snapshot;

// Public API of the trail store.
pub use crate::error::TrailStoreError;
pub use service::TrailStore;
pub use snapshot::TrailSnapshot;
