#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod store;
pub mod subscription;

pub use trail_core::Clock;

pub use api::{HttpTrailApi, InMemoryTrailApi, TrailApi};
pub use config::{StoreConfig, TrailServiceConfig};
pub use error::{ConfigError, TrailApiError, TrailStoreError};
pub use store::{TrailSnapshot, TrailStore};
pub use subscription::{SubscriptionHandle, subscribe};
